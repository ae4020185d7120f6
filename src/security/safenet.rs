//! SSRF-safe dialer
//!
//! Every outbound connection the bridge makes goes through [`SafeDialer`]:
//! the hostname is resolved up front, each resolved address is classified,
//! and only addresses the policy permits are dialed. Connections are made to
//! the vetted IP rather than the hostname, so a second DNS answer cannot
//! redirect the request (DNS rebinding).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Environment variable permitting loopback targets.
pub const ENV_ALLOW_LOOPBACK: &str = "ALLOW_LOOPBACK_RESOURCES";
/// Environment variable permitting loopback and private-range targets.
pub const ENV_ALLOW_LOCAL: &str = "DANGEROUS_ALLOW_LOCAL_IPS";
/// Environment variable permitting private-range targets only.
pub const ENV_ALLOW_PRIVATE: &str = "ALLOW_PRIVATE_NETWORK_RESOURCES";

/// Address category used by the allow-list decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrCategory {
    /// Globally routable
    Public,
    /// 127.0.0.0/8, ::1 and v4-mapped equivalents
    Loopback,
    /// RFC1918, ULA fc00::/7, CGNAT 100.64.0.0/10
    Private,
    /// Never dialable: link-local, multicast, unspecified, broadcast
    Forbidden,
}

fn categorize(addr: IpAddr) -> AddrCategory {
    match addr {
        IpAddr::V4(v4) => categorize_v4(v4),
        IpAddr::V6(v6) => categorize_v6(v6),
    }
}

fn categorize_v4(addr: Ipv4Addr) -> AddrCategory {
    if addr.is_loopback() {
        return AddrCategory::Loopback;
    }
    if addr.is_link_local() || addr.is_multicast() || addr.is_unspecified() || addr.is_broadcast() {
        return AddrCategory::Forbidden;
    }
    let o = addr.octets();
    // 100.64.0.0/10 carrier-grade NAT counts as private
    let cgnat = o[0] == 100 && (o[1] & 0xC0) == 64;
    if addr.is_private() || cgnat {
        return AddrCategory::Private;
    }
    AddrCategory::Public
}

fn categorize_v6(addr: Ipv6Addr) -> AddrCategory {
    if addr.is_loopback() {
        return AddrCategory::Loopback;
    }
    if addr.is_unspecified() || addr.is_multicast() {
        return AddrCategory::Forbidden;
    }
    let seg = addr.segments();
    // Link-local fe80::/10
    if seg[0] & 0xFFC0 == 0xFE80 {
        return AddrCategory::Forbidden;
    }
    // Unique local fc00::/7
    if seg[0] & 0xFE00 == 0xFC00 {
        return AddrCategory::Private;
    }
    // v4-mapped (::ffff:a.b.c.d) and v4-compatible (::a.b.c.d) literals
    // inherit the category of the embedded v4 address, the classic filter
    // bypass vector.
    if let Some(v4) = embedded_v4(&seg) {
        return categorize_v4(v4);
    }
    // 6to4 (2002::/16) embeds a v4 address in segments 1-2
    if seg[0] == 0x2002 {
        return categorize_v4(v4_from_segments(seg[1], seg[2]));
    }
    AddrCategory::Public
}

fn embedded_v4(seg: &[u16; 8]) -> Option<Ipv4Addr> {
    if seg[..5] != [0, 0, 0, 0, 0] {
        return None;
    }
    match seg[5] {
        0xFFFF => Some(v4_from_segments(seg[6], seg[7])),
        // exclude :: and ::1 which are handled above
        0 if seg[6] != 0 || seg[7] > 1 => Some(v4_from_segments(seg[6], seg[7])),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)] // u16 segments split into octets
fn v4_from_segments(hi: u16, lo: u16) -> Ipv4Addr {
    Ipv4Addr::new((hi >> 8) as u8, hi as u8, (lo >> 8) as u8, lo as u8)
}

/// Allow-list policy, read from the environment once per dialer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialPolicy {
    /// Permit loopback targets
    pub allow_loopback: bool,
    /// Permit private-range targets
    pub allow_private: bool,
}

impl DialPolicy {
    /// Read the policy flags from the environment. Called once at dialer
    /// construction so policy stays stable for the lifetime of an upstream.
    #[must_use]
    pub fn from_env() -> Self {
        let local = env_flag(ENV_ALLOW_LOCAL);
        Self {
            allow_loopback: local || env_flag(ENV_ALLOW_LOOPBACK),
            allow_private: local || env_flag(ENV_ALLOW_PRIVATE),
        }
    }

    fn permits(self, addr: IpAddr) -> bool {
        match categorize(addr) {
            AddrCategory::Public => true,
            AddrCategory::Loopback => self.allow_loopback,
            AddrCategory::Private => self.allow_private,
            AddrCategory::Forbidden => false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// DNS-resolving dialer that only connects to policy-approved addresses.
#[derive(Debug, Clone)]
pub struct SafeDialer {
    policy: DialPolicy,
}

impl SafeDialer {
    /// Create a dialer with an explicit policy.
    #[must_use]
    pub fn new(policy: DialPolicy) -> Self {
        Self { policy }
    }

    /// Create a dialer whose policy is read from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(DialPolicy::from_env())
    }

    /// Resolve `host` and return the addresses the policy permits, in
    /// resolver order.
    pub async fn resolve_allowed(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let candidates: Vec<SocketAddr> = if let Ok(ip) = host.parse::<IpAddr>() {
            vec![SocketAddr::new(ip, port)]
        } else {
            lookup_host((host, port))
                .await
                .map_err(|e| Error::SafeDialer(format!("failed to resolve {host}: {e}")))?
                .collect()
        };

        let allowed: Vec<SocketAddr> = candidates
            .iter()
            .copied()
            .filter(|addr| self.policy.permits(addr.ip()))
            .collect();

        if allowed.is_empty() {
            for addr in &candidates {
                warn!(host = %host, addr = %addr.ip(), "Address rejected by dial policy");
            }
            return Err(Error::SafeDialer(format!(
                "ssrf attempt blocked: no safe public IP found for {host}"
            )));
        }
        Ok(allowed)
    }

    /// Dial `host:port`, trying each permitted address in resolver order and
    /// returning the first successful connection.
    pub async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let allowed = self.resolve_allowed(host, port).await?;

        let mut last_err: Option<std::io::Error> = None;
        for addr in allowed {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(host = %host, addr = %addr, "Connected");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(host = %host, addr = %addr, error = %e, "Dial failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(Error::SafeDialer(format!(
            "failed to connect to {host}:{port}: {}",
            last_err.map_or_else(|| "no address dialed".to_string(), |e| e.to_string())
        )))
    }

    /// Build a `reqwest` client whose connections to `url`'s host are pinned
    /// to the vetted addresses, so a rebinding DNS answer cannot change the
    /// target mid-flight.
    pub async fn http_client(&self, url: &url::Url, timeout: Duration) -> Result<reqwest::Client> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::SafeDialer(format!(
                    "unsupported URL scheme \"{other}\" for {url}"
                )));
            }
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::SafeDialer(format!("URL {url} has no host")))?;
        let port = url.port_or_known_default().unwrap_or(443);

        let allowed = self.resolve_allowed(host, port).await?;

        reqwest::Client::builder()
            .timeout(timeout)
            .resolve_to_addrs(host, &allowed)
            .build()
            .map_err(|e| Error::SafeDialer(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deny_all() -> DialPolicy {
        DialPolicy::default()
    }

    // ── categorization ────────────────────────────────────────────────

    #[test]
    fn loopback_addresses() {
        assert_eq!(categorize("127.0.0.1".parse().unwrap()), AddrCategory::Loopback);
        assert_eq!(categorize("127.255.255.254".parse().unwrap()), AddrCategory::Loopback);
        assert_eq!(categorize("::1".parse().unwrap()), AddrCategory::Loopback);
        assert_eq!(categorize("::ffff:127.0.0.1".parse().unwrap()), AddrCategory::Loopback);
    }

    #[test]
    fn private_ranges() {
        for s in ["10.0.0.1", "172.16.0.1", "172.31.255.255", "192.168.1.1", "100.64.0.1"] {
            assert_eq!(categorize(s.parse().unwrap()), AddrCategory::Private, "{s}");
        }
        assert_eq!(categorize("fc00::1".parse().unwrap()), AddrCategory::Private);
        assert_eq!(categorize("fd12::1".parse().unwrap()), AddrCategory::Private);
        assert_eq!(categorize("::ffff:10.0.0.1".parse().unwrap()), AddrCategory::Private);
    }

    #[test]
    fn forbidden_ranges() {
        for s in ["169.254.0.1", "224.0.0.1", "0.0.0.0", "255.255.255.255"] {
            assert_eq!(categorize(s.parse().unwrap()), AddrCategory::Forbidden, "{s}");
        }
        assert_eq!(categorize("fe80::1".parse().unwrap()), AddrCategory::Forbidden);
        assert_eq!(categorize("ff02::1".parse().unwrap()), AddrCategory::Forbidden);
        assert_eq!(categorize("::".parse().unwrap()), AddrCategory::Forbidden);
    }

    #[test]
    fn six_to_four_inherits_embedded_category() {
        // 2002:0a00:0001:: embeds 10.0.0.1
        assert_eq!(categorize("2002:a00:1::".parse().unwrap()), AddrCategory::Private);
        // 2002:0808:0808:: embeds 8.8.8.8
        assert_eq!(categorize("2002:808:808::".parse().unwrap()), AddrCategory::Public);
    }

    #[test]
    fn public_addresses() {
        assert_eq!(categorize("8.8.8.8".parse().unwrap()), AddrCategory::Public);
        assert_eq!(categorize("93.184.216.34".parse().unwrap()), AddrCategory::Public);
        assert_eq!(categorize("2607:f8b0::1".parse().unwrap()), AddrCategory::Public);
        assert_eq!(categorize("::ffff:8.8.8.8".parse().unwrap()), AddrCategory::Public);
    }

    // ── policy ────────────────────────────────────────────────────────

    #[test]
    fn default_policy_denies_local() {
        let p = deny_all();
        assert!(p.permits("8.8.8.8".parse().unwrap()));
        assert!(!p.permits("127.0.0.1".parse().unwrap()));
        assert!(!p.permits("10.0.0.1".parse().unwrap()));
        assert!(!p.permits("169.254.0.1".parse().unwrap()));
    }

    #[test]
    fn loopback_flag_only_opens_loopback() {
        let p = DialPolicy { allow_loopback: true, allow_private: false };
        assert!(p.permits("127.0.0.1".parse().unwrap()));
        assert!(!p.permits("192.168.1.1".parse().unwrap()));
        // link-local stays closed under every policy
        assert!(!p.permits("169.254.0.1".parse().unwrap()));
    }

    #[test]
    fn private_flag_only_opens_private() {
        let p = DialPolicy { allow_loopback: false, allow_private: true };
        assert!(!p.permits("127.0.0.1".parse().unwrap()));
        assert!(p.permits("192.168.1.1".parse().unwrap()));
        assert!(p.permits("fd00::1".parse().unwrap()));
    }

    // ── dialer ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn resolve_allowed_rejects_denied_literal() {
        let dialer = SafeDialer::new(deny_all());
        let err = dialer.resolve_allowed("127.0.0.1", 80).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("ssrf attempt blocked: no safe public IP found for 127.0.0.1")
        );
    }

    #[tokio::test]
    async fn resolve_allowed_accepts_public_literal() {
        let dialer = SafeDialer::new(deny_all());
        let addrs = dialer.resolve_allowed("8.8.8.8", 53).await.unwrap();
        assert_eq!(addrs, vec!["8.8.8.8:53".parse().unwrap()]);
    }

    #[tokio::test]
    async fn dial_connects_to_permitted_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dialer = SafeDialer::new(DialPolicy { allow_loopback: true, allow_private: false });
        let stream = dialer.dial("127.0.0.1", port).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn http_client_rejects_non_http_scheme() {
        let dialer = SafeDialer::new(deny_all());
        let url = url::Url::parse("ftp://example.com/x").unwrap();
        let err = dialer.http_client(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }
}
