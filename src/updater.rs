//! Self-update binary replacement
//!
//! Downloads a release asset and its checksums file, verifies the SHA-256
//! digest, then swaps the running executable via a rename dance: the
//! current binary moves aside to `<path>.old` before the verified
//! replacement takes its place, because a running binary cannot be
//! overwritten in place on every platform.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{Error, Result};

/// Source of release assets, by name.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch one asset's bytes.
    async fn fetch_asset(&self, name: &str) -> Result<Vec<u8>>;
}

/// Release source fetching assets from a base URL.
pub struct HttpReleaseSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReleaseSource {
    /// Assets resolve as `<base_url>/<asset-name>`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch_asset(&self, name: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{name}", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Updater(format!("failed to download \"{name}\": {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Updater(format!(
                "failed to download \"{name}\": status {status}"
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Parse a checksums file: one `"<hex-hash>  <filename>"` entry per line.
/// Any other non-empty line makes the whole file invalid.
pub fn parse_checksums(content: &str) -> Result<HashMap<String, String>> {
    let mut sums = HashMap::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let Some((hash, filename)) = line.split_once("  ") else {
            return Err(Error::Updater(format!(
                "malformed checksums file at line {}",
                number + 1
            )));
        };
        let filename = filename.trim_start();
        if hash.is_empty()
            || filename.is_empty()
            || !hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::Updater(format!(
                "malformed checksums file at line {}",
                number + 1
            )));
        }
        sums.insert(filename.to_string(), hash.to_lowercase());
    }
    Ok(sums)
}

/// Download, verify and install a release over the executable at
/// `exe_path`.
///
/// Integrity failures are terminal: nothing is renamed until the asset's
/// digest matches its checksum entry.
pub async fn apply_update(
    source: &dyn ReleaseSource,
    exe_path: &Path,
    asset_name: &str,
    checksums_name: &str,
) -> Result<()> {
    let asset = source.fetch_asset(asset_name).await?;
    let checksums_raw = source.fetch_asset(checksums_name).await?;
    let checksums = parse_checksums(&String::from_utf8_lossy(&checksums_raw))?;

    let expected = checksums.get(asset_name).ok_or_else(|| {
        Error::Updater(format!("checksums file has no entry for \"{asset_name}\""))
    })?;
    let actual = hex::encode(Sha256::digest(&asset));
    if &actual != expected {
        return Err(Error::Updater(format!(
            "checksum mismatch for \"{asset_name}\": expected {expected}, got {actual}"
        )));
    }

    install(exe_path, &asset)?;
    info!(asset = %asset_name, path = %exe_path.display(), "Executable replaced");
    Ok(())
}

fn install(exe_path: &Path, bytes: &[u8]) -> Result<()> {
    let directory = exe_path.parent().unwrap_or_else(|| Path::new("."));

    let staged = staging_path(exe_path);
    std::fs::create_dir_all(directory)?;
    std::fs::write(&staged, bytes)?;
    set_executable(&staged)?;

    let old = exe_path.with_extension("old");
    if exe_path.exists() {
        std::fs::rename(exe_path, &old)?;
    }

    if let Err(replace_err) = std::fs::rename(&staged, exe_path) {
        warn!(error = %replace_err, "Failed to move replacement into place, restoring");
        let _ = std::fs::remove_file(&staged);
        if old.exists() && std::fs::rename(&old, exe_path).is_err() {
            return Err(Error::Updater(
                "failed to replace executable and could not restore old version".to_string(),
            ));
        }
        return Err(Error::Updater(format!(
            "failed to replace executable: {replace_err}"
        )));
    }
    Ok(())
}

fn staging_path(exe_path: &Path) -> PathBuf {
    let mut name = exe_path.file_name().map_or_else(
        || std::ffi::OsString::from("update"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".new");
    exe_path.with_file_name(name)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct MapSource {
        assets: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MapSource {
        fn new(entries: &[(&str, &[u8])]) -> Self {
            Self {
                assets: Mutex::new(
                    entries.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl ReleaseSource for MapSource {
        async fn fetch_asset(&self, name: &str) -> Result<Vec<u8>> {
            self.assets
                .lock()
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Updater(format!("failed to download \"{name}\": status 404")))
        }
    }

    fn digest(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    #[test]
    fn checksum_parsing() {
        let content = format!("{}  bridge-linux\n{}  bridge-macos\n", digest(b"a"), digest(b"b"));
        let sums = parse_checksums(&content).unwrap();
        assert_eq!(sums.len(), 2);
        assert_eq!(sums["bridge-linux"], digest(b"a"));
    }

    #[test]
    fn malformed_checksum_lines_are_rejected() {
        assert!(parse_checksums("not a checksum line").is_err());
        assert!(parse_checksums("zzzz  file").is_err());
        assert!(parse_checksums("deadbeef file-with-single-space").is_err());
        // blank lines are tolerated
        assert!(parse_checksums("\n\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_update_replaces_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("bridge");
        std::fs::write(&exe, b"old-binary").unwrap();

        let new_binary = b"new-binary".as_slice();
        let checksums = format!("{}  bridge-linux\n", digest(new_binary));
        let source =
            MapSource::new(&[("bridge-linux", new_binary), ("checksums.txt", checksums.as_bytes())]);

        apply_update(&source, &exe, "bridge-linux", "checksums.txt").await.unwrap();

        assert_eq!(std::fs::read(&exe).unwrap(), new_binary);
        assert_eq!(std::fs::read(exe.with_extension("old")).unwrap(), b"old-binary");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&exe).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn checksum_mismatch_never_renames() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("bridge");
        std::fs::write(&exe, b"old-binary").unwrap();

        let checksums = format!("{}  bridge-linux\n", digest(b"something else"));
        let source = MapSource::new(&[
            ("bridge-linux", b"new-binary".as_slice()),
            ("checksums.txt", checksums.as_bytes()),
        ]);

        let err = apply_update(&source, &exe, "bridge-linux", "checksums.txt").await.unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert_eq!(std::fs::read(&exe).unwrap(), b"old-binary");
        assert!(!exe.with_extension("old").exists());
    }

    #[tokio::test]
    async fn missing_checksum_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("bridge");
        let checksums = format!("{}  other-asset\n", digest(b"x"));
        let source = MapSource::new(&[
            ("bridge-linux", b"new-binary".as_slice()),
            ("checksums.txt", checksums.as_bytes()),
        ]);

        let err = apply_update(&source, &exe, "bridge-linux", "checksums.txt").await.unwrap_err();
        assert!(err.to_string().contains("no entry for"));
    }
}
