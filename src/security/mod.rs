//! Security modules for the bridge.
//!
//! Provides the SSRF-safe dialer every outbound client is built through.

pub mod safenet;

pub use safenet::{DialPolicy, SafeDialer};
