//! Configuration for the resource server.
//!
//! # Example
//!
//! ```
//! use resource_engine::ServerConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ServerConfig::default();
//! assert_eq!(config.heartbeat_secs, 5);
//!
//! // Full config
//! let config = ServerConfig {
//!     listen_addr: "127.0.0.1:8080".into(),
//!     subscriber_buffer: 256,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the resource server.
///
/// All fields have sensible defaults; an embedding process typically only
/// sets `listen_addr` and `hostname`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (e.g. "127.0.0.1:8080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Hostname advertised by the debug endpoint
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Seconds of stream silence before a heartbeat event is emitted
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Per-subscriber event buffer; overflow kills the subscription
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Debounce window for full-stream re-emission during event bursts
    #[serde(default = "default_stream_debounce_ms")]
    pub stream_debounce_ms: u64,

    /// Maximum accepted request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_hostname() -> String {
    "localhost".to_string()
}
fn default_heartbeat_secs() -> u64 {
    5
}
fn default_subscriber_buffer() -> usize {
    128
}
fn default_stream_debounce_ms() -> u64 {
    100
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            hostname: default_hostname(),
            heartbeat_secs: default_heartbeat_secs(),
            subscriber_buffer: default_subscriber_buffer(),
            stream_debounce_ms: default_stream_debounce_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
