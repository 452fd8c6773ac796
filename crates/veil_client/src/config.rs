//! Policy knobs for the channel and engine.
//!
//! The retry/reconnect numbers are a documented, parameterized policy:
//! fixed delays, no exponential backoff or jitter. See DESIGN.md for the
//! open question on production-grade pacing.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Relay websocket URL, e.g. `ws://relay.example:8000/ws`.
    pub url: String,
    /// Delivery attempts for ordinary frames.
    pub send_attempts: u32,
    /// Delivery attempts for file chunks (larger frames fail more often).
    pub chunk_send_attempts: u32,
    /// Pause grows linearly: `retry_pause * (attempt + 1)`.
    pub retry_pause: Duration,
    /// Fixed delay before the single scheduled reconnect.
    pub reconnect_delay: Duration,
    /// Inbound frame buffer between the read task and the dispatcher.
    pub inbound_buffer: usize,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            send_attempts: 3,
            chunk_send_attempts: 5,
            retry_pause: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(3),
            inbound_buffer: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory where completed inbound file transfers are written.
    pub inbox_dir: PathBuf,
    /// Fixed pause between outbound file chunks. A placeholder for real
    /// flow control, not a protocol guarantee.
    pub chunk_pause: Duration,
    /// How often the background task purges expired statuses.
    pub status_purge_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from("."),
            chunk_pause: Duration::from_millis(80),
            status_purge_interval: Duration::from_secs(60),
        }
    }
}

/// Mime types a file send will accept: images, PDF, plain text.
pub fn mime_allowed(mime: &str) -> bool {
    mime.starts_with("image/") || mime == "application/pdf" || mime.starts_with("text/")
}
