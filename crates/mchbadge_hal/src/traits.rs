use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("serial I/O error: {0}")]
    Io(String),
    #[error("link closed by peer")]
    Closed,
    #[error("timeout")]
    Timeout,
}

/// Blocking byte channel to the badge.
///
/// Every call completes (or times out) before returning; there is no
/// background I/O and no cancellation.
pub trait SerialLink: Send {
    /// Send the exact byte sequence. Any failure is fatal for the caller.
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Accumulate input until `pattern` has been seen or `timeout` elapses.
    ///
    /// On success the returned bytes end with `pattern`. On timeout whatever
    /// arrived is returned without the pattern; callers decide whether that
    /// is an error.
    fn read_until(&mut self, pattern: &[u8], timeout: Duration) -> Result<Vec<u8>, LinkError>;

    /// Read at most `max_bytes`, bounded by the per-read timeout. May return
    /// an empty buffer.
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, LinkError>;

    /// Human-readable endpoint name for log lines.
    fn endpoint(&self) -> &str {
        "<link>"
    }
}

impl SerialLink for Box<dyn SerialLink> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        (**self).write(bytes)
    }
    fn read_until(&mut self, pattern: &[u8], timeout: Duration) -> Result<Vec<u8>, LinkError> {
        (**self).read_until(pattern, timeout)
    }
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, LinkError> {
        (**self).read(max_bytes)
    }
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

/// Position just past the first occurrence of `pattern` in `haystack`.
pub fn find_end(haystack: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() {
        return Some(0);
    }
    haystack
        .windows(pattern.len())
        .position(|w| w == pattern)
        .map(|pos| pos + pattern.len())
}
