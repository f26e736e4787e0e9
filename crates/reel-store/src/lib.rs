#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod fs;

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob path: {0}")]
    InvalidPath(String),
    #[error("transient storage error on {path}: {source}")]
    Transient {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// Blob storage seam for the engine.
///
/// Each worker owns its own backend handle; implementations must be safe to
/// clone across threads but handles returned from them are single-owner.
pub trait StorageBackend: Send + Sync {
    fn random_read(&self, path: &str) -> Result<Box<dyn RandomReadFile>, StoreError>;
    fn write(&self, path: &str) -> Result<Box<dyn WriteFile>, StoreError>;
}

/// Positioned reads over one blob.
pub trait RandomReadFile: Send {
    fn size(&mut self) -> Result<u64, StoreError>;
    fn read_exact_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<(), StoreError>;
}

/// Append-only writer for one blob; contents become visible on `save`.
pub trait WriteFile: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), StoreError>;
    fn save(self: Box<Self>) -> Result<(), StoreError>;
}

/// Exponential backoff policy for transient storage failures.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            multiplier: 2,
            max_delay: Duration::from_secs(5),
            max_attempts: 8,
        }
    }
}

impl Backoff {
    /// Runs `op`, retrying transient failures with exponentially growing
    /// sleeps until `max_attempts` is reached. Non-transient errors and the
    /// final transient error pass through.
    pub fn retry<T>(
        &self,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut delay = self.initial;
        let mut attempt = 1u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient storage error, backing off"
                    );
                    std::thread::sleep(delay);
                    delay = (delay * self.multiplier).min(self.max_delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub(crate) fn validate_blob_path(path: &str) -> Result<(), StoreError> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    if trimmed.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    if trimmed.contains('\\') {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}
