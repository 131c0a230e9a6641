//! Typed configuration for the resolution cache and the capture pipeline.

use std::path::PathBuf;
use std::time::Duration;

use crate::policy::DnsPolicy;

/// Time-to-live for cached answers.
pub const CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Capacity of each capture session's command queue.
pub const CAPTURE_QUEUE_CAPACITY: usize = 8;

/// Default directory for capture artifacts.
pub const CAPTURE_DIR: &str = "./temp";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub dns: DnsConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub cache_ttl: Duration,
    pub policy: DnsPolicy,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: CACHE_TTL,
            policy: DnsPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Directory where `{id}_request.txt` / `{id}_response.txt` are written.
    pub dir: PathBuf,
    pub queue_capacity: usize,
}

impl CaptureConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            queue_capacity: CAPTURE_QUEUE_CAPACITY,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new(CAPTURE_DIR)
    }
}
