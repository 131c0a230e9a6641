//! Shuttle - resolution cache and connection capture core for a
//! policy-routed proxy.
//!
//! This library exposes the expiry-ordered DNS cache and the per-connection
//! capture pipeline consumed by the proxy's connection layer.

pub mod cache;
pub mod capture;
pub mod config;
pub mod error;
pub mod policy;
pub mod resolver;
pub mod stats;

pub use cache::DnsCache;
pub use capture::CaptureRegistry;
pub use config::{CaptureConfig, Config, DnsConfig};
pub use error::{CacheError, CaptureError, ResolveError};
pub use resolver::{Answer, Resolve, SystemResolver};
