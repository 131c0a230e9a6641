//! Domain resolution collaborator.
//!
//! The cache only ever calls a resolver on a miss. Anything that turns a
//! domain into an [`Answer`] synchronously can be plugged in: closures work
//! out of the box, and [`SystemResolver`] asks the operating system.

use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

use crate::error::ResolveError;

/// A resolved domain and the addresses it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub domain: String,
    pub addresses: Vec<IpAddr>,
}

impl Answer {
    pub fn new(domain: impl Into<String>, addresses: Vec<IpAddr>) -> Self {
        Self {
            domain: domain.into(),
            addresses,
        }
    }

    /// True if this answer was produced for `domain` (case-insensitive).
    pub fn matches(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }
}

/// Turns a domain into an [`Answer`].
pub trait Resolve: Send + Sync {
    fn resolve(&self, domain: &str) -> Result<Answer, ResolveError>;
}

impl<F> Resolve for F
where
    F: Fn(&str) -> Result<Answer, ResolveError> + Send + Sync,
{
    fn resolve(&self, domain: &str) -> Result<Answer, ResolveError> {
        self(domain)
    }
}

/// Resolver backed by the operating system's lookup (blocking).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, domain: &str) -> Result<Answer, ResolveError> {
        let resolved = (domain, 0)
            .to_socket_addrs()
            .map_err(|source| ResolveError::Lookup {
                domain: domain.to_string(),
                source,
            })?;

        let mut addresses: Vec<IpAddr> = Vec::new();
        for addr in resolved {
            if !addresses.contains(&addr.ip()) {
                addresses.push(addr.ip());
            }
        }
        if addresses.is_empty() {
            return Err(ResolveError::NoAddresses(domain.to_string()));
        }

        debug!(domain, count = addresses.len(), "resolved via system resolver");
        Ok(Answer::new(domain, addresses))
    }
}
