//! ASN resolution: lookup backends and composable admission/cache decorators.
//!
//! Every strategy implements [`AsnResolver`], so any decorator can wrap any
//! other. The active composition is selected by configuration via
//! [`build_resolver`]; nothing here hardwires a particular stack.

pub mod backend;
pub mod bloom_gate;
pub mod cache;
pub mod rate_limited;
pub mod sliding_window;
pub mod token_bucket;

use crate::config::{ResolverBackend, ResolverConfig, ResolverLayer};
use crate::error::ResolveError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// An autonomous system, as resolved for an IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asn {
    /// ASN number.
    pub number: u32,
    /// Operator name, when the backend provides one.
    pub organization: Option<String>,
}

impl Asn {
    /// Create an ASN with no operator name.
    pub fn new(number: u32) -> Self {
        Self {
            number,
            organization: None,
        }
    }

    /// Attach an operator name.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

impl std::fmt::Display for Asn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AS{}", self.number)
    }
}

/// Trait for ASN resolution strategies.
///
/// Implemented both by leaf backends and by decorators wrapping an inner
/// resolver. A resolve error is reported, never silently mapped to a cached
/// "unknown"; callers treat it as "reputation unknown, treat conservatively".
#[async_trait]
pub trait AsnResolver: Send + Sync {
    /// Resolve the ASN owning an IP address.
    async fn resolve(&self, ip: IpAddr) -> Result<Asn, ResolveError>;

    /// Strategy name for logging and metrics.
    fn name(&self) -> &str;
}

/// Periodic upkeep for resolver layers that accumulate expirable state.
pub trait Sweep: Send + Sync {
    /// Drop expired internal state.
    fn sweep(&self);
}

/// The assembled resolver composition plus the upkeep handles its layers
/// registered while being built.
pub struct ResolverStack {
    /// Outermost resolver of the composition.
    pub resolver: Arc<dyn AsnResolver>,
    maintainers: Vec<Arc<dyn Sweep>>,
}

impl ResolverStack {
    /// Sweep every layer that holds expirable state. Called by the
    /// maintenance loop.
    pub fn sweep(&self) {
        for maintainer in &self.maintainers {
            maintainer.sweep();
        }
    }
}

/// Assemble the configured resolver composition.
///
/// Layers are listed outermost-first in the config, so they are applied in
/// reverse around the backend. Layers with expirable state (caches, the
/// in-memory counter store) register themselves on the returned stack so
/// the maintenance loop can sweep them.
pub fn build_resolver(config: &ResolverConfig) -> anyhow::Result<ResolverStack> {
    let mut resolver: Arc<dyn AsnResolver> = match config.backend {
        ResolverBackend::Dns => Arc::new(backend::DnsAsnResolver::new()),
        ResolverBackend::Http => Arc::new(backend::HttpAsnResolver::new(config.http.clone())),
        ResolverBackend::Static => {
            Arc::new(backend::StaticAsnResolver::from_entries(&config.static_entries)?)
        }
    };

    let mut maintainers: Vec<Arc<dyn Sweep>> = Vec::new();

    for layer in config.layers.iter().rev() {
        resolver = match layer {
            ResolverLayer::Cache => {
                let layer = Arc::new(cache::CachingResolver::new(resolver, config.cache.clone()));
                maintainers.push(layer.clone());
                layer
            }
            ResolverLayer::BloomGate => {
                let layer = Arc::new(bloom_gate::BloomGateResolver::new(
                    resolver,
                    config.bloom_gate.clone(),
                ));
                maintainers.push(layer.clone());
                layer
            }
            ResolverLayer::RateLimit => Arc::new(rate_limited::RateLimitedResolver::new(
                resolver,
                config.rate_limit.clone(),
            )),
            ResolverLayer::TokenBucket => Arc::new(token_bucket::TokenBucketResolver::new(
                resolver,
                config.token_bucket.clone(),
            )),
            ResolverLayer::SlidingWindow => {
                let store = Arc::new(sliding_window::MemoryCounterStore::new());
                maintainers.push(store.clone());
                Arc::new(sliding_window::SlidingWindowResolver::new(
                    resolver,
                    store,
                    config.sliding_window.clone(),
                ))
            }
        };
    }

    Ok(ResolverStack {
        resolver,
        maintainers,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticAsnEntry;

    #[test]
    fn test_asn_display() {
        assert_eq!(Asn::new(15169).to_string(), "AS15169");
    }

    #[test]
    fn test_asn_builder() {
        let asn = Asn::new(13335).with_organization("CLOUDFLARENET");
        assert_eq!(asn.number, 13335);
        assert_eq!(asn.organization.as_deref(), Some("CLOUDFLARENET"));
    }

    #[tokio::test]
    async fn test_build_resolver_default_composition() {
        let config = ResolverConfig::default();
        let stack = build_resolver(&config).unwrap();
        // Outermost layer is the fixed-rate wrapper; only the cache below
        // it needs sweeping.
        assert_eq!(stack.resolver.name(), "rate-limited");
        assert_eq!(stack.maintainers.len(), 1);
    }

    #[tokio::test]
    async fn test_build_resolver_static_backend() {
        let config = ResolverConfig {
            backend: ResolverBackend::Static,
            layers: vec![],
            static_entries: vec![StaticAsnEntry {
                ip: "192.0.2.1".to_string(),
                asn: 64512,
                organization: Some("TEST-NET".to_string()),
            }],
            ..ResolverConfig::default()
        };

        let stack = build_resolver(&config).unwrap();
        assert_eq!(stack.resolver.name(), "static");
        assert!(stack.maintainers.is_empty());

        let asn = stack
            .resolver
            .resolve("192.0.2.1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(asn.number, 64512);
    }

    #[tokio::test]
    async fn test_build_resolver_full_stack() {
        let config = ResolverConfig {
            backend: ResolverBackend::Static,
            layers: vec![
                ResolverLayer::TokenBucket,
                ResolverLayer::SlidingWindow,
                ResolverLayer::BloomGate,
            ],
            static_entries: vec![StaticAsnEntry {
                ip: "192.0.2.1".to_string(),
                asn: 64512,
                organization: None,
            }],
            ..ResolverConfig::default()
        };

        let stack = build_resolver(&config).unwrap();
        assert_eq!(stack.resolver.name(), "token-bucket");
        // Counter store and gated cache both registered for sweeping.
        assert_eq!(stack.maintainers.len(), 2);

        let asn = stack
            .resolver
            .resolve("192.0.2.1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(asn.number, 64512);
    }

    #[tokio::test]
    async fn test_stack_registers_counter_store_and_cache() {
        let config = ResolverConfig {
            backend: ResolverBackend::Static,
            layers: vec![ResolverLayer::SlidingWindow, ResolverLayer::Cache],
            static_entries: vec![StaticAsnEntry {
                ip: "192.0.2.1".to_string(),
                asn: 64512,
                organization: None,
            }],
            ..ResolverConfig::default()
        };

        let stack = build_resolver(&config).unwrap();
        assert_eq!(stack.maintainers.len(), 2);
        stack.sweep();
    }
}
