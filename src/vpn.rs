//! Multi-factor VPN/proxy detection.
//!
//! Five independent signals are counted against a configurable threshold:
//! known-VPN ranges, known-VPN ASNs, datacenter ranges, reverse-DNS naming,
//! and a pluggable connection-pattern heuristic. The orchestrating check
//! also feeds its verdict back into the reputation tracker, so ASNs that
//! keep getting flagged eventually trip the low-trust threshold on their
//! own even when the per-request signals look clean.

use crate::config::VpnConfig;
use crate::error::ResolveError;
use crate::reputation::ReputationTracker;
use crate::resolver::{Asn, AsnResolver};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use ipnet::IpNet;
use regex::Regex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reverse-DNS lookup boundary, consumed only by the hostname signal.
#[async_trait]
pub trait ReverseDns: Send + Sync {
    /// Look up the PTR hostname for an address.
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<String, ResolveError>;
}

/// Reverse DNS via the system resolver.
pub struct HickoryReverseDns {
    resolver: TokioAsyncResolver,
}

impl Default for HickoryReverseDns {
    fn default() -> Self {
        Self::new()
    }
}

impl HickoryReverseDns {
    /// Create a resolver using default DNS configuration. The underlying
    /// resolver is built once and reused across lookups.
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

#[async_trait]
impl ReverseDns for HickoryReverseDns {
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<String, ResolveError> {
        let response = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| ResolveError::Lookup(e.to_string()))?;

        response
            .iter()
            .next()
            .map(|name| name.to_utf8())
            .ok_or_else(|| ResolveError::Lookup(format!("no PTR record for {}", ip)))
    }
}

/// Connection-pattern heuristic extension point.
///
/// Kept as a fifth factor so operator threshold calibration carries over
/// once a real heuristic lands; the default implementation reports nothing.
pub trait ConnectionPatternHeuristic: Send + Sync {
    /// Whether the address shows an abnormal connection pattern.
    fn is_abnormal(&self, ip: IpAddr) -> bool;
}

/// Default heuristic: no signal.
pub struct NoConnectionPattern;

impl ConnectionPatternHeuristic for NoConnectionPattern {
    fn is_abnormal(&self, _ip: IpAddr) -> bool {
        false
    }
}

/// Multi-factor VPN/proxy detector.
pub struct VpnDetector {
    vpn_ranges: Vec<IpNet>,
    vpn_asns: HashSet<u32>,
    datacenter_ranges: Vec<IpNet>,
    hostname_pattern: Regex,
    min_factors: u32,
    low_trust_threshold: f64,
    resolver: Arc<dyn AsnResolver>,
    reverse_dns: Arc<dyn ReverseDns>,
    reputation: Arc<ReputationTracker>,
    pattern_heuristic: Arc<dyn ConnectionPatternHeuristic>,
}

fn parse_ranges(entries: &[String]) -> Vec<IpNet> {
    entries
        .iter()
        .filter_map(|s| {
            if let Ok(net) = s.parse::<IpNet>() {
                Some(net)
            } else if let Ok(ip) = s.parse::<IpAddr>() {
                IpNet::new(ip, if ip.is_ipv4() { 32 } else { 128 }).ok()
            } else {
                None
            }
        })
        .collect()
}

impl VpnDetector {
    /// Create a detector from configuration and collaborators.
    pub fn new(
        config: &VpnConfig,
        low_trust_threshold: f64,
        resolver: Arc<dyn AsnResolver>,
        reverse_dns: Arc<dyn ReverseDns>,
        reputation: Arc<ReputationTracker>,
    ) -> anyhow::Result<Self> {
        let hostname_pattern = Regex::new(&config.hostname_pattern)
            .map_err(|e| anyhow::anyhow!("Invalid vpn.hostname_pattern: {}", e))?;

        Ok(Self {
            vpn_ranges: parse_ranges(&config.vpn_ranges),
            vpn_asns: config.vpn_asns.iter().copied().collect(),
            datacenter_ranges: parse_ranges(&config.datacenter_ranges),
            hostname_pattern,
            min_factors: config.min_factors,
            low_trust_threshold,
            resolver,
            reverse_dns,
            reputation,
            pattern_heuristic: Arc::new(NoConnectionPattern),
        })
    }

    /// Replace the reverse-DNS lookup implementation.
    pub fn with_reverse_dns(mut self, reverse_dns: Arc<dyn ReverseDns>) -> Self {
        self.reverse_dns = reverse_dns;
        self
    }

    /// Replace the connection-pattern heuristic.
    pub fn with_pattern_heuristic(
        mut self,
        heuristic: Arc<dyn ConnectionPatternHeuristic>,
    ) -> Self {
        self.pattern_heuristic = heuristic;
        self
    }

    /// Multi-factor verdict: true iff at least `min_factors` signals fire.
    pub async fn is_likely_vpn(&self, ip: IpAddr, asn: &Asn) -> bool {
        let mut factors = 0u32;

        if self.vpn_ranges.iter().any(|net| net.contains(&ip)) {
            debug!(ip = %ip, "Signal: known VPN range");
            factors += 1;
        }

        if self.vpn_asns.contains(&asn.number) {
            debug!(ip = %ip, asn = %asn, "Signal: known VPN ASN");
            factors += 1;
        }

        if self.datacenter_ranges.iter().any(|net| net.contains(&ip)) {
            debug!(ip = %ip, "Signal: datacenter range");
            factors += 1;
        }

        match self.reverse_dns.reverse_lookup(ip).await {
            Ok(hostname) => {
                if self.hostname_pattern.is_match(&hostname) {
                    debug!(ip = %ip, hostname = %hostname, "Signal: hostname pattern");
                    factors += 1;
                }
            }
            Err(e) => {
                debug!(ip = %ip, error = %e, "Reverse DNS unavailable, signal skipped");
            }
        }

        if self.pattern_heuristic.is_abnormal(ip) {
            debug!(ip = %ip, "Signal: abnormal connection pattern");
            factors += 1;
        }

        factors >= self.min_factors
    }

    /// Full detection flow: resolve the ASN, compute the multi-factor
    /// verdict, record it as reputation evidence, then combine with the
    /// ASN's accumulated trust.
    ///
    /// Resolution failure is surfaced so the caller can choose its failure
    /// policy. No reputation evidence is recorded for unknown ASNs.
    pub async fn assess(&self, ip: IpAddr) -> Result<bool, ResolveError> {
        let asn = self.resolver.resolve(ip).await?;

        let verdict = self.is_likely_vpn(ip, &asn).await;
        self.reputation.record_activity(asn.number, verdict);

        let score = self.reputation.score(asn.number);
        let low_trust = score < self.low_trust_threshold;

        if verdict || low_trust {
            debug!(
                ip = %ip,
                asn = %asn,
                verdict,
                score,
                "VPN connection detected"
            );
        }

        Ok(verdict || low_trust)
    }

    /// Like [`assess`](Self::assess), treating resolution failure as
    /// "unknown", which never flags as VPN.
    pub async fn is_vpn_connection(&self, ip: IpAddr) -> bool {
        match self.assess(ip).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(ip = %ip, error = %e, "ASN resolution failed, treating as unknown");
                false
            }
        }
    }
}
