//! Risk engine orchestration.
//!
//! Wires the resolver stack, reputation tracker, VPN detector, rate
//! limiter, login throttle, replay store, and challenge manager into one
//! facade. The per-request flow is allowlist, then admission, then VPN
//! detection; the remaining components are exposed for the authentication
//! paths and the maintenance tasks.

use crate::challenge::ChallengeManager;
use crate::config::{AllowlistEntry, Config, FailAction, RiskAction};
use crate::jti::JtiStore;
use crate::login::LoginThrottle;
use crate::ratelimit::OriginRateLimiter;
use crate::reputation::ReputationTracker;
use crate::resolver::{build_resolver, AsnResolver, ResolverStack};
use crate::sink::{
    AuditEvent, AuditSink, LogAuditSink, LogNotificationSink, NotificationSink, SecurityAlert,
    Severity,
};
use crate::vpn::{HickoryReverseDns, VpnDetector};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a request check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    /// The request proceeds unmarked.
    Allow,
    /// The request proceeds, marked for downstream handling.
    Flag { reason: String },
    /// The request is refused.
    Block { reason: String },
}

impl RiskDecision {
    /// Whether the request is refused.
    pub fn is_blocked(&self) -> bool {
        matches!(self, RiskDecision::Block { .. })
    }

    /// Alert severity matching the decision.
    pub fn severity(&self) -> Severity {
        match self {
            RiskDecision::Allow | RiskDecision::Flag { .. } => Severity::Info,
            RiskDecision::Block { .. } => Severity::Warning,
        }
    }

    /// Short outcome label for audit records.
    pub fn outcome(&self) -> &'static str {
        match self {
            RiskDecision::Allow => "allow",
            RiskDecision::Flag { .. } => "flag",
            RiskDecision::Block { .. } => "block",
        }
    }
}

/// The orchestrating risk engine.
pub struct RiskEngine {
    config: Config,
    allowlist: Vec<AllowlistEntry>,
    resolver_stack: ResolverStack,
    reputation: Arc<ReputationTracker>,
    vpn: VpnDetector,
    rate_limiter: OriginRateLimiter,
    login: LoginThrottle,
    jti: JtiStore,
    challenges: ChallengeManager,
    notifications: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
}

impl RiskEngine {
    /// Build an engine from validated configuration.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let allowlist = config.parse_allowlist();
        let resolver_stack = build_resolver(&config.resolver)?;
        let resolver = resolver_stack.resolver.clone();
        let reputation = Arc::new(ReputationTracker::new(&config.reputation));

        let vpn = VpnDetector::new(
            &config.vpn,
            config.reputation.low_trust_threshold,
            resolver.clone(),
            Arc::new(HickoryReverseDns::new()),
            reputation.clone(),
        )?;

        let rate_limiter = OriginRateLimiter::new(&config.rate_limit);
        let login = LoginThrottle::new(&config.login);
        let jti = JtiStore::new(&config.jti);
        let challenges = ChallengeManager::new(&config.challenge);

        info!(
            resolver = resolver.name(),
            allowlist_entries = allowlist.len(),
            "Risk engine initialized"
        );

        Ok(Self {
            config,
            allowlist,
            resolver_stack,
            reputation,
            vpn,
            rate_limiter,
            login,
            jti,
            challenges,
            notifications: Arc::new(LogNotificationSink),
            audit: Arc::new(LogAuditSink),
        })
    }

    /// Replace the reverse-DNS lookup used by VPN detection.
    pub fn with_reverse_dns(mut self, reverse_dns: Arc<dyn crate::vpn::ReverseDns>) -> Self {
        self.vpn = self.vpn.with_reverse_dns(reverse_dns);
        self
    }

    /// Replace the notification sink.
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    /// Replace the audit sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    fn is_allowlisted(&self, ip: &IpAddr) -> bool {
        self.allowlist.iter().any(|entry| entry.contains(ip))
    }

    /// Check one inbound request.
    ///
    /// Allowlisted origins skip every gate. Otherwise the origin must pass
    /// admission first; VPN detection then decides between allow, flag, and
    /// block per the configured action.
    pub async fn check_request(&self, ip: IpAddr) -> RiskDecision {
        if !self.config.settings.enabled {
            debug!("Risk engine disabled globally");
            return RiskDecision::Allow;
        }

        if self.is_allowlisted(&ip) {
            debug!(ip = %ip, "Origin is allowlisted");
            return RiskDecision::Allow;
        }

        if !self.rate_limiter.check(ip).await {
            let decision = RiskDecision::Block {
                reason: "rate limit exceeded".to_string(),
            };
            self.report(&ip, &decision, "rate_limit_exceeded").await;
            return decision;
        }

        let verdict = match self.vpn.assess(ip).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(ip = %ip, error = %e, "ASN resolution failed during request check");
                let decision = match self.config.settings.fail_action {
                    FailAction::Allow => RiskDecision::Allow,
                    FailAction::Block => RiskDecision::Block {
                        reason: "resolution failed".to_string(),
                    },
                };
                if decision.is_blocked() {
                    self.report(&ip, &decision, "resolution_failed").await;
                }
                return decision;
            }
        };

        let decision = if verdict {
            match self.config.vpn.action {
                RiskAction::Block => RiskDecision::Block {
                    reason: "vpn detected".to_string(),
                },
                RiskAction::Flag => RiskDecision::Flag {
                    reason: "vpn detected".to_string(),
                },
            }
        } else {
            RiskDecision::Allow
        };

        match &decision {
            RiskDecision::Allow => {
                if self.config.settings.log_allowed {
                    debug!(ip = %ip, "Allowing request");
                }
            }
            RiskDecision::Flag { .. } | RiskDecision::Block { .. } => {
                self.report(&ip, &decision, "vpn_detected").await;
            }
        }

        decision
    }

    async fn report(&self, ip: &IpAddr, decision: &RiskDecision, kind: &str) {
        if decision.is_blocked() && self.config.settings.log_blocked {
            info!(ip = %ip, kind = %kind, "Blocking request");
        }

        let subject = ip.to_string();
        self.notifications
            .notify(
                &SecurityAlert::new(kind, decision.severity(), &subject)
                    .with_metadata("decision", decision.outcome()),
            )
            .await;
        self.audit
            .record(&AuditEvent::new("check_request", &subject, decision.outcome()))
            .await;
    }

    /// The configured ASN resolver stack.
    pub fn resolver(&self) -> &Arc<dyn AsnResolver> {
        &self.resolver_stack.resolver
    }

    /// Sweep expirable resolver-layer state (caches, window counters).
    /// Called by the maintenance sweep.
    pub fn sweep_resolver(&self) {
        self.resolver_stack.sweep();
    }

    /// The shared reputation tracker.
    pub fn reputation(&self) -> &Arc<ReputationTracker> {
        &self.reputation
    }

    /// The per-origin rate limiter.
    pub fn rate_limiter(&self) -> &OriginRateLimiter {
        &self.rate_limiter
    }

    /// The login throttle.
    pub fn login(&self) -> &LoginThrottle {
        &self.login
    }

    /// The token replay store.
    pub fn jti(&self) -> &JtiStore {
        &self.jti
    }

    /// The challenge manager.
    pub fn challenges(&self) -> &ChallengeManager {
        &self.challenges
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResolverBackend, ResolverLayer, StaticAsnEntry};
    use std::sync::Mutex;

    /// Config with a static resolver so no test touches the network.
    fn test_config() -> Config {
        let mut config = Config::default();
        config.resolver.backend = ResolverBackend::Static;
        config.resolver.layers = vec![ResolverLayer::Cache];
        config.resolver.static_entries = vec![
            StaticAsnEntry {
                ip: "192.0.2.1".to_string(),
                asn: 65000,
                organization: None,
            },
            StaticAsnEntry {
                ip: "198.51.100.7".to_string(),
                asn: 64512,
                organization: None,
            },
        ];
        config.vpn.vpn_asns = vec![64512];
        config.vpn.vpn_ranges = vec!["198.51.100.0/24".to_string()];
        config
    }

    struct NoPtr;

    #[async_trait::async_trait]
    impl crate::vpn::ReverseDns for NoPtr {
        async fn reverse_lookup(
            &self,
            ip: IpAddr,
        ) -> Result<String, crate::error::ResolveError> {
            Err(crate::error::ResolveError::Lookup(format!(
                "no PTR record for {}",
                ip
            )))
        }
    }

    fn engine(config: Config) -> RiskEngine {
        RiskEngine::new(config)
            .unwrap()
            .with_reverse_dns(Arc::new(NoPtr))
    }

    struct RecordingSink {
        alerts: Mutex<Vec<SecurityAlert>>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, alert: &SecurityAlert) {
            self.alerts.lock().unwrap().push(alert.clone());
        }
    }

    #[tokio::test]
    async fn test_disabled_engine_allows_everything() {
        let mut config = test_config();
        config.settings.enabled = false;
        let engine = engine(config);

        let decision = engine.check_request("198.51.100.7".parse().unwrap()).await;
        assert_eq!(decision, RiskDecision::Allow);
    }

    #[tokio::test]
    async fn test_allowlisted_origin_skips_checks() {
        let mut config = test_config();
        config.allowlist = vec!["198.51.100.0/24".to_string()];
        let engine = engine(config);

        // This address would otherwise be flagged as VPN.
        let decision = engine.check_request("198.51.100.7".parse().unwrap()).await;
        assert_eq!(decision, RiskDecision::Allow);
    }

    #[tokio::test]
    async fn test_clean_origin_allowed() {
        let engine = engine(test_config());
        let decision = engine.check_request("192.0.2.1".parse().unwrap()).await;
        assert_eq!(decision, RiskDecision::Allow);
    }

    #[tokio::test]
    async fn test_vpn_origin_flagged_by_default() {
        let engine = engine(test_config());
        let decision = engine.check_request("198.51.100.7".parse().unwrap()).await;
        assert_eq!(
            decision,
            RiskDecision::Flag {
                reason: "vpn detected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_vpn_origin_blocked_when_configured() {
        let mut config = test_config();
        config.vpn.action = RiskAction::Block;
        let engine = engine(config);

        let decision = engine.check_request("198.51.100.7".parse().unwrap()).await;
        assert!(decision.is_blocked());
    }

    #[tokio::test]
    async fn test_resolution_failure_fail_open() {
        // An address absent from the static table fails resolution.
        let engine = engine(test_config());
        let decision = engine.check_request("203.0.113.9".parse().unwrap()).await;
        assert_eq!(decision, RiskDecision::Allow);
    }

    #[tokio::test]
    async fn test_resolution_failure_fail_closed() {
        let mut config = test_config();
        config.settings.fail_action = FailAction::Block;
        let engine = engine(config);

        let decision = engine.check_request("203.0.113.9".parse().unwrap()).await;
        assert_eq!(
            decision,
            RiskDecision::Block {
                reason: "resolution failed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_burst_cap_blocks() {
        let mut config = test_config();
        config.rate_limit.burst_per_minute = 2;
        config.rate_limit.requests_per_second = 1000;
        let engine = engine(config);

        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(engine.check_request(ip).await, RiskDecision::Allow);
        assert_eq!(engine.check_request(ip).await, RiskDecision::Allow);
        assert!(engine.check_request(ip).await.is_blocked());
    }

    #[tokio::test]
    async fn test_block_raises_alert() {
        let mut config = test_config();
        config.vpn.action = RiskAction::Block;
        let sink = Arc::new(RecordingSink {
            alerts: Mutex::new(Vec::new()),
        });
        let engine = engine(config).with_notification_sink(sink.clone());

        engine.check_request("198.51.100.7".parse().unwrap()).await;

        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "vpn_detected");
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].subject, "198.51.100.7");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.resolver.layers = vec![ResolverLayer::Cache, ResolverLayer::BloomGate];
        assert!(RiskEngine::new(config).is_err());
    }

    #[tokio::test]
    async fn test_component_accessors_are_wired() {
        let engine = engine(test_config());

        engine.login().record_failure("alice");
        assert!(engine.login().wait_if_required("alice").is_err());

        engine
            .jti()
            .store("jti-1", std::time::Duration::from_secs(60));
        assert!(engine.jti().is_valid("jti-1"));

        let token = engine.challenges().generate("alice");
        assert_eq!(engine.challenges().validate(&token).unwrap(), "alice");

        engine.check_request("192.0.2.1".parse().unwrap()).await;
        assert_eq!(engine.reputation().score(65000), 1.0);
    }
}
