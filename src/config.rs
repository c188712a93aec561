//! Configuration types for the risk engine.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Root configuration for the risk engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// ASN resolver backend and decorator composition.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// ASN reputation tracking.
    #[serde(default)]
    pub reputation: ReputationConfig,

    /// VPN/proxy detection.
    #[serde(default)]
    pub vpn: VpnConfig,

    /// Per-origin request rate limiting.
    #[serde(default)]
    pub rate_limit: OriginRateLimitConfig,

    /// Login attempt throttling.
    #[serde(default)]
    pub login: LoginConfig,

    /// Token identifier replay prevention.
    #[serde(default)]
    pub jti: JtiConfig,

    /// Second-factor challenge issuance.
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// IP allowlist (always allowed, skips all checks).
    #[serde(default)]
    pub allowlist: Vec<String>,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Master enable/disable switch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Action when ASN resolution fails during a request check.
    #[serde(default)]
    pub fail_action: FailAction,

    /// Log blocked requests.
    #[serde(default = "default_true")]
    pub log_blocked: bool,

    /// Log allowed requests.
    #[serde(default)]
    pub log_allowed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_action: FailAction::default(),
            log_blocked: true,
            log_allowed: false,
        }
    }
}

/// Action to take when resolution fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailAction {
    /// Allow the request when resolution fails (fail-open).
    #[default]
    Allow,
    /// Block the request when resolution fails (fail-closed).
    Block,
}

/// Action to take when a detector matches.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskAction {
    /// Block the request.
    Block,
    /// Flag the request but allow.
    #[default]
    Flag,
}

/// ASN resolver composition.
///
/// `layers` are applied outermost-first around the selected backend. At most
/// one caching layer (`cache` or `bloom_gate`) may be active per deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Leaf lookup backend.
    #[serde(default)]
    pub backend: ResolverBackend,

    /// Decorator stack, outermost first.
    #[serde(default = "default_resolver_layers")]
    pub layers: Vec<ResolverLayer>,

    /// Remote HTTP API backend settings.
    #[serde(default)]
    pub http: HttpBackendConfig,

    /// Static lookup table, used by the `static` backend.
    #[serde(default)]
    pub static_entries: Vec<StaticAsnEntry>,

    /// Plain bounded cache settings.
    #[serde(default)]
    pub cache: ResolutionCacheConfig,

    /// Probabilistic-gate cache settings.
    #[serde(default)]
    pub bloom_gate: BloomGateConfig,

    /// Fixed-rate admission settings.
    #[serde(default)]
    pub rate_limit: FixedRateConfig,

    /// Token-bucket admission settings.
    #[serde(default)]
    pub token_bucket: TokenBucketConfig,

    /// Sliding-window admission settings.
    #[serde(default)]
    pub sliding_window: SlidingWindowConfig,

    /// How often expired cache entries and window counters are swept, in
    /// seconds.
    #[serde(default = "default_window_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backend: ResolverBackend::default(),
            layers: default_resolver_layers(),
            http: HttpBackendConfig::default(),
            static_entries: Vec::new(),
            cache: ResolutionCacheConfig::default(),
            bloom_gate: BloomGateConfig::default(),
            rate_limit: FixedRateConfig::default(),
            token_bucket: TokenBucketConfig::default(),
            sliding_window: SlidingWindowConfig::default(),
            sweep_interval_seconds: default_window_seconds(),
        }
    }
}

fn default_resolver_layers() -> Vec<ResolverLayer> {
    vec![ResolverLayer::RateLimit, ResolverLayer::Cache]
}

/// Leaf ASN lookup backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolverBackend {
    /// DNS-based query (Team Cymru origin zones).
    #[default]
    Dns,
    /// Remote JSON API.
    Http,
    /// Fixed in-memory table.
    Static,
}

/// Resolver decorator kinds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolverLayer {
    /// Plain bounded cache with single-flight load-on-miss.
    Cache,
    /// Bloom-filter-gated cache.
    BloomGate,
    /// Fixed-rate admission.
    RateLimit,
    /// Token-bucket admission.
    TokenBucket,
    /// Sliding-window admission over a shared counter store.
    SlidingWindow,
}

impl ResolverLayer {
    /// Whether this layer memoizes resolution results.
    pub fn is_caching(self) -> bool {
        matches!(self, ResolverLayer::Cache | ResolverLayer::BloomGate)
    }
}

/// Remote HTTP API backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpBackendConfig {
    /// URL template; `{ip}` is replaced with the address being resolved.
    #[serde(default = "default_http_url")]
    pub url: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            url: default_http_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

fn default_http_url() -> String {
    "https://api.iptoasn.com/v1/as/ip/{ip}".to_string()
}

fn default_http_timeout_ms() -> u64 {
    5000
}

/// One entry of the static ASN lookup table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticAsnEntry {
    /// IP address.
    pub ip: String,
    /// ASN number.
    pub asn: u32,
    /// Operator name, if known.
    #[serde(default)]
    pub organization: Option<String>,
}

/// Plain bounded cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolutionCacheConfig {
    /// Maximum number of cached entries.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Entry TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for ResolutionCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_cache_ttl() -> u64 {
    3600
}

/// Probabilistic-gate cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BloomGateConfig {
    /// Expected number of distinct keys, for filter sizing.
    #[serde(default = "default_bloom_expected")]
    pub expected_entries: usize,

    /// Target false-positive rate.
    #[serde(default = "default_bloom_fp_rate")]
    pub false_positive_rate: f64,

    /// Backing cache settings.
    #[serde(default)]
    pub cache: ResolutionCacheConfig,
}

impl Default for BloomGateConfig {
    fn default() -> Self {
        Self {
            expected_entries: default_bloom_expected(),
            false_positive_rate: default_bloom_fp_rate(),
            cache: ResolutionCacheConfig::default(),
        }
    }
}

fn default_bloom_expected() -> usize {
    100_000
}

fn default_bloom_fp_rate() -> f64 {
    0.01
}

/// Fixed-rate admission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixedRateConfig {
    /// Permits per second.
    #[serde(default = "default_resolver_rps")]
    pub permits_per_second: u32,
}

impl Default for FixedRateConfig {
    fn default() -> Self {
        Self {
            permits_per_second: default_resolver_rps(),
        }
    }
}

fn default_resolver_rps() -> u32 {
    10
}

/// Token-bucket admission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenBucketConfig {
    /// Bucket capacity.
    #[serde(default = "default_bucket_capacity")]
    pub capacity: u32,

    /// Tokens refilled per second.
    #[serde(default = "default_resolver_rps")]
    pub refill_per_second: u32,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: default_bucket_capacity(),
            refill_per_second: default_resolver_rps(),
        }
    }
}

fn default_bucket_capacity() -> u32 {
    100
}

/// Sliding-window admission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlidingWindowConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Maximum requests per window.
    #[serde(default = "default_window_max")]
    pub max_requests: u64,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_requests: default_window_max(),
        }
    }
}

fn default_window_seconds() -> u64 {
    60
}

fn default_window_max() -> u64 {
    100
}

/// ASN reputation tracking settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReputationConfig {
    /// How often decay runs, in seconds.
    #[serde(default = "default_decay_interval")]
    pub decay_interval_seconds: u64,

    /// Multiplier applied to stale counters on decay.
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Entries untouched for longer than this are decayed, in seconds.
    #[serde(default = "default_staleness")]
    pub staleness_seconds: u64,

    /// Scores below this mark an ASN as low-trust.
    #[serde(default = "default_low_trust")]
    pub low_trust_threshold: f64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            decay_interval_seconds: default_decay_interval(),
            decay_factor: default_decay_factor(),
            staleness_seconds: default_staleness(),
            low_trust_threshold: default_low_trust(),
        }
    }
}

fn default_decay_interval() -> u64 {
    86_400
}

fn default_decay_factor() -> f64 {
    0.9
}

fn default_staleness() -> u64 {
    30 * 86_400
}

fn default_low_trust() -> f64 {
    0.3
}

/// VPN/proxy detection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VpnConfig {
    /// Minimum number of true signals for a VPN verdict.
    #[serde(default = "default_min_factors")]
    pub min_factors: u32,

    /// Known VPN CIDR ranges.
    #[serde(default)]
    pub vpn_ranges: Vec<String>,

    /// Known VPN autonomous systems.
    #[serde(default)]
    pub vpn_asns: Vec<u32>,

    /// Known datacenter CIDR ranges.
    #[serde(default)]
    pub datacenter_ranges: Vec<String>,

    /// Regex matched against reverse-DNS hostnames.
    #[serde(default = "default_hostname_pattern")]
    pub hostname_pattern: String,

    /// Action for detected VPN connections.
    #[serde(default)]
    pub action: RiskAction,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            min_factors: default_min_factors(),
            vpn_ranges: Vec::new(),
            vpn_asns: Vec::new(),
            datacenter_ranges: Vec::new(),
            hostname_pattern: default_hostname_pattern(),
            action: RiskAction::default(),
        }
    }
}

fn default_min_factors() -> u32 {
    2
}

fn default_hostname_pattern() -> String {
    r"(?i)(vpn|proxy|tor|exit|relay|hosting)".to_string()
}

/// Per-origin request rate limiting settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginRateLimitConfig {
    /// Continuous permits per second per origin.
    #[serde(default = "default_resolver_rps")]
    pub requests_per_second: u32,

    /// Maximum wait for a continuous permit, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Hard burst cap per fixed one-minute window.
    #[serde(default = "default_burst_per_minute")]
    pub burst_per_minute: u32,

    /// How often stale burst counters are swept, in seconds.
    #[serde(default = "default_window_seconds")]
    pub sweep_interval_seconds: u64,

    /// Burst entries idle for longer than this are swept, in seconds.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_seconds: u64,
}

impl Default for OriginRateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_resolver_rps(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            burst_per_minute: default_burst_per_minute(),
            sweep_interval_seconds: default_window_seconds(),
            idle_ttl_seconds: default_idle_ttl(),
        }
    }
}

fn default_acquire_timeout_ms() -> u64 {
    100
}

fn default_burst_per_minute() -> u32 {
    100
}

fn default_idle_ttl() -> u64 {
    300
}

/// Login attempt throttling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginConfig {
    /// Failure count at which a principal is considered blocked.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempt state TTL in seconds (implicit amnesty).
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,

    /// How often expired attempt state is swept, in seconds.
    #[serde(default = "default_idle_ttl")]
    pub sweep_interval_seconds: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            ttl_seconds: default_cache_ttl(),
            sweep_interval_seconds: default_idle_ttl(),
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

/// Token identifier replay prevention settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JtiConfig {
    /// Expected number of issued identifiers, for filter sizing.
    #[serde(default = "default_jti_expected")]
    pub expected_tokens: usize,

    /// Target false-positive rate for the membership filter.
    #[serde(default = "default_bloom_fp_rate")]
    pub false_positive_rate: f64,

    /// How often expired identifiers are purged, in seconds.
    #[serde(default = "default_window_seconds")]
    pub purge_interval_seconds: u64,
}

impl Default for JtiConfig {
    fn default() -> Self {
        Self {
            expected_tokens: default_jti_expected(),
            false_positive_rate: default_bloom_fp_rate(),
            purge_interval_seconds: default_window_seconds(),
        }
    }
}

fn default_jti_expected() -> usize {
    1_000_000
}

/// Second-factor challenge settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChallengeConfig {
    /// Unconsumed challenges expire after this many seconds.
    #[serde(default = "default_challenge_timeout")]
    pub timeout_seconds: u64,

    /// How often expired challenges are swept, in seconds.
    #[serde(default = "default_window_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_challenge_timeout(),
            sweep_interval_seconds: default_window_seconds(),
        }
    }
}

fn default_challenge_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let caching_layers = self
            .resolver
            .layers
            .iter()
            .filter(|l| l.is_caching())
            .count();
        if caching_layers > 1 {
            anyhow::bail!(
                "resolver.layers must contain at most one caching layer (cache or bloom_gate)"
            );
        }

        if self.resolver.backend == ResolverBackend::Http && self.resolver.http.url.is_empty() {
            anyhow::bail!("resolver.http.url must not be empty for the http backend");
        }

        if self.resolver.backend == ResolverBackend::Static {
            for entry in &self.resolver.static_entries {
                if entry.ip.parse::<IpAddr>().is_err() {
                    anyhow::bail!("Invalid static resolver entry IP: {}", entry.ip);
                }
            }
        }

        if !(0.0..=1.0).contains(&self.reputation.low_trust_threshold) {
            anyhow::bail!(
                "reputation.low_trust_threshold must be in [0, 1], got {}",
                self.reputation.low_trust_threshold
            );
        }

        if !(0.0..=1.0).contains(&self.reputation.decay_factor) {
            anyhow::bail!(
                "reputation.decay_factor must be in [0, 1], got {}",
                self.reputation.decay_factor
            );
        }

        for (name, rate) in [
            (
                "resolver.bloom_gate",
                self.resolver.bloom_gate.false_positive_rate,
            ),
            ("jti", self.jti.false_positive_rate),
        ] {
            if !(rate > 0.0 && rate < 1.0) {
                anyhow::bail!(
                    "{}.false_positive_rate must be in (0, 1), got {}",
                    name,
                    rate
                );
            }
        }

        if self.vpn.min_factors == 0 {
            anyhow::bail!("vpn.min_factors must be at least 1");
        }

        regex::Regex::new(&self.vpn.hostname_pattern)
            .map_err(|e| anyhow::anyhow!("Invalid vpn.hostname_pattern: {}", e))?;

        for entry in self.vpn.vpn_ranges.iter().chain(&self.vpn.datacenter_ranges) {
            if entry.parse::<IpNet>().is_err() && entry.parse::<IpAddr>().is_err() {
                anyhow::bail!("Invalid CIDR range: {}", entry);
            }
        }

        if self.login.max_attempts == 0 {
            anyhow::bail!("login.max_attempts must be at least 1");
        }

        for entry in &self.allowlist {
            if entry.parse::<IpAddr>().is_err() && entry.parse::<IpNet>().is_err() {
                anyhow::bail!("Invalid allowlist entry: {}", entry);
            }
        }

        Ok(())
    }

    /// Parse allowlist entries into IpAddr or IpNet.
    pub fn parse_allowlist(&self) -> Vec<AllowlistEntry> {
        self.allowlist
            .iter()
            .filter_map(|s| {
                if let Ok(ip) = s.parse::<IpAddr>() {
                    Some(AllowlistEntry::Single(ip))
                } else if let Ok(net) = s.parse::<IpNet>() {
                    Some(AllowlistEntry::Network(net))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Challenge expiry as a [`Duration`].
    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge.timeout_seconds)
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Risk engine configuration

settings:
  enabled: true
  fail_action: allow             # allow or block when ASN resolution fails
  log_blocked: true
  log_allowed: false

# ASN resolution: backend plus decorator stack, outermost first.
# At most one caching layer (cache or bloom_gate) per deployment.
resolver:
  backend: dns                   # dns, http, or static
  layers:
    - rate_limit
    - cache
  http:
    url: "https://api.iptoasn.com/v1/as/ip/{ip}"
    timeout_ms: 5000
  cache:
    max_entries: 10000
    ttl_seconds: 3600
  bloom_gate:
    expected_entries: 100000
    false_positive_rate: 0.01
  rate_limit:
    permits_per_second: 10
  token_bucket:
    capacity: 100
    refill_per_second: 10
  sliding_window:
    window_seconds: 60
    max_requests: 100
  sweep_interval_seconds: 60

# Per-ASN reputation with periodic decay toward neutral.
reputation:
  decay_interval_seconds: 86400
  decay_factor: 0.9
  staleness_seconds: 2592000     # 30 days
  low_trust_threshold: 0.3

# Multi-factor VPN/proxy detection.
vpn:
  min_factors: 2
  action: flag                   # block or flag
  vpn_ranges:
    - "185.220.100.0/22"
  vpn_asns:
    - 9009
  datacenter_ranges:
    - "104.16.0.0/13"
  hostname_pattern: "(?i)(vpn|proxy|tor|exit|relay|hosting)"

# Per-origin admission: continuous rate plus hard burst cap.
rate_limit:
  requests_per_second: 10
  acquire_timeout_ms: 100
  burst_per_minute: 100
  sweep_interval_seconds: 60
  idle_ttl_seconds: 300

# Login attempt throttling with exponential backoff.
login:
  max_attempts: 10
  ttl_seconds: 3600
  sweep_interval_seconds: 300

# Token identifier replay prevention.
jti:
  expected_tokens: 1000000
  false_positive_rate: 0.01
  purge_interval_seconds: 60

# One-time second-factor challenges.
challenge:
  timeout_seconds: 300
  sweep_interval_seconds: 60

# IP allowlist - always allowed, skips all checks.
# Supports single IPs and CIDR notation.
allowlist:
  - "127.0.0.1"
  - "10.0.0.0/8"
"#
        .to_string()
    }
}

/// Parsed allowlist entry.
#[derive(Debug, Clone)]
pub enum AllowlistEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl AllowlistEntry {
    /// Check if an IP address matches this allowlist entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            AllowlistEntry::Single(allowed) => allowed == ip,
            AllowlistEntry::Network(net) => net.contains(ip),
        }
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
