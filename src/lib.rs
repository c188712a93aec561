//! Identity and origin risk controls.
//!
//! Scores inbound connections by autonomous system and behavior, throttles
//! abusive origins and principals, and prevents token replay.
//!
//! # Features
//!
//! - **ASN Resolution** - DNS, HTTP, or static lookup with a configurable
//!   decorator stack (caching, Bloom-gated caching, rate limiting)
//! - **ASN Reputation** - Per-ASN trust scores with periodic decay toward
//!   neutral
//! - **VPN Detection** - Multi-factor verdicts from ranges, ASNs, reverse
//!   DNS, and pluggable heuristics
//! - **Rate Limiting** - Per-origin continuous rate plus hard burst cap
//! - **Login Throttling** - Exponential backoff per principal
//! - **Replay Prevention** - Bloom-fronted JWT ID store
//! - **Challenges** - Single-use second-factor tokens
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   enabled: true
//!   fail_action: allow
//!
//! resolver:
//!   backend: dns
//!   layers:
//!     - rate_limit
//!     - cache
//!
//! vpn:
//!   min_factors: 2
//!   action: flag
//!
//! allowlist:
//!   - "127.0.0.1"
//!   - "10.0.0.0/8"
//! ```

pub mod bloom;
pub mod challenge;
pub mod config;
pub mod engine;
pub mod error;
pub mod jti;
pub mod login;
pub mod ratelimit;
pub mod reputation;
pub mod resolver;
pub mod sink;
pub mod tasks;
pub mod vpn;

pub use config::Config;
pub use engine::{RiskDecision, RiskEngine};
pub use error::{ResolveError, RiskError};
pub use resolver::{Asn, AsnResolver};
