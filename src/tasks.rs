//! Background maintenance loops.
//!
//! Each stateful component exposes a cheap sweep; these loops call them on
//! the configured intervals so memory stays bounded without any work on the
//! request path.

use crate::engine::RiskEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawn all maintenance loops for an engine.
///
/// The returned handles run until aborted; dropping them detaches the
/// loops, which is fine for process-lifetime engines.
pub fn spawn_maintenance(engine: Arc<RiskEngine>) -> Vec<JoinHandle<()>> {
    let config = engine.config();

    let resolver_interval = Duration::from_secs(config.resolver.sweep_interval_seconds.max(1));
    let decay_interval = Duration::from_secs(config.reputation.decay_interval_seconds.max(1));
    let ratelimit_interval = Duration::from_secs(config.rate_limit.sweep_interval_seconds.max(1));
    let login_interval = Duration::from_secs(config.login.sweep_interval_seconds.max(1));
    let jti_interval = Duration::from_secs(config.jti.purge_interval_seconds.max(1));
    let challenge_interval = Duration::from_secs(config.challenge.sweep_interval_seconds.max(1));

    vec![
        spawn_loop("resolver-sweep", resolver_interval, engine.clone(), |e| {
            e.sweep_resolver()
        }),
        spawn_loop("reputation-decay", decay_interval, engine.clone(), |e| {
            e.reputation().apply_decay()
        }),
        spawn_loop("ratelimit-sweep", ratelimit_interval, engine.clone(), |e| {
            e.rate_limiter().sweep()
        }),
        spawn_loop("login-sweep", login_interval, engine.clone(), |e| {
            e.login().sweep()
        }),
        spawn_loop("jti-purge", jti_interval, engine.clone(), |e| {
            e.jti().purge_expired()
        }),
        spawn_loop("challenge-sweep", challenge_interval, engine, |e| {
            e.challenges().sweep()
        }),
    ]
}

fn spawn_loop<F>(
    name: &'static str,
    period: Duration,
    engine: Arc<RiskEngine>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(&RiskEngine) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; skip it so sweeps start one
        // period after startup.
        interval.tick().await;
        loop {
            interval.tick().await;
            debug!(task = name, "Maintenance tick");
            tick(&engine);
        }
    })
}
