/// Prometheus metrics: a `lazy_static` registry plus typed helper functions,
/// scoped to the metrics this core actually emits.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Current applied tip height per chain.
    pub static ref CHAIN_TIP_HEIGHT: IntGaugeVec = IntGaugeVec::new(
        Opts::new("chain_tip_height", "Highest applied block height"),
        &["chain"]
    ).unwrap();

    /// Size of the per-(chain, height) ID-block candidate list at the
    /// current tip+1, sampled each processing pass.
    pub static ref FORK_CHOICE_CANDIDATES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("fork_choice_candidates", "Candidates considered by the last fork-choice call"),
        &["chain"]
    ).unwrap();

    /// Candidates purged by fork-choice, by reason.
    pub static ref FORK_CHOICE_PURGED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fork_choice_purged_total", "Candidates purged during fork-choice"),
        &["chain", "reason"]
    ).unwrap();

    /// Blocks applied via the storage layer, by result.
    pub static ref BLOCKS_APPLIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("blocks_applied_total", "Blocks passed to ProcessBlockOfChain"),
        &["chain", "result"]
    ).unwrap();

    /// Rollbacks performed, by reason.
    pub static ref ROLLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rollbacks_total", "Rollbacks performed"),
        &["chain", "reason"]
    ).unwrap();

    /// Mining attempts launched.
    pub static ref MINING_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mining_attempts_total", "Mining attempts launched"),
        &["chain"]
    ).unwrap();

    /// Improved candidate blocks broadcast during mining.
    pub static ref MINING_BROADCASTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("mining_broadcasts_total", "Improved mining candidates broadcast"),
        &["chain"]
    ).unwrap();

    /// Wall-clock duration of a single processing pass.
    pub static ref PROCESSING_PASS_DURATION: prometheus::HistogramVec = prometheus::HistogramVec::new(
        prometheus::HistogramOpts::new("processing_pass_duration_seconds", "Per-chain processing pass latency")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 20.0]),
        &["chain"]
    ).unwrap();
}

/// Register every metric with the global registry. Call once at startup.
pub fn register_all() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(CHAIN_TIP_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(FORK_CHOICE_CANDIDATES.clone()))?;
    REGISTRY.register(Box::new(FORK_CHOICE_PURGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BLOCKS_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ROLLBACKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MINING_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MINING_BROADCASTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROCESSING_PASS_DURATION.clone()))?;
    Ok(())
}

/// Render the registry in the Prometheus text exposition format, for the
/// `/metrics` endpoint.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn set_chain_tip_height(chain: &str, height: i64) {
    CHAIN_TIP_HEIGHT.with_label_values(&[chain]).set(height);
}

pub fn set_fork_choice_candidates(chain: &str, count: i64) {
    FORK_CHOICE_CANDIDATES.with_label_values(&[chain]).set(count);
}

pub fn increment_fork_choice_purged(chain: &str, reason: &str) {
    FORK_CHOICE_PURGED_TOTAL.with_label_values(&[chain, reason]).inc();
}

pub fn increment_blocks_applied(chain: &str, result: &str) {
    BLOCKS_APPLIED_TOTAL.with_label_values(&[chain, result]).inc();
}

pub fn increment_rollbacks(chain: &str, reason: &str) {
    ROLLBACKS_TOTAL.with_label_values(&[chain, reason]).inc();
}

pub fn increment_mining_attempts(chain: &str) {
    MINING_ATTEMPTS_TOTAL.with_label_values(&[chain]).inc();
}

pub fn increment_mining_broadcasts(chain: &str) {
    MINING_BROADCASTS_TOTAL.with_label_values(&[chain]).inc();
}

pub fn record_processing_pass_duration(chain: &str, duration_secs: f64) {
    PROCESSING_PASS_DURATION.with_label_values(&[chain]).observe(duration_secs);
}
