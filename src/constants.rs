/// Engine-wide timing and sizing constants
///
/// These constants ensure consistent handling of cross-chain timing and
/// candidate-set sizing across the codebase. All related logic should use
/// these constants instead of magic numbers.

/// Window within which a chain is considered "live" / two chains are
/// considered "in sync" (5 minutes, in milliseconds).
pub const BLOCK_SYNC_TIME_MS: u64 = 5 * 60 * 1000;

/// How long a pending transaction remains acceptable for mining (9 days, in
/// milliseconds).
pub const TRANS_ACCEPT_TIME_MS: u64 = 9 * 24 * 60 * 60 * 1000;

/// Maximum length of the per-(chain, height) ID-block candidate list.
pub const MINER_NUM: usize = 16;

/// Tolerance band used when comparing reported hash power across peers.
pub const HP_ACCEPT_RANGE: u64 = 20;

/// Wall-clock budget for a single mining attempt (20 seconds).
pub const MINE_TIMEOUT_SECS: u64 = 20;

/// Chain bootstrap window: below this last-applied height a chain is still
/// considered to be catching up to its parent for the purposes of the
/// parent-missing structural check.
pub const CHAIN_BOOTSTRAP_WINDOW: u64 = 100;

/// A transaction that has been selected for mining more than this many times
/// is dropped regardless of weight.
pub const MAX_TRANSACTION_SELECTIONS: u32 = 3;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_window() {
        assert_eq!(BLOCK_SYNC_TIME_MS, 300_000);
    }
}
