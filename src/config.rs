/// Engine configuration.
///
/// A global `config::Config` loaded from `config.toml`, wrapped here in a
/// typed `EngineConfig` struct so the rest of the crate never touches the
/// untyped `config::Config` directly.

use std::error::Error;

pub use config::Config;
pub use once_cell::sync::OnceCell;

use crate::chain_id::ChainId;

static GLOBAL_CONFIG: OnceCell<EngineConfig> = OnceCell::new();

/// Typed view over the recognized configuration options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Enable local mining.
    pub do_mine: bool,
    /// 0 means all chains; otherwise restrict mining to this chain.
    pub chain_of_mine: ChainId,
    pub wallet_addr: Vec<u8>,
    pub private_key: Vec<u8>,
    pub sign_prefix: Vec<u8>,
    /// 0 or <100 disables auto-register.
    pub cost_of_reg_miner: u64,
    pub energy_limit_of_mine: u64,
    pub first_trans_name: Vec<u8>,
    /// Overridable timing/sizing knobs; default to the `constants` module's
    /// values but may be tuned per deployment.
    pub block_sync_time_ms: u64,
    pub trans_accept_time_ms: u64,
    pub miner_num: usize,
    /// Minimum hash power a mined block's key must exceed to be accepted.
    pub hashpower_limit: u64,
    pub hp_accept_range: u64,
    /// Wall-clock budget for a single mining attempt; defaults to
    /// `constants::MINE_TIMEOUT_SECS` but is overridable for tests.
    pub mine_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            do_mine: false,
            chain_of_mine: 0,
            wallet_addr: Vec::new(),
            private_key: Vec::new(),
            sign_prefix: Vec::new(),
            cost_of_reg_miner: 0,
            energy_limit_of_mine: 0,
            first_trans_name: Vec::new(),
            block_sync_time_ms: crate::constants::BLOCK_SYNC_TIME_MS,
            trans_accept_time_ms: crate::constants::TRANS_ACCEPT_TIME_MS,
            miner_num: crate::constants::MINER_NUM,
            hashpower_limit: 20,
            hp_accept_range: crate::constants::HP_ACCEPT_RANGE,
            mine_timeout_secs: crate::constants::MINE_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Mining is restricted to a single chain when `chain_of_mine != 0`.
    pub fn mining_allowed_on(&self, chain: ChainId) -> bool {
        self.do_mine && (self.chain_of_mine == 0 || self.chain_of_mine == chain)
    }

    /// Auto-registration as a miner is gated on a minimum bond.
    pub fn auto_register_enabled(&self) -> bool {
        self.cost_of_reg_miner >= 100
    }

    fn from_raw(raw: &Config) -> Self {
        EngineConfig {
            do_mine: raw.get_bool("mining.do_mine").unwrap_or(false),
            chain_of_mine: raw.get_int("mining.chain_of_mine").unwrap_or(0).max(0) as ChainId,
            wallet_addr: raw
                .get_string("mining.wallet_addr")
                .ok()
                .and_then(|s| hex::decode(s).ok())
                .unwrap_or_default(),
            private_key: raw
                .get_string("mining.private_key")
                .ok()
                .and_then(|s| hex::decode(s).ok())
                .unwrap_or_default(),
            sign_prefix: raw
                .get_string("mining.sign_prefix")
                .ok()
                .and_then(|s| hex::decode(s).ok())
                .unwrap_or_default(),
            cost_of_reg_miner: raw.get_int("mining.cost_of_reg_miner").unwrap_or(0).max(0) as u64,
            energy_limit_of_mine: raw.get_int("mining.energy_limit_of_mine").unwrap_or(0).max(0) as u64,
            first_trans_name: raw.get_string("mining.first_trans_name").unwrap_or_default().into_bytes(),
            block_sync_time_ms: raw
                .get_int("timing.block_sync_time_ms")
                .ok()
                .map(|v| v.max(0) as u64)
                .unwrap_or(crate::constants::BLOCK_SYNC_TIME_MS),
            trans_accept_time_ms: raw
                .get_int("timing.trans_accept_time_ms")
                .ok()
                .map(|v| v.max(0) as u64)
                .unwrap_or(crate::constants::TRANS_ACCEPT_TIME_MS),
            miner_num: raw
                .get_int("chain.miner_num")
                .ok()
                .map(|v| v.max(0) as usize)
                .unwrap_or(crate::constants::MINER_NUM),
            hashpower_limit: raw.get_int("mining.hashpower_limit").ok().map(|v| v.max(0) as u64).unwrap_or(20),
            hp_accept_range: raw
                .get_int("chain.hp_accept_range")
                .ok()
                .map(|v| v.max(0) as u64)
                .unwrap_or(crate::constants::HP_ACCEPT_RANGE),
            mine_timeout_secs: raw
                .get_int("mining.mine_timeout_secs")
                .ok()
                .map(|v| v.max(0) as u64)
                .unwrap_or(crate::constants::MINE_TIMEOUT_SECS),
        }
    }
}

/// Load `config.toml` from the working directory, expanding a leading `~`
/// the same way any other path-valued setting in this crate does.
pub fn load_config(path: &str) -> Result<EngineConfig, Box<dyn Error>> {
    let expanded = shellexpand::tilde(path).into_owned();
    let raw = Config::builder().add_source(config::File::with_name(&expanded)).build()?;
    Ok(EngineConfig::from_raw(&raw))
}

pub fn init_global_config(path: &str) -> Result<(), Box<dyn Error>> {
    let cfg = load_config(path)?;
    GLOBAL_CONFIG.set(cfg).map_err(|_| "config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static EngineConfig {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        tracing::error!("config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mining_allowed_restricted_to_one_chain() {
        let mut cfg = EngineConfig { do_mine: true, chain_of_mine: 3, ..Default::default() };
        assert!(!cfg.mining_allowed_on(2));
        assert!(cfg.mining_allowed_on(3));
        cfg.chain_of_mine = 0;
        assert!(cfg.mining_allowed_on(2));
    }

    #[test]
    fn test_auto_register_threshold() {
        let mut cfg = EngineConfig { cost_of_reg_miner: 99, ..Default::default() };
        assert!(!cfg.auto_register_enabled());
        cfg.cost_of_reg_miner = 100;
        assert!(cfg.auto_register_enabled());
    }
}
