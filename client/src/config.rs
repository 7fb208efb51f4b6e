use std::{fs::File, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use shared::types::MinerKey;

use crate::session::Backoff;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MinerConfig {
    /// http(s) url of the pool server
    pub server: Option<String>,
    /// base58 wallet pubkey receiving rewards
    pub wallet: Option<String>,
    pub cores: Option<usize>,
    pub reconnect: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub worker_grace_secs: u64,
    pub report_interval_secs: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            server: None,
            wallet: None,
            cores: None,
            reconnect: 10,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            worker_grace_secs: 5,
            report_interval_secs: 10,
        }
    }
}

impl MinerConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            self.reconnect,
        )
    }

    /// Only mining and the per-wallet queries need a wallet.
    pub fn pubkey(&self) -> anyhow::Result<MinerKey> {
        let Some(wallet) = self.wallet.as_deref() else {
            anyhow::bail!("wallet pubkey is required (--wallet or config file)");
        };
        Ok(MinerKey::from_base58(wallet)?)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.worker_grace_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}

pub fn load_config_file<P>(config_file: P) -> anyhow::Result<MinerConfig>
where
    P: AsRef<Path>, {
    let path = config_file.as_ref();
    let file = File::open(path)
        .map_err(|err| anyhow::anyhow!("{} config file not found: {err}", path.display()))?;
    let config = serde_json::from_reader(file)
        .map_err(|err| anyhow::anyhow!("{} is not a valid config: {err}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: MinerConfig =
            serde_json::from_str(r#"{ "server": "https://pool.example.com", "reconnect": 3 }"#).unwrap();
        assert_eq!(config.server.as_deref(), Some("https://pool.example.com"));
        assert_eq!(config.reconnect, 3);
        assert_eq!(config.backoff_base_ms, 1_000);
        assert_eq!(config.report_interval(), Duration::from_secs(10));
    }

    #[test]
    fn backoff_ceiling_never_below_base() {
        let config = MinerConfig { backoff_base_ms: 500, backoff_max_ms: 100, reconnect: 1, ..Default::default() };
        let mut backoff = config.backoff();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn wallet_is_resolved_on_demand() {
        let config = MinerConfig { server: Some("https://pool.example.com".to_string()), ..Default::default() };
        assert!(config.pubkey().is_err());

        let key = MinerKey([4; 32]);
        let config = MinerConfig { wallet: Some(key.to_string()), ..config };
        assert_eq!(config.pubkey().unwrap(), key);

        let config = MinerConfig { wallet: Some("not-base58-0OIl".to_string()), ..config };
        assert!(config.pubkey().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config_file("/nonexistent/pool-miner.json").is_err());
    }
}
