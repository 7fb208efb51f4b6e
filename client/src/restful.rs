use std::{str::FromStr, time::Duration};

use reqwest::Url;
use shared::types::MinerKey;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin client for the pool's plain-text REST endpoints.
pub struct PoolApi {
    base: Url,
    client: reqwest::Client,
}

impl PoolApi {
    pub fn new(server: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(server)?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("pool server must be an http(s) url, got `{server}`");
        }
        // keep a path prefix when joining endpoints
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Server clock, used to stamp the handshake.
    pub async fn timestamp(&self) -> anyhow::Result<u64> {
        self.get("timestamp", &[]).await
    }

    pub async fn miner_balance(&self, pubkey: &MinerKey) -> anyhow::Result<f64> {
        self.get("miner/balance", &[("pubkey", pubkey.to_string())]).await
    }

    pub async fn miner_rewards(&self, pubkey: &MinerKey) -> anyhow::Result<f64> {
        self.get("miner/rewards", &[("pubkey", pubkey.to_string())]).await
    }

    pub async fn active_miners(&self) -> anyhow::Result<u64> {
        self.get("active-miners", &[]).await
    }

    pub fn endpoint(&self, endpoint: &str, query: &[(&str, String)]) -> anyhow::Result<Url> {
        let mut url = self.base.join(endpoint)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// base request, the body is a single plain-text value
    async fn get<R>(&self, endpoint: &str, query: &[(&str, String)]) -> anyhow::Result<R>
    where
        R: FromStr,
        R::Err: std::fmt::Display, {
        let url = self.endpoint(endpoint, query)?;

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => anyhow::bail!("fail to send request: {err}"),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => anyhow::bail!("fail to read response content: {err:#}"),
        };

        if !status.is_success() {
            anyhow::bail!("status code: {status}, response: {text}");
        }

        match text.trim().parse::<R>() {
            Ok(value) => Ok(value),
            Err(err) => anyhow::bail!("fail to parse response: {err}, response: {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_the_path_prefix() {
        let api = PoolApi::new("https://pool.example.com/api").unwrap();
        assert_eq!(api.endpoint("timestamp", &[]).unwrap().as_str(), "https://pool.example.com/api/timestamp");

        let key = MinerKey([2; 32]);
        let url = api.endpoint("miner/balance", &[("pubkey", key.to_string())]).unwrap();
        assert_eq!(url.path(), "/api/miner/balance");
        assert_eq!(url.query_pairs().next().unwrap().1, key.to_string());
    }

    #[test]
    fn rejects_non_http_servers() {
        assert!(PoolApi::new("ws://pool.example.com").is_err());
        assert!(PoolApi::new("not a url").is_err());
    }
}
