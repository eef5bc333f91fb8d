//! Network config file and process settings.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use engine::market::DEFAULT_DECIMALS;
use engine::{Address, Token};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[command(name = "exchange-api", about = "Exchange front-end service: ledger sync, derived views, transaction submission")]
pub struct Settings {
    /// Per-network contract addresses (JSON keyed by chain id)
    #[arg(long, env = "EXCHANGE_CONFIG", default_value = "config.json")]
    pub config: PathBuf,
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8787")]
    pub bind: String,
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Option<String>,
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,
    /// Used when no ledger connection is available to report one.
    #[arg(long, env = "CHAIN_ID", default_value_t = 31337)]
    pub chain_id: u64,
    /// Viewing account for off-chain mode; on-chain the signer's address is used.
    #[arg(long, env = "ACCOUNT")]
    pub account: Option<String>,
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 1500)]
    pub poll_interval_ms: u64,
    /// Optional directory with the front-end bundle.
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    pub address: Address,
    #[serde(default)]
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub exchange: ContractRef,
    /// symbol -> contract
    pub tokens: BTreeMap<String, ContractRef>,
    /// selectable pairs, base symbol first
    #[serde(default)]
    pub markets: Vec<[String; 2]>,
}

impl NetworkConfig {
    pub fn token(&self, symbol: &str) -> Option<Token> {
        self.tokens.get(symbol).map(|c| Token {
            address: c.address.clone(),
            symbol: symbol.to_string(),
            decimals: c.decimals.unwrap_or(DEFAULT_DECIMALS),
        })
    }

    /// Looks a token up by symbol or by address.
    pub fn resolve(&self, key: &str) -> Option<Token> {
        self.token(key).or_else(|| {
            let addr = Address::new(key);
            self.tokens
                .iter()
                .find(|(_, c)| c.address == addr)
                .and_then(|(sym, _)| self.token(sym))
        })
    }

    pub fn market(&self, base: &str, quote: &str) -> Result<(Token, Token)> {
        let t0 = self.token(base).ok_or_else(|| anyhow!("unknown token {base}"))?;
        let t1 = self.token(quote).ok_or_else(|| anyhow!("unknown token {quote}"))?;
        if t0.address == t1.address {
            return Err(anyhow!("market needs two different tokens"));
        }
        Ok((t0, t1))
    }

    pub fn default_market(&self) -> Option<&[String; 2]> {
        self.markets.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeConfig(pub BTreeMap<String, NetworkConfig>);

impl ExchangeConfig {
    pub fn parse(json: &str) -> Result<Self> {
        let cfg: ExchangeConfig = serde_json::from_str(json).context("parsing exchange config")?;
        for (chain, net) in &cfg.0 {
            chain.parse::<u64>().with_context(|| format!("chain id `{chain}` is not a number"))?;
            for [base, quote] in &net.markets {
                net.market(base, quote).with_context(|| format!("market {base}/{quote} on chain {chain}"))?;
            }
        }
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn network(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.0.get(&chain_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "31337": {
            "exchange": { "address": "0xE7f1725E7734CE288F8367e1Bb143E90bb3F0512" },
            "tokens": {
                "DApp": { "address": "0x5FbDB2315678afecb367f032d93F642f64180aa3" },
                "mETH": { "address": "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0" },
                "mDAI": { "address": "0xCf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9", "decimals": 6 }
            },
            "markets": [["DApp", "mETH"], ["DApp", "mDAI"]]
        }
    }"#;

    #[test]
    fn test_parse_and_lookup() {
        let cfg = ExchangeConfig::parse(SAMPLE).unwrap();
        let net = cfg.network(31337).unwrap();
        assert!(cfg.network(1).is_none());
        let (t0, t1) = net.market("DApp", "mDAI").unwrap();
        assert_eq!(t0.decimals, 18);
        assert_eq!(t1.decimals, 6);
        assert_eq!(t0.address, Address::new("0x5fbdb2315678afecb367f032d93f642f64180aa3"));
        assert_eq!(net.default_market().unwrap(), &["DApp".to_string(), "mETH".to_string()]);
        assert_eq!(net.resolve("0x9FE46736679D2D9A65F0992F2272DE9F3C7FA6E0").unwrap().symbol, "mETH");
        assert!(net.market("DApp", "DApp").is_err());
    }

    #[test]
    fn test_rejects_unknown_market_symbol() {
        let bad = SAMPLE.replace("[\"DApp\", \"mDAI\"]", "[\"DApp\", \"XYZ\"]");
        assert!(ExchangeConfig::parse(&bad).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = ExchangeConfig::load(f.path()).unwrap();
        assert_eq!(cfg.0.len(), 1);
        assert!(ExchangeConfig::load(Path::new("/nonexistent/config.json")).is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let s = Settings::parse_from(["exchange-api"]);
        assert_eq!(s.bind, "0.0.0.0:8787");
        assert_eq!(s.poll_interval_ms, 1500);
    }
}
