//! # Node Configuration
//!
//! The node reads one TOML file with three tables:
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8090"
//!
//! [logging]
//! format = "pretty"          # or "json"
//! filter = "sft_node=info,sft_protocol=info"
//!
//! [service]
//! network = "testnet"
//! issuer_wif = "..."
//! ledger_api = "https://api.whatsonchain.com/v1/bsv/test"
//! db_path = "/var/lib/sft/db"
//! # [[service.oracles]] x3, [service.templates]
//! ```
//!
//! `[service]` is the library's `ServiceConfig` verbatim. Command-line and
//! environment overrides are applied after parsing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use sft_protocol::config::ServiceConfig;

use crate::cli::RunArgs;
use crate::logging::LogFormat;

const DEFAULT_LISTEN: &str = "127.0.0.1:8090";
const DEFAULT_FILTER: &str = "sft_node=info,sft_protocol=info,tower_http=info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_format")]
    pub format: String,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: default_format(), filter: default_filter() }
    }
}

impl LoggingConfig {
    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.format)
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

/// Everything in the node's config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
}

impl NodeConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid node configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Apply command-line and environment overrides from `args`.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(listen) = &args.listen {
            self.server.listen = listen.clone();
        }
        if let Some(db_path) = &args.db_path {
            self.service.db_path = db_path.clone();
        }
        if let Some(wif) = &args.issuer_wif {
            self.service.issuer_wif = wif.clone();
        }
        if let Some(rate) = args.fee_rate {
            self.service.fee_rate = rate;
        }
        if let Some(format) = &args.log_format {
            self.logging.format = format.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sft_protocol::config::{Network, DEFAULT_FEE_RATE};
    use std::io::Write;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
[server]
listen = "0.0.0.0:8100"

[service]
network = "testnet"
issuer_wif = "cNotARealKey"
ledger_api = "https://api.whatsonchain.com/v1/bsv/test"
db_path = "/tmp/sft-db"

[[service.oracles]]
api_prefix = "https://s1.example"
[[service.oracles]]
api_prefix = "https://s2.example"
[[service.oracles]]
api_prefix = "https://s3.example"

[service.templates]
genesis = "51"
token = "52"
route_check_3_to_3 = "53"
route_check_6_to_6 = "54"
route_check_10_to_10 = "55"
route_check_3_to_100 = "56"
route_check_20_to_3 = "57"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let cfg = NodeConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.server.listen, "0.0.0.0:8100");
        assert_eq!(cfg.logging, LoggingConfig::default());
        assert_eq!(cfg.service.network, Network::Testnet);
        assert_eq!(cfg.service.fee_rate, DEFAULT_FEE_RATE);
        assert_eq!(cfg.service.oracles.len(), 3);
        assert_eq!(cfg.service.templates.route_check_20_to_3, "57");
        cfg.service.validate().unwrap();
    }

    #[test]
    fn missing_service_table_is_an_error() {
        assert!(NodeConfig::parse("[server]\nlisten = \"x\"\n").is_err());
    }

    #[test]
    fn overrides_win() {
        let mut cfg = NodeConfig::parse(SAMPLE).unwrap();
        cfg.apply_overrides(&RunArgs {
            listen: Some("127.0.0.1:1".into()),
            db_path: Some(PathBuf::from("/data")),
            fee_rate: Some(1.0),
            log_format: Some("json".into()),
            ..RunArgs::default()
        });
        assert_eq!(cfg.server.listen, "127.0.0.1:1");
        assert_eq!(cfg.service.db_path, PathBuf::from("/data"));
        assert_eq!(cfg.service.fee_rate, 1.0);
        assert_eq!(cfg.logging.log_format(), LogFormat::Json);
        assert_eq!(cfg.service.issuer_wif, "cNotARealKey");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = NodeConfig::load(file.path()).unwrap();
        assert_eq!(cfg.service.db_path, PathBuf::from("/tmp/sft-db"));
        assert!(NodeConfig::load(Path::new("/definitely/not/here.toml")).is_err());
    }
}
