//! Runtime configuration
//!
//! Everything is read once at startup from flags or `LEDGER_*` environment
//! variables (a `.env` file is honoured) and never changes afterwards.

use crate::ledger::HttpGatewayConfig;
use clap::Args;
use std::time::Duration;
use thiserror::Error;

/// Confirmation rounds waited before giving up
pub const DEFAULT_MAX_ROUNDS: u32 = 4;

/// Global state key returned by reads
pub const DEFAULT_STATE_KEY: &str = "value";

/// Longest accepted parameter age
const MAX_PARAMS_AGE_SECS: u64 = 24 * 60 * 60;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("params max age must be at most {max}s", max = MAX_PARAMS_AGE_SECS)]
    ParamsAgeTooLong,
    #[error("node URL must start with http:// or https://")]
    InvalidNodeUrl,
}

/// Ledger and pipeline settings shared by every subcommand
#[derive(Args, Clone)]
pub struct LedgerArgs {
    /// Ledger node REST endpoint
    #[arg(long, env = "LEDGER_NODE_URL", default_value = "http://localhost:4001")]
    pub node_url: String,

    /// API token sent to the ledger node
    #[arg(long, env = "LEDGER_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Header carrying the API token
    #[arg(long, env = "LEDGER_API_TOKEN_HEADER", default_value = "X-Algo-API-Token")]
    pub api_token_header: String,

    /// Timeout for each ledger node request, in seconds
    #[arg(long, env = "LEDGER_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Hex-encoded secp256k1 secret key used to sign transactions
    #[arg(long, env = "LEDGER_SIGNER_KEY", hide = true, hide_env_values = true)]
    pub signer_key: Option<String>,

    /// Rounds to wait for confirmation
    #[arg(long, env = "LEDGER_MAX_ROUNDS", default_value_t = DEFAULT_MAX_ROUNDS)]
    pub max_rounds: u32,

    /// Network round interval, in milliseconds
    #[arg(long, env = "LEDGER_ROUND_INTERVAL_MS", default_value_t = 4000)]
    pub round_interval_ms: u64,

    /// Oldest suggested parameters accepted when building, in seconds
    #[arg(long, env = "LEDGER_PARAMS_MAX_AGE_SECS", default_value_t = 30)]
    pub params_max_age_secs: u64,

    /// Time allowed for compiling one program source, in milliseconds
    #[arg(long, env = "LEDGER_COMPILE_TIMEOUT_MS", default_value_t = 2000)]
    pub compile_timeout_ms: u64,

    /// Global state key returned by reads
    #[arg(long, env = "LEDGER_STATE_KEY", default_value = DEFAULT_STATE_KEY)]
    pub state_key: String,

    /// Run against an in-process ledger instead of a node
    #[arg(long)]
    pub memory_ledger: bool,

    /// Assemble program listings on the ledger node
    #[arg(long)]
    pub assemble_on_node: bool,
}

impl LedgerArgs {
    /// Validated pipeline settings
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::Zero("max rounds"));
        }
        if self.round_interval_ms == 0 {
            return Err(ConfigError::Zero("round interval"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("request timeout"));
        }
        if self.compile_timeout_ms == 0 {
            return Err(ConfigError::Zero("compile timeout"));
        }
        if self.params_max_age_secs == 0 {
            return Err(ConfigError::Zero("params max age"));
        }
        if self.params_max_age_secs > MAX_PARAMS_AGE_SECS {
            return Err(ConfigError::ParamsAgeTooLong);
        }

        Ok(PipelineConfig {
            max_rounds: self.max_rounds,
            round_interval: Duration::from_millis(self.round_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            params_max_age: Duration::from_secs(self.params_max_age_secs),
            compile_timeout: Duration::from_millis(self.compile_timeout_ms),
            state_key: self.state_key.clone(),
            assemble_on_node: self.assemble_on_node,
        })
    }

    /// Connection settings for [`crate::ledger::HttpGateway`]
    pub fn gateway_config(&self) -> Result<HttpGatewayConfig, ConfigError> {
        if !(self.node_url.starts_with("http://") || self.node_url.starts_with("https://")) {
            return Err(ConfigError::InvalidNodeUrl);
        }
        Ok(HttpGatewayConfig {
            node_url: self.node_url.clone(),
            api_token: self.api_token.clone().filter(|t| !t.is_empty()),
            token_header: self.api_token_header.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

/// Settings for the deploy/interact pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_rounds: u32,
    pub round_interval: Duration,
    /// Deadline for each individual ledger call
    pub request_timeout: Duration,
    pub params_max_age: Duration,
    pub compile_timeout: Duration,
    pub state_key: String,
    pub assemble_on_node: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            round_interval: Duration::from_secs(4),
            request_timeout: Duration::from_secs(10),
            params_max_age: Duration::from_secs(30),
            compile_timeout: Duration::from_secs(2),
            state_key: DEFAULT_STATE_KEY.to_string(),
            assemble_on_node: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        ledger: LedgerArgs,
    }

    #[test]
    fn test_defaults_match_pipeline_default() {
        let cli = TestCli::parse_from(["test"]);
        let config = cli.ledger.pipeline_config().unwrap();
        assert_eq!(config.max_rounds, 4);
        assert_eq!(config.state_key, "value");
        assert_eq!(config.params_max_age, PipelineConfig::default().params_max_age);
    }

    #[test]
    fn test_flags_override() {
        let cli = TestCli::parse_from([
            "test",
            "--max-rounds",
            "9",
            "--memory-ledger",
            "--assemble-on-node",
            "--state-key",
            "counter",
        ]);
        assert!(cli.ledger.memory_ledger);
        let config = cli.ledger.pipeline_config().unwrap();
        assert_eq!(config.max_rounds, 9);
        assert!(config.assemble_on_node);
        assert_eq!(config.state_key, "counter");
    }

    #[test]
    fn test_validation() {
        let cli = TestCli::parse_from(["test", "--max-rounds", "0"]);
        assert_eq!(
            cli.ledger.pipeline_config().unwrap_err(),
            ConfigError::Zero("max rounds")
        );

        let cli = TestCli::parse_from(["test", "--node-url", "ftp://node"]);
        assert_eq!(
            cli.ledger.gateway_config().unwrap_err(),
            ConfigError::InvalidNodeUrl
        );
    }
}
