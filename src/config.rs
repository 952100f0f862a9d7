use std::{
    fs,
    num::NonZeroU32,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::ConfigError;

use crate::{
    engine::EngineConfig,
    execution::SubmitterConfig,
    funding::ReconcilerConfig,
    ledger::models::Amount,
    scheduler::{RetryPolicy, SchedulerConfig},
    wallet::Keypair,
};

/// Command line flags. Every flag can also be set through an `ANGELBOT_*` variable.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "angelbot",
    about = "Creates and funds ledger accounts on request",
    version
)]
pub struct CliConfig {
    /// Secret seed of the operator account
    #[arg(long, env = "ANGELBOT_SECRET_SEED", hide_env_values = true)]
    pub secret_seed: String,

    #[arg(long, env = "ANGELBOT_NETWORK_ID")]
    pub network_id: String,

    /// Ledger node endpoint
    #[arg(long, env = "ANGELBOT_ENDPOINT", default_value = "http://localhost:12345")]
    pub endpoint: String,

    #[arg(long, env = "ANGELBOT_BIND", default_value = "0.0.0.0:23456")]
    pub bind: String,

    /// File with one source account secret per line
    #[arg(long, env = "ANGELBOT_SOURCES")]
    pub sources: PathBuf,

    /// Largest balance a client may request
    #[arg(long, env = "ANGELBOT_MAX_BALANCE", default_value = "100000000000")]
    pub max_balance: Amount,

    /// Balance used when the client asks for none
    #[arg(long, env = "ANGELBOT_DEFAULT_BALANCE", default_value = "1000000000")]
    pub default_balance: Amount,

    /// `<limit>-<S|M|H>`, e.g. `10-S`
    #[arg(long, env = "ANGELBOT_RATE_LIMIT", default_value = "100-M")]
    pub rate_limit: RateLimit,

    #[arg(long, env = "ANGELBOT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, env = "ANGELBOT_LOG_OUTPUT")]
    pub log_output: Option<PathBuf>,

    #[arg(long, env = "ANGELBOT_BATCH_LIMIT", default_value_t = 300)]
    pub batch_limit: usize,

    #[arg(long, env = "ANGELBOT_TICK_INTERVAL_MS", default_value_t = 3000)]
    pub tick_interval_ms: u64,

    #[arg(long, env = "ANGELBOT_CONFIRM_TIMEOUT_SECS", default_value_t = 60)]
    pub confirm_timeout_secs: u64,

    #[arg(long, env = "ANGELBOT_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "ANGELBOT_RECONCILE_WORKERS", default_value_t = 50)]
    pub reconcile_workers: usize,

    /// Balance given to source accounts created at startup
    #[arg(long, env = "ANGELBOT_INITIAL_SOURCE_BALANCE", default_value = "1000000000000")]
    pub initial_source_balance: Amount,

    /// Fee charged per operation
    #[arg(long, env = "ANGELBOT_BASE_FEE", default_value = "10000")]
    pub base_fee: Amount,

    /// Give up on a request after this many failed batches (default: never)
    #[arg(long, env = "ANGELBOT_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Initial backoff after a failed batch, doubled per further failure
    #[arg(long, env = "ANGELBOT_RETRY_BACKOFF_MS", default_value_t = 0)]
    pub retry_backoff_ms: u64,
}

/// Requests allowed per period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: NonZeroU32,
    pub period: Duration,
}

impl FromStr for RateLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Message(format!("invalid rate limit '{}', expected <limit>-<S|M|H>", s));

        let (limit, period) = s.trim().split_once('-').ok_or_else(invalid)?;
        let limit = limit
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(invalid)?;
        let period = match period {
            "S" | "s" => Duration::from_secs(1),
            "M" | "m" => Duration::from_secs(60),
            "H" | "h" => Duration::from_secs(60 * 60),
            _ => return Err(invalid()),
        };

        Ok(Self { limit, period })
    }
}

/// Validated runtime configuration
#[derive(Debug)]
pub struct Config {
    pub operator: Keypair,
    pub sources: Vec<Keypair>,
    pub network_id: String,
    pub endpoint: String,
    pub bind_address: String,
    pub max_balance: Amount,
    pub default_balance: Amount,
    pub rate_limit: RateLimit,
    pub log_level: String,
    pub log_output: Option<PathBuf>,
    pub engine: EngineConfig,
    /// Request timeout for ledger calls.
    pub ledger_timeout: Duration,
}

impl Config {
    /// Load `.env`, then parse flags and `ANGELBOT_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let cli = CliConfig::try_parse().map_err(|e| ConfigError::Message(e.to_string()))?;
        Self::from_cli(cli)
    }

    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        if cli.network_id.is_empty() {
            return Err(ConfigError::Message("--network-id must be given".into()));
        }
        let operator = Keypair::from_secret(&cli.secret_seed)
            .map_err(|e| ConfigError::Message(format!("--secret-seed: {}", e)))?;
        let sources = load_sources(&cli.sources)?;

        if cli.default_balance > cli.max_balance {
            return Err(ConfigError::Message(format!(
                "--default-balance {} exceeds --max-balance {}",
                cli.default_balance, cli.max_balance
            )));
        }
        if cli.batch_limit == 0 {
            return Err(ConfigError::Message("--batch-limit must be positive".into()));
        }

        let confirm_timeout = Duration::from_secs(cli.confirm_timeout_secs);
        let engine = EngineConfig {
            submitter: SubmitterConfig {
                network_id: cli.network_id.as_bytes().to_vec(),
                base_fee: cli.base_fee,
                confirm_timeout,
                poll_interval: Duration::from_millis(cli.poll_interval_ms),
            },
            scheduler: SchedulerConfig {
                batch_limit: cli.batch_limit,
                tick_interval: Duration::from_millis(cli.tick_interval_ms.max(1)),
                retry: RetryPolicy {
                    max_attempts: cli.max_attempts,
                    base_backoff: Duration::from_millis(cli.retry_backoff_ms),
                    ..Default::default()
                },
            },
            reconciler: ReconcilerConfig {
                workers: cli.reconcile_workers.max(1),
                batch_limit: cli.batch_limit,
                initial_source_balance: cli.initial_source_balance,
            },
        };

        Ok(Self {
            operator,
            sources,
            network_id: cli.network_id,
            endpoint: cli.endpoint,
            bind_address: cli.bind,
            max_balance: cli.max_balance,
            default_balance: cli.default_balance,
            rate_limit: cli.rate_limit,
            log_level: cli.log_level,
            log_output: cli.log_output,
            engine,
            ledger_timeout: confirm_timeout,
        })
    }
}

/// Read source secrets, one per line. Blank lines and `#` comments are skipped.
pub fn load_sources(path: &Path) -> Result<Vec<Keypair>, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Message(format!("failed to read {}: {}", path.display(), e)))?;

    let mut sources = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let keypair = Keypair::from_secret(line).map_err(|e| {
            ConfigError::Message(format!("{}:{}: {}", path.display(), index + 1, e))
        })?;
        sources.push(keypair);
    }

    if sources.is_empty() {
        return Err(ConfigError::Message(format!(
            "{} contains no source accounts",
            path.display()
        )));
    }
    Ok(sources)
}
