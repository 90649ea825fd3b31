//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{ApiError, Result};
use crate::signer::LocalSigner;

/// `ProjectSubmitted(uint256 indexed submissionId, address indexed ngo, string title)`
pub const DEFAULT_SUBMISSION_EVENT: &str = "ProjectSubmitted(uint256,address,string)";

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection string (e.g. sqlite:./bluegreen.db)
    pub database_url: String,
    /// Secret used to sign user and admin JWTs
    pub jwt_secret: String,
    /// Port for the REST API server
    pub api_port: u16,
    pub ledger: LedgerConfig,
    /// Credits granted per image by bulk approval when the caller sends none
    pub default_credits_per_image: i64,
    /// How often (in seconds) the ledger sync task looks for unmapped projects
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the chain node
    pub rpc_url: String,
    /// Deployed contract address (0x-prefixed)
    pub contract_address: String,
    /// Account that sends approval and submission transactions
    pub signer: String,
    /// Unlocks `signer` on the node for each transaction when set
    pub signer_passphrase: Option<String>,
    /// Signs transactions in-process instead of on the node when set
    pub local_key: Option<LocalSigner>,
    /// Canonical signature of the event announcing a new submission
    pub submission_event: String,
    /// Upper bound on a single JSON-RPC request
    pub request_timeout: Duration,
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./bluegreen.db".to_string()),
            jwt_secret: env_var("JWT_SECRET").map_err(|_| {
                ApiError::Config("JWT_SECRET environment variable is required".to_string())
            })?,
            api_port: parse_var("PORT", "4000")?,
            ledger: LedgerConfig::from_env()?,
            default_credits_per_image: parse_var("DEFAULT_CREDITS_PER_IMAGE", "10")?,
            sync_interval_secs: parse_var("SYNC_INTERVAL_SECS", "30")?,
        })
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        let contract_address = env_var("CONTRACT_ADDRESS").map_err(|_| {
            ApiError::Config("CONTRACT_ADDRESS environment variable is required".to_string())
        })?;
        if !is_eth_address(&contract_address) {
            return Err(ApiError::Config("Invalid CONTRACT_ADDRESS".to_string()));
        }
        let private_key = env_var("LEDGER_PRIVATE_KEY")
            .or_else(|_| env_var("PRIVATE_KEY"))
            .ok();
        let (signer, local_key) =
            resolve_signer(private_key.as_deref(), env_var("LEDGER_SIGNER").ok().as_deref())?;

        Ok(LedgerConfig {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            contract_address,
            signer,
            signer_passphrase: env_var("LEDGER_SIGNER_PASSPHRASE")
                .ok()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            local_key,
            submission_event: env_var("LEDGER_SUBMISSION_EVENT")
                .unwrap_or_else(|_| DEFAULT_SUBMISSION_EVENT.to_string()),
            request_timeout: Duration::from_secs(parse_var("LEDGER_REQUEST_TIMEOUT_SECS", "30")?),
            confirm_timeout: Duration::from_secs(parse_var("LEDGER_CONFIRM_TIMEOUT_SECS", "120")?),
            poll_interval: Duration::from_millis(parse_var("LEDGER_POLL_INTERVAL_MS", "1000")?),
        })
    }
}

/// Work out which account sends ledger transactions. A private key wins and
/// implies its address; `LEDGER_SIGNER`, if also set, must agree with it.
pub fn resolve_signer(
    private_key: Option<&str>,
    signer: Option<&str>,
) -> Result<(String, Option<LocalSigner>)> {
    let private_key = private_key.map(str::trim).filter(|k| !k.is_empty());
    let signer = signer.map(str::trim).filter(|s| !s.is_empty());

    match (private_key, signer) {
        (Some(key), signer) => {
            let local = LocalSigner::from_hex(key)
                .map_err(|e| ApiError::Config(format!("Invalid LEDGER_PRIVATE_KEY: {e}")))?;
            if let Some(signer) = signer {
                if !signer.eq_ignore_ascii_case(local.address()) {
                    return Err(ApiError::Config(
                        "LEDGER_SIGNER does not match LEDGER_PRIVATE_KEY".to_string(),
                    ));
                }
            }
            Ok((local.address().to_string(), Some(local)))
        }
        (None, Some(signer)) if is_eth_address(signer) => Ok((signer.to_string(), None)),
        (None, Some(_)) => Err(ApiError::Config("Invalid LEDGER_SIGNER".to_string())),
        (None, None) => Err(ApiError::Config(
            "LEDGER_PRIVATE_KEY or LEDGER_SIGNER environment variable is required".to_string(),
        )),
    }
}

/// `0x` followed by 40 hex characters.
pub fn is_eth_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .map(|h| h.len() == 40 && hex::decode(h).is_ok())
        .unwrap_or(false)
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ApiError::Config(format!("Missing env var: {key}")))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ApiError::Config(format!("Invalid {key}")))
}
