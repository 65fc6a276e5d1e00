use crate::domain::InstId;
use crate::gateway::OkxCredentials;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Process configuration. Strategy parameters live in the tuning file.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: OkxCredentials,
    pub inst_id: InstId,
    pub td_mode: TdMode,
    pub okx_base_url: String,
    pub simulated: bool,
    pub http_timeout: Duration,
    pub tuning_file: PathBuf,
    pub clord_seed: Option<String>,
    pub status_port: Option<u16>,
    pub run_mode: RunMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdMode {
    Cross,
    Isolated,
}

impl TdMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TdMode::Cross => "cross",
            TdMode::Isolated => "isolated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One startup, control loop and shutdown drain.
    Once,
    /// Restart the run after failures until interrupted.
    Daemon,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be true or false, got {}", other),
        )),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let credentials = OkxCredentials {
            api_key: required(&env_map, "OKX_API_KEY")?,
            secret: required(&env_map, "OKX_API_SECRET")?,
            passphrase: required(&env_map, "OKX_API_PASSPHRASE")?,
        };

        let inst_id = InstId::new(
            env_map
                .get("INST_ID")
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or("ETH-USDT-SWAP"),
        );

        let td_mode = match env_map
            .get("TD_MODE")
            .map(|s| s.as_str())
            .unwrap_or("cross")
        {
            "cross" => TdMode::Cross,
            "isolated" => TdMode::Isolated,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TD_MODE".to_string(),
                    format!("must be cross or isolated, got {}", other),
                ))
            }
        };

        let okx_base_url = env_map
            .get("OKX_BASE_URL")
            .cloned()
            .unwrap_or_else(|| "https://www.okx.com".to_string());

        let simulated = parse_bool(
            "OKX_SIMULATED",
            env_map
                .get("OKX_SIMULATED")
                .map(|s| s.as_str())
                .unwrap_or("true"),
        )?;

        let http_timeout = env_map
            .get("OKX_HTTP_TIMEOUT")
            .map(|s| s.as_str())
            .unwrap_or("10")
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "OKX_HTTP_TIMEOUT".to_string(),
                    "must be a positive number of seconds".to_string(),
                )
            })?;

        let tuning_file = PathBuf::from(
            env_map
                .get("TUNING_FILE")
                .map(|s| s.as_str())
                .unwrap_or("tuning_gvwap.jsonc"),
        );

        let clord_seed = env_map
            .get("CLORD_SEED")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let status_port = match env_map.get("STATUS_PORT").map(|s| s.trim()) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<u16>().map_err(|_| {
                ConfigError::InvalidValue(
                    "STATUS_PORT".to_string(),
                    "must be a valid u16".to_string(),
                )
            })?),
        };

        let run_mode = match env_map
            .get("RUN_MODE")
            .map(|s| s.as_str())
            .unwrap_or("once")
        {
            "once" => RunMode::Once,
            "daemon" => RunMode::Daemon,
            other => {
                return Err(ConfigError::InvalidValue(
                    "RUN_MODE".to_string(),
                    format!("must be once or daemon, got {}", other),
                ))
            }
        };

        Ok(Config {
            credentials,
            inst_id,
            td_mode,
            okx_base_url,
            simulated,
            http_timeout,
            tuning_file,
            clord_seed,
            status_port,
            run_mode,
        })
    }
}
