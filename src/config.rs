use std::env;
use std::time::Duration;

use eyre::{Result, eyre};

use crate::cli::chat::learning_goals::ProgressPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Runtime settings, read from the environment (and `.env`) then
/// overridden by command line flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub history_limit: u32,
    pub connect_timeout: Duration,
    pub progress_policy: ProgressPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            progress_policy: ProgressPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("TUTOR_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(limit) = lookup("TUTOR_HISTORY_LIMIT") {
            config.history_limit = limit
                .parse()
                .map_err(|_| eyre!("TUTOR_HISTORY_LIMIT must be a positive integer, got {:?}", limit))?;
        }

        if let Some(secs) = lookup("TUTOR_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| eyre!("TUTOR_CONNECT_TIMEOUT_SECS must be an integer, got {:?}", secs))?;
            config.connect_timeout = Duration::from_secs(secs);
        }

        if let Some(clamp) = lookup("TUTOR_PROGRESS_CLAMP") {
            config.progress_policy.clamp_to_100 = parse_bool("TUTOR_PROGRESS_CLAMP", &clamp)?;
        }

        if let Some(guard) = lookup("TUTOR_PROGRESS_GUARD") {
            config.progress_policy.guard_repeat = parse_bool("TUTOR_PROGRESS_GUARD", &guard)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(eyre!("{} must be a boolean, got {:?}", key, other)),
    }
}
