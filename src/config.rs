//! Process configuration.
//!
//! Everything comes from the environment at startup: the bot credential,
//! the Bot API base URL, verification timing, and the abuse-filter
//! blacklists (comma-separated lists). Blacklists can be rebuilt later
//! and swapped into the filter as a whole snapshot.

use std::collections::HashSet;
use std::env;

use thiserror::Error;

use crate::filter::BlacklistConfig;
use crate::gateway::TELEGRAM_DEFAULT_API_BASE_URL;

/// Default seconds before an unanswered challenge times out.
const DEFAULT_IDLE_SECONDS: u64 = 120;
/// Default seconds between reaper sweeps.
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 15;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub api_base_url: String,
    pub idle_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub blacklists: BlacklistConfig,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = env::var("BOT_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                var: "BOT_TOKEN".to_string(),
            })?;

        let api_base_url = env::var("TELEGRAM_API_BASE")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| TELEGRAM_DEFAULT_API_BASE_URL.to_string());

        Ok(Self {
            bot_token,
            api_base_url,
            idle_seconds: parse_seconds("IDLE_SECONDS", DEFAULT_IDLE_SECONDS)?,
            sweep_interval_seconds: parse_seconds(
                "SWEEP_INTERVAL_SECONDS",
                DEFAULT_SWEEP_INTERVAL_SECONDS,
            )?,
            blacklists: blacklists_from_env(),
        })
    }
}

/// Build the blacklist snapshot from the `BLACKLIST_*` variables. Usable
/// on its own for reloads.
pub fn blacklists_from_env() -> BlacklistConfig {
    BlacklistConfig {
        user_ids: parse_id_list(&env::var("BLACKLIST_ID").unwrap_or_default()),
        names: parse_str_list(&env::var("BLACKLIST_NAME").unwrap_or_default()),
        emoji_sets: parse_str_list(&env::var("BLACKLIST_EMOJI").unwrap_or_default())
            .into_iter()
            .collect(),
        sticker_sets: parse_str_list(&env::var("BLACKLIST_STICKER").unwrap_or_default())
            .into_iter()
            .collect(),
        keywords: parse_str_list(&env::var("BLACKLIST_MESSAGE").unwrap_or_default()),
    }
}

fn parse_seconds(var: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                message: format!("expected a positive integer, got {raw:?}"),
            })
        }
        _ => Ok(default),
    }
}

/// Parse a comma-separated list of integer ids, skipping blanks.
fn parse_id_list(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// Parse a comma-separated list of strings, skipping blanks.
fn parse_str_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
