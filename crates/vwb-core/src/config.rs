use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_CATALOG_URL: &str = "https://endoflife.date/api/v1/products";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn is_development(&self) -> bool {
        matches!(self, AppEnv::Development)
    }
}

/// Typed configuration, loaded from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub app_env: AppEnv,
    pub telegram_bot_token: String,
    pub database_path: PathBuf,

    // Upstream feed
    pub catalog_url: String,
    pub upstream_timeout: Duration,
    pub upstream_throttle: Duration,

    // Pipeline
    pub pipeline_interval: Duration,
    pub pipeline_timeout: Duration,

    // Telegram limits
    pub telegram_message_limit: usize,
    pub notify_soft_limit: usize,
    pub command_max_len: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (env, map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let app_env = match get("APP_ENV").as_deref() {
            None | Some("") | Some("development") => AppEnv::Development,
            Some("production") => AppEnv::Production,
            Some(other) => {
                return Err(Error::Config(format!("invalid APP_ENV: {other}")));
            }
        };

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let database_path = get("DATABASE_PATH")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("version-watcher.db"));

        let catalog_url = get("CATALOG_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());

        let parse_u64 = |key: &str| get(key).and_then(|s| s.parse::<u64>().ok());
        let parse_usize = |key: &str| get(key).and_then(|s| s.parse::<usize>().ok());

        let upstream_timeout =
            Duration::from_millis(parse_u64("UPSTREAM_TIMEOUT_MS").unwrap_or(10_000));
        let upstream_throttle =
            Duration::from_millis(parse_u64("UPSTREAM_THROTTLE_MS").unwrap_or(100));

        let pipeline_interval = Duration::from_secs(
            parse_u64("PIPELINE_INTERVAL_MINUTES").unwrap_or(15).max(1) * 60,
        );
        let pipeline_timeout =
            Duration::from_secs(parse_u64("PIPELINE_TIMEOUT_SECS").unwrap_or(300).max(1));

        let telegram_message_limit = parse_usize("TELEGRAM_MESSAGE_LIMIT")
            .unwrap_or(4096)
            .max(256);
        let notify_soft_limit = parse_usize("NOTIFY_SOFT_LIMIT")
            .unwrap_or(3500)
            .min(telegram_message_limit);
        let command_max_len = parse_usize("COMMAND_MAX_LEN").unwrap_or(64).max(8);

        Ok(Self {
            app_env,
            telegram_bot_token,
            database_path,
            catalog_url,
            upstream_timeout,
            upstream_throttle,
            pipeline_interval,
            pipeline_timeout,
            telegram_message_limit,
            notify_soft_limit,
            command_max_len,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue; // existing env wins
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
