use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://rating.vsuet.ru/web/Ved/Default.aspx";
const ENV_PREFIX: &str = "VED";

/// Runtime settings: defaults overridden by `VED_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub db_path: PathBuf,
    pub fetch_timeout_secs: u64,
    pub check_timeout_secs: u64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub concurrency: usize,
    pub min_body_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: DEFAULT_BASE_URL.to_string(),
            db_path: PathBuf::from("data/vedomosti.sqlite"),
            fetch_timeout_secs: 20,
            check_timeout_secs: 10,
            retries: 3,
            backoff_ms: 2000,
            concurrency: 4,
            min_body_chars: 100,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let d = Settings::default();
        let settings: Settings = Config::builder()
            .set_default("base_url", d.base_url)?
            .set_default("db_path", d.db_path.to_string_lossy().to_string())?
            .set_default("fetch_timeout_secs", d.fetch_timeout_secs as i64)?
            .set_default("check_timeout_secs", d.check_timeout_secs as i64)?
            .set_default("retries", d.retries as i64)?
            .set_default("backoff_ms", d.backoff_ms as i64)?
            .set_default("concurrency", d.concurrency as i64)?
            .set_default("min_body_chars", d.min_body_chars as i64)?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings.clamped())
    }

    /// Keep the worker pool polite towards the portal.
    fn clamped(mut self) -> Self {
        self.concurrency = self.concurrency.clamp(1, 8);
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
