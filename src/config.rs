use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::api::bitso::BITSO_API_BASE;
use crate::api::pushover::PUSHOVER_API_BASE;
use crate::api::sheets::SHEETS_API_BASE;
use crate::execution::scheduler::{DEFAULT_INTERVAL_SECS, DEFAULT_MAX_SLICE_SECS, DEFAULT_OFFSET_SECS};

const SETTINGS_FILE: &str = "Settings";
const ENV_PREFIX: &str = "SCALPWATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerSource {
    Sheets,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub source: LedgerSource,
    pub spreadsheet_id: String,
    pub range: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub base_url: String,
    pub csv_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub base_url: String,
    pub book: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Skip the network and report this price (dry runs)
    pub fixed_price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Without a token notifications are only logged
    pub app_token: Option<String>,
    pub user_key: String,
    pub base_url: String,
    pub deep_link: String,
    pub deep_link_label: String,
    pub trade_log_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub interval_secs: i64,
    pub offset_secs: i64,
    pub max_sleep_slice_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: String,
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub feed: FeedConfig,
    pub notify: NotifyConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Defaults, then `Settings.{toml,yaml,...}` if present, then `SCALPWATCH__*` env vars
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(
            Config::builder()
                .add_source(File::with_name(SETTINGS_FILE).required(false))
                .add_source(Environment::with_prefix(ENV_PREFIX).separator("__")),
        )
    }

    /// Defaults overlaid with a TOML document
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: AppConfig = with_defaults(builder)?.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.source == LedgerSource::Sheets && self.ledger.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ledger.spreadsheet_id is required for the sheets source".to_string(),
            ));
        }
        if self.ledger.source == LedgerSource::Csv && self.ledger.csv_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ledger.csv_path is required for the csv source".to_string(),
            ));
        }
        if self.schedule.interval_secs <= 0 {
            return Err(ConfigError::Invalid(
                "schedule.interval_secs must be positive".to_string(),
            ));
        }
        if self.schedule.offset_secs.abs() >= self.schedule.interval_secs {
            return Err(ConfigError::Invalid(
                "schedule.offset_secs must be smaller than the interval".to_string(),
            ));
        }
        if self.schedule.max_sleep_slice_secs == 0
            || self.schedule.max_sleep_slice_secs > DEFAULT_MAX_SLICE_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "schedule.max_sleep_slice_secs must be between 1 and {}",
                DEFAULT_MAX_SLICE_SECS
            )));
        }
        if self.feed.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "feed.max_retries must be at least 1".to_string(),
            ));
        }
        if self.notify.app_token.is_some() && self.notify.user_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "notify.user_key is required when notify.app_token is set".to_string(),
            ));
        }
        self.fixed_price()?;
        Ok(())
    }

    /// Parsed `feed.fixed_price`, if configured
    pub fn fixed_price(&self) -> Result<Option<Decimal>, ConfigError> {
        self.feed
            .fixed_price
            .as_deref()
            .map(|raw| {
                Decimal::from_str(raw.trim()).map_err(|_| {
                    ConfigError::Invalid(format!("feed.fixed_price '{}' is not a number", raw))
                })
            })
            .transpose()
    }
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    builder
        .set_default("ledger.source", "sheets")?
        .set_default("ledger.spreadsheet_id", "")?
        .set_default("ledger.range", "Sheet1")?
        .set_default("ledger.base_url", SHEETS_API_BASE)?
        .set_default("ledger.csv_path", "ledger.csv")?
        .set_default("feed.base_url", BITSO_API_BASE)?
        .set_default("feed.book", "btc_usd")?
        .set_default("feed.timeout_secs", 10)?
        .set_default("feed.max_retries", 3)?
        .set_default("feed.retry_delay_secs", 5)?
        .set_default("notify.user_key", "")?
        .set_default("notify.base_url", PUSHOVER_API_BASE)?
        .set_default("notify.deep_link", "chivo://")?
        .set_default("notify.deep_link_label", "Open Chivo Wallet")?
        .set_default("notify.trade_log_url", "https://docs.google.com/forms")?
        .set_default("schedule.interval_secs", DEFAULT_INTERVAL_SECS)?
        .set_default("schedule.offset_secs", DEFAULT_OFFSET_SECS)?
        .set_default("schedule.max_sleep_slice_secs", DEFAULT_MAX_SLICE_SECS as i64)?
        .set_default("logging.filter", "scalpwatch=info")?
        .set_default("logging.directory", ".")?
        .set_default("logging.file", "scalpwatch.log")
}
