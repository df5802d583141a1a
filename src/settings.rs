use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use tracing::warn;

use crate::error::{IngestError, Result};

pub const ENV_PREFIX: &str = "AQI";
pub const CONFIG_FILE: &str = "aqi_ingest";
pub const DEFAULT_API_BASE: &str = "https://api.data.gov.in/resource";
pub const DEFAULT_DATABASE_PATH: &str = "data/aqi.sqlite";

/// Server-side exact-match filters, sent as `filters[<field>]=<value>`.
pub type Filters = BTreeMap<String, String>;

#[derive(Deserialize)]
struct RawSettings {
    api_key: String,
    resource_id: String,
    api_base: String,
    database_path: PathBuf,
    page_limit: u32,
    polite_delay_ms: u64,
    max_pages: Option<u32>,
    request_timeout_secs: u64,
}

/// Everything the ingest core needs, resolved once at startup.
#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub resource_id: String,
    pub api_base: String,
    pub database_path: PathBuf,
    pub page_limit: NonZeroU32,
    pub polite_delay: Duration,
    pub max_pages: Option<NonZeroU32>,
    pub request_timeout: Duration,
}

impl Settings {
    /// Defaults, then `aqi_ingest.toml` if present, then `.env` and `AQI_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("Ignoring unreadable .env file: {}", e);
            }
        }
        let cfg = defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: Config) -> Result<Self> {
        let raw: RawSettings = cfg.try_deserialize()?;
        Self::try_from(raw)
    }

    /// `{api_base}/{resource_id}` with no doubled slash.
    pub fn resource_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            self.resource_id.trim_start_matches('/')
        )
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("api_base", DEFAULT_API_BASE)?
        .set_default("database_path", DEFAULT_DATABASE_PATH)?
        .set_default("page_limit", 1000)?
        .set_default("polite_delay_ms", 200)?
        .set_default("request_timeout_secs", 30)?)
}

impl TryFrom<RawSettings> for Settings {
    type Error = IngestError;

    fn try_from(raw: RawSettings) -> Result<Self> {
        let api_key = required("api_key", raw.api_key)?;
        let resource_id = required("resource_id", raw.resource_id)?;
        let api_base = required("api_base", raw.api_base)?;
        let page_limit = NonZeroU32::new(raw.page_limit)
            .ok_or_else(|| IngestError::Config("page_limit must be greater than 0".into()))?;
        let max_pages = match raw.max_pages {
            Some(n) => Some(
                NonZeroU32::new(n)
                    .ok_or_else(|| IngestError::Config("max_pages must be at least 1 when set".into()))?,
            ),
            None => None,
        };
        if raw.request_timeout_secs == 0 {
            return Err(IngestError::Config("request_timeout_secs must be greater than 0".into()));
        }
        Ok(Settings {
            api_key,
            resource_id,
            api_base,
            database_path: raw.database_path,
            page_limit,
            polite_delay: Duration::from_millis(raw.polite_delay_ms),
            max_pages,
            request_timeout: Duration::from_secs(raw.request_timeout_secs),
        })
    }
}

fn required(name: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(IngestError::Config(format!(
            "{} is required (set {}_{})",
            name,
            ENV_PREFIX,
            name.to_uppercase()
        )));
    }
    Ok(trimmed.to_string())
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("resource_id", &self.resource_id)
            .field("api_base", &self.api_base)
            .field("database_path", &self.database_path)
            .field("page_limit", &self.page_limit)
            .field("polite_delay", &self.polite_delay)
            .field("max_pages", &self.max_pages)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Parse a `field=value` CLI filter.
pub fn parse_filter(s: &str) -> std::result::Result<(String, String), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{}'", s))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("filter field is empty in '{}'", s));
    }
    Ok((field.to_string(), value.trim().to_string()))
}
