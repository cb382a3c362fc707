use std::path::PathBuf;
use std::time::Duration;

use catsync_core::SyncFlavor;
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub provider_base_url: String,
    pub provider_api_key: String,
    pub price_scope: String,
    pub source: String,
    pub partner_ref: Option<String>,
    pub affiliate_template: String,
    pub events_region: String,
    pub attractions_region: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub page_delay: Duration,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub default_timezone: Tz,
    pub rules_path: Option<PathBuf>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            provider_api_key: required("CATALOG_PROVIDER_API_KEY")?,
            provider_base_url: get("CATALOG_PROVIDER_BASE_URL")
                .unwrap_or_else(|| "https://api.platinumlist.net/v/7".to_string()),
            price_scope: get("CATALOG_PRICE_SCOPE").unwrap_or_else(|| "price".to_string()),
            source: get("CATALOG_SOURCE").unwrap_or_else(|| "platinumlist".to_string()),
            partner_ref: get("CATALOG_PARTNER_REF"),
            affiliate_template: get("CATALOG_AFFILIATE_TEMPLATE").unwrap_or_else(|| {
                catsync_adapters::transform::DEFAULT_AFFILIATE_TEMPLATE.to_string()
            }),
            events_region: get("CATALOG_EVENTS_REGION").unwrap_or_else(|| "dubai".to_string()),
            attractions_region: get("CATALOG_ATTRACTIONS_REGION")
                .unwrap_or_else(|| "dubai".to_string()),
            page_size: parse_positive("CATALOG_PAGE_SIZE", get("CATALOG_PAGE_SIZE"), 50)?,
            max_pages: parse_positive("CATALOG_MAX_PAGES", get("CATALOG_MAX_PAGES"), 100)?,
            page_delay: Duration::from_millis(parse_number(
                "CATALOG_PAGE_DELAY_MS",
                get("CATALOG_PAGE_DELAY_MS"),
                500,
            )?),
            http_timeout_secs: parse_number(
                "CATALOG_HTTP_TIMEOUT_SECS",
                get("CATALOG_HTTP_TIMEOUT_SECS"),
                20,
            )?,
            user_agent: get("CATALOG_USER_AGENT").unwrap_or_else(|| "catsync/0.1".to_string()),
            default_timezone: match get("CATALOG_DEFAULT_TIMEZONE") {
                Some(name) => name.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                    key: "CATALOG_DEFAULT_TIMEZONE",
                    value: name.clone(),
                    reason: e.to_string(),
                })?,
                None => chrono_tz::Asia::Dubai,
            },
            rules_path: get("CATALOG_RULES_PATH").map(PathBuf::from),
        })
    }

    pub fn region_for(&self, flavor: SyncFlavor) -> &str {
        match flavor {
            SyncFlavor::Events => &self.events_region,
            SyncFlavor::Attractions => &self.attractions_region,
        }
    }
}

fn parse_number<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_positive(key: &'static str, value: Option<String>, default: u32) -> Result<u32, ConfigError> {
    let parsed = parse_number(key, value, default)?;
    if parsed == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(parsed)
}
