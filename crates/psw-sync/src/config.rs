//! Configuration management
//!
//! Everything is read from the environment (after loading `.env`). Store and API
//! credentials are optional at load time; each job checks the ones it needs when it
//! starts, so `psw-sync run countries` works without a Börsdata key.

use crate::engine::settings::{
    Backoff, EngineSettings, RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BASE_DELAY_MS,
};
use crate::error::SyncError;
use crate::sources::fx_rates::{parse_currency_pairs, CurrencyPair};
use crate::sources::kpi::{parse_kpi_combinations, KpiCombination};
use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_BORSDATA_BASE_URL: &str = "https://apiservice.borsdata.se";
pub const DEFAULT_FREECURRENCYAPI_BASE_URL: &str = "https://api.freecurrencyapi.com";
pub const DEFAULT_RESTCOUNTRIES_BASE_URL: &str = "https://restcountries.com";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("psw-sync/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: DEFAULT_DB_PORT,
            username: None,
            password: None,
            database: None,
            connect_timeout: Duration::from_secs(DEFAULT_DB_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl DatabaseSettings {
    /// Build connection options; `DATABASE_URL` wins over the individual parameters
    pub fn connect_options(&self) -> Result<PgConnectOptions, String> {
        if let Some(url) = &self.url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| format!("invalid DATABASE_URL: {}", e));
        }

        let missing: Vec<&str> = [
            ("DB_HOST", &self.host),
            ("DB_USERNAME", &self.username),
            ("DB_PASSWORD", &self.password),
            ("DB_MARKETDATA", &self.database),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(key, _)| key)
        .collect();

        match (&self.host, &self.username, &self.password, &self.database) {
            (Some(host), Some(username), Some(password), Some(database)) => Ok(PgConnectOptions::new()
                .host(host)
                .port(self.port)
                .username(username)
                .password(password)
                .database(database)),
            _ => Err(format!(
                "missing database configuration: {} (or set DATABASE_URL)",
                missing.join(", ")
            )),
        }
    }

    /// Connection target without credentials, for logs
    pub fn describe(&self) -> String {
        if let Some(url) = &self.url {
            return match url.rsplit_once('@') {
                Some((_, target)) => target.to_string(),
                None => "DATABASE_URL".to_string(),
            };
        }
        format!(
            "{}:{}/{}",
            self.host.as_deref().unwrap_or("?"),
            self.port,
            self.database.as_deref().unwrap_or("?")
        )
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("target", &self.describe())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct ApiSettings {
    pub borsdata_api_key: Option<String>,
    pub borsdata_base_url: String,
    pub freecurrency_api_key: Option<String>,
    pub freecurrency_base_url: String,
    pub restcountries_base_url: String,
    pub kpi_combinations: Vec<KpiCombination>,
    pub currency_pairs: Vec<CurrencyPair>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            borsdata_api_key: None,
            borsdata_base_url: DEFAULT_BORSDATA_BASE_URL.to_string(),
            freecurrency_api_key: None,
            freecurrency_base_url: DEFAULT_FREECURRENCYAPI_BASE_URL.to_string(),
            restcountries_base_url: DEFAULT_RESTCOUNTRIES_BASE_URL.to_string(),
            kpi_combinations: KpiCombination::defaults(),
            currency_pairs: CurrencyPair::defaults(),
        }
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "***");
        f.debug_struct("ApiSettings")
            .field("borsdata_api_key", &redact(&self.borsdata_api_key))
            .field("borsdata_base_url", &self.borsdata_base_url)
            .field("freecurrency_api_key", &redact(&self.freecurrency_api_key))
            .field("freecurrency_base_url", &self.freecurrency_base_url)
            .field("restcountries_base_url", &self.restcountries_base_url)
            .field("kpi_combinations", &self.kpi_combinations.len())
            .field("currency_pairs", &self.currency_pairs.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_HTTP_CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Full sync configuration
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub database: DatabaseSettings,
    pub api: ApiSettings,
    pub http: HttpSettings,
    pub engine: EngineSettings,
}

impl SyncConfig {
    /// Load `.env`, then read the process environment
    pub fn load() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database = DatabaseSettings {
            url: get("DATABASE_URL"),
            host: get("DB_HOST"),
            port: parse_or(&get, "DB_PORT", DEFAULT_DB_PORT)?,
            username: get("DB_USERNAME"),
            password: get("DB_PASSWORD"),
            database: get("DB_MARKETDATA"),
            connect_timeout: Duration::from_secs(parse_or(
                &get,
                "DB_CONNECT_TIMEOUT_SECS",
                DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            )?),
        };

        let api = ApiSettings {
            borsdata_api_key: get("BORSDATA_API_KEY"),
            borsdata_base_url: get("BORSDATA_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BORSDATA_BASE_URL.to_string()),
            freecurrency_api_key: get("FREECURRENCYAPI_KEY"),
            freecurrency_base_url: get("FREECURRENCYAPI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_FREECURRENCYAPI_BASE_URL.to_string()),
            restcountries_base_url: get("RESTCOUNTRIES_BASE_URL")
                .unwrap_or_else(|| DEFAULT_RESTCOUNTRIES_BASE_URL.to_string()),
            kpi_combinations: match get("BORSDATA_KPI_COMBINATIONS") {
                Some(raw) => parse_kpi_combinations(&raw)
                    .map_err(|e| SyncError::config(format!("BORSDATA_KPI_COMBINATIONS: {}", e)))?,
                None => KpiCombination::defaults(),
            },
            currency_pairs: match get("FX_CURRENCY_PAIRS") {
                Some(raw) => parse_currency_pairs(&raw)
                    .map_err(|e| SyncError::config(format!("FX_CURRENCY_PAIRS: {}", e)))?,
                None => CurrencyPair::defaults(),
            },
        };

        let http = HttpSettings {
            timeout: Duration::from_secs(parse_or(&get, "SYNC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?),
            connect_timeout: Duration::from_secs(parse_or(
                &get,
                "SYNC_HTTP_CONNECT_TIMEOUT_SECS",
                DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            )?),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        };

        let engine = EngineSettings {
            batch_size: parse_or(&get, "SYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            retry: RetryPolicy {
                max_retries: parse_or(&get, "SYNC_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                base_delay: Duration::from_millis(parse_or(
                    &get,
                    "SYNC_RETRY_BASE_DELAY_MS",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                )?),
                backoff: parse_or(&get, "SYNC_BACKOFF", Backoff::Exponential)?,
            },
            min_request_interval: Duration::from_millis(parse_or(&get, "SYNC_MIN_REQUEST_INTERVAL_MS", 0u64)?),
            isolate_failed_rows: parse_or(&get, "SYNC_ISOLATE_FAILED_ROWS", false)?,
        };

        let config = Self {
            database,
            api,
            http,
            engine,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate settings that every job depends on
    pub fn validate(&self) -> Result<(), SyncError> {
        self.engine.validate().map_err(SyncError::Config)?;

        if self.http.timeout.is_zero() {
            return Err(SyncError::config("SYNC_HTTP_TIMEOUT_SECS must be greater than 0"));
        }

        if self.http.connect_timeout > self.http.timeout {
            tracing::warn!(
                connect_timeout_secs = self.http.connect_timeout.as_secs(),
                timeout_secs = self.http.timeout.as_secs(),
                "HTTP connect timeout exceeds request timeout"
            );
        }

        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, SyncError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| SyncError::config(format!("invalid value for {}: '{}' ({})", key, raw, e))),
        None => Ok(default),
    }
}
