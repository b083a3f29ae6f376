/// Configuration loading from TOML file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data::PeriodPlanner;
use crate::error::{Result, SyncError};
use crate::types::DateStyle;
use crate::utils::{CalendarNormalizer, RateLimiter, RetryPolicy, ROC_OFFSET};

/// Upstream the binary pulls from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Twse,
    TpexOtc,
    TpexEmerging,
    /// TWSE, then the TPEx OTC board, then the emerging board
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    // Planning
    pub lookback_months: u32,
    pub refresh_recent_months: u32,
    pub calendar_offset: i32,

    // Concurrency and politeness
    pub max_concurrency: usize,
    pub rate_limit_per_minute: u32,
    pub limiter_poll_ms: u64,
    pub period_pause_ms: u64,

    // Retry
    pub max_retries: u32,
    pub base_backoff_seconds: f64,
    pub backoff_factor: f64,

    // Source
    pub source: SourceKind,
    pub request_timeout_secs: u64,
    pub user_agents: Vec<String>,

    // Storage
    pub data_dir: PathBuf,
    pub keys_file: PathBuf,
    pub date_style: DateStyle,
    pub report_dir: Option<PathBuf>,

    pub log_format: LogFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            lookback_months: 12,
            refresh_recent_months: 0,
            calendar_offset: ROC_OFFSET,
            max_concurrency: 2,
            rate_limit_per_minute: 50,
            limiter_poll_ms: 200,
            period_pause_ms: 0,
            max_retries: 3,
            base_backoff_seconds: 2.0,
            backoff_factor: 1.5,
            source: SourceKind::Twse,
            request_timeout_secs: 10,
            user_agents: Vec::new(),
            data_dir: PathBuf::from("data"),
            keys_file: PathBuf::from("keys.csv"),
            date_style: DateStyle::Offset,
            report_dir: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs_f64(self.base_backoff_seconds),
            backoff_factor: self.backoff_factor,
        }
    }

    /// Fresh limiter; one per run, shared by every worker
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::per_minute(self.rate_limit_per_minute)
            .with_poll_interval(Duration::from_millis(self.limiter_poll_ms))
    }

    pub fn planner(&self) -> PeriodPlanner {
        PeriodPlanner::new(self.lookback_months, self.refresh_recent_months)
    }

    pub fn calendar(&self) -> CalendarNormalizer {
        CalendarNormalizer::new(self.calendar_offset)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn period_pause(&self) -> Duration {
        Duration::from_millis(self.period_pause_ms)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        SyncError::Config(format!(
            "Failed to read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    let config: SyncConfig = toml::from_str(&content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Upper bound on attempts per period
const MAX_RETRIES: u32 = 20;

pub fn validate_config(config: &SyncConfig) -> Result<()> {
    if config.lookback_months == 0 {
        return Err(SyncError::Config("lookback_months must be >= 1".to_string()));
    }

    if config.refresh_recent_months > config.lookback_months {
        return Err(SyncError::Config(format!(
            "refresh_recent_months ({}) exceeds lookback_months ({})",
            config.refresh_recent_months, config.lookback_months
        )));
    }

    if config.max_concurrency == 0 {
        return Err(SyncError::Config("max_concurrency must be >= 1".to_string()));
    }

    // Rate limiting
    if config.rate_limit_per_minute == 0 {
        return Err(SyncError::Config("rate_limit_per_minute must be >= 1".to_string()));
    }
    if config.limiter_poll_ms == 0 {
        return Err(SyncError::Config("limiter_poll_ms must be >= 1".to_string()));
    }

    // Retry
    if config.max_retries == 0 || config.max_retries > MAX_RETRIES {
        return Err(SyncError::Config(format!(
            "max_retries must be between 1 and {}, got {}",
            MAX_RETRIES, config.max_retries
        )));
    }
    if !config.base_backoff_seconds.is_finite() || config.base_backoff_seconds < 0.0 {
        return Err(SyncError::Config(format!(
            "Invalid base_backoff_seconds: {}",
            config.base_backoff_seconds
        )));
    }
    if !config.backoff_factor.is_finite() || config.backoff_factor < 1.0 {
        return Err(SyncError::Config(format!(
            "Invalid backoff_factor: {} (must be >= 1.0)",
            config.backoff_factor
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(SyncError::Config("request_timeout_secs must be >= 1".to_string()));
    }

    if config.calendar_offset < 0 {
        return Err(SyncError::Config(format!(
            "Invalid calendar_offset: {}",
            config.calendar_offset
        )));
    }

    if config.data_dir.as_os_str().is_empty() {
        return Err(SyncError::Config("data_dir is empty".to_string()));
    }

    Ok(())
}
