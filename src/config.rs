//! Client configuration.
//!
//! Values come from `DINETRACK_*` environment variables with fallbacks; a bad
//! value is logged and replaced by its default rather than aborting startup.

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::models::LOW_STOCK_THRESHOLD;

const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Kitchen screens poll near-real-time.
const DEFAULT_KITCHEN_POLL_MS: u64 = 2_000;
const DEFAULT_DASHBOARD_POLL_MS: u64 = 30_000;
const DEFAULT_ACTIVITY_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway base URL including any `/api` prefix, without trailing slash.
    pub base_url: String,
    pub timeout: Duration,
    pub kitchen_poll_interval: Duration,
    pub dashboard_poll_interval: Duration,
    pub low_stock_threshold: u32,
    pub activity_limit: usize,
    /// Overrides the platform log directory.
    pub log_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.as_ref()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            kitchen_poll_interval: Duration::from_millis(DEFAULT_KITCHEN_POLL_MS),
            dashboard_poll_interval: Duration::from_millis(DEFAULT_DASHBOARD_POLL_MS),
            low_stock_threshold: LOW_STOCK_THRESHOLD,
            activity_limit: DEFAULT_ACTIVITY_LIMIT,
            log_dir: None,
        }
    }

    /// Load from `DINETRACK_*` environment variables.
    pub fn from_env() -> Self {
        let base_url = var("DINETRACK_API_URL").unwrap_or_else(|_| {
            info!("DINETRACK_API_URL not set, using default: {DEFAULT_BASE_URL}");
            DEFAULT_BASE_URL.to_string()
        });

        let mut config = Self::new(base_url)
            .with_timeout(Duration::from_secs(try_load(
                "DINETRACK_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )))
            .with_kitchen_poll_interval(Duration::from_millis(try_load(
                "DINETRACK_KITCHEN_POLL_MS",
                DEFAULT_KITCHEN_POLL_MS,
            )))
            .with_dashboard_poll_interval(Duration::from_millis(try_load(
                "DINETRACK_DASHBOARD_POLL_MS",
                DEFAULT_DASHBOARD_POLL_MS,
            )))
            .with_low_stock_threshold(try_load(
                "DINETRACK_LOW_STOCK_THRESHOLD",
                LOW_STOCK_THRESHOLD,
            ))
            .with_activity_limit(try_load("DINETRACK_ACTIVITY_LIMIT", DEFAULT_ACTIVITY_LIMIT));

        if let Ok(dir) = var("DINETRACK_LOG_DIR") {
            config = config.with_log_dir(dir);
        }
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    pub fn with_kitchen_poll_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("kitchen poll interval of zero ignored");
        } else {
            self.kitchen_poll_interval = interval;
        }
        self
    }

    pub fn with_dashboard_poll_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("dashboard poll interval of zero ignored");
        } else {
            self.dashboard_poll_interval = interval;
        }
        self
    }

    pub fn with_low_stock_threshold(mut self, threshold: u32) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    pub fn with_activity_limit(mut self, limit: usize) -> Self {
        self.activity_limit = limit;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Normalise the Gateway URL. Endpoint paths are relative to the `/api`
/// prefix, so it is kept when present and added to a bare host.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let mut url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
        format!("http://{trimmed}")
    } else {
        format!("https://{trimmed}")
    };

    let has_path = url
        .split_once("://")
        .map(|(_, rest)| rest.contains('/'))
        .unwrap_or(false);
    if !has_path {
        url.push_str("/api");
    }
    url
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}; using default: {default}");
            default
        }),
        Err(()) => default,
    }
}
