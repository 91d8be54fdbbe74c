use crate::Result;
use crate::facts::{RateLimitPolicy, RetryPolicy, TimeWindow, WindowSetting, parse_api_url};
use crate::metrics::Weights;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use core::time::Duration;
use ohno::{IntoAppError, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// File looked up in the working directory when no configuration path is given
pub const DEFAULT_CONFIG_FILE: &str = "contrib-rank.toml";

/// Largest page the API hands out
const MAX_PAGE_SIZE: u8 = 100;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Organizations whose activity is counted
    #[serde(default)]
    pub organizations: Vec<String>,

    /// Identities to rank; every organization member when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identities: Option<Vec<String>>,

    /// Only count activity from the last this many months
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<u32>,

    /// Explicit window, preferred over `months`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,

    #[serde(default)]
    pub weights: Weights,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub fetch: FetchSettings,
}

/// How close to the quota the tool is willing to run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitSettings {
    /// Remaining calls at which the tool starts waiting for the quota to reset
    pub reserve: u64,

    pub safety_margin_secs: u64,

    /// Wait used when a response carried no quota information
    pub fallback_delay_secs: u64,

    pub max_wait_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            reserve: 5,
            safety_margin_secs: 5,
            fallback_delay_secs: 60,
            max_wait_secs: 65 * 60,
        }
    }
}

impl RateLimitSettings {
    #[must_use]
    pub const fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            reserve: self.reserve,
            safety_margin: Duration::from_secs(self.safety_margin_secs),
            fallback_delay: Duration::from_secs(self.fallback_delay_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

/// Paging, retries and concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct FetchSettings {
    pub page_size: u8,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_concurrent_pairs: usize,
    pub api_url: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            request_timeout_secs: 30,
            max_concurrent_pairs: 4,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

impl FetchSettings {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Without an explicit path, `contrib-rank.toml` in `base_dir` is used if it exists.
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(DEFAULT_CONFIG_FILE);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Write the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Check the values a TOML file can't express constraints for.
    ///
    /// Organizations may also come from the command line, so an empty list is only rejected
    /// once the run is assembled.
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in self.weights.entries() {
            if !weight.is_finite() || weight < 0.0 {
                bail!("weight '{name}' must be a non-negative number, got {weight}");
            }
        }

        if self.months == Some(0) {
            bail!("months must be at least 1");
        }

        if let Some(window) = self.time_window {
            let _ = TimeWindow::new(window.start, window.end)?;
        }

        if self.fetch.page_size == 0 || self.fetch.page_size > MAX_PAGE_SIZE {
            bail!("fetch.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}", self.fetch.page_size);
        }

        if self.fetch.max_concurrent_pairs == 0 {
            bail!("fetch.max_concurrent_pairs must be at least 1");
        }

        if self.fetch.request_timeout_secs == 0 {
            bail!("fetch.request_timeout_secs must be at least 1");
        }

        if self.rate_limit.safety_margin_secs == 0 {
            bail!("rate_limit.safety_margin_secs must be at least 1");
        }

        if self.rate_limit.max_wait_secs < self.rate_limit.safety_margin_secs {
            bail!(
                "rate_limit.max_wait_secs ({}) must not be less than rate_limit.safety_margin_secs ({})",
                self.rate_limit.max_wait_secs,
                self.rate_limit.safety_margin_secs
            );
        }

        let _ = parse_api_url(&self.fetch.api_url)?;

        Ok(())
    }

    /// How the window activity is counted in is configured.
    ///
    /// `months` from the command line beats the file. In the file, an explicit window beats
    /// `months`. The setting is resolved against `today` once to catch windows reaching
    /// outside the supported date range.
    pub fn window_setting(&self, months_override: Option<u32>, today: NaiveDate) -> Result<WindowSetting> {
        let setting = match (months_override, self.time_window, self.months) {
            (Some(0), _, _) => bail!("months must be at least 1"),
            (Some(months), _, _) => WindowSetting::LastMonths(months),
            (None, Some(window), _) => WindowSetting::Fixed(window),
            (None, None, Some(months)) => WindowSetting::LastMonths(months),
            (None, None, None) => WindowSetting::AllTime,
        };

        let _ = setting.resolve(today)?;
        Ok(setting)
    }
}
