//! Retry policy loaded from JSON.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::{
    Backoff, ErrorKind, ExponentialBackoff, FibonacciBackoff, JitterBackoff, ListBackoff,
    RandomBackoff, RetryOptions,
};

/// Backoff strategy and its parameters. Times are in seconds; missing
/// parameters take the strategy's defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Exponential {
        start_timeout: Option<f64>,
        max_timeout: Option<f64>,
        factor: Option<f64>,
    },
    Random {
        min_timeout: Option<f64>,
        max_timeout: Option<f64>,
    },
    List {
        timeouts: Vec<f64>,
    },
    Fibonacci {
        multiplier: Option<f64>,
        max_timeout: Option<f64>,
    },
    Jitter {
        start_timeout: Option<f64>,
        max_timeout: Option<f64>,
        factor: Option<f64>,
        random_interval_size: Option<f64>,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Exponential {
            start_timeout: None,
            max_timeout: None,
            factor: None,
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::Config(format!("{} must be a non-negative number of seconds: {}", name, e)))
}

fn seconds_or(name: &str, value: Option<f64>, default: Duration) -> Result<Duration> {
    value.map_or(Ok(default), |v| seconds(name, v))
}

fn exponential(
    start_timeout: Option<f64>,
    max_timeout: Option<f64>,
    factor: Option<f64>,
) -> Result<ExponentialBackoff> {
    let default = ExponentialBackoff::default();
    Ok(ExponentialBackoff::new(
        seconds_or("start_timeout", start_timeout, default.start_timeout)?,
        seconds_or("max_timeout", max_timeout, default.max_timeout)?,
        factor.unwrap_or(default.factor),
    ))
}

impl StrategyConfig {
    /// Builds the wait strategy this section describes.
    pub fn into_backoff(self) -> Result<Backoff> {
        let backoff = match self {
            StrategyConfig::Exponential {
                start_timeout,
                max_timeout,
                factor,
            } => exponential(start_timeout, max_timeout, factor)?.into(),
            StrategyConfig::Random {
                min_timeout,
                max_timeout,
            } => {
                let default = RandomBackoff::default();
                RandomBackoff::new(
                    seconds_or("min_timeout", min_timeout, default.min_timeout)?,
                    seconds_or("max_timeout", max_timeout, default.max_timeout)?,
                )
                .into()
            }
            StrategyConfig::List { timeouts } => {
                let timeouts = timeouts
                    .into_iter()
                    .map(|t| seconds("timeouts", t))
                    .collect::<Result<Vec<_>>>()?;
                ListBackoff::new(timeouts)?.into()
            }
            StrategyConfig::Fibonacci {
                multiplier,
                max_timeout,
            } => {
                let default = FibonacciBackoff::default();
                FibonacciBackoff::new(
                    multiplier.unwrap_or(default.multiplier),
                    seconds_or("max_timeout", max_timeout, default.max_timeout)?,
                )
                .into()
            }
            StrategyConfig::Jitter {
                start_timeout,
                max_timeout,
                factor,
                random_interval_size,
            } => {
                let default = JitterBackoff::default();
                JitterBackoff::new(
                    exponential(start_timeout, max_timeout, factor)?,
                    random_interval_size.unwrap_or(default.random_interval_size),
                )
                .into()
            }
        };
        Ok(backoff)
    }
}

/// Retry settings as stored in a configuration file.
///
/// ```json
/// {
///   "strategy": { "type": "exponential", "start_timeout": 0.5 },
///   "attempts": 5,
///   "statuses": [429],
///   "exceptions": ["connect", "timeout"]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub statuses: Vec<u16>,
    #[serde(default)]
    pub exceptions: Vec<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_all_server_errors: Option<bool>,
    #[serde(default)]
    pub raise_for_status: bool,
}

impl RetryConfig {
    #[tracing::instrument]
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parses settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Builds the policy. Attempts default to the strategy's own default
    /// (the list length for a list strategy).
    pub fn into_options(self) -> Result<RetryOptions> {
        let mut options = RetryOptions::new(self.strategy.into_backoff()?)
            .with_statuses(self.statuses)
            .with_exceptions(self.exceptions);

        if let Some(attempts) = self.attempts {
            options = options.with_attempts(attempts);
        }
        if let Some(methods) = self.methods {
            let methods = methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                        .map_err(|_| Error::Config(format!("invalid HTTP method '{}'", m)))
                })
                .collect::<Result<Vec<_>>>()?;
            options = options.with_methods(methods);
        }
        if let Some(retry) = self.retry_all_server_errors {
            options = options.with_retry_all_server_errors(retry);
        }

        Ok(options)
    }
}
