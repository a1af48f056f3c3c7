//! Runtime knobs, read from `ENSAGG_*` environment variables and overridable by callers.

use std::time::Duration;

use ensagg_metadata::Operation;
use ensagg_result::{Error, Result};

use crate::retry::Backoff;

pub const ENV_FETCH_CONCURRENCY: &str = "ENSAGG_FETCH_CONCURRENCY";
pub const ENV_UPLOAD_CONCURRENCY: &str = "ENSAGG_UPLOAD_CONCURRENCY";
pub const ENV_FETCH_ATTEMPTS: &str = "ENSAGG_FETCH_ATTEMPTS";
pub const ENV_UPLOAD_ATTEMPTS: &str = "ENSAGG_UPLOAD_ATTEMPTS";
pub const ENV_STATS_THREADS: &str = "ENSAGG_STATS_THREADS";
pub const ENV_PAGE_SIZE: &str = "ENSAGG_PAGE_SIZE";
pub const ENV_KEEP_GRAND_AGGREGATION: &str = "ENSAGG_KEEP_GRAND_AGGREGATION";

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Realization fetches in flight at once.
    pub fetch_concurrency: usize,
    /// Artifact uploads in flight at once.
    pub upload_concurrency: usize,
    /// Attempts per realization fetch, including the first.
    pub fetch_attempts: u32,
    /// Attempts per artifact upload; `None` retries transient failures forever.
    pub upload_attempts: Option<u32>,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Statistics pool size; 0 uses every available core.
    pub stats_threads: usize,
    /// Search page size.
    pub page_size: usize,
    /// Also upload the unified table as one `aggregated` collection artifact.
    pub keep_grand_aggregation: bool,
    pub statistics: Vec<Operation>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 16,
            upload_concurrency: 16,
            fetch_attempts: 3,
            upload_attempts: None,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(10),
            stats_threads: 0,
            page_size: 1000,
            keep_grand_aggregation: false,
            statistics: Operation::STATISTICS.to_vec(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by whichever `ENSAGG_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_usize(&lookup, ENV_FETCH_CONCURRENCY)? {
            config.fetch_concurrency = v;
        }
        if let Some(v) = parse_usize(&lookup, ENV_UPLOAD_CONCURRENCY)? {
            config.upload_concurrency = v;
        }
        if let Some(v) = parse_usize(&lookup, ENV_FETCH_ATTEMPTS)? {
            config.fetch_attempts = to_attempts(v, ENV_FETCH_ATTEMPTS)?;
        }
        if let Some(raw) = lookup(ENV_UPLOAD_ATTEMPTS) {
            let raw = raw.trim();
            config.upload_attempts = match raw {
                "" | "0" | "unbounded" => None,
                _ => Some(to_attempts(
                    parse_number(raw, ENV_UPLOAD_ATTEMPTS)?,
                    ENV_UPLOAD_ATTEMPTS,
                )?),
            };
        }
        if let Some(v) = parse_usize(&lookup, ENV_STATS_THREADS)? {
            config.stats_threads = v;
        }
        if let Some(v) = parse_usize(&lookup, ENV_PAGE_SIZE)? {
            config.page_size = v;
        }
        if let Some(raw) = lookup(ENV_KEEP_GRAND_AGGREGATION) {
            config.keep_grand_aggregation = match raw.trim() {
                "1" | "true" | "TRUE" | "yes" | "YES" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "NO" | "off" | "" => false,
                other => {
                    return Err(Error::InvalidArgumentError(format!(
                        "{ENV_KEEP_GRAND_AGGREGATION}: expected a boolean, got {other:?}"
                    )));
                }
            };
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_concurrency == 0 {
            return Err(Error::InvalidArgumentError(format!(
                "{ENV_FETCH_CONCURRENCY} must be at least 1"
            )));
        }
        if self.upload_concurrency == 0 {
            return Err(Error::InvalidArgumentError(format!(
                "{ENV_UPLOAD_CONCURRENCY} must be at least 1"
            )));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidArgumentError(format!(
                "{ENV_PAGE_SIZE} must be at least 1"
            )));
        }
        if self.fetch_attempts == 0 {
            return Err(Error::InvalidArgumentError(format!(
                "{ENV_FETCH_ATTEMPTS} must be at least 1"
            )));
        }
        if let Some(op) = self.statistics.iter().find(|op| !op.is_statistic()) {
            return Err(Error::InvalidArgumentError(format!(
                "{op} is not a statistic"
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.retry_base_delay, self.retry_max_delay)
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| parse_number(raw.trim(), key))
        .transpose()
}

fn parse_number(raw: &str, key: &str) -> Result<usize> {
    raw.replace('_', "")
        .parse::<usize>()
        .map_err(|e| Error::InvalidArgumentError(format!("{key}: {raw:?} is not a count ({e})")))
}

fn to_attempts(value: usize, key: &str) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| Error::InvalidArgumentError(format!("{key} must be between 1 and {}", u32::MAX)))
}
