//! Heap configuration.
//!
//! Set programmatically or loaded from environment variables:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SHARDHEAP_PAGE_MIN_SIZE` | Smallest region mapped on growth, in bytes | 4096 |
//! | `SHARDHEAP_PAGE_GRANULARITY` | Region lengths are rounded up to this | 4096 |
//! | `SHARDHEAP_MAX_BACKOFF_US` | Longest sleep when every shard is contended | 1000 |
//! | `SHARDHEAP_LOG_FILE` | Append one line per allocation to this file | unset |

use std::{env, path::PathBuf, time::Duration};

use crate::{
  block::{ALIGNMENT, REGION_OVERHEAD, checked_align_up},
  error::ConfigError,
};

pub const ENV_PAGE_MIN_SIZE: &str = "SHARDHEAP_PAGE_MIN_SIZE";
pub const ENV_PAGE_GRANULARITY: &str = "SHARDHEAP_PAGE_GRANULARITY";
pub const ENV_MAX_BACKOFF_US: &str = "SHARDHEAP_MAX_BACKOFF_US";
pub const ENV_LOG_FILE: &str = "SHARDHEAP_LOG_FILE";

const PAGE_MIN_SIZE: usize = 4096;
const PAGE_GRANULARITY: usize = 4096;
const MAX_BACKOFF: Duration = Duration::from_micros(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Smallest mapping requested from the page provider.
  pub page_min_size: usize,
  /// Mapping lengths are rounded up to a multiple of this.
  pub page_granularity: usize,
  /// Cap on the exponential back-off sleep.
  pub max_backoff: Duration,
  /// Allocation log file. `None` disables the log.
  pub log_path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}

impl Config {
  pub const fn new() -> Self {
    Self {
      page_min_size: PAGE_MIN_SIZE,
      page_granularity: PAGE_GRANULARITY,
      max_backoff: MAX_BACKOFF,
      log_path: None,
    }
  }

  /// Defaults overridden by any `SHARDHEAP_*` variables that are set.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut config = Self::new();
    if let Some(v) = parse_var(ENV_PAGE_MIN_SIZE)? {
      config.page_min_size = v;
    }
    if let Some(v) = parse_var(ENV_PAGE_GRANULARITY)? {
      config.page_granularity = v;
    }
    if let Some(v) = parse_var(ENV_MAX_BACKOFF_US)? {
      config.max_backoff = Duration::from_micros(v as u64);
    }
    if let Some(path) = env::var_os(ENV_LOG_FILE).filter(|p| !p.is_empty()) {
      config.log_path = Some(PathBuf::from(path));
    }
    config.validate()?;
    Ok(config)
  }

  pub fn page_min_size(mut self, bytes: usize) -> Self {
    self.page_min_size = bytes;
    self
  }

  pub fn page_granularity(mut self, bytes: usize) -> Self {
    self.page_granularity = bytes;
    self
  }

  pub fn max_backoff(mut self, max: Duration) -> Self {
    self.max_backoff = max;
    self
  }

  pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.log_path = Some(path.into());
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !self.page_granularity.is_power_of_two() || self.page_granularity < ALIGNMENT {
      return Err(ConfigError::Granularity(self.page_granularity));
    }
    if self.page_min_size % ALIGNMENT != 0 || self.page_min_size <= REGION_OVERHEAD {
      return Err(ConfigError::MinRegion(self.page_min_size));
    }
    Ok(())
  }

  /// Mapping length needed to serve `size` bytes from a fresh region.
  /// `None` when the arithmetic overflows or the length cannot be addressed.
  pub(crate) fn region_len(&self, size: usize) -> Option<usize> {
    let len = checked_align_up(size.checked_add(REGION_OVERHEAD)?, self.page_granularity)?;
    let len = len.max(self.page_min_size);
    (len <= isize::MAX as usize).then_some(len)
  }
}

fn parse_var(var: &'static str) -> Result<Option<usize>, ConfigError> {
  match env::var(var) {
    Ok(value) => value
      .trim()
      .parse()
      .map(Some)
      .map_err(|_| ConfigError::InvalidNumber { var, value }),
    Err(_) => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = Config::default();
    assert_eq!(config, Config::new());
    assert!(config.validate().is_ok());
    assert!(config.log_path.is_none());
  }

  #[test]
  fn rejects_bad_granularity() {
    let config = Config::new().page_granularity(3000);
    assert_eq!(config.validate(), Err(ConfigError::Granularity(3000)));
    let config = Config::new().page_granularity(4);
    assert_eq!(config.validate(), Err(ConfigError::Granularity(4)));
  }

  #[test]
  fn rejects_tiny_or_misaligned_min_region() {
    let config = Config::new().page_min_size(REGION_OVERHEAD);
    assert_eq!(config.validate(), Err(ConfigError::MinRegion(REGION_OVERHEAD)));
    let config = Config::new().page_min_size(4097);
    assert_eq!(config.validate(), Err(ConfigError::MinRegion(4097)));
  }

  #[test]
  fn region_len_rounds_to_granularity() {
    let config = Config::new();
    assert_eq!(config.region_len(0), Some(4096));
    assert_eq!(config.region_len(4096 - REGION_OVERHEAD), Some(4096));
    assert_eq!(config.region_len(4096 - REGION_OVERHEAD + 1), Some(8192));
    assert_eq!(config.region_len(usize::MAX), None);
    assert_eq!(config.region_len(usize::MAX - 4096), None);
    assert_eq!(config.region_len(isize::MAX as usize), None);
  }

  #[test]
  fn region_len_honours_min_size() {
    let config = Config::new().page_min_size(64 * 1024);
    assert_eq!(config.region_len(10), Some(64 * 1024));
    assert_eq!(config.region_len(100 * 1024), Some(104 * 1024));
  }

  #[test]
  fn from_env_reads_and_validates() {
    unsafe {
      env::set_var(ENV_PAGE_MIN_SIZE, "65536");
      env::set_var(ENV_MAX_BACKOFF_US, " 250 ");
      env::set_var(ENV_LOG_FILE, "/tmp/shardheap.log");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.page_min_size, 65536);
    assert_eq!(config.page_granularity, PAGE_GRANULARITY);
    assert_eq!(config.max_backoff, Duration::from_micros(250));
    assert_eq!(config.log_path, Some(PathBuf::from("/tmp/shardheap.log")));

    unsafe { env::set_var(ENV_PAGE_GRANULARITY, "lots") };
    assert_eq!(
      Config::from_env(),
      Err(ConfigError::InvalidNumber {
        var: ENV_PAGE_GRANULARITY,
        value: "lots".to_owned()
      })
    );

    unsafe { env::set_var(ENV_PAGE_GRANULARITY, "1000") };
    assert_eq!(Config::from_env(), Err(ConfigError::Granularity(1000)));

    unsafe {
      for var in [ENV_PAGE_MIN_SIZE, ENV_PAGE_GRANULARITY, ENV_MAX_BACKOFF_US, ENV_LOG_FILE] {
        env::remove_var(var);
      }
    }
  }
}
