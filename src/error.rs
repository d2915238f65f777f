use std::io;

use thiserror::Error;

use crate::block::{ALIGNMENT, REGION_OVERHEAD};

/// Failure at the OS page boundary.
#[derive(Debug, Error)]
pub enum PageError {
  #[error("cannot map {size} bytes")]
  Map {
    size: usize,
    #[source]
    source: io::Error,
  },
  #[error("cannot unmap region at {addr:#x} of {size} bytes")]
  Unmap {
    addr: usize,
    size: usize,
    #[source]
    source: io::Error,
  },
}

/// Why a locked shard could not satisfy a request. Surfaced as a null pointer.
#[derive(Debug, Error)]
pub enum AllocError {
  #[error("request of {size} bytes exceeds the addressable range")]
  TooLarge { size: usize },
  #[error(transparent)]
  Page(#[from] PageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("{var}: expected an unsigned integer, got {value:?}")]
  InvalidNumber { var: &'static str, value: String },
  #[error("page granularity {0} must be a power of two and at least {align}", align = ALIGNMENT)]
  Granularity(usize),
  #[error(
    "minimum region size {0} must be a multiple of {align} above {overhead}",
    align = ALIGNMENT,
    overhead = REGION_OVERHEAD
  )]
  MinRegion(usize),
  #[error("heap is already configured")]
  AlreadySet,
}
