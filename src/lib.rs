//! # shardheap
//!
//! A general-purpose allocator built from a fixed set of independently locked
//! heap shards. Each shard carves OS-mapped regions into header-prefixed
//! blocks, keeps free blocks on an intrusive doubly-linked list, serves
//! requests first-fit, splits oversized blocks and coalesces physical
//! neighbours on release.
//!
//! ```text
//!   allocate(size)
//!      │
//!      ▼
//!   preferred shard ──try-lock──► first fit ──miss──► map region
//!      │ busy                         │                   │
//!      ▼                              ▼                   │
//!   shards 0..N ──all busy──► back off, retry       split ◄┘
//!                                                     │
//!                                                     ▼
//!                                            header + HEADER_SIZE
//! ```
//!
//! Pointers are 8-byte aligned. Payloads are preceded by a `HEADER_SIZE`
//! byte header that callers must never touch.

#![allow(clippy::missing_safety_doc)]

use core::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull, null_mut},
  sync::atomic::{AtomicUsize, Ordering},
};
use std::sync::OnceLock;

mod alloc_log;
mod backoff;
mod block;
#[cfg(feature = "c_api")]
pub mod c_api;
mod chain;
pub mod config;
pub mod error;
mod lock;
pub mod page;
mod shard;

pub use alloc_log::{LogRecord, read_log};
pub use block::{ALIGNMENT, HEADER_SIZE, REGION_OVERHEAD};
pub use config::Config;
pub use error::{AllocError, ConfigError, PageError};
pub use page::{MmapPages, PageProvider};
pub use shard::HeapStats;

use backoff::Backoff;
use block::header_of;
use shard::Shard;

// =============================================================================
// Constants
// =============================================================================

/// Number of independently locked shards.
pub const SHARD_COUNT: usize = 8;

const _: () = assert!(SHARD_COUNT.is_power_of_two());
const _: () = assert!(SHARD_COUNT <= u32::MAX as usize);

// =============================================================================
// Thread affinity
// =============================================================================

/// Preferred shard of the calling thread, fixed on its first call.
fn preferred_shard() -> usize {
  thread_local! {
    static ORDINAL: usize = {
      static NEXT: AtomicUsize = AtomicUsize::new(0);
      NEXT.fetch_add(1, Ordering::Relaxed) // Only uniqueness matters.
    };
  }
  // TLS may already be gone while the thread exits.
  ORDINAL.try_with(|&ordinal| ordinal).unwrap_or(0) & (SHARD_COUNT - 1)
}

// =============================================================================
// Heap
// =============================================================================

/// Where an allocation call stands in the shard selection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
  Preferred,
  AllShards,
  Backoff,
}

/// Settings of a heap nobody has configured yet.
static DEFAULT_CONFIG: Config = Config::new();

pub struct ShardedHeap<P: PageProvider = MmapPages> {
  shards: [Shard; SHARD_COUNT],
  pages: P,
  /// Unset means `DEFAULT_CONFIG`. Set at most once.
  config: OnceLock<Config>,
}

impl ShardedHeap<MmapPages> {
  /// Heap over `mmap` with default settings. Usable in a `static`; see
  /// [`ShardedHeap::configure`] to change its settings later.
  pub const fn new() -> Self {
    Self::from_parts(OnceLock::new(), MmapPages)
  }
}

impl Default for ShardedHeap<MmapPages> {
  fn default() -> Self {
    Self::new()
  }
}

impl<P: PageProvider> ShardedHeap<P> {
  pub fn with_config(config: Config, pages: P) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self::from_parts(OnceLock::from(config), pages))
  }

  const fn from_parts(config: OnceLock<Config>, pages: P) -> Self {
    Self {
      shards: [const { Shard::new() }; SHARD_COUNT],
      pages,
      config,
    }
  }

  /// Replaces the defaults of a heap built with [`ShardedHeap::new`]. Only
  /// the first call succeeds. Regions mapped before it keep their size.
  pub fn configure(&self, config: Config) -> Result<(), ConfigError> {
    config.validate()?;
    self.config.set(config).map_err(|_| ConfigError::AlreadySet)
  }

  pub fn config(&self) -> &Config {
    self.config.get().unwrap_or(&DEFAULT_CONFIG)
  }

  pub fn pages(&self) -> &P {
    &self.pages
  }

  /// Returns at least `size` bytes, or null when no region could be mapped.
  ///
  /// Never waits on a lock: busy shards are skipped and, when every shard is
  /// busy, the call sleeps with exponential back-off and tries again.
  pub fn allocate(&self, size: usize) -> *mut u8 {
    self.allocate_aligned(size, ALIGNMENT)
  }

  /// [`ShardedHeap::allocate`] with the payload on a multiple of `align`.
  /// Null if `align` is not a power of two.
  pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
    if !align.is_power_of_two() {
      log::warn!("alignment {align} is not a power of two");
      return null_mut();
    }
    let align = align.max(ALIGNMENT);
    let config = self.config();
    let preferred = preferred_shard();
    let mut backoff = Backoff::new(config.max_backoff);
    let mut attempt = Attempt::Preferred;

    let outcome = loop {
      match attempt {
        Attempt::Preferred => match self.try_allocate_on(preferred, size, align) {
          Some(outcome) => break outcome,
          None => attempt = Attempt::AllShards,
        },
        Attempt::AllShards => {
          match (0..SHARD_COUNT).find_map(|index| self.try_allocate_on(index, size, align)) {
            Some(outcome) => break outcome,
            None => attempt = Attempt::Backoff,
          }
        }
        Attempt::Backoff => {
          backoff.snooze();
          attempt = Attempt::Preferred;
        }
      }
    };

    match outcome {
      Ok(ptr) => {
        if let Some(path) = config.log_path.as_deref() {
          alloc_log::record(path, ptr.as_ptr(), size);
        }
        ptr.as_ptr()
      }
      Err(err) => {
        log::warn!("allocation of {size} bytes failed: {err}");
        null_mut()
      }
    }
  }

  /// `None` when the shard is busy.
  fn try_allocate_on(
    &self,
    index: usize,
    size: usize,
    align: usize,
  ) -> Option<Result<NonNull<u8>, AllocError>> {
    let outcome = {
      let mut state = self.shards[index].try_lock()?;
      unsafe { state.allocate(index as u32, size, align, &self.pages, self.config()) }
    };
    // Unlocked from here on: a logger may allocate or free on this shard.
    Some(outcome.map(|grant| {
      if let Some(len) = grant.region {
        log::debug!("shard {index}: mapped a {len} byte region for a {size} byte request");
      }
      grant.ptr
    }))
  }

  /// Returns a block to its shard, merging it with free neighbours. Null is
  /// ignored.
  ///
  /// # Safety
  /// `ptr` must come from this heap's `allocate`/`resize`, must not have been
  /// released already, and must not be used afterwards. Nothing checks this.
  pub unsafe fn release(&self, ptr: *mut u8) {
    if ptr.is_null() {
      return;
    }
    let block = unsafe { header_of(ptr) };
    let index = unsafe { (*block).shard } as usize;
    let mut state = self.shards[index & (SHARD_COUNT - 1)].lock();
    unsafe { state.release(block) };
  }

  /// Returns `ptr` unchanged if its block already holds `new_size` bytes.
  /// Otherwise releases it and allocates afresh: the old contents are NOT
  /// carried over. A null `ptr` behaves like `allocate`.
  ///
  /// # Safety
  /// Same contract as [`ShardedHeap::release`].
  pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
    if ptr.is_null() {
      return self.allocate(new_size);
    }
    if unsafe { self.usable_size(ptr) } >= new_size {
      return ptr;
    }
    unsafe { self.release(ptr) };
    self.allocate(new_size)
  }

  /// Payload bytes available behind `ptr`, at least what was requested.
  ///
  /// # Safety
  /// `ptr` must be a live pointer from this heap.
  pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
    unsafe { (*header_of(ptr)).size }
  }

  /// Unmaps every region of every shard and leaves all shards empty.
  ///
  /// Every pointer handed out before the call dangles afterwards. Regions the
  /// provider fails to unmap are logged and skipped.
  pub fn reset_all(&self) {
    let mut failed = 0;
    for (index, shard) in self.shards.iter().enumerate() {
      let report = shard.lock().reset(&self.pages);
      if let Some(err) = report.last_error {
        log::error!("shard {index}: {} region(s) not unmapped, last: {err}", report.failed);
      }
      failed += report.failed;
    }
    if failed > 0 {
      log::error!("reset left {failed} region(s) mapped");
    }
  }

  pub fn stats(&self) -> HeapStats {
    self
      .shards
      .iter()
      .map(|shard| shard.lock().stats())
      .fold(HeapStats::default(), HeapStats::merge)
  }
}

impl<P: PageProvider> Drop for ShardedHeap<P> {
  fn drop(&mut self) {
    self.reset_all();
  }
}

// =============================================================================
// GlobalAlloc
// =============================================================================

unsafe impl<P: PageProvider + Sync> GlobalAlloc for ShardedHeap<P> {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    self.allocate_aligned(layout.size(), layout.align())
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    unsafe { self.release(ptr) };
  }

  unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
    unsafe { copy_realloc(self, ptr, layout.size(), layout.align(), new_size) }
  }
}

/// Content-preserving reallocation: allocate, copy, then release.
pub(crate) unsafe fn copy_realloc<P: PageProvider>(
  heap: &ShardedHeap<P>,
  ptr: *mut u8,
  old_size: usize,
  align: usize,
  new_size: usize,
) -> *mut u8 {
  if ptr.is_null() {
    return heap.allocate_aligned(new_size, align);
  }
  if unsafe { heap.usable_size(ptr) } >= new_size {
    return ptr;
  }

  let new_ptr = heap.allocate_aligned(new_size, align);
  if !new_ptr.is_null() {
    unsafe {
      ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
      heap.release(ptr);
    }
  }
  new_ptr
}
