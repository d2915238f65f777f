//! One shard of the heap: a free list and a region list behind one lock.

use core::ptr::NonNull;

use crate::{
  block::{
    ALIGNMENT, BlockHeader, HEADER_SIZE, OCCUPIED, align_up, carve_region, is_free, mapped_len,
    next_in_mem, payload, write_header,
  },
  chain::Chain,
  config::Config,
  error::{AllocError, PageError},
  lock::{SpinGuard, SpinLock},
  page::PageProvider,
};

pub(crate) struct Shard {
  state: SpinLock<ShardState>,
}

impl Shard {
  pub(crate) const fn new() -> Self {
    Self {
      state: SpinLock::new(ShardState::new()),
    }
  }

  #[inline]
  pub(crate) fn try_lock(&self) -> Option<SpinGuard<'_, ShardState>> {
    self.state.try_lock()
  }

  #[inline]
  pub(crate) fn lock(&self) -> SpinGuard<'_, ShardState> {
    self.state.lock()
  }
}

pub(crate) struct ShardState {
  /// Free blocks. Not address ordered: releases go to the front.
  free: Chain,
  /// Every region this shard mapped, in growth order.
  regions: Chain,
}

// Headers are only touched with the shard lock held.
unsafe impl Send for ShardState {}

impl ShardState {
  const fn new() -> Self {
    Self {
      free: Chain::new(),
      regions: Chain::new(),
    }
  }

  /// First-fit allocation, growing the shard by one region on a miss.
  /// Payloads land on a multiple of `align`, a power of two.
  pub(crate) unsafe fn allocate<P: PageProvider>(
    &mut self,
    index: u32,
    size: usize,
    align: usize,
    pages: &P,
    config: &Config,
  ) -> Result<Grant, AllocError> {
    // Room to slide the payload forward past a front block.
    let search = if align <= ALIGNMENT {
      size
    } else {
      align
        .checked_add(HEADER_SIZE)
        .and_then(|slack| size.checked_add(slack))
        .ok_or(AllocError::TooLarge { size })?
    };

    let mut region = None;
    let mut block = self.free.find_first(search);
    if block.is_null() {
      let (grown, len) = self.grow(index, search, pages, config)?;
      block = grown;
      region = Some(len);
    }

    unsafe {
      if align > ALIGNMENT {
        block = self.align_front(block, align);
      }
      self.split(block, size);
      self.free.remove(block);
      (*block).flags |= OCCUPIED;
      (*block).shard = index;
      Ok(Grant {
        ptr: NonNull::new_unchecked(payload(block)),
        region,
      })
    }
  }

  /// Maps a region big enough for `size` and adds its block to the free list.
  fn grow<P: PageProvider>(
    &mut self,
    index: u32,
    size: usize,
    pages: &P,
    config: &Config,
  ) -> Result<(*mut BlockHeader, usize), AllocError> {
    let len = config.region_len(size).ok_or(AllocError::TooLarge { size })?;
    let base = pages.acquire(len)?;

    let (region, block) = unsafe { carve_region(base.as_ptr(), len, index) };
    unsafe {
      self.regions.push_back(region);
      self.free.push_back(block);
    }
    Ok((block, len))
  }

  /// Cuts a free front block off `block` so that the header behind it sits
  /// right before a multiple of `align`. Returns that header, left on the
  /// free list just after the front block.
  unsafe fn align_front(&mut self, block: *mut BlockHeader, align: usize) -> *mut BlockHeader {
    unsafe {
      let start = payload(block) as usize;
      if start % align == 0 {
        return block;
      }

      let gap = align_up(start + HEADER_SIZE, align) - start;
      let old = (*block).size;
      debug_assert!(old >= gap);

      (*block).size = gap - HEADER_SIZE;
      let aligned = write_header(
        payload(block).add(gap - HEADER_SIZE),
        old - gap,
        (*block).shard,
        block,
      );
      self.free.insert_after(aligned, block);
      (*next_in_mem(aligned)).prev_in_mem = aligned;
      aligned
    }
  }

  /// Truncates `block` to `size` rounded up to `ALIGNMENT` and frees the tail,
  /// unless the tail could not hold more than a header.
  unsafe fn split(&mut self, block: *mut BlockHeader, size: usize) {
    unsafe {
      let aligned = align_up(size, ALIGNMENT);
      let old = (*block).size;
      if old <= aligned + HEADER_SIZE {
        return;
      }

      (*block).size = aligned;
      let rest = write_header(
        payload(block).add(aligned),
        old - aligned - HEADER_SIZE,
        (*block).shard,
        block,
      );
      self.free.insert_after(rest, block);
      (*next_in_mem(rest)).prev_in_mem = rest;
    }
  }

  /// Returns an occupied block, merging it with free physical neighbours.
  pub(crate) unsafe fn release(&mut self, block: *mut BlockHeader) {
    unsafe {
      debug_assert!(!is_free(block), "double free of block {block:p}");

      let next = next_in_mem(block);
      if is_free(next) {
        self.free.remove(next);
        (*block).size += (*next).size + HEADER_SIZE;
        (*next_in_mem(block)).prev_in_mem = block;
      }

      let prev = (*block).prev_in_mem;
      if !prev.is_null() && is_free(prev) {
        debug_assert_eq!(next_in_mem(prev), block);
        (*prev).size += (*block).size + HEADER_SIZE;
        (*next_in_mem(prev)).prev_in_mem = prev;
        return;
      }

      (*block).flags &= !OCCUPIED;
      self.free.push_front(block);
    }
  }

  /// Unmaps every region and forgets every block. Regions the provider fails
  /// to unmap are skipped and counted in the report.
  pub(crate) fn reset<P: PageProvider>(&mut self, pages: &P) -> ResetReport {
    self.free = Chain::new();
    let mut report = ResetReport::default();
    unsafe {
      self.regions.drain(|region| {
        let len = mapped_len(region);
        let base = NonNull::new_unchecked(region as *mut u8);
        if let Err(err) = pages.release(base, len) {
          report.failed += 1;
          report.last_error = Some(err);
        }
      })
    };
    report
  }

  pub(crate) fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      regions: self.regions.len(),
      free_blocks: self.free.len(),
      ..HeapStats::default()
    };
    for region in self.regions.iter() {
      stats.mapped_bytes += unsafe { mapped_len(region) };
    }
    for block in self.free.iter() {
      let size = unsafe { (*block).size };
      stats.free_bytes += size;
      stats.largest_free = stats.largest_free.max(size);
    }
    stats
  }
}

/// A granted block. `region` is the length of the region mapped to serve it,
/// if the shard had to grow.
pub(crate) struct Grant {
  pub(crate) ptr: NonNull<u8>,
  pub(crate) region: Option<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct ResetReport {
  pub(crate) failed: usize,
  pub(crate) last_error: Option<PageError>,
}

/// Snapshot of heap occupancy, summed over shards.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub regions: usize,
  pub mapped_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  pub(crate) fn merge(self, other: HeapStats) -> HeapStats {
    HeapStats {
      regions: self.regions + other.regions,
      mapped_bytes: self.mapped_bytes + other.mapped_bytes,
      free_blocks: self.free_blocks + other.free_blocks,
      free_bytes: self.free_bytes + other.free_bytes,
      largest_free: self.largest_free.max(other.largest_free),
    }
  }
}
