//! In-memory layout of blocks and regions.
//!
//! ```text
//!  region base                                                   base + len
//!  ┌──────────────┬──────────────┬─────────────── ─ ─ ──┬──────────────┐
//!  │ RegionHeader │ BlockHeader  │ payload ...           │ sentinel     │
//!  └──────────────┴──────────────┴─────────────── ─ ─ ──┴──────────────┘
//! ```
//!
//! Every header has the same `BlockHeader` layout so one chain type can hold
//! both regions and blocks. The sentinel is a zero-size OCCUPIED header that
//! stops forward coalescing at the end of the mapping.

use core::{mem::size_of, ptr::null_mut};

/// Alignment granularity of payload sizes and payload addresses.
pub const ALIGNMENT: usize = 8;

/// Bytes reserved in front of every payload.
pub const HEADER_SIZE: usize = align_up(size_of::<BlockHeader>(), ALIGNMENT);

/// Region header, first block header and sentinel.
pub const REGION_OVERHEAD: usize = 3 * HEADER_SIZE;

pub(crate) const OCCUPIED: u32 = 1;

const _: () = assert!(ALIGNMENT.is_power_of_two());
const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);
const _: () = assert!(core::mem::align_of::<BlockHeader>() <= ALIGNMENT);

/// Header of a block, or of a region (see [`RegionHeader`]).
///
/// `next`/`prev` link the header into exactly one chain: the owning shard's
/// free list while the block is free, or the shard's region list when the
/// header starts a region. Occupied blocks are on no chain and their links
/// are stale.
#[repr(C)]
pub(crate) struct BlockHeader {
  /// Payload bytes, header excluded. Multiple of `ALIGNMENT`.
  pub(crate) size: usize,
  pub(crate) flags: u32,
  /// Index of the shard whose lock guards this block.
  pub(crate) shard: u32,
  /// Physically preceding block in the same region, null for the first one.
  pub(crate) prev_in_mem: *mut BlockHeader,
  pub(crate) next: *mut BlockHeader,
  pub(crate) prev: *mut BlockHeader,
}

/// For a region, `size` counts everything between the region header and the
/// sentinel.
pub(crate) type RegionHeader = BlockHeader;

/// Writes a fresh free header at `at`.
pub(crate) unsafe fn write_header(
  at: *mut u8,
  size: usize,
  shard: u32,
  prev_in_mem: *mut BlockHeader,
) -> *mut BlockHeader {
  let block = at as *mut BlockHeader;
  unsafe {
    block.write(BlockHeader {
      size,
      flags: 0,
      shard,
      prev_in_mem,
      next: null_mut(),
      prev: null_mut(),
    })
  };
  block
}

#[inline]
pub(crate) unsafe fn is_free(block: *const BlockHeader) -> bool {
  unsafe { (*block).flags & OCCUPIED == 0 }
}

#[inline]
pub(crate) unsafe fn payload(block: *mut BlockHeader) -> *mut u8 {
  unsafe { (block as *mut u8).add(HEADER_SIZE) }
}

/// Recovers the header from a payload pointer handed out by the heap.
#[inline]
pub(crate) unsafe fn header_of(ptr: *mut u8) -> *mut BlockHeader {
  unsafe { ptr.sub(HEADER_SIZE) as *mut BlockHeader }
}

/// Header physically following `block`. The sentinel for the last block.
#[inline]
pub(crate) unsafe fn next_in_mem(block: *mut BlockHeader) -> *mut BlockHeader {
  unsafe { payload(block).add((*block).size) as *mut BlockHeader }
}

/// Lays out a fresh mapping of `len` bytes at `base` as one region holding a
/// single free block. Returns the region header and that block.
pub(crate) unsafe fn carve_region(
  base: *mut u8,
  len: usize,
  shard: u32,
) -> (*mut RegionHeader, *mut BlockHeader) {
  debug_assert!(len >= REGION_OVERHEAD + ALIGNMENT);
  debug_assert!(len % ALIGNMENT == 0);

  unsafe {
    let region = write_header(base, len - 2 * HEADER_SIZE, shard, null_mut());
    (*region).flags = OCCUPIED;

    let block = write_header(payload(region), (*region).size - HEADER_SIZE, shard, null_mut());

    let sentinel = write_header(base.add(len - HEADER_SIZE), 0, shard, block);
    (*sentinel).flags = OCCUPIED;
    debug_assert_eq!(next_in_mem(block), sentinel);

    (region, block)
  }
}

/// Length of the mapping behind `region`.
#[inline]
pub(crate) unsafe fn mapped_len(region: *const RegionHeader) -> usize {
  unsafe { (*region).size + 2 * HEADER_SIZE }
}

/// Rounds `x` up to the next multiple of alignment `align`. Alignment must be a power of 2.
#[inline(always)]
pub(crate) const fn align_up(x: usize, align: usize) -> usize {
  let mask = align - 1;
  (x + mask) & !mask
}

/// `align_up` that reports overflow instead of wrapping.
#[inline]
pub(crate) const fn checked_align_up(x: usize, align: usize) -> Option<usize> {
  let mask = align - 1;
  match x.checked_add(mask) {
    Some(v) => Some(v & !mask),
    None => None,
  }
}
