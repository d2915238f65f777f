//! Property-based tests for the heap.
//!
//! Random request sequences must keep every live block aligned, disjoint and
//! intact, and must leave each region as a single free block once drained.

mod common;

use common::{CountingPages, fill, read};
use proptest::prelude::*;
use shardheap::{ALIGNMENT, Config, HEADER_SIZE, REGION_OVERHEAD, ShardedHeap};

#[derive(Debug, Clone)]
enum Op {
  Alloc(usize),
  /// Frees the live block at this index, modulo the live count.
  Free(usize),
  Resize(usize, usize),
}

fn request_size() -> impl Strategy<Value = usize> {
  prop_oneof![
    8 => 0usize..256,
    3 => 256usize..4096,
    1 => 4096usize..40_000,
  ]
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    4 => request_size().prop_map(Op::Alloc),
    3 => any::<usize>().prop_map(Op::Free),
    1 => (any::<usize>(), request_size()).prop_map(|(i, size)| Op::Resize(i, size)),
  ]
}

struct Live {
  ptr: *mut u8,
  size: usize,
  tag: u8,
}

fn pattern(tag: u8, size: usize) -> Vec<u8> {
  (0..size).map(|i| tag.wrapping_add(i as u8)).collect()
}

fn check_disjoint(live: &[Live]) -> Result<(), TestCaseError> {
  let mut spans: Vec<(usize, usize)> = live.iter().map(|l| (l.ptr as usize, l.size)).collect();
  spans.sort_unstable();
  for pair in spans.windows(2) {
    prop_assert!(pair[0].0 + pair[0].1 + HEADER_SIZE <= pair[1].0);
  }
  Ok(())
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  /// Every pointer is aligned and holds at least the requested bytes.
  #[test]
  fn allocations_are_aligned_and_large_enough(sizes in prop::collection::vec(request_size(), 1..64)) {
    let heap = ShardedHeap::new();
    for size in sizes {
      let ptr = heap.allocate(size);
      prop_assert!(!ptr.is_null());
      prop_assert_eq!(ptr as usize % ALIGNMENT, 0);
      let usable = unsafe { heap.usable_size(ptr) };
      prop_assert!(usable >= size);
    }
  }

  /// Live blocks never overlap and keep what was written into them.
  #[test]
  fn random_sequences_keep_blocks_disjoint_and_intact(ops in prop::collection::vec(op(), 1..200)) {
    let heap = ShardedHeap::with_config(Config::new(), CountingPages::default()).unwrap();
    let mut live: Vec<Live> = Vec::new();
    let mut next_tag = 0u8;

    for op in ops {
      match op {
        Op::Alloc(size) => {
          let ptr = heap.allocate(size);
          prop_assert!(!ptr.is_null());
          next_tag = next_tag.wrapping_add(1);
          unsafe { fill(ptr, &pattern(next_tag, size)) };
          live.push(Live { ptr, size, tag: next_tag });
        }
        Op::Free(i) if !live.is_empty() => {
          let gone = live.swap_remove(i % live.len());
          prop_assert_eq!(unsafe { read(gone.ptr, gone.size) }, pattern(gone.tag, gone.size));
          unsafe { heap.release(gone.ptr) };
        }
        Op::Resize(i, size) if !live.is_empty() => {
          let i = i % live.len();
          let old = &live[i];
          let kept = unsafe { heap.usable_size(old.ptr) } >= size;
          let ptr = unsafe { heap.resize(old.ptr, size) };
          prop_assert!(!ptr.is_null());
          if kept {
            prop_assert_eq!(ptr, old.ptr);
          }
          next_tag = next_tag.wrapping_add(1);
          unsafe { fill(ptr, &pattern(next_tag, size)) };
          live[i] = Live { ptr, size, tag: next_tag };
        }
        _ => {}
      }
      check_disjoint(&live)?;
    }

    for block in &live {
      prop_assert_eq!(unsafe { read(block.ptr, block.size) }, pattern(block.tag, block.size));
    }
  }

  /// Once everything is released, each region is back to one free block.
  #[test]
  fn releasing_everything_restores_whole_regions(sizes in prop::collection::vec(request_size(), 1..100), seed in any::<u64>()) {
    let heap = ShardedHeap::with_config(Config::new(), CountingPages::default()).unwrap();
    let mut ptrs: Vec<*mut u8> = sizes.iter().map(|&size| heap.allocate(size)).collect();

    // Release in a seed-dependent order.
    let mut x = seed | 1;
    for i in (1..ptrs.len()).rev() {
      x ^= x << 13;
      x ^= x >> 7;
      x ^= x << 17;
      ptrs.swap(i, (x % (i as u64 + 1)) as usize);
    }
    for ptr in ptrs {
      unsafe { heap.release(ptr) };
    }

    let stats = heap.stats();
    prop_assert_eq!(stats.regions, heap.pages().live());
    prop_assert_eq!(stats.free_blocks, stats.regions);
    prop_assert_eq!(stats.free_bytes, stats.mapped_bytes - stats.regions * REGION_OVERHEAD);
  }
}
