//! C allocator exports over one process-wide heap.
//!
//! Linking these in replaces the libc allocator of the whole process. The
//! heap picks up the `SHARDHEAP_*` variables (see [`crate::config`]) on its
//! first call.

use core::{
  ffi::c_int,
  ptr::{self, null_mut},
  sync::atomic::{AtomicU8, Ordering},
};

use crate::{ALIGNMENT, Config, ShardedHeap, copy_realloc};

static HEAP: ShardedHeap = ShardedHeap::new();

const ENV_PENDING: u8 = 0;
const ENV_LOADING: u8 = 1;
const ENV_LOADED: u8 = 2;

static ENV_STATE: AtomicU8 = AtomicU8::new(ENV_PENDING);

/// The process heap, configured from the environment on first use.
///
/// Reading the environment allocates. Those nested calls, and calls from
/// threads racing with the load, are served with the defaults.
fn heap() -> &'static ShardedHeap {
  if ENV_STATE.load(Ordering::Acquire) != ENV_LOADED
    && ENV_STATE
      .compare_exchange(ENV_PENDING, ENV_LOADING, Ordering::Acquire, Ordering::Relaxed)
      .is_ok()
  {
    match Config::from_env() {
      Ok(config) => {
        if let Err(err) = HEAP.configure(config) {
          log::warn!("allocator environment not applied: {err}");
        }
      }
      Err(err) => log::warn!("allocator environment ignored: {err}"),
    }
    ENV_STATE.store(ENV_LOADED, Ordering::Release);
  }
  &HEAP
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut u8 {
  heap().allocate(size)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut u8) {
  unsafe { HEAP.release(ptr) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut u8 {
  let Some(total) = nmemb.checked_mul(size) else {
    return null_mut();
  };
  let ptr = heap().allocate(total);
  if !ptr.is_null() {
    unsafe { ptr::write_bytes(ptr, 0, total) };
  }
  ptr
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
  if !ptr.is_null() && size == 0 {
    unsafe { HEAP.release(ptr) };
    return null_mut();
  }
  let old_size = if ptr.is_null() { 0 } else { unsafe { HEAP.usable_size(ptr) } };
  unsafe { copy_realloc(heap(), ptr, old_size, ALIGNMENT, size) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut u8) -> usize {
  if ptr.is_null() {
    return 0;
  }
  unsafe { HEAP.usable_size(ptr) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(out: *mut *mut u8, align: usize, size: usize) -> c_int {
  if !align.is_power_of_two() || align % size_of::<*mut u8>() != 0 {
    return libc::EINVAL;
  }
  let ptr = heap().allocate_aligned(size, align);
  if ptr.is_null() {
    return libc::ENOMEM;
  }
  unsafe { out.write(ptr) };
  0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(align: usize, size: usize) -> *mut u8 {
  heap().allocate_aligned(size, align)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(align: usize, size: usize) -> *mut u8 {
  heap().allocate_aligned(size, align)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn valloc(size: usize) -> *mut u8 {
  let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  heap().allocate_aligned(size, usize::try_from(page).unwrap_or(4096))
}
