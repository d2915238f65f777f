//! Page backing: whole OS mappings that shards carve into blocks.

use core::ptr::{NonNull, null_mut};
use std::io;

use crate::error::PageError;

/// Source of the regions a shard grows into.
///
/// `acquire` returns at least `size` writable bytes aligned to the platform
/// page size. The memory need not be zeroed.
pub trait PageProvider {
  fn acquire(&self, size: usize) -> Result<NonNull<u8>, PageError>;

  /// # Safety
  /// `ptr` and `size` must describe a mapping returned by `acquire` that has
  /// not been released yet.
  unsafe fn release(&self, ptr: NonNull<u8>, size: usize) -> Result<(), PageError>;
}

/// Anonymous private mappings via `mmap`/`munmap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapPages;

impl PageProvider for MmapPages {
  fn acquire(&self, size: usize) -> Result<NonNull<u8>, PageError> {
    let ptr = unsafe {
      libc::mmap(
        null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if ptr == libc::MAP_FAILED {
      return Err(PageError::Map {
        size,
        source: io::Error::last_os_error(),
      });
    }
    NonNull::new(ptr as *mut u8).ok_or_else(|| PageError::Map {
      size,
      source: io::Error::from(io::ErrorKind::OutOfMemory),
    })
  }

  unsafe fn release(&self, ptr: NonNull<u8>, size: usize) -> Result<(), PageError> {
    if unsafe { libc::munmap(ptr.as_ptr().cast(), size) } == 0 {
      Ok(())
    } else {
      Err(PageError::Unmap {
        addr: ptr.as_ptr() as usize,
        size,
        source: io::Error::last_os_error(),
      })
    }
  }
}

impl<P: PageProvider + ?Sized> PageProvider for &P {
  fn acquire(&self, size: usize) -> Result<NonNull<u8>, PageError> {
    (**self).acquire(size)
  }

  unsafe fn release(&self, ptr: NonNull<u8>, size: usize) -> Result<(), PageError> {
    unsafe { (**self).release(ptr, size) }
  }
}
