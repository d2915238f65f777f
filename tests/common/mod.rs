#![allow(dead_code)]

use std::{
  io,
  ptr::NonNull,
  sync::atomic::{AtomicUsize, Ordering},
};

use shardheap::{MmapPages, PageError, PageProvider};

/// `mmap` provider that counts live regions.
#[derive(Default)]
pub struct CountingPages {
  pub live: AtomicUsize,
  pub acquired: AtomicUsize,
}

impl CountingPages {
  pub fn live(&self) -> usize {
    self.live.load(Ordering::SeqCst)
  }

  pub fn acquired(&self) -> usize {
    self.acquired.load(Ordering::SeqCst)
  }
}

impl PageProvider for CountingPages {
  fn acquire(&self, size: usize) -> Result<NonNull<u8>, PageError> {
    let ptr = MmapPages.acquire(size)?;
    self.live.fetch_add(1, Ordering::SeqCst);
    self.acquired.fetch_add(1, Ordering::SeqCst);
    Ok(ptr)
  }

  unsafe fn release(&self, ptr: NonNull<u8>, size: usize) -> Result<(), PageError> {
    unsafe { MmapPages.release(ptr, size) }?;
    self.live.fetch_sub(1, Ordering::SeqCst);
    Ok(())
  }
}

/// Provider with no memory to give.
pub struct ExhaustedPages;

impl PageProvider for ExhaustedPages {
  fn acquire(&self, size: usize) -> Result<NonNull<u8>, PageError> {
    Err(PageError::Map {
      size,
      source: io::Error::from(io::ErrorKind::OutOfMemory),
    })
  }

  unsafe fn release(&self, _ptr: NonNull<u8>, _size: usize) -> Result<(), PageError> {
    unreachable!("nothing was ever mapped")
  }
}

/// Unmaps like `MmapPages` but reports every unmap as failed.
#[derive(Default)]
pub struct FailingUnmapPages {
  pub unmap_calls: AtomicUsize,
}

impl PageProvider for FailingUnmapPages {
  fn acquire(&self, size: usize) -> Result<NonNull<u8>, PageError> {
    MmapPages.acquire(size)
  }

  unsafe fn release(&self, ptr: NonNull<u8>, size: usize) -> Result<(), PageError> {
    self.unmap_calls.fetch_add(1, Ordering::SeqCst);
    unsafe { MmapPages.release(ptr, size) }?;
    Err(PageError::Unmap {
      addr: ptr.as_ptr() as usize,
      size,
      source: io::Error::from(io::ErrorKind::Other),
    })
  }
}

/// Writes `bytes` to a fresh allocation of exactly `bytes.len()`.
pub unsafe fn fill(ptr: *mut u8, bytes: &[u8]) {
  unsafe { ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len()) };
}

pub unsafe fn read(ptr: *mut u8, len: usize) -> Vec<u8> {
  unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
}
