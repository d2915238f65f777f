//! Intrusive doubly-linked chain of block headers.
//!
//! The chain never allocates: its nodes are the `next`/`prev` fields of
//! headers living in heap-owned memory. Whoever links a header guarantees it
//! stays valid until it is unlinked, which is what lets the read-only walks
//! below be safe methods.

use core::{marker::PhantomData, ptr::null_mut};

use crate::block::BlockHeader;

pub(crate) struct Chain {
  head: *mut BlockHeader,
  tail: *mut BlockHeader,
}

impl Chain {
  pub(crate) const fn new() -> Self {
    Self {
      head: null_mut(),
      tail: null_mut(),
    }
  }

  #[inline]
  pub(crate) fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  pub(crate) unsafe fn push_back(&mut self, elem: *mut BlockHeader) {
    unsafe {
      (*elem).next = null_mut();
      (*elem).prev = self.tail;
      if self.tail.is_null() {
        self.head = elem;
      } else {
        (*self.tail).next = elem;
      }
    }
    self.tail = elem;
  }

  pub(crate) unsafe fn push_front(&mut self, elem: *mut BlockHeader) {
    unsafe {
      (*elem).prev = null_mut();
      (*elem).next = self.head;
      if self.head.is_null() {
        self.tail = elem;
      } else {
        (*self.head).prev = elem;
      }
    }
    self.head = elem;
  }

  /// Detaches the tail. Null if the chain is empty.
  #[cfg(test)]
  pub(crate) unsafe fn pop_back(&mut self) -> *mut BlockHeader {
    let last = self.tail;
    if !last.is_null() {
      unsafe { self.remove(last) };
    }
    last
  }

  /// Walks the whole chain. Not cached: splicing must never leave a stale count.
  pub(crate) fn len(&self) -> usize {
    self.iter().count()
  }

  /// Inserts `elem` so that it ends up at position `index`. Does nothing and
  /// returns false when `index` is past the end.
  #[cfg(test)]
  pub(crate) unsafe fn insert_at(&mut self, elem: *mut BlockHeader, index: usize) -> bool {
    if index == 0 {
      unsafe { self.push_front(elem) };
      return true;
    }
    let Some(before) = self.iter().nth(index - 1) else {
      return false;
    };
    unsafe { self.insert_after(elem, before) };
    true
  }

  /// Links `elem` right after `anchor`, which must be on this chain.
  pub(crate) unsafe fn insert_after(&mut self, elem: *mut BlockHeader, anchor: *mut BlockHeader) {
    unsafe {
      let after = (*anchor).next;
      (*elem).prev = anchor;
      (*elem).next = after;
      (*anchor).next = elem;
      if after.is_null() {
        self.tail = elem;
      } else {
        (*after).prev = elem;
      }
    }
  }

  /// First element, from the head, whose `size` is at least `min_size`.
  pub(crate) fn find_first(&self, min_size: usize) -> *mut BlockHeader {
    self
      .iter()
      .find(|&elem| unsafe { (*elem).size } >= min_size)
      .unwrap_or(null_mut())
  }

  /// Unlinks `elem`, which must be on this chain.
  pub(crate) unsafe fn remove(&mut self, elem: *mut BlockHeader) {
    unsafe {
      let prev = (*elem).prev;
      let next = (*elem).next;
      if prev.is_null() {
        self.head = next;
      } else {
        (*prev).next = next;
      }
      if next.is_null() {
        self.tail = prev;
      } else {
        (*next).prev = prev;
      }
      (*elem).next = null_mut();
      (*elem).prev = null_mut();
    }
  }

  /// Empties the chain and hands every element to `f`, front to back.
  /// The successor is read before `f` runs, so `f` may unmap the element.
  pub(crate) unsafe fn drain<F: FnMut(*mut BlockHeader)>(&mut self, mut f: F) {
    let mut elem = self.head;
    self.head = null_mut();
    self.tail = null_mut();
    while !elem.is_null() {
      let next = unsafe { (*elem).next };
      f(elem);
      elem = next;
    }
  }

  pub(crate) fn iter(&self) -> Iter<'_> {
    Iter {
      cur: self.head,
      _chain: PhantomData,
    }
  }
}

pub(crate) struct Iter<'a> {
  cur: *mut BlockHeader,
  _chain: PhantomData<&'a Chain>,
}

impl Iterator for Iter<'_> {
  type Item = *mut BlockHeader;

  fn next(&mut self) -> Option<Self::Item> {
    if self.cur.is_null() {
      return None;
    }
    let elem = self.cur;
    self.cur = unsafe { (*elem).next };
    Some(elem)
  }
}
