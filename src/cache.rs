//! Single-slot scratch buffer mapped outside the arena.

use std::ptr::NonNull;

use tracing::debug;

use crate::{error::Result, os::Mapping};

/// Alignment of scratch buffers.
pub const SCRATCH_ALIGN: usize = 64;

struct Scratch {
  map: Mapping,
  /// Bytes the buffer was requested with.
  capacity: usize,
}

/// A buffer handed out by the `alloc` fast path. Stays mapped until freed or
/// until the allocator is dropped.
struct Lent {
  map: Mapping,
  capacity: usize,
  requested: usize,
}

#[derive(Default)]
pub(crate) struct ScratchCache {
  cached: Option<Scratch>,
  lent: Vec<Lent>,
}

impl ScratchCache {
  /// The cached buffer if it holds `size` bytes, else a fresh one replacing it.
  pub(crate) fn get(&mut self, size: usize) -> Result<NonNull<u8>> {
    if let Some(scratch) = &self.cached
      && scratch.capacity >= size
    {
      return Ok(scratch.map.as_ptr());
    }

    self.release();
    let map = Mapping::new(size, SCRATCH_ALIGN)?;
    let ptr = map.as_ptr();
    debug!(size, ptr = ?ptr, "scratch buffer mapped");
    self.cached = Some(Scratch {
      map,
      capacity: size,
    });
    Ok(ptr)
  }

  /// Unmap the cached buffer, if any.
  pub(crate) fn release(&mut self) {
    if let Some(scratch) = self.cached.take() {
      debug!(capacity = scratch.capacity, "scratch buffer released");
    }
  }

  /// Hand the cached buffer out as an allocation of `size` bytes if it is
  /// large enough. The slot is empty afterwards.
  pub(crate) fn lend(&mut self, size: usize) -> Option<NonNull<u8>> {
    if self.cached.as_ref()?.capacity < size {
      return None;
    }
    let Scratch { map, capacity } = self.cached.take()?;
    let ptr = map.as_ptr();
    self.lent.push(Lent {
      map,
      capacity,
      requested: size,
    });
    Some(ptr)
  }

  fn find_lent(&self, ptr: *mut u8) -> Option<usize> {
    self
      .lent
      .iter()
      .position(|lent| lent.map.as_ptr().as_ptr() == ptr)
  }

  /// Unmap a lent buffer. Returns false if `ptr` is not one.
  pub(crate) fn reclaim(&mut self, ptr: *mut u8) -> bool {
    match self.find_lent(ptr) {
      Some(pos) => {
        let lent = self.lent.swap_remove(pos);
        debug!(capacity = lent.capacity, "lent scratch buffer freed");
        true
      }
      None => false,
    }
  }

  /// Size a lent buffer was handed out with.
  pub(crate) fn lent_requested(&self, ptr: *mut u8) -> Option<usize> {
    self.find_lent(ptr).map(|pos| self.lent[pos].requested)
  }

  /// Capacity of a lent buffer.
  pub(crate) fn lent_capacity(&self, ptr: *mut u8) -> Option<usize> {
    self.find_lent(ptr).map(|pos| self.lent[pos].capacity)
  }

  pub(crate) fn cached_bytes(&self) -> usize {
    self.cached.as_ref().map_or(0, |scratch| scratch.capacity)
  }

  pub(crate) fn lent_bytes(&self) -> usize {
    self.lent.iter().map(|lent| lent.capacity).sum()
  }

  #[cfg(test)]
  pub(crate) fn mapped_len(&self) -> Option<usize> {
    self.cached.as_ref().map(|scratch| scratch.map.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn large_enough_buffer_is_reused() {
    let mut cache = ScratchCache::default();
    let a = cache.get(1000).unwrap();
    assert_eq!(a.as_ptr() as usize % SCRATCH_ALIGN, 0);
    assert_eq!(cache.get(1000).unwrap(), a);
    assert_eq!(cache.get(10).unwrap(), a);
    assert_eq!(cache.cached_bytes(), 1000);
    assert_eq!(cache.mapped_len(), Some(1000));
  }

  #[test]
  fn growing_request_replaces_buffer() {
    let mut cache = ScratchCache::default();
    cache.get(100).unwrap();
    let b = cache.get(1 << 20).unwrap();
    assert_eq!(cache.cached_bytes(), 1 << 20);
    unsafe {
      b.as_ptr().write_bytes(0x5A, 1 << 20);
      assert_eq!(b.as_ptr().add((1 << 20) - 1).read(), 0x5A);
    }
  }

  #[test]
  fn release_empties_the_slot() {
    let mut cache = ScratchCache::default();
    cache.get(256).unwrap();
    cache.release();
    assert_eq!(cache.cached_bytes(), 0);
    assert_eq!(cache.mapped_len(), None);
    // Idempotent.
    cache.release();
  }

  #[test]
  fn lending_moves_the_buffer_out_of_the_slot() {
    let mut cache = ScratchCache::default();
    assert_eq!(cache.lend(16), None);

    let ptr = cache.get(512).unwrap();
    assert_eq!(cache.lend(1024), None);
    assert_eq!(cache.lend(100), Some(ptr));
    assert_eq!(cache.cached_bytes(), 0);
    assert_eq!(cache.lent_bytes(), 512);
    assert_eq!(cache.lent_requested(ptr.as_ptr()), Some(100));
    assert_eq!(cache.lent_capacity(ptr.as_ptr()), Some(512));

    // The slot no longer offers it.
    assert_eq!(cache.lend(100), None);

    assert!(cache.reclaim(ptr.as_ptr()));
    assert!(!cache.reclaim(ptr.as_ptr()));
    assert_eq!(cache.lent_bytes(), 0);
  }
}
