//! The contiguous, aligned byte range that backs every block.

use std::ptr::NonNull;

use tracing::debug;

use crate::{
  error::Result,
  level::{self, MIN_BLOCK_SIZE, MIN_BLOCK_SIZE_BITS},
  os::Mapping,
};

pub(crate) struct Arena {
  map: Mapping,
}

impl Arena {
  /// Map `size` bytes (a power of two) aligned to the block size of
  /// `top_level`, so every block's address is aligned to its own size.
  pub(crate) fn new(size: usize, top_level: usize) -> Result<Self> {
    debug_assert!(size.is_power_of_two() && size >= MIN_BLOCK_SIZE);
    let align = level::block_size(top_level);
    let map = Mapping::new(size, align)?;
    debug!(size, align, base = ?map.as_ptr(), "arena mapped");
    Ok(Self { map })
  }

  #[inline]
  pub(crate) fn base(&self) -> NonNull<u8> {
    self.map.as_ptr()
  }

  #[inline]
  pub(crate) fn size(&self) -> usize {
    self.map.len()
  }

  #[inline]
  pub(crate) fn block_ptr(&self, idx: usize) -> NonNull<u8> {
    debug_assert!(idx < self.size() >> MIN_BLOCK_SIZE_BITS);
    unsafe { self.base().add(idx << MIN_BLOCK_SIZE_BITS) }
  }

  /// Block index of `ptr` if it is inside the arena and on a
  /// `MIN_BLOCK_SIZE` boundary.
  #[inline]
  pub(crate) fn block_idx(&self, ptr: *mut u8) -> Option<usize> {
    let offset = (ptr as usize).checked_sub(self.base().as_ptr() as usize)?;
    if offset >= self.size() || offset % MIN_BLOCK_SIZE != 0 {
      return None;
    }
    Some(offset >> MIN_BLOCK_SIZE_BITS)
  }

  /// Give the physical pages of a free block back to the OS.
  #[cfg(feature = "release-mem")]
  pub(crate) fn discard(&self, idx: usize, level: usize) {
    let len = level::block_size(level);
    if len >= RELEASE_THRESHOLD && len >= crate::os::page_size() {
      self.map.discard(idx << MIN_BLOCK_SIZE_BITS, len);
    }
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    debug!(size = self.size(), base = ?self.base(), "arena unmapped");
  }
}

/// Free blocks at least this large have their pages released.
#[cfg(feature = "release-mem")]
pub(crate) const RELEASE_THRESHOLD: usize = 64 << 10;
