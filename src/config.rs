use crate::error::{BuddyError, Result};
use crate::level::MIN_BLOCK_SIZE;

/// Default arena capacity (32 MiB).
pub const DEFAULT_CAPACITY: usize = 32 << 20;

/// Largest request the `alloc` fast path may serve from the scratch buffer.
pub const DEFAULT_SCRATCH_FAST_PATH: usize = 4096;

/// Construction parameters for [`BuddyAllocator`](crate::BuddyAllocator).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuddyConfig {
  /// Requested arena size in bytes; rounded up to a power of two.
  pub capacity: usize,
  /// `alloc` requests up to this many bytes may be served from an idle
  /// scratch buffer. Zero disables the fast path.
  pub scratch_fast_path: usize,
}

impl Default for BuddyConfig {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_CAPACITY,
      scratch_fast_path: DEFAULT_SCRATCH_FAST_PATH,
    }
  }
}

impl BuddyConfig {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      ..Self::default()
    }
  }

  pub fn with_scratch_fast_path(mut self, limit: usize) -> Self {
    self.scratch_fast_path = limit;
    self
  }

  /// Arena size after rounding, and the number of `MIN_BLOCK_SIZE` units it
  /// covers.
  pub(crate) fn arena_geometry(&self) -> Result<(usize, usize)> {
    let invalid = BuddyError::InvalidCapacity {
      capacity: self.capacity,
    };
    if self.capacity == 0 {
      return Err(invalid);
    }
    let Some(total) = self.capacity.max(MIN_BLOCK_SIZE).checked_next_power_of_two() else {
      return Err(invalid);
    };
    let units = total / MIN_BLOCK_SIZE;
    // Block indices are stored as u32.
    if u32::try_from(units).is_err() {
      return Err(invalid);
    }
    Ok((total, units))
  }
}
