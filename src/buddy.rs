//! Split/coalesce engine over the per-level free lists.

use tracing::trace;

use crate::{
  error::{BuddyError, Result},
  free_list::FreeLists,
  level::{self, MAX_LEVELS, TOP_LEVEL},
};

pub(crate) struct Buddy {
  lists: FreeLists,
  /// Highest level any block of this arena can reach.
  top_level: usize,
}

impl Buddy {
  /// Engine for an arena of `units` block indices (a power of two), seeded
  /// with the whole arena as free blocks at `top_level`.
  pub(crate) fn new(units: usize) -> Result<Self> {
    let top_level = top_level_for(units);
    let mut buddy = Self {
      lists: FreeLists::new(units)?,
      top_level,
    };

    // Arenas larger than the largest block are seeded as several top-level
    // blocks. Push in reverse so the lowest index ends up at the head.
    let step = level::units(top_level);
    for idx in (0..units).step_by(step).rev() {
      buddy.lists.push(idx, top_level);
    }
    Ok(buddy)
  }

  #[inline]
  pub(crate) fn top_level(&self) -> usize {
    self.top_level
  }

  #[inline]
  pub(crate) fn lists(&self) -> &FreeLists {
    &self.lists
  }

  #[inline]
  pub(crate) fn lists_mut(&mut self) -> &mut FreeLists {
    &mut self.lists
  }

  /// Split the head block at `level` into two free blocks at `level - 1`.
  ///
  /// Fails without consuming anything if the list is empty, and pushes the
  /// block back if its upper half would end past the arena.
  pub(crate) fn split(&mut self, level: usize) -> Result<()> {
    debug_assert!(level > 0 && level < MAX_LEVELS);
    let Some(idx) = self.lists.pop(level) else {
      return Err(BuddyError::OutOfMemory {
        size: level::block_size(level),
      });
    };

    let half = level::units(level - 1);
    let upper = idx + half;
    if upper + half > self.lists.units() {
      self.lists.push(idx, level);
      return Err(BuddyError::BoundsViolation { level });
    }

    self.lists.push(upper, level - 1);
    self.lists.push(idx, level - 1);
    trace!(idx, upper, level, "split");
    Ok(())
  }

  /// Return block `idx` at `level` to the free lists, merging it with its
  /// buddy for as long as the buddy is free. Returns where the merged block
  /// settled as `(idx, level)`.
  pub(crate) fn coalesce(&mut self, mut idx: usize, mut level: usize) -> (usize, usize) {
    // Coalesce with buddy, climbing levels
    while level < self.top_level {
      let buddy_idx = level::buddy_idx(idx, level);
      if buddy_idx >= self.lists.units() || !self.lists.remove(buddy_idx, level) {
        break;
      }
      trace!(idx, buddy_idx, level, "coalesce");
      idx = idx.min(buddy_idx);
      level += 1;
    }

    self.lists.push(idx, level);
    (idx, level)
  }

  /// Take a free block at `level`, splitting larger blocks as needed.
  ///
  /// On failure the free lists are exactly as they were before the call.
  pub(crate) fn take(&mut self, level: usize, size: usize) -> Result<usize> {
    let Some(mut l) = self.lists.first_non_empty(level) else {
      return Err(BuddyError::OutOfMemory { size });
    };

    while l > level {
      if let Err(err) = self.split(l) {
        self.undo_splits(l, level);
        return Err(err);
      }
      l -= 1;
    }

    match self.lists.pop(level) {
      Some(idx) => Ok(idx),
      None => Err(BuddyError::OutOfMemory { size }),
    }
  }

  /// Re-merge the chain of splits `take` performed before failing at
  /// `failed`. Each split left its lower half at the head of the level below
  /// and the failed split pushed its block back at the head, so the head of
  /// `failed` coalesces back into the original block.
  fn undo_splits(&mut self, failed: usize, target: usize) {
    debug_assert!(failed > target);
    let Some(idx) = self.lists.pop(failed) else {
      return;
    };
    let (idx, level) = self.coalesce(idx, failed);
    trace!(idx, level, "split chain undone");
  }

  /// Free block count per level.
  pub(crate) fn free_counts(&self) -> [usize; MAX_LEVELS] {
    std::array::from_fn(|level| self.lists.len(level))
  }
}

/// Highest level a block of an arena of `units` block indices (a power of
/// two) can reach.
pub(crate) fn top_level_for(units: usize) -> usize {
  debug_assert!(units.is_power_of_two());
  (units.trailing_zeros() as usize).min(TOP_LEVEL)
}
