use std::{collections::TryReserveError, io};

use thiserror::Error;

/// Errors reported by [`BuddyAllocator`](crate::BuddyAllocator).
///
/// Every variant is recoverable: the allocator's internal state is left
/// consistent and the caller decides what to do next.
#[derive(Debug, Error)]
pub enum BuddyError {
  /// No free block at or above the level the request maps to.
  #[error("out of memory: no free block can hold {size} bytes")]
  OutOfMemory { size: usize },

  /// A split would have placed the upper half past the end of the arena.
  #[error("splitting a level {level} block would cross the arena end")]
  BoundsViolation { level: usize },

  /// The pointer is not a live block of this allocator.
  #[error("invalid free: {addr:#x} was not allocated by this allocator")]
  InvalidFree { addr: usize },

  /// The request is larger than the largest block the allocator can form.
  #[error("requested {size} bytes exceeds the largest block size")]
  SizeOverflow { size: usize },

  /// The arena capacity is zero, overflows, or has too many blocks to index.
  #[error("invalid arena capacity: {capacity} bytes")]
  InvalidCapacity { capacity: usize },

  /// The heap could not hold the per-unit block tables.
  #[error("failed to reserve block tables for {units} units")]
  TableReserve {
    units: usize,
    #[source]
    source: TryReserveError,
  },

  /// A block table walk found free and live blocks that do not tile the
  /// arena.
  #[error("block table corrupted: {0}")]
  Corrupted(String),

  /// The OS refused to map memory.
  #[error("failed to map {size} bytes")]
  MapFailed {
    size: usize,
    #[source]
    source: io::Error,
  },
}

impl BuddyError {
  /// Whether the error means the allocator could not find room for the
  /// request, as opposed to a misuse or an OS failure.
  pub fn is_exhausted(&self) -> bool {
    matches!(
      self,
      BuddyError::OutOfMemory { .. }
        | BuddyError::SizeOverflow { .. }
        | BuddyError::BoundsViolation { .. }
    )
  }
}

pub type Result<T, E = BuddyError> = std::result::Result<T, E>;
