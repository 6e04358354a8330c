//! Per-level free lists threaded through an out-of-band header table.
//!
//! Each block index (in `MIN_BLOCK_SIZE` units) has one [`Header`] slot. Only
//! the slot at the first index of a block is meaningful; the slots covering
//! the rest of the block stay [`Header::Vacant`].

use crate::{
  error::{BuddyError, Result},
  level::MAX_LEVELS,
};

/// State of the block starting at a given index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Header {
  /// No block starts here.
  Vacant,
  /// Free block, linked to the next free block of the same level.
  Free { next: Option<u32> },
  /// Handed out; `requested` is the caller's size at the last alloc/realloc.
  Allocated { requested: u32 },
}

/// Singly linked free list per level.
pub(crate) struct FreeLists {
  heads: [Option<u32>; MAX_LEVELS],
  counts: [usize; MAX_LEVELS],
  headers: Vec<Header>,
}

impl FreeLists {
  /// Table for an arena of `units` block indices, every list empty.
  pub(crate) fn new(units: usize) -> Result<Self> {
    debug_assert!(units <= u32::MAX as usize);
    Ok(Self {
      heads: [None; MAX_LEVELS],
      counts: [0; MAX_LEVELS],
      headers: table(units, Header::Vacant)?,
    })
  }

  #[inline]
  pub(crate) fn units(&self) -> usize {
    self.headers.len()
  }

  #[inline]
  pub(crate) fn header(&self, idx: usize) -> Header {
    self.headers[idx]
  }

  #[inline]
  pub(crate) fn is_empty(&self, level: usize) -> bool {
    self.heads[level].is_none()
  }

  #[inline]
  pub(crate) fn len(&self, level: usize) -> usize {
    self.counts[level]
  }

  #[cfg(test)]
  pub(crate) fn head(&self, level: usize) -> Option<usize> {
    self.heads[level].map(|idx| idx as usize)
  }

  /// First level at or above `level` with a free block.
  pub(crate) fn first_non_empty(&self, level: usize) -> Option<usize> {
    (level..MAX_LEVELS).find(|&l| !self.is_empty(l))
  }

  /// Push block `idx` at the head of `level`'s list.
  pub(crate) fn push(&mut self, idx: usize, level: usize) {
    debug_assert_eq!(self.headers[idx], Header::Vacant, "push: block {idx} is not vacant");
    self.headers[idx] = Header::Free {
      next: self.heads[level],
    };
    self.heads[level] = Some(idx as u32);
    self.counts[level] += 1;
  }

  /// Pop the head of `level`'s list. The popped slot is left vacant.
  pub(crate) fn pop(&mut self, level: usize) -> Option<usize> {
    let idx = self.heads[level]? as usize;
    let Header::Free { next } = self.headers[idx] else {
      unreachable!("free list {level} links to non-free block {idx}");
    };
    self.heads[level] = next;
    self.headers[idx] = Header::Vacant;
    self.counts[level] -= 1;
    Some(idx)
  }

  /// Unlink block `idx` from `level`'s list if present.
  /// Returns true if it was found and removed.
  pub(crate) fn remove(&mut self, idx: usize, level: usize) -> bool {
    let target = idx as u32;
    let mut prev: Option<u32> = None;
    let mut cur = self.heads[level];

    // Walk the list to find the block
    while let Some(c) = cur {
      let Header::Free { next } = self.headers[c as usize] else {
        unreachable!("free list {level} links to non-free block {c}");
      };
      if c == target {
        match prev {
          None => self.heads[level] = next,
          Some(p) => self.headers[p as usize] = Header::Free { next },
        }
        self.headers[c as usize] = Header::Vacant;
        self.counts[level] -= 1;
        return true;
      }
      prev = cur;
      cur = next;
    }

    false
  }

  /// Iterate `level`'s list from the head.
  pub(crate) fn iter(&self, level: usize) -> impl Iterator<Item = usize> + '_ {
    let mut cur = self.heads[level];
    std::iter::from_fn(move || {
      let idx = cur?;
      cur = match self.headers[idx as usize] {
        Header::Free { next } => next,
        _ => None,
      };
      Some(idx as usize)
    })
  }

  /// Mark the vacant slot `idx` as allocated with `requested` payload bytes.
  pub(crate) fn set_allocated(&mut self, idx: usize, requested: usize) {
    debug_assert_eq!(self.headers[idx], Header::Vacant);
    self.headers[idx] = Header::Allocated {
      requested: requested as u32,
    };
  }

  /// Requested size of the allocated block at `idx`.
  pub(crate) fn requested(&self, idx: usize) -> Option<usize> {
    match self.headers[idx] {
      Header::Allocated { requested } => Some(requested as usize),
      _ => None,
    }
  }

  /// Turn the allocated block at `idx` back into a vacant slot.
  pub(crate) fn clear_allocated(&mut self, idx: usize) {
    debug_assert!(matches!(self.headers[idx], Header::Allocated { .. }));
    self.headers[idx] = Header::Vacant;
  }

  /// Snapshot of every list, head first.
  #[cfg(test)]
  pub(crate) fn snapshot(&self) -> Vec<Vec<usize>> {
    (0..MAX_LEVELS).map(|level| self.iter(level).collect()).collect()
  }
}

/// A `len` slot table filled with `fill`. Reports a heap that cannot hold
/// it instead of aborting.
pub(crate) fn table<T: Clone>(len: usize, fill: T) -> Result<Vec<T>> {
  let mut slots = Vec::new();
  slots
    .try_reserve_exact(len)
    .map_err(|source| BuddyError::TableReserve { units: len, source })?;
  slots.resize(len, fill);
  Ok(slots)
}
