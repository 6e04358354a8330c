//! Live block registry: block index -> level.

use crate::{error::Result, free_list::table, level::MAX_LEVELS};

const _: () = assert!(MAX_LEVELS <= u8::MAX as usize);

/// Levels of the blocks currently handed out, indexed by block index.
///
/// This is the only record of a live block's level; the block header's
/// requested size is never used to infer it.
pub(crate) struct Registry {
  levels: Vec<Option<u8>>,
  live: usize,
}

impl Registry {
  pub(crate) fn new(units: usize) -> Result<Self> {
    Ok(Self {
      levels: table(units, None)?,
      live: 0,
    })
  }

  pub(crate) fn insert(&mut self, idx: usize, level: usize) {
    debug_assert!(level < MAX_LEVELS);
    let prev = self.levels[idx].replace(level as u8);
    debug_assert!(prev.is_none(), "registry: block {idx} registered twice");
    self.live += 1;
  }

  pub(crate) fn get(&self, idx: usize) -> Option<usize> {
    self.levels.get(idx).copied().flatten().map(usize::from)
  }

  /// Remove the entry for `idx`, returning its level.
  pub(crate) fn remove(&mut self, idx: usize) -> Option<usize> {
    let level = self.levels.get_mut(idx)?.take()?;
    self.live -= 1;
    Some(level as usize)
  }

  /// Number of live blocks.
  pub(crate) fn len(&self) -> usize {
    self.live
  }

  /// Live blocks as `(index, level)` in index order.
  pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
    self
      .levels
      .iter()
      .enumerate()
      .filter_map(|(idx, level)| level.map(|l| (idx, l as usize)))
  }
}
