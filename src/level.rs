//! Level arithmetic: sizes to levels, levels to block sizes, buddy offsets.
//!
//! Every function here is pure. Internally the allocator counts blocks in
//! `MIN_BLOCK_SIZE` units ("block indices"), so a block at level `L` spans
//! `1 << L` units and its buddy index is `index ^ (1 << L)`.

/// Smallest block handed out by the allocator.
pub const MIN_BLOCK_SIZE: usize = 64;
pub(crate) const MIN_BLOCK_SIZE_BITS: u32 = MIN_BLOCK_SIZE.trailing_zeros();

/// Number of levels in the free list table. The largest block is
/// `MIN_BLOCK_SIZE << (MAX_LEVELS - 1)` (32 MiB).
pub const MAX_LEVELS: usize = 20;

/// Largest level a size can map to.
pub(crate) const TOP_LEVEL: usize = MAX_LEVELS - 1;

/// Largest block the allocator can hand out.
pub const MAX_BLOCK_SIZE: usize = block_size(TOP_LEVEL);

/// Bytes of in-arena overhead per block. Block state lives in a side table,
/// so the payload starts at the first byte of the block.
pub(crate) const BLOCK_HEADER_SIZE: usize = 0;

const _: () = assert!(MIN_BLOCK_SIZE.is_power_of_two());
const _: () =
  assert!(MAX_LEVELS >= 1 && MAX_LEVELS < (usize::BITS - MIN_BLOCK_SIZE_BITS) as usize);
const _: () = assert!(MAX_BLOCK_SIZE == 32 << 20);
const _: () = assert!(BLOCK_HEADER_SIZE < MIN_BLOCK_SIZE);

/// Block size in bytes at `level`.
#[inline(always)]
pub const fn block_size(level: usize) -> usize {
  MIN_BLOCK_SIZE << level
}

/// Smallest level whose block holds `size` payload bytes plus the header,
/// clamped to `TOP_LEVEL`.
///
/// The clamp means a result of `TOP_LEVEL` does not guarantee the payload
/// fits; callers compare against [`block_size`] to detect oversized requests.
#[inline]
pub const fn level_for(size: usize) -> usize {
  let padded = size.saturating_add(BLOCK_HEADER_SIZE);
  if padded <= MIN_BLOCK_SIZE {
    return 0;
  }
  // ceil(log2(padded)) - log2(MIN_BLOCK_SIZE), without overflowing on
  // `next_power_of_two` for huge sizes.
  let bits = usize::BITS - (padded - 1).leading_zeros();
  let level = (bits - MIN_BLOCK_SIZE_BITS) as usize;
  if level > TOP_LEVEL { TOP_LEVEL } else { level }
}

/// Whether `size` payload bytes fit in a block at `level`.
#[inline(always)]
pub(crate) const fn fits(size: usize, level: usize) -> bool {
  match size.checked_add(BLOCK_HEADER_SIZE) {
    Some(padded) => padded <= block_size(level),
    None => false,
  }
}

/// Arena-relative byte offset of the buddy of the block at `offset`.
///
/// `offset` must be a multiple of `block_size(level)`.
#[inline(always)]
pub const fn buddy_of(offset: usize, level: usize) -> usize {
  offset ^ block_size(level)
}

/// Number of `MIN_BLOCK_SIZE` units covered by a block at `level`.
#[inline(always)]
pub(crate) const fn units(level: usize) -> usize {
  1 << level
}

/// Block index of the buddy of `idx` at `level`.
#[inline(always)]
pub(crate) const fn buddy_idx(idx: usize, level: usize) -> usize {
  idx ^ units(level)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn block_sizes_double_per_level() {
    assert_eq!(block_size(0), 64);
    assert_eq!(block_size(1), 128);
    assert_eq!(block_size(10), 64 * 1024);
    assert_eq!(block_size(TOP_LEVEL), 32 * 1024 * 1024);
  }

  #[test]
  fn level_for_picks_smallest_fitting_level() {
    assert_eq!(level_for(0), 0);
    assert_eq!(level_for(1), 0);
    assert_eq!(level_for(64), 0);
    assert_eq!(level_for(65), 1);
    assert_eq!(level_for(100), 1);
    assert_eq!(level_for(128), 1);
    assert_eq!(level_for(200), 2);
    assert_eq!(level_for(4096), 6);
    assert_eq!(level_for(4097), 7);

    for level in 0..MAX_LEVELS {
      let size = block_size(level);
      assert_eq!(level_for(size), level);
      assert!(fits(size, level));
      if level > 0 {
        assert_eq!(level_for(size / 2 + 1), level);
        assert!(!fits(size, level - 1));
      }
    }
  }

  #[test]
  fn level_for_clamps_below_max_levels() {
    assert_eq!(level_for(MAX_BLOCK_SIZE + 1), TOP_LEVEL);
    assert_eq!(level_for(usize::MAX / 2), TOP_LEVEL);
    assert_eq!(level_for(usize::MAX), TOP_LEVEL);
    assert!(!fits(MAX_BLOCK_SIZE + 1, TOP_LEVEL));
    assert!(!fits(usize::MAX, TOP_LEVEL));
  }

  #[test]
  fn buddies_differ_in_the_size_bit_only() {
    for level in 0..MAX_LEVELS {
      let size = block_size(level);
      for k in 0..8 {
        let offset = k * size;
        let buddy = buddy_of(offset, level);
        assert_eq!(buddy_of(buddy, level), offset);
        assert_eq!(buddy.abs_diff(offset), size);
        // The pair forms one aligned block a level up.
        assert_eq!(offset.min(buddy) % (size * 2), 0);
      }
    }
  }

  #[test]
  fn index_arithmetic_matches_offsets() {
    for level in 0..MAX_LEVELS {
      for k in 0..4 {
        let idx = k * units(level);
        let offset = idx * MIN_BLOCK_SIZE;
        assert_eq!(buddy_idx(idx, level) * MIN_BLOCK_SIZE, buddy_of(offset, level));
      }
    }
  }
}
