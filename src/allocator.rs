use std::{
  collections::HashSet,
  ptr::{self, NonNull},
};

use tracing::{debug, trace, warn};

use crate::{
  arena::Arena,
  buddy::{self, Buddy},
  cache::ScratchCache,
  config::BuddyConfig,
  error::{BuddyError, Result},
  free_list::Header,
  level::{self, MAX_LEVELS},
  registry::Registry,
};

/// Byte written over freed payloads with `debug-tripwire`.
#[cfg(feature = "debug-tripwire")]
pub const POISON: u8 = 0xDD;

// =============================================================================
// Allocator
// =============================================================================

/// Fixed-capacity buddy allocator over one `mmap`ed arena.
///
/// Not thread safe: every operation takes `&mut self`. The type is `Send`, so
/// an instance can be shared behind a `Mutex`.
pub struct BuddyAllocator {
  cache: ScratchCache,
  registry: Registry,
  buddy: Buddy,
  arena: Arena,
  config: BuddyConfig,
}

// The allocator exclusively owns its mappings; handing the whole instance to
// another thread is sound.
unsafe impl Send for BuddyAllocator {}

impl BuddyAllocator {
  /// Allocator with an arena of at least `capacity` bytes and default
  /// settings otherwise.
  pub fn new(capacity: usize) -> Result<Self> {
    Self::with_config(BuddyConfig::new(capacity))
  }

  pub fn with_config(config: BuddyConfig) -> Result<Self> {
    let (size, units) = config.arena_geometry()?;
    // The arena is reserved first; the tables behind it are touched eagerly.
    let arena = Arena::new(size, buddy::top_level_for(units))?;
    let buddy = Buddy::new(units)?;
    let registry = Registry::new(units)?;
    debug!(
      requested = config.capacity,
      size,
      top_level = buddy.top_level(),
      "buddy allocator created"
    );

    Ok(Self {
      cache: ScratchCache::default(),
      registry,
      buddy,
      arena,
      config,
    })
  }

  /// Arena size in bytes.
  pub fn capacity(&self) -> usize {
    self.arena.size()
  }

  /// Highest level a block of this arena can reach.
  pub fn top_level(&self) -> usize {
    self.buddy.top_level()
  }

  pub fn config(&self) -> &BuddyConfig {
    &self.config
  }

  // ===========================================================================
  // alloc / free
  // ===========================================================================

  /// Allocate `size` bytes.
  ///
  /// Requests up to the configured fast-path limit are served from an idle
  /// scratch buffer when one is large enough. Everything else comes from the
  /// arena, aligned to the block size the request maps to.
  pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
    if size <= self.config.scratch_fast_path
      && let Some(ptr) = self.cache.lend(size)
    {
      trace!(size, "alloc served from scratch buffer");
      return Ok(ptr);
    }

    let level = level::level_for(size);
    if !level::fits(size, level) {
      debug!(size, "allocation larger than the largest block");
      return Err(BuddyError::SizeOverflow { size });
    }

    let idx = match self.buddy.take(level, size) {
      Ok(idx) => idx,
      Err(err) => {
        debug!(size, level, %err, "allocation failed");
        return Err(err);
      }
    };

    self.buddy.lists_mut().set_allocated(idx, size);
    self.registry.insert(idx, level);
    self.tripwire();

    trace!(size, level, idx, "alloc");
    Ok(self.arena.block_ptr(idx))
  }

  /// Allocate `size` zeroed bytes.
  pub fn alloc_zeroed(&mut self, size: usize) -> Result<NonNull<u8>> {
    let ptr = self.alloc(size)?;
    unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
    Ok(ptr)
  }

  /// Return a block to the arena. Null is a no-op.
  ///
  /// Pointers this allocator did not hand out (or already took back) are
  /// reported as [`BuddyError::InvalidFree`] and otherwise ignored.
  pub fn free(&mut self, ptr: *mut u8) -> Result<()> {
    if ptr.is_null() {
      return Ok(());
    }

    match self.lookup(ptr) {
      Some((idx, level)) => {
        self.release_block(idx, level);
        Ok(())
      }
      None if self.cache.reclaim(ptr) => Ok(()),
      None => Err(self.invalid_free(ptr)),
    }
  }

  /// Resize an allocation.
  ///
  /// Null behaves like [`alloc`](Self::alloc); a zero size frees the block and
  /// returns `None`. Sizes up to the one recorded at the last alloc/realloc
  /// keep the same pointer. Otherwise the recorded bytes move to a new block;
  /// if that allocation fails the original block is untouched.
  pub fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> Result<Option<NonNull<u8>>> {
    if ptr.is_null() {
      return self.alloc(new_size).map(Some);
    }

    if new_size == 0 {
      self.free(ptr)?;
      return Ok(None);
    }

    let Some(recorded) = self.recorded_size(ptr) else {
      return Err(self.invalid_free(ptr));
    };
    if new_size <= recorded {
      return Ok(NonNull::new(ptr));
    }

    let new_ptr = self.alloc(new_size)?;
    // Both ranges are live and distinct, and `recorded` fits in each.
    unsafe { ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), recorded) };
    self.free(ptr)?;
    Ok(Some(new_ptr))
  }

  /// Bytes usable behind `ptr`: the block size for arena blocks, the buffer
  /// capacity for scratch buffers handed out by `alloc`.
  pub fn usable_size(&self, ptr: *mut u8) -> Option<usize> {
    match self.lookup(ptr) {
      Some((_, level)) => Some(level::block_size(level)),
      None => self.cache.lent_capacity(ptr),
    }
  }

  fn lookup(&self, ptr: *mut u8) -> Option<(usize, usize)> {
    let idx = self.arena.block_idx(ptr)?;
    let level = self.registry.get(idx)?;
    Some((idx, level))
  }

  fn recorded_size(&self, ptr: *mut u8) -> Option<usize> {
    match self.lookup(ptr) {
      Some((idx, _)) => self.buddy.lists().requested(idx),
      None => self.cache.lent_requested(ptr),
    }
  }

  fn release_block(&mut self, idx: usize, level: usize) {
    self.registry.remove(idx);
    self.buddy.lists_mut().clear_allocated(idx);

    #[cfg(feature = "debug-tripwire")]
    {
      let block = self.arena.block_ptr(idx).as_ptr();
      unsafe { ptr::write_bytes(block, POISON, level::block_size(level)) };
    }

    let (merged, merged_level) = self.buddy.coalesce(idx, level);
    trace!(idx, level, merged, merged_level, "free");

    #[cfg(feature = "release-mem")]
    self.arena.discard(merged, merged_level);

    self.tripwire();
  }

  fn invalid_free(&self, ptr: *mut u8) -> BuddyError {
    warn!(?ptr, "invalid free: pointer was not allocated by this allocator");
    BuddyError::InvalidFree { addr: ptr as usize }
  }

  // ===========================================================================
  // Scratch cache
  // ===========================================================================

  /// A scratch buffer of at least `size` bytes, mapped outside the arena.
  ///
  /// The cached buffer is returned as is when it is large enough; otherwise
  /// it is replaced, which invalidates earlier handles to it.
  pub fn get_cache(&mut self, size: usize) -> Result<NonNull<u8>> {
    self.cache.get(size)
  }

  /// Unmap the cached scratch buffer, if any.
  pub fn release_cache(&mut self) {
    self.cache.release();
  }

  // ===========================================================================
  // Introspection
  // ===========================================================================

  pub fn stats(&self) -> BuddyStats {
    let lists = self.buddy.lists();
    let mut allocated_bytes = 0;
    let mut requested_bytes = 0;
    for (idx, level) in self.registry.iter() {
      allocated_bytes += level::block_size(level);
      requested_bytes += lists.requested(idx).unwrap_or(0);
    }

    BuddyStats {
      arena_bytes: self.capacity(),
      top_level: self.top_level(),
      live_blocks: self.registry.len(),
      allocated_bytes,
      requested_bytes,
      free_bytes: self.capacity() - allocated_bytes,
      free_blocks: self.buddy.free_counts(),
      scratch_cached_bytes: self.cache.cached_bytes(),
      scratch_lent_bytes: self.cache.lent_bytes(),
    }
  }

  /// Walk the whole block table and check that free and live blocks tile the
  /// arena: aligned to their size, inside the arena, never overlapping, with
  /// headers matching their state and no pair of free buddies left unmerged.
  pub fn audit(&self) -> Result<()> {
    let lists = self.buddy.lists();
    let units = lists.units();
    let mut covered = vec![false; units];
    let mut free = HashSet::new();
    let mut blocks = 0;

    for level in 0..MAX_LEVELS {
      let mut len = 0;
      for idx in lists.iter(level) {
        let header = lists.header(idx);
        if !matches!(header, Header::Free { .. }) {
          return Err(corrupted(format!("free block {idx} at level {level} has header {header:?}")));
        }
        claim(&mut covered, idx, level, "free")?;
        free.insert((idx, level));
        len += 1;
      }
      if len != lists.len(level) {
        let counted = lists.len(level);
        return Err(corrupted(format!("level {level} counts {counted} blocks but links {len}")));
      }
      blocks += len;
    }

    for (idx, level) in self.registry.iter() {
      let header = lists.header(idx);
      if !matches!(header, Header::Allocated { .. }) {
        return Err(corrupted(format!("live block {idx} at level {level} has header {header:?}")));
      }
      claim(&mut covered, idx, level, "live")?;
      blocks += 1;
    }

    if let Some(unit) = covered.iter().position(|&c| !c) {
      return Err(corrupted(format!("unit {unit} belongs to no block")));
    }

    let headers = (0..units)
      .filter(|&idx| lists.header(idx) != Header::Vacant)
      .count();
    if headers != blocks {
      return Err(corrupted(format!("{headers} non-vacant headers for {blocks} blocks")));
    }

    for &(idx, level) in &free {
      let buddy = level::buddy_idx(idx, level);
      if level < self.top_level() && free.contains(&(buddy, level)) {
        return Err(corrupted(format!(
          "free buddies {idx} and {buddy} at level {level} not merged"
        )));
      }
    }

    Ok(())
  }

  #[inline(always)]
  fn tripwire(&self) {
    #[cfg(feature = "debug-tripwire")]
    {
      if let Err(err) = self.audit() {
        panic!("{err}");
      }
    }
  }
}

fn claim(covered: &mut [bool], idx: usize, level: usize, what: &str) -> Result<()> {
  let len = level::units(level);
  if idx % len != 0 {
    return Err(corrupted(format!("{what} block {idx} is misaligned for level {level}")));
  }
  if idx + len > covered.len() {
    return Err(corrupted(format!(
      "{what} block {idx} at level {level} crosses the arena end"
    )));
  }
  if let Some(unit) = (idx..idx + len).find(|&u| covered[u]) {
    return Err(corrupted(format!(
      "{what} block {idx} at level {level} overlaps unit {unit}"
    )));
  }
  covered[idx..idx + len].fill(true);
  Ok(())
}

fn corrupted(msg: String) -> BuddyError {
  BuddyError::Corrupted(msg)
}

impl Drop for BuddyAllocator {
  fn drop(&mut self) {
    debug!(
      live_blocks = self.registry.len(),
      "buddy allocator destroyed"
    );
    self.cache.release();
  }
}

// =============================================================================
// Stats
// =============================================================================

/// Point-in-time view of the allocator's memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuddyStats {
  pub arena_bytes: usize,
  pub top_level: usize,
  pub live_blocks: usize,
  /// Sum of the block sizes of live blocks.
  pub allocated_bytes: usize,
  /// Sum of the sizes callers asked for.
  pub requested_bytes: usize,
  pub free_bytes: usize,
  /// Free block count per level.
  pub free_blocks: [usize; MAX_LEVELS],
  pub scratch_cached_bytes: usize,
  /// Scratch buffers handed out by `alloc` and not yet freed.
  pub scratch_lent_bytes: usize,
}

impl BuddyStats {
  /// Size of the largest free block, zero when the arena is full.
  pub fn largest_free_block(&self) -> usize {
    self
      .free_blocks
      .iter()
      .rposition(|&count| count > 0)
      .map_or(0, level::block_size)
  }

  /// Whether the arena is back to its seeded state: nothing live, all of it
  /// in top-level free blocks.
  pub fn is_fully_coalesced(&self) -> bool {
    self.live_blocks == 0
      && self.free_blocks[self.top_level] * level::block_size(self.top_level) == self.arena_bytes
  }
}
