//! # buddyarena
//!
//! A fixed-capacity buddy allocator over a single `mmap`ed arena.
//!
//! ```text
//!   level 14  ┌───────────────────────────────────────────────────────────┐
//!   (1 MiB)   │                          arena                            │
//!             └───────────────────────────────────────────────────────────┘
//!   level 13  ┌─────────────────────────────┬─────────────────────────────┐
//!             │            free             │            free             │
//!             └─────────────────────────────┴─────────────────────────────┘
//!     ...                       split ↓            ↑ coalesce
//!   level 1   ┌──────┬──────┐
//!   (128 B)   │  A   │ free │   buddy(offset, L) = offset ^ (64 << L)
//!             └──────┴──────┘
//! ```
//!
//! Blocks are powers of two from [`MIN_BLOCK_SIZE`] up to [`MAX_BLOCK_SIZE`].
//! A request maps to the smallest level that holds it; a larger free block is
//! split in halves until one of the right size exists. On free, a block merges
//! with its buddy for as long as the buddy is free.
//!
//! Block state lives out of band, in a table indexed by block offset, so the
//! whole block is usable and every pointer is aligned to its block size.
//!
//! A single scratch buffer, mapped outside the arena, serves repeated
//! temporaries (see [`BuddyAllocator::get_cache`]).
//!
//! ```rust
//! use buddyarena::BuddyAllocator;
//!
//! let mut heap = BuddyAllocator::new(1 << 20)?;
//! let a = heap.alloc(100)?;
//! let b = heap.alloc(200)?;
//! heap.free(a.as_ptr())?;
//! let c = heap.alloc(50)?;
//! assert_eq!(a, c);
//! heap.free(b.as_ptr())?;
//! heap.free(c.as_ptr())?;
//! assert!(heap.stats().is_fully_coalesced());
//! # Ok::<(), buddyarena::BuddyError>(())
//! ```
//!
//! ## Features
//!
//! - `release-mem` (default): free blocks of 64 KiB or more give their pages
//!   back to the OS once coalescing settles.
//! - `debug-tripwire`: poison freed payloads and audit the block table after
//!   every alloc and free.
//!
//! The allocator is single threaded. It is `Send`; share it behind a lock.

mod allocator;
mod arena;
mod buddy;
mod cache;
mod config;
mod error;
mod free_list;
mod level;
mod os;
mod registry;

#[cfg(feature = "debug-tripwire")]
pub use allocator::POISON;
pub use allocator::{BuddyAllocator, BuddyStats};
pub use cache::SCRATCH_ALIGN;
pub use config::{BuddyConfig, DEFAULT_CAPACITY, DEFAULT_SCRATCH_FAST_PATH};
pub use error::{BuddyError, Result};
pub use level::{MAX_BLOCK_SIZE, MAX_LEVELS, MIN_BLOCK_SIZE, block_size, buddy_of, level_for};
