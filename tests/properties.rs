use std::ptr::NonNull;

use buddyarena::{BuddyAllocator, BuddyConfig, MAX_LEVELS, block_size, buddy_of, level_for};
use proptest::prelude::*;

const MIB: usize = 1 << 20;

/// Allocator without the scratch fast path, so every pointer is an arena block.
fn arena(capacity: usize) -> BuddyAllocator {
  BuddyAllocator::with_config(BuddyConfig::new(capacity).with_scratch_fast_path(0)).unwrap()
}

fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
  unsafe { ptr.as_ptr().write_bytes(byte, len) };
}

fn holds(ptr: NonNull<u8>, len: usize, byte: u8) -> bool {
  unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
    .iter()
    .all(|&b| b == byte)
}

#[derive(Clone, Debug)]
enum Op {
  Alloc(usize),
  Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    3 => (0usize..8192).prop_map(Op::Alloc),
    2 => any::<usize>().prop_map(Op::Free),
  ]
}

proptest! {
  #[test]
  fn pointers_align_to_their_block_size(size in 0usize..=512 * 1024) {
    let mut a = arena(4 * MIB);
    let ptr = a.alloc(size).unwrap();
    let block = block_size(level_for(size));
    prop_assert_eq!(ptr.as_ptr() as usize % block, 0);
    prop_assert_eq!(a.usable_size(ptr.as_ptr()), Some(block));
  }

  #[test]
  fn any_free_order_restores_the_arena(
    (sizes, order) in prop::collection::vec(1usize..20_000, 1..40).prop_flat_map(|sizes| {
      let n = sizes.len();
      (Just(sizes), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    })
  ) {
    let mut a = arena(8 * MIB);
    let ptrs: Vec<_> = sizes.iter().map(|&size| a.alloc(size).unwrap()).collect();
    for i in order {
      a.free(ptrs[i].as_ptr()).unwrap();
    }

    let stats = a.stats();
    prop_assert!(stats.is_fully_coalesced());
    prop_assert_eq!(stats.free_blocks.iter().sum::<usize>(), 1);
    prop_assert_eq!(stats.free_blocks[a.top_level()], 1);
    prop_assert!(a.audit().is_ok());
  }

  #[test]
  fn buddy_offsets_flip_the_size_bit(level in 0..MAX_LEVELS, k in 0usize..1024) {
    let size = block_size(level);
    let offset = k * size;
    let buddy = buddy_of(offset, level);
    prop_assert_eq!(buddy, offset ^ size);
    prop_assert_eq!(buddy_of(buddy, level), offset);
    prop_assert_eq!(offset.min(buddy) % (2 * size), 0);
  }

  #[test]
  fn first_two_blocks_of_a_level_are_buddies(level in 0usize..14, churn in 0usize..8) {
    let mut a = arena(MIB);
    // Prior history must not change buddy placement once everything is free.
    for i in 0..churn {
      let p = a.alloc(64 << (i % 10)).unwrap();
      a.free(p.as_ptr()).unwrap();
    }

    let size = block_size(level);
    let first = a.alloc(size).unwrap().as_ptr() as usize;
    let second = a.alloc(size).unwrap().as_ptr() as usize;
    prop_assert_eq!(second - first, buddy_of(0, level));
  }

  #[test]
  fn live_blocks_never_overlap(ops in prop::collection::vec(op(), 1..64)) {
    let mut a = arena(256 * 1024);
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();
    let mut tag = 0u8;

    for op in ops {
      match op {
        Op::Alloc(size) => {
          if let Ok(ptr) = a.alloc(size) {
            tag = tag.wrapping_add(1);
            fill(ptr, size, tag);
            live.push((ptr, size, tag));
          }
        }
        Op::Free(pick) if !live.is_empty() => {
          let (ptr, _, _) = live.swap_remove(pick % live.len());
          a.free(ptr.as_ptr()).unwrap();
        }
        Op::Free(_) => {}
      }

      prop_assert!(a.audit().is_ok(), "{:?}", a.audit());
      let mut ranges: Vec<_> = live
        .iter()
        .map(|&(ptr, _, _)| {
          let start = ptr.as_ptr() as usize;
          (start, start + a.usable_size(ptr.as_ptr()).unwrap())
        })
        .collect();
      ranges.sort_unstable();
      for pair in ranges.windows(2) {
        prop_assert!(pair[0].1 <= pair[1].0, "{:x?} overlaps {:x?}", pair[0], pair[1]);
      }
    }

    for (ptr, size, tag) in live {
      prop_assert!(holds(ptr, size, tag));
    }
  }

  #[test]
  fn shrinking_realloc_keeps_the_pointer(
    (recorded, smaller) in (1usize..100_000).prop_flat_map(|s| (Just(s), 1..=s))
  ) {
    let mut a = arena(MIB);
    let p = a.alloc(recorded).unwrap();
    fill(p, recorded, 0xA5);
    prop_assert_eq!(a.realloc(p.as_ptr(), smaller).unwrap(), Some(p));
    prop_assert!(holds(p, recorded, 0xA5));
  }

  #[test]
  fn oversized_requests_leave_live_data_intact(
    sizes in prop::collection::vec(1usize..30_000, 0..20),
    excess in 1usize..4 * MIB,
  ) {
    let mut a = arena(MIB);
    let live: Vec<_> = sizes
      .iter()
      .enumerate()
      .map(|(i, &size)| {
        let ptr = a.alloc(size).unwrap();
        fill(ptr, size, i as u8);
        (ptr, size, i as u8)
      })
      .collect();
    let before = a.stats();

    let err = a.alloc(a.capacity() + excess).unwrap_err();
    prop_assert!(err.is_exhausted());

    prop_assert_eq!(a.stats(), before);
    for (ptr, size, byte) in live {
      prop_assert!(holds(ptr, size, byte));
    }
  }
}
