#![cfg(target_os = "linux")]

use buddyarena::{BuddyAllocator, BuddyError};

const GIB: u64 = 1 << 30;

/// Bytes of address space the process currently uses.
fn address_space() -> u64 {
  let statm = std::fs::read_to_string("/proc/self/statm").unwrap();
  let pages: u64 = statm.split_whitespace().next().unwrap().parse().unwrap();
  let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
  pages * page
}

fn set_address_limit(limit: libc::rlimit) {
  assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) }, 0);
}

// Runs alone in this binary: the limit applies to the whole process.
#[test]
fn construction_beyond_the_address_limit_is_an_error() {
  let mut saved = libc::rlimit {
    rlim_cur: 0,
    rlim_max: 0,
  };
  assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut saved) }, 0);

  let cap = address_space() + GIB;
  if saved.rlim_cur != libc::RLIM_INFINITY && saved.rlim_cur < cap {
    return;
  }
  set_address_limit(libc::rlimit {
    rlim_cur: cap as libc::rlim_t,
    rlim_max: saved.rlim_max,
  });

  // A 64 GiB arena, far past the limit.
  let huge = BuddyAllocator::new(1 << 36);
  let small = BuddyAllocator::new(1 << 20).map(|mut a| a.alloc(100).is_ok());

  set_address_limit(saved);

  let err = huge.err().unwrap();
  assert!(
    matches!(err, BuddyError::MapFailed { .. } | BuddyError::TableReserve { .. }),
    "{err}"
  );
  assert!(small.unwrap());
}
