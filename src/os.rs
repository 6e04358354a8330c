//! Anonymous memory mappings.

use std::{
  io,
  ptr::{NonNull, null_mut},
  sync::OnceLock,
};

use crate::error::{BuddyError, Result};

pub(crate) fn page_size() -> usize {
  static PAGE: OnceLock<usize> = OnceLock::new();
  *PAGE.get_or_init(|| {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 { 4096 } else { page as usize }
  })
}

unsafe fn os_mmap(size: usize) -> *mut u8 {
  let ptr = unsafe {
    libc::mmap(
      null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    null_mut()
  } else {
    ptr as *mut u8
  }
}

unsafe fn os_munmap(ptr: *mut u8, size: usize) {
  unsafe { libc::munmap(ptr.cast(), size) };
}

/// Rounds `x` up to the next multiple of alignment `align`. Alignment must be a power of 2.
#[inline(always)]
pub(crate) const fn align_up(x: usize, align: usize) -> usize {
  let mask = align - 1;
  (x + mask) & !mask
}

/// An owned, read-write, anonymous private mapping. Unmapped on drop.
#[derive(Debug)]
pub(crate) struct Mapping {
  ptr: NonNull<u8>,
  len: usize,
}

impl Mapping {
  /// Maps `len` bytes whose start is aligned to `align` (a power of two).
  ///
  /// Alignments above the page size over-map by `align` and trim the slack
  /// on both sides.
  pub(crate) fn new(len: usize, align: usize) -> Result<Self> {
    debug_assert!(align.is_power_of_two());
    let page = page_size();
    let len = len.max(1);

    if align <= page {
      let raw = unsafe { os_mmap(len) };
      return match NonNull::new(raw) {
        Some(ptr) => Ok(Self { ptr, len }),
        None => Err(map_failed(len)),
      };
    }

    let Some((len, total)) = len
      .checked_next_multiple_of(page)
      .and_then(|len| Some((len, len.checked_add(align)?)))
    else {
      return Err(BuddyError::MapFailed {
        size: len,
        source: io::Error::from_raw_os_error(libc::ENOMEM),
      });
    };
    let raw = unsafe { os_mmap(total) };
    if raw.is_null() {
      return Err(map_failed(total));
    }

    let start = raw as usize;
    let aligned = align_up(start, align);
    let head = aligned - start;
    let tail = total - head - len;
    unsafe {
      if head > 0 {
        os_munmap(raw, head);
      }
      if tail > 0 {
        os_munmap((aligned + len) as *mut u8, tail);
      }
    }

    // `aligned` lies inside a successful mapping, so it is non-null.
    let ptr = unsafe { NonNull::new_unchecked(aligned as *mut u8) };
    Ok(Self { ptr, len })
  }

  #[inline]
  pub(crate) fn as_ptr(&self) -> NonNull<u8> {
    self.ptr
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len
  }

  /// Drops the physical pages behind `[offset, offset + len)`. The range stays
  /// mapped and reads back as zeroes.
  #[cfg(feature = "release-mem")]
  pub(crate) fn discard(&self, offset: usize, len: usize) {
    debug_assert!(offset + len <= self.len);
    debug_assert!(offset % page_size() == 0 && len % page_size() == 0);
    unsafe {
      libc::madvise(
        self.ptr.as_ptr().add(offset).cast(),
        len,
        libc::MADV_DONTNEED,
      );
    }
  }
}

impl Drop for Mapping {
  fn drop(&mut self) {
    unsafe { os_munmap(self.ptr.as_ptr(), self.len) };
  }
}

fn map_failed(size: usize) -> BuddyError {
  BuddyError::MapFailed {
    size,
    source: io::Error::last_os_error(),
  }
}
