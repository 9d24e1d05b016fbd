use std::{io, ptr::NonNull};

use libc::{c_void, intptr_t};
use log::debug;

use crate::{
  align::{ALIGNMENT, checked_align},
  error::{AllocError, Result},
};

/// Where a [`Heap`](crate::Heap) gets its one region from.
///
/// A source hands out memory and never takes it back: tearing a heap down
/// forgets the region but leaves it reserved for the process.
pub trait RegionSource {
  /// Returns the start of `len` freshly reserved, writable bytes, aligned to
  /// [`ALIGNMENT`]. The memory must stay valid for the rest of the process.
  fn acquire(
    &mut self,
    len: usize,
  ) -> Result<NonNull<u8>>;
}

fn os_error(requested: usize) -> AllocError {
  AllocError::OsAcquisitionFailed {
    requested,
    errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
  }
}

/// Grows the data segment with `sbrk(2)`.
///
/// `sbrk` is not thread safe and shares the program break with the system
/// allocator, so only one thread may acquire through it at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgramBreak;

impl RegionSource for ProgramBreak {
  fn acquire(
    &mut self,
    len: usize,
  ) -> Result<NonNull<u8>> {
    // The current break is not guaranteed to be word aligned.
    let padded = len
      .checked_add(ALIGNMENT - 1)
      .filter(|padded| *padded <= intptr_t::MAX as usize)
      .ok_or(AllocError::OsAcquisitionFailed {
        requested: len,
        errno: libc::ENOMEM,
      })?;

    // SAFETY: sbrk only moves the program break; the returned range belongs
    // to us until the process exits.
    let address = unsafe { libc::sbrk(padded as intptr_t) };

    if address == usize::MAX as *mut c_void {
      return Err(os_error(len));
    }

    let start = address as usize;
    let aligned = checked_align(start).ok_or_else(|| os_error(len))?;

    debug!(
      "sbrk({}) = {:?}, program break = {:?}",
      padded,
      address,
      // SAFETY: sbrk(0) only reads the current break.
      unsafe { libc::sbrk(0) }
    );

    NonNull::new(aligned as *mut u8).ok_or_else(|| os_error(len))
  }
}

/// Reserves anonymous private pages with `mmap(2)`.
///
/// Independent of the program break, so several heaps (or threads that each
/// own a heap) can acquire regions side by side.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappedPages;

impl RegionSource for MappedPages {
  fn acquire(
    &mut self,
    len: usize,
  ) -> Result<NonNull<u8>> {
    // SAFETY: anonymous private mapping with no address hint, nothing else
    // aliases the returned pages.
    let address = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        len.max(1),
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(os_error(len));
    }

    debug!("mmap({}) = {:?}", len, address);

    NonNull::new(address as *mut u8).ok_or_else(|| os_error(len))
  }
}
