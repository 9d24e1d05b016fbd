use std::ptr::{self, NonNull};

use crate::{
  align::ALIGNMENT,
  block::{BlockHeader, BlockId, HEADER_SIZE},
};

/// The single contiguous extent a heap carves into blocks.
///
/// This is the only place that turns a [`BlockId`] into memory. Every block id
/// handed in must come from the heap that owns this region, so that
/// `offset + HEADER_SIZE <= len` and `offset` is a multiple of [`ALIGNMENT`];
/// the heap maintains that for all ids it stores.
#[derive(Debug)]
pub struct Region {
  base: NonNull<u8>,
  len: usize,
}

impl Region {
  /// `base` must point to `len` writable bytes aligned to [`ALIGNMENT`] that
  /// outlive the region.
  pub fn new(
    base: NonNull<u8>,
    len: usize,
  ) -> Self {
    debug_assert_eq!(base.as_ptr() as usize % ALIGNMENT, 0);
    debug_assert_eq!(len % ALIGNMENT, 0);
    Self { base, len }
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn len(&self) -> usize {
    self.len
  }

  /// Offset of `address` from the base, if it lies inside the region.
  pub fn offset_of(
    &self,
    address: *const u8,
  ) -> Option<usize> {
    let start = self.base.as_ptr() as usize;
    let address = address as usize;

    if address < start || address >= start + self.len {
      return None;
    }

    Some(address - start)
  }

  fn header_ptr(
    &self,
    id: BlockId,
  ) -> *mut BlockHeader {
    debug_assert!(id.offset() + HEADER_SIZE <= self.len);
    debug_assert_eq!(id.offset() % ALIGNMENT, 0);
    // SAFETY: the offset is in bounds by the invariant documented on the type.
    unsafe { self.base.as_ptr().add(id.offset()) as *mut BlockHeader }
  }

  pub fn header(
    &self,
    id: BlockId,
  ) -> BlockHeader {
    // SAFETY: in bounds and aligned, and every stored id had its header written
    // before it was handed out.
    unsafe { self.header_ptr(id).read() }
  }

  pub fn header_mut(
    &mut self,
    id: BlockId,
  ) -> &mut BlockHeader {
    // SAFETY: as in `header`; `&mut self` keeps the reference unique.
    unsafe { &mut *self.header_ptr(id) }
  }

  /// Writes a fresh header, used when a block is created by init or a split.
  pub fn write_header(
    &mut self,
    id: BlockId,
    header: BlockHeader,
  ) {
    // SAFETY: in bounds and aligned; the bytes may be uninitialized payload of
    // the block being split, so write without reading.
    unsafe { self.header_ptr(id).write(header) }
  }

  /// Pointer to the first payload byte of `id`.
  pub fn payload(
    &self,
    id: BlockId,
  ) -> NonNull<u8> {
    debug_assert!(id.payload_offset() <= self.len);
    // SAFETY: payload_offset <= len, so the pointer stays within (or one past)
    // the region and is never null.
    unsafe { self.base.add(id.payload_offset()) }
  }

  /// Zeroes the whole payload of `id`.
  pub fn zero_payload(
    &mut self,
    id: BlockId,
  ) {
    let size = self.header(id).size;
    debug_assert!(id.end_offset(size) <= self.len);
    // SAFETY: the payload spans `size` bytes inside the region.
    unsafe { self.payload(id).as_ptr().write_bytes(0, size) }
  }

  /// Copies `len` payload bytes from `from` to `to`. The blocks are distinct
  /// live blocks, so their payloads never overlap.
  pub fn copy_payload(
    &mut self,
    from: BlockId,
    to: BlockId,
    len: usize,
  ) {
    debug_assert_ne!(from, to);
    debug_assert!(len <= self.header(from).size);
    debug_assert!(len <= self.header(to).size);
    // SAFETY: both ranges are inside the region and belong to different blocks.
    unsafe {
      ptr::copy_nonoverlapping(
        self.payload(from).as_ptr(),
        self.payload(to).as_ptr(),
        len,
      )
    }
  }
}
