use std::mem;

use crate::align;

/// Metadata stored in front of every payload.
///
/// ```text
///   ┌──────────────────┬─────────────────────────────┐
///   │   BlockHeader    │          payload            │
///   │ size | is_free   │        `size` bytes         │
///   └──────────────────┴─────────────────────────────┘
///   ▲                  ▲
///   offset             offset + HEADER_SIZE
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
  pub size: usize,
  pub is_free: bool,
}

impl BlockHeader {
  pub fn new(
    size: usize,
    is_free: bool,
  ) -> Self {
    Self { size, is_free }
  }
}

/// Bytes taken by a header, padded so payloads stay aligned.
pub const HEADER_SIZE: usize = align!(mem::size_of::<BlockHeader>());

/// Handle to a block: its byte offset from the start of the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
  pub const fn new(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn offset(self) -> usize {
    self.0
  }

  /// Offset of the payload that belongs to this block.
  pub const fn payload_offset(self) -> usize {
    self.0 + HEADER_SIZE
  }

  /// Offset right past the payload, where the physical successor would start.
  pub const fn end_offset(
    self,
    size: usize,
  ) -> usize {
    self.0 + HEADER_SIZE + size
  }
}

/// Read-only snapshot of one block, in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub offset: usize,
  pub size: usize,
  pub is_free: bool,
}
