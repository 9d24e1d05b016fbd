use thiserror::Error;

/// Everything the allocator can report back to a caller.
///
/// Nothing here is fatal: every operation returns one of these and leaves the
/// heap usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("region of {requested} bytes is smaller than one block header ({minimum} bytes)")]
  InitializationTooSmall { requested: usize, minimum: usize },

  #[error("heap already manages a region, tear it down first")]
  AlreadyInitialized,

  #[error("could not acquire {requested} bytes from the OS (errno {errno})")]
  OsAcquisitionFailed { requested: usize, errno: i32 },

  #[error("requested allocation size is 0, nothing allocated")]
  ZeroSize,

  #[error("out of memory (requested: {requested} bytes)")]
  OutOfMemory { requested: usize },

  #[error("free block index is full ({capacity} entries), block leaked")]
  IndexOverflow { capacity: usize },

  #[error("invalid pointer {address:#x}")]
  InvalidPointer { address: usize },
}

pub type Result<T> = std::result::Result<T, AllocError>;
