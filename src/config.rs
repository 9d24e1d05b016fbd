/// Default number of entries in the free-block index.
pub const DEFAULT_INDEX_CAPACITY: usize = 1024;

/// Knobs fixed for the lifetime of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Maximum number of free blocks tracked at once. Blocks freed past this
  /// limit are leaked.
  pub index_capacity: usize,
}

impl Config {
  pub const fn new() -> Self {
    Self {
      index_capacity: DEFAULT_INDEX_CAPACITY,
    }
  }

  /// Sets the index capacity; anything below 1 becomes 1.
  pub const fn with_index_capacity(
    mut self,
    index_capacity: usize,
  ) -> Self {
    self.index_capacity = if index_capacity == 0 { 1 } else { index_capacity };
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}
