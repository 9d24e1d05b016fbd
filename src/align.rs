/// Every block size and every header offset is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use rheap::align;
///
/// assert_eq!(align!(1), 8);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Rounds `value` down to a multiple of [`ALIGNMENT`].
pub const fn align_down(value: usize) -> usize {
  value & !(ALIGNMENT - 1)
}

/// Like [`align!`] but returns `None` instead of overflowing.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(padded) => Some(align_down(padded)),
    None => None,
  }
}
