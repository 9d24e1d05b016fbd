use std::{collections::BTreeSet, ptr::NonNull};

use log::{debug, warn};

use crate::{
  align::{ALIGNMENT, align_down, checked_align},
  block::{BlockHeader, BlockId, BlockInfo, HEADER_SIZE},
  config::Config,
  error::{AllocError, Result},
  index::FreeIndex,
  region::Region,
  source::{ProgramBreak, RegionSource},
};

/// An allocator context over one region.
///
/// All state lives in this value: the region, the free-block index and the
/// address-ordered set of block offsets used to find physical neighbours.
/// Several heaps can coexist, but a single heap must only be driven from one
/// thread at a time.
pub struct Heap<S: RegionSource = ProgramBreak> {
  source: S,
  config: Config,
  region: Option<Region>,
  index: FreeIndex,
  blocks: BTreeSet<usize>,
}

impl Heap<ProgramBreak> {
  /// Heap that acquires its region with `sbrk`, default configuration.
  pub fn new() -> Self {
    Self::with_source(ProgramBreak)
  }
}

impl Default for Heap<ProgramBreak> {
  fn default() -> Self {
    Self::new()
  }
}

fn invalid(ptr: *const u8) -> AllocError {
  AllocError::InvalidPointer {
    address: ptr as usize,
  }
}

/// Maps a payload pointer back to the allocated block it belongs to.
fn locate(
  region: &Region,
  blocks: &BTreeSet<usize>,
  ptr: *const u8,
) -> Result<BlockId> {
  let offset = region
    .offset_of(ptr)
    .filter(|offset| *offset >= HEADER_SIZE)
    .ok_or_else(|| invalid(ptr))?;

  let id = BlockId::new(offset - HEADER_SIZE);

  if !blocks.contains(&id.offset()) || region.header(id).is_free {
    return Err(invalid(ptr));
  }

  Ok(id)
}

impl<S: RegionSource> Heap<S> {
  pub fn with_source(source: S) -> Self {
    Self::with_config(source, Config::default())
  }

  pub fn with_config(
    source: S,
    config: Config,
  ) -> Self {
    // The first block of a fresh region always needs a slot.
    let config = config.with_index_capacity(config.index_capacity);

    Self {
      source,
      config,
      region: None,
      index: FreeIndex::with_capacity(config.index_capacity),
      blocks: BTreeSet::new(),
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Bytes of metadata in front of every payload.
  pub const fn header_size(&self) -> usize {
    HEADER_SIZE
  }

  pub fn is_initialized(&self) -> bool {
    self.region.is_some()
  }

  /// Length of the managed region, 0 when uninitialized.
  pub fn region_size(&self) -> usize {
    self.region.as_ref().map_or(0, Region::len)
  }

  /// Start of the managed region.
  pub fn region_base(&self) -> Option<NonNull<u8>> {
    self.region.as_ref().map(Region::base)
  }

  pub fn free_block_count(&self) -> usize {
    self.index.len()
  }

  /// Payload bytes held by indexed free blocks.
  pub fn free_bytes(&self) -> usize {
    self.index.iter().map(|(_, size)| size).sum()
  }

  /// Acquires `region_size` bytes from the source and turns them into a single
  /// free block.
  ///
  /// A trailing remainder smaller than [`ALIGNMENT`] is left unused so that
  /// every block size stays a multiple of it.
  pub fn init(
    &mut self,
    region_size: usize,
  ) -> Result<()> {
    if self.region.is_some() {
      warn!("heap already initialized, ignoring init({})", region_size);
      return Err(AllocError::AlreadyInitialized);
    }

    if region_size < HEADER_SIZE {
      warn!("memory size {} too small for initialization", region_size);
      return Err(AllocError::InitializationTooSmall {
        requested: region_size,
        minimum: HEADER_SIZE,
      });
    }

    let base = self.source.acquire(region_size).inspect_err(|err| {
      warn!("{}", err);
    })?;

    let len = align_down(region_size);
    let mut region = Region::new(base, len);

    let first = BlockId::new(0);
    let size = len - HEADER_SIZE;
    region.write_header(first, BlockHeader::new(size, true));

    self.index.clear();
    self.blocks.clear();
    self.index.insert(first, size)?;
    self.blocks.insert(first.offset());

    debug!(
      "initialized heap: base {:?}, {} bytes, first block size {}, index capacity {}",
      base,
      len,
      size,
      self.index.capacity()
    );

    self.region = Some(region);

    Ok(())
  }

  /// Forgets the region and all bookkeeping.
  ///
  /// The memory itself stays reserved for the process; the next [`init`]
  /// acquires a new, disjoint region. Pointers handed out before are no longer
  /// accepted by this heap.
  ///
  /// [`init`]: Heap::init
  pub fn teardown(&mut self) {
    if let Some(region) = self.region.take() {
      debug!(
        "tearing down heap at {:?} ({} bytes)",
        region.base(),
        region.len()
      );
    }

    self.index.clear();
    self.blocks.clear();
  }

  /// Hands out a zeroed block of at least `size` bytes.
  ///
  /// Only the single smallest free block is ever considered. If it is too
  /// small the request fails even when a larger block is free somewhere else:
  /// allocation stays O(log n) at the price of spurious [`OutOfMemory`] on a
  /// fragmented heap.
  ///
  /// [`OutOfMemory`]: AllocError::OutOfMemory
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let (id, region) = self.allocate_block(size)?;

    Ok(region.payload(id))
  }

  /// Carves the block for `size` bytes and hands back the region it lives in.
  fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<(BlockId, &mut Region)> {
    if size == 0 {
      debug!("requested allocation size is 0, nothing allocated");
      return Err(AllocError::ZeroSize);
    }

    let out_of_memory = AllocError::OutOfMemory { requested: size };

    let Some(aligned) = checked_align(size) else {
      warn!("allocation of {} bytes failed, size overflows", size);
      return Err(out_of_memory);
    };

    debug!("requested allocation of {} bytes (aligned to {})", size, aligned);

    let Some(region) = self.region.as_mut() else {
      warn!("allocation of {} bytes failed, heap is not initialized", size);
      return Err(out_of_memory);
    };

    let Some((id, block_size)) = self.index.extract_min() else {
      warn!("allocation of {} bytes failed, no free blocks", size);
      return Err(out_of_memory);
    };

    debug_assert_eq!(region.header(id).size, block_size);

    if block_size < aligned {
      // The slot was just vacated, so this cannot overflow.
      self.index.insert(id, block_size)?;
      warn!(
        "allocation of {} bytes failed, smallest free block has {}",
        aligned, block_size
      );
      return Err(out_of_memory);
    }

    if block_size >= aligned + HEADER_SIZE + ALIGNMENT {
      let tail = BlockId::new(id.end_offset(aligned));
      let tail_size = block_size - aligned - HEADER_SIZE;

      region.write_header(tail, BlockHeader::new(tail_size, true));
      region.header_mut(id).size = aligned;
      self.blocks.insert(tail.offset());

      debug!(
        "splitting block at offset {}: allocated size {}, remaining size {}",
        id.offset(),
        aligned,
        tail_size
      );

      // Same slot again; a failure here would only leak the tail.
      if let Err(err) = self.index.insert(tail, tail_size) {
        warn!("{}", err);
      }
    }

    region.header_mut(id).is_free = false;
    region.zero_payload(id);

    debug!(
      "allocation successful: block at offset {}, size {}",
      id.offset(),
      region.header(id).size
    );

    Ok((id, region))
  }

  /// Returns the block behind `ptr` to the heap and merges it with free
  /// physical neighbours.
  ///
  /// `ptr` must be a payload pointer currently allocated from this heap;
  /// anything else (null, foreign, interior or already released pointers) is
  /// rejected with [`InvalidPointer`] and changes nothing.
  ///
  /// [`InvalidPointer`]: AllocError::InvalidPointer
  pub fn release(
    &mut self,
    ptr: *mut u8,
  ) -> Result<()> {
    let Some(region) = self.region.as_mut() else {
      warn!("invalid pointer passed to release: {:?}", ptr);
      return Err(invalid(ptr));
    };

    let mut id = locate(region, &self.blocks, ptr).inspect_err(|_| {
      warn!("invalid pointer passed to release: {:?}", ptr);
    })?;

    let mut size = region.header(id).size;
    region.header_mut(id).is_free = true;

    debug!("freeing block at offset {}, size {}", id.offset(), size);

    // The successor is judged by its header: a free block that fell out of the
    // index on overflow is still absorbed here.
    let next = BlockId::new(id.end_offset(size));
    if next.offset() < region.len() && region.header(next).is_free {
      let next_size = region.header(next).size;
      self.index.remove(next);

      debug!(
        "coalescing block at offset {} (size {}) with next block at offset {} (size {})",
        id.offset(),
        size,
        next.offset(),
        next_size
      );

      size += HEADER_SIZE + next_size;
      region.header_mut(id).size = size;
      self.blocks.remove(&next.offset());
    }

    // Only an indexed predecessor takes the block in, as only indexed blocks
    // look for a free successor.

    let previous = self.blocks.range(..id.offset()).next_back().copied();
    if let Some(prev) = previous.map(BlockId::new) {
      if let Some(prev_size) = self.index.remove(prev) {
        debug_assert_eq!(prev.end_offset(prev_size), id.offset());
        debug!(
          "coalescing block at offset {} (size {}) with next block at offset {} (size {})",
          prev.offset(),
          prev_size,
          id.offset(),
          size
        );

        self.blocks.remove(&id.offset());
        size += prev_size + HEADER_SIZE;
        region.header_mut(prev).size = size;
        id = prev;
      }
    }

    self.index.insert(id, size)
  }

  /// Grows the block behind `ptr` to at least `new_size` bytes.
  ///
  /// Null behaves as [`allocate`], a zero size as [`release`]. A block that
  /// already holds `new_size` bytes is returned as is. Otherwise the payload
  /// moves to a new block; if that allocation fails the old block is left
  /// untouched.
  ///
  /// [`allocate`]: Heap::allocate
  /// [`release`]: Heap::release
  pub fn resize(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    if ptr.is_null() {
      return self.allocate(new_size).map(Some);
    }

    if new_size == 0 {
      return self.release(ptr).map(|()| None);
    }

    let Some(region) = self.region.as_ref() else {
      warn!("invalid pointer passed to resize: {:?}", ptr);
      return Err(invalid(ptr));
    };


    let id = locate(region, &self.blocks, ptr).inspect_err(|_| {
      warn!("invalid pointer passed to resize: {:?}", ptr);
    })?;

    let old_size = region.header(id).size;
    if old_size >= new_size {
      return Ok(Some(region.payload(id)));
    }

    let (new_id, region) = self.allocate_block(new_size)?;
    region.copy_payload(id, new_id, old_size);
    let moved = region.payload(new_id);

    debug!(
      "moved {} bytes from offset {} to offset {}",
      old_size,
      id.offset(),
      new_id.offset()
    );

    // The new block is already handed out; an overflow here only leaks the
    // old one.
    if let Err(err) = self.release(ptr) {
      debug!("old block of resize not indexed: {}", err);
    }

    Ok(Some(moved))
  }

  /// Payload bytes reserved for an allocated pointer.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> Result<usize> {
    let region = self.region.as_ref().ok_or_else(|| invalid(ptr))?;
    let id = locate(region, &self.blocks, ptr)?;

    Ok(region.header(id).size)
  }

  /// Every block of the region in address order.
  pub fn blocks(&self) -> Vec<BlockInfo> {
    let Some(region) = self.region.as_ref() else {
      return Vec::new();
    };

    self
      .blocks
      .iter()
      .map(|offset| {
        let header = region.header(BlockId::new(*offset));
        BlockInfo {
          offset: *offset,
          size: header.size,
          is_free: header.is_free,
        }
      })
      .collect()
  }

  /// Dumps the block layout at debug level.
  pub fn log_layout(&self) {
    debug!(
      "heap layout: {} bytes, {} free blocks ({} bytes free)",
      self.region_size(),
      self.free_block_count(),
      self.free_bytes()
    );

    for block in self.blocks() {
      debug!(
        "  offset {:>6}  size {:>6}  {}",
        block.offset,
        block.size,
        if block.is_free { "free" } else { "used" }
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::MappedPages;
  use test_env_log::test;

  fn heap(region_size: usize) -> Heap<MappedPages> {
    let mut heap = Heap::with_source(MappedPages);
    heap.init(region_size).unwrap();
    heap
  }

  fn assert_tiled(heap: &Heap<MappedPages>) {
    let mut expected = 0;

    for block in heap.blocks() {
      assert_eq!(block.offset, expected);
      assert_eq!(block.size % ALIGNMENT, 0);
      assert_eq!(
        heap.index.contains(BlockId::new(block.offset)),
        block.is_free
      );
      expected = block.offset + HEADER_SIZE + block.size;
    }

    assert_eq!(expected, heap.region_size());
  }

  #[test]
  fn test_init_seeds_one_block() {
    let heap = heap(1024);

    assert_eq!(
      heap.blocks(),
      vec![BlockInfo {
        offset: 0,
        size: 1024 - HEADER_SIZE,
        is_free: true,
      }]
    );
    assert_eq!(heap.free_block_count(), 1);
  }

  #[test]
  fn test_init_rounds_region_down() {
    let heap = heap(1001);

    assert_eq!(heap.region_size(), 1000);
    assert_eq!(heap.free_bytes(), 1000 - HEADER_SIZE);
  }

  #[test]
  fn test_init_rejects_small_region() {
    let mut heap = Heap::with_source(MappedPages);

    assert_eq!(
      heap.init(HEADER_SIZE - 1),
      Err(AllocError::InitializationTooSmall {
        requested: HEADER_SIZE - 1,
        minimum: HEADER_SIZE,
      })
    );
    assert!(!heap.is_initialized());
  }

  #[test]
  fn test_init_twice() {
    let mut heap = heap(512);

    assert_eq!(heap.init(512), Err(AllocError::AlreadyInitialized));
    assert_eq!(heap.region_size(), 512);
  }

  #[test]
  fn test_split_layout() {
    let mut heap = heap(1024);

    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(13).unwrap();

    let blocks = heap.blocks();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].size, 104);
    assert!(!blocks[0].is_free);
    assert_eq!(blocks[1].offset, HEADER_SIZE + 104);
    assert_eq!(blocks[1].size, 16);
    assert_eq!(blocks[2].size, 1024 - 3 * HEADER_SIZE - 104 - 16);
    assert!(blocks[2].is_free);

    assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 104 + HEADER_SIZE);
    assert_tiled(&heap);
  }

  #[test]
  fn test_no_split_for_small_remainder() {
    let mut heap = heap(1024);
    let whole = 1024 - HEADER_SIZE;

    // Leftover would be exactly one header: too small to carve a block.
    let ptr = heap.allocate(whole - HEADER_SIZE).unwrap();

    assert_eq!(heap.usable_size(ptr.as_ptr()), Ok(whole));
    assert_eq!(heap.free_block_count(), 0);
    assert_tiled(&heap);
  }

  #[test]
  fn test_smallest_block_too_small_is_reinserted() {
    let mut heap = heap(1024);

    let a = heap.allocate(16).unwrap();
    let _b = heap.allocate(16).unwrap();
    heap.release(a.as_ptr()).unwrap();

    // Index now holds a 16 byte block and the large tail.
    assert_eq!(heap.free_block_count(), 2);
    assert_eq!(
      heap.allocate(64),
      Err(AllocError::OutOfMemory { requested: 64 })
    );
    assert_eq!(heap.free_block_count(), 2);
    assert_tiled(&heap);
  }

  #[test]
  fn test_release_merges_both_neighbours() {
    let mut heap = heap(1024);

    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(64).unwrap();
    let c = heap.allocate(64).unwrap();
    let d = heap.allocate(64).unwrap();

    heap.release(a.as_ptr()).unwrap();
    heap.release(c.as_ptr()).unwrap();
    assert_eq!(heap.free_block_count(), 3);

    heap.release(b.as_ptr()).unwrap();
    assert_eq!(heap.free_block_count(), 2);
    assert_eq!(heap.blocks()[0].size, 3 * 64 + 2 * HEADER_SIZE);
    assert_tiled(&heap);

    heap.release(d.as_ptr()).unwrap();
    assert_eq!(heap.free_block_count(), 1);
    assert_eq!(heap.free_bytes(), 1024 - HEADER_SIZE);
    assert_tiled(&heap);
  }

  #[test]
  fn test_release_rejects_bad_pointers() {
    let mut heap = heap(1024);
    let ptr = heap.allocate(64).unwrap();
    let before = heap.blocks();

    let interior = unsafe { ptr.as_ptr().add(8) };
    let header = unsafe { ptr.as_ptr().sub(HEADER_SIZE) };
    let mut outside = 0u8;

    for bad in [std::ptr::null_mut(), interior, header, &mut outside as *mut u8] {
      assert_eq!(
        heap.release(bad),
        Err(AllocError::InvalidPointer {
          address: bad as usize,
        })
      );
    }

    assert_eq!(heap.blocks(), before);

    heap.release(ptr.as_ptr()).unwrap();
    assert_eq!(
      heap.release(ptr.as_ptr()),
      Err(AllocError::InvalidPointer {
        address: ptr.as_ptr() as usize,
      })
    );
    assert_eq!(heap.free_block_count(), 1);
  }

  #[test]
  fn test_index_overflow_leaks_block() {
    let mut heap = Heap::with_config(MappedPages, Config::new().with_index_capacity(2));
    heap.init(1024).unwrap();

    let a = heap.allocate(16).unwrap();
    let _b = heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();
    let _d = heap.allocate(16).unwrap();

    heap.release(a.as_ptr()).unwrap();
    assert_eq!(heap.free_block_count(), 2);

    assert_eq!(
      heap.release(c.as_ptr()),
      Err(AllocError::IndexOverflow { capacity: 2 })
    );
    assert_eq!(heap.free_block_count(), 2);

    let leaked = heap.blocks()[2];
    assert!(leaked.is_free);
    assert!(!heap.index.contains(BlockId::new(leaked.offset)));
  }

  #[test]
  fn test_release_absorbs_unindexed_free_successor() {
    let mut heap = Heap::with_config(MappedPages, Config::new().with_index_capacity(2));
    heap.init(1024).unwrap();

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let c = heap.allocate(16).unwrap();
    let _d = heap.allocate(16).unwrap();

    heap.release(a.as_ptr()).unwrap();
    assert!(heap.release(c.as_ptr()).is_err());

    // b sits between the indexed a and the dropped c.
    heap.release(b.as_ptr()).unwrap();

    let blocks = heap.blocks();
    assert_eq!(
      blocks[0],
      BlockInfo {
        offset: 0,
        size: 3 * 16 + 2 * HEADER_SIZE,
        is_free: true,
      }
    );
    assert!(!blocks[1].is_free);
    assert_eq!(blocks.len(), 3);
    assert_eq!(heap.free_block_count(), 2);
    assert_tiled(&heap);
  }

  struct FailingSource;

  impl RegionSource for FailingSource {
    fn acquire(
      &mut self,
      len: usize,
    ) -> Result<NonNull<u8>> {
      Err(AllocError::OsAcquisitionFailed {
        requested: len,
        errno: libc::ENOMEM,
      })
    }
  }

  #[test]
  fn test_failed_acquisition_leaves_heap_uninitialized() {
    let mut heap = Heap::with_source(FailingSource);

    assert_eq!(
      heap.init(1024),
      Err(AllocError::OsAcquisitionFailed {
        requested: 1024,
        errno: libc::ENOMEM,
      })
    );
    assert!(!heap.is_initialized());
    assert_eq!(heap.region_size(), 0);
    assert_eq!(heap.free_block_count(), 0);
    assert_eq!(
      heap.allocate(8),
      Err(AllocError::OutOfMemory { requested: 8 })
    );
  }

  #[test]
  fn test_zero_index_capacity_is_clamped() {
    let config = Config {
      index_capacity: 0,
    };
    let mut heap = Heap::with_config(MappedPages, config);

    assert_eq!(heap.config().index_capacity, 1);

    heap.init(256).unwrap();
    assert_eq!(heap.free_block_count(), 1);
    assert!(heap.allocate(8).is_ok());
  }

  #[test]
  fn test_resize_in_place_and_moved() {
    let mut heap = heap(1024);

    let ptr = heap.allocate(20).unwrap();
    assert_eq!(heap.resize(ptr.as_ptr(), 24), Ok(Some(ptr)));
    assert_eq!(heap.resize(ptr.as_ptr(), 8), Ok(Some(ptr)));

    unsafe { ptr.as_ptr().write_bytes(0x42, 24) };

    let moved = heap.resize(ptr.as_ptr(), 48).unwrap().unwrap();
    assert_ne!(moved, ptr);
    assert_eq!(heap.usable_size(moved.as_ptr()), Ok(48));

    for i in 0..24 {
      assert_eq!(unsafe { *moved.as_ptr().add(i) }, 0x42);
    }
    for i in 24..48 {
      assert_eq!(unsafe { *moved.as_ptr().add(i) }, 0);
    }

    assert!(heap.usable_size(ptr.as_ptr()).is_err());
    assert_tiled(&heap);
  }

  #[test]
  fn test_resize_failure_keeps_old_block() {
    let mut heap = heap(256);

    let ptr = heap.allocate(64).unwrap();
    unsafe { ptr.as_ptr().write_bytes(0x11, 64) };
    let before = heap.blocks();

    assert_eq!(
      heap.resize(ptr.as_ptr(), 4096),
      Err(AllocError::OutOfMemory { requested: 4096 })
    );
    assert_eq!(heap.blocks(), before);
    assert_eq!(unsafe { *ptr.as_ptr().add(63) }, 0x11);
  }

  #[test]
  fn test_teardown_forgets_region() {
    let mut heap = heap(512);
    let ptr = heap.allocate(32).unwrap();

    heap.teardown();

    assert!(!heap.is_initialized());
    assert_eq!(heap.free_block_count(), 0);
    assert!(heap.blocks().is_empty());
    assert!(heap.release(ptr.as_ptr()).is_err());
    assert_eq!(
      heap.allocate(8),
      Err(AllocError::OutOfMemory { requested: 8 })
    );
  }
}
