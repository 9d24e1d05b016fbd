use std::collections::HashMap;

use log::{trace, warn};

use crate::{
  block::BlockId,
  error::{AllocError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
  id: BlockId,
  size: usize,
}

/// Fixed-capacity binary min-heap of free blocks, keyed by payload size.
///
/// ```text
///   slots:    [ 24 | 104 | 40 | 512 | 200 ]
///
///                     24
///                   /    \
///                104      40
///               /   \
///             512   200
/// ```
///
/// Besides the heap array it keeps the slot of every block so a block can be
/// pulled out of the middle when it is absorbed by coalescing. Ties between
/// equal sizes are resolved by whatever the sift operations leave behind.
#[derive(Debug)]
pub struct FreeIndex {
  slots: Vec<Entry>,
  positions: HashMap<BlockId, usize>,
  capacity: usize,
}

impl FreeIndex {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      slots: Vec::with_capacity(capacity),
      positions: HashMap::with_capacity(capacity),
      capacity,
    }
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn contains(
    &self,
    id: BlockId,
  ) -> bool {
    self.positions.contains_key(&id)
  }

  pub fn clear(&mut self) {
    self.slots.clear();
    self.positions.clear();
  }

  /// Free blocks and their sizes, in heap order.
  pub fn iter(&self) -> impl Iterator<Item = (BlockId, usize)> + '_ {
    self.slots.iter().map(|entry| (entry.id, entry.size))
  }

  pub fn insert(
    &mut self,
    id: BlockId,
    size: usize,
  ) -> Result<()> {
    debug_assert!(!self.contains(id), "block {id:?} indexed twice");

    if self.slots.len() >= self.capacity {
      warn!(
        "free block index overflow, dropping block at offset {} (size {})",
        id.offset(),
        size
      );
      return Err(AllocError::IndexOverflow {
        capacity: self.capacity,
      });
    }

    trace!("inserting block into index: offset {}, size {}", id.offset(), size);

    let slot = self.slots.len();
    self.slots.push(Entry { id, size });
    self.positions.insert(id, slot);
    self.sift_up(slot);

    Ok(())
  }

  pub fn extract_min(&mut self) -> Option<(BlockId, usize)> {
    if self.is_empty() {
      trace!("index is empty, no blocks available");
      return None;
    }

    let entry = self.take(0);
    trace!(
      "extracted smallest block: offset {}, size {}",
      entry.id.offset(),
      entry.size
    );

    Some((entry.id, entry.size))
  }

  /// Removes `id` wherever it sits, returning its recorded size.
  pub fn remove(
    &mut self,
    id: BlockId,
  ) -> Option<usize> {
    let slot = *self.positions.get(&id)?;
    let entry = self.take(slot);

    trace!("removed block from index: offset {}, size {}", id.offset(), entry.size);

    Some(entry.size)
  }

  fn take(
    &mut self,
    slot: usize,
  ) -> Entry {
    let entry = self.slots.swap_remove(slot);
    self.positions.remove(&entry.id);

    if slot < self.slots.len() {
      self.positions.insert(self.slots[slot].id, slot);
      self.sift_down(slot);
      self.sift_up(slot);
    }

    entry
  }

  fn swap(
    &mut self,
    i: usize,
    j: usize,
  ) {
    if i == j {
      return;
    }

    self.slots.swap(i, j);
    self.positions.insert(self.slots[i].id, i);
    self.positions.insert(self.slots[j].id, j);
  }

  fn sift_up(
    &mut self,
    mut slot: usize,
  ) {
    while slot > 0 {
      let parent = (slot - 1) / 2;

      if self.slots[slot].size < self.slots[parent].size {
        self.swap(slot, parent);
        slot = parent;
      } else {
        break;
      }
    }
  }

  fn sift_down(
    &mut self,
    mut slot: usize,
  ) {
    loop {
      let left = 2 * slot + 1;
      let right = 2 * slot + 2;
      let mut smallest = slot;

      if left < self.slots.len() && self.slots[left].size < self.slots[smallest].size {
        smallest = left;
      }

      if right < self.slots.len() && self.slots[right].size < self.slots[smallest].size {
        smallest = right;
      }

      if smallest == slot {
        break;
      }

      self.swap(slot, smallest);
      slot = smallest;
    }
  }

  #[cfg(test)]
  fn assert_heap_order(&self) {
    for slot in 1..self.slots.len() {
      let parent = (slot - 1) / 2;
      assert!(self.slots[parent].size <= self.slots[slot].size);
    }
    for (slot, entry) in self.slots.iter().enumerate() {
      assert_eq!(self.positions[&entry.id], slot);
    }
    assert_eq!(self.positions.len(), self.slots.len());
  }
}
