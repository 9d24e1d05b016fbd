//! # rheap - A Single-Region Memory Allocator
//!
//! This crate carves one fixed-size region, acquired once from the operating
//! system, into variable-sized blocks and serves allocate / release / resize
//! requests from it without going back to the OS.
//!
//! ## Overview
//!
//! ```text
//!   Managed Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ base                                                       base+len  │
//!   │  ┌────┬────────┬────┬──────────────┬────┬──────┬────┬─────────────┐  │
//!   │  │ H  │ used   │ H  │    free      │ H  │ used │ H  │    free     │  │
//!   │  └────┴────────┴────┴──────────────┴────┴──────┴────┴─────────────┘  │
//!   │                                                                      │
//!   │  Blocks tile the region: every header is followed by its payload,    │
//!   │  and the next header starts right after that payload.                │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free-Block Index (min-heap on payload size):
//!
//!                smallest free block
//!                  /             \
//!              ...                ...
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rheap
//!   ├── align      - 8-byte alignment (align!, align_down, checked_align)
//!   ├── block      - BlockHeader layout, BlockId handles, HEADER_SIZE
//!   ├── config     - Config (free-block index capacity)
//!   ├── error      - AllocError
//!   ├── heap       - Heap: init / allocate / release / resize / teardown
//!   ├── index      - FreeIndex, the size-ordered min-heap (internal)
//!   ├── region     - Region, the only place offsets become memory (internal)
//!   └── source     - RegionSource: ProgramBreak (sbrk), MappedPages (mmap)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rheap::Heap;
//!
//! let mut heap = Heap::new();
//! heap.init(1024).unwrap();
//!
//! let ptr = heap.allocate(100).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(0xAA, 100) };
//!
//! let ptr = heap.resize(ptr.as_ptr(), 200).unwrap().unwrap();
//! heap.release(ptr.as_ptr()).unwrap();
//! heap.teardown();
//! ```
//!
//! ## How It Works
//!
//! - **allocate** rounds the request up to 8 bytes and extracts the single
//!   smallest free block. If that block is too small the request fails, even
//!   when a larger block is free elsewhere. Oversized blocks are split and the
//!   tail goes back into the index. The payload is zeroed.
//! - **release** marks the block free and merges it with its physical
//!   successor and predecessor when they are free, so the heap never holds
//!   two adjacent free blocks.
//! - **resize** keeps the block when it is already big enough, otherwise
//!   moves the payload into a fresh block.
//!
//! ```text
//!   Split on allocate(100):
//!
//!   ┌────┬───────────────────────────────┐      ┌────┬──────┬────┬─────────┐
//!   │ H  │            1008               │  ->  │ H  │ 104  │ H  │   888   │
//!   └────┴───────────────────────────────┘      └────┴──────┴────┴─────────┘
//!                                                      used        free
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a `Heap` is neither `Send` nor `Sync`
//! - **Fixed region**: the heap never grows after `init`
//! - **No return to the OS**: `teardown` only resets bookkeeping
//! - **Bounded index**: a free block that does not fit in the index is leaked
//! - **Unix-only**: requires `libc` (`sbrk` / `mmap`)
//!
//! ## Logging
//!
//! Every operation reports through the [`log`] facade: index traffic at
//! `trace`, splits, merges and successful calls at `debug`, failures at
//! `warn`. Install any logger to see them.

pub mod align;
mod block;
mod config;
mod error;
mod heap;
mod index;
mod region;
mod source;

pub use block::{BlockInfo, HEADER_SIZE};
pub use config::{Config, DEFAULT_INDEX_CAPACITY};
pub use error::{AllocError, Result};
pub use heap::Heap;
pub use source::{MappedPages, ProgramBreak, RegionSource};
