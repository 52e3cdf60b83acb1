//! # tagheap - A Boundary Tag Heap Allocator
//!
//! This crate provides a single-threaded **boundary tag allocator** that
//! carves variable sized blocks out of one anonymous mapping obtained with
//! `mmap(2)`, and grows or shrinks that mapping with `mremap(2)` as demand
//! changes.
//!
//! ## Overview
//!
//! Every block carries a 4-byte tag at both ends, so a block can be reached
//! from either neighbour:
//!
//! ```text
//!   One Block:
//!
//!   ┌────────┬──────────────────────────────────────┬────────┐
//!   │ header │               payload                │ footer │
//!   │ size N │               N bytes                │ size N │
//!   │ used   │                                      │ used   │
//!   │ top    │                                      │ bottom │
//!   └────────┴──────────────────────────────────────┴────────┘
//!   ▲        ▲
//!   │        └── Allocator::access(handle)
//!   └── handle (offset from the heap base)
//! ```
//!
//! Blocks tile the heap with no gaps up to the high-water mark. Freeing a
//! block merges it with free neighbours on both sides, and when the merged
//! block ends the heap and is large enough, the mapping is shrunk.
//!
//! ```text
//!   Heap Region:
//!
//!   ┌──────┬──────┬───────────┬──────┬─────────────────────────┐
//!   │  A   │  B   │  (free)   │  C   │        untouched        │
//!   └──────┴──────┴───────────┴──────┴─────────────────────────┘
//!   ▲                                ▲                         ▲
//!   base                     high-water mark               capacity
//!   (may move on resize)
//! ```
//!
//! Requests of [`HeapConfig::large_threshold`] bytes or more never enter the
//! heap: each one gets its own mapping with its size stored in the first
//! 4 bytes.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagheap
//!   ├── align      - Tag width rounding (align!)
//!   ├── block      - BlockTag boundary tag encoding
//!   ├── mapper     - Mapper trait and the mmap implementation
//!   ├── heap       - Bounds-checked view of the mapped heap (internal)
//!   ├── allocator  - Allocator, Handle, statistics
//!   ├── config     - HeapConfig and environment overrides
//!   └── error      - AllocError, ConfigError
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tagheap::Allocator;
//!
//! fn main() -> Result<(), tagheap::AllocError> {
//!     let mut allocator = Allocator::new()?;
//!
//!     let handle = allocator.allocate(64)?;
//!
//!     // The heap may move, so never keep the address across calls.
//!     let payload = unsafe { allocator.payload_mut(handle)? };
//!     payload[..5].copy_from_slice(b"hello");
//!
//!     unsafe { allocator.free(handle)? };
//!     allocator.teardown()
//! }
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Linear search**: First fit walks every block below the high-water mark
//! - **Neighbour coalescing only**: No compaction
//! - **Unix-only**: Requires `libc` and `mmap`
//!
//! ## Safety
//!
//! Small handles are validated against their boundary tags. Large handles
//! are not tracked anywhere, so the operations that dereference them
//! ([`Allocator::payload_mut`], [`Allocator::free`]) are `unsafe`.

pub mod align;
pub mod block;
pub mod mapper;
mod heap;
mod allocator;
pub mod config;
mod error;

pub use allocator::{AllocStats, Allocator, BlockInfo, Handle};
pub use config::HeapConfig;
pub use error::{AllocError, ConfigError, Result};
pub use mapper::{Mapper, Mmap};
