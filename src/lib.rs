//! A bucketed page-slab allocator for kernel-style memory domains.
//!
//! The heap sits on top of a page-granular memory source (the [`Arena`]) and
//! serves `alloc` / `free` / `realloc` for objects from a few bytes up to a
//! few kilobytes. Small requests are packed into whole pages, one size class
//! per page; big requests get dedicated page runs.
//!
//! The moving parts, from the outside in:
//!
//! ```text
//!  Heap                     Bucket (one per size class)
//! +-----------+            +--------+
//! | buckets[0]|----------->|  lock  |
//! | buckets[1]|---> ...    | masses |--+
//! |    ...    |            +--------+  |
//! | buckets[8]|---> ...                |
//! | threshold |      +-----------------+
//! |   large   |--+   |
//! +-----------+  |   |  Mass (one whole page)
//!                |   |  +------+------+------+------+-- ... --+------+
//!                |   +->| head | cell | cell | cell |         | cell | <-+
//!                |      +------+--|---+------+--|---+-- ... --+------+   |
//!                |      | used |  |             |                        |
//!                |      | free |--+-- free ones chained ----------------+
//!                |      +------+
//!                |
//!                |    large allocations (runs of whole pages)
//!                |      +--------+-------------------- ... --+
//!                +----->| header |          data             |
//!                       +--------+-------------------- ... --+
//! ```
//!
//! Every cell carries a small header with its size class right before the
//! data pointer handed to the caller, and every mass occupies exactly one
//! naturally aligned page. Together those two facts let `free` recover all
//! of its bookkeeping from the pointer alone: the header is at a fixed
//! negative offset, and masking the address with the page size lands on the
//! owning mass. No side table anywhere.
//!
//! Locking is per size class, plus one heap-global lock for the large list,
//! so concurrent allocations of different sizes never touch the same lock.
//! An emptied page is returned to the arena immediately, and always after
//! the bucket lock has been dropped.
//!
//! ```
//! use cellheap::{Heap, MmapArena};
//!
//! let heap = Heap::new(MmapArena::new());
//!
//! let ptr = heap.alloc(100);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write(42);
//!     let bigger = heap.realloc(ptr, 5000);
//!     assert_eq!(bigger.read(), 42);
//!     heap.free(bigger);
//! }
//! ```

mod arena;
mod bucket;
mod cell;
mod heap;
mod list;
mod mass;
mod utils;

pub use arena::{Arena, MmapArena, PAGE_SIZE};
pub use bucket::BucketStats;
pub use heap::{Heap, HeapStats};
