use std::{array, mem, ptr, ptr::NonNull};

use spin::Mutex;

use crate::{
    arena::{Arena, PAGE_SIZE},
    bucket::{Bucket, BucketStats},
    cell::{BUCKET_COUNT, CELL_HEADER_SIZE, CELL_SIZES, Cell, THRESHOLD, bucket_index},
    list::{List, Node},
    mass::Mass,
    utils::pages_for,
};

/// Header of an allocation too big for any bucket: a run of whole pages
/// with the list node and a regular cell header at the front.
///
/// ```text
/// run start (naturally aligned)
/// v
/// +----------------+------+---------------------------- ... --+
/// | Node<LargeCell>| size |             data                  |
/// +----------------+------+---------------------------- ... --+
///                         ^
///                         pointer returned by `Heap::alloc`
/// ```
///
/// Since the node sits at the start of its first page, masking the data
/// pointer recovers it the same way masking recovers a mass.
struct LargeCell {
    /// Whole pages in this run.
    pages: usize,
}

/// Bytes between the start of a large run and its data region.
const LARGE_HEADER_SIZE: usize = mem::size_of::<Node<LargeCell>>() + CELL_HEADER_SIZE;

const _: () = assert!(LARGE_HEADER_SIZE % mem::size_of::<usize>() == 0);
const _: () = assert!(LARGE_HEADER_SIZE < PAGE_SIZE);

/// Masks an address down to the start of the page containing it. Masses and
/// large-run headers always sit at the start of a naturally aligned page,
/// which is what makes this recovery possible at all.
fn page_of(ptr: NonNull<u8>) -> NonNull<u8> {
    let base = ptr.as_ptr() as usize & !(PAGE_SIZE - 1);

    unsafe { NonNull::new_unchecked(base as *mut u8) }
}

/// Recovers the mass that owns a bucket-managed cell from the cell address
/// alone, and checks the recovered metadata is sane before anyone trusts it.
///
/// The class stamped in the cell header must match the class of the bucket
/// the mass claims to belong to. A mismatch means the pointer was never ours
/// or the heap's metadata has been stomped on; carrying on would corrupt
/// memory at a distance, so this is fatal.
///
/// **SAFETY**: `cell` must be a live small cell handed out by a heap.
pub(crate) unsafe fn mass_of(cell: NonNull<Cell>) -> NonNull<Node<Mass>> {
    let node = page_of(cell.cast()).cast::<Node<Mass>>();

    // The header's other fields may be mutated by a thread holding the
    // owning bucket's lock, so only the one stable field is read, through a
    // raw pointer that never covers the rest of the struct.
    unsafe {
        let bucket = (&raw const (*node.as_ptr()).data.bucket).read();
        assert!(
            bucket < BUCKET_COUNT && CELL_SIZES[bucket] == cell.as_ref().size,
            "allocator metadata corrupted: cell does not match its mass's class",
        );
    }

    node
}

/// Point-in-time counters for a whole heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// One entry per size class, smallest first.
    pub buckets: [BucketStats; BUCKET_COUNT],
    /// Outstanding large allocations.
    pub large_blocks: usize,
}

impl HeapStats {
    /// Pages currently backing bucket-managed allocations.
    pub fn mass_pages(&self) -> usize {
        self.buckets.iter().map(|b| b.masses).sum()
    }
}

/// A general purpose allocator over a page-granular [`Arena`].
///
/// Small requests (up to [`Heap::threshold`] bytes) are served from a fixed
/// table of buckets, one per size class, each packing same-size cells into
/// whole pages. Bigger requests get dedicated page runs. See the crate docs
/// for the full picture.
pub struct Heap<A: Arena> {
    arena: A,
    /// Largest request a bucket can serve; anything above goes large.
    threshold: usize,
    /// The size-class table, ascending.
    buckets: [Bucket; BUCKET_COUNT],
    /// Outstanding large allocations, guarded by the heap-global lock.
    large: Mutex<List<LargeCell>>,
}

// The intrusive lists hold raw pointers into arena pages, which the borrow
// checker cannot see through. Every touch of that shared state happens under
// a bucket lock or the heap lock.
unsafe impl<A: Arena + Send> Send for Heap<A> {}
unsafe impl<A: Arena + Send + Sync> Sync for Heap<A> {}

impl<A: Arena> Heap<A> {
    /// Builds a heap over `arena`. One heap per memory domain; the domain
    /// owns it for its whole lifetime.
    pub fn new(arena: A) -> Self {
        Self {
            arena,
            threshold: THRESHOLD,
            buckets: array::from_fn(|index| Bucket::new(index, CELL_SIZES[index])),
            large: Mutex::new(List::new()),
        }
    }

    /// Largest request the buckets serve; anything bigger is backed by
    /// dedicated whole pages.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The arena this heap draws pages from.
    pub fn arena(&self) -> &A {
        &self.arena
    }

    /// Allocates `size` bytes and returns a word-aligned pointer to them, or
    /// null once the arena is exhausted. A zero `size` is served from the
    /// smallest class and yields a perfectly valid, freeable pointer.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        if size > self.threshold {
            return self.alloc_large(size);
        }

        match self.buckets[bucket_index(size)].alloc(&self.arena) {
            Some(cell) => Cell::data(cell),
            None => ptr::null_mut(),
        }
    }

    /// Releases an allocation. Null is a no-op.
    ///
    /// **SAFETY**: a non-null `ptr` must have been returned by `alloc` or
    /// `realloc` on *this* heap and not freed since. Double frees and
    /// foreign pointers are caught only best-effort, by the metadata
    /// assertions.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        unsafe {
            let cell = Cell::from_data(ptr);

            if Cell::is_large(cell.as_ref().size) {
                self.free_large(cell);
            } else {
                self.free_small(cell);
            }
        }
    }

    /// Resizes an allocation, with the usual contract: a null `ptr` acts as
    /// `alloc(new_size)`, a zero `new_size` acts as `free(ptr)` and returns
    /// null. If the current cell already accommodates `new_size` the call
    /// is a no-op returning `ptr` itself: no copy and no shrinking, which
    /// also makes a same-class resize free. Otherwise the data moves to a
    /// fresh allocation; on exhaustion null is returned and the original is
    /// left exactly as it was.
    ///
    /// **SAFETY**: same requirements on `ptr` as [`Heap::free`].
    pub unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc(new_size);
        }

        if new_size == 0 {
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }

        unsafe {
            let usable = self.usable_size(Cell::from_data(ptr));
            if new_size <= usable {
                return ptr;
            }

            let fresh = self.alloc(new_size);
            if fresh.is_null() {
                return ptr::null_mut();
            }

            ptr::copy_nonoverlapping(ptr, fresh, usable.min(new_size));
            self.free(ptr);

            fresh
        }
    }

    /// Counters across every bucket plus the large list, each gathered under
    /// its own lock. The result is a consistent snapshot per bucket, not
    /// across the whole heap.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            buckets: array::from_fn(|index| self.buckets[index].stats()),
            large_blocks: self.large.lock().len(),
        }
    }

    /// Bytes actually available at a cell's data pointer.
    unsafe fn usable_size(&self, cell: NonNull<Cell>) -> usize {
        unsafe {
            let size = cell.as_ref().size;

            if Cell::is_large(size) {
                // Raw field read: the node's links may be mutated by another
                // thread holding the heap lock. The page count itself never
                // changes after the run is carved.
                let node = page_of(cell.cast()).cast::<Node<LargeCell>>();
                let pages = (&raw const (*node.as_ptr()).data.pages).read();
                pages * PAGE_SIZE - LARGE_HEADER_SIZE
            } else {
                size - CELL_HEADER_SIZE
            }
        }
    }

    unsafe fn free_small(&self, cell: NonNull<Cell>) {
        unsafe {
            let mass = mass_of(cell);
            let index = (&raw const (*mass.as_ptr()).data.bucket).read();

            // The empty page, if any, goes back with the bucket unlocked.
            if let Some(page) = self.buckets[index].free(mass, cell) {
                self.arena.free_pages(page, 1);
            }
        }
    }

    /// Rounds the request up to whole pages, links the run into the large
    /// list and hands out its data region.
    fn alloc_large(&self, size: usize) -> *mut u8 {
        // A request near `usize::MAX` can overflow either the header add or
        // the page rounding; both are plain failures, not arithmetic faults.
        let Some(pages) = size.checked_add(LARGE_HEADER_SIZE).and_then(pages_for) else {
            return ptr::null_mut();
        };

        let Some(base) = self.arena.alloc_pages(pages) else {
            return ptr::null_mut();
        };

        unsafe {
            let mut large = self.large.lock();
            large.push_back(LargeCell { pages }, base);

            let cell = base
                .as_ptr()
                .add(mem::size_of::<Node<LargeCell>>())
                .cast::<Cell>();
            // Gross size: always above the top class, which is what marks
            // this cell as large when it comes back through `free`.
            cell.write(Cell {
                size: size + CELL_HEADER_SIZE,
            });

            base.as_ptr().add(LARGE_HEADER_SIZE)
        }
    }

    unsafe fn free_large(&self, cell: NonNull<Cell>) {
        let node = page_of(cell.cast()).cast::<Node<LargeCell>>();

        let pages = {
            let mut large = self.large.lock();
            debug_assert!(large.contains(node), "large cell not linked in this heap");

            unsafe {
                large.remove(node);
                node.as_ref().data.pages
            }
        };

        // The exact run we mapped goes back, with the heap lock released.
        unsafe { self.arena.free_pages(node.cast(), pages) };
    }
}

impl<A: Arena> Drop for Heap<A> {
    /// At domain teardown every outstanding allocation is assumed freed;
    /// whatever is still linked is handed back to the arena wholesale,
    /// without looking at its contents.
    fn drop(&mut self) {
        for bucket in &mut self.buckets {
            bucket.drain(&self.arena);
        }

        let large = self.large.get_mut();
        while let Some(node) = large.first() {
            unsafe {
                let pages = node.as_ref().data.pages;
                large.remove(node);
                self.arena.free_pages(node.cast(), pages);
            }
        }
    }
}
