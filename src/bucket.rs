use std::ptr::NonNull;

use spin::Mutex;

use crate::{
    arena::Arena,
    cell::Cell,
    list::{List, Node},
    mass::Mass,
};

/// One size class of the heap: the cell size, its own lock and the list of
/// masses currently backing the class.
///
/// Every bucket locks independently, so concurrent allocations of different
/// sizes never contend. A mass stays in the list for as long as at least one
/// of its cells is in use; the moment it empties it is unlinked and its page
/// goes back to the arena, never kept around as a cache.
pub(crate) struct Bucket {
    /// Cell size of this class, header included.
    pub size: usize,
    /// Index of this bucket in the heap's table; stamped into every mass it
    /// carves so `free` can find its way back.
    index: usize,
    /// Masses backing this class, all of them with `bucket == index`.
    masses: Mutex<List<Mass>>,
}

/// Point-in-time counters for one bucket, as reported by
/// [`Heap::stats`](crate::Heap::stats).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Cell size of the class, header included.
    pub size: usize,
    /// Masses currently backing the class.
    pub masses: usize,
    /// Cells handed out and not yet freed.
    pub used_cells: usize,
    /// Cells sitting on the free lists of this class's masses.
    pub free_cells: usize,
}

impl Bucket {
    pub(crate) const fn new(index: usize, size: usize) -> Self {
        Self {
            size,
            index,
            masses: Mutex::new(List::new()),
        }
    }

    /// Hands out one cell of this class, carving a new mass out of a fresh
    /// arena page when no linked mass has a free cell.
    ///
    /// Among masses with free cells the first found wins; we trade a little
    /// packing quality for a bounded scan and O(1) hand-out. The arena call
    /// on the slow path is made with the bucket lock released, so this lock
    /// never nests with whatever the arena takes internally.
    pub(crate) fn alloc<A: Arena>(&self, arena: &A) -> Option<NonNull<Cell>> {
        {
            let mut masses = self.masses.lock();

            let mut current = masses.first();
            while let Some(mut node) = current {
                let mass = unsafe { &mut node.as_mut().data };

                if let Some(cell) = unsafe { mass.get_cell() } {
                    mass.used += 1;
                    return Some(cell);
                }

                current = unsafe { node.as_ref().next };
            }
        }

        // No free cell anywhere: get a page while unlocked. If another
        // thread raced us here both masses simply join the list.
        let page = arena.alloc_pages(1)?;

        let mut masses = self.masses.lock();

        unsafe {
            let mut node = Mass::carve(&mut masses, page, self.index, self.size);
            let mass = &mut node.as_mut().data;

            let cell = mass.get_cell()?;
            mass.used = 1;

            Some(cell)
        }
    }

    /// Returns `cell` to `mass`'s free list. When the mass empties it is
    /// unlinked and its page returned to the caller, which hands it back to
    /// the arena once this bucket's lock is out of the picture.
    ///
    /// **SAFETY**: `mass` must be linked in this bucket and `cell` must be a
    /// live cell of that mass.
    pub(crate) unsafe fn free(
        &self,
        mut mass: NonNull<Node<Mass>>,
        cell: NonNull<Cell>,
    ) -> Option<NonNull<u8>> {
        let mut masses = self.masses.lock();
        debug_assert!(masses.contains(mass));

        unsafe {
            let data = &mut mass.as_mut().data;
            debug_assert!(data.used > 0, "free of a cell in an empty mass");

            data.put_cell(cell);
            data.used -= 1;

            if data.used == 0 {
                masses.remove(mass);
                return Some(mass.cast());
            }
        }

        None
    }

    /// Counters for this bucket, gathered under its lock.
    pub(crate) fn stats(&self) -> BucketStats {
        let masses = self.masses.lock();

        let mut stats = BucketStats {
            size: self.size,
            masses: masses.len(),
            ..BucketStats::default()
        };

        let mut current = masses.first();
        while let Some(node) = current {
            let mass = unsafe { &node.as_ref().data };
            stats.used_cells += mass.used;
            stats.free_cells += mass.free_cells();
            current = unsafe { node.as_ref().next };
        }

        stats
    }

    /// Unlinks every remaining mass and returns its page to the arena. Only
    /// called at heap teardown, where `&mut self` rules out any contention.
    pub(crate) fn drain<A: Arena>(&mut self, arena: &A) {
        let masses = self.masses.get_mut();

        while let Some(node) = masses.first() {
            unsafe {
                masses.remove(node);
                arena.free_pages(node.cast(), 1);
            }
        }
    }
}
