use std::{mem, ptr::NonNull};

use crate::arena::PAGE_SIZE;

/// Number of size classes, i.e. of buckets in the heap's table.
pub(crate) const BUCKET_COUNT: usize = 9;

/// Cell size of every class in ascending order, header included.
///
/// A doubling progression: it bottoms out at 16 because a free cell has to
/// hold the free-list link right after its 8 byte header, and it is topped
/// by the largest cell that still fits one-per-page next to the mass header.
/// Requests that don't fit the last class bypass the buckets entirely and go
/// to the large-object path.
pub(crate) const CELL_SIZES: [usize; BUCKET_COUNT] =
    [16, 32, 64, 128, 256, 512, 1024, 2048, 4032];

/// Size of the [`Cell`] header preceding every data pointer we hand out.
pub(crate) const CELL_HEADER_SIZE: usize = mem::size_of::<Cell>();

/// Largest request (in usable bytes) a bucket can serve. Anything bigger is
/// a large allocation.
pub(crate) const THRESHOLD: usize = CELL_SIZES[BUCKET_COUNT - 1] - CELL_HEADER_SIZE;

const _: () = assert!(CELL_HEADER_SIZE == mem::size_of::<usize>());
const _: () = {
    let mut i = 0;
    while i < BUCKET_COUNT {
        // Word-aligned classes keep every data pointer word-aligned.
        assert!(CELL_SIZES[i] % mem::size_of::<usize>() == 0);
        // A free cell stores its free-list link in the data area.
        assert!(CELL_SIZES[i] >= CELL_HEADER_SIZE + mem::size_of::<usize>());
        if i > 0 {
            assert!(CELL_SIZES[i - 1] < CELL_SIZES[i]);
        }
        i += 1;
    }
    assert!(CELL_SIZES[BUCKET_COUNT - 1] < PAGE_SIZE);
};

/// The header of one allocation slot. The data region handed to the caller
/// starts right after it:
///
/// ```text
/// +----------+------------------------+
/// |   size   |          data          |
/// +----------+------------------------+
///            ^
///            pointer returned by `Heap::alloc`
/// ```
///
/// For a bucket-managed cell `size` is the cell's size class (one of
/// [`CELL_SIZES`]); for a large cell it is the gross request size, which by
/// construction is above the top class. That single field is what lets
/// `Heap::free` classify a bare pointer with no side table.
#[repr(C)]
pub(crate) struct Cell {
    /// Cell size in bytes, header included.
    pub size: usize,
}

impl Cell {
    /// Recovers the header sitting right before a data pointer previously
    /// returned by the heap.
    ///
    /// **SAFETY**: `ptr` must be a live data pointer handed out by this
    /// allocator.
    pub unsafe fn from_data(ptr: *mut u8) -> NonNull<Cell> {
        unsafe { NonNull::new_unchecked(ptr.sub(CELL_HEADER_SIZE)).cast() }
    }

    /// The data pointer for `cell`, i.e. what the caller gets to use.
    pub fn data(cell: NonNull<Cell>) -> *mut u8 {
        unsafe { cell.as_ptr().cast::<u8>().add(CELL_HEADER_SIZE) }
    }

    /// Whether a stored cell size denotes a large allocation.
    pub fn is_large(size: usize) -> bool {
        size > CELL_SIZES[BUCKET_COUNT - 1]
    }
}

/// Index of the smallest class able to hold `size` user bytes plus the cell
/// header. A first-fit scan over the ascending table; `size` must already be
/// known to be at most [`THRESHOLD`].
pub(crate) fn bucket_index(size: usize) -> usize {
    debug_assert!(size <= THRESHOLD);

    CELL_SIZES
        .iter()
        .position(|&class| size + CELL_HEADER_SIZE <= class)
        .unwrap_or(BUCKET_COUNT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_class_serves_zero() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(1), 0);
        assert_eq!(bucket_index(8), 0);
    }

    #[test]
    fn first_fit_over_ascending_table() {
        // One byte over a class boundary moves to the next class.
        assert_eq!(bucket_index(9), 1);
        assert_eq!(bucket_index(24), 1);
        assert_eq!(bucket_index(25), 2);
        assert_eq!(bucket_index(120), 3);
        assert_eq!(bucket_index(121), 4);
        assert_eq!(bucket_index(2040), 7);
        assert_eq!(bucket_index(2041), 8);
        assert_eq!(bucket_index(THRESHOLD), BUCKET_COUNT - 1);
    }

    #[test]
    fn classes_cover_every_small_size() {
        for size in 0..=THRESHOLD {
            let class = CELL_SIZES[bucket_index(size)];
            assert!(size + CELL_HEADER_SIZE <= class);
        }
    }

    #[test]
    fn large_marker_is_disjoint_from_classes() {
        for class in CELL_SIZES {
            assert!(!Cell::is_large(class));
        }
        // The smallest gross size a large cell can record.
        assert!(Cell::is_large(THRESHOLD + 1 + CELL_HEADER_SIZE));
    }
}
