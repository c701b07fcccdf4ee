use std::{mem, ptr::NonNull};

use crate::{
    arena::PAGE_SIZE,
    cell::{BUCKET_COUNT, CELL_SIZES, Cell},
    list::{Link, List, Node},
};

/// Overhead of the mass header at the start of its page. The header is a
/// [`Node`] because a mass is always linked into its bucket's mass list.
pub(crate) const MASS_HEADER_SIZE: usize = mem::size_of::<Node<Mass>>();

// Even the top class has to leave room for the header on its page.
const _: () = assert!(MASS_HEADER_SIZE + CELL_SIZES[BUCKET_COUNT - 1] <= PAGE_SIZE);
const _: () = assert!(MASS_HEADER_SIZE % mem::size_of::<usize>() == 0);

/// Free-list link written into the *data area* of a cell while it is free.
/// The cell header right before it stays intact, so a recycled cell never
/// needs its size rewritten.
#[repr(C)]
struct FreeSlot {
    next: Link<FreeSlot>,
}

/// One whole page dedicated to a single size class.
///
/// The page is laid out as the mass header followed by as many same-size
/// cells as fit:
///
/// ```text
/// page start (naturally aligned)
/// v
/// +-------------+------+------+------+-- ... --+------+-------+
/// | Node<Mass>  | cell | cell | cell |         | cell | waste |
/// +-------------+------+------+------+-- ... --+------+-------+
/// ```
///
/// Natural alignment is load-bearing: masking any cell address with
/// `PAGE_SIZE - 1` lands back on this header, which is how `free` finds the
/// owning mass from a bare pointer.
pub(crate) struct Mass {
    /// Number of cells currently allocated out of this mass.
    pub used: usize,
    /// Index of the owning bucket in the heap's table. An index rather than
    /// a pointer, so the heap stays free to move.
    pub bucket: usize,
    /// Cells of this page not currently allocated.
    free: Link<FreeSlot>,
}

impl Mass {
    /// How many cells of `size` bytes fit in one page after the header.
    pub(crate) const fn cells_per_page(size: usize) -> usize {
        (PAGE_SIZE - MASS_HEADER_SIZE) / size
    }

    /// Builds a mass over a fresh `page`: writes the header, links it at the
    /// back of `list` and chains every cell that fits into the free list.
    /// `used` starts at zero; the bucket counts cells as it hands them out.
    ///
    /// **SAFETY**: `page` must be a whole, naturally aligned page owned by
    /// the caller.
    pub(crate) unsafe fn carve(
        list: &mut List<Mass>,
        page: NonNull<u8>,
        bucket: usize,
        size: usize,
    ) -> NonNull<Node<Mass>> {
        debug_assert_eq!(page.as_ptr() as usize % PAGE_SIZE, 0);
        debug_assert_eq!(CELL_SIZES[bucket], size);

        unsafe {
            let mut node = list.push_back(
                Mass {
                    used: 0,
                    bucket,
                    free: None,
                },
                page,
            );

            // Chain in reverse so the free list pops cells in address order.
            for i in (0..Self::cells_per_page(size)).rev() {
                let cell = page
                    .as_ptr()
                    .add(MASS_HEADER_SIZE + i * size)
                    .cast::<Cell>();
                cell.write(Cell { size });

                node.as_mut()
                    .data
                    .put_cell(NonNull::new_unchecked(cell));
            }

            node
        }
    }

    /// Pops a free cell, or `None` if every cell of this mass is in use.
    pub(crate) unsafe fn get_cell(&mut self) -> Option<NonNull<Cell>> {
        let slot = self.free?;

        unsafe {
            self.free = slot.as_ref().next;

            Some(Cell::from_data(slot.as_ptr().cast()))
        }
    }

    /// Pushes `cell` back onto this mass's free list.
    ///
    /// **SAFETY**: `cell` must belong to this mass's page and not already be
    /// on the free list.
    pub(crate) unsafe fn put_cell(&mut self, cell: NonNull<Cell>) {
        unsafe {
            let slot = Cell::data(cell).cast::<FreeSlot>();
            slot.write(FreeSlot { next: self.free });

            self.free = Some(NonNull::new_unchecked(slot));
        }
    }

    /// Length of the free list. Diagnostics only; O(cells).
    pub(crate) fn free_cells(&self) -> usize {
        let mut count = 0;
        let mut current = self.free;

        while let Some(slot) = current {
            count += 1;
            current = unsafe { slot.as_ref().next };
        }

        count
    }
}
