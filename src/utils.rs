//! Small helpers shared by the rest of the allocator.

use crate::arena::PAGE_SIZE;

/// Rounds `n` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two. We use this both to keep cell data
/// aligned to the word size and to round large requests up to whole pages.
pub(crate) fn align(n: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (n + (alignment - 1)) & !(alignment - 1)
}

/// Number of whole pages needed to hold `bytes`, or `None` when rounding
/// `bytes` up to a page boundary would not fit in a `usize`.
pub(crate) fn pages_for(bytes: usize) -> Option<usize> {
    if bytes > usize::MAX - (PAGE_SIZE - 1) {
        return None;
    }

    Some(align(bytes, PAGE_SIZE) / PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn align_word_size() {
        let cases = vec![(1..=8, 8), (9..=16, 16), (17..=24, 24), (25..=32, 32)];

        for (sizes, expected) in cases {
            for size in sizes {
                assert_eq!(expected, align(size, mem::size_of::<usize>()));
            }
        }
    }

    #[test]
    fn align_page_size() {
        assert_eq!(0, align(0, PAGE_SIZE));
        assert_eq!(PAGE_SIZE, align(1, PAGE_SIZE));
        assert_eq!(PAGE_SIZE, align(PAGE_SIZE, PAGE_SIZE));
        assert_eq!(2 * PAGE_SIZE, align(PAGE_SIZE + 1, PAGE_SIZE));
    }

    #[test]
    fn whole_pages() {
        assert_eq!(Some(0), pages_for(0));
        assert_eq!(Some(1), pages_for(1));
        assert_eq!(Some(1), pages_for(PAGE_SIZE));
        assert_eq!(Some(2), pages_for(PAGE_SIZE + 1));
        assert_eq!(Some(3), pages_for(2 * PAGE_SIZE + 100));
    }

    #[test]
    fn page_rounding_never_overflows() {
        assert_eq!(None, pages_for(usize::MAX));
        assert_eq!(None, pages_for(usize::MAX - (PAGE_SIZE - 2)));
        assert_eq!(
            Some(usize::MAX / PAGE_SIZE),
            pages_for(usize::MAX - (PAGE_SIZE - 1)),
        );
    }
}
