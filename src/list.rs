use std::ptr::NonNull;

/// Nullable pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// A node of an intrusive doubly linked list.
///
/// The list never allocates nodes itself: we *are* the allocator, so every
/// node is written at an address the caller already owns (the start of a
/// page, the payload of a free cell, ...). The `data` field carries the
/// header that lives at that address.
pub(crate) struct Node<T> {
    /// Next node of the list.
    pub next: Link<Node<T>>,
    /// Previous node of the list.
    pub prev: Link<Node<T>>,
    /// Header stored in this node.
    pub data: T,
}

/// Intrusive doubly linked list of headers placed in caller-owned memory.
///
/// Used for the list of masses backing a bucket and for the heap's list of
/// outstanding large blocks. Unlinking a node only needs the node pointer,
/// which the heap recovers from an allocation's address, so both `free`
/// paths stay O(1) in list operations.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    /// Writes a new node containing `data` at `addr` and links it at the
    /// back of the list.
    ///
    /// **SAFETY**: `addr` must point to writable memory with room for a
    /// `Node<T>`, properly aligned for it, and that memory must stay put for
    /// as long as the node is linked.
    pub unsafe fn push_back(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: None,
                prev: self.tail,
                data,
            });

            match self.tail {
                Some(mut tail) => tail.as_mut().next = Some(node),
                None => self.head = Some(node),
            }
        }

        self.tail = Some(node);
        self.len += 1;

        node
    }

    /// Unlinks `node` from the list. The node's memory is untouched and
    /// goes back to whoever owns it.
    ///
    /// **SAFETY**: `node` must currently be linked into *this* list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
        unsafe {
            let prev = node.as_ref().prev;
            let next = node.as_ref().next;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }
        }

        self.len -= 1;
    }

    /// Linear membership scan. Only meant for consistency checks in debug
    /// builds; the hot paths never call it.
    pub fn contains(&self, node: NonNull<Node<T>>) -> bool {
        let mut current = self.head;

        while let Some(candidate) = current {
            if candidate == node {
                return true;
            }
            current = unsafe { candidate.as_ref().next };
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Word-aligned backing storage for a handful of nodes. A `Node<usize>`
    // is three words, so nodes are placed eight words apart.
    fn slot(storage: &mut [usize; 32], index: usize) -> NonNull<u8> {
        NonNull::new(&mut storage[index * 8] as *mut usize).unwrap().cast()
    }

    #[test]
    fn new_list_is_empty() {
        let list: List<usize> = List::new();

        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert!(list.first().is_none());
    }

    #[test]
    fn push_links_in_order() {
        let mut storage = [0usize; 32];
        let mut list: List<usize> = List::new();

        unsafe {
            let a = list.push_back(10, slot(&mut storage, 0));
            let b = list.push_back(20, slot(&mut storage, 1));
            let c = list.push_back(30, slot(&mut storage, 2));

            assert_eq!(list.len(), 3);
            assert_eq!(list.first(), Some(a));
            assert_eq!(a.as_ref().next, Some(b));
            assert_eq!(b.as_ref().next, Some(c));
            assert_eq!(c.as_ref().next, None);
            assert_eq!(c.as_ref().prev, Some(b));
            assert_eq!(b.as_ref().data, 20);
        }
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut storage = [0usize; 32];
        let mut list: List<usize> = List::new();

        unsafe {
            let a = list.push_back(1, slot(&mut storage, 0));
            let b = list.push_back(2, slot(&mut storage, 1));
            let c = list.push_back(3, slot(&mut storage, 2));

            list.remove(b);
            assert_eq!(list.len(), 2);
            assert_eq!(a.as_ref().next, Some(c));
            assert_eq!(c.as_ref().prev, Some(a));
            assert!(!list.contains(b));

            list.remove(a);
            assert_eq!(list.first(), Some(c));

            list.remove(c);
            assert!(list.is_empty());
            assert!(list.first().is_none());
        }
    }

    #[test]
    fn membership_scan() {
        let mut storage = [0usize; 32];
        let mut list: List<usize> = List::new();
        let mut other: List<usize> = List::new();

        unsafe {
            let a = list.push_back(1, slot(&mut storage, 0));
            let b = other.push_back(2, slot(&mut storage, 1));

            assert!(list.contains(a));
            assert!(!list.contains(b));
        }
    }
}
