// SPDX-License-Identifier: MIT OR Apache-2.0

use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use alloc::alloc::{alloc, dealloc, Layout};
use alloc::rc::Rc;

use crate::error::ListError;
use crate::traits::{Bytes, Payload};

/// A doubly linked cell owned exclusively by its list.
pub(crate) struct Node {
    payload: Rc<dyn Payload>,
    prev: *mut Node,
    next: *mut Node,
}

impl Node {
    /// Allocates a node through the global allocator, reporting failure
    /// instead of aborting.
    ///
    /// The new node carries the given `prev` link and a null `next` link,
    /// ready for appending at the tail.
    fn allocate(payload: Rc<dyn Payload>, prev: *mut Node) -> Result<NonNull<Node>, ListError> {
        #[cfg(test)]
        if alloc_failure::should_fail() {
            return Err(ListError::OutOfMemory);
        }

        let layout = Layout::new::<Node>();
        let node = NonNull::new(unsafe { alloc(layout) } as *mut Node)
            .ok_or(ListError::OutOfMemory)?;

        unsafe {
            node.as_ptr().write(Node {
                payload,
                prev,
                next: ptr::null_mut(),
            });
        }

        Ok(node)
    }

    /// Deallocates an unlinked node and hands its payload to the caller.
    ///
    /// # Safety
    /// `node` must have been created by [`Node::allocate`] and must no longer
    /// be reachable from any list.
    unsafe fn free_into_payload(node: *mut Node) -> Rc<dyn Payload> {
        let payload = ptr::read(&(*node).payload);
        dealloc(node as *mut u8, Layout::new::<Node>());
        payload
    }

    /// Deallocates an unlinked node, releasing its payload handle.
    ///
    /// # Safety
    /// Same requirements as [`Node::free_into_payload`].
    unsafe fn free(node: *mut Node) {
        drop(Self::free_into_payload(node));
    }
}

/// Identifies a single element of a list, as returned by the search
/// operations and by [`Cursor::element`].
///
/// An element reference is only meaningful for the list that produced it, and
/// only until that list is mutated. Operations receiving a stale or foreign
/// reference report "not found" instead of touching the list.
///
/// [`Cursor::element`]: crate::list::Cursor::element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementRef {
    pub(crate) node: NonNull<Node>,
    pub(crate) stamp: u64,
}

/// A value-like doubly linked list that owns heterogeneous, type-erased
/// payloads.
///
/// `RawList` is the plain container: dropping it releases every payload it
/// still owns. Wrap it in (or create it as) a [`List`] to get the shared
/// handle with retain/release lifetime semantics.
///
/// All operations are non-blocking and bounded by the list size. The list
/// performs no locking; concurrent mutation must be serialised by the caller,
/// which the `!Sync` payload handles already enforce at compile time.
///
/// [`List`]: crate::list::List
pub struct RawList {
    head: *mut Node,
    tail: *mut Node,
    size: usize,
    // Bumped on every mutation; validates `ElementRef`s and cursors.
    stamp: u64,
}

impl RawList {
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            size: 0,
            stamp: 0,
        }
    }

    /// Returns the number of elements in the list.
    ///
    /// This operation computes in *O*(*1*) time.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Provides the payload at position `i` (0-based), or `None` if `i` is
    /// out of range.
    ///
    /// The two endpoints are resolved in *O*(*1*) time; any other position
    /// walks the chain from the head and computes in *O*(*n*) time.
    pub fn get(&self, i: usize) -> Option<Rc<dyn Payload>> {
        (i < self.size).then(|| unsafe { (*self.node_at(i)).payload.clone() })
    }

    /// Appends a payload to the back of the list.
    ///
    /// On allocation failure the list is left unchanged.
    ///
    /// This operation computes in *O*(*1*) time.
    pub fn push_back(&mut self, payload: Rc<dyn Payload>) -> Result<(), ListError> {
        let node = Node::allocate(payload, self.tail)?.as_ptr();

        if self.tail.is_null() {
            // First element: both endpoints move to the new node.
            self.head = node;
        } else {
            // Non-empty list: only the tail moves, the head link is untouched.
            unsafe {
                (*self.tail).next = node;
            }
        }

        self.tail = node;
        self.size += 1;
        self.bump();

        Ok(())
    }

    /// Appends a payload to the back of the list, wrapping it into a shared
    /// handle first.
    pub fn push_back_value<P: Payload>(&mut self, payload: P) -> Result<(), ListError> {
        self.push_back(Rc::new(payload))
    }

    /// Duplicates the given bytes into an owned [`Bytes`] payload and appends
    /// it to the back of the list.
    ///
    /// The copy is released when its node is destroyed.
    pub fn push_back_copy(&mut self, bytes: &[u8]) -> Result<(), ListError> {
        self.push_back(Rc::new(Bytes::copy_of(bytes)))
    }

    /// Unlinks the element at position `i` and transfers its payload to the
    /// caller, or returns `None` if `i` is out of range.
    ///
    /// The two endpoints are unlinked in *O*(*1*) time; any other position
    /// walks the chain from the head and computes in *O*(*n*) time.
    pub fn pop(&mut self, i: usize) -> Option<Rc<dyn Payload>> {
        if i >= self.size {
            return None;
        }

        let node = self.node_at(i);

        unsafe {
            self.unlink(node);
            self.size -= 1;
            self.bump();
            Some(Node::free_into_payload(node))
        }
    }

    /// Unlinks the given element and releases its payload, decrementing the
    /// size.
    ///
    /// The element is located by a linear membership scan; a stale or foreign
    /// reference returns `false` without touching the list.
    pub fn erase(&mut self, element: ElementRef) -> bool {
        let node = match self.position(element) {
            Some(node) => node,
            None => return false,
        };

        unsafe {
            self.unlink(node);
            Node::free(node);
        }
        self.size -= 1;
        self.bump();

        true
    }

    /// Removes all elements from the list, releasing every payload it still
    /// owns.
    ///
    /// Only the chain state is reset; an envelope around this container stays
    /// valid across a clear, so the list is immediately usable again.
    ///
    /// This operation computes in *O*(*n*) time.
    pub fn clear(&mut self) {
        let mut current = self.head;

        while !current.is_null() {
            let next = unsafe { (*current).next };
            unsafe { Node::free(current) };
            current = next;
        }

        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
        self.size = 0;
        self.bump();
    }

    /// Searches for the first element whose payload byte view starts with
    /// `key`.
    ///
    /// Payloads without a byte view, or with one shorter than `key`, never
    /// match. An empty key matches nothing.
    ///
    /// The tail is probed first, which resolves lookups for the most recently
    /// appended element in *O*(*1*) time; the remaining traversal walks
    /// `head..tail` in order.
    pub fn find(&self, key: &[u8]) -> Option<ElementRef> {
        if key.is_empty() {
            return None;
        }

        self.find_matching(|payload| {
            payload
                .as_bytes()
                .map_or(false, |bytes| bytes.len() >= key.len() && &bytes[..key.len()] == key)
        })
    }

    /// Searches for the first element matching the given equality predicate,
    /// probing the tail first like [`find`].
    ///
    /// The predicate must be pure and must not mutate the list.
    ///
    /// [`find`]: RawList::find
    pub fn find_by<F>(&self, key: &[u8], equals: F) -> Option<ElementRef>
    where
        F: Fn(&dyn Payload, &[u8]) -> bool,
    {
        self.find_matching(|payload| equals(payload, key))
    }

    /// Provides the payload of the given element, or `None` for a stale or
    /// foreign reference.
    pub fn payload(&self, element: ElementRef) -> Option<Rc<dyn Payload>> {
        self.position(element)
            .map(|node| unsafe { (*node).payload.clone() })
    }

    /// Returns an iterator yielding references to each payload of the list.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            flink: self.head,
            blink: self.tail,
            done: false,
            phantom: PhantomData,
        }
    }

    fn bump(&mut self) {
        self.stamp = self.stamp.wrapping_add(1);
    }

    /// Returns the node at position `i`, resolving the two endpoints without
    /// walking the chain.
    fn node_at(&self, i: usize) -> *mut Node {
        debug_assert!(i < self.size);

        if i == 0 {
            return self.head;
        }

        if i == self.size - 1 {
            return self.tail;
        }

        let mut node = self.head;
        for _ in 0..i {
            node = unsafe { (*node).next };
        }

        node
    }

    /// Rewires the neighbours of `node` around it, retargeting `head`/`tail`
    /// when an endpoint is removed. Does not free the node or touch `size`.
    ///
    /// # Safety
    /// `node` must be linked into this list.
    unsafe fn unlink(&mut self, node: *mut Node) {
        let prev = (*node).prev;
        let next = (*node).next;

        if prev.is_null() {
            self.head = next;
        } else {
            (*prev).next = next;
        }

        if next.is_null() {
            self.tail = prev;
        } else {
            (*next).prev = prev;
        }
    }

    /// Validates an element reference against the current mutation stamp and
    /// scans the chain for membership.
    ///
    /// The stamp check rejects references that outlived a mutation (including
    /// the case where the referenced node was freed and its address reused);
    /// the scan rejects references produced by a different list.
    fn position(&self, element: ElementRef) -> Option<*mut Node> {
        if element.stamp != self.stamp {
            return None;
        }

        let mut current = self.head;

        while !current.is_null() {
            if current == element.node.as_ptr() {
                return Some(current);
            }
            current = unsafe { (*current).next };
        }

        None
    }

    fn find_matching<F>(&self, matches: F) -> Option<ElementRef>
    where
        F: Fn(&dyn Payload) -> bool,
    {
        if self.is_empty() {
            return None;
        }

        unsafe {
            // Most lookups target the most recently appended element.
            if matches((*self.tail).payload.as_ref()) {
                return Some(self.element_ref(self.tail));
            }

            let mut current = self.head;
            while current != self.tail {
                if matches((*current).payload.as_ref()) {
                    return Some(self.element_ref(current));
                }
                current = (*current).next;
            }
        }

        None
    }

    fn element_ref(&self, node: *mut Node) -> ElementRef {
        // Nodes reachable from the chain are never null.
        ElementRef {
            node: unsafe { NonNull::new_unchecked(node) },
            stamp: self.stamp,
        }
    }

    pub(crate) fn stamp(&self) -> u64 {
        self.stamp
    }

    pub(crate) fn head_node(&self) -> Option<NonNull<Node>> {
        NonNull::new(self.head)
    }

    /// Steps to the successor of `node`.
    ///
    /// # Safety
    /// `node` must be linked into a list that has not been mutated since the
    /// node was observed.
    pub(crate) unsafe fn successor_of(node: NonNull<Node>) -> Option<NonNull<Node>> {
        NonNull::new(node.as_ref().next)
    }

    /// Clones the payload handle of `node`.
    ///
    /// # Safety
    /// Same requirements as [`RawList::successor_of`].
    pub(crate) unsafe fn payload_of(node: NonNull<Node>) -> Rc<dyn Payload> {
        node.as_ref().payload.clone()
    }
}

impl Default for RawList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RawList {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<'a> IntoIterator for &'a RawList {
    type Item = &'a dyn Payload;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Iterator over the payloads of a list.
///
/// This iterator is returned from the [`RawList::iter`] function.
pub struct Iter<'a> {
    flink: *const Node,
    blink: *const Node,
    done: bool,
    phantom: PhantomData<&'a RawList>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a dyn Payload;

    fn next(&mut self) -> Option<&'a dyn Payload> {
        if self.done || self.flink.is_null() {
            None
        } else {
            unsafe {
                let payload = (*self.flink).payload.as_ref();

                if self.flink == self.blink {
                    // We are crossing the other end of the iterator and must not iterate any further.
                    self.done = true;
                } else {
                    self.flink = (*self.flink).next;
                }

                Some(payload)
            }
        }
    }

    fn last(mut self) -> Option<&'a dyn Payload> {
        self.next_back()
    }
}

impl<'a> DoubleEndedIterator for Iter<'a> {
    fn next_back(&mut self) -> Option<&'a dyn Payload> {
        if self.done || self.blink.is_null() {
            None
        } else {
            unsafe {
                let payload = (*self.blink).payload.as_ref();

                if self.blink == self.flink {
                    // We are crossing the other end of the iterator and must not iterate any further.
                    self.done = true;
                } else {
                    self.blink = (*self.blink).prev;
                }

                Some(payload)
            }
        }
    }
}

impl<'a> FusedIterator for Iter<'a> {}

#[cfg(test)]
pub(crate) mod alloc_failure {
    use std::cell::Cell;

    std::thread_local! {
        static FAIL_NEXT: Cell<bool> = const { Cell::new(false) };
    }

    /// Makes the next node allocation on this thread fail.
    pub(crate) fn arm() {
        FAIL_NEXT.with(|fail| fail.set(true));
    }

    pub(crate) fn should_fail() -> bool {
        FAIL_NEXT.with(|fail| fail.replace(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::any::Any;
    use core::cell::Cell;

    struct Num(i32);

    impl Payload for Num {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Counts how often its payload has been released.
    struct Tracked {
        drops: Rc<Cell<usize>>,
    }

    impl Payload for Tracked {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn num_list(values: &[i32]) -> RawList {
        let mut list = RawList::new();
        for &value in values {
            list.push_back_value(Num(value)).unwrap();
        }
        list
    }

    fn num_of(payload: &dyn Payload) -> i32 {
        payload.downcast_ref::<Num>().unwrap().0
    }

    fn collect_nums(list: &RawList) -> Vec<i32> {
        list.iter().map(num_of).collect()
    }

    fn verify_all_links(list: &RawList) {
        // Traverse the list in forward direction and collect all nodes.
        let mut forward = Vec::<*mut Node>::new();
        let mut current = list.head;

        while !current.is_null() {
            unsafe {
                match forward.last() {
                    // Verify that the previous node is referenced by this node's `prev`.
                    Some(&last) => assert_eq!(last, (*current).prev),
                    None => assert!((*current).prev.is_null()),
                }
                forward.push(current);
                current = (*current).next;
            }
        }

        assert_eq!(forward.len(), list.len());

        // Traverse the list in backward direction and collect all nodes.
        let mut backward = Vec::<*mut Node>::with_capacity(forward.len());
        current = list.tail;

        while !current.is_null() {
            unsafe {
                match backward.last() {
                    // Verify that the previous node is referenced by this node's `next`.
                    Some(&last) => assert_eq!(last, (*current).next),
                    None => assert!((*current).next.is_null()),
                }
                backward.push(current);
                current = (*current).prev;
            }
        }

        // Verify that `backward` is the exact reverse of `forward`.
        assert_eq!(forward.len(), backward.len());

        for (f, b) in forward.iter().zip(backward.iter().rev()) {
            assert_eq!(f, b);
        }
    }

    #[test]
    fn test_single_element_links() {
        let list = num_list(&[1]);

        assert_eq!(list.len(), 1);
        assert_eq!(list.head, list.tail);
        unsafe {
            assert!((*list.head).prev.is_null());
            assert!((*list.head).next.is_null());
        }
        assert_eq!(num_of(list.get(0).unwrap().as_ref()), 1);

        verify_all_links(&list);
    }

    #[test]
    fn test_push_back_order() {
        let list = num_list(&[1, 2, 3]);

        assert_eq!(list.len(), 3);
        assert_eq!(collect_nums(&list), [1, 2, 3]);

        for (i, expected) in [1, 2, 3].into_iter().enumerate() {
            // Both endpoints go through their fast path and must still yield
            // the payload, not some internal state.
            assert_eq!(num_of(list.get(i).unwrap().as_ref()), expected);
        }
        assert!(list.get(3).is_none());

        verify_all_links(&list);
    }

    #[test]
    fn test_get_fast_paths_match_walk() {
        let list = num_list(&[10, 20, 30, 40, 50]);

        for (i, payload) in list.iter().enumerate() {
            let indexed = list.get(i).unwrap();
            assert!(Rc::ptr_eq(&indexed, &unsafe {
                (*list.node_at(i)).payload.clone()
            }));
            assert_eq!(num_of(indexed.as_ref()), num_of(payload));
        }
    }

    #[test]
    fn test_pop_middle() {
        let mut list = num_list(&[1, 2, 3]);

        let popped = list.pop(1).unwrap();
        assert_eq!(num_of(popped.as_ref()), 2);

        assert_eq!(list.len(), 2);
        assert_eq!(collect_nums(&list), [1, 3]);
        unsafe {
            assert_eq!((*list.head).next, list.tail);
            assert_eq!((*list.tail).prev, list.head);
        }

        verify_all_links(&list);
    }

    #[test]
    fn test_pop_endpoints() {
        let mut list = num_list(&[1, 2, 3]);

        assert_eq!(num_of(list.pop(2).unwrap().as_ref()), 3);
        verify_all_links(&list);
        assert_eq!(num_of(list.pop(0).unwrap().as_ref()), 1);
        verify_all_links(&list);
        assert_eq!(num_of(list.pop(0).unwrap().as_ref()), 2);

        assert!(list.is_empty());
        assert!(list.head.is_null());
        assert!(list.tail.is_null());
        assert!(list.pop(0).is_none());
    }

    #[test]
    fn test_push_pop_round_trip() {
        let mut list = num_list(&[1, 2]);

        list.push_back_value(Num(9)).unwrap();
        let popped = list.pop(list.len() - 1).unwrap();

        assert_eq!(num_of(popped.as_ref()), 9);
        assert_eq!(list.len(), 2);
        verify_all_links(&list);
    }

    #[test]
    fn test_pop_transfers_ownership() {
        let drops = Rc::new(Cell::new(0));
        let mut list = RawList::new();
        list.push_back_value(Tracked {
            drops: drops.clone(),
        })
        .unwrap();

        let payload = list.pop(0).unwrap();
        assert_eq!(drops.get(), 0);

        drop(payload);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_clear_releases_payloads() {
        let drops = Rc::new(Cell::new(0));
        let mut list = RawList::new();

        for _ in 0..3 {
            list.push_back_value(Tracked {
                drops: drops.clone(),
            })
            .unwrap();
        }

        list.clear();

        assert_eq!(drops.get(), 3);
        assert!(list.is_empty());
        assert!(list.head.is_null());
        assert!(list.tail.is_null());

        // The container stays usable after a clear.
        list.push_back_value(Num(1)).unwrap();
        assert_eq!(list.len(), 1);
        verify_all_links(&list);
    }

    #[test]
    fn test_drop_releases_payloads() {
        let drops = Rc::new(Cell::new(0));

        {
            let mut list = RawList::new();
            for _ in 0..2 {
                list.push_back_value(Tracked {
                    drops: drops.clone(),
                })
                .unwrap();
            }
        }

        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_erase() {
        let drops = Rc::new(Cell::new(0));
        let mut list = num_list(&[1]);
        list.push_back_value(Tracked {
            drops: drops.clone(),
        })
        .unwrap();
        list.push_back_value(Num(3)).unwrap();

        let element = list
            .find_by(&[], |payload, _| payload.is::<Tracked>())
            .unwrap();
        assert!(list.erase(element));

        assert_eq!(drops.get(), 1);
        assert_eq!(list.len(), 2);
        assert_eq!(collect_nums(&list), [1, 3]);
        verify_all_links(&list);

        // The reference died together with its node.
        assert!(!list.erase(element));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_erase_stale_reference() {
        let mut list = num_list(&[1, 2, 3]);

        let element = list.find_by(&[], |payload, _| num_of(payload) == 2).unwrap();
        list.push_back_value(Num(4)).unwrap();

        // Any mutation invalidates previously obtained references.
        assert!(!list.erase(element));
        assert_eq!(list.len(), 4);
        assert!(list.payload(element).is_none());
    }

    #[test]
    fn test_find_byte_compare() {
        let mut list = RawList::new();
        for key in [&b"xx"[..], b"yy", b"zz"] {
            list.push_back_copy(key).unwrap();
        }

        let element = list.find(b"zz").unwrap();
        let payload = list.payload(element).unwrap();
        assert_eq!(payload.as_bytes(), Some(&b"zz"[..]));

        // Keys longer than any payload view never match.
        assert!(list.find(b"zzz").is_none());
        assert!(list.find(b"aa").is_none());
        assert!(list.find(b"").is_none());
    }

    #[test]
    fn test_find_prefers_tail() {
        let mut list = RawList::new();
        for key in [&b"xx"[..], b"yy", b"xx"] {
            list.push_back_copy(key).unwrap();
        }

        // The tail is probed first, so a matching tail wins over an equal
        // element further up front.
        let element = list.find(b"xx").unwrap();
        assert_eq!(element.node.as_ptr(), list.tail);
    }

    #[test]
    fn test_find_by_predicate() {
        let list = num_list(&[1, 2, 3]);

        let element = list
            .find_by(&2i32.to_ne_bytes(), |payload, key| {
                num_of(payload).to_ne_bytes() == key
            })
            .unwrap();
        assert_eq!(num_of(list.payload(element).unwrap().as_ref()), 2);

        assert!(list
            .find_by(&[], |payload, _| num_of(payload) == 7)
            .is_none());
    }

    #[test]
    fn test_find_by_single_element() {
        // A one-element list must still run the predicate against its only
        // element, even though the tail probe and the interior walk coincide.
        let list = num_list(&[5]);

        let element = list.find_by(&[], |payload, _| num_of(payload) == 5).unwrap();
        assert_eq!(num_of(list.payload(element).unwrap().as_ref()), 5);
    }

    #[test]
    fn test_iter_double_ended() {
        let list = num_list(&[1, 2, 3, 4]);

        let backwards: Vec<i32> = list.iter().rev().map(num_of).collect();
        assert_eq!(backwards, [4, 3, 2, 1]);

        let mut iter = list.iter();
        assert_eq!(num_of(iter.next().unwrap()), 1);
        assert_eq!(num_of(iter.next_back().unwrap()), 4);
        assert_eq!(num_of(iter.next().unwrap()), 2);
        assert_eq!(num_of(iter.next_back().unwrap()), 3);
        assert!(iter.next().is_none());
        assert!(iter.next_back().is_none());
    }

    #[test]
    fn test_empty_list_operations() {
        let mut list = RawList::new();

        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert!(list.get(0).is_none());
        assert!(list.pop(0).is_none());
        assert!(list.find(b"key").is_none());
        assert!(list.find_by(b"key", |_, _| true).is_none());
        assert!(list.iter().next().is_none());

        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn test_allocation_failure() {
        let mut list = num_list(&[1, 2]);

        alloc_failure::arm();
        assert_eq!(
            list.push_back_value(Num(3)),
            Err(ListError::OutOfMemory)
        );

        // The failed insertion must not have touched the list.
        assert_eq!(list.len(), 2);
        assert_eq!(collect_nums(&list), [1, 2]);
        verify_all_links(&list);

        list.push_back_value(Num(3)).unwrap();
        assert_eq!(collect_nums(&list), [1, 2, 3]);
    }
}
