// SPDX-License-Identifier: MIT OR Apache-2.0

use core::cell::RefCell;
use core::ptr::NonNull;

use alloc::rc::{Rc, Weak};

use super::base::{ElementRef, Node, RawList};
use crate::error::ListError;
use crate::traits::Payload;

/// A shared handle to a heterogeneous doubly linked list.
///
/// `List` substitutes the reference-counted envelope of the original driver
/// interface: cloning the handle retains the container, dropping a handle
/// releases it, and the last release clears the list (releasing every payload
/// it still owns) and frees the container. Double-release cannot occur, since
/// every holder owns its handle.
///
/// All operations borrow the container for their duration. The handle is not
/// `Send` or `Sync`; concurrent mutation must be serialised by the caller
/// anyway, and this makes the requirement a compile-time fact.
#[derive(Clone, Default)]
pub struct List {
    inner: Rc<RefCell<RawList>>,
}

impl List {
    /// Creates a new empty list with a single handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of handles currently retaining this list.
    pub fn handles(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Returns the number of elements in the list.
    ///
    /// This operation computes in *O*(*1*) time.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Provides the payload at position `i` (0-based), or `None` if `i` is
    /// out of range.
    ///
    /// The two endpoints are resolved in *O*(*1*) time; any other position
    /// computes in *O*(*n*) time. Prefer a [`Cursor`] over repeated indexed
    /// access when traversing.
    pub fn get(&self, i: usize) -> Option<Rc<dyn Payload>> {
        self.inner.borrow().get(i)
    }

    /// Appends a payload to the back of the list.
    ///
    /// On allocation failure the list is left unchanged.
    ///
    /// This operation computes in *O*(*1*) time.
    pub fn push_back(&self, payload: Rc<dyn Payload>) -> Result<(), ListError> {
        self.inner.borrow_mut().push_back(payload)
    }

    /// Appends a payload to the back of the list, wrapping it into a shared
    /// handle first.
    pub fn push_back_value<P: Payload>(&self, payload: P) -> Result<(), ListError> {
        self.inner.borrow_mut().push_back_value(payload)
    }

    /// Duplicates the given bytes into an owned [`Bytes`] payload and appends
    /// it to the back of the list.
    ///
    /// [`Bytes`]: crate::Bytes
    pub fn push_back_copy(&self, bytes: &[u8]) -> Result<(), ListError> {
        self.inner.borrow_mut().push_back_copy(bytes)
    }

    /// Unlinks the element at position `i` and transfers its payload to the
    /// caller, or returns `None` if `i` is out of range.
    pub fn pop(&self, i: usize) -> Option<Rc<dyn Payload>> {
        self.inner.borrow_mut().pop(i)
    }

    /// Unlinks the given element and releases its payload.
    ///
    /// Returns `false` for a stale or foreign reference, leaving the list
    /// untouched.
    pub fn erase(&self, element: ElementRef) -> bool {
        self.inner.borrow_mut().erase(element)
    }

    /// Removes all elements from the list, releasing every payload it still
    /// owns.
    ///
    /// The handle (and all of its clones) stays valid; the list is
    /// immediately usable again.
    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }

    /// Searches for the first element whose payload byte view starts with
    /// `key`, probing the tail first.
    ///
    /// See [`RawList::find`] for the exact matching rule.
    pub fn find(&self, key: &[u8]) -> Option<ElementRef> {
        self.inner.borrow().find(key)
    }

    /// Searches for the first element matching the given equality predicate,
    /// probing the tail first.
    ///
    /// The predicate must be pure and must not mutate the list; a predicate
    /// that tries to mutate it through a cloned handle panics on the borrow.
    pub fn find_by<F>(&self, key: &[u8], equals: F) -> Option<ElementRef>
    where
        F: Fn(&dyn Payload, &[u8]) -> bool,
    {
        self.inner.borrow().find_by(key, equals)
    }

    /// Provides the payload of the given element, or `None` for a stale or
    /// foreign reference.
    pub fn payload(&self, element: ElementRef) -> Option<Rc<dyn Payload>> {
        self.inner.borrow().payload(element)
    }

    /// Calls `f` on every payload in list order.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&dyn Payload),
    {
        let inner = self.inner.borrow();
        for payload in inner.iter() {
            f(payload);
        }
    }

    /// Returns a detached cursor for stepping forward through this list.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            list: Rc::downgrade(&self.inner),
            pos: None,
            stamp: 0,
        }
    }
}

impl From<RawList> for List {
    fn from(raw: RawList) -> Self {
        Self {
            inner: Rc::new(RefCell::new(raw)),
        }
    }
}

/// A caller-held cursor for stepping forward through a list.
///
/// The cursor starts detached; the first step repositions it to the head.
/// Stepping past the tail detaches it again, so the step after that restarts
/// from the head. Any mutation of the list invalidates an attached cursor:
/// the following step yields `None` and detaches it.
///
/// **State machine of a traversal:**
///
/// ```text
/// start ──next──▶ head ──next──▶ … ──next──▶ tail ──next──▶ detached
/// ```
pub struct Cursor {
    list: Weak<RefCell<RawList>>,
    pos: Option<NonNull<Node>>,
    stamp: u64,
}

impl Cursor {
    /// Advances the cursor and provides the payload at the new position, or
    /// `None` when stepping past the tail, after an intervening mutation, or
    /// when the list no longer exists.
    pub fn next(&mut self) -> Option<Rc<dyn Payload>> {
        let inner = self.list.upgrade()?;
        let list = inner.borrow();

        match self.pos {
            None => {
                self.stamp = list.stamp();
                self.pos = list.head_node();
            }
            Some(node) => {
                if self.stamp != list.stamp() {
                    // The list was mutated since the cursor attached.
                    self.pos = None;
                    return None;
                }

                // The stamp is current, so the node is still alive and linked.
                self.pos = unsafe { RawList::successor_of(node) };
            }
        }

        self.pos.map(|node| unsafe { RawList::payload_of(node) })
    }

    /// Returns the element the cursor currently rests on, e.g. for
    /// [`List::erase`], or `None` if the cursor is detached.
    pub fn element(&self) -> Option<ElementRef> {
        self.pos.map(|node| ElementRef {
            node,
            stamp: self.stamp,
        })
    }

    /// Detaches the cursor, so that the next step restarts from the head.
    pub fn rewind(&mut self) {
        self.pos = None;
    }
}
