// SPDX-License-Identifier: MIT OR Apache-2.0

use core::any::Any;
use core::fmt;
use core::ops::Deref;

use alloc::boxed::Box;

/// Designates a type as a payload that a list can store.
///
/// A list never copies, compares, hashes, or interprets its payloads; all it
/// requires is the [`Any`] upcast for downcasting a stored payload back to its
/// concrete type, and an optional byte view for byte-compare search.
///
/// Disposal is encoded by `Drop`: when the last holder of a payload handle
/// releases it (usually the node that stored it), the payload is dropped
/// exactly once. A caller that keeps a clone of the handle thereby opts the
/// list out of exclusive ownership.
///
/// The easiest way to implement this trait for a plain-data `#[repr(C)]`
/// structure without padding bytes is to use `derive`, which also generates
/// the byte view:
///
/// ```ignore
/// #[derive(Payload)]
/// #[repr(C)]
/// struct FormatRecord {
///     width: u32,
///     height: u32,
///     fourcc: u32,
/// }
/// ```
///
/// Types without a stable byte representation implement the trait by hand and
/// keep the default [`as_bytes`] of `None`.
///
/// [`as_bytes`]: Payload::as_bytes
pub trait Payload: Any {
    /// Upcasts the payload for downcasting to its concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Returns a raw byte view of the payload for byte-compare search,
    /// or `None` if the payload has no stable byte representation.
    ///
    /// Byte-compare search only considers payloads whose byte view is at
    /// least as long as the key.
    ///
    /// Implementations must only expose fully initialized bytes. In
    /// particular, a view over the payload's own memory requires a layout
    /// without padding bytes; the derive enforces this with a compile-time
    /// assertion.
    fn as_bytes(&self) -> Option<&[u8]> {
        None
    }
}
pub use any_list_macros::Payload;

impl dyn Payload {
    /// Returns a reference to the concrete payload type,
    /// or `None` if the payload is of a different type.
    pub fn downcast_ref<P: Payload>(&self) -> Option<&P> {
        self.as_any().downcast_ref::<P>()
    }

    /// Returns `true` if the payload is of type `P`.
    pub fn is<P: Payload>(&self) -> bool {
        self.as_any().is::<P>()
    }
}

/// An owned byte buffer payload.
///
/// [`push_back_copy`] duplicates caller bytes into this type; the copy is
/// freed when its node is destroyed (or when the last holder of a popped
/// handle releases it).
///
/// [`push_back_copy`]: crate::list::List::push_back_copy
pub struct Bytes(Box<[u8]>);

impl Bytes {
    /// Duplicates the given bytes into an owned buffer.
    pub fn copy_of(bytes: &[u8]) -> Self {
        Self(Box::from(bytes))
    }
}

impl Payload for Bytes {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_bytes(&self) -> Option<&[u8]> {
        Some(&self.0)
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bytes").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(u32);

    impl Payload for Marker {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_downcast() {
        let payload: Box<dyn Payload> = Box::new(Marker(42));

        assert!(payload.is::<Marker>());
        assert!(!payload.is::<Bytes>());
        assert_eq!(payload.downcast_ref::<Marker>().unwrap().0, 42);
        assert!(payload.downcast_ref::<Bytes>().is_none());
    }

    #[test]
    fn test_bytes_view() {
        let bytes = Bytes::copy_of(b"yuyv");

        assert_eq!(bytes.as_bytes(), Some(&b"yuyv"[..]));
        assert_eq!(&*bytes, b"yuyv");

        let marker = Marker(0);
        assert_eq!(marker.as_bytes(), None);
    }
}
