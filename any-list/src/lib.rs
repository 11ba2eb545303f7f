// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heterogeneous doubly linked lists with shared ownership.
//!
//! A single [`List`] manages unrelated kinds of objects (device descriptors,
//! format records, byte buffers, callbacks) behind the type-erased [`Payload`]
//! trait, without the container knowing their concrete shape.
//!
//! [`List`]: crate::list::List
//! [`Payload`]: crate::traits::Payload

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

// Required for deriving our traits when testing.
#[cfg(test)]
extern crate self as any_list;

mod error;
pub mod list;
mod traits;

pub use error::*;
pub use list::*;
pub use traits::*;
