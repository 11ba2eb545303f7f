// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// Failure modes of fallible list operations.
///
/// Domain outcomes (out-of-range index, empty list, no match) are expressed
/// through `Option`/`bool` results instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ListError {
    /// The allocator refused to provide memory for a new node.
    ///
    /// The list is left in its pre-call state.
    #[error("out of memory")]
    OutOfMemory,
}
