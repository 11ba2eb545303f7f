// SPDX-License-Identifier: MIT OR Apache-2.0

mod base;
mod handle;

pub use base::*;
pub use handle::*;
