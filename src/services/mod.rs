// SPDX-License-Identifier: MIT

//! Business logic services.

pub mod google;
pub mod gradescope;
pub mod identity;
pub mod lifecycle;
pub mod reconciler;
pub mod sync;
