//! Wire types shared between the device firmware and host-side tooling.
//!
//! Builds without `std` so the firmware and the host core agree on the exact
//! same envelope shape.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod envelope;
pub mod relay;

pub use envelope::Envelope;
