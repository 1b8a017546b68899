//! Configuration constants shared by the fault capture and reporting crates.
//!
//! Everything here is a `const`: the fault path cannot consult a runtime
//! configuration store, since that store may be the very thing that was corrupted.

#![no_std]

pub mod fault;
pub mod memory;
pub mod time;
