//! Render Graph System
//!
//! An ordered list of graphics and compute passes. Each pass owns one command
//! buffer per frame in flight, may be gated by a predicate over the live
//! configuration, and may nest inner passes recorded inside its own scope.
//! Synchronization is explicit: record callbacks emit their barriers.

pub mod barrier;
pub mod frame;
pub mod graph;
pub mod pass;

pub use barrier::*;
pub use frame::*;
pub use graph::*;
pub use pass::*;
