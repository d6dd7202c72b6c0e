//! Step definitions for archival and stale detection scenarios.

mod given;
mod then;
mod when;
pub mod world;
