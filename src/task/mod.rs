//! Hierarchical task store.
//!
//! Tasks form a tree addressed by materialized paths, move through a
//! lifecycle of stages mirrored by a coarse status, carry typed custom
//! attributes, and depend on one another through an acyclic graph of
//! typed edges. Every mutation leaves an event in the task's history.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub(crate) mod duration_secs;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
