//! Trellis: a hierarchical task store for specialist work.
//!
//! The crate keeps tasks in a tree, tracks their lifecycle, records typed
//! attributes and inter-task dependencies, and offers services that detect
//! stale work and archive finished subtrees.
//!
//! # Architecture
//!
//! Trellis follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for storage and artifacts
//! - **Adapters**: In-memory and `PostgreSQL` implementations of the ports
//!
//! # Modules
//!
//! - [`task`]: Task hierarchy, lifecycle, attributes, dependencies, and services

pub mod task;
