//! `PostgreSQL` adapters for task graph persistence.
//!
//! The schema lives in `migrations/` at the crate root. Core rows and side
//! tables map one-to-one onto the record types in the private `models`
//! module.

mod config;
mod models;
mod repository;
mod schema;


pub use config::{DEFAULT_STATEMENT_TIMEOUT, PostgresRepositoryConfig};
pub use repository::{PostgresTaskRepository, TaskPgPool};
