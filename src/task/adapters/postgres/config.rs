//! Tunables for the `PostgreSQL` task repository.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on a single statement.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of [`super::PostgresTaskRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresRepositoryConfig {
    /// Applied with `SET LOCAL statement_timeout` inside every transaction.
    #[serde(with = "crate::task::duration_secs")]
    pub statement_timeout: Duration,
}

impl PostgresRepositoryConfig {
    /// Overrides the statement timeout.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

impl Default for PostgresRepositoryConfig {
    fn default() -> Self {
        Self {
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}
