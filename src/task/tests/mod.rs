//! Unit tests for the task core.

pub(crate) mod support;
