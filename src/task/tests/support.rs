//! Shared fixtures for task unit tests.

use chrono::{DateTime, Local, TimeZone, Utc};
use mockable::Clock;
use std::sync::{Arc, Mutex};

use crate::task::adapters::memory::InMemoryTaskRepository;

/// Clock whose reading only moves when a test moves it.
#[derive(Debug)]
pub(crate) struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub(crate) fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock forward by `span`.
    pub(crate) fn advance(&self, span: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += span;
        }
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).single().unwrap_or_default())
    }
}

impl Clock for TestClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_default()
    }
}

/// Repository and clock wired together.
pub(crate) fn repository_with_clock() -> (Arc<InMemoryTaskRepository<TestClock>>, Arc<TestClock>) {
    let clock = Arc::new(TestClock::default());
    let repository = Arc::new(InMemoryTaskRepository::with_clock(Arc::clone(&clock)));
    (repository, clock)
}
