//! Session time source.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{Duration, FixedOffset, Local, NaiveDateTime, Utc};

/// Where the session reads the current time from.
///
/// Conditions and log records always go through the session clock so tests
/// can virtualize time.
#[derive(Clone)]
pub enum Clock {
    /// Wall clock, in local time or at a fixed UTC offset.
    System { utc_offset: Option<FixedOffset> },
    /// User supplied time function.
    Custom(Arc<dyn Fn() -> NaiveDateTime + Send + Sync>),
}

impl Clock {
    pub fn system() -> Self {
        Self::System { utc_offset: None }
    }

    /// Wall clock shifted to `seconds` east of UTC. Out-of-range offsets
    /// fall back to local time.
    pub fn with_utc_offset(seconds: i32) -> Self {
        Self::System {
            utc_offset: FixedOffset::east_opt(seconds),
        }
    }

    pub fn custom(f: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn now(&self) -> NaiveDateTime {
        match self {
            Self::System {
                utc_offset: Some(offset),
            } => Utc::now().with_timezone(offset).naive_local(),
            Self::System { utc_offset: None } => Local::now().naive_local(),
            Self::Custom(f) => f(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System { utc_offset } => f
                .debug_struct("System")
                .field("utc_offset", utc_offset)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A manually driven clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl MockClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, t: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = crate::time::interval::shift(*now, by);
    }

    /// A [`Clock`] reading this mock.
    pub fn clock(&self) -> Clock {
        let mock = self.clone();
        Clock::custom(move || mock.now())
    }
}
