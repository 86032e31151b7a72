//! Time and user providers consulted by behaviours.

use chrono::{NaiveDateTime, TimeDelta, Timelike, Utc};
use std::sync::Mutex;

/// Source of "now" for timestamp stamping.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in UTC, truncated to whole seconds so stored text round-trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Utc::now().naive_utc();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

/// A clock that only moves when told to. Meant for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// The user on whose behalf a unit of work runs.
pub trait CurrentUser: Send + Sync {
    fn user_id(&self) -> i64;

    /// Primary group, used by the permissions behaviour.
    fn group_id(&self) -> Option<i64> {
        None
    }

    /// Superusers bypass permission checks.
    fn is_superuser(&self) -> bool {
        false
    }
}

/// A fixed user identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticUser {
    pub id: i64,
    pub group_id: Option<i64>,
    pub superuser: bool,
}

impl StaticUser {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            group_id: None,
            superuser: false,
        }
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn superuser(mut self) -> Self {
        self.superuser = true;
        self
    }
}

impl CurrentUser for StaticUser {
    fn user_id(&self) -> i64 {
        self.id
    }

    fn group_id(&self) -> Option<i64> {
        self.group_id
    }

    fn is_superuser(&self) -> bool {
        self.superuser
    }
}
