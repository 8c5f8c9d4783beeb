//! Lifecycle status derived purely from offering dates and the current date.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LifecycleStatus {
    #[default]
    Upcoming,
    Open,
    Closed,
}

impl LifecycleStatus {
    /// `Open` inside `[open, close]`, `Closed` after `close`, otherwise `Upcoming`.
    ///
    /// Never cached: callers recompute on every run so a record moves through
    /// the lifecycle as time passes.
    pub fn derive(open: Option<NaiveDate>, close: Option<NaiveDate>, today: NaiveDate) -> Self {
        match (open, close) {
            (Some(open), Some(close)) if open <= today && today <= close => LifecycleStatus::Open,
            (_, Some(close)) if today > close => LifecycleStatus::Closed,
            _ => LifecycleStatus::Upcoming,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Upcoming => "Upcoming",
            LifecycleStatus::Open => "Open",
            LifecycleStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
