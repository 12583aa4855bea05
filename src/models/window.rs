// Time window and pod filter used by queries and deletes.

use chrono::{DateTime, Utc};

/// Pod filter value that matches every pod name.
pub const WILDCARD: &str = "%";

/// Optional inclusive `[start, end]` bound on a cluster snapshot's `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// No bounds: a query returns the latest snapshot, a delete removes everything.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn until(end: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Which pods of a snapshot to return.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PodFilter {
    #[default]
    All,
    Named(String),
}

impl PodFilter {
    /// Absent, empty and `%` all mean every pod; anything else is an exact name.
    /// Surrounding whitespace only matters for spotting the empty and wildcard forms;
    /// a name is kept exactly as given.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None => PodFilter::All,
            Some(raw) if matches!(raw.trim(), "" | WILDCARD) => PodFilter::All,
            Some(name) => PodFilter::Named(name.to_string()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, PodFilter::All)
    }

    pub fn matches(&self, pod_name: &str) -> bool {
        match self {
            PodFilter::All => true,
            PodFilter::Named(name) => name == pod_name,
        }
    }
}
