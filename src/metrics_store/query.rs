// Window and pod-filter validation for reads and deletes, plus the SQL predicate
// that selects cluster snapshots by id or created_at.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::ValidationError;
use crate::models::{PodFilter, TimeWindow};

/// Maximum `end - start` a windowed query may request.
/// Unbounded time-series reads would produce unbounded payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub all_pods_max_span: TimeDelta,
    pub single_pod_max_span: TimeDelta,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            all_pods_max_span: TimeDelta::hours(4),
            single_pod_max_span: TimeDelta::hours(72),
        }
    }
}

impl QueryLimits {
    pub fn max_span(&self, filter: &PodFilter) -> TimeDelta {
        if filter.is_wildcard() {
            self.all_pods_max_span
        } else {
            self.single_pod_max_span
        }
    }
}

/// What a validated query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPlan {
    /// Only the most recent cluster snapshot.
    Latest,
    /// Every snapshot with `start_ms <= created_at <= end_ms`.
    Range { start_ms: i64, end_ms: i64 },
}

/// Validate a read. No bounds means latest; otherwise both bounds are required,
/// ordered, and within the span cap for the filter.
pub fn plan_query(
    window: &TimeWindow,
    filter: &PodFilter,
    limits: &QueryLimits,
) -> Result<QueryPlan, ValidationError> {
    let (start, end) = match (window.start, window.end) {
        (None, None) => return Ok(QueryPlan::Latest),
        (Some(start), Some(end)) => (start, end),
        _ => return Err(ValidationError::IncompleteWindow),
    };
    if start > end {
        return Err(ValidationError::StartAfterEnd);
    }
    let span = end - start;
    let max = limits.max_span(filter);
    if span > max {
        return Err(ValidationError::SpanTooWide { span, max });
    }
    Ok(QueryPlan::Range {
        start_ms: ceil_millis(start),
        end_ms: end.timestamp_millis(),
    })
}

// Rows are stored at millisecond resolution: a lower bound rounds up, an upper bound down.
fn ceil_millis(t: DateTime<Utc>) -> i64 {
    let ms = t.timestamp_millis();
    if t.timestamp_subsec_nanos() % 1_000_000 == 0 {
        ms
    } else {
        ms.saturating_add(1)
    }
}

/// Validate a delete: any combination of bounds is allowed, but both together must be ordered.
pub fn validate_delete(window: &TimeWindow) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (window.start, window.end)
        && start > end
    {
        return Err(ValidationError::StartAfterEnd);
    }
    Ok(())
}

/// SQL condition over `cluster_snapshot c` with positional `?` binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ClusterPredicate {
    pub(super) sql: &'static str,
    pub(super) binds: Vec<i64>,
}

impl ClusterPredicate {
    pub(super) fn id(id: i64) -> Self {
        Self {
            sql: "c.id = ?",
            binds: vec![id],
        }
    }

    pub(super) fn for_plan(plan: QueryPlan, latest_id: Option<i64>) -> Option<Self> {
        match plan {
            QueryPlan::Latest => latest_id.map(Self::id),
            QueryPlan::Range { start_ms, end_ms } => Some(Self {
                sql: "c.created_at BETWEEN ? AND ?",
                binds: vec![start_ms, end_ms],
            }),
        }
    }

    pub(super) fn for_delete(window: &TimeWindow) -> Self {
        let start = window.start.map(ceil_millis);
        let end = window.end.map(|t| t.timestamp_millis());
        match (start, end) {
            (Some(s), Some(e)) => Self {
                sql: "c.created_at BETWEEN ? AND ?",
                binds: vec![s, e],
            },
            (Some(s), None) => Self {
                sql: "c.created_at >= ?",
                binds: vec![s],
            },
            (None, Some(e)) => Self {
                sql: "c.created_at <= ?",
                binds: vec![e],
            },
            (None, None) => Self {
                sql: "1 = 1",
                binds: vec![],
            },
        }
    }
}
