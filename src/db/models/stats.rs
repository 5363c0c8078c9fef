use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate view over the current plan/zone tables. Computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_plans: i64,
    pub online_plans: i64,
    pub offline_plans: i64,
    pub total_zones: i64,
    /// Most recent `updated_at` across all plans; `None` for an empty store.
    pub last_sync: Option<DateTime<Utc>>,
}
