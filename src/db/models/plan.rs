use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::SellMode;

// ============================================================================
// Plan / Zone Models (synced from the provider feed)
// ============================================================================

/// A sellable event instance. Identity is the provider-assigned `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub base_plan_id: String,
    pub organizer_company_id: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub sell_from: DateTime<Utc>,
    pub sell_to: DateTime<Utc>,
    pub sold_out: bool,
    pub sell_mode: SellMode,
    /// Ordered by name when read back from storage.
    pub zones: Vec<Zone>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Seating/pricing partition of a plan. Identity is `(id, plan_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: String,
    pub plan_id: String,
    pub name: String,
    pub capacity: i64,
    pub price: f64,
    pub numbered: bool,
}

// ============================================================================
// Stored timestamp format
// ============================================================================

/// Format used for every timestamp column. Fixed width and always UTC, so
/// string comparison in SQL matches chronological order.
pub fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp back. Also accepts naive values written as UTC.
pub fn parse_db_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
