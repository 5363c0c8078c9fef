//! Maps the provider's raw feed onto [`Plan`]/[`Zone`] records.
//!
//! Transformation never fails as a whole: a malformed plan is logged and
//! skipped, everything else in the feed still goes through.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::db::{Plan, SellMode, Zone};
use crate::services::provider::{RawBasePlan, RawFeed, RawPlan, RawZone};

#[derive(Debug, thiserror::Error)]
enum TransformError {
    #[error("missing required attribute `{0}`")]
    MissingField(&'static str),

    #[error("invalid sell mode {0:?}")]
    InvalidSellMode(String),

    #[error("invalid `{field}` date {value:?}")]
    InvalidDate { field: &'static str, value: String },

    #[error("start date {start} is not before end date {end}")]
    InvertedWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

pub fn transform(feed: &RawFeed) -> Vec<Plan> {
    transform_at(feed, Utc::now())
}

/// Same as [`transform`] with an explicit timestamp for `created_at`/`updated_at`.
pub fn transform_at(feed: &RawFeed, now: DateTime<Utc>) -> Vec<Plan> {
    let mut plans = Vec::new();
    let mut skipped = 0usize;

    for base in &feed.base_plans {
        let base_id = base.base_plan_id.as_deref().unwrap_or("<unknown>");

        if base.plans.is_empty() {
            tracing::debug!(base_plan_id = base_id, "Skipping base plan without plans");
            continue;
        }

        for raw in &base.plans {
            match transform_plan(base, raw, now) {
                Ok(plan) => plans.push(plan),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        base_plan_id = base_id,
                        plan_id = raw.plan_id.as_deref().unwrap_or("<unknown>"),
                        "Skipping malformed plan: {}",
                        e
                    );
                }
            }
        }
    }

    tracing::info!(
        base_plans = feed.base_plans.len(),
        plans = plans.len(),
        skipped,
        "Transformed provider feed"
    );

    plans
}

fn transform_plan(
    base: &RawBasePlan,
    raw: &RawPlan,
    now: DateTime<Utc>,
) -> Result<Plan, TransformError> {
    let id = required(&raw.plan_id, "plan_id")?.to_string();
    let base_plan_id = required(&base.base_plan_id, "base_plan_id")?.to_string();
    let title = required(&base.title, "title")?.to_string();

    let sell_mode_raw = required(&base.sell_mode, "sell_mode")?;
    let sell_mode = SellMode::from_str(sell_mode_raw)
        .ok_or_else(|| TransformError::InvalidSellMode(sell_mode_raw.to_string()))?;

    let start_date = required_date(&raw.plan_start_date, "plan_start_date")?;
    let end_date = required_date(&raw.plan_end_date, "plan_end_date")?;
    if start_date >= end_date {
        return Err(TransformError::InvertedWindow {
            start: start_date,
            end: end_date,
        });
    }

    let sell_from = required_date(&raw.sell_from, "sell_from")?;
    let sell_to = required_date(&raw.sell_to, "sell_to")?;

    Ok(Plan {
        zones: transform_zones(&id, &raw.zones),
        id,
        title,
        base_plan_id,
        organizer_company_id: base
            .organizer_company_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        start_date,
        end_date,
        sell_from,
        sell_to,
        sold_out: is_true(&raw.sold_out),
        sell_mode,
        created_at: now,
        updated_at: now,
    })
}

/// Zones keep feed order. Zones without an id, or repeating one, are dropped:
/// `(id, plan_id)` is the storage key and a duplicate would abort the whole batch.
fn transform_zones(plan_id: &str, raw_zones: &[RawZone]) -> Vec<Zone> {
    let mut seen = HashSet::new();
    let mut zones = Vec::with_capacity(raw_zones.len());

    for raw in raw_zones {
        let Some(id) = raw.zone_id.as_deref().filter(|s| !s.is_empty()) else {
            tracing::warn!(plan_id, "Skipping zone without zone_id");
            continue;
        };
        if !seen.insert(id) {
            tracing::warn!(plan_id, zone_id = id, "Skipping duplicate zone");
            continue;
        }

        zones.push(Zone {
            id: id.to_string(),
            plan_id: plan_id.to_string(),
            name: raw.name.clone().unwrap_or_default(),
            capacity: parse_capacity(raw.capacity.as_deref()),
            price: parse_price(raw.price.as_deref()),
            numbered: is_true(&raw.numbered),
        });
    }

    zones
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, TransformError> {
    value
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(TransformError::MissingField(field))
}

fn required_date(
    value: &Option<String>,
    field: &'static str,
) -> Result<DateTime<Utc>, TransformError> {
    let raw = required(value, field)?;
    parse_feed_date(raw).ok_or_else(|| TransformError::InvalidDate {
        field,
        value: raw.to_string(),
    })
}

/// Feed dates are naive (`2021-06-30T21:00:00`) and taken as UTC; offsets are honoured when present.
pub fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whole units; decimals are truncated (`"12.5"` -> 12).
fn parse_capacity(value: Option<&str>) -> i64 {
    value
        .and_then(leading_number)
        .filter(|c| c.is_finite() && *c >= 0.0)
        .map(|c| c.trunc() as i64)
        .unwrap_or(0)
}

fn parse_price(value: Option<&str>) -> f64 {
    value
        .and_then(leading_number)
        .filter(|p| p.is_finite() && *p >= 0.0)
        .unwrap_or(0.0)
}

/// Longest decimal prefix of `value`, so `"20,00"` reads as 20 and `"15 EUR"` as 15.
fn leading_number(value: &str) -> Option<f64> {
    let s = value.trim();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut mantissa = int_end - end;
    end = int_end;

    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        mantissa += frac_end - (end + 1);
        end = frac_end;
    }
    if mantissa == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp_end = digits_from(end + 1 + sign);
        if exp_end > end + 1 + sign {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}

fn is_true(value: &Option<String>) -> bool {
    value.as_deref() == Some("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::provider::{fixtures::SAMPLE_FEED, parse_feed};
    use chrono::TimeZone;

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    fn raw_zone(id: &str, capacity: &str, price: &str) -> RawZone {
        RawZone {
            zone_id: s(id),
            name: s(&format!("Zone {}", id)),
            capacity: s(capacity),
            price: s(price),
            numbered: s("true"),
        }
    }

    fn raw_plan(id: &str, zones: Vec<RawZone>) -> RawPlan {
        RawPlan {
            plan_id: s(id),
            plan_start_date: s("2021-06-30T21:00:00"),
            plan_end_date: s("2021-06-30T22:00:00"),
            sell_from: s("2020-07-01T00:00:00"),
            sell_to: s("2021-06-30T20:00:00"),
            sold_out: s("false"),
            zones,
        }
    }

    fn base(id: &str, plans: Vec<RawPlan>) -> RawBasePlan {
        RawBasePlan {
            base_plan_id: s(id),
            sell_mode: s("online"),
            title: s("Camela en concierto"),
            organizer_company_id: None,
            plans,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn transforms_sample_feed() {
        let feed = parse_feed(SAMPLE_FEED).unwrap();
        let plans = transform_at(&feed, now());

        assert_eq!(plans.len(), 4);

        let camela = &plans[0];
        assert_eq!(camela.id, "291");
        assert_eq!(camela.base_plan_id, "291");
        assert_eq!(camela.sell_mode, SellMode::Online);
        assert_eq!(
            camela.start_date,
            Utc.with_ymd_and_hms(2021, 6, 30, 21, 0, 0).unwrap()
        );
        assert_eq!(camela.zones.len(), 3);
        assert_eq!(camela.zones[0].name, "Platea");
        assert_eq!(camela.zones[0].capacity, 243);
        assert_eq!(camela.zones[0].price, 20.0);
        assert!(camela.zones[0].numbered);
        assert!(!camela.zones[1].numbered);
        assert_eq!(camela.created_at, now());

        // plans inherit base-plan attributes
        assert_eq!(plans[1].title, "Pantomima Full");
        assert_eq!(plans[2].title, "Pantomima Full");
        assert_eq!(plans[2].organizer_company_id.as_deref(), Some("2"));
        assert!(plans[2].sold_out);

        assert_eq!(plans[3].sell_mode, SellMode::Offline);
    }

    #[test]
    fn non_numeric_capacity_becomes_zero_and_siblings_survive() {
        let feed = RawFeed {
            base_plans: vec![
                base(
                    "1",
                    vec![raw_plan(
                        "10",
                        vec![raw_zone("A", "lots", "20.00"), raw_zone("B", "5", "abc")],
                    )],
                ),
                base("2", vec![raw_plan("20", vec![raw_zone("C", "7", "9.5")])]),
            ],
        };

        let plans = transform_at(&feed, now());

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].zones[0].capacity, 0);
        assert_eq!(plans[0].zones[0].price, 20.0);
        assert_eq!(plans[0].zones[1].capacity, 5);
        assert_eq!(plans[0].zones[1].price, 0.0);
        assert_eq!(plans[1].zones[0].capacity, 7);
    }

    #[test]
    fn negative_numbers_fall_back_to_zero() {
        let feed = RawFeed {
            base_plans: vec![base(
                "1",
                vec![raw_plan("10", vec![raw_zone("A", "-3", "-1.5"), raw_zone("B", "1", "NaN")])],
            )],
        };

        let zones = &transform_at(&feed, now())[0].zones;
        assert_eq!(zones[0].capacity, 0);
        assert_eq!(zones[0].price, 0.0);
        assert_eq!(zones[1].price, 0.0);
    }

    #[test]
    fn decimal_capacities_truncate_and_prices_read_leading_digits() {
        let feed = RawFeed {
            base_plans: vec![base(
                "1",
                vec![raw_plan(
                    "10",
                    vec![
                        raw_zone("A", "10.0", "20,00"),
                        raw_zone("B", "12.5", "15 EUR"),
                        raw_zone("C", "1e3", ".5"),
                    ],
                )],
            )],
        };

        let zones = &transform_at(&feed, now())[0].zones;
        assert_eq!(zones[0].capacity, 10);
        assert_eq!(zones[0].price, 20.0);
        assert_eq!(zones[1].capacity, 12);
        assert_eq!(zones[1].price, 15.0);
        assert_eq!(zones[2].capacity, 1000);
        assert_eq!(zones[2].price, 0.5);
    }

    #[test]
    fn leading_number_needs_a_digit() {
        assert_eq!(leading_number("  42abc"), Some(42.0));
        assert_eq!(leading_number("-1.5"), Some(-1.5));
        assert_eq!(leading_number("7."), Some(7.0));
        assert_eq!(leading_number("3e"), Some(3.0));
        assert_eq!(leading_number("."), None);
        assert_eq!(leading_number("-"), None);
        assert_eq!(leading_number("NaN"), None);
        assert_eq!(leading_number(""), None);
    }

    #[test]
    fn booleans_match_literal_true_only() {
        for (value, expected) in [
            (Some("true"), true),
            (Some("True"), false),
            (Some("TRUE"), false),
            (Some("1"), false),
            (Some("false"), false),
            (None, false),
        ] {
            assert_eq!(is_true(&value.map(str::to_string)), expected, "{:?}", value);
        }
    }

    #[test]
    fn malformed_plans_are_skipped_individually() {
        let mut bad_date = raw_plan("11", vec![]);
        bad_date.plan_start_date = s("30/06/2021");

        let mut inverted = raw_plan("12", vec![]);
        inverted.plan_end_date = s("2021-06-30T20:00:00");

        let mut no_id = raw_plan("13", vec![]);
        no_id.plan_id = None;

        let feed = RawFeed {
            base_plans: vec![base(
                "1",
                vec![bad_date, inverted, no_id, raw_plan("14", vec![])],
            )],
        };

        let plans = transform_at(&feed, now());
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].id, "14");
        assert!(plans[0].zones.is_empty());
    }

    #[test]
    fn unknown_sell_mode_skips_whole_group() {
        let mut group = base("1", vec![raw_plan("10", vec![]), raw_plan("11", vec![])]);
        group.sell_mode = s("Online");

        let feed = RawFeed {
            base_plans: vec![group, base("2", vec![raw_plan("20", vec![])])],
        };

        let plans = transform_at(&feed, now());
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].id, "20");
    }

    #[test]
    fn base_plan_without_plans_is_skipped() {
        let feed = RawFeed {
            base_plans: vec![base("1", vec![]), base("2", vec![raw_plan("20", vec![])])],
        };

        let plans = transform_at(&feed, now());
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].base_plan_id, "2");
    }

    #[test]
    fn zones_without_id_or_repeated_are_dropped() {
        let mut anonymous = raw_zone("X", "1", "1.0");
        anonymous.zone_id = None;

        let feed = RawFeed {
            base_plans: vec![base(
                "1",
                vec![raw_plan(
                    "10",
                    vec![
                        raw_zone("A", "10", "20.0"),
                        anonymous,
                        raw_zone("A", "99", "99.0"),
                        raw_zone("B", "0", "15.5"),
                    ],
                )],
            )],
        };

        let zones = &transform_at(&feed, now())[0].zones;
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].id, "A");
        assert_eq!(zones[0].capacity, 10);
        assert_eq!(zones[1].id, "B");
        assert!(zones.iter().all(|z| z.plan_id == "10"));
    }

    #[test]
    fn feed_dates_accept_naive_and_offset_forms() {
        let expected = Utc.with_ymd_and_hms(2021, 6, 30, 21, 0, 0).unwrap();
        assert_eq!(parse_feed_date("2021-06-30T21:00:00"), Some(expected));
        assert_eq!(parse_feed_date("2021-06-30T21:00:00.000"), Some(expected));
        assert_eq!(parse_feed_date("2021-06-30T23:00:00+02:00"), Some(expected));
        assert_eq!(parse_feed_date("2021-06-30"), None);
    }
}
