use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::db::{Plan, PlanRepository, Stats};
use crate::error::{AppError, AppResult};
use crate::services::cache::{search_key, CachedValue, TtlCache, STATS_KEY};

/// Read path: cache first, storage on miss, then populate.
#[derive(Clone)]
pub struct SearchService {
    db: SqlitePool,
    cache: TtlCache<CachedValue>,
    search_ttl: Duration,
    stats_ttl: Duration,
}

impl SearchService {
    pub fn new(
        db: SqlitePool,
        cache: TtlCache<CachedValue>,
        search_ttl: Duration,
        stats_ttl: Duration,
    ) -> Self {
        Self {
            db,
            cache,
            search_ttl,
            stats_ttl,
        }
    }

    /// Online plans overlapping `[start, end)`. Callers validate the range first.
    pub async fn search(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> AppResult<Arc<Vec<Plan>>> {
        let key = search_key(start, end);

        if let Some(CachedValue::Plans(plans)) = self.cache.get(&key).await {
            tracing::debug!(key = %key, "Search cache hit");
            return Ok(plans);
        }

        tracing::debug!(key = %key, "Search cache miss");
        let generation = self.cache.generation();
        let plans = Arc::new(PlanRepository::search_plans(&self.db, start, end).await?);
        let stored = self
            .cache
            .set_if_generation(
                key,
                CachedValue::Plans(plans.clone()),
                self.search_ttl,
                generation,
            )
            .await;
        if !stored {
            tracing::debug!("Cache invalidated during search, result not cached");
        }

        Ok(plans)
    }

    pub async fn stats(&self) -> AppResult<Stats> {
        if let Some(CachedValue::Stats(stats)) = self.cache.get(STATS_KEY).await {
            return Ok(stats);
        }

        let generation = self.cache.generation();
        let stats = PlanRepository::get_stats(&self.db).await?;
        self.cache
            .set_if_generation(
                STATS_KEY,
                CachedValue::Stats(stats.clone()),
                self.stats_ttl,
                generation,
            )
            .await;

        Ok(stats)
    }

    pub fn validate_range(start: &DateTime<Utc>, end: &DateTime<Utc>) -> AppResult<()> {
        Self::validate_range_at(start, end, Utc::now())
    }

    /// Rejects inverted windows, starts after midnight opening Dec 31 of the
    /// year ten years from `now`, and ends before 2000-01-01.
    pub fn validate_range_at(
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        if start >= end {
            return Err(AppError::Validation(
                "Start date must be before end date".to_string(),
            ));
        }

        let latest_start = Utc
            .with_ymd_and_hms(now.year() + 10, 12, 31, 0, 0, 0)
            .single();
        if latest_start.is_some_and(|limit| *start > limit) {
            return Err(AppError::Validation(
                "Start date too far in the future".to_string(),
            ));
        }

        let earliest_end = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
        if earliest_end.is_some_and(|limit| *end < limit) {
            return Err(AppError::Validation(
                "End date too far in the past".to_string(),
            ));
        }

        Ok(())
    }
}
