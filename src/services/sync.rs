use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::db::PlanRepository;
use crate::error::AppResult;
use crate::services::cache::{CachedValue, TtlCache};
use crate::services::provider::PlanFeed;
use crate::services::transformer;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub plans_processed: usize,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Proof that the holder owns the single sync slot. Releases it on drop,
/// whichever way the run ends.
#[derive(Debug)]
pub struct SyncPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Drives fetch -> transform -> upsert -> invalidate. At most one run at a time.
pub struct SyncOrchestrator {
    feed: Arc<dyn PlanFeed>,
    db: SqlitePool,
    cache: TtlCache<CachedValue>,
    syncing: Arc<AtomicBool>,
    last_report: RwLock<Option<SyncReport>>,
}

impl SyncOrchestrator {
    pub fn new(feed: Arc<dyn PlanFeed>, db: SqlitePool, cache: TtlCache<CachedValue>) -> Self {
        Self {
            feed,
            db,
            cache,
            syncing: Arc::new(AtomicBool::new(false)),
            last_report: RwLock::new(None),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().await.clone()
    }

    /// Claim the sync slot. `None` while another run holds it.
    pub fn try_begin(&self) -> Option<SyncPermit> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncPermit {
                flag: self.syncing.clone(),
            })
    }

    /// Guarded entry point shared by the scheduler and manual triggers.
    /// Returns `Ok(None)` without doing anything if a sync is already running.
    pub async fn sync_now(&self) -> AppResult<Option<SyncReport>> {
        match self.try_begin() {
            Some(permit) => self.run(permit).await.map(Some),
            None => {
                tracing::warn!("Sync already in progress, skipping");
                Ok(None)
            }
        }
    }

    /// Execute one pipeline run. The permit is held until the run finishes.
    pub async fn run(&self, permit: SyncPermit) -> AppResult<SyncReport> {
        let _permit = permit;
        let started = Instant::now();
        tracing::info!("Starting plan sync");

        let result = self.pipeline().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(plans_processed) => {
                let report = SyncReport {
                    plans_processed,
                    duration_ms,
                    finished_at: Utc::now(),
                };
                tracing::info!(
                    plans = plans_processed,
                    duration_ms,
                    "Sync completed successfully"
                );
                *self.last_report.write().await = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                tracing::error!(duration_ms, "Sync failed: {}", e);
                Err(e)
            }
        }
    }

    async fn pipeline(&self) -> AppResult<usize> {
        let feed = self.feed.fetch().await?;

        let plans = transformer::transform(&feed);
        if plans.is_empty() {
            tracing::warn!("Provider feed produced no plans");
        }

        PlanRepository::upsert_plans(&self.db, &plans).await?;
        self.cache.invalidate_all().await;

        Ok(plans.len())
    }
}
