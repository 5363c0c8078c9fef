use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::models::{parse_db_timestamp, to_db_timestamp, Plan, SellMode, Stats, Zone};
use crate::error::{AppError, AppResult};

// ============================================================================
// Plan Repository
// ============================================================================

/// Storage for plans and their zones (`plans` / `zones` tables).
///
/// Implementation notes:
/// - Upserts run in a single transaction for the whole batch, so a failed
///   sync never leaves a partially applied feed behind.
/// - Zones are never merged: each upsert deletes a plan's zones and
///   reinserts the incoming set.
/// - Plans missing from a newer feed are left untouched (no tombstones).
pub struct PlanRepository;

impl PlanRepository {
    /// Insert or replace every plan in `plans`, all-or-nothing.
    ///
    /// `created_at` is written only on first insert; `updated_at` is refreshed
    /// on every call. Any row failure rolls back the entire batch.
    pub async fn upsert_plans(pool: &SqlitePool, plans: &[Plan]) -> AppResult<()> {
        if plans.is_empty() {
            return Ok(());
        }

        let now = to_db_timestamp(&Utc::now());
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        for plan in plans {
            sqlx::query(
                r#"
                INSERT INTO plans (
                    id, title, base_plan_id, organizer_company_id,
                    start_date, end_date, sell_from, sell_to,
                    sold_out, sell_mode,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    base_plan_id = excluded.base_plan_id,
                    organizer_company_id = excluded.organizer_company_id,
                    start_date = excluded.start_date,
                    end_date = excluded.end_date,
                    sell_from = excluded.sell_from,
                    sell_to = excluded.sell_to,
                    sold_out = excluded.sold_out,
                    sell_mode = excluded.sell_mode,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&plan.id)
            .bind(&plan.title)
            .bind(&plan.base_plan_id)
            .bind(&plan.organizer_company_id)
            .bind(to_db_timestamp(&plan.start_date))
            .bind(to_db_timestamp(&plan.end_date))
            .bind(to_db_timestamp(&plan.sell_from))
            .bind(to_db_timestamp(&plan.sell_to))
            .bind(plan.sold_out)
            .bind(plan.sell_mode.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

            sqlx::query("DELETE FROM zones WHERE plan_id = ?")
                .bind(&plan.id)
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;

            for zone in &plan.zones {
                // Zones always belong to the plan they were attached to.
                sqlx::query(
                    r#"
                    INSERT INTO zones (id, plan_id, name, capacity, price, numbered)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&zone.id)
                .bind(&plan.id)
                .bind(&zone.name)
                .bind(zone.capacity)
                .bind(zone.price)
                .bind(zone.numbered)
                .execute(&mut *tx)
                .await
                .map_err(AppError::Database)?;
            }
        }

        tx.commit().await.map_err(AppError::Database)?;
        tracing::info!("Upserted {} plans", plans.len());

        Ok(())
    }

    /// Online plans whose window intersects the query range.
    ///
    /// A plan matches when its start lies in `[start, end)`, its end lies in
    /// `(start, end]`, or it spans the whole range. Results are ordered by
    /// start date then title; zones are loaded eagerly, ordered by name.
    pub async fn search_plans(
        pool: &SqlitePool,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> AppResult<Vec<Plan>> {
        let start = to_db_timestamp(start);
        let end = to_db_timestamp(end);

        let rows = sqlx::query(
            r#"
            SELECT
                p.id, p.title, p.base_plan_id, p.organizer_company_id,
                p.start_date, p.end_date, p.sell_from, p.sell_to,
                p.sold_out, p.sell_mode,
                p.created_at, p.updated_at,
                z.id AS zone_id,
                z.name AS zone_name,
                z.capacity AS zone_capacity,
                z.price AS zone_price,
                z.numbered AS zone_numbered
            FROM plans p
            LEFT JOIN zones z ON z.plan_id = p.id
            WHERE p.sell_mode = 'online'
              AND (
                (p.start_date >= ? AND p.start_date < ?)
                OR (p.end_date > ? AND p.end_date <= ?)
                OR (p.start_date <= ? AND p.end_date >= ?)
              )
            ORDER BY p.start_date, p.title, p.id, z.name, z.id
            "#,
        )
        .bind(&start)
        .bind(&end)
        .bind(&start)
        .bind(&end)
        .bind(&start)
        .bind(&end)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        let mut plans: Vec<Plan> = Vec::new();
        for row in &rows {
            let id: String = row.try_get("id").map_err(AppError::Database)?;

            // Rows for one plan are contiguous thanks to the ORDER BY.
            let starts_new_plan = plans.last().map_or(true, |p| p.id != id);
            if starts_new_plan {
                plans.push(plan_from_row(row)?);
            }

            if let Some(zone) = zone_from_row(row, &id)? {
                if let Some(plan) = plans.last_mut() {
                    plan.zones.push(zone);
                }
            }
        }

        Ok(plans)
    }

    /// Aggregate counts in a single statement.
    pub async fn get_stats(pool: &SqlitePool) -> AppResult<Stats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_plans,
                COALESCE(SUM(CASE WHEN sell_mode = 'online' THEN 1 ELSE 0 END), 0) AS online_plans,
                COALESCE(SUM(CASE WHEN sell_mode = 'offline' THEN 1 ELSE 0 END), 0) AS offline_plans,
                (SELECT COUNT(*) FROM zones) AS total_zones,
                MAX(updated_at) AS last_sync
            FROM plans
            "#,
        )
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        let last_sync: Option<String> = row.try_get("last_sync").map_err(AppError::Database)?;

        Ok(Stats {
            total_plans: row.try_get("total_plans").map_err(AppError::Database)?,
            online_plans: row.try_get("online_plans").map_err(AppError::Database)?,
            offline_plans: row.try_get("offline_plans").map_err(AppError::Database)?,
            total_zones: row.try_get("total_zones").map_err(AppError::Database)?,
            last_sync: last_sync.as_deref().and_then(parse_db_timestamp),
        })
    }

    /// Remove a plan; its zones go with it through the cascading foreign key.
    /// Sync never removes plans, so only tests exercise the cascade.
    #[cfg(test)]
    pub async fn delete_plan(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM plans WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Cheap connectivity probe used by the health endpoint.
    pub async fn ping(pool: &SqlitePool) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }
}

fn timestamp_column(row: &SqliteRow, column: &str) -> AppResult<DateTime<Utc>> {
    let raw: String = row.try_get(column).map_err(AppError::Database)?;
    parse_db_timestamp(&raw).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "Invalid timestamp in column {}: {}",
            column,
            raw
        ))
    })
}

fn plan_from_row(row: &SqliteRow) -> AppResult<Plan> {
    let sell_mode: String = row.try_get("sell_mode").map_err(AppError::Database)?;
    let sell_mode = SellMode::try_from(sell_mode).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    Ok(Plan {
        id: row.try_get("id").map_err(AppError::Database)?,
        title: row.try_get("title").map_err(AppError::Database)?,
        base_plan_id: row.try_get("base_plan_id").map_err(AppError::Database)?,
        organizer_company_id: row
            .try_get("organizer_company_id")
            .map_err(AppError::Database)?,
        start_date: timestamp_column(row, "start_date")?,
        end_date: timestamp_column(row, "end_date")?,
        sell_from: timestamp_column(row, "sell_from")?,
        sell_to: timestamp_column(row, "sell_to")?,
        sold_out: row.try_get("sold_out").map_err(AppError::Database)?,
        sell_mode,
        zones: Vec::new(),
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

/// The zone half of a joined row, or `None` for a plan without zones.
fn zone_from_row(row: &SqliteRow, plan_id: &str) -> AppResult<Option<Zone>> {
    let zone_id: Option<String> = row.try_get("zone_id").map_err(AppError::Database)?;
    let Some(zone_id) = zone_id else {
        return Ok(None);
    };

    Ok(Some(Zone {
        id: zone_id,
        plan_id: plan_id.to_string(),
        name: row.try_get("zone_name").map_err(AppError::Database)?,
        capacity: row.try_get("zone_capacity").map_err(AppError::Database)?,
        price: row.try_get("zone_price").map_err(AppError::Database)?,
        numbered: row.try_get("zone_numbered").map_err(AppError::Database)?,
    }))
}
