// PostgreSQL persistence adapter
//
// Rows are exchanged as JSONB: reads select `to_jsonb(t)`, writes go through
// `jsonb_populate_record` so every value is coerced to its column type by the
// database. `commit_application` runs in one transaction using conditional upserts
// on the usage counters.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::persistence::query::{validate_column, SqlQueryBuilder};
use crate::persistence::{
    CommitOutcome, Filter, OrderBy, PersistenceError, PersistenceService, StoreResult, Table,
    UsageReservation,
};

/// sqlx-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool, used for migrations
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceService for PgStore {
    async fn get(&self, table: Table, id: Uuid) -> StoreResult<Option<Value>> {
        let sql = format!("SELECT to_jsonb(t) FROM {} AS t WHERE t.id = $1", table);
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list(
        &self,
        table: Table,
        filters: &[Filter],
        ordering: &[OrderBy],
    ) -> StoreResult<Vec<Value>> {
        let mut builder = SqlQueryBuilder::new(table);
        for filter in filters {
            builder.add_filter(filter)?;
        }
        for order in ordering {
            builder.add_ordering(order)?;
        }
        let (sql, params) = builder.build();

        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for param in params {
            query = query.bind(param);
        }

        let rows = query.fetch_all(&self.pool).await?;
        tracing::debug!("Listed {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> StoreResult<Value> {
        let mut row = into_object(row)?;
        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let columns = column_list(&row)?;
        // Only supplied columns are written so column defaults still apply
        let sql = format!(
            "INSERT INTO {table} AS t ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1) RETURNING to_jsonb(t)",
            table = table,
            cols = columns,
        );

        let inserted = sqlx::query_scalar::<_, Value>(&sql)
            .bind(Value::Object(row))
            .fetch_one(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn update(&self, table: Table, id: Uuid, patch: Value) -> StoreResult<Value> {
        let mut patch = into_object(patch)?;
        patch.remove("id");
        if patch.is_empty() {
            return self
                .get(table, id)
                .await?
                .ok_or(PersistenceError::NotFound { table, id });
        }

        let columns = column_list(&patch)?;
        let sql = format!(
            "UPDATE {table} AS t SET ({cols}) = (SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $2)) WHERE t.id = $1 RETURNING to_jsonb(t)",
            table = table,
            cols = columns,
        );

        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .bind(Value::Object(patch))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PersistenceError::NotFound { table, id })
    }

    async fn delete(&self, table: Table, id: Uuid) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit_application(&self, reservation: &UsageReservation) -> StoreResult<CommitOutcome> {
        if reservation.is_blocked_by_zero_limit() {
            return Ok(CommitOutcome::LimitReached);
        }

        // The transaction rolls back when dropped without commit
        let mut tx = self.pool.begin().await?;

        let global: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO promotion_usage_limits (id, promotion_id, customer_id, usage_count, last_used_at, created_at)
            VALUES ($1, $2, NULL, 1, NOW(), NOW())
            ON CONFLICT (promotion_id) WHERE customer_id IS NULL
            DO UPDATE SET usage_count = promotion_usage_limits.usage_count + 1,
                          last_used_at = NOW()
            WHERE $3::INT IS NULL OR promotion_usage_limits.usage_count < $3::INT
            RETURNING usage_count
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reservation.promotion_id)
        .bind(reservation.usage_limit)
        .fetch_optional(&mut *tx)
        .await?;

        if global.is_none() {
            tracing::debug!(
                "Global usage limit reached for promotion {}",
                reservation.promotion_id
            );
            return Ok(CommitOutcome::LimitReached);
        }

        let per_customer: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO promotion_usage_limits (id, promotion_id, customer_id, usage_count, last_used_at, created_at)
            VALUES ($1, $2, $3, 1, NOW(), NOW())
            ON CONFLICT (promotion_id, customer_id) WHERE customer_id IS NOT NULL
            DO UPDATE SET usage_count = promotion_usage_limits.usage_count + 1,
                          last_used_at = NOW()
            WHERE $4::INT IS NULL OR promotion_usage_limits.usage_count < $4::INT
            RETURNING usage_count
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reservation.promotion_id)
        .bind(reservation.customer_id)
        .bind(reservation.usage_limit_per_customer)
        .fetch_optional(&mut *tx)
        .await?;

        if per_customer.is_none() {
            tracing::debug!(
                "Per-customer usage limit reached for promotion {} and customer {}",
                reservation.promotion_id,
                reservation.customer_id
            );
            return Ok(CommitOutcome::LimitReached);
        }

        let applied = sqlx::query_scalar::<_, Value>(
            r#"
            INSERT INTO applied_promotions AS t (id, promotion_id, order_id, customer_id, discount_amount, applied_at, applied_by)
            VALUES ($1, $2, $3, $4, $5, NOW(), $6)
            RETURNING to_jsonb(t)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reservation.promotion_id)
        .bind(reservation.order_id)
        .bind(reservation.customer_id)
        .bind(reservation.discount_amount)
        .bind(reservation.applied_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            "Committed application of promotion {} to order {}",
            reservation.promotion_id,
            reservation.order_id
        );
        Ok(CommitOutcome::Committed(applied))
    }
}

fn into_object(value: Value) -> StoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PersistenceError::InvalidRow(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn column_list(row: &Map<String, Value>) -> StoreResult<String> {
    let mut columns = Vec::with_capacity(row.len());
    for key in row.keys() {
        validate_column(key)?;
        columns.push(key.as_str());
    }
    Ok(columns.join(", "))
}
