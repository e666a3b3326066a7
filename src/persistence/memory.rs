// In-memory persistence adapter
//
// Keeps every table as a vector of JSON objects behind one tokio RwLock.
// `commit_application` runs entirely under the write lock, which makes the
// check-then-increment and the ledger insert a single atomic step.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::persistence::{
    CommitOutcome, Filter, FilterOp, OrderBy, PersistenceError, PersistenceService, StoreResult,
    Table, UsageReservation,
};

/// Process-local store, cheap to clone (tables are shared)
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<Table, Vec<Map<String, Value>>>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held in `table`
    pub async fn count(&self, table: Table) -> usize {
        let tables = self.tables.read().await;
        tables.get(&table).map(|rows| rows.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PersistenceService for InMemoryStore {
    async fn get(&self, table: Table, id: Uuid) -> StoreResult<Option<Value>> {
        let tables = self.tables.read().await;
        let row = tables
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| has_id(row, id)))
            .cloned()
            .map(Value::Object);
        Ok(row)
    }

    async fn list(
        &self,
        table: Table,
        filters: &[Filter],
        ordering: &[OrderBy],
    ) -> StoreResult<Vec<Value>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&Map<String, Value>> = tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|filter| matches_filter(row, filter)))
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            for order in ordering {
                let ordering = compare_for_sort(a.get(&order.column), b.get(&order.column));
                let ordering = if order.ascending { ordering } else { ordering.reverse() };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(rows.into_iter().cloned().map(Value::Object).collect())
    }

    async fn insert(&self, table: Table, row: Value) -> StoreResult<Value> {
        let mut row = into_object(row)?;
        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let mut tables = self.tables.write().await;
        let rows = tables.entry(table).or_default();
        if let Some(id) = row.get("id") {
            if rows.iter().any(|existing| existing.get("id") == Some(id)) {
                return Err(PersistenceError::Conflict(format!(
                    "duplicate id {} in {}",
                    id, table
                )));
            }
        }
        rows.push(row.clone());
        Ok(Value::Object(row))
    }

    async fn update(&self, table: Table, id: Uuid, patch: Value) -> StoreResult<Value> {
        let patch = into_object(patch)?;
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|row| has_id(row, id)))
            .ok_or(PersistenceError::NotFound { table, id })?;

        for (key, value) in patch {
            if key != "id" {
                row.insert(key, value);
            }
        }
        Ok(Value::Object(row.clone()))
    }

    async fn delete(&self, table: Table, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| !has_id(row, id));
        Ok(rows.len() != before)
    }

    async fn commit_application(&self, reservation: &UsageReservation) -> StoreResult<CommitOutcome> {
        if reservation.is_blocked_by_zero_limit() {
            return Ok(CommitOutcome::LimitReached);
        }

        let mut tables = self.tables.write().await;
        let promotion_id = Value::String(reservation.promotion_id.to_string());
        let customer_id = Value::String(reservation.customer_id.to_string());
        let order_id = Value::String(reservation.order_id.to_string());

        let already_applied = tables
            .get(&Table::AppliedPromotions)
            .map(|rows| {
                rows.iter().any(|row| {
                    row.get("promotion_id") == Some(&promotion_id)
                        && row.get("order_id") == Some(&order_id)
                })
            })
            .unwrap_or(false);
        if already_applied {
            return Err(PersistenceError::Conflict(format!(
                "promotion {} already applied to order {}",
                reservation.promotion_id, reservation.order_id
            )));
        }

        let usage_rows = tables.entry(Table::PromotionUsageLimits).or_default();
        let global_index = usage_rows.iter().position(|row| {
            row.get("promotion_id") == Some(&promotion_id)
                && row.get("customer_id").map_or(true, Value::is_null)
        });
        let customer_index = usage_rows.iter().position(|row| {
            row.get("promotion_id") == Some(&promotion_id)
                && row.get("customer_id") == Some(&customer_id)
        });

        let global_count = global_index.map(|i| usage_count(&usage_rows[i])).unwrap_or(0);
        let customer_count = customer_index.map(|i| usage_count(&usage_rows[i])).unwrap_or(0);

        if let Some(limit) = reservation.usage_limit {
            if global_count >= i64::from(limit) {
                return Ok(CommitOutcome::LimitReached);
            }
        }
        if let Some(limit) = reservation.usage_limit_per_customer {
            if customer_count >= i64::from(limit) {
                return Ok(CommitOutcome::LimitReached);
            }
        }

        // Both caps passed; nothing below can fail, so the commit is all-or-nothing.
        let now = Value::String(Utc::now().to_rfc3339());
        bump_counter(usage_rows, global_index, &promotion_id, Value::Null, &now);
        bump_counter(usage_rows, customer_index, &promotion_id, customer_id.clone(), &now);

        let mut applied = Map::new();
        applied.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        applied.insert("promotion_id".into(), promotion_id);
        applied.insert("order_id".into(), order_id);
        applied.insert("customer_id".into(), customer_id);
        applied.insert(
            "discount_amount".into(),
            Value::String(reservation.discount_amount.to_string()),
        );
        applied.insert("applied_at".into(), now);
        applied.insert(
            "applied_by".into(),
            reservation
                .applied_by
                .map(|id| Value::String(id.to_string()))
                .unwrap_or(Value::Null),
        );

        tables
            .entry(Table::AppliedPromotions)
            .or_default()
            .push(applied.clone());

        Ok(CommitOutcome::Committed(Value::Object(applied)))
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

fn has_id(row: &Map<String, Value>, id: Uuid) -> bool {
    row.get("id").and_then(Value::as_str) == Some(id.to_string().as_str())
}

fn usage_count(row: &Map<String, Value>) -> i64 {
    row.get("usage_count").and_then(Value::as_i64).unwrap_or(0)
}

fn bump_counter(
    rows: &mut Vec<Map<String, Value>>,
    index: Option<usize>,
    promotion_id: &Value,
    customer_id: Value,
    now: &Value,
) {
    match index.and_then(|i| rows.get_mut(i)) {
        Some(row) => {
            let next = usage_count(row) + 1;
            row.insert("usage_count".into(), Value::from(next));
            row.insert("last_used_at".into(), now.clone());
        }
        None => {
            let mut row = Map::new();
            row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
            row.insert("promotion_id".into(), promotion_id.clone());
            row.insert("customer_id".into(), customer_id);
            row.insert("usage_count".into(), Value::from(1));
            row.insert("last_used_at".into(), now.clone());
            row.insert("created_at".into(), now.clone());
            rows.push(row);
        }
    }
}

fn matches_filter(row: &Map<String, Value>, filter: &Filter) -> bool {
    let actual = row.get(&filter.column).unwrap_or(&Value::Null);
    match &filter.op {
        FilterOp::Eq(expected) => loose_eq(actual, expected),
        FilterOp::In(values) => values.iter().any(|v| loose_eq(actual, v)),
        FilterOp::IsNull => actual.is_null(),
    }
}

/// Equality tolerant of numbers stored as strings (decimals serialize as strings)
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

// Nulls sort last, matching the SQL adapter's NULLS LAST.
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare_values(x, y),
    }
}
