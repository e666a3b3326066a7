// Persistence module
//
// Table-scoped access to the backing store used by the promotion engine and the
// auth service. Two adapters are provided:
// - InMemoryStore: process-local tables guarded by a single RwLock
// - PgStore: PostgreSQL through sqlx, with dynamic parameterised SQL
//
// Rows travel as JSON objects. Typed views are decoded by the caller with `decode`.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;

pub use error::{PersistenceError, StoreResult};
pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Tables reachable through the persistence contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Promotions,
    PromotionRules,
    PromotionActions,
    PromotionCategoryEligibility,
    PromotionCustomerEligibility,
    PromotionProductEligibility,
    PromotionUsageLimits,
    AppliedPromotions,
    Users,
}

impl Table {
    /// SQL table name
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Promotions => "promotions",
            Table::PromotionRules => "promotion_rules",
            Table::PromotionActions => "promotion_actions",
            Table::PromotionCategoryEligibility => "promotion_category_eligibility",
            Table::PromotionCustomerEligibility => "promotion_customer_eligibility",
            Table::PromotionProductEligibility => "promotion_product_eligibility",
            Table::PromotionUsageLimits => "promotion_usage_limits",
            Table::AppliedPromotions => "applied_promotions",
            Table::Users => "users",
        }
    }

    /// Child tables removed together with their promotion
    pub fn promotion_children() -> [Table; 5] {
        [
            Table::PromotionRules,
            Table::PromotionActions,
            Table::PromotionCategoryEligibility,
            Table::PromotionCustomerEligibility,
            Table::PromotionProductEligibility,
        ]
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison applied by a filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    In(Vec<Value>),
    IsNull,
}

/// Column filter for `list`
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn eq(column: &str, value: impl Serialize) -> Self {
        Self::new(column, FilterOp::Eq(to_value(value)))
    }

    pub fn is_in<T: Serialize>(column: &str, values: &[T]) -> Self {
        Self::new(column, FilterOp::In(values.iter().map(to_value).collect()))
    }

    pub fn is_null(column: &str) -> Self {
        Self::new(column, FilterOp::IsNull)
    }

    fn new(column: &str, op: FilterOp) -> Self {
        Self {
            column: column.to_string(),
            op,
        }
    }
}

/// Sort key for `list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// Everything needed to record one promotion application in a single unit of work
#[derive(Debug, Clone)]
pub struct UsageReservation {
    pub promotion_id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub discount_amount: Decimal,
    pub applied_by: Option<Uuid>,
    pub usage_limit: Option<i32>,
    pub usage_limit_per_customer: Option<i32>,
}

impl UsageReservation {
    /// True when a configured cap of zero makes any application impossible
    pub fn is_blocked_by_zero_limit(&self) -> bool {
        matches!(self.usage_limit, Some(limit) if limit <= 0)
            || matches!(self.usage_limit_per_customer, Some(limit) if limit <= 0)
    }
}

/// Result of `commit_application`
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Counters incremented and ledger row inserted; carries the ledger row
    Committed(Value),
    /// A usage cap blocked the application; nothing was written
    LimitReached,
}

/// Generic table-scoped persistence contract
///
/// `commit_application` is the one operation that spans tables: it increments the
/// usage counters conditionally and inserts the ledger row, all or nothing.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    async fn get(&self, table: Table, id: Uuid) -> StoreResult<Option<Value>>;

    async fn list(
        &self,
        table: Table,
        filters: &[Filter],
        ordering: &[OrderBy],
    ) -> StoreResult<Vec<Value>>;

    async fn insert(&self, table: Table, row: Value) -> StoreResult<Value>;

    async fn update(&self, table: Table, id: Uuid, patch: Value) -> StoreResult<Value>;

    async fn delete(&self, table: Table, id: Uuid) -> StoreResult<bool>;

    async fn commit_application(&self, reservation: &UsageReservation) -> StoreResult<CommitOutcome>;
}

/// Decode a stored row into its typed view
pub fn decode<T: DeserializeOwned>(row: Value) -> StoreResult<T> {
    Ok(serde_json::from_value(row)?)
}

/// Decode many rows, failing on the first malformed one
pub fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> StoreResult<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
