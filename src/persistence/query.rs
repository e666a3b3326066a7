use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::persistence::{Filter, FilterOp, OrderBy, PersistenceError, StoreResult, Table};

/// Validates a column name before it is spliced into SQL
///
/// Only lowercase snake_case identifiers are accepted. Values are always bound as
/// parameters; identifiers cannot be, so they go through this check instead.
pub fn validate_column(name: &str) -> StoreResult<()> {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    let valid = IDENT
        .get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").ok())
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidColumn(name.to_string()))
    }
}

/// SQL query builder for table-scoped reads
///
/// Builds a single parameterised SELECT that returns each row as JSONB.
/// Filter values are bound as JSONB and coerced to the column's own type through
/// `jsonb_populate_record`, so comparisons happen on native column types.
pub struct SqlQueryBuilder {
    table: Table,
    where_clauses: Vec<String>,
    params: Vec<Value>,
    order_clauses: Vec<String>,
}

impl SqlQueryBuilder {
    /// Creates a builder selecting every row of `table`
    pub fn new(table: Table) -> Self {
        Self {
            table,
            where_clauses: Vec::new(),
            params: Vec::new(),
            order_clauses: Vec::new(),
        }
    }

    /// Adds one filter; all filters are combined with AND
    pub fn add_filter(&mut self, filter: &Filter) -> StoreResult<()> {
        validate_column(&filter.column)?;
        let column = &filter.column;

        let clause = match &filter.op {
            FilterOp::Eq(value) => format!("t.{} = {}", column, self.typed_param(column, value)),
            FilterOp::IsNull => format!("t.{} IS NULL", column),
            FilterOp::In(values) => {
                let param_index = self.push_param(Value::Array(values.clone()));
                format!(
                    "t.{col} = ANY(ARRAY(SELECT (jsonb_populate_record(NULL::{table}, jsonb_build_object('{col}', v))).{col} FROM jsonb_array_elements(${idx}::jsonb) AS v))",
                    col = column,
                    table = self.table,
                    idx = param_index,
                )
            }
        };

        self.where_clauses.push(clause);
        Ok(())
    }

    /// Appends a sort key
    pub fn add_ordering(&mut self, order: &OrderBy) -> StoreResult<()> {
        validate_column(&order.column)?;
        let direction = if order.ascending { "ASC" } else { "DESC" };
        self.order_clauses
            .push(format!("t.{} {} NULLS LAST", order.column, direction));
        Ok(())
    }

    /// Builds the final SQL string and its ordered parameters
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut query = format!("SELECT to_jsonb(t) FROM {} AS t", self.table);

        if !self.where_clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&self.where_clauses.join(" AND "));
        }

        if !self.order_clauses.is_empty() {
            query.push_str(" ORDER BY ");
            query.push_str(&self.order_clauses.join(", "));
        }

        (query, self.params.clone())
    }

    fn typed_param(&mut self, column: &str, value: &Value) -> String {
        let param_index = self.push_param(value.clone());
        format!(
            "(jsonb_populate_record(NULL::{table}, jsonb_build_object('{col}', ${idx}::jsonb))).{col}",
            table = self.table,
            col = column,
            idx = param_index,
        )
    }

    fn push_param(&mut self, value: Value) -> usize {
        self.params.push(value);
        self.params.len()
    }
}
