// Order context
//
// The typed snapshot a promotion is evaluated against, and the field lookup used
// by the rule engine. Field names are resolved once into a `Field` variant; values
// are then read straight off the struct, no reflection involved.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::promotions::error::{PromoResult, PromotionError};
use crate::promotions::types::{CustomerGroup, RuleType};

/// Customer placing the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomerContext {
    pub id: Uuid,
    #[serde(default)]
    pub groups: Vec<CustomerGroup>,
    /// Previous completed orders; when known, implies the `new` / `returning` group
    #[serde(default)]
    pub order_count: Option<u32>,
}

impl CustomerContext {
    /// Declared groups plus the group implied by `order_count`
    pub fn effective_groups(&self) -> Vec<CustomerGroup> {
        let mut groups = self.groups.clone();
        let implied = match self.order_count {
            Some(0) => Some(CustomerGroup::New),
            Some(_) => Some(CustomerGroup::Returning),
            None => None,
        };
        if let Some(group) = implied {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups
    }
}

/// One order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LineItem {
    pub product_id: Uuid,
    #[schema(example = "tools")]
    pub category: String,
    pub quantity: u32,
    #[schema(value_type = String, example = "24.99")]
    pub unit_price: Decimal,
}

impl LineItem {
    /// Saturates at `Decimal::MAX`; `OrderContext::validate` rejects such orders
    pub fn subtotal(&self) -> Decimal {
        self.unit_price.saturating_mul(Decimal::from(self.quantity))
    }

    pub fn checked_subtotal(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Everything the engine needs to know about an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderContext {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub customer: CustomerContext,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    #[schema(value_type = String, example = "5.00")]
    pub shipping_cost: Decimal,
    /// Evaluation instant; defaults to the time the request was decoded
    #[serde(default = "Utc::now")]
    pub now: DateTime<Utc>,
}

impl OrderContext {
    /// Reject orders whose amounts cannot be represented
    ///
    /// Every monetary sum the engine takes is bounded by the order total, so an
    /// order that passes here cannot overflow during evaluation.
    pub fn validate(&self) -> PromoResult<()> {
        let mut total = Decimal::ZERO;
        for (i, item) in self.items.iter().enumerate() {
            if item.unit_price.is_sign_negative() {
                return Err(PromotionError::Validation(format!(
                    "line {} has a negative unit price",
                    i
                )));
            }
            total = item
                .checked_subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or_else(|| {
                    PromotionError::Validation(format!("order total overflows at line {}", i))
                })?;
        }
        if self.shipping_cost.is_sign_negative() {
            return Err(PromotionError::Validation(
                "shipping cost cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Sum of line subtotals, shipping excluded
    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .fold(Decimal::ZERO, |acc, item| acc.saturating_add(item.subtotal()))
    }

    /// Sum of line subtotals for the given line indices
    pub fn subtotal_of(&self, lines: &[usize]) -> Decimal {
        lines
            .iter()
            .filter_map(|&i| self.items.get(i))
            .fold(Decimal::ZERO, |acc, item| acc.saturating_add(item.subtotal()))
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Read a field's value(s) from this order
    pub fn resolve(&self, field: Field) -> Resolved {
        match field {
            Field::OrderTotal => Resolved::One(FieldValue::Number(self.total())),
            Field::OrderQuantity => {
                Resolved::One(FieldValue::Number(Decimal::from(self.total_quantity())))
            }
            Field::OrderItemCount => {
                Resolved::One(FieldValue::Number(Decimal::from(self.items.len() as u64)))
            }
            Field::ShippingCost => Resolved::One(FieldValue::Number(self.shipping_cost)),
            Field::CustomerId => Resolved::One(FieldValue::Text(self.customer.id.to_string())),
            Field::CustomerGroup => Resolved::Many(
                self.customer
                    .effective_groups()
                    .into_iter()
                    .map(|group| FieldValue::Text(group.to_string()))
                    .collect(),
            ),
            Field::CustomerOrderCount => match self.customer.order_count {
                Some(count) => Resolved::One(FieldValue::Number(Decimal::from(count))),
                None => Resolved::Missing,
            },
            Field::ProductId => Resolved::Many(
                self.items
                    .iter()
                    .map(|item| FieldValue::Text(item.product_id.to_string()))
                    .collect(),
            ),
            Field::ProductCategory => Resolved::Many(
                self.items
                    .iter()
                    .map(|item| FieldValue::Text(item.category.clone()))
                    .collect(),
            ),
            Field::ProductPrice => Resolved::Many(
                self.items
                    .iter()
                    .map(|item| FieldValue::Number(item.unit_price))
                    .collect(),
            ),
            Field::ProductQuantity => Resolved::Many(
                self.items
                    .iter()
                    .map(|item| FieldValue::Number(Decimal::from(item.quantity)))
                    .collect(),
            ),
            Field::Now => Resolved::One(FieldValue::Date(self.now)),
            Field::Hour => Resolved::One(FieldValue::Number(Decimal::from(self.now.hour()))),
            Field::DayOfWeek => Resolved::One(FieldValue::Number(Decimal::from(
                self.now.weekday().number_from_monday(),
            ))),
        }
    }
}

/// Semantic type a field's values share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Text,
    Date,
}

/// A single resolved value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(Decimal),
    Text(String),
    Date(DateTime<Utc>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Date(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

/// Result of looking a field up on an order
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    One(FieldValue),
    /// One value per line item or per customer group
    Many(Vec<FieldValue>),
    /// The order does not carry this attribute
    Missing,
}

/// Every attribute a rule can address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    OrderTotal,
    OrderQuantity,
    OrderItemCount,
    ShippingCost,
    CustomerId,
    CustomerGroup,
    CustomerOrderCount,
    ProductId,
    ProductCategory,
    ProductPrice,
    ProductQuantity,
    Now,
    Hour,
    DayOfWeek,
}

impl Field {
    /// Resolve a rule's `field_name`
    ///
    /// Dotted names are looked up directly. A bare name is tried as an alias
    /// first and otherwise qualified with the rule's namespace.
    pub fn parse(rule_type: RuleType, name: &str) -> Option<Field> {
        let name = name.trim().to_ascii_lowercase();
        if name.contains('.') {
            return Self::from_dotted(&name);
        }
        Self::from_alias(&name).or_else(|| Self::from_dotted(&format!("{}.{}", rule_type, name)))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Field::OrderTotal
            | Field::OrderQuantity
            | Field::OrderItemCount
            | Field::ShippingCost
            | Field::CustomerOrderCount
            | Field::ProductPrice
            | Field::ProductQuantity
            | Field::Hour
            | Field::DayOfWeek => ValueKind::Number,
            Field::CustomerId | Field::CustomerGroup | Field::ProductId | Field::ProductCategory => {
                ValueKind::Text
            }
            Field::Now => ValueKind::Date,
        }
    }

    fn from_alias(name: &str) -> Option<Field> {
        match name {
            "total" | "subtotal" | "order_total" => Some(Field::OrderTotal),
            "quantity" | "total_quantity" => Some(Field::OrderQuantity),
            "item_count" | "line_count" => Some(Field::OrderItemCount),
            "shipping_cost" | "shipping" => Some(Field::ShippingCost),
            "category" => Some(Field::ProductCategory),
            "customer_group" => Some(Field::CustomerGroup),
            "customer_id" => Some(Field::CustomerId),
            "product_id" => Some(Field::ProductId),
            "order_count" => Some(Field::CustomerOrderCount),
            "now" | "date" => Some(Field::Now),
            "hour" => Some(Field::Hour),
            "day_of_week" | "weekday" => Some(Field::DayOfWeek),
            _ => None,
        }
    }

    fn from_dotted(name: &str) -> Option<Field> {
        match name {
            "order.total" | "order.subtotal" => Some(Field::OrderTotal),
            "order.quantity" | "quantity.total" | "quantity.order" => Some(Field::OrderQuantity),
            "order.item_count" | "quantity.lines" => Some(Field::OrderItemCount),
            "order.shipping_cost" => Some(Field::ShippingCost),
            "order.date" | "time.now" | "time.date" => Some(Field::Now),
            "customer.id" => Some(Field::CustomerId),
            "customer.group" => Some(Field::CustomerGroup),
            "customer.order_count" => Some(Field::CustomerOrderCount),
            "product.id" => Some(Field::ProductId),
            "product.category" | "category.name" | "category.id" => Some(Field::ProductCategory),
            "product.price" | "product.unit_price" => Some(Field::ProductPrice),
            "product.quantity" | "quantity.product" | "quantity.item" => {
                Some(Field::ProductQuantity)
            }
            "time.hour" => Some(Field::Hour),
            "time.day_of_week" => Some(Field::DayOfWeek),
            _ => None,
        }
    }
}
