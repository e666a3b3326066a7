// Domain type definitions for the promotion engine
// Enumerations stored as text columns and shared across the engine components

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Commercial category of a promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromotionType {
    Percentage,
    FixedAmount,
    BuyXGetY,
    FreeShipping,
    Bundle,
    Tiered,
    CategoryDiscount,
}

impl fmt::Display for PromotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionType::Percentage => write!(f, "percentage"),
            PromotionType::FixedAmount => write!(f, "fixed_amount"),
            PromotionType::BuyXGetY => write!(f, "buy_x_get_y"),
            PromotionType::FreeShipping => write!(f, "free_shipping"),
            PromotionType::Bundle => write!(f, "bundle"),
            PromotionType::Tiered => write!(f, "tiered"),
            PromotionType::CategoryDiscount => write!(f, "category_discount"),
        }
    }
}

impl FromStr for PromotionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(PromotionType::Percentage),
            "fixed_amount" => Ok(PromotionType::FixedAmount),
            "buy_x_get_y" => Ok(PromotionType::BuyXGetY),
            "free_shipping" => Ok(PromotionType::FreeShipping),
            "bundle" => Ok(PromotionType::Bundle),
            "tiered" => Ok(PromotionType::Tiered),
            "category_discount" => Ok(PromotionType::CategoryDiscount),
            _ => Err(format!("Invalid promotion type: {}", s)),
        }
    }
}

/// How `discount_value` is interpreted when a promotion has no explicit actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is a percentage (10 = 10% off)
    Percentage,
    /// `discount_value` is a currency amount
    FixedAmount,
    FreeItem,
    FreeShipping,
    BuyXGetYFree,
    BuyXGetYDiscount,
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountType::Percentage => write!(f, "percentage"),
            DiscountType::FixedAmount => write!(f, "fixed_amount"),
            DiscountType::FreeItem => write!(f, "free_item"),
            DiscountType::FreeShipping => write!(f, "free_shipping"),
            DiscountType::BuyXGetYFree => write!(f, "buy_x_get_y_free"),
            DiscountType::BuyXGetYDiscount => write!(f, "buy_x_get_y_discount"),
        }
    }
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountType::Percentage),
            "fixed_amount" => Ok(DiscountType::FixedAmount),
            "free_item" => Ok(DiscountType::FreeItem),
            "free_shipping" => Ok(DiscountType::FreeShipping),
            "buy_x_get_y_free" => Ok(DiscountType::BuyXGetYFree),
            "buy_x_get_y_discount" => Ok(DiscountType::BuyXGetYDiscount),
            _ => Err(format!("Invalid discount type: {}", s)),
        }
    }
}

/// Namespace a rule's field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Order,
    Product,
    Customer,
    Time,
    Quantity,
    Category,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Order => write!(f, "order"),
            RuleType::Product => write!(f, "product"),
            RuleType::Customer => write!(f, "customer"),
            RuleType::Time => write!(f, "time"),
            RuleType::Quantity => write!(f, "quantity"),
            RuleType::Category => write!(f, "category"),
        }
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(RuleType::Order),
            "product" => Ok(RuleType::Product),
            "customer" => Ok(RuleType::Customer),
            "time" => Ok(RuleType::Time),
            "quantity" => Ok(RuleType::Quantity),
            "category" => Ok(RuleType::Category),
            _ => Err(format!("Invalid rule type: {}", s)),
        }
    }
}

/// Comparison performed by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Contains,
    In,
    NotIn,
    Between,
}

impl RuleOperator {
    /// Negative operators must hold for every value of a multi-valued field
    pub fn is_negative(&self) -> bool {
        matches!(self, RuleOperator::NotEquals | RuleOperator::NotIn)
    }
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOperator::Equals => write!(f, "equals"),
            RuleOperator::NotEquals => write!(f, "not_equals"),
            RuleOperator::GreaterThan => write!(f, "greater_than"),
            RuleOperator::LessThan => write!(f, "less_than"),
            RuleOperator::GreaterEqual => write!(f, "greater_equal"),
            RuleOperator::LessEqual => write!(f, "less_equal"),
            RuleOperator::Contains => write!(f, "contains"),
            RuleOperator::In => write!(f, "in"),
            RuleOperator::NotIn => write!(f, "not_in"),
            RuleOperator::Between => write!(f, "between"),
        }
    }
}

impl FromStr for RuleOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(RuleOperator::Equals),
            "not_equals" => Ok(RuleOperator::NotEquals),
            "greater_than" => Ok(RuleOperator::GreaterThan),
            "less_than" => Ok(RuleOperator::LessThan),
            "greater_equal" => Ok(RuleOperator::GreaterEqual),
            "less_equal" => Ok(RuleOperator::LessEqual),
            "contains" => Ok(RuleOperator::Contains),
            "in" => Ok(RuleOperator::In),
            "not_in" => Ok(RuleOperator::NotIn),
            "between" => Ok(RuleOperator::Between),
            _ => Err(format!("Invalid rule operator: {}", s)),
        }
    }
}

/// Connective joining a rule to the running result of its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum LogicalOperator {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "AND"),
            LogicalOperator::Or => write!(f, "OR"),
        }
    }
}

impl FromStr for LogicalOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(LogicalOperator::And),
            "OR" => Ok(LogicalOperator::Or),
            _ => Err(format!("Invalid logical operator: {}", s)),
        }
    }
}

/// Benefit granted by a promotion action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    DiscountPercentage,
    DiscountFixed,
    AddFreeItem,
    FreeShipping,
    UpgradeShipping,
    ApplyToCategory,
    ApplyToProduct,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::DiscountPercentage => write!(f, "discount_percentage"),
            ActionType::DiscountFixed => write!(f, "discount_fixed"),
            ActionType::AddFreeItem => write!(f, "add_free_item"),
            ActionType::FreeShipping => write!(f, "free_shipping"),
            ActionType::UpgradeShipping => write!(f, "upgrade_shipping"),
            ActionType::ApplyToCategory => write!(f, "apply_to_category"),
            ActionType::ApplyToProduct => write!(f, "apply_to_product"),
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discount_percentage" => Ok(ActionType::DiscountPercentage),
            "discount_fixed" => Ok(ActionType::DiscountFixed),
            "add_free_item" => Ok(ActionType::AddFreeItem),
            "free_shipping" => Ok(ActionType::FreeShipping),
            "upgrade_shipping" => Ok(ActionType::UpgradeShipping),
            "apply_to_category" => Ok(ActionType::ApplyToCategory),
            "apply_to_product" => Ok(ActionType::ApplyToProduct),
            _ => Err(format!("Invalid action type: {}", s)),
        }
    }
}

/// What part of the order an action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Order,
    Product,
    Category,
    Shipping,
    CheapestItem,
    MostExpensiveItem,
    SpecificProduct,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Order => write!(f, "order"),
            TargetType::Product => write!(f, "product"),
            TargetType::Category => write!(f, "category"),
            TargetType::Shipping => write!(f, "shipping"),
            TargetType::CheapestItem => write!(f, "cheapest_item"),
            TargetType::MostExpensiveItem => write!(f, "most_expensive_item"),
            TargetType::SpecificProduct => write!(f, "specific_product"),
        }
    }
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(TargetType::Order),
            "product" => Ok(TargetType::Product),
            "category" => Ok(TargetType::Category),
            "shipping" => Ok(TargetType::Shipping),
            "cheapest_item" => Ok(TargetType::CheapestItem),
            "most_expensive_item" => Ok(TargetType::MostExpensiveItem),
            "specific_product" => Ok(TargetType::SpecificProduct),
            _ => Err(format!("Invalid target type: {}", s)),
        }
    }
}

/// Customer segment used by customer eligibility rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CustomerGroup {
    /// Matches every customer
    All,
    New,
    Returning,
    Vip,
    Wholesale,
    Retail,
    /// Matches only the row's literal `customer_id`
    Specific,
}

impl fmt::Display for CustomerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomerGroup::All => write!(f, "all"),
            CustomerGroup::New => write!(f, "new"),
            CustomerGroup::Returning => write!(f, "returning"),
            CustomerGroup::Vip => write!(f, "vip"),
            CustomerGroup::Wholesale => write!(f, "wholesale"),
            CustomerGroup::Retail => write!(f, "retail"),
            CustomerGroup::Specific => write!(f, "specific"),
        }
    }
}

impl FromStr for CustomerGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(CustomerGroup::All),
            "new" => Ok(CustomerGroup::New),
            "returning" => Ok(CustomerGroup::Returning),
            "vip" => Ok(CustomerGroup::Vip),
            "wholesale" => Ok(CustomerGroup::Wholesale),
            "retail" => Ok(CustomerGroup::Retail),
            "specific" => Ok(CustomerGroup::Specific),
            _ => Err(format!("Invalid customer group: {}", s)),
        }
    }
}
