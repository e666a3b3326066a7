// Promotion data model
//
// Typed views over the promotion tables plus the request shape used to create a
// promotion together with its rules, actions and eligibility rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::promotions::types::{
    ActionType, CustomerGroup, DiscountType, LogicalOperator, PromotionType, RuleOperator,
    RuleType, TargetType,
};

const MAX_PERCENTAGE: Decimal = Decimal::ONE_HUNDRED;

/// A promotion definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Promotion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[schema(example = "Spring sale")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub promotion_type: PromotionType,
    pub discount_type: DiscountType,
    #[schema(value_type = String, example = "10.00")]
    pub discount_value: Decimal,
    #[serde(default)]
    #[schema(value_type = String, example = "50.00")]
    pub minimum_order_amount: Decimal,
    /// Cap on the total amount this promotion may discount; null means uncapped
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub maximum_discount_amount: Option<Decimal>,
    pub is_active: bool,
    pub is_stackable: bool,
    /// Lower values take precedence
    pub priority: i32,
    pub start_date: DateTime<Utc>,
    /// Null means open-ended
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Null means unlimited
    #[serde(default)]
    pub usage_limit: Option<i32>,
    #[serde(default)]
    pub usage_limit_per_customer: Option<i32>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Promotion {
    /// Check the invariants every stored promotion must satisfy
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(format!(
                    "end_date {} is before start_date {}",
                    end, self.start_date
                ));
            }
        }
        if self.discount_value < Decimal::ZERO {
            return Err(format!("discount_value {} is negative", self.discount_value));
        }
        if self.discount_type == DiscountType::Percentage && self.discount_value > MAX_PERCENTAGE {
            return Err(format!(
                "percentage discount {} exceeds 100",
                self.discount_value
            ));
        }
        if self.minimum_order_amount < Decimal::ZERO {
            return Err("minimum_order_amount is negative".to_string());
        }
        if matches!(self.maximum_discount_amount, Some(cap) if cap < Decimal::ZERO) {
            return Err("maximum_discount_amount is negative".to_string());
        }
        if matches!(self.usage_limit, Some(limit) if limit < 0) {
            return Err("usage_limit is negative".to_string());
        }
        if matches!(self.usage_limit_per_customer, Some(limit) if limit < 0) {
            return Err("usage_limit_per_customer is negative".to_string());
        }
        Ok(())
    }

    /// True when `now` lies inside the validity window (both ends inclusive)
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        if now < self.start_date {
            return false;
        }
        match self.end_date {
            Some(end) => now <= end,
            None => true,
        }
    }
}

/// A dynamic predicate attached to a promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PromotionRule {
    pub id: Uuid,
    pub promotion_id: Uuid,
    pub rule_type: RuleType,
    #[schema(example = "order.total")]
    pub field_name: String,
    pub operator: RuleOperator,
    /// Raw operand, parsed according to the operator
    #[schema(example = "100")]
    pub value: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub rule_group: i32,
    /// Fold order within the group
    #[serde(default)]
    pub position: i32,
}

/// A benefit granted once a promotion is eligible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PromotionAction {
    pub id: Uuid,
    pub promotion_id: Uuid,
    pub action_type: ActionType,
    pub target_type: TargetType,
    #[serde(default)]
    pub target_value: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub action_value: Option<Decimal>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub action_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CategoryEligibility {
    pub id: Uuid,
    pub promotion_id: Uuid,
    pub category: String,
    pub is_included: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomerEligibility {
    pub id: Uuid,
    pub promotion_id: Uuid,
    pub customer_group: CustomerGroup,
    /// Only meaningful for the `specific` group
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub is_included: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductEligibility {
    pub id: Uuid,
    pub promotion_id: Uuid,
    pub product_id: Uuid,
    pub is_included: bool,
}

/// Running usage counter; `customer_id` null is the promotion-wide counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PromotionUsageLimit {
    pub id: Uuid,
    pub promotion_id: Uuid,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub usage_count: i32,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Immutable ledger entry written once per successful application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AppliedPromotion {
    pub id: Uuid,
    pub promotion_id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    #[schema(value_type = String, example = "15.00")]
    pub discount_amount: Decimal,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub applied_by: Option<Uuid>,
}

/// A promotion together with every row it owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PromotionDefinition {
    pub promotion: Promotion,
    pub rules: Vec<PromotionRule>,
    pub actions: Vec<PromotionAction>,
    pub category_eligibility: Vec<CategoryEligibility>,
    pub customer_eligibility: Vec<CustomerEligibility>,
    pub product_eligibility: Vec<ProductEligibility>,
}

impl PromotionDefinition {
    /// Wrap a bare promotion with no child rows
    pub fn bare(promotion: Promotion) -> Self {
        Self {
            promotion,
            rules: Vec::new(),
            actions: Vec::new(),
            category_eligibility: Vec::new(),
            customer_eligibility: Vec::new(),
            product_eligibility: Vec::new(),
        }
    }

    /// Promotion invariants plus the bounds on each action's own value
    pub fn check_invariants(&self) -> Result<(), String> {
        self.promotion.check_invariants()?;
        for action in &self.actions {
            let Some(value) = action.action_value else {
                continue;
            };
            if value < Decimal::ZERO {
                return Err(format!("action_value {} of {} is negative", value, action.action_type));
            }
            if self.is_percentage_action(action) && value > MAX_PERCENTAGE {
                return Err(format!(
                    "percentage action_value {} of {} exceeds 100",
                    value, action.action_type
                ));
            }
        }
        Ok(())
    }

    /// Whether an action's value is read as a percentage
    fn is_percentage_action(&self, action: &PromotionAction) -> bool {
        match action.action_type {
            ActionType::DiscountPercentage => true,
            ActionType::ApplyToCategory | ActionType::ApplyToProduct => {
                self.promotion.discount_type != DiscountType::FixedAmount
            }
            ActionType::AddFreeItem => self.promotion.discount_type == DiscountType::BuyXGetYDiscount,
            _ => false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Request body for creating a promotion
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct NewPromotion {
    pub tenant_id: Uuid,
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: String,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub description: Option<String>,
    pub promotion_type: PromotionType,
    pub discount_type: DiscountType,
    #[schema(value_type = String, example = "10")]
    pub discount_value: Decimal,
    #[serde(default)]
    #[schema(value_type = String)]
    pub minimum_order_amount: Decimal,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub maximum_discount_amount: Option<Decimal>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_stackable: bool,
    #[serde(default)]
    pub priority: i32,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[validate(range(min = 0, message = "Usage limit cannot be negative"))]
    #[serde(default)]
    pub usage_limit: Option<i32>,
    #[validate(range(min = 0, message = "Usage limit cannot be negative"))]
    #[serde(default)]
    pub usage_limit_per_customer: Option<i32>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[serde(default)]
    pub rules: Vec<NewPromotionRule>,
    #[serde(default)]
    pub actions: Vec<NewPromotionAction>,
    #[serde(default)]
    pub category_eligibility: Vec<NewCategoryEligibility>,
    #[serde(default)]
    pub customer_eligibility: Vec<NewCustomerEligibility>,
    #[serde(default)]
    pub product_eligibility: Vec<NewProductEligibility>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPromotionRule {
    pub rule_type: RuleType,
    pub field_name: String,
    pub operator: RuleOperator,
    pub value: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub rule_group: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPromotionAction {
    pub action_type: ActionType,
    pub target_type: TargetType,
    #[serde(default)]
    pub target_value: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub action_value: Option<Decimal>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub action_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCategoryEligibility {
    pub category: String,
    #[serde(default = "default_true")]
    pub is_included: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCustomerEligibility {
    pub customer_group: CustomerGroup,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_included: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewProductEligibility {
    pub product_id: Uuid,
    #[serde(default = "default_true")]
    pub is_included: bool,
}

impl NewPromotion {
    /// Assign ids and timestamps, producing the full definition to persist
    pub fn into_definition(self, now: DateTime<Utc>) -> PromotionDefinition {
        let promotion_id = Uuid::new_v4();
        let promotion = Promotion {
            id: promotion_id,
            tenant_id: self.tenant_id,
            name: self.name,
            description: self.description,
            promotion_type: self.promotion_type,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            minimum_order_amount: self.minimum_order_amount,
            maximum_discount_amount: self.maximum_discount_amount,
            is_active: self.is_active,
            is_stackable: self.is_stackable,
            priority: self.priority,
            start_date: self.start_date,
            end_date: self.end_date,
            usage_limit: self.usage_limit,
            usage_limit_per_customer: self.usage_limit_per_customer,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        };

        PromotionDefinition {
            promotion,
            rules: self
                .rules
                .into_iter()
                .zip(0..)
                .map(|(rule, position)| PromotionRule {
                    id: Uuid::new_v4(),
                    promotion_id,
                    rule_type: rule.rule_type,
                    field_name: rule.field_name,
                    operator: rule.operator,
                    value: rule.value,
                    logical_operator: rule.logical_operator,
                    rule_group: rule.rule_group,
                    position,
                })
                .collect(),
            actions: self
                .actions
                .into_iter()
                .map(|action| PromotionAction {
                    id: Uuid::new_v4(),
                    promotion_id,
                    action_type: action.action_type,
                    target_type: action.target_type,
                    target_value: action.target_value,
                    action_value: action.action_value,
                    action_data: action.action_data,
                })
                .collect(),
            category_eligibility: self
                .category_eligibility
                .into_iter()
                .map(|row| CategoryEligibility {
                    id: Uuid::new_v4(),
                    promotion_id,
                    category: row.category,
                    is_included: row.is_included,
                })
                .collect(),
            customer_eligibility: self
                .customer_eligibility
                .into_iter()
                .map(|row| CustomerEligibility {
                    id: Uuid::new_v4(),
                    promotion_id,
                    customer_group: row.customer_group,
                    customer_id: row.customer_id,
                    is_included: row.is_included,
                })
                .collect(),
            product_eligibility: self
                .product_eligibility
                .into_iter()
                .map(|row| ProductEligibility {
                    id: Uuid::new_v4(),
                    promotion_id,
                    product_id: row.product_id,
                    is_included: row.is_included,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    /// An active, uncapped 10% promotion that started yesterday
    pub fn promotion() -> Promotion {
        let now = Utc::now();
        Promotion {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "Ten percent off".to_string(),
            description: None,
            promotion_type: PromotionType::Percentage,
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            minimum_order_amount: Decimal::ZERO,
            maximum_discount_amount: None,
            is_active: true,
            is_stackable: false,
            priority: 0,
            start_date: now - Duration::days(1),
            end_date: None,
            usage_limit: None,
            usage_limit_per_customer: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn rule(field: &str, operator: RuleOperator, value: &str) -> PromotionRule {
        PromotionRule {
            id: Uuid::new_v4(),
            promotion_id: Uuid::nil(),
            rule_type: RuleType::Order,
            field_name: field.to_string(),
            operator,
            value: value.to_string(),
            logical_operator: LogicalOperator::And,
            rule_group: 0,
            position: 0,
        }
    }

    pub fn action(action_type: ActionType, target_type: TargetType) -> PromotionAction {
        PromotionAction {
            id: Uuid::new_v4(),
            promotion_id: Uuid::nil(),
            action_type,
            target_type,
            target_value: None,
            action_value: None,
            action_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_invariants_accept_valid_promotion() {
        assert!(fixtures::promotion().check_invariants().is_ok());
    }

    #[test]
    fn test_invariants_reject_inverted_window() {
        let mut promotion = fixtures::promotion();
        promotion.end_date = Some(promotion.start_date - Duration::hours(1));
        assert!(promotion.check_invariants().is_err());
    }

    #[test]
    fn test_invariants_reject_bad_amounts() {
        let mut promotion = fixtures::promotion();
        promotion.discount_value = dec!(-1);
        assert!(promotion.check_invariants().is_err());

        let mut promotion = fixtures::promotion();
        promotion.discount_value = dec!(120);
        assert!(promotion.check_invariants().is_err());

        let mut promotion = fixtures::promotion();
        promotion.discount_type = DiscountType::FixedAmount;
        promotion.discount_value = dec!(120);
        assert!(promotion.check_invariants().is_ok());

        let mut promotion = fixtures::promotion();
        promotion.usage_limit_per_customer = Some(-2);
        assert!(promotion.check_invariants().is_err());
    }

    #[test]
    fn test_definition_invariants_bound_action_values() {
        let mut definition = PromotionDefinition::bare(fixtures::promotion());
        let mut action = fixtures::action(ActionType::DiscountPercentage, TargetType::Order);
        action.action_value = Some(dec!(100));
        definition.actions.push(action);
        assert!(definition.check_invariants().is_ok());

        definition.actions[0].action_value = Some(dec!(100.01));
        assert!(definition.check_invariants().is_err());

        definition.actions[0].action_type = ActionType::ApplyToCategory;
        assert!(definition.check_invariants().is_err());
        definition.promotion.discount_type = DiscountType::FixedAmount;
        assert!(definition.check_invariants().is_ok());

        definition.actions[0].action_value = Some(dec!(-5));
        assert!(definition.check_invariants().is_err());
    }

    #[test]
    fn test_window_is_inclusive() {
        let mut promotion = fixtures::promotion();
        let end = promotion.start_date + Duration::days(2);
        promotion.end_date = Some(end);

        assert!(promotion.is_within_window(promotion.start_date));
        assert!(promotion.is_within_window(end));
        assert!(!promotion.is_within_window(end + Duration::seconds(1)));
        assert!(!promotion.is_within_window(promotion.start_date - Duration::seconds(1)));
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let rule: PromotionRule = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "promotion_id": Uuid::new_v4(),
            "rule_type": "order",
            "field_name": "order.total",
            "operator": "greater_than",
            "value": "100",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(rule.logical_operator, LogicalOperator::And);
        assert_eq!(rule.rule_group, 0);
    }

    #[test]
    fn test_decimal_accepts_numbers_and_strings() {
        let applied: AppliedPromotion = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "promotion_id": Uuid::new_v4(),
            "order_id": Uuid::new_v4(),
            "customer_id": Uuid::new_v4(),
            "discount_amount": "15.00",
            "applied_at": "2024-03-01T12:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(applied.discount_amount, dec!(15.00));
        assert!(applied.applied_by.is_none());
    }

    #[test]
    fn test_new_promotion_into_definition() {
        let request: NewPromotion = serde_json::from_value(json!({
            "tenant_id": Uuid::nil(),
            "name": "Tools week",
            "promotion_type": "category_discount",
            "discount_type": "percentage",
            "discount_value": "15",
            "start_date": "2024-01-01T00:00:00Z",
            "rules": [
                { "rule_type": "order", "field_name": "order.total", "operator": "greater_equal", "value": "50" }
            ],
            "category_eligibility": [ { "category": "tools" } ]
        }))
        .unwrap();

        assert!(request.validate().is_ok());
        let definition = request.into_definition(Utc::now());
        assert!(definition.promotion.is_active);
        assert_eq!(definition.rules.len(), 1);
        assert_eq!(definition.rules[0].promotion_id, definition.promotion.id);
        assert!(definition.category_eligibility[0].is_included);
    }

    #[test]
    fn test_new_promotion_validation() {
        let request: NewPromotion = serde_json::from_value(json!({
            "tenant_id": Uuid::nil(),
            "name": "",
            "promotion_type": "percentage",
            "discount_type": "percentage",
            "discount_value": "10",
            "start_date": "2024-01-01T00:00:00Z",
            "usage_limit": -1
        }))
        .unwrap();

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("usage_limit"));
    }
}
