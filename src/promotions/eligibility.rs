// Eligibility Evaluator
//
// Gating checks that run before any rule: activity, validity window, minimum
// order amount, and the category / product / customer allow-deny lists.
// Per dimension: no rows means unrestricted. Once a dimension has rows, an entity
// must match an inclusion row and no exclusion row, so a dimension holding only
// exclusion rows admits nothing.

use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::promotions::context::OrderContext;
use crate::promotions::models::{CustomerEligibility, PromotionDefinition};
use crate::promotions::types::CustomerGroup;

/// Why a promotion was gated out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    Inactive,
    NotStarted,
    Expired,
    BelowMinimumOrder,
    ProductExcluded(Uuid),
    CategoryExcluded(String),
    CustomerExcluded,
    CustomerNotIncluded,
    NoEligibleItems,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::Inactive => write!(f, "promotion is inactive"),
            IneligibleReason::NotStarted => write!(f, "promotion has not started"),
            IneligibleReason::Expired => write!(f, "promotion has expired"),
            IneligibleReason::BelowMinimumOrder => write!(f, "order total below minimum"),
            IneligibleReason::ProductExcluded(id) => write!(f, "product {} is excluded", id),
            IneligibleReason::CategoryExcluded(c) => write!(f, "category '{}' is excluded", c),
            IneligibleReason::CustomerExcluded => write!(f, "customer is excluded"),
            IneligibleReason::CustomerNotIncluded => write!(f, "customer is not in an eligible group"),
            IneligibleReason::NoEligibleItems => write!(f, "no order line is eligible"),
        }
    }
}

/// Include / exclude sets for one line-level dimension
struct Dimension<T> {
    included: HashSet<T>,
    excluded: HashSet<T>,
}

impl<T: std::hash::Hash + Eq> Dimension<T> {
    fn from_rows(rows: impl Iterator<Item = (T, bool)>) -> Self {
        let mut dimension = Self {
            included: HashSet::new(),
            excluded: HashSet::new(),
        };
        for (value, is_included) in rows {
            if is_included {
                dimension.included.insert(value);
            } else {
                dimension.excluded.insert(value);
            }
        }
        dimension
    }

    fn excludes(&self, value: &T) -> bool {
        self.excluded.contains(value)
    }

    fn admits(&self, value: &T) -> bool {
        if !self.is_restricted() {
            return true;
        }
        !self.excludes(value) && self.included.contains(value)
    }

    fn is_restricted(&self) -> bool {
        !self.included.is_empty() || !self.excluded.is_empty()
    }
}

/// Pure predicate over a promotion definition and an order
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityEvaluator;

impl EligibilityEvaluator {
    /// Create a new EligibilityEvaluator
    pub fn new() -> Self {
        Self
    }

    pub fn is_eligible(&self, definition: &PromotionDefinition, ctx: &OrderContext) -> bool {
        self.check(definition, ctx).is_ok()
    }

    /// Run every gating check
    ///
    /// On success returns the indices of the order lines the promotion may act on.
    pub fn check(
        &self,
        definition: &PromotionDefinition,
        ctx: &OrderContext,
    ) -> Result<Vec<usize>, IneligibleReason> {
        let promotion = &definition.promotion;

        if !promotion.is_active {
            return Err(IneligibleReason::Inactive);
        }
        if !promotion.is_within_window(ctx.now) {
            return Err(if ctx.now < promotion.start_date {
                IneligibleReason::NotStarted
            } else {
                IneligibleReason::Expired
            });
        }
        if ctx.total() < promotion.minimum_order_amount {
            return Err(IneligibleReason::BelowMinimumOrder);
        }

        self.check_customer(&definition.customer_eligibility, ctx)?;
        self.eligible_lines(definition, ctx)
    }

    fn check_customer(
        &self,
        rows: &[CustomerEligibility],
        ctx: &OrderContext,
    ) -> Result<(), IneligibleReason> {
        if rows.is_empty() {
            return Ok(());
        }

        let groups = ctx.customer.effective_groups();
        let matches = |row: &CustomerEligibility| match row.customer_group {
            CustomerGroup::All => true,
            CustomerGroup::Specific => row.customer_id == Some(ctx.customer.id),
            group => groups.contains(&group),
        };

        if rows.iter().any(|row| !row.is_included && matches(row)) {
            return Err(IneligibleReason::CustomerExcluded);
        }

        if !rows.iter().any(|row| row.is_included && matches(row)) {
            return Err(IneligibleReason::CustomerNotIncluded);
        }
        Ok(())
    }

    fn eligible_lines(
        &self,
        definition: &PromotionDefinition,
        ctx: &OrderContext,
    ) -> Result<Vec<usize>, IneligibleReason> {
        let products = Dimension::from_rows(
            definition
                .product_eligibility
                .iter()
                .map(|row| (row.product_id, row.is_included)),
        );
        let categories = Dimension::from_rows(
            definition
                .category_eligibility
                .iter()
                .map(|row| (row.category.clone(), row.is_included)),
        );

        // An excluded entity anywhere in the order disqualifies the whole order
        for item in &ctx.items {
            if products.excludes(&item.product_id) {
                return Err(IneligibleReason::ProductExcluded(item.product_id));
            }
            if categories.excludes(&item.category) {
                return Err(IneligibleReason::CategoryExcluded(item.category.clone()));
            }
        }

        let lines: Vec<usize> = ctx
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| products.admits(&item.product_id) && categories.admits(&item.category))
            .map(|(i, _)| i)
            .collect();

        let restricted = products.is_restricted() || categories.is_restricted();
        if restricted && lines.is_empty() {
            return Err(IneligibleReason::NoEligibleItems);
        }
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promotions::context::fixtures as order_fixtures;
    use crate::promotions::models::fixtures::promotion;
    use crate::promotions::models::{CategoryEligibility, ProductEligibility};
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn definition() -> PromotionDefinition {
        PromotionDefinition::bare(promotion())
    }

    fn category_row(category: &str, is_included: bool) -> CategoryEligibility {
        CategoryEligibility {
            id: Uuid::new_v4(),
            promotion_id: Uuid::nil(),
            category: category.to_string(),
            is_included,
        }
    }

    fn product_row(product_id: Uuid, is_included: bool) -> ProductEligibility {
        ProductEligibility {
            id: Uuid::new_v4(),
            promotion_id: Uuid::nil(),
            product_id,
            is_included,
        }
    }

    fn customer_row(
        customer_group: CustomerGroup,
        customer_id: Option<Uuid>,
        is_included: bool,
    ) -> CustomerEligibility {
        CustomerEligibility {
            id: Uuid::new_v4(),
            promotion_id: Uuid::nil(),
            customer_group,
            customer_id,
            is_included,
        }
    }

    #[test]
    fn test_unrestricted_promotion_covers_every_line() {
        let evaluator = EligibilityEvaluator::new();
        let lines = evaluator.check(&definition(), &order_fixtures::order()).unwrap();
        assert_eq!(lines, vec![0, 1]);
    }

    #[test]
    fn test_inactive_and_window_checks() {
        let evaluator = EligibilityEvaluator::new();
        let order = order_fixtures::order();

        let mut def = definition();
        def.promotion.is_active = false;
        assert_eq!(evaluator.check(&def, &order), Err(IneligibleReason::Inactive));

        let mut def = definition();
        def.promotion.start_date = order.now + Duration::hours(1);
        assert_eq!(evaluator.check(&def, &order), Err(IneligibleReason::NotStarted));

        let mut def = definition();
        def.promotion.end_date = Some(order.now - Duration::seconds(1));
        assert_eq!(evaluator.check(&def, &order), Err(IneligibleReason::Expired));
    }

    #[test]
    fn test_minimum_order_amount() {
        let evaluator = EligibilityEvaluator::new();
        let mut def = definition();
        def.promotion.minimum_order_amount = dec!(200.01);
        assert_eq!(
            evaluator.check(&def, &order_fixtures::order()),
            Err(IneligibleReason::BelowMinimumOrder)
        );

        def.promotion.minimum_order_amount = dec!(200.00);
        assert!(evaluator.is_eligible(&def, &order_fixtures::order()));
    }

    #[test]
    fn test_category_inclusion_scopes_lines() {
        let evaluator = EligibilityEvaluator::new();
        let mut def = definition();
        def.category_eligibility.push(category_row("paint", true));

        let lines = evaluator.check(&def, &order_fixtures::order()).unwrap();
        assert_eq!(lines, vec![1]);

        let mut def = definition();
        def.category_eligibility.push(category_row("garden", true));
        assert_eq!(
            evaluator.check(&def, &order_fixtures::order()),
            Err(IneligibleReason::NoEligibleItems)
        );
    }

    #[test]
    fn test_product_exclusion_beats_category_inclusion() {
        let evaluator = EligibilityEvaluator::new();
        let order = order_fixtures::order();
        let excluded = order.items[0].product_id;

        let mut def = definition();
        def.category_eligibility.push(category_row("tools", true));
        def.product_eligibility.push(product_row(excluded, false));

        assert_eq!(
            evaluator.check(&def, &order),
            Err(IneligibleReason::ProductExcluded(excluded))
        );
    }

    #[test]
    fn test_exclusion_only_dimension_admits_nothing() {
        let evaluator = EligibilityEvaluator::new();
        let mut order = order_fixtures::order();
        order.items.remove(1);

        let mut def = definition();
        def.category_eligibility.push(category_row("paint", false));
        assert_eq!(
            evaluator.check(&def, &order),
            Err(IneligibleReason::NoEligibleItems)
        );

        let mut def = definition();
        def.product_eligibility.push(product_row(Uuid::new_v4(), false));
        assert_eq!(
            evaluator.check(&def, &order),
            Err(IneligibleReason::NoEligibleItems)
        );
    }

    #[test]
    fn test_exclusion_only_customer_rows_admit_nobody() {
        let evaluator = EligibilityEvaluator::new();
        let order = order_fixtures::order();

        let mut def = definition();
        def.customer_eligibility.push(customer_row(CustomerGroup::Vip, None, false));
        assert_eq!(
            evaluator.check(&def, &order),
            Err(IneligibleReason::CustomerNotIncluded)
        );
    }

    #[test]
    fn test_customer_groups() {
        let evaluator = EligibilityEvaluator::new();
        let order = order_fixtures::order();

        let mut def = definition();
        def.customer_eligibility.push(customer_row(CustomerGroup::Vip, None, true));
        assert_eq!(
            evaluator.check(&def, &order),
            Err(IneligibleReason::CustomerNotIncluded)
        );

        def.customer_eligibility.push(customer_row(CustomerGroup::Retail, None, true));
        assert!(evaluator.is_eligible(&def, &order));

        let mut def = definition();
        def.customer_eligibility.push(customer_row(CustomerGroup::All, None, true));
        assert!(evaluator.is_eligible(&def, &order));

        def.customer_eligibility
            .push(customer_row(CustomerGroup::Specific, Some(order.customer.id), false));
        assert_eq!(evaluator.check(&def, &order), Err(IneligibleReason::CustomerExcluded));
    }

    #[test]
    fn test_specific_customer_inclusion() {
        let evaluator = EligibilityEvaluator::new();
        let order = order_fixtures::order();

        let mut def = definition();
        def.customer_eligibility
            .push(customer_row(CustomerGroup::Specific, Some(Uuid::new_v4()), true));
        assert!(!evaluator.is_eligible(&def, &order));

        def.customer_eligibility
            .push(customer_row(CustomerGroup::Specific, Some(order.customer.id), true));
        assert!(evaluator.is_eligible(&def, &order));
    }

    #[test]
    fn test_implied_returning_group() {
        let evaluator = EligibilityEvaluator::new();
        let mut order = order_fixtures::order();

        let mut def = definition();
        def.customer_eligibility.push(customer_row(CustomerGroup::New, None, true));
        assert!(!evaluator.is_eligible(&def, &order));

        order.customer.order_count = Some(0);
        assert!(evaluator.is_eligible(&def, &order));
    }

    proptest! {
        #[test]
        fn prop_expired_promotion_never_eligible(
            expired_secs in 1i64..10_000_000,
            minimum in 0i64..100,
            stackable in any::<bool>(),
            priority in -100i32..100,
        ) {
            let order = order_fixtures::order();
            let mut def = definition();
            def.promotion.start_date = order.now - Duration::days(365);
            def.promotion.end_date = Some(order.now - Duration::seconds(expired_secs));
            def.promotion.minimum_order_amount = rust_decimal::Decimal::from(minimum);
            def.promotion.is_stackable = stackable;
            def.promotion.priority = priority;

            prop_assert!(!EligibilityEvaluator::new().is_eligible(&def, &order));
        }
    }
}
