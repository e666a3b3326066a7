// Promotion Engine
//
// Evaluates which promotions apply to an order and commits chosen promotions
// against their usage limits.
//
// Pipeline per candidate, in precedence order (ascending priority):
// 1. Eligibility gates (active, window, minimum order, category/product/customer)
// 2. Dynamic rules (AND/OR fold inside a rule group, OR across groups)
// 3. Usage capacity (read-only check; the binding check happens at commit)
// 4. Discount computation, then stacking against already selected promotions
//
// Persistence and auth are injected; the engine holds no global client.

pub mod actions;
pub mod catalog;
pub mod context;
pub mod eligibility;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rules;
pub mod types;
pub mod usage;

pub use actions::{ActionApplier, DiscountResult, DiscountScope, FreeItem};
pub use catalog::PromotionCatalog;
pub use context::{CustomerContext, LineItem, OrderContext};
pub use eligibility::{EligibilityEvaluator, IneligibleReason};
pub use error::{PromoResult, PromotionError};
pub use metrics::{MetricsSummary, PromotionMetrics};
pub use models::{AppliedPromotion, NewPromotion, Promotion, PromotionDefinition};
pub use rules::RuleEngine;
pub use usage::UsageLimiter;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthProvider;
use crate::persistence::{PersistenceError, PersistenceService};

/// An eligible promotion with the benefit it would give
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EvaluatedPromotion {
    pub promotion: Promotion,
    pub discount: DiscountResult,
}

/// Why a selected promotion was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    NotEligible,
    LimitExceeded,
    NotStackable,
    AlreadyApplied,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeclinedPromotion {
    pub promotion_id: Uuid,
    pub reason: DeclineReason,
    pub message: String,
}

impl DeclinedPromotion {
    fn new(promotion_id: Uuid, reason: DeclineReason, message: impl Into<String>) -> Self {
        Self {
            promotion_id,
            reason,
            message: message.into(),
        }
    }
}

/// Result of `apply_promotions`
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ApplyOutcome {
    pub applied: Vec<AppliedPromotion>,
    pub declined: Vec<DeclinedPromotion>,
}

/// Candidates that survived stacking, and the ones that did not
struct Selection<'a> {
    selected: Vec<(&'a PromotionDefinition, DiscountResult)>,
    skipped: Vec<DeclinedPromotion>,
}

/// Orchestrates catalog, evaluators and the usage limiter
pub struct PromotionEngine {
    catalog: PromotionCatalog,
    usage: UsageLimiter,
    auth: Arc<dyn AuthProvider>,
    eligibility: EligibilityEvaluator,
    rules: RuleEngine,
    actions: ActionApplier,
    metrics: PromotionMetrics,
}

impl PromotionEngine {
    /// Create a new PromotionEngine with the default catalog cache TTL
    pub fn new(store: Arc<dyn PersistenceService>, auth: Arc<dyn AuthProvider>) -> Self {
        Self::with_cache_ttl(store, auth, catalog::CACHE_TTL)
    }

    pub fn with_cache_ttl(
        store: Arc<dyn PersistenceService>,
        auth: Arc<dyn AuthProvider>,
        cache_ttl: Duration,
    ) -> Self {
        let metrics = PromotionMetrics::new();
        Self {
            catalog: PromotionCatalog::with_cache_ttl(store.clone(), metrics.clone(), cache_ttl),
            usage: UsageLimiter::new(store),
            auth,
            eligibility: EligibilityEvaluator::new(),
            rules: RuleEngine::new(),
            actions: ActionApplier::new(),
            metrics,
        }
    }

    pub fn catalog(&self) -> &PromotionCatalog {
        &self.catalog
    }

    pub fn metrics(&self) -> &PromotionMetrics {
        &self.metrics
    }

    /// Promotions that would apply to `ctx`, in precedence order
    ///
    /// Read-only: nothing is reserved or recorded.
    pub async fn evaluate_order(&self, ctx: &OrderContext) -> PromoResult<Vec<EvaluatedPromotion>> {
        ctx.validate()?;
        let _timer = self.metrics.start_evaluation();
        let definitions = self.catalog.load_active(ctx.tenant_id).await?;

        let mut candidates = Vec::new();
        for definition in definitions.iter() {
            if let Ok(discount) = self.assess(definition, ctx).await? {
                candidates.push((definition, discount));
            }
        }

        let selection = self.select(candidates, ctx);
        tracing::debug!(
            "Order {}: {} promotion(s) selected, {} skipped by stacking",
            ctx.order_id,
            selection.selected.len(),
            selection.skipped.len()
        );

        Ok(selection
            .selected
            .into_iter()
            .map(|(definition, discount)| EvaluatedPromotion {
                promotion: definition.promotion.clone(),
                discount,
            })
            .collect())
    }

    /// Commit the chosen promotions on behalf of the current session's user
    pub async fn apply_promotions(
        &self,
        ctx: &OrderContext,
        selections: &[Uuid],
    ) -> PromoResult<ApplyOutcome> {
        let applied_by = self.auth.get_session().await?.map(|session| session.user.id);
        self.apply_promotions_as(ctx, selections, applied_by).await
    }

    /// Commit the chosen promotions, recording `applied_by` on each ledger entry
    ///
    /// Every selection is re-checked against fresh data. Selections that fail a
    /// check or lose a usage race are reported in `declined`; only persistence
    /// failures abort the call.
    pub async fn apply_promotions_as(
        &self,
        ctx: &OrderContext,
        selections: &[Uuid],
        applied_by: Option<Uuid>,
    ) -> PromoResult<ApplyOutcome> {
        ctx.validate()?;
        let _timer = self.metrics.start_commit();
        let mut outcome = ApplyOutcome::default();

        let mut seen = HashSet::new();
        let mut definitions = Vec::new();
        for &promotion_id in selections {
            if !seen.insert(promotion_id) {
                continue;
            }
            match self.catalog.get_definition(promotion_id).await {
                Ok(definition) if definition.promotion.tenant_id == ctx.tenant_id => {
                    definitions.push(definition)
                }
                Ok(_) | Err(PromotionError::PromotionNotFound(_)) => {
                    outcome.declined.push(DeclinedPromotion::new(
                        promotion_id,
                        DeclineReason::NotEligible,
                        "promotion not found",
                    ));
                }
                Err(PromotionError::InvalidPromotion(message)) => {
                    outcome.declined.push(DeclinedPromotion::new(
                        promotion_id,
                        DeclineReason::NotEligible,
                        message,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        catalog::sort_by_precedence(&mut definitions);

        let mut candidates = Vec::new();
        for definition in &definitions {
            match self.assess(definition, ctx).await? {
                Ok(discount) => candidates.push((definition, discount)),
                Err(declined) => outcome.declined.push(declined),
            }
        }

        let selection = self.select(candidates, ctx);
        outcome.declined.extend(selection.skipped);

        for (definition, discount) in selection.selected {
            let promotion = &definition.promotion;
            match self
                .usage
                .try_reserve(promotion, ctx.order_id, ctx.customer.id, discount.amount, applied_by)
                .await
            {
                Ok(applied) => outcome.applied.push(applied),
                Err(e) if e.is_limit() => {
                    outcome.declined.push(DeclinedPromotion::new(
                        promotion.id,
                        DeclineReason::LimitExceeded,
                        e.to_string(),
                    ));
                }
                Err(PromotionError::Persistence(PersistenceError::Conflict(message))) => {
                    outcome.declined.push(DeclinedPromotion::new(
                        promotion.id,
                        DeclineReason::AlreadyApplied,
                        message,
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        for _ in &outcome.applied {
            self.metrics.record_application_committed();
        }
        for declined in &outcome.declined {
            tracing::warn!(
                "Declined promotion {} for order {}: {}",
                declined.promotion_id,
                ctx.order_id,
                declined.message
            );
            self.metrics
                .record_application_declined(declined.reason == DeclineReason::LimitExceeded);
        }

        Ok(outcome)
    }

    /// Run the gating pipeline for one promotion
    ///
    /// The outer error is a persistence failure; the inner one is a negative result.
    async fn assess(
        &self,
        definition: &PromotionDefinition,
        ctx: &OrderContext,
    ) -> PromoResult<Result<DiscountResult, DeclinedPromotion>> {
        let promotion = &definition.promotion;

        let lines = match self.eligibility.check(definition, ctx) {
            Ok(lines) => lines,
            Err(reason) => {
                tracing::debug!("Promotion {} not eligible: {}", promotion.id, reason);
                return Ok(Err(DeclinedPromotion::new(
                    promotion.id,
                    DeclineReason::NotEligible,
                    reason.to_string(),
                )));
            }
        };

        if !self.rules.evaluate_rules(&definition.rules, ctx) {
            tracing::debug!("Promotion {} rules not satisfied", promotion.id);
            return Ok(Err(DeclinedPromotion::new(
                promotion.id,
                DeclineReason::NotEligible,
                "promotion rules not satisfied",
            )));
        }

        if !self.usage.has_capacity(promotion, ctx.customer.id).await? {
            tracing::debug!("Promotion {} has no remaining usage", promotion.id);
            return Ok(Err(DeclinedPromotion::new(
                promotion.id,
                DeclineReason::LimitExceeded,
                PromotionError::LimitExceeded(promotion.id).to_string(),
            )));
        }

        let discount = self.actions.compute_discount(definition, ctx, &lines);
        if !discount.has_benefit() {
            return Ok(Err(DeclinedPromotion::new(
                promotion.id,
                DeclineReason::NotEligible,
                "promotion gives no benefit for this order",
            )));
        }
        Ok(Ok(discount))
    }

    /// Apply the stacking policy to candidates already in precedence order
    ///
    /// A candidate whose scope overlaps a selected promotion is skipped when
    /// either of the two is non-stackable. The running total of discounts never
    /// exceeds the order total.
    fn select<'a>(
        &self,
        candidates: Vec<(&'a PromotionDefinition, DiscountResult)>,
        ctx: &OrderContext,
    ) -> Selection<'a> {
        let mut selection = Selection {
            selected: Vec::new(),
            skipped: Vec::new(),
        };
        let mut remaining = ctx.total();

        for (definition, mut discount) in candidates {
            let promotion = &definition.promotion;
            let blocker = selection.selected.iter().find(|(other, other_discount)| {
                other_discount.scope.overlaps(&discount.scope)
                    && !(promotion.is_stackable && other.promotion.is_stackable)
            });
            if let Some((other, _)) = blocker {
                selection.skipped.push(DeclinedPromotion::new(
                    promotion.id,
                    DeclineReason::NotStackable,
                    format!("conflicts with promotion {}", other.promotion.id),
                ));
                continue;
            }

            discount.amount = discount.amount.min(remaining).max(Decimal::ZERO);
            if !discount.has_benefit() {
                selection.skipped.push(DeclinedPromotion::new(
                    promotion.id,
                    DeclineReason::NotEligible,
                    "order total already fully discounted",
                ));
                continue;
            }

            remaining -= discount.amount;
            selection.selected.push((definition, discount));
        }

        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthService, SessionAuthProvider, TokenService};
    use crate::persistence::{InMemoryStore, Table};
    use crate::promotions::context::fixtures as order_fixtures;
    use crate::promotions::models::{
        NewCategoryEligibility, NewProductEligibility, NewPromotionRule,
    };
    use crate::promotions::types::{DiscountType, PromotionType, RuleOperator, RuleType};
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;

    struct Harness {
        store: InMemoryStore,
        auth: Arc<SessionAuthProvider>,
        engine: Arc<PromotionEngine>,
    }

    fn harness() -> Harness {
        let store = InMemoryStore::new();
        let shared: Arc<dyn PersistenceService> = Arc::new(store.clone());
        let service = Arc::new(AuthService::new(
            shared.clone(),
            TokenService::new("test_secret".to_string()),
        ));
        let auth = Arc::new(SessionAuthProvider::new(service));
        let engine = Arc::new(PromotionEngine::new(shared, auth.clone()));
        Harness {
            store,
            auth,
            engine,
        }
    }

    fn new_promotion(tenant_id: Uuid, name: &str) -> NewPromotion {
        NewPromotion {
            tenant_id,
            name: name.to_string(),
            description: None,
            promotion_type: PromotionType::Percentage,
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            minimum_order_amount: dec!(0),
            maximum_discount_amount: None,
            is_active: true,
            is_stackable: false,
            priority: 0,
            start_date: Utc::now() - ChronoDuration::days(1),
            end_date: None,
            usage_limit: None,
            usage_limit_per_customer: None,
            created_by: None,
            rules: Vec::new(),
            actions: Vec::new(),
            category_eligibility: Vec::new(),
            customer_eligibility: Vec::new(),
            product_eligibility: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_evaluate_applies_percentage_with_cap() {
        let h = harness();
        let order = order_fixtures::order();
        let mut new = new_promotion(order.tenant_id, "capped");
        new.maximum_discount_amount = Some(dec!(15));
        h.engine.catalog().create_promotion(new).await.unwrap();

        let results = h.engine.evaluate_order(&order).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].discount.amount, dec!(15));
    }

    #[tokio::test]
    async fn test_overflowing_order_is_rejected_before_evaluation() {
        let h = harness();
        let mut order = order_fixtures::order();
        h.engine
            .catalog()
            .create_promotion(new_promotion(order.tenant_id, "any"))
            .await
            .unwrap();
        order.items[0].unit_price = Decimal::MAX;
        order.items[0].quantity = 2;

        let err = h.engine.evaluate_order(&order).await.unwrap_err();
        assert!(matches!(err, PromotionError::Validation(_)));

        let err = h
            .engine
            .apply_promotions_as(&order, &[Uuid::new_v4()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PromotionError::Validation(_)));
        assert_eq!(h.store.count(Table::AppliedPromotions).await, 0);
    }

    #[tokio::test]
    async fn test_expired_promotion_never_returned() {
        let h = harness();
        let order = order_fixtures::order();
        let mut new = new_promotion(order.tenant_id, "expired");
        new.start_date = Utc::now() - ChronoDuration::days(10);
        new.end_date = Some(Utc::now() - ChronoDuration::days(1));
        h.engine.catalog().create_promotion(new).await.unwrap();

        assert!(h.engine.evaluate_order(&order).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_product_exclusion_beats_category_inclusion() {
        let h = harness();
        let order = order_fixtures::order();
        let mut new = new_promotion(order.tenant_id, "tools only");
        new.category_eligibility.push(NewCategoryEligibility {
            category: "tools".to_string(),
            is_included: true,
        });
        new.product_eligibility.push(NewProductEligibility {
            product_id: order.items[0].product_id,
            is_included: false,
        });
        h.engine.catalog().create_promotion(new).await.unwrap();

        assert!(h.engine.evaluate_order(&order).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rule_threshold_is_strict() {
        let h = harness();
        let mut new = new_promotion(Uuid::nil(), "over 100");
        new.rules.push(NewPromotionRule {
            rule_type: RuleType::Order,
            field_name: "order.total".to_string(),
            operator: RuleOperator::GreaterThan,
            value: "100".to_string(),
            logical_operator: Default::default(),
            rule_group: 0,
        });
        h.engine.catalog().create_promotion(new).await.unwrap();

        let at_150 = order_fixtures::order_with_total(dec!(150));
        let at_100 = order_fixtures::order_with_total(dec!(100));
        assert_eq!(h.engine.evaluate_order(&at_150).await.unwrap().len(), 1);
        assert!(h.engine.evaluate_order(&at_100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_stackable_overlap_keeps_higher_precedence() {
        let h = harness();
        let order = order_fixtures::order();
        let mut first = new_promotion(order.tenant_id, "first");
        first.priority = 1;
        let mut second = new_promotion(order.tenant_id, "second");
        second.priority = 2;
        second.discount_value = dec!(50);
        let mut shipping = new_promotion(order.tenant_id, "free shipping");
        shipping.discount_type = DiscountType::FreeShipping;
        shipping.promotion_type = PromotionType::FreeShipping;
        shipping.priority = 3;

        h.engine.catalog().create_promotion(first).await.unwrap();
        h.engine.catalog().create_promotion(second).await.unwrap();
        h.engine.catalog().create_promotion(shipping).await.unwrap();

        let results = h.engine.evaluate_order(&order).await.unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.promotion.name.as_str()).collect();
        assert_eq!(names, vec!["first", "free shipping"]);
    }

    #[tokio::test]
    async fn test_stackable_promotions_never_exceed_total() {
        let h = harness();
        let order = order_fixtures::order();
        for name in ["a", "b", "c"] {
            let mut new = new_promotion(order.tenant_id, name);
            new.is_stackable = true;
            new.discount_value = dec!(50);
            h.engine.catalog().create_promotion(new).await.unwrap();
        }

        let results = h.engine.evaluate_order(&order).await.unwrap();
        let total: Decimal = results.iter().map(|r| r.discount.amount).sum();
        assert_eq!(results.len(), 2);
        assert_eq!(total, order.total());
    }

    #[tokio::test]
    async fn test_apply_records_session_user() {
        let h = harness();
        let order = order_fixtures::order();
        let created = h
            .engine
            .catalog()
            .create_promotion(new_promotion(order.tenant_id, "sale"))
            .await
            .unwrap();
        let session = h.auth.sign_up("cashier@example.com", "password123").await.unwrap();

        let outcome = h
            .engine
            .apply_promotions(&order, &[created.promotion.id, created.promotion.id])
            .await
            .unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.declined.is_empty());
        assert_eq!(outcome.applied[0].applied_by, Some(session.user.id));
        assert_eq!(outcome.applied[0].discount_amount, dec!(20.00));
        assert_eq!(h.store.count(Table::AppliedPromotions).await, 1);
    }

    #[tokio::test]
    async fn test_apply_twice_to_same_order_is_declined() {
        let h = harness();
        let order = order_fixtures::order();
        let created = h
            .engine
            .catalog()
            .create_promotion(new_promotion(order.tenant_id, "sale"))
            .await
            .unwrap();

        let ids = [created.promotion.id];
        h.engine.apply_promotions_as(&order, &ids, None).await.unwrap();
        let outcome = h.engine.apply_promotions_as(&order, &ids, None).await.unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.declined[0].reason, DeclineReason::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_apply_declines_unknown_and_foreign_promotions() {
        let h = harness();
        let order = order_fixtures::order();
        let foreign = h
            .engine
            .catalog()
            .create_promotion(new_promotion(Uuid::new_v4(), "other tenant"))
            .await
            .unwrap();

        let outcome = h
            .engine
            .apply_promotions_as(&order, &[Uuid::new_v4(), foreign.promotion.id], None)
            .await
            .unwrap();
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.declined.len(), 2);
        assert!(outcome
            .declined
            .iter()
            .all(|d| d.reason == DeclineReason::NotEligible));
    }

    #[tokio::test]
    async fn test_concurrent_apply_respects_global_limit() {
        let h = harness();
        let tenant_id = Uuid::nil();
        let mut new = new_promotion(tenant_id, "one only");
        new.usage_limit = Some(1);
        let created = h.engine.catalog().create_promotion(new).await.unwrap();
        let promotion_id = created.promotion.id;

        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = h.engine.clone();
            // Different order, different customer
            let order = order_fixtures::order();
            handles.push(tokio::spawn(async move {
                engine.apply_promotions_as(&order, &[promotion_id], None).await
            }));
        }

        let mut applied = 0;
        let mut limited = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            applied += outcome.applied.len();
            limited += outcome
                .declined
                .iter()
                .filter(|d| d.reason == DeclineReason::LimitExceeded)
                .count();
        }
        assert_eq!(applied, 1);
        assert_eq!(limited, 1);
        assert_eq!(h.store.count(Table::AppliedPromotions).await, 1);
    }

    #[tokio::test]
    async fn test_customer_at_limit_no_longer_sees_promotion() {
        let h = harness();
        let order = order_fixtures::order();
        let mut new = new_promotion(order.tenant_id, "once per customer");
        new.usage_limit_per_customer = Some(1);
        let created = h.engine.catalog().create_promotion(new).await.unwrap();

        assert_eq!(h.engine.evaluate_order(&order).await.unwrap().len(), 1);
        let outcome = h
            .engine
            .apply_promotions_as(&order, &[created.promotion.id], None)
            .await
            .unwrap();
        assert_eq!(outcome.applied.len(), 1);

        let mut next_order = order.clone();
        next_order.order_id = Uuid::new_v4();
        assert!(h.engine.evaluate_order(&next_order).await.unwrap().is_empty());

        // Another customer is unaffected
        let mut other_customer = next_order.clone();
        other_customer.customer.id = Uuid::new_v4();
        assert_eq!(h.engine.evaluate_order(&other_customer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_track_outcomes() {
        let h = harness();
        let order = order_fixtures::order();
        let created = h
            .engine
            .catalog()
            .create_promotion(new_promotion(order.tenant_id, "sale"))
            .await
            .unwrap();

        h.engine.evaluate_order(&order).await.unwrap();
        h.engine
            .apply_promotions_as(&order, &[created.promotion.id, Uuid::new_v4()], None)
            .await
            .unwrap();

        let summary = h.engine.metrics().summary();
        assert_eq!(summary.evaluations, 1);
        assert_eq!(summary.commits, 1);
        assert_eq!(summary.applications_committed, 1);
        assert_eq!(summary.applications_declined, 1);
    }
}
