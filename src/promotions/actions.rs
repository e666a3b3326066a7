// Action Applier
//
// Turns an eligible promotion's actions into a monetary discount, free items and
// shipping adjustments. Amounts are computed per action, summed, capped by the
// promotion's `maximum_discount_amount`, bounded by the order total and rounded
// to cents.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::promotions::context::OrderContext;
use crate::promotions::error::{PromoResult, PromotionError};
use crate::promotions::models::{Promotion, PromotionAction, PromotionDefinition};
use crate::promotions::types::{ActionType, DiscountType, TargetType};

const DEFAULT_BUY_QUANTITY: u64 = 1;
const DEFAULT_GET_QUANTITY: u64 = 1;

/// A unit given away by a free-item action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FreeItem {
    pub product_id: Uuid,
    pub quantity: u32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
}

/// Order lines and shipping touched by a promotion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscountScope {
    pub lines: BTreeSet<usize>,
    pub shipping: bool,
}

impl DiscountScope {
    pub fn overlaps(&self, other: &DiscountScope) -> bool {
        (self.shipping && other.shipping) || !self.lines.is_disjoint(&other.lines)
    }
}

/// Benefit computed for one promotion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DiscountResult {
    #[schema(value_type = String, example = "15.00")]
    pub amount: Decimal,
    pub free_items: Vec<FreeItem>,
    /// Replacement shipping cost (zero for free shipping)
    #[schema(value_type = Option<String>)]
    pub shipping_override: Option<Decimal>,
    /// Shipping method the order is upgraded to
    pub shipping_upgrade: Option<String>,
    #[serde(skip)]
    pub scope: DiscountScope,
}

impl DiscountResult {
    /// True when applying the promotion changes anything for the customer
    pub fn has_benefit(&self) -> bool {
        self.amount > Decimal::ZERO
            || !self.free_items.is_empty()
            || self.shipping_override.is_some()
            || self.shipping_upgrade.is_some()
    }
}

/// Round a currency amount to cents, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// The single action implied by `discount_type` for promotions without action rows
pub fn implied_action(promotion: &Promotion) -> PromotionAction {
    let (action_type, target_type) = match promotion.discount_type {
        DiscountType::Percentage => (ActionType::DiscountPercentage, TargetType::Order),
        DiscountType::FixedAmount => (ActionType::DiscountFixed, TargetType::Order),
        DiscountType::FreeShipping => (ActionType::FreeShipping, TargetType::Shipping),
        DiscountType::FreeItem | DiscountType::BuyXGetYFree | DiscountType::BuyXGetYDiscount => {
            (ActionType::AddFreeItem, TargetType::Order)
        }
    };

    PromotionAction {
        id: promotion.id,
        promotion_id: promotion.id,
        action_type,
        target_type,
        target_value: None,
        action_value: None,
        action_data: None,
    }
}

/// Stateless discount calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionApplier;

impl ActionApplier {
    /// Create a new ActionApplier
    pub fn new() -> Self {
        Self
    }

    /// Compute the benefit of an eligible promotion
    ///
    /// `eligible_lines` are the order lines that passed the product and category
    /// eligibility dimensions; actions never reach outside them.
    pub fn compute_discount(
        &self,
        definition: &PromotionDefinition,
        ctx: &OrderContext,
        eligible_lines: &[usize],
    ) -> DiscountResult {
        let promotion = &definition.promotion;
        let implied;
        let actions: &[PromotionAction] = if definition.actions.is_empty() {
            implied = [implied_action(promotion)];
            &implied
        } else {
            &definition.actions
        };

        let mut result = DiscountResult::default();
        for action in actions {
            if let Err(e) = self.apply_action(promotion, action, ctx, eligible_lines, &mut result) {
                tracing::warn!(
                    "Skipping action {} of promotion {}: {}",
                    action.id,
                    promotion.id,
                    e
                );
            }
        }

        let mut amount = result.amount;
        if let Some(cap) = promotion.maximum_discount_amount {
            amount = amount.min(cap);
        }
        amount = amount.min(ctx.total()).max(Decimal::ZERO);
        result.amount = round_money(amount);

        tracing::debug!(
            "Promotion {} computes discount {} over {} line(s)",
            promotion.id,
            result.amount,
            result.scope.lines.len()
        );
        result
    }

    fn apply_action(
        &self,
        promotion: &Promotion,
        action: &PromotionAction,
        ctx: &OrderContext,
        eligible_lines: &[usize],
        result: &mut DiscountResult,
    ) -> PromoResult<()> {
        let value = action.action_value.unwrap_or(promotion.discount_value);

        match action.action_type {
            ActionType::DiscountPercentage => {
                let (base, lines) = self.target_base(action, ctx, eligible_lines, result)?;
                result.amount = result.amount.saturating_add(percentage_of(base, value));
                result.scope.lines.extend(lines);
            }
            ActionType::DiscountFixed => {
                let (base, lines) = self.target_base(action, ctx, eligible_lines, result)?;
                result.amount = result.amount.saturating_add(value.max(Decimal::ZERO).min(base));
                result.scope.lines.extend(lines);
            }
            ActionType::ApplyToCategory | ActionType::ApplyToProduct => {
                let target = action.target_value.as_deref().ok_or_else(|| {
                    PromotionError::Validation(format!("{} requires a target_value", action.action_type))
                })?;
                let lines = if action.action_type == ActionType::ApplyToCategory {
                    filter_lines(ctx, eligible_lines, |item| item.category == target)
                } else {
                    let product_id = parse_product_id(target)?;
                    filter_lines(ctx, eligible_lines, |item| item.product_id == product_id)
                };
                let base = ctx.subtotal_of(&lines);
                let discount = match promotion.discount_type {
                    DiscountType::FixedAmount => value.max(Decimal::ZERO).min(base),
                    _ => percentage_of(base, value),
                };
                result.amount = result.amount.saturating_add(discount);
                result.scope.lines.extend(lines);
            }
            ActionType::FreeShipping => {
                result.shipping_override = Some(Decimal::ZERO);
                result.scope.shipping = true;
            }
            ActionType::UpgradeShipping => {
                let method = action
                    .target_value
                    .clone()
                    .or_else(|| data_str(action, "shipping_method"))
                    .ok_or_else(|| {
                        PromotionError::Validation("upgrade_shipping requires a shipping method".to_string())
                    })?;
                result.shipping_upgrade = Some(method);
                result.scope.shipping = true;
            }
            ActionType::AddFreeItem => {
                let lines = self.target_lines(action, ctx, eligible_lines)?;
                self.apply_free_items(promotion, action, value, ctx, &lines, result);
            }
        }
        Ok(())
    }

    /// Monetary base an action's value applies to, with the lines it covers
    fn target_base(
        &self,
        action: &PromotionAction,
        ctx: &OrderContext,
        eligible_lines: &[usize],
        result: &mut DiscountResult,
    ) -> PromoResult<(Decimal, Vec<usize>)> {
        match action.target_type {
            TargetType::Shipping => {
                result.scope.shipping = true;
                Ok((ctx.shipping_cost, Vec::new()))
            }
            TargetType::CheapestItem | TargetType::MostExpensiveItem => {
                let lines = self.target_lines(action, ctx, eligible_lines)?;
                // One unit of the designated line
                let base = lines
                    .first()
                    .and_then(|&i| ctx.items.get(i))
                    .map(|item| item.unit_price)
                    .unwrap_or(Decimal::ZERO);
                Ok((base, lines))
            }
            _ => {
                let lines = self.target_lines(action, ctx, eligible_lines)?;
                Ok((ctx.subtotal_of(&lines), lines))
            }
        }
    }

    /// Apply the `target_type` / `target_value` filter, then pick the designated item
    fn target_lines(
        &self,
        action: &PromotionAction,
        ctx: &OrderContext,
        eligible_lines: &[usize],
    ) -> PromoResult<Vec<usize>> {
        let target = action.target_value.as_deref();
        match action.target_type {
            TargetType::Order | TargetType::Shipping => Ok(eligible_lines.to_vec()),
            TargetType::Product | TargetType::SpecificProduct => match target {
                None if action.target_type == TargetType::Product => Ok(eligible_lines.to_vec()),
                None => Err(PromotionError::Validation(
                    "specific_product requires a target_value".to_string(),
                )),
                Some(raw) => {
                    let product_id = parse_product_id(raw)?;
                    Ok(filter_lines(ctx, eligible_lines, |item| item.product_id == product_id))
                }
            },
            TargetType::Category => match target {
                None => Ok(eligible_lines.to_vec()),
                Some(category) => Ok(filter_lines(ctx, eligible_lines, |item| item.category == category)),
            },
            TargetType::CheapestItem | TargetType::MostExpensiveItem => {
                let candidates = match target {
                    None => eligible_lines.to_vec(),
                    Some(raw) => {
                        let product_id = Uuid::from_str(raw).ok();
                        filter_lines(ctx, eligible_lines, |item| {
                            Some(item.product_id) == product_id || item.category == raw
                        })
                    }
                };
                let cheapest = action.target_type == TargetType::CheapestItem;
                let mut picked: Option<usize> = None;
                for i in candidates {
                    let price = ctx.items[i].unit_price;
                    let better = match picked {
                        None => true,
                        Some(p) if cheapest => price < ctx.items[p].unit_price,
                        Some(p) => price > ctx.items[p].unit_price,
                    };
                    if better {
                        picked = Some(i);
                    }
                }
                Ok(picked.into_iter().collect())
            }
        }
    }

    /// Free units are the cheapest matching units, capped at the quantity ordered
    fn apply_free_items(
        &self,
        promotion: &Promotion,
        action: &PromotionAction,
        value: Decimal,
        ctx: &OrderContext,
        lines: &[usize],
        result: &mut DiscountResult,
    ) {
        let available: u64 = lines.iter().map(|&i| u64::from(ctx.items[i].quantity)).sum();
        if available == 0 {
            return;
        }

        let is_buy_x_get_y = matches!(
            promotion.discount_type,
            DiscountType::BuyXGetYFree | DiscountType::BuyXGetYDiscount
        ) || data_u64(action, "buy_quantity").is_some();

        let free_units = if is_buy_x_get_y {
            let buy = data_u64(action, "buy_quantity").unwrap_or(DEFAULT_BUY_QUANTITY);
            let get = data_u64(action, "get_quantity").unwrap_or(DEFAULT_GET_QUANTITY);
            if get == 0 {
                0
            } else {
                (available / (buy + get)) * get
            }
        } else {
            data_u64(action, "quantity").unwrap_or(1).min(available)
        };

        let percent = if promotion.discount_type == DiscountType::BuyXGetYDiscount {
            value.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED)
        } else {
            Decimal::ONE_HUNDRED
        };

        let mut by_price: Vec<usize> = lines.to_vec();
        by_price.sort_by(|&a, &b| ctx.items[a].unit_price.cmp(&ctx.items[b].unit_price));

        let mut remaining = free_units;
        for i in by_price {
            if remaining == 0 {
                break;
            }
            let item = &ctx.items[i];
            let taken = remaining.min(u64::from(item.quantity));
            remaining -= taken;

            let quantity = u32::try_from(taken).unwrap_or(u32::MAX);
            let units = item.unit_price.saturating_mul(Decimal::from(quantity));
            result.amount = result.amount.saturating_add(percentage_of(units, percent));
            result.free_items.push(FreeItem {
                product_id: item.product_id,
                quantity,
                unit_price: item.unit_price,
            });
            result.scope.lines.insert(i);
        }
    }
}

/// `percent` is clamped to 0..=100, so the result never exceeds `base`
fn percentage_of(base: Decimal, percent: Decimal) -> Decimal {
    let fraction = percent.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED) / Decimal::ONE_HUNDRED;
    base.saturating_mul(fraction)
}

fn filter_lines(
    ctx: &OrderContext,
    eligible_lines: &[usize],
    predicate: impl Fn(&crate::promotions::context::LineItem) -> bool,
) -> Vec<usize> {
    eligible_lines
        .iter()
        .copied()
        .filter(|&i| ctx.items.get(i).map(&predicate).unwrap_or(false))
        .collect()
}

fn parse_product_id(raw: &str) -> PromoResult<Uuid> {
    Uuid::from_str(raw.trim())
        .map_err(|_| PromotionError::Validation(format!("'{}' is not a product id", raw)))
}

fn data_u64(action: &PromotionAction, key: &str) -> Option<u64> {
    action.action_data.as_ref()?.get(key)?.as_u64()
}

fn data_str(action: &PromotionAction, key: &str) -> Option<String> {
    Some(action.action_data.as_ref()?.get(key)?.as_str()?.to_string())
}
