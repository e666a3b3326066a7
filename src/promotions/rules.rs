// Rule Engine
//
// Evaluates a promotion's dynamic predicates against an order context.
// Grouping policy: rules sharing a `rule_group` fold left-to-right using each
// rule's own `logical_operator` (the first rule's connective is ignored); groups
// are visited in ascending group number and combine with OR. No rules means the
// promotion is unconstrained.
//
// A rule that cannot be evaluated (unknown field, malformed operand, operator not
// applicable to the field's type) is false on its own and never aborts the rest.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::promotions::context::{Field, FieldValue, OrderContext, Resolved, ValueKind};
use crate::promotions::error::{PromoResult, PromotionError};
use crate::promotions::models::PromotionRule;
use crate::promotions::types::{LogicalOperator, RuleOperator};

/// Parsed right-hand side of a rule
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Single(FieldValue),
    List(Vec<FieldValue>),
    Range(FieldValue, FieldValue),
}

/// Stateless evaluator for promotion rules
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    /// Create a new RuleEngine
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every rule of a promotion; true when any group is satisfied
    pub fn evaluate_rules(&self, rules: &[PromotionRule], ctx: &OrderContext) -> bool {
        if rules.is_empty() {
            return true;
        }

        let mut groups: BTreeMap<i32, Vec<&PromotionRule>> = BTreeMap::new();
        for rule in rules {
            groups.entry(rule.rule_group).or_default().push(rule);
        }
        for members in groups.values_mut() {
            members.sort_by_key(|rule| rule.position);
        }

        groups.iter().any(|(group, members)| {
            let satisfied = self.evaluate_group(members, ctx);
            tracing::debug!("Rule group {} evaluated to {}", group, satisfied);
            satisfied
        })
    }

    fn evaluate_group(&self, rules: &[&PromotionRule], ctx: &OrderContext) -> bool {
        let mut iter = rules.iter();
        let Some(first) = iter.next() else {
            return true;
        };

        let mut acc = self.evaluate_rule_or_false(first, ctx);
        for rule in iter {
            acc = match rule.logical_operator {
                LogicalOperator::And => acc && self.evaluate_rule_or_false(rule, ctx),
                LogicalOperator::Or => acc || self.evaluate_rule_or_false(rule, ctx),
            };
        }
        acc
    }

    fn evaluate_rule_or_false(&self, rule: &PromotionRule, ctx: &OrderContext) -> bool {
        match self.evaluate_rule(rule, ctx) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    "Rule {} ({} {} {:?}) treated as false: {}",
                    rule.id,
                    rule.field_name,
                    rule.operator,
                    rule.value,
                    e
                );
                false
            }
        }
    }

    /// Evaluate a single rule
    ///
    /// Returns a Validation error when the rule cannot be evaluated; callers that
    /// fold rules turn that into `false`.
    pub fn evaluate_rule(&self, rule: &PromotionRule, ctx: &OrderContext) -> PromoResult<bool> {
        let field = Field::parse(rule.rule_type, &rule.field_name).ok_or_else(|| {
            PromotionError::Validation(format!("unknown field '{}'", rule.field_name))
        })?;
        let operand = parse_operand(rule.operator, field.kind(), &rule.value)?;

        let result = match ctx.resolve(field) {
            Resolved::Missing => false,
            Resolved::One(value) => apply_operator(rule.operator, &value, &operand)?,
            Resolved::Many(values) => {
                if rule.operator.is_negative() {
                    // Negative operators hold only if no value matches
                    let mut all = true;
                    for value in &values {
                        all &= apply_operator(rule.operator, value, &operand)?;
                    }
                    all
                } else {
                    let mut any = false;
                    for value in &values {
                        any |= apply_operator(rule.operator, value, &operand)?;
                    }
                    any
                }
            }
        };

        tracing::debug!(
            "Rule {} {} {} {:?} => {}",
            rule.id,
            rule.field_name,
            rule.operator,
            rule.value,
            result
        );
        Ok(result)
    }
}

fn parse_operand(operator: RuleOperator, kind: ValueKind, raw: &str) -> PromoResult<Operand> {
    match operator {
        RuleOperator::In | RuleOperator::NotIn => {
            let values = raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| parse_value(kind, part))
                .collect::<PromoResult<Vec<_>>>()?;
            if values.is_empty() {
                return Err(PromotionError::Validation(format!("empty list '{}'", raw)));
            }
            Ok(Operand::List(values))
        }
        RuleOperator::Between => {
            let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
            match parts.as_slice() {
                [low, high] => Ok(Operand::Range(parse_value(kind, low)?, parse_value(kind, high)?)),
                _ => Err(PromotionError::Validation(format!(
                    "between expects 'low,high', got '{}'",
                    raw
                ))),
            }
        }
        _ => Ok(Operand::Single(parse_value(kind, raw.trim())?)),
    }
}

fn parse_value(kind: ValueKind, raw: &str) -> PromoResult<FieldValue> {
    match kind {
        ValueKind::Text => Ok(FieldValue::Text(raw.to_string())),
        ValueKind::Number => Decimal::from_str(raw)
            .map(FieldValue::Number)
            .map_err(|_| PromotionError::Validation(format!("'{}' is not a number", raw))),
        ValueKind::Date => parse_date(raw)
            .map(FieldValue::Date)
            .ok_or_else(|| PromotionError::Validation(format!("'{}' is not a date", raw))),
    }
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC)
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

fn ordering(actual: &FieldValue, expected: &FieldValue) -> PromoResult<Ordering> {
    match (actual, expected) {
        (FieldValue::Number(a), FieldValue::Number(b)) => Ok(a.cmp(b)),
        (FieldValue::Date(a), FieldValue::Date(b)) => Ok(a.cmp(b)),
        _ => Err(PromotionError::Validation(format!(
            "cannot order '{}' against '{}'",
            actual, expected
        ))),
    }
}

fn apply_operator(operator: RuleOperator, actual: &FieldValue, operand: &Operand) -> PromoResult<bool> {
    match (operator, operand) {
        (RuleOperator::Equals, Operand::Single(expected)) => Ok(actual == expected),
        (RuleOperator::NotEquals, Operand::Single(expected)) => Ok(actual != expected),
        (RuleOperator::GreaterThan, Operand::Single(expected)) => {
            Ok(ordering(actual, expected)? == Ordering::Greater)
        }
        (RuleOperator::LessThan, Operand::Single(expected)) => {
            Ok(ordering(actual, expected)? == Ordering::Less)
        }
        (RuleOperator::GreaterEqual, Operand::Single(expected)) => {
            Ok(ordering(actual, expected)? != Ordering::Less)
        }
        (RuleOperator::LessEqual, Operand::Single(expected)) => {
            Ok(ordering(actual, expected)? != Ordering::Greater)
        }
        (RuleOperator::Contains, Operand::Single(FieldValue::Text(needle))) => match actual {
            FieldValue::Text(haystack) => Ok(haystack.contains(needle.as_str())),
            other => Err(PromotionError::Validation(format!(
                "contains requires a text field, got '{}'",
                other
            ))),
        },
        (RuleOperator::In, Operand::List(values)) => Ok(values.contains(actual)),
        (RuleOperator::NotIn, Operand::List(values)) => Ok(!values.contains(actual)),
        (RuleOperator::Between, Operand::Range(low, high)) => {
            Ok(ordering(actual, low)? != Ordering::Less && ordering(actual, high)? != Ordering::Greater)
        }
        (operator, _) => Err(PromotionError::Validation(format!(
            "operator {} is not applicable here",
            operator
        ))),
    }
}
