//! Condition Evaluation
//!
//! Evaluates step gating conditions against an execution context.
//! Evaluation never fails: a condition that cannot be evaluated
//! (non-numeric comparison, containment on a scalar) is logged as a
//! warning and treated as `false`.

use log::warn;
use serde_json::Value;

use crate::error::ConditionEvaluationError;

use super::model::{Condition, ConditionType, Context};

/// Stateless evaluator for [`Condition`] lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Returns true when every condition holds. An empty list always holds.
    ///
    /// Conditions are AND-ed in order and evaluation stops at the first
    /// `false`.
    pub fn evaluate(&self, conditions: &[Condition], context: &Context) -> bool {
        conditions
            .iter()
            .all(|condition| self.evaluate_one(condition, context))
    }

    /// Evaluates a single condition, degrading errors to `false`.
    pub fn evaluate_one(&self, condition: &Condition, context: &Context) -> bool {
        match self.check(condition, context) {
            Ok(result) => result,
            Err(e) => {
                warn!("Condition on '{}' treated as false: {}", condition.field, e);
                false
            }
        }
    }

    /// Evaluates a single condition, surfacing malformed comparisons.
    pub fn check(
        &self,
        condition: &Condition,
        context: &Context,
    ) -> Result<bool, ConditionEvaluationError> {
        let field_value = lookup(context, &condition.field);
        let expected = &condition.value;

        match condition.condition_type {
            ConditionType::Equals => Ok(values_equal(field_value, expected)),
            ConditionType::NotEquals => Ok(!values_equal(field_value, expected)),
            ConditionType::GreaterThan => {
                compare_numbers(&condition.field, field_value, expected).map(|(a, b)| a > b)
            }
            ConditionType::LessThan => {
                compare_numbers(&condition.field, field_value, expected).map(|(a, b)| a < b)
            }
            ConditionType::Contains => match field_value {
                None | Some(Value::Null) => Ok(false),
                Some(haystack) => contains(&condition.field, haystack, expected),
            },
            ConditionType::NotContains => match field_value {
                None | Some(Value::Null) => Ok(true),
                Some(haystack) => contains(&condition.field, haystack, expected).map(|found| !found),
            },
            ConditionType::Exists => Ok(!is_null(field_value)),
            ConditionType::NotExists => Ok(is_null(field_value)),
        }
    }
}

/// Resolves a field against the context.
///
/// A literal top-level key wins; otherwise the field is split on `.` and
/// walked through nested objects, with numeric segments indexing arrays.
pub fn lookup<'a>(context: &'a Context, field: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(field) {
        return Some(value);
    }

    let mut segments = field.split('.');
    let mut current = context.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn is_null(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Equality with absent fields treated as null and numbers compared by value.
fn values_equal(field_value: Option<&Value>, expected: &Value) -> bool {
    let actual = field_value.unwrap_or(&Value::Null);
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn compare_numbers(
    field: &str,
    field_value: Option<&Value>,
    expected: &Value,
) -> Result<(f64, f64), ConditionEvaluationError> {
    let not_numeric = || ConditionEvaluationError::NotNumeric {
        field: field.to_string(),
        expected: expected.to_string(),
    };

    let actual = field_value.and_then(Value::as_f64).ok_or_else(not_numeric)?;
    let expected = expected.as_f64().ok_or_else(not_numeric)?;
    Ok((actual, expected))
}

fn contains(field: &str, haystack: &Value, needle: &Value) -> Result<bool, ConditionEvaluationError> {
    match haystack {
        Value::String(text) => match needle {
            Value::String(fragment) => Ok(text.contains(fragment.as_str())),
            other => Err(ConditionEvaluationError::InvalidNeedle {
                field: field.to_string(),
                value: other.to_string(),
            }),
        },
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(Some(item), needle))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(ConditionEvaluationError::InvalidNeedle {
                field: field.to_string(),
                value: other.to_string(),
            }),
        },
        _ => Err(ConditionEvaluationError::NotContainer(field.to_string())),
    }
}
