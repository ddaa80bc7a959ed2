use serde_json::{Number, Value};

use super::Whitelist;
use super::predicate::{FilterItem, FilterOperator, Predicate};
use crate::config::QueryParamNames;
use crate::models::same_name;

// Basic safety limits
const MAX_FIELD_VALUE_LENGTH: usize = 10_000;

/// Basic field name validation
fn is_valid_field_name(field_name: &str) -> bool {
    !field_name.is_empty()
        && field_name.len() <= 100
        && !field_name.starts_with('_')
        && !field_name.contains("..")
}

/// Parsed filter parameters: the predicate leaves plus their client-facing echo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFilters {
    pub predicates: Vec<Predicate>,
    pub echo: Vec<FilterItem>,
}

/// Coerce to a JSON number, keeping integers integral. `NaN` and infinities are rejected.
#[must_use]
pub fn coerce_number(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(int) = raw.parse::<i64>() {
        return Some(Value::from(int));
    }
    let float = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
    Number::from_f64(float).map(Value::Number)
}

/// Split `field.op` into the field and operator, if the suffix names a known operator.
fn split_operator<'a>(key: &'a str, names: &QueryParamNames) -> (&'a str, FilterOperator) {
    if let Some((field, suffix)) = key.rsplit_once('.') {
        let ops = &names.operators;
        let op = [
            (&ops.min, FilterOperator::Gte),
            (&ops.max, FilterOperator::Lte),
            (&ops.gt, FilterOperator::Gt),
            (&ops.lt, FilterOperator::Lt),
            (&ops.between, FilterOperator::Between),
            (&ops.like, FilterOperator::Like),
            (&ops.ilike, FilterOperator::ILike),
            (&ops.not, FilterOperator::Neq),
            (&ops.in_list, FilterOperator::In),
        ]
        .into_iter()
        .find_map(|(name, op)| (name == suffix).then_some(op));
        if let Some(op) = op {
            return (field, op);
        }
    }
    (key, FilterOperator::Eq)
}

fn operand(op: FilterOperator, raw: &str) -> Option<Value> {
    match op {
        FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
            coerce_number(raw)
        }
        FilterOperator::Between => {
            let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
            let [low, high] = parts.as_slice() else {
                return None;
            };
            if low.is_empty() || high.is_empty() {
                return None;
            }
            match (coerce_number(low), coerce_number(high)) {
                (Some(low), Some(high)) => Some(Value::Array(vec![low, high])),
                _ => Some(Value::Array(vec![Value::from(*low), Value::from(*high)])),
            }
        }
        FilterOperator::In => {
            let items: Vec<Value> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Value::from)
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        FilterOperator::Eq
        | FilterOperator::Neq
        | FilterOperator::Like
        | FilterOperator::ILike
        | FilterOperator::Contains => Some(Value::from(raw)),
    }
}

/// Turn `<field>[.<op>]=value` parameters into whitelisted predicate leaves.
///
/// Empty values, reserved parameter names and fields outside the whitelist are skipped.
/// Values that fail numeric coercion for numeric operators are dropped, never errored.
#[must_use]
pub fn parse_filters(
    query: &[(String, String)],
    names: &QueryParamNames,
    reserved: &[&str],
    whitelist: &Whitelist,
) -> ParsedFilters {
    let mut parsed = ParsedFilters::default();

    for (key, raw) in query {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_FIELD_VALUE_LENGTH {
            continue;
        }
        if key.starts_with(&names.sort_prefix) || reserved.iter().any(|r| same_name(key, r)) {
            continue;
        }

        let (field, op) = split_operator(key, names);
        if !is_valid_field_name(field) {
            continue;
        }
        let Some(field) = whitelist.resolve(field) else {
            tracing::debug!(field = %field, "Dropping filter on non-whitelisted field");
            continue;
        };
        let Some(value) = operand(op, raw) else {
            tracing::warn!(field = %field, op = ?op, value = %raw, "Dropping filter with uncoercible value");
            continue;
        };

        parsed.echo.push(FilterItem {
            field: field.clone(),
            op,
            value: value.clone(),
        });
        parsed.predicates.push(Predicate::field(field, op, value));
    }

    parsed
}
