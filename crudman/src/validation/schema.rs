use async_trait::async_trait;
use serde_json::{Map, Value};

use super::validators::{required, validate_email, validate_length, validate_range, validate_url, wrong_type};
use super::{FieldRule, RuleSet, RuleType, ValidationEngine};
use crate::errors::ErrorEntry;
use crate::models::same_name;
use crate::schema::{FieldKind, FieldSpec, ModelSchema};

/// Timestamp columns managed by the store, never accepted from clients.
const MANAGED_TIMESTAMPS: [&str; 4] = ["created_at", "updated_at", "modified_at", "deleted_at"];

/// Default [`ValidationEngine`], driven entirely by the model schema.
///
/// - Managed timestamps get no rule; the identity field gets none on create.
/// - On update every field is optional (the identity usually travels in the path); nullable
///   fields always are.
/// - Textual fields named `email` (or ending in `_email`) are checked as addresses.
/// - The generated set is strict whenever it has at least one rule.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn rule_for(field: &FieldSpec) -> FieldRule {
        let kind = match field.kind {
            FieldKind::String | FieldKind::Text if is_email_name(&field.name) => RuleType::Email,
            FieldKind::String | FieldKind::Text => RuleType::String,
            FieldKind::Integer => RuleType::Integer,
            FieldKind::Float => RuleType::Number,
            FieldKind::Boolean => RuleType::Boolean,
            FieldKind::Date | FieldKind::DateTime => RuleType::Date,
            FieldKind::Uuid => RuleType::Uuid,
            FieldKind::Json | FieldKind::Binary | FieldKind::Any => RuleType::Any,
        };
        let mut rule = FieldRule::new(kind);
        if let Some(max) = field.max_length {
            rule = rule.max(f64::from(max));
        }
        rule
    }
}

fn is_email_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "email" || lower.ends_with("_email")
}

fn is_managed_timestamp(name: &str) -> bool {
    MANAGED_TIMESTAMPS.iter().any(|ts| same_name(ts, name))
}

fn lookup<'a>(input: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    input
        .get(field)
        .or_else(|| input.iter().find(|(key, _)| same_name(key, field)).map(|(_, v)| v))
}

fn is_date(text: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(text).is_ok()
        || chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn check_value(field: &str, rule: &FieldRule, value: &Value) -> Result<(), ErrorEntry> {
    match rule.kind {
        RuleType::String | RuleType::Email | RuleType::Url => {
            let Value::String(text) = value else {
                return Err(wrong_type(field, "string", "a string"));
            };
            validate_length(
                field,
                text,
                rule.min.map(|m| m as usize),
                rule.max.map(|m| m as usize),
            )?;
            match rule.kind {
                RuleType::Email => validate_email(field, text),
                RuleType::Url => validate_url(field, text),
                _ => Ok(()),
            }
        }
        RuleType::Integer => {
            let Some(number) = value.as_f64() else {
                return Err(wrong_type(field, "number", "a number"));
            };
            if number.fract() != 0.0 {
                return Err(wrong_type(field, "numberInteger", "an integer"));
            }
            validate_range(field, number, rule.min, rule.max)
        }
        RuleType::Number => {
            let Some(number) = value.as_f64() else {
                return Err(wrong_type(field, "number", "a number"));
            };
            validate_range(field, number, rule.min, rule.max)
        }
        RuleType::Boolean if value.is_boolean() => Ok(()),
        RuleType::Boolean => Err(wrong_type(field, "boolean", "a boolean")),
        RuleType::Date => match value {
            Value::String(text) if is_date(text.trim()) => Ok(()),
            _ => Err(wrong_type(field, "date", "a Date")),
        },
        RuleType::Uuid => match value {
            Value::String(text) if uuid::Uuid::parse_str(text.trim()).is_ok() => Ok(()),
            _ => Err(wrong_type(field, "uuid", "a valid UUID")),
        },
        RuleType::Any => Ok(()),
    }
}

#[async_trait]
impl ValidationEngine for SchemaValidator {
    async fn generate_rules(&self, schema: &ModelSchema, is_update: bool) -> RuleSet {
        let mut rules = RuleSet::new();
        for field in &schema.fields {
            let is_identity = same_name(&field.name, &schema.identity_field);
            if is_managed_timestamp(&field.name) || (is_identity && !is_update) {
                continue;
            }
            let mut rule = Self::rule_for(field);
            if field.nullable {
                rule = rule.nullable().optional();
            }
            if is_update {
                rule = rule.optional();
            }
            rules.fields.insert(field.name.clone(), rule);
        }
        rules.strict = !rules.is_empty();
        rules
    }

    async fn validate(&self, input: &Map<String, Value>, rules: &RuleSet) -> Result<(), Vec<ErrorEntry>> {
        let mut errors = Vec::new();

        for (field, rule) in &rules.fields {
            match lookup(input, field) {
                None if rule.optional => {}
                Some(Value::Null) if rule.nullable || rule.optional => {}
                None | Some(Value::Null) => errors.push(required(field)),
                Some(value) => {
                    if let Err(error) = check_value(field, rule, value) {
                        errors.push(error);
                    } else if let Some(allowed) = &rule.one_of
                        && !allowed.contains(value)
                    {
                        errors.push(ErrorEntry::for_field(
                            field.clone(),
                            "enumValue",
                            format!("The '{field}' field value does not match any of the allowed values."),
                        ));
                    }
                }
            }
        }

        if rules.strict {
            for key in input.keys() {
                if rules.get(key).is_none() {
                    errors.push(ErrorEntry::for_field(
                        key.clone(),
                        "objectStrict",
                        format!("The '{key}' field is not allowed."),
                    ));
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
