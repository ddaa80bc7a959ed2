//! Validation Support
//!
//! A [`ValidationEngine`] turns a [`ModelSchema`] into a [`RuleSet`] and checks request bodies
//! against it. The default engine, [`SchemaValidator`], covers the column types a schema can
//! describe. Register another engine on the registry or on a single section to replace it.
//!
//! # Example
//!
//! ```rust,ignore
//! use crudman::validation::{FieldRule, RuleType};
//!
//! let hooks = Hooks::new().final_rules(|_ctx, rules| async move {
//!     Ok(rules.with("email", FieldRule::new(RuleType::Email)))
//! });
//! ```

mod schema;
pub mod validators;

pub use schema::SchemaValidator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::ErrorEntry;
use crate::schema::ModelSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Email,
    Url,
    Uuid,
    Any,
}

/// Constraints for one field. `min`/`max` bound the length of strings and the value of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(rename = "type")]
    pub kind: RuleType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub nullable: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Allowed values.
    pub one_of: Option<Vec<Value>>,
}

impl FieldRule {
    #[must_use]
    pub fn new(kind: RuleType) -> Self {
        Self {
            kind,
            optional: false,
            nullable: false,
            min: None,
            max: None,
            one_of: None,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.one_of = Some(values);
        self
    }
}

/// Field rules plus the strictness flag. A strict set rejects fields it has no rule for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub fields: BTreeMap<String, FieldRule>,
    pub strict: bool,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the rule for `field`.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(field.into(), rule);
        self
    }

    #[must_use]
    pub fn without(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.fields
            .iter()
            .find(|(name, _)| crate::models::same_name(name, field))
            .map(|(_, rule)| rule)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[async_trait]
pub trait ValidationEngine: Send + Sync {
    /// Rules for a create (`is_update == false`) or update body.
    async fn generate_rules(&self, schema: &ModelSchema, is_update: bool) -> RuleSet;

    /// Every violation, not just the first.
    async fn validate(&self, input: &Map<String, Value>, rules: &RuleSet) -> Result<(), Vec<ErrorEntry>>;
}
