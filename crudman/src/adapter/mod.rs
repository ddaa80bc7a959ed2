//! # Storage Adapters
//!
//! The [`StorageAdapter`] trait is the seam between the orchestrator and a backing store. The
//! orchestrator only ever hands adapters a [`QueryDescriptor`] or a [`Predicate`]; how those
//! become queries is the adapter's business.
//!
//! Two adapters ship with the crate:
//!
//! - [`SeaOrmAdapter`]: any Sea-ORM entity, on SQLite, Postgres or MySQL.
//! - [`MemoryAdapter`]: JSON records held in process, for tests and prototypes.
//!
//! Both treat [`FilterOperator::Like`](crate::FilterOperator::Like) and `ILike` as a
//! case-insensitive substring match, and `Contains` as a case-sensitive one.

pub mod database;
pub mod memory;

pub use database::SeaOrmAdapter;
pub use memory::MemoryAdapter;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::errors::CrudError;
use crate::filtering::{Combinator, FilterOperator, Predicate, QueryDescriptor};

/// One page of records plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub items: Vec<Value>,
    pub total: u64,
}

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Name of the identity field (`id` unless the adapter says otherwise).
    fn identity_field(&self) -> &str {
        "id"
    }

    async fn list(&self, query: &QueryDescriptor) -> Result<ListPage, CrudError>;

    async fn details(&self, id: &Value, query: &QueryDescriptor) -> Result<Option<Value>, CrudError>;

    async fn create(&self, input: Map<String, Value>) -> Result<Value, CrudError>;

    /// `None` when no record has this id.
    async fn update(&self, id: &Value, input: Map<String, Value>) -> Result<Option<Value>, CrudError>;

    /// Upsert: update when the identity field is in the path or body, create otherwise.
    async fn save(
        &self,
        params: &BTreeMap<String, String>,
        input: Map<String, Value>,
    ) -> Result<Option<Value>, CrudError> {
        let field = self.identity_field();
        let id = params
            .get(field)
            .map(|id| Value::String(id.clone()))
            .or_else(|| input.get(field).filter(|v| !v.is_null()).cloned());
        match id {
            Some(id) => self.update(&id, input).await,
            None => self.create(input).await.map(Some),
        }
    }

    /// Number of records removed.
    async fn delete(&self, id: &Value) -> Result<u64, CrudError>;

    async fn exists(&self, predicate: &Predicate) -> Result<bool, CrudError>;

    async fn find_one(&self, predicate: &Predicate) -> Result<Option<Value>, CrudError>;

    /// Prepare a raw body for persistence.
    fn normalize_input(&self, raw: Map<String, Value>) -> Map<String, Value> {
        raw
    }

    /// Predicate matching records that collide with `values` on `fields`, excluding the record
    /// being updated. `None` when no field carries a value.
    fn build_uniqueness_predicate(
        &self,
        exclude_id: Option<&Value>,
        fields: &[String],
        values: &Map<String, Value>,
        combinator: Combinator,
    ) -> Option<Predicate> {
        let leaves: Vec<Predicate> = fields
            .iter()
            .filter_map(|field| {
                values
                    .get(field)
                    .filter(|v| !v.is_null())
                    .map(|v| Predicate::eq(field.clone(), v.clone()))
            })
            .collect();
        if leaves.is_empty() {
            return None;
        }
        let collision = Predicate::combine(leaves, combinator);
        Some(match exclude_id {
            Some(id) => Predicate::all(vec![
                collision,
                Predicate::field(self.identity_field(), FilterOperator::Neq, id.clone()),
            ]),
            None => collision,
        })
    }
}

// ============================================================================
// Shared JSON helpers
// ============================================================================

/// Numbers compare numerically, everything else by its string form.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => match (a, b) {
            (Value::Null, _) | (_, Value::Null) => false,
            _ => text_of(a) == text_of(b),
        },
    }
}

/// Total order used for sorting and range comparisons. Nulls sort first.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => text_of(a).cmp(&text_of(b)),
        },
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Follow a dotted path through nested objects.
pub(crate) fn lookup_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |current, segment| current.get(segment))
}

/// Keep only the selected attributes (identity always survives).
pub(crate) fn project(record: Value, attributes: Option<&[String]>, identity: &str) -> Value {
    let (Some(attributes), Value::Object(map)) = (attributes, &record) else {
        return record;
    };
    let projected: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| key.as_str() == identity || attributes.iter().any(|a| a == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(projected)
}
