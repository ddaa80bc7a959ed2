use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

use super::{ListPage, StorageAdapter, compare, lookup_path, loose_eq, project, text_of};
use crate::errors::CrudError;
use crate::filtering::{FilterOperator, Predicate, QueryDescriptor, SortOrder};

/// In-process adapter over JSON records.
///
/// Records missing an identity value get the next integer id. Nested objects can be filtered
/// and searched with dotted paths (`company.name`).
pub struct MemoryAdapter {
    identity: String,
    records: RwLock<Vec<Value>>,
    next_id: AtomicU64,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new("id")
    }
}

impl MemoryAdapter {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adapter pre-filled with records. Integer ids continue after the largest one seen.
    #[must_use]
    pub fn with_records(identity: impl Into<String>, records: Vec<Value>) -> Self {
        let identity = identity.into();
        let max_id = records
            .iter()
            .filter_map(|r| r.get(&identity).and_then(Value::as_u64))
            .max()
            .unwrap_or(0);
        Self {
            identity,
            records: RwLock::new(records),
            next_id: AtomicU64::new(max_id + 1),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn has_id(&self, record: &Value, id: &Value) -> bool {
        record.get(&self.identity).is_some_and(|v| loose_eq(v, id))
    }
}

/// Evaluate a predicate tree against one record.
pub(crate) fn matches(predicate: &Predicate, record: &Value) -> bool {
    match predicate {
        Predicate::And(children) => children.iter().all(|c| matches(c, record)),
        Predicate::Or(children) => children.is_empty() || children.iter().any(|c| matches(c, record)),
        Predicate::Field { field, op, value } => {
            let actual = lookup_path(record, field).unwrap_or(&Value::Null);
            compare_leaf(actual, *op, value)
        }
    }
}

fn compare_leaf(actual: &Value, op: FilterOperator, expected: &Value) -> bool {
    match op {
        FilterOperator::Eq => loose_eq(actual, expected),
        FilterOperator::Neq => !loose_eq(actual, expected),
        FilterOperator::Gt => !actual.is_null() && compare(actual, expected) == Ordering::Greater,
        FilterOperator::Gte => !actual.is_null() && compare(actual, expected) != Ordering::Less,
        FilterOperator::Lt => !actual.is_null() && compare(actual, expected) == Ordering::Less,
        FilterOperator::Lte => !actual.is_null() && compare(actual, expected) != Ordering::Greater,
        FilterOperator::Between => match expected.as_array().map(Vec::as_slice) {
            Some([low, high]) => {
                !actual.is_null()
                    && compare(actual, low) != Ordering::Less
                    && compare(actual, high) != Ordering::Greater
            }
            _ => false,
        },
        FilterOperator::Like | FilterOperator::ILike => {
            !actual.is_null()
                && text_of(actual)
                    .to_lowercase()
                    .contains(&text_of(expected).to_lowercase())
        }
        FilterOperator::Contains => !actual.is_null() && text_of(actual).contains(&text_of(expected)),
        FilterOperator::In => expected
            .as_array()
            .is_some_and(|items| items.iter().any(|item| loose_eq(actual, item))),
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn identity_field(&self) -> &str {
        &self.identity
    }

    async fn list(&self, query: &QueryDescriptor) -> Result<ListPage, CrudError> {
        let records = self.records.read().await;
        let mut rows: Vec<&Value> = records.iter().filter(|r| matches(&query.filter, r)).collect();

        rows.sort_by(|a, b| {
            for item in &query.sort {
                let left = lookup_path(a, &item.field).unwrap_or(&Value::Null);
                let right = lookup_path(b, &item.field).unwrap_or(&Value::Null);
                let ordering = match item.order {
                    SortOrder::Asc => compare(left, right),
                    SortOrder::Desc => compare(right, left),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        let total = rows.len() as u64;
        let skip = usize::try_from(query.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let take = query
            .take
            .map_or(usize::MAX, |t| usize::try_from(t).unwrap_or(usize::MAX));
        let items = rows
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|r| project(r.clone(), query.attributes.as_deref(), &self.identity))
            .collect();

        Ok(ListPage { items, total })
    }

    async fn details(&self, id: &Value, query: &QueryDescriptor) -> Result<Option<Value>, CrudError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| self.has_id(r, id))
            .map(|r| project(r.clone(), query.attributes.as_deref(), &self.identity)))
    }

    async fn create(&self, mut input: Map<String, Value>) -> Result<Value, CrudError> {
        if input.get(&self.identity).is_none_or(Value::is_null) {
            let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
            input.insert(self.identity.clone(), Value::from(id));
        }
        let record = Value::Object(input);
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &Value, input: Map<String, Value>) -> Result<Option<Value>, CrudError> {
        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| self.has_id(r, id)) else {
            return Ok(None);
        };
        if let Value::Object(existing) = record {
            for (key, value) in input {
                if key != self.identity {
                    existing.insert(key, value);
                }
            }
        }
        Ok(Some(record.clone()))
    }

    async fn delete(&self, id: &Value) -> Result<u64, CrudError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| !self.has_id(r, id));
        Ok((before - records.len()) as u64)
    }

    async fn exists(&self, predicate: &Predicate) -> Result<bool, CrudError> {
        let records = self.records.read().await;
        Ok(records.iter().any(|r| matches(predicate, r)))
    }

    async fn find_one(&self, predicate: &Predicate) -> Result<Option<Value>, CrudError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| matches(predicate, r)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::SortItem;
    use serde_json::json;

    fn seeded() -> MemoryAdapter {
        MemoryAdapter::with_records(
            "id",
            vec![
                json!({ "id": 1, "name": "Acme Corp", "price": 10, "company": { "name": "Parent" } }),
                json!({ "id": 2, "name": "Globex", "price": 25, "company": { "name": "Other" } }),
                json!({ "id": 3, "name": "Initech", "price": null, "company": null }),
            ],
        )
    }

    fn descriptor(filter: Predicate) -> QueryDescriptor {
        QueryDescriptor {
            filter,
            ..QueryDescriptor::default()
        }
    }

    #[tokio::test]
    async fn test_like_is_case_insensitive() {
        let page = seeded()
            .list(&descriptor(Predicate::field("name", FilterOperator::Like, "acme")))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0]["id"], 1);
    }

    #[tokio::test]
    async fn test_contains_matches_exact_case() {
        let adapter = seeded();
        let lower = adapter
            .list(&descriptor(Predicate::field("name", FilterOperator::Contains, "acme")))
            .await
            .unwrap();
        assert_eq!(lower.total, 0);

        let exact = adapter
            .list(&descriptor(Predicate::field("name", FilterOperator::Contains, "Acme")))
            .await
            .unwrap();
        assert_eq!(exact.total, 1);

        let ilike = adapter
            .list(&descriptor(Predicate::field("name", FilterOperator::ILike, "ACME")))
            .await
            .unwrap();
        assert_eq!(ilike.total, 1);
    }

    #[tokio::test]
    async fn test_numeric_ranges_skip_nulls() {
        let adapter = seeded();
        let gte = adapter
            .list(&descriptor(Predicate::field("price", FilterOperator::Gte, 10)))
            .await
            .unwrap();
        assert_eq!(gte.total, 2);

        let between = adapter
            .list(&descriptor(Predicate::field("price", FilterOperator::Between, json!([11, 30]))))
            .await
            .unwrap();
        assert_eq!(between.items[0]["name"], "Globex");
    }

    #[tokio::test]
    async fn test_nested_path_filter() {
        let page = seeded()
            .list(&descriptor(Predicate::eq("company.name", "Other")))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["id"], 2);
    }

    #[tokio::test]
    async fn test_sort_skip_take() {
        let query = QueryDescriptor {
            sort: vec![SortItem::new("name", SortOrder::Desc)],
            skip: Some(1),
            take: Some(1),
            ..QueryDescriptor::default()
        };
        let page = seeded().list(&query).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items, vec![json!({ "id": 2, "name": "Globex", "price": 25, "company": { "name": "Other" } })]);
    }

    #[tokio::test]
    async fn test_create_assigns_next_id_and_update_merges() {
        let adapter = seeded();
        let created = adapter
            .create(json!({ "name": "Umbrella" }).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(created["id"], 4);

        let updated = adapter
            .update(&json!("4"), json!({ "price": 7, "id": 99 }).as_object().cloned().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated, json!({ "id": 4, "name": "Umbrella", "price": 7 }));

        assert_eq!(adapter.delete(&json!(4)).await.unwrap(), 1);
        assert_eq!(adapter.delete(&json!(4)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exists_and_find_one() {
        let adapter = seeded();
        assert!(adapter.exists(&Predicate::eq("name", "Globex")).await.unwrap());
        assert!(!adapter.exists(&Predicate::eq("name", "globex")).await.unwrap());
        let found = adapter
            .find_one(&Predicate::field("id", FilterOperator::In, json!(["3"])))
            .await
            .unwrap();
        assert_eq!(found.unwrap()["name"], "Initech");
    }
}
