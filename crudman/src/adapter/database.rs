use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, Func, LikeExpr, SimpleExpr};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ColumnType, Condition, ConnectionTrait,
    DatabaseBackend, DatabaseConnection, EntityTrait, IdenStatic, IntoActiveModel, Iterable, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TryIntoModel,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use uuid::Uuid;

use super::{ListPage, StorageAdapter, project, text_of};
use crate::errors::CrudError;
use crate::filtering::{FilterOperator, Predicate, QueryDescriptor, SortOrder, escape_like_wildcards};
use crate::models::same_name;
use crate::schema::{FieldKind, ModelSchema};

/// Adapter for any Sea-ORM entity whose model round-trips through serde.
///
/// ```ignore
/// let adapter = SeaOrmAdapter::<company::Entity, company::ActiveModel>::new(db.clone());
/// ```
///
/// Fields are matched against column names in either camelCase or snake_case. A leaf naming an
/// unknown column, a dotted relation path, or a value that does not fit the column type matches
/// nothing.
pub struct SeaOrmAdapter<E, A> {
    db: Option<DatabaseConnection>,
    schema: ModelSchema,
    _entity: PhantomData<fn() -> (E, A)>,
}

impl<E: EntityTrait, A> SeaOrmAdapter<E, A> {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db: Some(db),
            schema: ModelSchema::from_entity::<E>(),
            _entity: PhantomData,
        }
    }

    /// Adapter without a connection; every call fails with "Repository not provided".
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            db: None,
            schema: ModelSchema::from_entity::<E>(),
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    fn connection(&self) -> Result<&DatabaseConnection, CrudError> {
        self.db
            .as_ref()
            .ok_or_else(|| CrudError::repository_unavailable(self.schema.name.clone()))
    }

    fn column(field: &str) -> Option<E::Column> {
        E::Column::iter().find(|column| same_name(column.as_str(), field))
    }

    fn kind_of(&self, column: E::Column) -> FieldKind {
        self.schema
            .field(column.as_str())
            .map_or(FieldKind::Any, |f| f.kind)
    }

    fn identity_column(&self) -> Result<E::Column, CrudError> {
        Self::column(&self.schema.identity_field).ok_or_else(|| {
            CrudError::internal(
                "Identity column missing",
                Some(format!("{} has no column {}", self.schema.name, self.schema.identity_field)),
            )
        })
    }

    fn condition(&self, predicate: &Predicate, backend: DatabaseBackend) -> Condition {
        match predicate {
            Predicate::And(children) => children
                .iter()
                .fold(Condition::all(), |acc, child| acc.add(self.condition(child, backend))),
            Predicate::Or(children) if children.is_empty() => Condition::all(),
            Predicate::Or(children) => children
                .iter()
                .fold(Condition::any(), |acc, child| acc.add(self.condition(child, backend))),
            Predicate::Field { field, op, value } => {
                let expr = self.leaf(field, *op, value, backend).unwrap_or_else(|| {
                    tracing::debug!(field = %field, "Filter leaf cannot be evaluated; matching nothing");
                    match_nothing()
                });
                Condition::all().add(expr)
            }
        }
    }

    fn leaf(
        &self,
        field: &str,
        op: FilterOperator,
        value: &Value,
        backend: DatabaseBackend,
    ) -> Option<SimpleExpr> {
        let column = Self::column(field)?;
        let kind = self.kind_of(column);

        Some(match op {
            FilterOperator::Eq if value.is_null() => column.is_null(),
            FilterOperator::Neq if value.is_null() => column.is_not_null(),
            FilterOperator::Eq => column.eq(db_value(kind, value)?),
            FilterOperator::Neq => column.ne(db_value(kind, value)?),
            FilterOperator::Gt => column.gt(db_value(kind, value)?),
            FilterOperator::Gte => column.gte(db_value(kind, value)?),
            FilterOperator::Lt => column.lt(db_value(kind, value)?),
            FilterOperator::Lte => column.lte(db_value(kind, value)?),
            FilterOperator::Between => {
                let [low, high] = value.as_array()?.as_slice() else {
                    return None;
                };
                column.between(db_value(kind, low)?, db_value(kind, high)?)
            }
            FilterOperator::In => {
                let values = value
                    .as_array()?
                    .iter()
                    .map(|v| db_value(kind, v))
                    .collect::<Option<Vec<_>>>()?;
                column.is_in(values)
            }
            FilterOperator::Like | FilterOperator::ILike => {
                let pattern = format!("%{}%", escape_like_wildcards(&text_of(value)).to_uppercase());
                Expr::expr(Func::upper(Self::text_target(column, kind, backend)))
                    .like(LikeExpr::new(pattern).escape('\\'))
            }
            FilterOperator::Contains => {
                // LIKE ignores case on SQLite and MySQL's default collations; search by position
                let needle = text_of(value);
                let position = match backend {
                    DatabaseBackend::Postgres => Func::cust(Alias::new("STRPOS"))
                        .arg(Self::text_target(column, kind, backend))
                        .arg(needle),
                    DatabaseBackend::MySql => Func::cust(Alias::new("INSTR"))
                        .arg(Expr::cast_as(Expr::col((E::default(), column)), Alias::new("BINARY")))
                        .arg(Expr::cast_as(Expr::val(needle), Alias::new("BINARY"))),
                    DatabaseBackend::Sqlite => Func::cust(Alias::new("INSTR"))
                        .arg(Expr::col((E::default(), column)))
                        .arg(needle),
                };
                Expr::expr(position).gt(0)
            }
        })
    }

    /// Column as text; Postgres will not apply string functions to other types without a cast.
    fn text_target(column: E::Column, kind: FieldKind, backend: DatabaseBackend) -> SimpleExpr {
        if backend == DatabaseBackend::Postgres && !kind.is_textual() {
            Expr::cast_as(Expr::col((E::default(), column)), Alias::new("TEXT"))
        } else {
            Expr::col((E::default(), column)).into()
        }
    }

    fn identity_condition(&self, id: &Value, backend: DatabaseBackend) -> Condition {
        self.condition(&Predicate::eq(self.schema.identity_field.clone(), id.clone()), backend)
    }
}

fn match_nothing() -> SimpleExpr {
    SimpleExpr::Custom("1 = 0".to_string())
}

/// Convert a JSON value into a bind value fitting the column kind.
fn db_value(kind: FieldKind, value: &Value) -> Option<sea_orm::Value> {
    match kind {
        FieldKind::Integer => integer_of(value).map(sea_orm::Value::from),
        FieldKind::Float => float_of(value).map(sea_orm::Value::from),
        FieldKind::Boolean => bool_of(value).map(sea_orm::Value::from),
        FieldKind::Uuid => Uuid::parse_str(text_of(value).trim()).ok().map(sea_orm::Value::from),
        FieldKind::Date => {
            let text = text_of(value);
            Some(
                chrono::NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                    .map_or_else(|_| sea_orm::Value::from(text.clone()), sea_orm::Value::from),
            )
        }
        FieldKind::DateTime => {
            let text = text_of(value);
            Some(datetime_of(text.trim()).map_or_else(|| sea_orm::Value::from(text.clone()), sea_orm::Value::from))
        }
        _ => Some(sea_orm::Value::from(text_of(value))),
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn bool_of(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn datetime_of(text: &str) -> Option<chrono::NaiveDateTime> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| chrono::NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Value that deserializes into a non-null column of this type. Columns filled this way are
/// marked `NotSet` before the insert so database defaults apply.
fn placeholder(column_type: &ColumnType) -> Option<Value> {
    Some(match column_type {
        ColumnType::TinyInteger
        | ColumnType::SmallInteger
        | ColumnType::Integer
        | ColumnType::BigInteger
        | ColumnType::TinyUnsigned
        | ColumnType::SmallUnsigned
        | ColumnType::Unsigned
        | ColumnType::BigUnsigned => Value::from(0),
        ColumnType::Float | ColumnType::Double | ColumnType::Decimal(_) => Value::from(0.0),
        ColumnType::Boolean => Value::Bool(false),
        ColumnType::Char(_) | ColumnType::String(_) | ColumnType::Text => Value::from(""),
        ColumnType::Uuid => Value::from(Uuid::nil().to_string()),
        ColumnType::Date => Value::from("1970-01-01"),
        ColumnType::DateTime | ColumnType::Timestamp => Value::from("1970-01-01T00:00:00"),
        ColumnType::TimestampWithTimeZone => Value::from("1970-01-01T00:00:00Z"),
        ColumnType::Json | ColumnType::JsonBinary => Value::Null,
        ColumnType::Binary(_) | ColumnType::VarBinary(_) => Value::Array(Vec::new()),
        _ => return None,
    })
}

#[async_trait]
impl<E, A> StorageAdapter for SeaOrmAdapter<E, A>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<A> + Serialize + for<'de> Deserialize<'de> + Sync,
    A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + TryIntoModel<E::Model> + Send + Sync + 'static,
{
    fn identity_field(&self) -> &str {
        &self.schema.identity_field
    }

    async fn list(&self, query: &QueryDescriptor) -> Result<ListPage, CrudError> {
        let db = self.connection()?;
        let backend = db.get_database_backend();
        let condition = self.condition(&query.filter, backend);

        if !query.relations.is_empty() {
            tracing::debug!(
                relations = ?query.relations,
                "Relation loading needs a custom adapter; returning base columns"
            );
        }

        let total = E::find().filter(condition.clone()).count(db).await?;

        let mut select = E::find().filter(condition);
        for item in &query.sort {
            let Some(column) = Self::column(&item.field) else {
                tracing::debug!(field = %item.field, "Skipping sort on unknown column");
                continue;
            };
            let order = match item.order {
                SortOrder::Asc => Order::Asc,
                SortOrder::Desc => Order::Desc,
            };
            select = select.order_by(column, order);
        }
        if let Some(skip) = query.skip {
            select = select.offset(skip);
        }
        if let Some(take) = query.take {
            select = select.limit(take);
        }

        let items = select
            .all(db)
            .await?
            .into_iter()
            .map(|model| {
                serde_json::to_value(model)
                    .map(|record| project(record, query.attributes.as_deref(), &self.schema.identity_field))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListPage { items, total })
    }

    async fn details(&self, id: &Value, query: &QueryDescriptor) -> Result<Option<Value>, CrudError> {
        let db = self.connection()?;
        let condition = self.identity_condition(id, db.get_database_backend());
        match E::find().filter(condition).one(db).await? {
            Some(model) => Ok(Some(project(
                serde_json::to_value(model)?,
                query.attributes.as_deref(),
                &self.schema.identity_field,
            ))),
            None => Ok(None),
        }
    }

    async fn create(&self, mut input: Map<String, Value>) -> Result<Value, CrudError> {
        let db = self.connection()?;
        let identity = self.identity_column()?;

        if input.get(identity.as_str()).is_none_or(Value::is_null)
            && self.kind_of(identity) == FieldKind::Uuid
        {
            input.insert(identity.as_str().to_string(), Value::from(Uuid::new_v4().to_string()));
        }

        let mut unset = Vec::new();
        for column in E::Column::iter() {
            let key = column.as_str();
            if input.get(key).is_some_and(|v| !v.is_null()) {
                continue;
            }
            let def = column.def();
            if def.is_null() {
                continue;
            }
            if let Some(value) = placeholder(def.get_column_type()) {
                input.insert(key.to_string(), value);
                unset.push(column);
            }
        }

        let mut active = A::from_json(Value::Object(input))?;
        for column in unset {
            active.not_set(column);
        }
        let model = active.insert(db).await?;
        Ok(serde_json::to_value(model)?)
    }

    async fn update(&self, id: &Value, input: Map<String, Value>) -> Result<Option<Value>, CrudError> {
        let db = self.connection()?;
        let condition = self.identity_condition(id, db.get_database_backend());
        let Some(existing) = E::find().filter(condition).one(db).await? else {
            return Ok(None);
        };

        let mut merged = serde_json::to_value(&existing)?;
        if let Value::Object(target) = &mut merged {
            for (key, value) in input {
                if key != self.schema.identity_field {
                    target.insert(key, value);
                }
            }
        }

        let mut active: A = existing.into_active_model();
        active.set_from_json(merged)?;
        let model = active.update(db).await?;
        Ok(Some(serde_json::to_value(model)?))
    }

    async fn delete(&self, id: &Value) -> Result<u64, CrudError> {
        let db = self.connection()?;
        let condition = self.identity_condition(id, db.get_database_backend());
        let result = E::delete_many().filter(condition).exec(db).await?;
        Ok(result.rows_affected)
    }

    async fn exists(&self, predicate: &Predicate) -> Result<bool, CrudError> {
        let db = self.connection()?;
        let condition = self.condition(predicate, db.get_database_backend());
        Ok(E::find().filter(condition).count(db).await? > 0)
    }

    async fn find_one(&self, predicate: &Predicate) -> Result<Option<Value>, CrudError> {
        let db = self.connection()?;
        let condition = self.condition(predicate, db.get_database_backend());
        match E::find().filter(condition).one(db).await? {
            Some(model) => Ok(Some(serde_json::to_value(model)?)),
            None => Ok(None),
        }
    }

    /// Rename keys to column names and coerce form strings into the column's type.
    fn normalize_input(&self, raw: Map<String, Value>) -> Map<String, Value> {
        raw.into_iter()
            .map(|(key, value)| {
                let Some(column) = Self::column(&key) else {
                    return (key, value);
                };
                let spec = self.schema.field(column.as_str());
                let kind = spec.map_or(FieldKind::Any, |f| f.kind);
                let nullable = spec.is_some_and(|f| f.nullable);
                let value = match &value {
                    Value::String(s) if s.is_empty() && nullable && !kind.is_textual() => Value::Null,
                    Value::String(_) => match kind {
                        FieldKind::Integer => integer_of(&value).map_or(value, Value::from),
                        FieldKind::Float => float_of(&value).map_or(value, Value::from),
                        FieldKind::Boolean => bool_of(&value).map_or(value, Value::Bool),
                        _ => value,
                    },
                    _ => value,
                };
                (column.as_str().to_string(), value)
            })
            .collect()
    }
}
