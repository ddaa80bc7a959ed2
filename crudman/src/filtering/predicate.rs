//! Backend-neutral predicate trees, sort directives and the echo types returned to clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Comparison operators for predicate leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equality (=)
    Eq,
    /// Not equal (!=)
    Neq,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// Inclusive range, value is a two-element array
    Between,
    /// Case-insensitive substring match
    Like,
    /// Case-insensitive substring match, as keyword search emits it
    ILike,
    /// Case-sensitive substring match
    Contains,
    /// Membership, value is an array
    In,
}

impl FilterOperator {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    /// Substring operators, which match against the text form of a column.
    #[must_use]
    pub fn is_substring(self) -> bool {
        matches!(self, Self::Like | Self::ILike | Self::Contains)
    }
}

/// Recursive filter tree. Leaves compare one field, composites combine children.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Field {
        field: String,
        op: FilterOperator,
        value: Value,
    },
}

impl Default for Predicate {
    fn default() -> Self {
        Self::And(Vec::new())
    }
}

impl Predicate {
    pub fn field(field: impl Into<String>, op: FilterOperator, value: impl Into<Value>) -> Self {
        Self::Field {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, FilterOperator::Eq, value)
    }

    /// AND-combine, dropping empty children and collapsing a single child.
    #[must_use]
    pub fn all(children: Vec<Predicate>) -> Self {
        Self::combine(children, Combinator::And)
    }

    /// OR-combine, dropping empty children and collapsing a single child.
    #[must_use]
    pub fn any(children: Vec<Predicate>) -> Self {
        Self::combine(children, Combinator::Or)
    }

    #[must_use]
    pub fn combine(children: Vec<Predicate>, combinator: Combinator) -> Self {
        let mut children: Vec<Predicate> = children.into_iter().filter(|p| !p.is_empty()).collect();
        if children.len() == 1 {
            return children.remove(0);
        }
        match combinator {
            Combinator::And => Self::And(children),
            Combinator::Or => Self::Or(children),
        }
    }

    /// True for a composite with no leaves anywhere below it.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.iter().all(Predicate::is_empty),
            Self::Field { .. } => false,
        }
    }

    /// Every leaf field name, in tree order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Self::Field { field, .. } => out.push(field),
        }
    }
}

/// How several uniqueness fields combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    #[default]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One sort directive, also echoed back in list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SortItem {
    pub field: String,
    pub order: SortOrder,
}

impl SortItem {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }
}

/// Echo of one applied filter, returned in list responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FilterItem {
    pub field: String,
    pub op: FilterOperator,
    #[schema(value_type = Object)]
    pub value: Value,
}

/// Split a dotted path into its relation prefix and leaf column (`company.name` ->
/// `(Some("company"), "name")`).
#[must_use]
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('.') {
        Some((relation, leaf)) => (Some(relation), leaf),
        None => (None, path),
    }
}
