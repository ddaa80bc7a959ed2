use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::filtering::{Combinator, Predicate, SortItem, SortOrder};
use crate::hooks::Hooks;
use crate::upload::UploadSpec;

/// The six operations every section can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    List,
    Details,
    Create,
    Update,
    Save,
    Delete,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        Self::List,
        Self::Details,
        Self::Create,
        Self::Update,
        Self::Save,
        Self::Delete,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Details => "details",
            Self::Create => "create",
            Self::Update => "update",
            Self::Save => "save",
            Self::Delete => "delete",
        }
    }

    /// Reads are cached and content-negotiated.
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(self, Self::List | Self::Details)
    }

    /// Writes invalidate the cache.
    #[must_use]
    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    /// Writes that carry a body through uploads and validation.
    #[must_use]
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Save)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator suffix names (`price.min=10`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorNames {
    pub min: String,
    pub max: String,
    pub gt: String,
    pub lt: String,
    pub between: String,
    pub like: String,
    pub ilike: String,
    pub not: String,
    pub in_list: String,
}

impl Default for OperatorNames {
    fn default() -> Self {
        Self {
            min: "min".to_string(),
            max: "max".to_string(),
            gt: "gt".to_string(),
            lt: "lt".to_string(),
            between: "between".to_string(),
            like: "like".to_string(),
            ilike: "ilike".to_string(),
            not: "not".to_string(),
            in_list: "in".to_string(),
        }
    }
}

/// Names of the reserved query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParamNames {
    pub page: String,
    pub per_page: String,
    pub paginate: String,
    pub sort_prefix: String,
    /// Query-string alternative to the content-type header.
    pub format: String,
    pub operators: OperatorNames,
}

impl Default for QueryParamNames {
    fn default() -> Self {
        Self {
            page: "page".to_string(),
            per_page: "perPage".to_string(),
            paginate: "paginate".to_string(),
            sort_prefix: "sort.".to_string(),
            format: "format".to_string(),
            operators: OperatorNames::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationPolicy {
    pub enabled: bool,
    /// Honour `paginate=false` and `perPage=0`.
    pub allow_disable: bool,
    /// When false, pagination only applies if `page` or `perPage` is sent.
    pub default_enabled: bool,
    pub default_per_page: u64,
    pub max_per_page: Option<u64>,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_disable: true,
            default_enabled: true,
            default_per_page: 30,
            max_per_page: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub enabled: bool,
    pub param: String,
    pub min_length: usize,
    /// Dotted paths; `None` means every textual column.
    pub searchable_fields: Option<Vec<String>>,
    pub max_relation_depth: usize,
    /// Match the term's exact casing instead of ignoring case.
    pub case_sensitive: bool,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            param: "keyword".to_string(),
            min_length: 2,
            searchable_fields: None,
            max_relation_depth: 1,
            case_sensitive: false,
        }
    }
}

/// Per-action cache policy. A missing TTL falls back to the module default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_seconds: Option<u64>,
}

/// Settings for one action. Every field is optional so section defaults can fill gaps.
#[derive(Debug, Clone, Default)]
pub struct ActionConfig {
    pub whitelist: Option<Vec<String>>,
    pub keyword: Option<KeywordConfig>,
    pub pagination: Option<PaginationPolicy>,
    pub params: Option<QueryParamNames>,
    pub unique_fields: Option<Vec<String>>,
    pub unique_combinator: Option<Combinator>,
    pub cache: Option<CachePolicy>,
    pub uploads: Option<UploadSpec>,
    pub base_filter: Option<Predicate>,
    pub order_by: Option<Vec<SortItem>>,
    pub relations: Option<Vec<String>>,
    pub attributes: Option<Vec<String>>,
    pub hooks: Hooks,
}

impl ActionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn whitelist<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn keyword(mut self, keyword: KeywordConfig) -> Self {
        self.keyword = Some(keyword);
        self
    }

    #[must_use]
    pub fn pagination(mut self, pagination: PaginationPolicy) -> Self {
        self.pagination = Some(pagination);
        self
    }

    #[must_use]
    pub fn params(mut self, params: QueryParamNames) -> Self {
        self.params = Some(params);
        self
    }

    /// Reject writes whose values collide with an existing record on these fields.
    #[must_use]
    pub fn unique<I, S>(mut self, fields: I, combinator: Combinator) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_fields = Some(fields.into_iter().map(Into::into).collect());
        self.unique_combinator = Some(combinator);
        self
    }

    #[must_use]
    pub fn cache(mut self, ttl_seconds: Option<u64>) -> Self {
        self.cache = Some(CachePolicy {
            enabled: true,
            ttl_seconds,
        });
        self
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache = Some(CachePolicy {
            enabled: false,
            ttl_seconds: None,
        });
        self
    }

    #[must_use]
    pub fn uploads(mut self, uploads: UploadSpec) -> Self {
        self.uploads = Some(uploads);
        self
    }

    #[must_use]
    pub fn base_filter(mut self, predicate: Predicate) -> Self {
        self.base_filter = Some(predicate);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by
            .get_or_insert_with(Vec::new)
            .push(SortItem::new(field, order));
        self
    }

    #[must_use]
    pub fn relations<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relations = Some(relations.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Values set on `self` win over those on `base`. Neither side is mutated.
    #[must_use]
    pub fn merged_over(&self, base: &ActionConfig) -> ActionConfig {
        fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
            over.clone().or_else(|| base.clone())
        }
        ActionConfig {
            whitelist: pick(&self.whitelist, &base.whitelist),
            keyword: pick(&self.keyword, &base.keyword),
            pagination: pick(&self.pagination, &base.pagination),
            params: pick(&self.params, &base.params),
            unique_fields: pick(&self.unique_fields, &base.unique_fields),
            unique_combinator: pick(&self.unique_combinator, &base.unique_combinator),
            cache: pick(&self.cache, &base.cache),
            uploads: pick(&self.uploads, &base.uploads),
            base_filter: pick(&self.base_filter, &base.base_filter),
            order_by: pick(&self.order_by, &base.order_by),
            relations: pick(&self.relations, &base.relations),
            attributes: pick(&self.attributes, &base.attributes),
            hooks: self.hooks.merged_over(&base.hooks),
        }
    }
}
