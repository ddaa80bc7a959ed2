//! # Query Translation
//!
//! Turns raw query-string pairs into a backend-neutral [`QueryDescriptor`]: a whitelisted
//! predicate tree, ordered sort directives, pagination and the relations to load. Invalid input
//! is dropped rather than rejected, so consumer-supplied query strings never fail a request.
//!
//! ## Query Parameter Examples
//!
//! ```text
//! GET /companies?name=Acme                       equality
//! GET /companies?name.like=acme                  case-insensitive substring
//! GET /companies?name.ilike=ACME                 case-insensitive substring
//! GET /companies?employees.min=10                >= 10
//! GET /companies?employees.max=99                <= 99
//! GET /companies?founded.between=2001,2010       inclusive range
//! GET /companies?id.in=1,2,3                     membership
//! GET /companies?sort.name=asc&sort.id=desc      multi-key ordering
//! GET /companies?keyword=acme                    OR over searchable fields
//! GET /companies?page=2&perPage=10               pagination
//! GET /companies?paginate=false                  every matching row
//! ```

pub mod conditions;
pub mod pagination;
pub mod predicate;
pub mod search;
pub mod sort;

pub use conditions::{ParsedFilters, coerce_number, parse_filters};
pub use pagination::{PageRequest, PaginationInfo, build_info, pagination_headers, parse_pagination};
pub use predicate::{Combinator, FilterItem, FilterOperator, Predicate, SortItem, SortOrder, split_path};
pub use search::{KeywordSearch, build_keyword_search, escape_like_wildcards};
pub use sort::{parse_order, parse_sorting};

use crate::config::{KeywordConfig, PaginationPolicy, QueryParamNames};
use crate::models::same_name;

/// Fields a request may filter or sort on.
///
/// Matching ignores camelCase/snake_case spelling; the whitelisted spelling is what callers see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    fields: Vec<String>,
}

impl Whitelist {
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.fields.iter().find(|f| same_name(f, name)).cloned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Everything the translator needs besides the raw parameters.
#[derive(Debug, Clone, Copy)]
pub struct TranslateOptions<'a> {
    pub whitelist: &'a Whitelist,
    pub names: &'a QueryParamNames,
    pub pagination: &'a PaginationPolicy,
    pub keyword: &'a KeywordConfig,
    /// Keyword fields used when the keyword config lists none.
    pub searchable_fields: &'a [String],
    pub base_filter: Option<&'a Predicate>,
    pub default_order: &'a [SortItem],
    pub relations: &'a [String],
    pub attributes: Option<&'a [String]>,
}

/// Backend-neutral query for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub filter: Predicate,
    pub sort: Vec<SortItem>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub relations: Vec<String>,
    pub attributes: Option<Vec<String>>,
    pub page: PageRequest,
    /// Applied filters, echoed to the client.
    pub filters: Vec<FilterItem>,
    /// Sort directives parsed from the request, echoed to the client.
    pub sorting: Vec<SortItem>,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self {
            filter: Predicate::default(),
            sort: Vec::new(),
            skip: None,
            take: None,
            relations: Vec::new(),
            attributes: None,
            page: PageRequest::disabled(),
            filters: Vec::new(),
            sorting: Vec::new(),
        }
    }
}

impl QueryDescriptor {
    /// Descriptor with only relations and attributes, used for single-record lookups.
    #[must_use]
    pub fn for_record(relations: &[String], attributes: Option<&[String]>) -> Self {
        Self {
            relations: relations.to_vec(),
            attributes: attributes.map(<[String]>::to_vec),
            ..Self::default()
        }
    }
}

/// Translate raw parameters into a [`QueryDescriptor`].
#[must_use]
pub fn translate(query: &[(String, String)], options: &TranslateOptions<'_>) -> QueryDescriptor {
    let names = options.names;
    let page = parse_pagination(query, names, options.pagination);
    let sorting = parse_sorting(query, &names.sort_prefix, options.whitelist);

    let reserved = [
        names.page.as_str(),
        names.per_page.as_str(),
        names.paginate.as_str(),
        options.keyword.param.as_str(),
        names.format.as_str(),
    ];
    let parsed = parse_filters(query, names, &reserved, options.whitelist);
    let keyword = build_keyword_search(query, options.keyword, options.searchable_fields);

    let mut clauses = Vec::new();
    if let Some(base) = options.base_filter {
        clauses.push(base.clone());
    }
    clauses.extend(parsed.predicates);
    if let Some(block) = keyword.predicate {
        clauses.push(block);
    }

    let mut relations = options.relations.to_vec();
    for relation in keyword.relations {
        if !relations.contains(&relation) {
            relations.push(relation);
        }
    }

    let sort = if sorting.is_empty() {
        options.default_order.to_vec()
    } else {
        sorting.clone()
    };

    tracing::debug!(
        filters = parsed.echo.len(),
        sort = sort.len(),
        paginated = page.enabled,
        "Translated query parameters"
    );

    QueryDescriptor {
        filter: Predicate::all(clauses),
        sort,
        skip: page.skip(),
        take: page.take(),
        relations,
        attributes: options.attributes.map(<[String]>::to_vec),
        page,
        filters: parsed.echo,
        sorting,
    }
}
