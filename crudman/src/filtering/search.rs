use super::predicate::{FilterOperator, Predicate};
use crate::config::KeywordConfig;
use crate::models::same_name;

// Basic safety limits
const MAX_SEARCH_QUERY_LENGTH: usize = 10_000;
/// Longest searchable path, relation hops included (`a.b.c`).
const MAX_PATH_SEGMENTS: usize = 3;

/// Escape LIKE wildcards so user input only ever matches literally.
/// Escapes: % (match any) and _ (match single char)
#[must_use]
pub fn escape_like_wildcards(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Keyword search outcome: the OR block plus relations it needs loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordSearch {
    pub predicate: Option<Predicate>,
    pub relations: Vec<String>,
}

fn keyword_value<'a>(query: &'a [(String, String)], param: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| same_name(key, param))
        .map(|(_, value)| value.trim())
}

/// OR-combine a free-text term across the searchable fields.
///
/// Terms shorter than `min_length` characters are ignored. Paths deeper than the configured
/// relation depth, or longer than three segments, are skipped.
#[must_use]
pub fn build_keyword_search(
    query: &[(String, String)],
    config: &KeywordConfig,
    default_fields: &[String],
) -> KeywordSearch {
    let mut search = KeywordSearch::default();
    if !config.enabled {
        return search;
    }
    let Some(term) = keyword_value(query, &config.param) else {
        return search;
    };
    if term.chars().count() < config.min_length {
        return search;
    }
    let term: String = term.chars().take(MAX_SEARCH_QUERY_LENGTH).collect();

    let fields = config.searchable_fields.as_deref().unwrap_or(default_fields);
    let op = if config.case_sensitive {
        FilterOperator::Contains
    } else {
        FilterOperator::ILike
    };
    let mut leaves = Vec::new();
    for path in fields {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() > MAX_PATH_SEGMENTS || segments.len() - 1 > config.max_relation_depth {
            tracing::warn!(path = %path, "Skipping keyword path beyond allowed relation depth");
            continue;
        }
        if segments.len() > 1 {
            let relation = segments[..segments.len() - 1].join(".");
            if !search.relations.contains(&relation) {
                search.relations.push(relation);
            }
        }
        leaves.push(Predicate::field(path.clone(), op, term.clone()));
    }

    if !leaves.is_empty() {
        search.predicate = Some(Predicate::Or(leaves));
    }
    search
}
