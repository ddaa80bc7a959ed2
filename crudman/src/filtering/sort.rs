use super::Whitelist;
use super::predicate::{SortItem, SortOrder};

/// `ASC` in any case sorts ascending, anything else descending.
#[must_use]
pub fn parse_order(sort_order: &str) -> SortOrder {
    if sort_order.trim().eq_ignore_ascii_case("asc") {
        SortOrder::Asc
    } else {
        SortOrder::Desc
    }
}

/// Collect `<prefix><field>=asc|desc` parameters in declaration order.
///
/// Fields outside the whitelist are dropped; a repeated field keeps its first direction.
#[must_use]
pub fn parse_sorting(query: &[(String, String)], prefix: &str, whitelist: &Whitelist) -> Vec<SortItem> {
    let mut sorting: Vec<SortItem> = Vec::new();
    for (key, value) in query {
        let Some(field) = key.strip_prefix(prefix) else {
            continue;
        };
        let Some(field) = whitelist.resolve(field) else {
            tracing::debug!(field = %field, "Dropping sort on non-whitelisted field");
            continue;
        };
        if sorting.iter().any(|s| s.field == field) {
            continue;
        }
        sorting.push(SortItem::new(field, parse_order(value)));
    }
    sorting
}
