use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::{PaginationPolicy, QueryParamNames};
use crate::models::same_name;

/// Values that turn pagination off when sent in the disable parameter.
const DISABLE_VALUES: [&str; 3] = ["false", "0", "no"];

/// Largest offset a signed 64-bit SQL `OFFSET` accepts.
const MAX_OFFSET: u64 = i64::MAX.unsigned_abs();

/// Pagination requested by the client, after defaults, clamping and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub per_page: u64,
    pub enabled: bool,
}

impl PageRequest {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            page: 1,
            per_page: 0,
            enabled: false,
        }
    }

    #[must_use]
    pub fn skip(&self) -> Option<u64> {
        self.enabled
            .then(|| self.page.saturating_sub(1).saturating_mul(self.per_page).min(MAX_OFFSET))
    }

    #[must_use]
    pub fn take(&self) -> Option<u64> {
        self.enabled.then_some(self.per_page)
    }
}

/// Pagination block of a list envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub page: u64,
    pub per_page: u64,
    pub total_items_count: u64,
    pub total_pages_count: u64,
    pub is_having_next_page: bool,
    pub is_having_previous_page: bool,
}

impl Default for PaginationInfo {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 0,
            total_items_count: 0,
            total_pages_count: 0,
            is_having_next_page: false,
            is_having_previous_page: false,
        }
    }
}

fn lookup<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| same_name(key, name))
        .map(|(_, value)| value.trim())
}

/// Parse page/perPage/paginate parameters.
///
/// Invalid numbers fall back to defaults; `perPage` is clamped to `1..=max_per_page` and never
/// errors.
#[must_use]
pub fn parse_pagination(
    query: &[(String, String)],
    names: &QueryParamNames,
    policy: &PaginationPolicy,
) -> PageRequest {
    if !policy.enabled {
        return PageRequest::disabled();
    }

    let raw_page = lookup(query, &names.page);
    let raw_per_page = lookup(query, &names.per_page);

    if policy.allow_disable {
        let flag_off = lookup(query, &names.paginate)
            .is_some_and(|v| DISABLE_VALUES.contains(&v.to_ascii_lowercase().as_str()));
        let zero_per_page = raw_per_page.and_then(|v| v.parse::<i64>().ok()) == Some(0);
        if flag_off || zero_per_page {
            return PageRequest::disabled();
        }
    }

    if !policy.default_enabled && raw_page.is_none() && raw_per_page.is_none() {
        return PageRequest::disabled();
    }

    let page = raw_page
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(1)
        .max(1);
    let mut per_page = raw_per_page
        .and_then(|v| v.parse::<i64>().ok())
        .map_or(policy.default_per_page, |n| u64::try_from(n.max(1)).unwrap_or(1))
        .max(1);
    if let Some(max) = policy.max_per_page {
        per_page = per_page.min(max.max(1));
    }

    PageRequest {
        page: page.unsigned_abs(),
        per_page,
        enabled: true,
    }
}

/// Build the pagination block once the adapter reported the total.
#[must_use]
pub fn build_info(request: &PageRequest, total: u64, returned: usize) -> PaginationInfo {
    if !request.enabled {
        let count = returned as u64;
        return PaginationInfo {
            page: 1,
            per_page: count,
            total_items_count: total.max(count),
            total_pages_count: 1,
            is_having_next_page: false,
            is_having_previous_page: false,
        };
    }

    let total_pages = total.div_ceil(request.per_page);
    PaginationInfo {
        page: request.page,
        per_page: request.per_page,
        total_items_count: total,
        total_pages_count: total_pages,
        is_having_next_page: request.page < total_pages,
        is_having_previous_page: request.page > 1,
    }
}

/// Strip characters that are not allowed in header values.
fn sanitize_header_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect()
}

/// Pagination metadata as `X-Pagination-*` headers, for formats without a metadata channel.
#[must_use]
pub fn pagination_headers(info: &PaginationInfo) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs = [
        ("x-pagination-total", info.total_items_count),
        ("x-pagination-page", info.page),
        ("x-pagination-perpage", info.per_page),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&sanitize_header_value(&value.to_string())) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}
