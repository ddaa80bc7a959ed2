//! # Response Formatting
//!
//! Every action produces an [`Envelope`]. Reads are then rendered in the negotiated
//! [`ContentType`]:
//!
//! | Format | Body                                  | List metadata                         |
//! |--------|---------------------------------------|---------------------------------------|
//! | JSON   | the envelope                          | in the body                           |
//! | CSV    | one row per record, flattened columns | `X-Pagination-*`, `X-Filters`, `X-Sorting` headers |
//! | Excel  | one `data` worksheet, as an attachment| not carried                           |
//!
//! Failure envelopes are always JSON.

pub mod csv;
#[cfg(feature = "xlsx")]
pub mod xlsx;

use axum::http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::config::{ExportOptions, QueryParamNames};
use crate::errors::{CrudError, ErrorEntry};
use crate::filtering::{FilterItem, PaginationInfo, SortItem, pagination_headers};
use crate::models::CrudRequest;

/// Canonical response shape: `success` is false exactly when `errors` is non-empty or the
/// record was not found, and `data` is null on failure.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Envelope {
    #[schema(value_type = Object)]
    pub data: Value,
    pub errors: Vec<ErrorEntry>,
    pub success: bool,
    pub pagination: Option<PaginationInfo>,
    pub filters: Option<Vec<FilterItem>>,
    pub sorting: Option<Vec<SortItem>>,
    #[schema(value_type = Option<Object>)]
    pub meta: Option<Map<String, Value>>,
}

impl Envelope {
    #[must_use]
    pub fn single(data: Value) -> Self {
        Self {
            data,
            errors: Vec::new(),
            success: true,
            pagination: None,
            filters: None,
            sorting: None,
            meta: None,
        }
    }

    #[must_use]
    pub fn list(
        items: Vec<Value>,
        pagination: PaginationInfo,
        filters: Vec<FilterItem>,
        sorting: Vec<SortItem>,
    ) -> Self {
        Self {
            pagination: Some(pagination),
            filters: Some(filters),
            sorting: Some(sorting),
            ..Self::single(Value::Array(items))
        }
    }

    #[must_use]
    pub fn failure(errors: Vec<ErrorEntry>) -> Self {
        Self {
            success: false,
            errors,
            ..Self::single(Value::Null)
        }
    }

    /// No match: unsuccessful, but nothing to report.
    #[must_use]
    pub fn not_found() -> Self {
        Self::failure(Vec::new())
    }

    /// `{ "message": ... }` payload, used by delete.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("message".to_string(), Value::String(message.into()));
        Self::single(Value::Object(data))
    }

    /// Record an error. The envelope becomes a failure.
    pub fn push_error(&mut self, error: ErrorEntry) {
        self.errors.push(error);
        self.success = false;
        self.data = Value::Null;
    }

    /// Merge extra values into `meta`; later values win.
    pub fn merge_meta(&mut self, extra: Map<String, Value>) {
        if extra.is_empty() {
            return;
        }
        self.meta.get_or_insert_with(Map::new).extend(extra);
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.pagination.is_some()
    }

    /// Records carried by the envelope: the array of a list, or the single object.
    #[must_use]
    pub fn records(&self) -> Vec<&Value> {
        match &self.data {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }
}

/// Output formats a read can be rendered in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Json,
    Csv,
    Excel,
}

impl ContentType {
    /// Accepts short names, common aliases and MIME types.
    #[must_use]
    pub fn from_alias(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "application/json" => Some(Self::Json),
            "csv" | "text/csv" => Some(Self::Csv),
            "excel" | "xlsx" | "xls" | "sheet" | "spreadsheet"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(Self::Excel),
            _ => None,
        }
    }

    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

/// Pick the output format: header first, then the format query parameter.
///
/// Unknown or disallowed formats fall back to JSON.
#[must_use]
pub fn negotiate(request: &CrudRequest, export: &ExportOptions, names: &QueryParamNames) -> ContentType {
    let requested = request
        .header(&export.header)
        .or_else(|| request.query_value(&names.format))
        .and_then(ContentType::from_alias)
        .unwrap_or_default();
    if export.allowed.contains(&requested) {
        requested
    } else {
        tracing::debug!(content_type = ?requested, "Requested format not allowed; answering JSON");
        ContentType::Json
    }
}

/// A fully rendered response, ready to send or to inspect.
#[derive(Debug, Clone)]
pub struct RenderedResponse {
    pub status: StatusCode,
    pub content_type: ContentType,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RenderedResponse {
    /// JSON rendering of an envelope.
    #[must_use]
    pub fn json(status: StatusCode, envelope: &Envelope) -> Self {
        let body = serde_json::to_vec(envelope).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to serialize envelope");
            br#"{"data":null,"errors":[{"message":"Failed to serialize response"}],"success":false}"#.to_vec()
        });
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Json.mime()));
        Self {
            status,
            content_type: ContentType::Json,
            headers,
            body,
        }
    }

    fn export_failure(err: &CrudError) -> Self {
        err.log_internal();
        Self::json(err.status_code(), &err.to_envelope())
    }
}

impl IntoResponse for RenderedResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// URL-encoded JSON, safe for a header value.
fn encoded_json_header<T: Serialize>(value: &T) -> Option<HeaderValue> {
    let json = serde_json::to_string(value).ok()?;
    let encoded: String = url::form_urlencoded::byte_serialize(json.as_bytes()).collect();
    HeaderValue::from_str(&encoded).ok()
}

fn list_headers(envelope: &Envelope) -> HeaderMap {
    let mut headers = envelope
        .pagination
        .as_ref()
        .map(pagination_headers)
        .unwrap_or_default();
    if let Some(filters) = envelope.filters.as_ref().and_then(encoded_json_header) {
        headers.insert(HeaderName::from_static("x-filters"), filters);
    }
    if let Some(sorting) = envelope.sorting.as_ref().and_then(encoded_json_header) {
        headers.insert(HeaderName::from_static("x-sorting"), sorting);
    }
    headers
}

fn render_csv(envelope: &Envelope, depth: usize) -> RenderedResponse {
    let body = match csv::write(&envelope.records(), depth) {
        Ok(body) => body,
        Err(err) => return RenderedResponse::export_failure(&err),
    };
    let mut headers = if envelope.is_list() {
        list_headers(envelope)
    } else {
        HeaderMap::new()
    };
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Csv.mime()));
    RenderedResponse {
        status: StatusCode::OK,
        content_type: ContentType::Csv,
        headers,
        body,
    }
}

#[cfg(feature = "xlsx")]
fn render_excel(envelope: &Envelope, depth: usize) -> RenderedResponse {
    let body = match xlsx::write(&envelope.records(), depth) {
        Ok(body) => body,
        Err(err) => return RenderedResponse::export_failure(&err),
    };
    let mut headers = if envelope.is_list() {
        list_headers(envelope)
    } else {
        HeaderMap::new()
    };
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Excel.mime()));
    headers.insert(
        axum::http::header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"data.xlsx\""),
    );
    RenderedResponse {
        status: StatusCode::OK,
        content_type: ContentType::Excel,
        headers,
        body,
    }
}

#[cfg(not(feature = "xlsx"))]
fn render_excel(_envelope: &Envelope, _depth: usize) -> RenderedResponse {
    RenderedResponse::export_failure(&CrudError::export(
        "Excel export is unavailable: crudman was built without the `xlsx` feature",
    ))
}

/// Render an envelope. Failures always render as JSON.
#[must_use]
pub fn render(envelope: &Envelope, content_type: ContentType, flatten_depth: usize) -> RenderedResponse {
    if !envelope.success {
        return RenderedResponse::json(StatusCode::OK, envelope);
    }
    match content_type {
        ContentType::Json => RenderedResponse::json(StatusCode::OK, envelope),
        ContentType::Csv => render_csv(envelope, flatten_depth),
        ContentType::Excel => render_excel(envelope, flatten_depth),
    }
}
