use axum::body::Bytes;
use axum::http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A file received through a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Lower-cased extension without the dot, if the filename has one.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename)
    }
}

pub(crate) fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Host-neutral view of an incoming request.
///
/// Query parameters keep their order because sort directives are applied in declaration order.
#[derive(Debug, Clone, Default)]
pub struct CrudRequest {
    pub params: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Map<String, Value>,
    pub headers: HeaderMap,
    pub files: BTreeMap<String, Vec<UploadedFile>>,
}

impl CrudRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Replace the body. Non-object values are ignored.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        if let Value::Object(map) = body {
            self.body = map;
        }
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_file(mut self, field: impl Into<String>, file: UploadedFile) -> Self {
        self.files.entry(field.into()).or_default().push(file);
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First query value whose key matches `name`, ignoring camel/snake spelling.
    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| same_name(key, name))
            .map(|(_, value)| value.as_str())
    }

    /// Identity value from the path, falling back to the body.
    #[must_use]
    pub fn identity(&self, field: &str) -> Option<Value> {
        if let Some(id) = self.params.get(field) {
            return Some(Value::String(id.clone()));
        }
        self.body.get(field).filter(|v| !v.is_null()).cloned()
    }
}

/// Normalize `per_page`, `per-page` and `perPage` to the same camelCase key.
#[must_use]
pub fn camel_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[must_use]
pub fn same_name(a: &str, b: &str) -> bool {
    a == b || camel_key(a) == camel_key(b)
}
