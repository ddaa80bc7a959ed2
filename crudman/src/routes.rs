//! # HTTP Binding
//!
//! Mounts every enabled action of every registered section on an axum [`Router`]:
//!
//! ```rust,ignore
//! let service = Arc::new(CrudService::new(registry));
//! let app = Router::new().nest("/api", crudman::router(service));
//! ```
//!
//! Requests are extracted into a [`CrudRequest`]: path parameters, ordered query pairs,
//! headers, and a body read from JSON, urlencoded forms or multipart forms. Multipart file
//! parts become uploads; text parts become body fields.

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, RawPathParams, Request},
    http::{StatusCode, Uri, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ActionKind;
use crate::errors::CrudError;
use crate::models::{CrudRequest, UploadedFile};
use crate::service::CrudService;

impl<S: Send + Sync> FromRequest<S> for CrudRequest {
    type Rejection = CrudError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();

        let params = match RawPathParams::from_request_parts(&mut parts, state).await {
            Ok(raw) => raw
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            Err(_) => BTreeMap::new(),
        };
        let query = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut request = CrudRequest {
            params,
            query,
            headers: parts.headers.clone(),
            ..CrudRequest::default()
        };
        let req = Request::from_parts(parts, body);

        if content_type.starts_with("multipart/form-data") {
            read_multipart(&mut request, req, state).await?;
            return Ok(request);
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|err| CrudError::bad_request(err.body_text()))?;
        if bytes.is_empty() {
            return Ok(request);
        }
        if content_type.starts_with("application/x-www-form-urlencoded") {
            for (key, value) in url::form_urlencoded::parse(&bytes).into_owned() {
                insert_form_value(&mut request.body, key, value);
            }
            return Ok(request);
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => request.body = map,
            Ok(Value::Null) => {}
            Ok(_) => return Err(CrudError::bad_request("Request body must be a JSON object")),
            Err(err) => {
                tracing::debug!(error = %err, "Rejecting malformed JSON body");
                return Err(CrudError::bad_request("Malformed JSON body"));
            }
        }
        Ok(request)
    }
}

async fn read_multipart<S: Send + Sync>(request: &mut CrudRequest, req: Request, state: &S) -> Result<(), CrudError> {
    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|err| CrudError::bad_request(err.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| CrudError::bad_request(err.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| CrudError::bad_request(err.body_text()))?;
                let name = name.strip_suffix("[]").map_or(name.clone(), str::to_string);
                request
                    .files
                    .entry(name)
                    .or_default()
                    .push(UploadedFile::new(filename, content_type, data));
            }
            None => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| CrudError::bad_request(err.body_text()))?;
                insert_form_value(&mut request.body, name, text);
            }
        }
    }
    Ok(())
}

/// Repeated keys and `name[]` keys collect into arrays.
fn insert_form_value(body: &mut Map<String, Value>, key: String, value: String) {
    let (key, force_array) = match key.strip_suffix("[]") {
        Some(stripped) => (stripped.to_string(), true),
        None => (key, false),
    };
    let value = Value::String(value);
    match body.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None if force_array => {
            body.insert(key, Value::Array(vec![value]));
        }
        None => {
            body.insert(key, value);
        }
    }
}

async fn dispatch(service: Arc<CrudService>, section: String, action: ActionKind, request: CrudRequest) -> Response {
    match service.respond(&section, action, request).await {
        Ok(Some(rendered)) => rendered.into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn unknown_section(uri: Uri) -> Response {
    let section = uri.path().trim_start_matches('/').split('/').next().unwrap_or_default();
    CrudError::section_not_found(section).into_response()
}

/// Router with one route per enabled action. Unmatched paths answer "Invalid section".
///
/// The request body limit follows [`Registry::body_limit`](crate::registry::Registry::body_limit).
pub fn router(service: Arc<CrudService>) -> Router {
    let mut grouped: BTreeMap<String, MethodRouter> = BTreeMap::new();

    for route in service.registry().routes() {
        let Ok(filter) = MethodFilter::try_from(route.method.clone()) else {
            tracing::warn!(method = %route.method, path = %route.path, "Skipping route with unsupported method");
            continue;
        };
        let handler = {
            let service = Arc::clone(&service);
            let section = route.section.clone();
            let action = route.action;
            move |request: CrudRequest| dispatch(service, section, action, request)
        };
        tracing::debug!(method = %route.method, path = %route.path, action = %route.action, "Mounting route");
        let methods = grouped.remove(&route.path).unwrap_or_default();
        grouped.insert(route.path, methods.on(filter, handler));
    }

    let body_limit = match service.registry().body_limit() {
        Some(bytes) => DefaultBodyLimit::max(bytes),
        None => DefaultBodyLimit::disable(),
    };
    grouped
        .into_iter()
        .fold(Router::new(), |router, (path, methods)| router.route(&path, methods))
        .fallback(unknown_section)
        .layer(body_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::config::ResourceSection;
    use crate::registry::Registry;
    use crate::schema::{FieldKind, FieldSpec, ModelSchema};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request as HttpRequest};
    use serde_json::json;
    use tower::ServiceExt;

    fn app() -> Router {
        let schema = ModelSchema::new("companies")
            .with_field(FieldSpec::new("id", FieldKind::Integer).primary())
            .with_field(FieldSpec::new("name", FieldKind::String))
            .with_field(FieldSpec::new("employees", FieldKind::Integer).nullable());
        let adapter = MemoryAdapter::with_records(
            "id",
            vec![
                json!({ "id": 1, "name": "Acme", "employees": 10 }),
                json!({ "id": 2, "name": "Globex", "employees": 200 }),
            ],
        );
        let registry = Registry::builder()
            .section(ResourceSection::new("companies", schema).adapter(adapter))
            .build();
        router(Arc::new(CrudService::new(registry)))
    }

    async fn send(app: Router, request: HttpRequest<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn json_body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_and_details() {
        let request = HttpRequest::builder()
            .uri("/companies?sort.name=desc")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["data"][0]["name"], "Globex");
        assert_eq!(body["sorting"], json!([{ "field": "name", "order": "DESC" }]));

        let request = HttpRequest::builder().uri("/companies/1").body(Body::empty()).unwrap();
        let (_, body) = send(app(), request).await;
        assert_eq!(json_body(&body)["data"]["name"], "Acme");
    }

    #[tokio::test]
    async fn test_create_from_json_and_form() {
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/companies")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"Hooli","employees":5}"#))
            .unwrap();
        let (status, body) = send(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["data"]["id"], 3);

        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/companies")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=Initech&employees=abc"))
            .unwrap();
        let (_, body) = send(app(), request).await;
        let body = json_body(&body);
        assert_eq!(body["success"], false);
        assert_eq!(body["errors"][0]["field"], "employees");
    }

    #[tokio::test]
    async fn test_multipart_fields_and_files() {
        let boundary = "XBOUNDARY";
        let payload = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nPied Piper\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"logo\"; filename=\"logo.png\"\r\n\
             Content-Type: image/png\r\n\r\nPNGDATA\r\n--{boundary}--\r\n"
        );
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/companies")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(payload))
            .unwrap();
        let extracted = CrudRequest::from_request(request, &()).await.unwrap();
        assert_eq!(extracted.body["name"], "Pied Piper");
        let logo = &extracted.files["logo"][0];
        assert_eq!(logo.filename, "logo.png");
        assert_eq!(logo.content_type, "image/png");
        assert_eq!(&logo.data[..], b"PNGDATA");
    }

    #[tokio::test]
    async fn test_delete_then_missing() {
        let request = HttpRequest::builder()
            .method(Method::DELETE)
            .uri("/companies/2")
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(app(), request).await;
        assert_eq!(json_body(&body)["data"]["message"], "Successfully deleted");
    }

    #[tokio::test]
    async fn test_unknown_section_and_bad_json() {
        let request = HttpRequest::builder().uri("/ghosts").body(Body::empty()).unwrap();
        let (status, body) = send(app(), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&body)["errors"][0]["message"], "Invalid section");

        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/companies")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_form_values_collect_into_arrays() {
        let mut body = Map::new();
        insert_form_value(&mut body, "tags[]".to_string(), "a".to_string());
        insert_form_value(&mut body, "name".to_string(), "x".to_string());
        insert_form_value(&mut body, "name".to_string(), "y".to_string());
        assert_eq!(Value::Object(body), json!({ "tags": ["a"], "name": ["x", "y"] }));
    }
}
