// Upload Pipeline Test
// Multipart and data-URL uploads through the HTTP binding

use axum::body::Body;
use axum::http::Request;
use crudman::upload::UploadMapEntry;
use crudman::{ActionConfig, CrudService, LocalDiskStorage, ModuleOptions, Registry, ResourceSection, UploadSpec};
use image::{ImageFormat, RgbImage};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;

mod common;
use common::{TestResponse, companies_section, send, send_json, setup_test_app, setup_test_db};

const BOUNDARY: &str = "crudman-test-boundary";

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    RgbImage::new(width, height)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

fn multipart(fields: &[(&str, &str)], file: (&str, &str, &str, &[u8])) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    let (name, filename, content_type, data) = file;
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post_multipart(app: &axum::Router, body: Vec<u8>) -> TestResponse {
    send_multipart(app, "POST", "/api/v1/companies", body).await
}

async fn send_multipart(app: &axum::Router, method: &str, uri: &str, body: Vec<u8>) -> TestResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

const FIELDS: [(&str, &str); 4] = [("name", "Pied Piper"), ("employees", "9"), ("price", "1.5"), ("active", "true")];

fn section_with(db: &sea_orm::DatabaseConnection, declaration: &str) -> ResourceSection {
    companies_section(db).defaults(
        ActionConfig::new().uploads(UploadSpec::new().field("logo", declaration).storage("memory")),
    )
}

#[tokio::test]
async fn test_multipart_upload_is_stored_and_referenced() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let app = setup_test_app(section_with(&db, "image"), ModuleOptions::default());

    let response = post_multipart(&app, multipart(&FIELDS, ("logo", "logo.png", "image/png", &png(8, 8)))).await;
    let body = response.json();
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["data"]["employees"], 9);
    assert_eq!(body["data"]["active"], true);
    let logo = body["data"]["logo"].as_str().unwrap_or_default();
    assert!(logo.starts_with("memory://"), "{logo}");
    assert!(logo.ends_with(".png"), "{logo}");
}

#[tokio::test]
async fn test_bad_extension_rejects_before_storing() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let app = setup_test_app(section_with(&db, "image"), ModuleOptions::default());

    let response = post_multipart(
        &app,
        multipart(&FIELDS, ("logo", "logo.exe", "application/x-msdownload", b"MZ")),
    )
    .await;
    assert_eq!(response.status, 200);
    let body = response.json();
    assert_eq!(body["success"], false);
    let kinds: Vec<_> = body["errors"]
        .as_array()
        .map(|errors| errors.iter().filter_map(|e| e["type"].as_str()).collect())
        .unwrap_or_default();
    assert!(kinds.contains(&"fileExtension"), "{body}");
    assert_eq!(body["errors"][0]["field"], "logo");

    let list = send_json(&app, "GET", "/api/v1/companies", &json!({})).await.json();
    assert_eq!(list["pagination"]["totalItemsCount"], 0);
}

#[tokio::test]
async fn test_avatar_dimensions_are_checked() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let app = setup_test_app(section_with(&db, "image-avatar"), ModuleOptions::default());

    let small = post_multipart(&app, multipart(&FIELDS, ("logo", "me.png", "image/png", &png(64, 64)))).await;
    assert_eq!(small.json()["errors"][0]["type"], "imageDimensions");

    let wide = post_multipart(&app, multipart(&FIELDS, ("logo", "me.png", "image/png", &png(400, 200)))).await;
    assert_eq!(wide.json()["errors"][0]["type"], "imageAspectRatio");

    let square = post_multipart(&app, multipart(&FIELDS, ("logo", "me.png", "image/png", &png(256, 256)))).await;
    assert_eq!(square.json()["success"], true);
}

#[tokio::test]
async fn test_data_url_kept_inline_in_base64_mode() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let app = setup_test_app(section_with(&db, "image:base64"), ModuleOptions::default());

    let data_url = "data:image/png;base64,iVBORw0KGgo=";
    let response = send_json(
        &app,
        "POST",
        "/api/v1/companies",
        &json!({ "name": "Inline", "employees": 1, "price": 1.0, "active": true, "logo": data_url }),
    )
    .await;
    let body = response.json();
    assert_eq!(body["success"], true, "{body}");
    assert_eq!(body["data"]["logo"], data_url);
}

#[tokio::test]
async fn test_malformed_data_url_is_rejected() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let app = setup_test_app(section_with(&db, "image:base64"), ModuleOptions::default());

    let response = send_json(
        &app,
        "POST",
        "/api/v1/companies",
        &json!({ "name": "Broken", "employees": 1, "price": 1.0, "active": true, "logo": "data:image/png;base64,@@@" }),
    )
    .await;
    assert_eq!(response.json()["errors"][0]["type"], "fileEncoding");
}

#[tokio::test]
async fn test_disk_storage_replaces_previous_file() {
    let db = setup_test_db().await.expect("Failed to setup test database");
    let dir = tempfile::tempdir().unwrap();
    let uploads = UploadSpec::new().entry(
        UploadMapEntry::shorthand("logo", "image")
            .storage("disk")
            .key_prefix("logos")
            .delete_on_replace(true),
    );
    let registry = Registry::builder()
        .storage("disk", LocalDiskStorage::new(dir.path()))
        .section(companies_section(&db).defaults(ActionConfig::new().uploads(uploads)))
        .build();
    let app = axum::Router::new().nest("/api/v1", crudman::router(Arc::new(CrudService::new(registry))));

    let created = post_multipart(&app, multipart(&FIELDS, ("logo", "a.png", "image/png", &png(4, 4)))).await.json();
    assert_eq!(created["success"], true, "{created}");
    let first_key = created["data"]["logo"].as_str().unwrap().to_string();
    assert!(first_key.starts_with("logos/"), "{first_key}");
    assert!(dir.path().join(&first_key).exists());

    let id = created["data"]["id"].as_i64().unwrap();
    let updated = send_multipart(
        &app,
        "PATCH",
        &format!("/api/v1/companies/{id}"),
        multipart(&[], ("logo", "b.png", "image/png", &png(6, 6))),
    )
    .await
    .json();
    assert_eq!(updated["success"], true, "{updated}");
    let second_key = updated["data"]["logo"].as_str().unwrap();
    assert_ne!(second_key, first_key);
    assert!(dir.path().join(second_key).exists());
    assert!(!dir.path().join(&first_key).exists());
}

#[tokio::test]
async fn test_files_above_two_megabytes_reach_the_size_check() {
    let db = setup_test_db().await.expect("Failed to setup test database");

    let app = setup_test_app(section_with(&db, "video-mp4"), ModuleOptions::default());
    let clip = vec![0_u8; 3 * 1024 * 1024];
    let body = post_multipart(&app, multipart(&FIELDS, ("logo", "a.mp4", "video/mp4", &clip))).await.json();
    assert_eq!(body["success"], true, "{}", body["errors"]);
    assert!(body["data"]["logo"].as_str().is_some_and(|url| url.ends_with(".mp4")));

    let app = setup_test_app(section_with(&db, "pdf"), ModuleOptions::default());
    let report = vec![0_u8; 21 * 1024 * 1024];
    let body = post_multipart(&app, multipart(&FIELDS, ("logo", "r.pdf", "application/pdf", &report))).await.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["type"], "fileSize");
    assert!(body["errors"][0]["message"].as_str().unwrap_or_default().starts_with("File too large"));
}
