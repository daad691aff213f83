//! Shared helpers for tiquetes-web integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

use tiquetes_common::config::{RootLayout, RuntimeSettings, TomlConfig};
use tiquetes_common::db::init_database;
use tiquetes_web::{build_router, AppState};

pub const BOUNDARY: &str = "tiquetes-test-boundary";

/// App over a fresh database in a temporary root folder
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub dir: TempDir,
}

pub async fn setup() -> TestApp {
    setup_with(TomlConfig::default(), |_| {}).await
}

pub async fn setup_with(config: TomlConfig, adjust: impl FnOnce(&mut RuntimeSettings)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let layout = RootLayout::new(dir.path().to_path_buf(), None);
    layout.ensure_directories().unwrap();

    let pool = init_database(&layout.database_path).await.unwrap();
    let mut settings = RuntimeSettings::load(&pool).await.unwrap();
    adjust(&mut settings);

    let state = AppState::new(pool, config, settings, layout).unwrap();
    TestApp {
        app: build_router(state.clone()),
        state,
        dir,
    }
}

/// Request without body
pub fn test_request(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn form_request(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// multipart/form-data request with text fields and `(field, filename, bytes)` files
pub fn multipart_request(
    uri: &str,
    cookie: Option<&str>,
    fields: &[(&str, &str)],
    files: &[(&str, &str, &[u8])],
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, filename, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder().method("POST").uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Extract JSON body from response; `Null` when the body is not JSON
pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub async fn extract_text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    String::from_utf8_lossy(&bytes).to_string()
}

/// Send a request and return status and JSON body
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

/// Register and log in; returns the `Cookie` header value
pub async fn register_and_login(app: &Router, username: &str) -> String {
    let body = serde_json::json!({
        "username": username,
        "email": format!("{}@planta.co", username),
        "password": "secreto123",
    });
    let (status, _) = send(app, json_request("POST", "/auth/register", None, &body)).await;
    assert_eq!(status, StatusCode::CREATED);
    login(app, username).await
}

pub async fn login(app: &Router, username: &str) -> String {
    let body = serde_json::json!({"username": username, "password": "secreto123"});
    let response = app
        .clone()
        .oneshot(json_request("POST", "/auth/login", None, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("login sets a cookie");
    set_cookie.split(';').next().unwrap().to_string()
}

/// Register a manual entry; returns the guide code
pub async fn entrada_manual(app: &Router, cookie: &str, codigo_proveedor: &str) -> String {
    let request = multipart_request(
        "/entrada/registrar-manual",
        Some(cookie),
        &[
            ("codigo_proveedor", codigo_proveedor),
            ("nombre_proveedor", "Finca La Esperanza"),
            ("cantidad_racimos", "120"),
            ("placa", "ABC123"),
            ("transportador", "Transportes del Llano"),
        ],
        &[("imagen_tiquete", "tiquete.jpg", b"\xff\xd8\xff\xe0fake-jpeg")],
    );
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK, "manual entry failed: {}", body);
    body["codigo_guia"].as_str().unwrap().to_string()
}
