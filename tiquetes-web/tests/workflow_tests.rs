//! Workflow tests against local mocks of the Make.com webhooks and the
//! Roboflow workflow API
//!
//! The mock records every request it receives so tests can check what the
//! service sent out.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use common::*;
use tiquetes_common::config::{RoboflowConfig, TomlConfig, WebhookConfig};

const TICKET_REPLY: &str = "\
| Campo | Original | Sugerido |
|-------|----------|----------|
| Nombre del Agricultor | Finca La Esperanza | Finca La Esperanza |
| Código | 0150076A | 0150076A |
| Cantidad de Racimos | 120 | 120 |
| Placa | ABC 123 | ABC123 |

**Nota de Validación:** La placa fue corregida.";

const REVALIDATION_REPLY: &str = "```json
{\"data\": {\"codigo\": \"0150076A\", \"nombre_agricultor\": \"Finca La Esperanza\", \"racimos\": \"120\", \"placa\": \"ABC123\"}}
```";

const SCALE_REPLY: &str = "Exitoso! Guia de transporte SAP: \"8001\" El peso es: \"15230\" kg";

const TARE_REPLY: &str = "Exitoso! El peso tara es: 5120 tm";

/// Requests received by the mock, as `(hook, body)`
#[derive(Clone, Default)]
struct Recibidos(Arc<Mutex<Vec<(String, Value)>>>);

impl Recibidos {
    fn push(&self, hook: &str, body: Value) {
        self.0.lock().unwrap().push((hook.to_string(), body));
    }

    fn de(&self, hook: &str) -> Vec<Value> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == hook)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

/// Text fields of a multipart body, plus the file field names under `_files`
async fn campos_multipart(mut multipart: Multipart) -> Value {
    let mut campos = serde_json::Map::new();
    let mut files = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_some() {
            files.push(Value::String(name));
            let _ = field.bytes().await;
        } else {
            campos.insert(name, Value::String(field.text().await.unwrap_or_default()));
        }
    }
    campos.insert("_files".to_string(), Value::Array(files));
    Value::Object(campos)
}

async fn mock_process(State(r): State<Recibidos>, multipart: Multipart) -> &'static str {
    r.push("process", campos_multipart(multipart).await);
    TICKET_REPLY
}

async fn mock_not_a_ticket(multipart: Multipart) -> &'static str {
    campos_multipart(multipart).await;
    "La imagen no corresponde a un tiquete de fruta."
}

async fn mock_placa(multipart: Multipart) -> &'static str {
    campos_multipart(multipart).await;
    "ABC123\n"
}

async fn mock_revalidation(State(r): State<Recibidos>, Json(body): Json<Value>) -> &'static str {
    r.push("revalidation", body);
    REVALIDATION_REPLY
}

async fn mock_register(State(r): State<Recibidos>, Json(body): Json<Value>) -> &'static str {
    r.push("register", body);
    "Accepted"
}

async fn mock_pesaje(State(r): State<Recibidos>, multipart: Multipart) -> &'static str {
    r.push("pesaje", campos_multipart(multipart).await);
    SCALE_REPLY
}

async fn mock_pesaje_tara(State(r): State<Recibidos>, multipart: Multipart) -> &'static str {
    r.push("pesaje_tara", campos_multipart(multipart).await);
    TARE_REPLY
}

async fn mock_autorizacion(State(r): State<Recibidos>, Json(body): Json<Value>) -> &'static str {
    r.push("autorizacion", body);
    "Accepted"
}

async fn mock_notificacion(State(r): State<Recibidos>, Json(body): Json<Value>) -> &'static str {
    r.push("registro_peso", body);
    "Accepted"
}

async fn mock_granel(State(r): State<Recibidos>, multipart: Multipart) -> Json<Value> {
    r.push("validacion_granel", campos_multipart(multipart).await);
    Json(json!({
        "text": "Placa: XYZ987\nPeso Tara: 12500 KG\nGuía de transporte: 77001\nEquipo: valido"
    }))
}

async fn mock_slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "tarde"
}

async fn mock_error() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "scenario failed")
}

/// Start the mock on an ephemeral port; returns its base URL
async fn start_mock(recibidos: Recibidos) -> String {
    let app = Router::new()
        .route("/process", post(mock_process))
        .route("/not-a-ticket", post(mock_not_a_ticket))
        .route("/placa", post(mock_placa))
        .route("/revalidation", post(mock_revalidation))
        .route("/register", post(mock_register))
        .route("/pesaje", post(mock_pesaje))
        .route("/pesaje-tara", post(mock_pesaje_tara))
        .route("/autorizacion", post(mock_autorizacion))
        .route("/registro-peso", post(mock_notificacion))
        .route("/validacion-granel", post(mock_granel))
        .route("/slow", post(mock_slow))
        .route("/error", post(mock_error))
        .with_state(recibidos);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn webhooks(base: &str) -> WebhookConfig {
    WebhookConfig {
        process: format!("{}/process", base),
        placa: format!("{}/placa", base),
        revalidation: format!("{}/revalidation", base),
        register: format!("{}/register", base),
        pesaje: format!("{}/pesaje", base),
        autorizacion: format!("{}/autorizacion", base),
        registro_peso: format!("{}/registro-peso", base),
        validacion_granel: format!("{}/validacion-granel", base),
        ..Default::default()
    }
}

async fn setup_mocked(adjust: impl FnOnce(&mut WebhookConfig, &str)) -> (TestApp, Recibidos) {
    let recibidos = Recibidos::default();
    let base = start_mock(recibidos.clone()).await;

    let mut config = TomlConfig::default();
    config.webhooks = webhooks(&base);
    adjust(&mut config.webhooks, &base);

    (setup_with(config, |_| {}).await, recibidos)
}

fn procesar_request(cookie: &str) -> axum::http::Request<axum::body::Body> {
    multipart_request(
        "/entrada/procesar",
        Some(cookie),
        &[],
        &[
            ("tiquete", "tiquete.jpg", b"\xff\xd8\xff\xe0ticket"),
            ("placa", "placa.jpg", b"\xff\xd8\xff\xe0plate"),
        ],
    )
}

// =============================================================================
// Photo entry
// =============================================================================

#[tokio::test]
async fn test_photo_entry_flow() {
    let (t, recibidos) = setup_mocked(|_, _| {}).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let (status, procesado) = send(&t.app, procesar_request(&cookie)).await;
    assert_eq!(status, StatusCode::OK, "{}", procesado);
    assert_eq!(procesado["result"], "ok");
    assert_eq!(procesado["plate_text"], "ABC123");
    assert_eq!(procesado["parsed_data"]["table_data"][1]["campo"], "Código");
    assert_eq!(procesado["parsed_data"]["nota"], "La placa fue corregida.");
    assert_eq!(recibidos.de("process")[0]["_files"][0], "file");

    // No body: the draft's table is sent for revalidation
    let (status, validado) = send(&t.app, test_request("POST", "/entrada/revalidar", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK, "{}", validado);
    assert_eq!(validado["fuente"], "webhook");
    assert_eq!(validado["datos_validados"]["codigo"], "0150076A");
    assert_eq!(recibidos.de("revalidation")[0]["codigo"], "0150076A");

    let (status, registrado) = send(&t.app, test_request("POST", "/entrada/registrar", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK, "{}", registrado);
    let codigo_guia = registrado["codigo_guia"].as_str().unwrap().to_string();
    assert!(codigo_guia.starts_with("0150076A_"));
    assert!(registrado["url_qr"].as_str().unwrap().ends_with(&format!("/guias/{}", codigo_guia)));

    let enviados = recibidos.de("register");
    assert_eq!(enviados.len(), 1);
    assert_eq!(enviados[0]["codigo_guia"], codigo_guia.as_str());
    assert_eq!(enviados[0]["placa"], "ABC123");
    assert_eq!(enviados[0]["acarreo"], "No");

    let uri = format!("/entradas/{}", codigo_guia);
    let (status, entrada) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entrada["nombre_proveedor"], "Finca La Esperanza");
    assert_eq!(entrada["plate_text"], "ABC123");

    // The draft is cleared after registration
    let (status, _) = send(&t.app, test_request("POST", "/entrada/registrar", Some(&cookie))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_not_a_ticket_is_a_warning() {
    let (t, _) = setup_mocked(|w, base| w.process = format!("{}/not-a-ticket", base)).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let (status, procesado) = send(&t.app, procesar_request(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(procesado["result"], "warning");
    assert!(procesado["message"].is_string());
}

#[tokio::test]
async fn test_plate_failure_does_not_block_ticket() {
    let (t, _) = setup_mocked(|w, base| w.placa = format!("{}/error", base)).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let (status, procesado) = send(&t.app, procesar_request(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(procesado["result"], "ok");
    assert!(procesado.get("plate_text").is_none());
    assert!(procesado["plate_error"].is_string());
}

#[tokio::test]
async fn test_revalidation_falls_back_to_local_formatting() {
    let (t, _) = setup_mocked(|w, base| w.revalidation = format!("{}/error", base)).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let body = json!({"table_data": [
        {"campo": "Código", "valor": "0150080B"},
        {"campo": "Nombre del Agricultor", "valor": "Finca El Ocaso"},
        {"campo": "Placa", "valor": "DEF456"},
    ]});
    let (status, validado) = send(
        &t.app,
        json_request("POST", "/entrada/revalidar", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(validado["fuente"], "local");
    assert_eq!(validado["datos_validados"]["codigo"], "0150080B");
    assert_eq!(validado["datos_validados"]["nombre_agricultor"], "Finca El Ocaso");

    let body = json!({"table_data": [{"campo": "Placa", "valor": "DEF456"}]});
    let (status, _) = send(
        &t.app,
        json_request("POST", "/entrada/revalidar", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failed_registration_stores_nothing() {
    let (t, _) = setup_mocked(|w, base| w.register = format!("{}/error", base)).await;
    let cookie = register_and_login(&t.app, "admin").await;

    send(&t.app, procesar_request(&cookie)).await;
    let (status, _) = send(&t.app, test_request("POST", "/entrada/revalidar", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&t.app, test_request("POST", "/entrada/registrar", Some(&cookie))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "WEBHOOK_ERROR");

    let (_, lista) = send(&t.app, test_request("GET", "/entradas", Some(&cookie))).await;
    assert_eq!(lista["total"], 0);
}

#[tokio::test]
async fn test_slow_webhook_times_out() {
    let recibidos = Recibidos::default();
    let base = start_mock(recibidos).await;
    let mut config = TomlConfig::default();
    config.webhooks = webhooks(&base);
    config.webhooks.process = format!("{}/slow", base);
    let t = setup_with(config, |s| s.webhook_timeout_secs = 1).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let (status, body) = send(&t.app, procesar_request(&cookie)).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "WEBHOOK_TIMEOUT");
}

// =============================================================================
// Plate checks
// =============================================================================

fn verificar_request(cookie: &str, fields: &[(&str, &str)]) -> axum::http::Request<axum::body::Body> {
    multipart_request(
        "/placa/verificar",
        Some(cookie),
        fields,
        &[("foto", "placa.jpg", b"\xff\xd8\xff\xe0plate")],
    )
}

#[tokio::test]
async fn test_plate_verification() {
    let (t, _) = setup_mocked(|_, _| {}).await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = entrada_manual(&t.app, &cookie, "0150076A").await;

    // Registered plate taken from the entry
    let (status, body) = send(
        &t.app,
        verificar_request(&cookie, &[("codigo_guia", codigo_guia.as_str())]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["placa_detectada"], "ABC123");
    assert_eq!(body["placa_registrada"], "ABC123");
    assert_eq!(body["coincide"], true);

    // Separators and case do not matter; different characters do
    let (_, body) = send(&t.app, verificar_request(&cookie, &[("placa_registrada", "abc-123")])).await;
    assert_eq!(body["coincide"], true);
    let (_, body) = send(&t.app, verificar_request(&cookie, &[("placa_registrada", "DEF 456")])).await;
    assert_eq!(body["coincide"], false);
    assert_eq!(body["placa_registrada"], "DEF 456");

    let (status, _) = send(&t.app, verificar_request(&cookie, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, verificar_request(&cookie, &[("codigo_guia", "NO_EXISTE")])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plate_verification_service_failure() {
    let (t, _) = setup_mocked(|w, base| w.placa = format!("{}/error", base)).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let (status, body) = send(&t.app, verificar_request(&cookie, &[("placa_registrada", "ABC123")])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Error al detectar la placa"));
}

#[tokio::test]
async fn test_plate_reprocessing_updates_draft() {
    let (t, recibidos) = setup_mocked(|_, _| {}).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let (status, _) = send(
        &t.app,
        test_request("POST", "/entrada/reprocesar-placa", Some(&cookie)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(&t.app, procesar_request(&cookie)).await;
    let (status, body) = send(
        &t.app,
        test_request("POST", "/entrada/reprocesar-placa", Some(&cookie)),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["plate_text"], "ABC123");

    // The reprocessed plate is what gets registered
    send(&t.app, test_request("POST", "/entrada/revalidar", Some(&cookie))).await;
    let (status, _) = send(&t.app, test_request("POST", "/entrada/registrar", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recibidos.de("register")[0]["placa"], "ABC123");
}

// =============================================================================
// Gross weighing
// =============================================================================
#[tokio::test]
async fn test_scale_photo_reading() {
    let (t, recibidos) = setup_mocked(|_, _| {}).await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = entrada_manual(&t.app, &cookie, "0150076A").await;

    let request = multipart_request(
        "/pesaje/procesar-directo",
        Some(&cookie),
        &[("codigo_guia", codigo_guia.as_str())],
        &[("imagen", "bascula.jpg", b"\xff\xd8\xff\xe0scale")],
    );
    let (status, lectura) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", lectura);
    assert_eq!(lectura["success"], true);
    assert_eq!(lectura["peso"], "15230");
    assert_eq!(lectura["codigo_guia_transporte_sap"], "8001");

    // No SAP guide on the entry: the supplier code is sent instead
    let enviado = &recibidos.de("pesaje")[0];
    assert_eq!(enviado["codigo_proveedor"], "0150076A");
    assert_eq!(enviado["_files"][0], "file");

    // Nothing is stored until the operator confirms
    let uri = format!("/api/guias/{}/estado", codigo_guia);
    let (_, estado) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert_eq!(estado["estado"], "entrada_completada");
}

#[tokio::test]
async fn test_gross_weight_notification_is_sent() {
    let (t, recibidos) = setup_mocked(|_, _| {}).await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = entrada_manual(&t.app, &cookie, "0150076A").await;

    let body = json!({"codigo_guia": codigo_guia, "peso_bruto": "15230,5"});
    let (status, _) = send(
        &t.app,
        json_request("POST", "/pesaje/registrar-directo", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Sent in the background
    let mut notificaciones = Vec::new();
    for _ in 0..50 {
        notificaciones = recibidos.de("registro_peso");
        if !notificaciones.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(notificaciones.len(), 1);
    assert_eq!(notificaciones[0]["codigo_guia"], codigo_guia.as_str());
    assert_eq!(notificaciones[0]["peso_bruto"], 15230.5);
    assert_eq!(notificaciones[0]["tipo_pesaje"], "directo");
}

#[tokio::test]
async fn test_authorization_code_round_trip() {
    let (t, recibidos) = setup_mocked(|_, _| {}).await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = entrada_manual(&t.app, &cookie, "0150076A").await;
    let otra_guia = entrada_manual(&t.app, &cookie, "0150080B").await;

    let body = json!({
        "codigo_guia": codigo_guia,
        "comentarios": "Báscula fuera de servicio",
        "peso_manual": 15000,
    });
    let (status, respuesta) = send(
        &t.app,
        json_request("POST", "/pesaje/solicitar-autorizacion", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(respuesta.get("codigo_autorizacion").is_none());

    let enviado = &recibidos.de("autorizacion")[0];
    assert_eq!(enviado["codigo_guia"], codigo_guia.as_str());
    assert_eq!(enviado["nombre_usuario"], "admin");
    let codigo = enviado["codigo_autorizacion"].as_str().unwrap().to_string();
    assert_eq!(codigo.len(), 8);

    // Bound to the guide it was issued for
    let body = json!({"codigo_guia": otra_guia, "codigoAutorizacion": codigo});
    let (status, _) = send(
        &t.app,
        json_request("POST", "/pesaje/validar-codigo", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"codigo_guia": codigo_guia, "codigoAutorizacion": codigo.to_lowercase()});
    let (status, validado) = send(
        &t.app,
        json_request("POST", "/pesaje/validar-codigo", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(validado["peso_manual"], "15000");

    let body = json!({"codigo_guia": codigo_guia, "peso_bruto": 15000});
    let (status, pesaje) = send(
        &t.app,
        json_request("POST", "/pesaje/registrar-virtual", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pesaje["tipo_pesaje"], "virtual");
}

#[tokio::test]
async fn test_undelivered_authorization_code_is_discarded() {
    let (t, _) = setup_mocked(|w, base| w.autorizacion = format!("{}/error", base)).await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = entrada_manual(&t.app, &cookie, "0150076A").await;

    let body = json!({"codigo_guia": codigo_guia, "comentarios": "Sin báscula"});
    let (status, _) = send(
        &t.app,
        json_request("POST", "/pesaje/solicitar-autorizacion", Some(&cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_tare_photo_reading() {
    let (t, recibidos) = setup_mocked(|w, base| w.pesaje = format!("{}/pesaje-tara", base)).await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = entrada_manual(&t.app, &cookie, "0150076A").await;

    let tara_request = |codigo: &str| {
        multipart_request(
            "/pesaje-neto/procesar-foto",
            Some(&cookie),
            &[("codigo_guia", codigo)],
            &[("imagen", "tara.jpg", b"\xff\xd8\xff\xe0tare")],
        )
    };

    // No gross weight yet
    let (status, _) = send(&t.app, tara_request(&codigo_guia)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let body = json!({"codigo_guia": codigo_guia, "peso_bruto": 15230});
    send(&t.app, json_request("POST", "/pesaje/registrar-virtual", Some(&cookie), &body)).await;

    let (status, lectura) = send(&t.app, tara_request(&codigo_guia)).await;
    assert_eq!(status, StatusCode::OK, "{}", lectura);
    assert_eq!(lectura["success"], true);
    assert_eq!(lectura["peso_tara"], "5120");
    assert!(lectura["imagen_pesaje"].as_str().unwrap().starts_with("tara_"));
    assert_eq!(recibidos.de("pesaje_tara")[0]["codigo_proveedor"], "0150076A");

    // Nothing stored until the tare is registered; afterwards it is closed
    let uri = format!("/api/guias/{}/estado", codigo_guia);
    let (_, estado) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert_eq!(estado["estado"], "pesaje_completado");

    let body = json!({"codigo_guia": codigo_guia, "peso_tara": lectura["peso_tara"]});
    let (status, _) = send(&t.app, json_request("POST", "/pesaje-neto/registrar", Some(&cookie), &body)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, tara_request(&codigo_guia)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// =============================================================================
// Bulk goods
// =============================================================================

#[tokio::test]
async fn test_bulk_goods_photo_validation() {
    let (t, recibidos) = setup_mocked(|_, _| {}).await;
    let cookie = register_and_login(&t.app, "admin").await;

    let body = json!({"producto": "Cascarilla", "placa": "XYZ987", "nombre_conductor": "Pedro Pérez"});
    let (_, registro) = send(&t.app, json_request("POST", "/graneles/registro", Some(&cookie), &body)).await;
    let id = registro["id"].as_i64().unwrap();

    let request = multipart_request(
        &format!("/graneles/{}/validar-foto", id),
        Some(&cookie),
        &[],
        &[("foto", "camion.jpg", b"\xff\xd8\xff\xe0truck")],
    );
    let (status, validacion) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", validacion);
    assert_eq!(validacion["success"], true);
    assert_eq!(validacion["peso_kg"], 12500.0);
    assert_eq!(validacion["codigo_sap_granel"], "77001");

    let enviado = &recibidos.de("validacion_granel")[0];
    assert_eq!(enviado["placa"], "XYZ987");
    assert_eq!(enviado["conductor"], "Pedro Pérez");
    assert_eq!(enviado["id_registro"], id.to_string());
    assert_eq!(enviado["_files"][0], "foto_vehiculo");
}

// =============================================================================
// Automatic classification
// =============================================================================

/// `jpegbytes`, base64
const ANNOTATED_IMAGE: &str = "anBlZ2J5dGVz";

/// Roboflow workflow mock; the workflow id picks the scenario
async fn mock_roboflow(
    State(r): State<Recibidos>,
    Path((_workspace, workflow)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    r.push("roboflow", body);
    match workflow.as_str() {
        "racimos" => (
            StatusCode::OK,
            Json(json!({"outputs": [{
                "verde": 3,
                "racimo sobremaduro": 1,
                "annotated_image": {"type": "base64", "value": ANNOTATED_IMAGE},
            }]})),
        ),
        "vacio" => (StatusCode::OK, Json(json!({"outputs": [{"predictions": []}]}))),
        _ => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "down"}))),
    }
}

async fn setup_roboflow(workflow: &str) -> (TestApp, Recibidos) {
    let recibidos = Recibidos::default();
    let app = Router::new()
        .route("/infer/workflows/:workspace/:workflow", post(mock_roboflow))
        .with_state(recibidos.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = TomlConfig::default();
    config.roboflow = RoboflowConfig {
        api_url: format!("http://{}", addr),
        api_key: "clave-roboflow".to_string(),
        workspace: "planta".to_string(),
        workflow_id: workflow.to_string(),
    };
    (setup_with(config, |_| {}).await, recibidos)
}

/// Weighed guide with a manual classification and `fotos` photos
async fn guia_con_fotos(t: &TestApp, cookie: &str, fotos: usize) -> String {
    let codigo_guia = entrada_manual(&t.app, cookie, "0150076A").await;
    let body = json!({"codigo_guia": codigo_guia, "peso_bruto": 15230});
    let (status, _) = send(
        &t.app,
        json_request("POST", "/pesaje/registrar-virtual", Some(cookie), &body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let foto: &[u8] = b"\xff\xd8\xff\xe0racimo";
    let nombres: Vec<(String, String)> = (1..=fotos)
        .map(|i| (format!("foto-{}", i), format!("{}.jpg", i)))
        .collect();
    let archivos: Vec<(&str, &str, &[u8])> = nombres
        .iter()
        .map(|(campo, archivo)| (campo.as_str(), archivo.as_str(), foto))
        .collect();
    let request = multipart_request(
        "/clasificacion/registrar",
        Some(cookie),
        &[("codigo_guia", codigo_guia.as_str()), ("verdes", "2")],
        &archivos,
    );
    let (status, body) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["fotos"], fotos);
    codigo_guia
}

/// Start processing and poll until the run leaves `processing`
async fn clasificar(t: &TestApp, cookie: &str, codigo_guia: &str) -> Value {
    let uri = format!("/clasificacion/{}/iniciar-procesamiento", codigo_guia);
    let (status, body) = send(&t.app, test_request("POST", &uri, Some(cookie))).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    assert_eq!(body["status"], "processing");

    let uri = format!("/clasificacion/{}/estado-procesamiento", codigo_guia);
    for _ in 0..100 {
        let (_, progreso) = send(&t.app, test_request("GET", &uri, Some(cookie))).await;
        if progreso["status"] != "processing" {
            return progreso;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("classification of {} did not finish", codigo_guia);
}

#[tokio::test]
async fn test_automatic_classification_completes() {
    let (t, recibidos) = setup_roboflow("racimos").await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = guia_con_fotos(&t, &cookie, 2).await;

    let progreso = clasificar(&t, &cookie, &codigo_guia).await;
    assert_eq!(progreso["status"], "completado");
    assert_eq!(progreso["progress"], 100);

    let enviados = recibidos.de("roboflow");
    assert_eq!(enviados.len(), 2);
    assert_eq!(enviados[0]["api_key"], "clave-roboflow");
    assert_eq!(enviados[0]["inputs"]["image"]["type"], "base64");

    let uri = format!("/clasificacion/{}", codigo_guia);
    let (_, detalle) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert_eq!(detalle["total_racimos_detectados"], 8);
    assert_eq!(detalle["clasificacion_consolidada"]["verde"]["cantidad"], 6);
    assert_eq!(detalle["clasificacion_consolidada"]["verde"]["porcentaje"], 75.0);
    assert_eq!(detalle["clasificacion_automatica"]["conteo_imagenes_ok"], 2);

    let etiquetada = detalle["clasificacion_automatica"]["imagenes"][0]["imagen_etiquetada"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(etiquetada.ends_with("_labeled_rf.jpg"));
    assert_eq!(std::fs::read(&etiquetada).unwrap(), b"jpegbytes");

    let archivo = t
        .state
        .layout
        .clasificaciones_dir
        .join(format!("clasificacion_{}.json", codigo_guia));
    let guardado: Value = serde_json::from_slice(&std::fs::read(&archivo).unwrap()).unwrap();
    assert_eq!(guardado["total_racimos_detectados"], 8);

    // New photo set: earlier results no longer apply
    let request = multipart_request(
        "/clasificacion/registrar",
        Some(&cookie),
        &[("codigo_guia", codigo_guia.as_str()), ("verdes", "5")],
        &[],
    );
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (_, detalle) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert_eq!(detalle["fotos"], json!([]));
    assert!(detalle["total_racimos_detectados"].is_null());
    assert!(detalle["clasificacion_automatica"].is_null());

    let uri = format!("/clasificacion/{}/estado-procesamiento", codigo_guia);
    let (_, progreso) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert_eq!(progreso["status"], "not_started");
}

#[tokio::test]
async fn test_automatic_classification_without_detections() {
    let (t, _) = setup_roboflow("vacio").await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = guia_con_fotos(&t, &cookie, 1).await;

    let progreso = clasificar(&t, &cookie, &codigo_guia).await;
    assert_eq!(progreso["status"], "completado_sin_deteccion");

    let uri = format!("/clasificacion/{}", codigo_guia);
    let (_, detalle) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert_eq!(detalle["total_racimos_detectados"], 0);
    assert_eq!(detalle["clasificacion_automatica"]["conteo_imagenes_ok"], 1);
}

#[tokio::test]
async fn test_automatic_classification_all_images_fail() {
    let (t, recibidos) = setup_roboflow("caido").await;
    let cookie = register_and_login(&t.app, "admin").await;
    let codigo_guia = guia_con_fotos(&t, &cookie, 2).await;

    let progreso = clasificar(&t, &cookie, &codigo_guia).await;
    assert_eq!(progreso["status"], "error_procesamiento");
    assert!(progreso["message"].as_str().unwrap().contains("503"));
    assert_eq!(recibidos.de("roboflow").len(), 2);

    // The run is recorded on disk but the row is left untouched
    let archivo = t
        .state
        .layout
        .clasificaciones_dir
        .join(format!("clasificacion_{}.json", codigo_guia));
    let guardado: Value = serde_json::from_slice(&std::fs::read(&archivo).unwrap()).unwrap();
    assert_eq!(guardado["conteo_imagenes_error"], 2);

    let uri = format!("/clasificacion/{}", codigo_guia);
    let (_, detalle) = send(&t.app, test_request("GET", &uri, Some(&cookie))).await;
    assert!(detalle["clasificacion_automatica"].is_null());
    assert!(detalle["total_racimos_detectados"].is_null());
    assert_eq!(detalle["clasificacion_manual"]["verde"], 2.0);
}
