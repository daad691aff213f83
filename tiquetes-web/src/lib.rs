//! tiquetes-web library - fruit reception HTTP service
//!
//! Guides move through entry, gross weighing, classification, net weighing
//! and exit. Handlers live in [`api`]; outbound integrations and reply
//! parsing in [`services`].

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

use tiquetes_common::config::{RootLayout, RuntimeSettings, TomlConfig};

pub mod api;
pub mod error;
pub mod services;
pub mod session;
pub mod uploads;

use error::ApiResult;
use services::authorization::AuthCodeStore;
use services::classification_job::ProgresoStore;
use services::roboflow_client::RoboflowClient;
use services::webhook_client::WebhookClient;
use session::SessionStore;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<TomlConfig>,
    pub settings: Arc<RuntimeSettings>,
    pub layout: Arc<RootLayout>,
    pub webhooks: WebhookClient,
    pub roboflow: RoboflowClient,
    pub sessions: SessionStore,
    pub auth_codes: AuthCodeStore,
    pub progreso: ProgresoStore,
}

impl AppState {
    /// Create new application state
    pub fn new(
        db: SqlitePool,
        config: TomlConfig,
        settings: RuntimeSettings,
        layout: RootLayout,
    ) -> ApiResult<Self> {
        let webhooks = WebhookClient::new(config.webhooks.clone())?;
        let roboflow = RoboflowClient::new(config.roboflow.clone())?;
        let sessions = SessionStore::new(settings.session_timeout_seconds);

        Ok(Self {
            db,
            config: Arc::new(config),
            settings: Arc::new(settings),
            layout: Arc::new(layout),
            webhooks,
            roboflow,
            sessions,
            auth_codes: AuthCodeStore::default(),
            progreso: ProgresoStore::default(),
        })
    }
}

/// Build application router
///
/// `/health`, `/auth/*`, `/login`, the public guide page and its QR code
/// are open; everything else requires a session.
pub fn build_router(state: AppState) -> Router {
    use axum::extract::DefaultBodyLimit;
    use axum::middleware;
    use axum::routing::{get, post};
    use tower_http::trace::TraceLayer;

    // Protected routes (require a session)
    let protected = Router::new()
        .route("/", get(api::ui::home))
        // Entry
        .route("/entrada/procesar", post(api::entrada::procesar))
        .route("/entrada/revalidar", post(api::entrada::revalidar))
        .route("/entrada/registrar", post(api::entrada::registrar))
        .route("/entrada/registrar-manual", post(api::entrada::registrar_manual))
        .route("/entradas", get(api::entrada::listar))
        .route("/entrada/reprocesar-placa", post(api::placa::reprocesar))
        .route("/entradas/:codigo_guia", get(api::entrada::detalle))
        .route("/entradas/:codigo_guia/editar", post(api::entrada::editar))
        .route("/placa/verificar", post(api::placa::verificar))
        // Gross weighing
        .route("/pesaje/registrar-directo", post(api::pesaje::registrar_directo))
        .route("/pesaje/registrar-virtual", post(api::pesaje::registrar_virtual))
        .route("/pesaje/procesar-directo", post(api::pesaje::procesar_directo))
        .route("/pesaje/solicitar-autorizacion", post(api::pesaje::solicitar_autorizacion))
        .route("/pesaje/validar-codigo", post(api::pesaje::validar_codigo))
        .route("/pesajes", get(api::pesaje::listar))
        // Classification
        .route("/clasificacion/registrar", post(api::clasificacion::registrar))
        .route(
            "/clasificacion/:codigo_guia/iniciar-procesamiento",
            post(api::clasificacion::iniciar_procesamiento),
        )
        .route(
            "/clasificacion/:codigo_guia/estado-procesamiento",
            get(api::clasificacion::estado_procesamiento),
        )
        .route("/clasificacion/:codigo_guia", get(api::clasificacion::detalle))
        .route("/clasificaciones", get(api::clasificacion::listar))
        // Net weighing and exit
        .route("/pesaje-neto/registrar", post(api::pesaje_neto::registrar))
        .route("/pesaje-neto/procesar-foto", post(api::pesaje_neto::procesar_foto))
        .route("/pesaje-neto/:codigo_guia", get(api::pesaje_neto::detalle))
        .route("/salida/registrar", post(api::salida::registrar))
        .route("/salida/:codigo_guia", get(api::salida::detalle))
        // Guides, search, dashboard
        .route("/api/guias/:codigo_guia", get(api::guias::datos))
        .route("/api/guias/:codigo_guia/estado", get(api::guias::estado))
        .route("/api/buscar_guias", get(api::guias::buscar))
        .route("/api/dashboard/stats", get(api::guias::dashboard))
        .route("/api/dashboard/proveedores", get(api::guias::proveedores))
        .route("/guias/:codigo_guia/pdf", get(api::guias::pdf))
        // Bulk goods
        .route("/graneles/registro", post(api::graneles::registro))
        .route("/graneles/:id", get(api::graneles::detalle))
        .route("/graneles/:id/validar-foto", post(api::graneles::validar_foto))
        .route("/graneles/:id/primer-pesaje", post(api::graneles::primer_pesaje))
        // Budget and SAP comparison
        .route("/presupuesto/upload", post(api::presupuesto::upload))
        .route("/presupuesto", get(api::presupuesto::listar))
        .route("/comparacion-guias", post(api::comparacion::comparar_guias))
        // Administration
        .route("/admin/usuarios/:id/activar", post(api::auth::activate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_login,
        ));

    // Public routes (no session)
    let public = Router::new()
        .route("/login", get(api::ui::login_page))
        .route("/auth/register", post(api::auth::register))
        .route("/auth/login", post(api::auth::login))
        .route("/auth/logout", post(api::auth::logout))
        .route("/guias/:codigo_guia", get(api::ui::guia_page))
        .route("/guias/:codigo_guia/qr", get(api::guias::qr))
        .merge(api::health_routes());

    let body_limit = state.settings.upload_max_bytes;

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
