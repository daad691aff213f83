//! Bulk-goods registrations

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use tiquetes_common::db::graneles::{self, NewPrimerPesajeGranel};
use tiquetes_common::db::models::NewRegistroGranel;
use tiquetes_common::time::utc_timestamp_str;

use super::{no_vacio, requerido, texto_o_numero, JsonOrForm};
use crate::error::{ApiError, ApiResult};
use crate::services::granel_validation::interpretar_respuesta;
use crate::services::webhook_client::{require_body, Webhook};
use crate::services::weight_parser::parse_decimal;
use crate::session::CurrentUser;
use crate::uploads::{save_upload, Formulario};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegistroRequest {
    #[serde(default)]
    pub producto: Option<String>,
    #[serde(default)]
    pub fecha_autorizacion: Option<String>,
    #[serde(default)]
    pub placa: Option<String>,
    #[serde(default)]
    pub trailer: Option<String>,
    #[serde(default)]
    pub cedula_conductor: Option<String>,
    #[serde(default)]
    pub nombre_conductor: Option<String>,
    #[serde(default)]
    pub origen: Option<String>,
    #[serde(default)]
    pub destino: Option<String>,
    #[serde(default)]
    pub tipo_registro: Option<String>,
    #[serde(default)]
    pub observaciones: Option<String>,
}

/// POST /graneles/registro
pub async fn registro(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonOrForm(req): JsonOrForm<RegistroRequest>,
) -> ApiResult<Json<Value>> {
    let registro = NewRegistroGranel {
        producto: requerido(req.producto, "producto")?,
        placa: requerido(req.placa, "placa")?,
        nombre_conductor: requerido(req.nombre_conductor, "nombre_conductor")?,
        fecha_autorizacion: no_vacio(req.fecha_autorizacion),
        trailer: no_vacio(req.trailer),
        cedula_conductor: no_vacio(req.cedula_conductor),
        origen: no_vacio(req.origen),
        destino: no_vacio(req.destino),
        tipo_registro: Some(no_vacio(req.tipo_registro).unwrap_or_else(|| "manual".to_string())),
        observaciones: no_vacio(req.observaciones),
    };

    let id = graneles::insert_registro_granel(
        &state.db,
        &registro,
        Some(&user.username),
        &utc_timestamp_str(),
    )
    .await?;
    info!(id, placa = %registro.placa, user = %user.username, "Bulk-goods registration created");

    Ok(Json(json!({"success": true, "id": id})))
}

/// GET /graneles/:id
pub async fn detalle(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let registro = graneles::get_registro_granel(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Registro de granel {}", id)))?;
    let primer_pesaje = graneles::get_primer_pesaje(&state.db, id).await?;
    Ok(Json(json!({"registro": registro, "primer_pesaje": primer_pesaje})))
}

/// POST /graneles/:id/validar-foto
pub async fn validar_foto(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let registro = graneles::get_registro_granel(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Registro de granel {}", id)))?;

    let mut form = Formulario::read(multipart).await?;
    let foto = form.take_image("foto")?;
    let path = save_upload(&state.layout.uploads_dir.join("graneles"), &format!("granel_{}", id), &foto).await?;
    let ruta_imagen_soporte = path.display().to_string();

    let fields = [
        ("placa", form.text("placa").unwrap_or_else(|| registro.placa.clone())),
        ("conductor", form.text("conductor").unwrap_or_else(|| registro.nombre_conductor.clone())),
        ("producto", form.text("producto").unwrap_or_else(|| registro.producto.clone())),
        ("trailer", form.text("trailer").or(registro.trailer.clone()).unwrap_or_default()),
        ("id_registro", id.to_string()),
    ];

    let reply = state
        .webhooks
        .post_file(
            Webhook::ValidacionGranel,
            foto.adjunto("foto_vehiculo"),
            &fields,
            state.settings.webhook_timeout(),
        )
        .await?;
    let reply = require_body(Webhook::ValidacionGranel, reply)?;
    let json = reply
        .json()
        .ok_or_else(|| ApiError::BadGateway("El servicio de validación no devolvió JSON".to_string()))?;
    let validacion =
        interpretar_respuesta(&json).map_err(|e| ApiError::BadGateway(e.to_string()))?;

    if !validacion.success {
        warn!(id, message = %validacion.message, "Bulk-goods photo validation failed");
    }

    Ok(Json(json!({
        "success": validacion.success,
        "peso_kg": validacion.peso_kg,
        "codigo_sap_granel": validacion.codigo_sap_granel,
        "ruta_imagen_soporte": ruta_imagen_soporte,
        "message": validacion.message,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PrimerPesajeRequest {
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub peso_primer_kg: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub codigo_sap_granel: Option<String>,
    #[serde(default)]
    pub foto_soporte_path: Option<String>,
}

/// POST /graneles/:id/primer-pesaje
pub async fn primer_pesaje(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    JsonOrForm(req): JsonOrForm<PrimerPesajeRequest>,
) -> ApiResult<Json<Value>> {
    graneles::get_registro_granel(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Registro de granel {}", id)))?;

    let peso_raw = requerido(req.peso_primer_kg, "peso_primer_kg")?;
    let peso = parse_decimal(&peso_raw)
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ApiError::BadRequest(format!("Peso inválido: {}", peso_raw)))?;

    let pesaje = NewPrimerPesajeGranel {
        id_registro_granel: id,
        peso_primer_kg: peso,
        codigo_sap_granel: no_vacio(req.codigo_sap_granel),
        usuario_pesaje: Some(user.username.clone()),
        foto_soporte_path: no_vacio(req.foto_soporte_path),
        timestamp_primer_pesaje: utc_timestamp_str(),
    };
    let pesaje_id = graneles::insert_primer_pesaje(&state.db, &pesaje).await?;
    info!(id_registro = id, peso, user = %user.username, "Bulk-goods first weighing registered");

    Ok(Json(json!({"success": true, "id": pesaje_id, "peso_primer_kg": peso})))
}
