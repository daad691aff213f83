//! Gross weighing
//!
//! A weight is either read from a scale photo by the PESAJE webhook
//! (`directo`) or typed in after an approver issued an authorization code
//! (`virtual`).

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use tiquetes_common::db::{entradas, pesajes};
use tiquetes_common::db::pesajes::{NewPesajeBruto, TipoPesaje};
use tiquetes_common::guia::{get_datos_guia, NO_DISPONIBLE};
use tiquetes_common::time::{bogota, now, to_db_timestamp};

use super::{con_fecha_hora, no_vacio, requerido, texto_o_numero, url_guia, JsonOrForm};
use crate::error::{ApiError, ApiResult};
use crate::services::webhook_client::{require_body, Webhook};
use crate::services::weight_parser::{parse_decimal, parse_respuesta_bascula};
use crate::session::CurrentUser;
use crate::uploads::{save_upload, stored_name, Formulario};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegistrarPesajeRequest {
    #[serde(default)]
    pub codigo_guia: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub peso_bruto: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub codigo_guia_transporte_sap: Option<String>,
    #[serde(default)]
    pub imagen_pesaje: Option<String>,
}

/// POST /pesaje/registrar-directo
pub async fn registrar_directo(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonOrForm(req): JsonOrForm<RegistrarPesajeRequest>,
) -> ApiResult<Json<Value>> {
    registrar(state, user, req, TipoPesaje::Directo).await
}

/// POST /pesaje/registrar-virtual
pub async fn registrar_virtual(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonOrForm(req): JsonOrForm<RegistrarPesajeRequest>,
) -> ApiResult<Json<Value>> {
    registrar(state, user, req, TipoPesaje::Virtual).await
}

async fn registrar(
    state: AppState,
    user: CurrentUser,
    req: RegistrarPesajeRequest,
    tipo: TipoPesaje,
) -> ApiResult<Json<Value>> {
    let codigo_guia = requerido(req.codigo_guia, "codigo_guia")?;
    let entry = entradas::get_entry(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Guía {}", codigo_guia)))?;

    let peso_raw = requerido(req.peso_bruto, "peso_bruto")?;
    let peso_bruto = parse_decimal(&peso_raw)
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ApiError::BadRequest(format!("Peso bruto inválido: {}", peso_raw)))?;

    let ts = to_db_timestamp(now());
    let pesaje = NewPesajeBruto {
        codigo_guia: codigo_guia.clone(),
        codigo_proveedor: entry.codigo_proveedor.clone(),
        nombre_proveedor: entry.nombre_proveedor.clone(),
        peso_bruto,
        tipo_pesaje: tipo,
        codigo_guia_transporte_sap: no_vacio(req.codigo_guia_transporte_sap),
        imagen_pesaje: no_vacio(req.imagen_pesaje),
        timestamp_pesaje_utc: ts.clone(),
    };
    pesajes::upsert_pesaje_bruto(&state.db, &pesaje).await?;
    info!(
        codigo_guia = %codigo_guia,
        peso_bruto,
        tipo = tipo.as_str(),
        user = %user.username,
        "Gross weight registered"
    );

    let notificacion = json!({
        "codigo_guia": codigo_guia,
        "codigo_proveedor": entry.codigo_proveedor,
        "nombre_proveedor": entry.nombre_proveedor,
        "peso_bruto": peso_bruto,
        "tipo_pesaje": tipo.as_str(),
        "codigo_guia_transporte_sap": pesaje.codigo_guia_transporte_sap,
        "timestamp_pesaje_utc": ts,
    });
    let webhooks = state.webhooks.clone();
    let timeout = state.settings.webhook_timeout();
    tokio::spawn(async move {
        webhooks.notify(Webhook::RegistroPeso, &notificacion, timeout).await;
    });

    Ok(Json(json!({
        "success": true,
        "codigo_guia": codigo_guia,
        "peso_bruto": peso_bruto,
        "tipo_pesaje": tipo,
        "redirect_url": format!("/guias/{}", codigo_guia),
    })))
}

/// POST /pesaje/procesar-directo
///
/// Reads the weight from a scale photo; nothing is stored until the
/// operator confirms through `registrar-directo`.
pub async fn procesar_directo(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;
    let codigo_guia = form.require_text("codigo_guia")?;
    let imagen = form.take_image("imagen")?;

    let entry = entradas::get_entry(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Guía {}", codigo_guia)))?;

    let path = save_upload(&state.layout.uploads_dir, "pesaje", &imagen).await?;
    let imagen_pesaje = stored_name(&path);

    let codigo_sap = form
        .text("codigo_guia_transporte_sap")
        .or(entry.codigo_guia_transporte_sap)
        .or(entry.codigo_proveedor)
        .unwrap_or_default();

    let reply = state
        .webhooks
        .post_file(
            Webhook::Pesaje,
            imagen.adjunto("file"),
            &[("codigo_proveedor", codigo_sap)],
            state.settings.webhook_timeout(),
        )
        .await?;
    let reply = require_body(Webhook::Pesaje, reply)?;
    let lectura = parse_respuesta_bascula(&reply.body);

    if !lectura.exitoso {
        return Ok(Json(json!({
            "success": false,
            "message": reply.body.trim(),
            "imagen_pesaje": imagen_pesaje,
        })));
    }

    let Some(peso) = lectura.peso else {
        return Ok(Json(json!({
            "success": false,
            "message": "No se pudo extraer el peso de la respuesta",
            "imagen_pesaje": imagen_pesaje,
        })));
    };

    info!(codigo_guia = %codigo_guia, peso = %peso, "Scale photo read");
    Ok(Json(json!({
        "success": true,
        "peso": peso,
        "codigo_guia_transporte_sap": lectura.codigo_guia_transporte_sap,
        "imagen_pesaje": imagen_pesaje,
        "message": "Peso detectado correctamente",
    })))
}

#[derive(Debug, Deserialize)]
pub struct SolicitudAutorizacion {
    #[serde(default)]
    pub codigo_guia: Option<String>,
    #[serde(default)]
    pub comentarios: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub peso_manual: Option<String>,
    #[serde(default)]
    pub nombre_usuario: Option<String>,
}

/// POST /pesaje/solicitar-autorizacion
///
/// The issued code goes only to the approver.
pub async fn solicitar_autorizacion(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonOrForm(req): JsonOrForm<SolicitudAutorizacion>,
) -> ApiResult<Json<Value>> {
    let codigo_guia = requerido(req.codigo_guia, "codigo_guia")?;
    let comentarios = requerido(req.comentarios, "comentarios")?;
    let peso_manual = no_vacio(req.peso_manual);

    let datos = get_datos_guia(&state.db, &codigo_guia).await?;
    let (codigo_proveedor, nombre_proveedor, placa) = match &datos {
        Some(d) => (d.codigo_proveedor.clone(), d.nombre_proveedor.clone(), d.placa.clone()),
        None => (
            NO_DISPONIBLE.to_string(),
            NO_DISPONIBLE.to_string(),
            NO_DISPONIBLE.to_string(),
        ),
    };

    let ts = now();
    let ttl = chrono::Duration::minutes(state.settings.authorization_code_ttl_minutes);
    let codigo = state
        .auth_codes
        .emitir(&codigo_guia, peso_manual.clone(), ttl, ts)
        .await;

    let payload = json!({
        "tipo_solicitud": "autorizacion_pesaje",
        "codigo_guia": codigo_guia,
        "codigo_proveedor": codigo_proveedor,
        "nombre_proveedor": nombre_proveedor,
        "placa": placa,
        "peso_manual": peso_manual.as_deref().unwrap_or(NO_DISPONIBLE),
        "comentarios": comentarios,
        "nombre_usuario": no_vacio(req.nombre_usuario).unwrap_or_else(|| user.username.clone()),
        "url_guia_centralizada": url_guia(&state.config.public_base_url, &codigo_guia),
        "fecha_solicitud": ts.with_timezone(&bogota()).format("%d/%m/%Y %H:%M:%S").to_string(),
        "codigo_autorizacion": codigo,
    });

    if let Err(e) = state
        .webhooks
        .post_json(Webhook::Autorizacion, &payload, state.settings.webhook_timeout())
        .await
    {
        state.auth_codes.descartar(&codigo).await;
        return Err(e.into());
    }

    info!(codigo_guia = %codigo_guia, user = %user.username, "Authorization code requested");
    Ok(Json(json!({
        "success": true,
        "message": "Solicitud de autorización enviada. Solicite el código al aprobador.",
    })))
}

#[derive(Debug, Deserialize)]
pub struct ValidarCodigoRequest {
    #[serde(default)]
    pub codigo_guia: Option<String>,
    #[serde(default, rename = "codigoAutorizacion")]
    pub codigo_autorizacion: Option<String>,
}

/// POST /pesaje/validar-codigo
pub async fn validar_codigo(
    State(state): State<AppState>,
    JsonOrForm(req): JsonOrForm<ValidarCodigoRequest>,
) -> ApiResult<Json<Value>> {
    let codigo_guia = requerido(req.codigo_guia, "codigo_guia")?;
    let codigo = requerido(req.codigo_autorizacion, "codigoAutorizacion")?;

    let peso_manual = state
        .auth_codes
        .validar(&codigo_guia, &codigo, now())
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(json!({"success": true, "peso_manual": peso_manual})))
}

/// GET /pesajes
pub async fn listar(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let rows = pesajes::list_pesajes_bruto(&state.db).await?;
    let pesajes: Vec<Value> = rows
        .iter()
        .map(|p| con_fecha_hora(p, p.timestamp_pesaje_utc.as_deref()))
        .collect();
    Ok(Json(json!({"total": pesajes.len(), "pesajes": pesajes})))
}
