//! Tare and net weighing

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use tiquetes_common::db::pesajes::{self, NewPesajeNeto};
use tiquetes_common::guia::{require_etapa, Etapa};
use tiquetes_common::time::utc_timestamp_str;

use super::{con_fecha_hora, no_vacio, requerido, texto_o_numero, JsonOrForm};
use crate::error::{ApiError, ApiResult};
use crate::services::webhook_client::{require_body, Webhook};
use crate::services::weight_parser::{parse_decimal, parse_respuesta_bascula};
use crate::session::CurrentUser;
use crate::uploads::{save_upload, stored_name, Formulario};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegistrarPesajeNetoRequest {
    #[serde(default)]
    pub codigo_guia: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub peso_tara: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub peso_neto: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub peso_producto: Option<String>,
    #[serde(default)]
    pub comentarios: Option<String>,
    #[serde(default)]
    pub respuesta_sap: Option<String>,
    #[serde(default)]
    pub tipo_pesaje_neto: Option<String>,
}

fn peso(value: Option<String>, campo: &str) -> ApiResult<Option<f64>> {
    match no_vacio(value) {
        None => Ok(None),
        Some(v) => parse_decimal(&v)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("'{}' no es un número: {}", campo, v))),
    }
}

/// POST /pesaje-neto/registrar
pub async fn registrar(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonOrForm(req): JsonOrForm<RegistrarPesajeNetoRequest>,
) -> ApiResult<Json<Value>> {
    let codigo_guia = requerido(req.codigo_guia, "codigo_guia")?;
    let datos = require_etapa(&state.db, &codigo_guia, Etapa::Pesaje).await?;
    let peso_bruto = datos.peso_bruto.unwrap_or(0.0);

    let peso_tara = peso(req.peso_tara, "peso_tara")?
        .ok_or_else(|| ApiError::BadRequest("Falta el campo 'peso_tara'".to_string()))?;
    if peso_tara < 0.0 {
        return Err(ApiError::BadRequest("El peso tara no puede ser negativo".to_string()));
    }

    let peso_neto = peso(req.peso_neto, "peso_neto")?.unwrap_or(peso_bruto - peso_tara);
    if peso_neto < 0.0 {
        return Err(ApiError::BadRequest(format!(
            "El peso neto no puede ser negativo (bruto {}, tara {})",
            peso_bruto, peso_tara
        )));
    }
    let peso_producto = peso(req.peso_producto, "peso_producto")?.unwrap_or(peso_neto);

    let ts = utc_timestamp_str();
    let registro = NewPesajeNeto {
        codigo_guia: codigo_guia.clone(),
        peso_tara,
        peso_neto,
        peso_producto,
        tipo_pesaje_neto: no_vacio(req.tipo_pesaje_neto).unwrap_or_else(|| "directo".to_string()),
        comentarios: no_vacio(req.comentarios),
        respuesta_sap: no_vacio(req.respuesta_sap),
        timestamp_pesaje_neto_utc: ts.clone(),
    };
    pesajes::upsert_pesaje_neto(&state.db, &registro).await?;
    info!(
        codigo_guia = %codigo_guia,
        peso_neto,
        user = %user.username,
        "Net weight registered"
    );

    let notificacion = json!({
        "codigo_guia": codigo_guia,
        "codigo_proveedor": datos.codigo_proveedor,
        "nombre_proveedor": datos.nombre_proveedor,
        "peso_bruto": peso_bruto,
        "peso_tara": peso_tara,
        "peso_neto": peso_neto,
        "peso_producto": peso_producto,
        "tipo_pesaje_neto": registro.tipo_pesaje_neto,
        "timestamp_pesaje_neto_utc": ts,
    });
    let webhooks = state.webhooks.clone();
    let timeout = state.settings.webhook_timeout();
    tokio::spawn(async move {
        webhooks
            .notify(Webhook::RegistroPesoNeto, &notificacion, timeout)
            .await;
    });

    Ok(Json(json!({
        "success": true,
        "codigo_guia": codigo_guia,
        "peso_bruto": peso_bruto,
        "peso_tara": peso_tara,
        "peso_neto": peso_neto,
        "peso_producto": peso_producto,
        "redirect_url": format!("/guias/{}", codigo_guia),
    })))
}

/// POST /pesaje-neto/procesar-foto
///
/// Reads the tare from a scale photo. Like the gross reading, nothing is
/// stored until `registrar` is called.
pub async fn procesar_foto(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;
    let codigo_guia = form.require_text("codigo_guia")?;
    let imagen = form.take_image("imagen")?;

    let datos = require_etapa(&state.db, &codigo_guia, Etapa::Pesaje).await?;
    if datos.peso_neto.is_some() {
        return Err(ApiError::Conflict(format!(
            "La guía {} ya tiene registrada la tara",
            codigo_guia
        )));
    }

    let path = save_upload(&state.layout.uploads_dir, "tara", &imagen).await?;
    let imagen_pesaje = stored_name(&path);

    let reply = state
        .webhooks
        .post_file(
            Webhook::Pesaje,
            imagen.adjunto("file"),
            &[("codigo_proveedor", datos.codigo_proveedor.clone())],
            state.settings.webhook_timeout(),
        )
        .await?;
    let reply = require_body(Webhook::Pesaje, reply)?;
    let lectura = parse_respuesta_bascula(&reply.body);

    let peso_tara = match lectura.peso {
        Some(peso) if lectura.exitoso => peso,
        _ => {
            return Ok(Json(json!({
                "success": false,
                "message": if lectura.exitoso {
                    "No se pudo extraer el peso de la respuesta".to_string()
                } else {
                    reply.body.trim().to_string()
                },
                "imagen_pesaje": imagen_pesaje,
            })));
        }
    };

    info!(codigo_guia = %codigo_guia, peso_tara = %peso_tara, "Tare photo read");
    Ok(Json(json!({
        "success": true,
        "peso_tara": peso_tara,
        "imagen_pesaje": imagen_pesaje,
        "message": "Peso tara detectado correctamente",
    })))
}

/// GET /pesaje-neto/:guia
pub async fn detalle(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Json<Value>> {
    let registro = pesajes::get_pesaje_neto(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Pesaje neto de la guía {}", codigo_guia)))?;
    Ok(Json(con_fecha_hora(&registro, registro.timestamp_pesaje_neto_utc.as_deref())))
}
