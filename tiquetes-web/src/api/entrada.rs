//! Entry intake
//!
//! The photo flow is three calls sharing a draft kept in the session:
//! `procesar` reads the ticket and plate photos, `revalidar` turns the
//! (possibly corrected) fields into a validated record, and `registrar`
//! creates the guide. `registrar-manual` does it in one step without the
//! external services.

use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use tiquetes_common::db::entradas::{self, EntryUpdate};
use tiquetes_common::db::models::NewEntry;
use tiquetes_common::guia::generar_codigo_guia;
use tiquetes_common::time::{
    bogota_day_range_utc, fecha_hora_bogota, now, parse_iso_date, to_db_timestamp,
};

use super::{con_fecha_hora, no_vacio, texto_o_numero, url_guia, JsonOrForm};
use crate::error::{ApiError, ApiResult};
use crate::services::ticket_parser::{
    codigo_de, formatear_local, parse_markdown_response, parse_revalidation_reply, CampoValor,
    ResultadoTiquete,
};
use crate::services::webhook_client::{require_body, Webhook};
use crate::session::CurrentUser;
use crate::uploads::{save_upload, stored_name, Formulario};
use crate::AppState;

/// POST /entrada/procesar
pub async fn procesar(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;
    let tiquete = form.take_image("tiquete")?;
    let placa = match form.take_file("placa") {
        Some(file) => {
            crate::uploads::require_image(&file)?;
            Some(file)
        }
        None => None,
    };

    let tiquete_path = save_upload(&state.layout.uploads_dir, "tiquete", &tiquete).await?;
    let placa_path = match &placa {
        Some(file) => Some(save_upload(&state.layout.uploads_dir, "placa", file).await?),
        None => None,
    };

    let timeout = state.settings.webhook_timeout();
    let ticket_call = state
        .webhooks
        .post_file(Webhook::Process, tiquete.adjunto("file"), &[], timeout);
    let plate_call = async {
        let file = placa.as_ref()?;
        let result = state
            .webhooks
            .post_file(Webhook::Placa, file.adjunto("file"), &[], timeout)
            .await
            .map_err(|e| e.to_string())
            .and_then(|reply| {
                let text = reply.body.trim().to_string();
                if text.is_empty() {
                    Err("El servicio de placas no devolvió texto".to_string())
                } else {
                    Ok(text)
                }
            });
        Some(result)
    };
    let (ticket_reply, plate_reply) = tokio::join!(ticket_call, plate_call);

    let reply = require_body(Webhook::Process, ticket_reply?)?;
    let parsed = parse_markdown_response(&reply.body);
    let resultado = parsed.resultado();
    if resultado == ResultadoTiquete::Error {
        return Err(ApiError::BadGateway(
            "No se pudo interpretar la respuesta del tiquete".to_string(),
        ));
    }

    let (plate_text, plate_error) = match plate_reply {
        Some(Ok(text)) => (Some(text), None),
        Some(Err(e)) => {
            warn!("Plate recognition failed: {}", e);
            (None, Some(e))
        }
        None => (None, None),
    };

    info!(
        user = %user.username,
        campos = parsed.table_data.len(),
        placa = plate_text.is_some(),
        "Ticket processed"
    );

    let mut response = json!({
        "result": resultado,
        "parsed_data": parsed,
    });
    if let Some(text) = &plate_text {
        response["plate_text"] = json!(text);
    }
    if let Some(error) = &plate_error {
        response["plate_error"] = json!(error);
    }
    if resultado == ResultadoTiquete::Warning {
        response["message"] = json!("La imagen no parece ser un tiquete válido");
    }

    let image_filename = stored_name(&tiquete_path);
    let plate_filename = placa_path.as_deref().map(stored_name);
    state
        .sessions
        .update_entrada(&user.token, move |draft| {
            draft.image_filename = Some(image_filename);
            draft.plate_filename = plate_filename;
            draft.parsed_data = Some(parsed);
            draft.plate_text = plate_text;
            draft.datos_validados = None;
        })
        .await;

    Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevalidarRequest {
    #[serde(default)]
    pub table_data: Option<Vec<CampoValor>>,
}

/// POST /entrada/revalidar
pub async fn revalidar(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Option<Json<RevalidarRequest>>,
) -> ApiResult<Json<Value>> {
    let draft = state.sessions.entrada(&user.token).await;

    let campos: Vec<CampoValor> = match body.and_then(|Json(req)| req.table_data) {
        Some(campos) if !campos.is_empty() => campos,
        _ => draft
            .parsed_data
            .as_ref()
            .map(|p| p.table_data.iter().map(CampoValor::from).collect())
            .unwrap_or_default(),
    };
    if campos.is_empty() {
        return Err(ApiError::BadRequest("No hay datos del tiquete para validar".to_string()));
    }

    let codigo = codigo_de(&campos)
        .ok_or_else(|| ApiError::BadRequest("El campo 'Código' es obligatorio".to_string()))?
        .to_string();

    let payload = json!({"codigo": codigo, "datos": campos});
    let remoto = match state
        .webhooks
        .post_json(Webhook::Revalidation, &payload, state.settings.revalidation_timeout())
        .await
    {
        Ok(reply) => parse_revalidation_reply(&reply.body),
        Err(e) => {
            warn!("Revalidation webhook failed, using local formatting: {}", e);
            None
        }
    };

    let (mut datos, fuente) = match remoto {
        Some(datos) => (datos, "webhook"),
        None => (formatear_local(&campos), "local"),
    };
    let sin_codigo = datos
        .get("codigo")
        .and_then(texto)
        .is_none();
    if sin_codigo {
        datos.insert("codigo".to_string(), Value::String(codigo));
    }

    let guardados = datos.clone();
    state
        .sessions
        .update_entrada(&user.token, move |draft| draft.datos_validados = Some(guardados))
        .await;

    Ok(Json(json!({
        "status": "success",
        "datos_validados": datos,
        "fuente": fuente,
    })))
}

fn texto(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn campo(datos: &Map<String, Value>, claves: &[&str]) -> Option<String> {
    claves.iter().find_map(|k| datos.get(*k).and_then(texto))
}

/// POST /entrada/registrar
pub async fn registrar(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Json<Value>> {
    let draft = state.sessions.entrada(&user.token).await;
    let datos = draft
        .datos_validados
        .ok_or_else(|| ApiError::BadRequest("No hay datos validados para registrar".to_string()))?;
    let codigo = campo(&datos, &["codigo"])
        .ok_or_else(|| ApiError::BadRequest("Los datos validados no tienen código".to_string()))?;

    let ts = now();
    let codigo_guia = generar_codigo_guia(&state.db, &codigo, ts).await?;
    let url_qr = url_guia(&state.config.public_base_url, &codigo_guia);
    let (fecha, hora) = fecha_hora_bogota(ts);

    let nombre = campo(&datos, &["nombre_agricultor", "nombre"]);
    let placa = campo(&datos, &["placa"]).or_else(|| draft.plate_text.clone());
    let transportador = campo(&datos, &["transportador"]);
    let racimos = campo(&datos, &["racimos", "cantidad_racimos"]);
    let acarreo = campo(&datos, &["acarreo"]).unwrap_or_else(|| "No".to_string());
    let cargo = campo(&datos, &["cargo"]).unwrap_or_else(|| "No".to_string());
    let nota = campo(&datos, &["nota"])
        .or_else(|| draft.parsed_data.as_ref().and_then(|p| no_vacio(Some(p.nota.clone()))));
    let fecha_tiquete = campo(&datos, &["fecha_tiquete", "fecha"]);

    let payload = json!({
        "codigo": codigo,
        "nombre": nombre,
        "placa": placa,
        "transportador": transportador,
        "racimos": racimos,
        "acarreo": acarreo,
        "cargo": cargo,
        "nota": nota,
        "fecha": fecha,
        "hora": hora,
        "fecha_tiquete": fecha_tiquete,
        "url_qr": url_qr,
        "codigo_guia": codigo_guia,
    });
    state
        .webhooks
        .post_json(Webhook::Register, &payload, state.settings.webhook_timeout())
        .await?;

    let entry = NewEntry {
        codigo_guia: codigo_guia.clone(),
        nombre_proveedor: nombre.unwrap_or_default(),
        codigo_proveedor: codigo,
        cantidad_racimos: racimos.unwrap_or_default(),
        placa: placa.unwrap_or_default(),
        transportador,
        acarreo: Some(acarreo),
        cargo: Some(cargo),
        codigo_guia_transporte_sap: campo(&datos, &["codigo_guia_transporte_sap"]),
        observaciones: campo(&datos, &["observaciones"]),
        image_filename: draft.image_filename,
        plate_filename: draft.plate_filename,
        plate_text: draft.plate_text,
        fecha_tiquete,
        nota,
        url_qr: Some(url_qr.clone()),
        timestamp_registro_utc: to_db_timestamp(ts),
    };
    entradas::insert_entry(&state.db, &entry).await?;
    info!(codigo_guia = %codigo_guia, user = %user.username, "Entry registered");

    state
        .sessions
        .update_entrada(&user.token, |draft| *draft = Default::default())
        .await;

    Ok(Json(json!({
        "status": "success",
        "codigo_guia": codigo_guia,
        "url_qr": url_qr,
        "redirect_url": format!("/guias/{}", codigo_guia),
    })))
}

/// POST /entrada/registrar-manual
pub async fn registrar_manual(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;

    let codigo = form.require_text("codigo_proveedor")?;
    let nombre = form.require_text("nombre_proveedor")?;
    let racimos = form.require_text("cantidad_racimos")?;
    let placa = form.require_text("placa")?;
    let imagen = form.take_image("imagen_tiquete")?;

    let path = save_upload(&state.layout.uploads_dir, "tiquete", &imagen).await?;

    let ts = now();
    let codigo_guia = generar_codigo_guia(&state.db, &codigo, ts).await?;
    let url_qr = url_guia(&state.config.public_base_url, &codigo_guia);

    let entry = NewEntry {
        codigo_guia: codigo_guia.clone(),
        nombre_proveedor: nombre,
        codigo_proveedor: codigo,
        cantidad_racimos: racimos,
        placa,
        transportador: form.text("transportador"),
        acarreo: Some(form.text("acarreo").unwrap_or_else(|| "No".to_string())),
        cargo: Some(form.text("cargo").unwrap_or_else(|| "No".to_string())),
        codigo_guia_transporte_sap: form.text("codigo_guia_transporte_sap"),
        observaciones: form.text("observaciones"),
        image_filename: Some(stored_name(&path)),
        url_qr: Some(url_qr.clone()),
        timestamp_registro_utc: to_db_timestamp(ts),
        ..Default::default()
    };
    entradas::insert_entry(&state.db, &entry).await?;
    info!(codigo_guia = %codigo_guia, user = %user.username, "Manual entry registered");

    Ok(Json(json!({
        "status": "success",
        "codigo_guia": codigo_guia,
        "url_qr": url_qr,
        "redirect_url": format!("/guias/{}", codigo_guia),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct EntradasQuery {
    pub fecha_desde: Option<String>,
    pub fecha_hasta: Option<String>,
    pub codigo_proveedor: Option<String>,
    pub placa: Option<String>,
}

fn fecha_filtro(value: Option<String>, nombre: &str) -> ApiResult<Option<chrono::NaiveDate>> {
    match no_vacio(value) {
        Some(v) => parse_iso_date(&v)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Fecha inválida en '{}': {}", nombre, v))),
        None => Ok(None),
    }
}

/// GET /entradas
pub async fn listar(
    State(state): State<AppState>,
    Query(query): Query<EntradasQuery>,
) -> ApiResult<Json<Value>> {
    let desde = fecha_filtro(query.fecha_desde, "fecha_desde")?;
    let hasta = fecha_filtro(query.fecha_hasta, "fecha_hasta")?;
    let (desde_utc, hasta_utc) = bogota_day_range_utc(desde, hasta);

    let filter = entradas::EntradaFilter {
        desde_utc,
        hasta_utc,
        codigo_proveedor: no_vacio(query.codigo_proveedor),
        placa: no_vacio(query.placa),
    };
    let rows = entradas::list_entries(&state.db, &filter).await?;
    let entradas: Vec<Value> = rows
        .iter()
        .map(|e| con_fecha_hora(e, e.timestamp_registro_utc.as_deref()))
        .collect();

    Ok(Json(json!({"total": entradas.len(), "entradas": entradas})))
}

/// GET /entradas/:codigo_guia
pub async fn detalle(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Json<Value>> {
    let entry = entradas::get_entry(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Guía {}", codigo_guia)))?;
    Ok(Json(con_fecha_hora(&entry, entry.timestamp_registro_utc.as_deref())))
}

#[derive(Debug, Default, Deserialize)]
pub struct EditarEntradaRequest {
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub codigo_proveedor: Option<String>,
    #[serde(default)]
    pub nombre_proveedor: Option<String>,
    #[serde(default)]
    pub placa: Option<String>,
    #[serde(default)]
    pub transportador: Option<String>,
    #[serde(default, deserialize_with = "texto_o_numero")]
    pub cantidad_racimos: Option<String>,
    #[serde(default)]
    pub observaciones: Option<String>,
}

/// POST /entradas/:codigo_guia/editar
///
/// Corrects entry fields after registration. Blank fields keep their value;
/// `observaciones` is stored as the entry note.
pub async fn editar(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(codigo_guia): Path<String>,
    JsonOrForm(req): JsonOrForm<EditarEntradaRequest>,
) -> ApiResult<Json<Value>> {
    let update = EntryUpdate {
        codigo_proveedor: no_vacio(req.codigo_proveedor),
        nombre_proveedor: no_vacio(req.nombre_proveedor),
        placa: no_vacio(req.placa),
        transportador: no_vacio(req.transportador),
        cantidad_racimos: no_vacio(req.cantidad_racimos),
        nota: no_vacio(req.observaciones),
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest("No hay campos para actualizar".to_string()));
    }

    entradas::update_entry(&state.db, &codigo_guia, &update).await?;
    info!(codigo_guia = %codigo_guia, user = %user.username, "Entry edited");

    let entry = entradas::get_entry(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Guía {}", codigo_guia)))?;
    Ok(Json(con_fecha_hora(&entry, entry.timestamp_registro_utc.as_deref())))
}
