//! Daily budget upload and listing

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use tiquetes_common::db::presupuesto;
use tiquetes_common::time::{parse_iso_date, utc_timestamp_str};

use super::no_vacio;
use crate::error::{ApiError, ApiResult};
use crate::services::budget_parser::parse_file;
use crate::uploads::Formulario;
use crate::AppState;

/// POST /presupuesto/upload
pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;
    let archivo = form
        .take_file("archivo")
        .ok_or_else(|| ApiError::BadRequest("Falta el archivo 'archivo'".to_string()))?;

    let parsed = parse_file(&archivo.filename, &archivo.bytes)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let guardados = presupuesto::upsert_presupuesto(&state.db, &parsed.filas, &utc_timestamp_str()).await?;

    info!(
        filename = %archivo.filename,
        guardados,
        omitidos = parsed.omitidos,
        "Budget uploaded"
    );
    Ok(Json(json!({
        "success": true,
        "guardados": guardados,
        "omitidos": parsed.omitidos,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PresupuestoQuery {
    pub inicio: Option<String>,
    pub fin: Option<String>,
}

/// GET /presupuesto
pub async fn listar(
    State(state): State<AppState>,
    Query(query): Query<PresupuestoQuery>,
) -> ApiResult<Json<Value>> {
    let parse = |value: Option<String>| match no_vacio(value) {
        Some(v) => parse_iso_date(&v)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Fecha inválida: {}", v))),
        None => Ok(None),
    };
    let filas = presupuesto::list_presupuesto(&state.db, parse(query.inicio)?, parse(query.fin)?).await?;
    Ok(Json(json!({"total": filas.len(), "presupuesto": filas})))
}
