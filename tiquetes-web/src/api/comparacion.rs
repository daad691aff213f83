//! SAP export comparison

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::services::sap_comparison::{comparar, parse_export};
use crate::uploads::Formulario;
use crate::AppState;

const EXTENSIONES: [&str; 2] = ["txt", "tsv"];

/// POST /comparacion-guias
pub async fn comparar_guias(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;
    let archivo = form
        .take_file("archivo_sap")
        .ok_or_else(|| ApiError::BadRequest("Falta el archivo 'archivo_sap'".to_string()))?;

    let valida = archivo
        .extension()
        .is_some_and(|ext| EXTENSIONES.contains(&ext.as_str()));
    if !valida {
        return Err(ApiError::BadRequest(format!(
            "Formato no soportado: {}. Use .txt o .tsv",
            archivo.filename
        )));
    }

    let texto = String::from_utf8(archivo.bytes)
        .map_err(|_| ApiError::BadRequest("El archivo debe estar en UTF-8".to_string()))?;
    let lineas = parse_export(&texto);
    let resultados = comparar(&state.db, lineas).await?;

    info!(
        filename = %archivo.filename,
        lineas = resultados.len(),
        "SAP export compared"
    );
    Ok(Json(json!({"total": resultados.len(), "resultados": resultados})))
}
