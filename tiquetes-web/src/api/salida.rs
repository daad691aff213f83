//! Vehicle exit

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use tiquetes_common::db::salidas;
use tiquetes_common::guia::{require_etapa, Etapa};
use tiquetes_common::time::utc_timestamp_str;

use super::{con_fecha_hora, no_vacio, requerido, JsonOrForm};
use crate::error::{ApiError, ApiResult};
use crate::session::CurrentUser;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegistrarSalidaRequest {
    #[serde(default)]
    pub codigo_guia: Option<String>,
    #[serde(default)]
    pub comentarios_salida: Option<String>,
}

/// POST /salida/registrar
pub async fn registrar(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonOrForm(req): JsonOrForm<RegistrarSalidaRequest>,
) -> ApiResult<Json<Value>> {
    let codigo_guia = requerido(req.codigo_guia, "codigo_guia")?;
    require_etapa(&state.db, &codigo_guia, Etapa::PesajeNeto).await?;

    let comentarios = no_vacio(req.comentarios_salida);
    salidas::upsert_salida(&state.db, &codigo_guia, comentarios.as_deref(), &utc_timestamp_str())
        .await?;
    info!(codigo_guia = %codigo_guia, user = %user.username, "Exit registered");

    Ok(Json(json!({
        "success": true,
        "codigo_guia": codigo_guia,
        "redirect_url": format!("/guias/{}", codigo_guia),
    })))
}

/// GET /salida/:guia
pub async fn detalle(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Json<Value>> {
    let salida = salidas::get_salida(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Salida de la guía {}", codigo_guia)))?;
    Ok(Json(con_fecha_hora(&salida, salida.timestamp_salida_utc.as_deref())))
}
