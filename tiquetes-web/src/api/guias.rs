//! Consolidated guide view, search, dashboard and printable guide

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use tiquetes_common::db::busqueda::{self, BusquedaFilter, EstadoFiltro, GuiaResumen};
use tiquetes_common::guia::{get_datos_guia, get_estado_guia, EstadoGuia};
use tiquetes_common::time::{
    bogota_day_range_utc, db_timestamp_to_bogota, fecha_hora_bogota, now, parse_iso_date,
};

use super::{no_vacio, url_guia};
use crate::error::{ApiError, ApiResult};
use crate::services::guia_pdf::render_guia_pdf;
use crate::services::qr::qr_svg;
use crate::AppState;

/// GET /api/guias/:codigo
pub async fn datos(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Json<Value>> {
    let datos = get_datos_guia(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Guía {}", codigo_guia)))?;
    let estado = EstadoGuia::from_datos(Some(&datos));
    Ok(Json(json!({"datos": datos, "estado": estado})))
}

/// GET /api/guias/:codigo/estado
pub async fn estado(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Json<EstadoGuia>> {
    Ok(Json(get_estado_guia(&state.db, &codigo_guia).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangoQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub proveedores: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BusquedaQuery {
    pub codigo_guia: Option<String>,
    pub placa: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    pub proveedores: Option<String>,
    pub estado_filtro: Option<String>,
}

/// Inclusive Bogotá date range as UTC storage bounds
fn rango_utc(
    start: Option<String>,
    end: Option<String>,
) -> ApiResult<(Option<String>, Option<String>)> {
    let parse = |value: Option<String>| match no_vacio(value) {
        Some(v) => parse_iso_date(&v)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("Fecha inválida: {}", v))),
        None => Ok(None),
    };
    Ok(bogota_day_range_utc(parse(start)?, parse(end)?))
}

/// Comma-separated supplier codes
pub fn parse_proveedores(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn resumen_json(g: &GuiaResumen) -> Value {
    let fecha_hora = g
        .timestamp_registro_utc
        .as_deref()
        .and_then(db_timestamp_to_bogota)
        .map(|(fecha, hora)| format!("{} {}", fecha, hora))
        .unwrap_or_default();
    json!({
        "codigo_guia": g.codigo_guia,
        "nombre_proveedor": g.nombre_proveedor,
        "codigo_proveedor": g.codigo_proveedor,
        "cantidad_racimos": g.cantidad_racimos,
        "placa": g.placa,
        "tipo_fruta": busqueda::tipo_fruta(g.cantidad_racimos.as_deref()),
        "estado": if g.tiene_salida { "Completado" } else { "Activo" },
        "fecha_hora": fecha_hora,
        "url_detalle": format!("/guias/{}", g.codigo_guia),
    })
}

/// GET /api/buscar_guias
pub async fn buscar(
    State(state): State<AppState>,
    Query(query): Query<BusquedaQuery>,
) -> ApiResult<Json<Value>> {
    let (desde_utc, hasta_utc) = rango_utc(query.start_date, query.end_date)?;
    let estado = match no_vacio(query.estado_filtro) {
        None => None,
        Some(v) if v == "todos" => None,
        Some(v) => Some(
            EstadoFiltro::parse(&v)
                .ok_or_else(|| ApiError::BadRequest(format!("estado_filtro inválido: {}", v)))?,
        ),
    };

    let filter = BusquedaFilter {
        codigo_guia: no_vacio(query.codigo_guia),
        placa: no_vacio(query.placa),
        desde_utc,
        hasta_utc,
        proveedores: parse_proveedores(query.proveedores),
        estado,
    };
    let guias: Vec<Value> = busqueda::buscar_guias(&state.db, &filter)
        .await?
        .iter()
        .map(resumen_json)
        .collect();

    Ok(Json(json!({"total": guias.len(), "guias": guias})))
}

/// GET /api/dashboard/stats
pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<RangoQuery>,
) -> ApiResult<Json<Value>> {
    let (desde_utc, hasta_utc) = rango_utc(query.start_date, query.end_date)?;
    let proveedores = parse_proveedores(query.proveedores);
    let stats = busqueda::dashboard_stats(&state.db, desde_utc, hasta_utc, &proveedores).await?;

    let mut value = json!(stats);
    value["ultimos_registros"] = stats.ultimos_registros.iter().map(resumen_json).collect();
    Ok(Json(value))
}

/// GET /api/dashboard/proveedores
pub async fn proveedores(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let proveedores = busqueda::listar_proveedores(&state.db).await?;
    Ok(Json(json!({"total": proveedores.len(), "proveedores": proveedores})))
}

/// GET /guias/:codigo/qr
///
/// SVG QR code of the public guide link.
pub async fn qr(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if get_datos_guia(&state.db, &codigo_guia).await?.is_none() {
        return Err(ApiError::NotFound(format!("Guía {}", codigo_guia)));
    }
    let svg = qr_svg(&url_guia(&state.config.public_base_url, &codigo_guia))
        .map_err(|e| ApiError::Internal(format!("QR: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

/// GET /guias/:codigo/pdf
pub async fn pdf(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let datos = get_datos_guia(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Guía {}", codigo_guia)))?;
    let estado = EstadoGuia::from_datos(Some(&datos));
    let (fecha, hora) = fecha_hora_bogota(now());
    let bytes = render_guia_pdf(
        &datos,
        &estado,
        &url_guia(&state.config.public_base_url, &codigo_guia),
        &format!("{} {}", fecha, hora),
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let disposition = format!("attachment; filename=\"guia_{}.pdf\"", datos.codigo_guia);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proveedores() {
        assert_eq!(
            parse_proveedores(Some(" 0150076A, ,0150080B ".to_string())),
            vec!["0150076A".to_string(), "0150080B".to_string()]
        );
        assert!(parse_proveedores(None).is_empty());
    }

    #[test]
    fn test_rango_rejects_bad_dates() {
        assert!(rango_utc(Some("05/01/2024".into()), None).is_err());
        let (desde, hasta) = rango_utc(Some("2024-01-05".into()), Some("2024-01-05".into())).unwrap();
        assert_eq!(desde.as_deref(), Some("2024-01-05 05:00:00"));
        assert_eq!(hasta.as_deref(), Some("2024-01-06 04:59:59"));
    }
}
