//! Manual classification and automatic (Roboflow) processing

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use tiquetes_common::db::clasificaciones::{self, NewClasificacionManual};
use tiquetes_common::db::models::ConteoManual;
use tiquetes_common::guia::{require_etapa, Etapa};
use tiquetes_common::time::utc_timestamp_str;

use super::con_fecha_hora;
use crate::error::{ApiError, ApiResult};
use crate::services::classification_job::{
    ClasificacionJob, EstadoProceso, ProgresoClasificacion,
};
use crate::services::roboflow_client::RoboflowError;
use crate::services::webhook_client::Webhook;
use crate::session::CurrentUser;
use crate::uploads::{require_image, save_upload, Formulario};
use crate::AppState;

/// Empty means 0; anything else must be a non-negative integer
fn parse_conteo(form: &Formulario, campo: &str) -> ApiResult<u32> {
    match form.text(campo) {
        None => Ok(0),
        Some(v) => v.parse::<u32>().map_err(|_| {
            ApiError::BadRequest(format!("'{}' debe ser un entero no negativo: {}", campo, v))
        }),
    }
}

/// POST /clasificacion/registrar
pub async fn registrar(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;
    let codigo_guia = form.require_text("codigo_guia")?;
    let datos = require_etapa(&state.db, &codigo_guia, Etapa::Pesaje).await?;

    let conteo = ConteoManual {
        verde: parse_conteo(&form, "verdes")?,
        sobremaduro: parse_conteo(&form, "sobremaduros")?,
        danio_corona: parse_conteo(&form, "dano_corona")?,
        pendunculo_largo: parse_conteo(&form, "pedunculo_largo")?,
        podrido: parse_conteo(&form, "podridos")?,
    };

    let max_fotos = state.settings.max_clasificacion_fotos;
    let enviadas = form.file_names().filter(|n| n.starts_with("foto-")).count();
    if enviadas > max_fotos {
        return Err(ApiError::BadRequest(format!(
            "Se permiten máximo {} fotos",
            max_fotos
        )));
    }

    // Validate every photo before anything is written
    let mut recibidas = Vec::new();
    for i in 1..=max_fotos {
        if let Some(foto) = form.take_file(&format!("foto-{}", i)) {
            require_image(&foto)?;
            recibidas.push((i, foto));
        }
    }
    if form.file_names().any(|n| n.starts_with("foto-")) {
        return Err(ApiError::BadRequest(format!(
            "Las fotos deben llamarse foto-1 a foto-{}",
            max_fotos
        )));
    }

    if state.progreso.is_processing(&codigo_guia).await {
        return Err(ApiError::Conflict(format!(
            "La guía {} se está procesando",
            codigo_guia
        )));
    }

    let dir = state.layout.uploads_dir.join("clasificacion").join(&codigo_guia);
    let mut fotos = Vec::new();
    for (i, foto) in &recibidas {
        let path = save_upload(&dir, &format!("foto_{}", i), foto).await?;
        fotos.push(path.display().to_string());
    }

    let ts = utc_timestamp_str();
    let registro = NewClasificacionManual {
        codigo_guia: codigo_guia.clone(),
        codigo_proveedor: Some(datos.codigo_proveedor.clone()),
        nombre_proveedor: Some(datos.nombre_proveedor.clone()),
        conteo,
        fotos: fotos.clone(),
        observaciones: form.text("observaciones"),
        timestamp_clasificacion_utc: ts.clone(),
    };
    clasificaciones::upsert_clasificacion_manual(&state.db, &registro).await?;
    state.progreso.clear(&codigo_guia).await;
    info!(
        codigo_guia = %codigo_guia,
        fotos = fotos.len(),
        user = %user.username,
        "Manual classification registered"
    );

    let notificacion = json!({
        "codigo_guia": codigo_guia,
        "codigo_proveedor": datos.codigo_proveedor,
        "nombre_proveedor": datos.nombre_proveedor,
        "clasificacion_manual": conteo,
        "observaciones": registro.observaciones,
        "timestamp_clasificacion_utc": ts,
    });
    let webhooks = state.webhooks.clone();
    let timeout = state.settings.webhook_timeout();
    tokio::spawn(async move {
        webhooks
            .notify(Webhook::RegistroClasificacion, &notificacion, timeout)
            .await;
    });

    Ok(Json(json!({
        "success": true,
        "codigo_guia": codigo_guia,
        "fotos": fotos.len(),
        "redirect_url": format!("/guias/{}", codigo_guia),
    })))
}

/// POST /clasificacion/:guia/iniciar-procesamiento
pub async fn iniciar_procesamiento(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let clasificacion = clasificaciones::get_clasificacion(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Clasificación de la guía {}", codigo_guia)))?;

    let fotos: Vec<PathBuf> = clasificacion.fotos().into_iter().map(PathBuf::from).collect();
    if fotos.is_empty() {
        return Err(ApiError::BadRequest(
            "La guía no tiene fotos para procesar".to_string(),
        ));
    }
    if !state.roboflow.is_configured() {
        return Err(RoboflowError::NotConfigured.into());
    }
    if !state.progreso.try_start(&codigo_guia).await {
        return Err(ApiError::Conflict(format!(
            "La guía {} ya se está procesando",
            codigo_guia
        )));
    }

    ClasificacionJob {
        pool: state.db.clone(),
        roboflow: state.roboflow.clone(),
        progreso: state.progreso.clone(),
        clasificaciones_dir: state.layout.clasificaciones_dir.clone(),
        codigo_guia: codigo_guia.clone(),
        fotos,
    }
    .spawn();

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": EstadoProceso::Processing,
            "message": "Procesamiento automático iniciado",
            "codigo_guia": codigo_guia,
        })),
    ))
}

/// GET /clasificacion/:guia/estado-procesamiento
pub async fn estado_procesamiento(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Json<ProgresoClasificacion>> {
    if let Some(progreso) = state.progreso.get(&codigo_guia).await {
        return Ok(Json(progreso));
    }

    let almacenado = clasificaciones::get_clasificacion(&state.db, &codigo_guia)
        .await?
        .is_some_and(|c| c.clasificacion_automatica_json.is_some());

    Ok(Json(if almacenado {
        ProgresoClasificacion::new(EstadoProceso::Completado, 100, "Clasificación automática disponible")
    } else {
        ProgresoClasificacion::new(EstadoProceso::NotStarted, 0, "Procesamiento no iniciado")
    }))
}

fn parse_json(value: Option<&str>) -> Value {
    value
        .and_then(|j| serde_json::from_str(j).ok())
        .unwrap_or(Value::Null)
}

/// GET /clasificacion/:guia
pub async fn detalle(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Json<Value>> {
    let c = clasificaciones::get_clasificacion(&state.db, &codigo_guia)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Clasificación de la guía {}", codigo_guia)))?;

    let mut response = con_fecha_hora(
        &json!({
            "codigo_guia": c.codigo_guia,
            "codigo_proveedor": c.codigo_proveedor,
            "nombre_proveedor": c.nombre_proveedor,
            "estado": c.estado,
            "clasificacion_manual": {
                "verde": c.verde_manual,
                "sobremaduro": c.sobremaduro_manual,
                "danio_corona": c.danio_corona_manual,
                "pendunculo_largo": c.pendunculo_largo_manual,
                "podrido": c.podrido_manual,
            },
            "observaciones": c.observaciones,
            "total_racimos_detectados": c.total_racimos_detectados,
        }),
        c.timestamp_clasificacion_utc.as_deref(),
    );
    response["fotos"] = json!(c.fotos());
    response["clasificacion_automatica"] = parse_json(c.clasificacion_automatica_json.as_deref());
    response["clasificacion_consolidada"] = parse_json(c.clasificacion_consolidada.as_deref());

    Ok(Json(response))
}

/// GET /clasificaciones
pub async fn listar(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let rows = clasificaciones::list_clasificaciones(&state.db).await?;
    let clasificaciones: Vec<Value> = rows
        .iter()
        .map(|c| {
            let mut value = con_fecha_hora(c, c.timestamp_clasificacion_utc.as_deref());
            value["automatica_disponible"] = json!(c.clasificacion_automatica_json.is_some());
            value
        })
        .collect();
    Ok(Json(json!({"total": clasificaciones.len(), "clasificaciones": clasificaciones})))
}
