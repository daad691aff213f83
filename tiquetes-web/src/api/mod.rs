//! HTTP API handlers for tiquetes-web

pub mod auth;
pub mod clasificacion;
pub mod comparacion;
pub mod entrada;
pub mod graneles;
pub mod guias;
pub mod health;
pub mod pesaje;
pub mod pesaje_neto;
pub mod placa;
pub mod presupuesto;
pub mod salida;
pub mod ui;

pub use health::health_routes;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, Form, FromRequest, Request},
    http::header,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tiquetes_common::time::db_timestamp_to_bogota;

use crate::error::ApiError;

/// Request body accepted as JSON or as `application/x-www-form-urlencoded`
pub struct JsonOrForm<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send + 'static,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e: JsonRejection| ApiError::BadRequest(e.body_text()))?;
            Ok(Self(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Ok(Self(value))
        }
    }
}

/// Accept a JSON string or number; blank strings become `None`
pub fn texto_o_numero<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Texto(String),
        Numero(serde_json::Number),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Texto(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Raw::Numero(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Trim; blank becomes `None`
pub fn no_vacio(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn requerido(value: Option<String>, campo: &str) -> Result<String, ApiError> {
    no_vacio(value).ok_or_else(|| ApiError::BadRequest(format!("Falta el campo '{}'", campo)))
}

/// Link to the public guide page
pub fn url_guia(base_url: &str, codigo_guia: &str) -> String {
    format!("{}/guias/{}", base_url.trim_end_matches('/'), codigo_guia)
}

/// Serialize a row and add Bogotá `fecha`/`hora` from its UTC timestamp
pub fn con_fecha_hora<T: Serialize>(record: &T, ts_utc: Option<&str>) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        let (fecha, hora) = ts_utc
            .and_then(db_timestamp_to_bogota)
            .unwrap_or_default();
        map.insert("fecha".to_string(), Value::String(fecha));
        map.insert("hora".to_string(), Value::String(hora));
    }
    value
}
