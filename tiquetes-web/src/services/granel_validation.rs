//! Bulk-goods vehicle validation reply
//!
//! The VALIDACION_GRANEL webhook answers either with `{"text": "..."}`
//! holding `Key: value` lines, or with a structured JSON object.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::services::weight_parser::parse_decimal;

#[derive(Debug, Error, PartialEq)]
pub enum RespuestaIncompleta {
    #[error("Respuesta incompleta del servicio de validación (faltan peso o guía)")]
    FaltanCampos,

    #[error("El servicio de validación devolvió un peso inválido: {0}")]
    PesoInvalido(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidacionGranel {
    pub success: bool,
    pub peso_kg: Option<f64>,
    pub codigo_sap_granel: Option<String>,
    pub message: String,
}

/// `Key: value` lines; the first `:` separates key and value
pub fn parse_texto(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn peso_desde(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal(&s.to_uppercase().replace("KG", "")),
        _ => None,
    }
}

fn texto_desde(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn interpretar_texto(text: &str) -> Result<ValidacionGranel, RespuestaIncompleta> {
    let campos = parse_texto(text);

    let peso_raw = campos.get("Peso Tara");
    let guia = campos
        .get("Guía de transporte")
        .or_else(|| campos.get("Guia de transporte"));
    let (Some(peso_raw), Some(guia)) = (peso_raw, guia) else {
        return Err(RespuestaIncompleta::FaltanCampos);
    };

    let peso = parse_decimal(&peso_raw.to_uppercase().replace("KG", ""))
        .ok_or_else(|| RespuestaIncompleta::PesoInvalido(peso_raw.clone()))?;

    let nota = campos.get("Nota").cloned().unwrap_or_default();
    let equipo = campos.get("Equipo").cloned().unwrap_or_default();
    let success =
        !equipo.to_lowercase().contains("no valido") && !nota.to_lowercase().contains("no coincide");

    let message = match (nota.is_empty(), success) {
        (false, _) => nota,
        (true, true) => "Validación de texto exitosa.".to_string(),
        (true, false) => "Error en la validación de datos del vehículo.".to_string(),
    };

    Ok(ValidacionGranel {
        success,
        peso_kg: Some(peso),
        codigo_sap_granel: Some(guia.clone()),
        message,
    })
}

/// Interpret the webhook JSON reply
pub fn interpretar_respuesta(reply: &Value) -> Result<ValidacionGranel, RespuestaIncompleta> {
    let reply = match reply {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };

    if let Some(text) = reply.get("text").and_then(Value::as_str) {
        return interpretar_texto(text);
    }

    let exitoso = reply.get("status").and_then(Value::as_str) == Some("success")
        || reply.get("success").and_then(Value::as_bool) == Some(true);

    if exitoso {
        let peso = reply
            .get("peso_kg")
            .or_else(|| reply.get("peso"))
            .and_then(peso_desde);
        let codigo = reply
            .get("codigo_sap_granel")
            .or_else(|| reply.get("codigo_sap"))
            .and_then(texto_desde);
        let (Some(peso), Some(codigo)) = (peso, codigo) else {
            return Err(RespuestaIncompleta::FaltanCampos);
        };
        return Ok(ValidacionGranel {
            success: true,
            peso_kg: Some(peso),
            codigo_sap_granel: Some(codigo),
            message: reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Validación exitosa.")
                .to_string(),
        });
    }

    let message = reply
        .get("message")
        .or_else(|| reply.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("La validación del vehículo no fue exitosa.")
        .to_string();

    Ok(ValidacionGranel {
        success: false,
        peso_kg: None,
        codigo_sap_granel: None,
        message,
    })
}
