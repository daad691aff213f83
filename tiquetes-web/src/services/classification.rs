//! Bunch classification from Roboflow workflow output
//!
//! Roboflow class names vary between workflow versions, so both the class
//! keys of direct counts and the `class` of individual predictions go
//! through [`mapear_clase`]. Per image, direct counts win over predictions;
//! a valid `potholes_detected` in `outputs[0]` overrides the image total.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Internal bunch class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClaseRacimo {
    Verde,
    Sobremaduro,
    DanioCorona,
    PendunculoLargo,
    Podrido,
    Maduro,
}

impl ClaseRacimo {
    pub const TODAS: [ClaseRacimo; 6] = [
        ClaseRacimo::Verde,
        ClaseRacimo::Sobremaduro,
        ClaseRacimo::DanioCorona,
        ClaseRacimo::PendunculoLargo,
        ClaseRacimo::Podrido,
        ClaseRacimo::Maduro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaseRacimo::Verde => "verde",
            ClaseRacimo::Sobremaduro => "sobremaduro",
            ClaseRacimo::DanioCorona => "danio_corona",
            ClaseRacimo::PendunculoLargo => "pendunculo_largo",
            ClaseRacimo::Podrido => "podrido",
            ClaseRacimo::Maduro => "maduro",
        }
    }
}

/// Map a Roboflow class or count key to an internal class
pub fn mapear_clase(key: &str) -> Option<ClaseRacimo> {
    match key.trim().to_lowercase().as_str() {
        "verde" | "racimos verdes" => Some(ClaseRacimo::Verde),
        "sobremaduro" | "racimo sobremaduro" => Some(ClaseRacimo::Sobremaduro),
        "danio_en_corona" | "racimo daño en corona" | "racimo dano en corona" => {
            Some(ClaseRacimo::DanioCorona)
        }
        "pendunculo_largo" | "racimo pedunculo largo" => Some(ClaseRacimo::PendunculoLargo),
        "fruta_podrida" | "racimo podrido" => Some(ClaseRacimo::Podrido),
        "maduro" => Some(ClaseRacimo::Maduro),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Categoria {
    pub cantidad: u64,
    pub porcentaje: f64,
}

/// Counts for every internal class, keyed by class name
pub type Categorias = BTreeMap<&'static str, Categoria>;

fn categorias_vacias() -> Categorias {
    ClaseRacimo::TODAS
        .iter()
        .map(|c| (c.as_str(), Categoria::default()))
        .collect()
}

fn redondear2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn calcular_porcentajes(categorias: &mut Categorias, total: u64) {
    if total == 0 {
        return;
    }
    for categoria in categorias.values_mut() {
        categoria.porcentaje = redondear2(categoria.cantidad as f64 / total as f64 * 100.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstadoImagen {
    ProcesadaOk,
    Error,
}

/// Result for one photo
#[derive(Debug, Clone, Serialize)]
pub struct ResultadoImagen {
    pub foto: String,
    pub estado: EstadoImagen,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub categorias: Categorias,
    pub total_racimos: u64,
    pub potholes_detected: Option<u64>,
    pub imagen_etiquetada: Option<String>,
    pub imagen_visualizacion: Option<String>,
}

impl ResultadoImagen {
    pub fn error(foto: &str, mensaje: impl Into<String>) -> Self {
        Self {
            foto: foto.to_string(),
            estado: EstadoImagen::Error,
            error: Some(mensaje.into()),
            categorias: categorias_vacias(),
            total_racimos: 0,
            potholes_detected: None,
            imagen_etiquetada: None,
            imagen_visualizacion: None,
        }
    }
}

/// Annotated images returned inline by the workflow
#[derive(Debug, Default)]
pub struct ImagenesAnotadas {
    /// `annotated_image`
    pub etiquetada: Option<Vec<u8>>,
    /// `label_visualization_1`
    pub visualizacion: Option<Vec<u8>>,
}

fn first_output(response: &Value) -> Option<&Value> {
    response
        .get("outputs")
        .and_then(Value::as_array)
        .and_then(|outputs| outputs.first())
}

/// `outputs[0]`, or the root when the workflow returned a bare object
fn primary_output(response: &Value) -> &Value {
    first_output(response).unwrap_or(response)
}

fn parse_potholes(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn predicciones(output: &Value) -> &[Value] {
    match output.get("predictions") {
        Some(Value::Array(list)) => list,
        Some(Value::Object(inner)) => inner
            .get("predictions")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    }
}

fn decode_image(value: Option<&Value>) -> Option<Vec<u8>> {
    let encoded = match value? {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("value").and_then(Value::as_str)?,
        _ => return None,
    };
    let payload = encoded
        .split_once("base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    STANDARD.decode(payload.trim()).ok()
}

/// Interpret one workflow response
pub fn analizar_respuesta(foto: &str, response: &Value) -> (ResultadoImagen, ImagenesAnotadas) {
    let output = primary_output(response);
    let potholes_detected =
        parse_potholes(first_output(response).and_then(|o| o.get("potholes_detected")));

    let mut categorias = categorias_vacias();
    let mut total_directo = 0u64;

    if let Some(fields) = output.as_object() {
        for (key, value) in fields {
            if key == "potholes_detected" {
                continue;
            }
            let (Some(clase), Some(cantidad)) = (mapear_clase(key), value.as_f64()) else {
                continue;
            };
            let cantidad = cantidad.trunc();
            if cantidad > 0.0 {
                let cantidad = cantidad as u64;
                if let Some(categoria) = categorias.get_mut(clase.as_str()) {
                    categoria.cantidad += cantidad;
                }
                total_directo += cantidad;
            }
        }
    }

    let mut total_categorias = total_directo;
    if total_directo == 0 {
        for pred in predicciones(output) {
            let clase = pred.get("class").and_then(Value::as_str).and_then(mapear_clase);
            let tiene_confianza = pred.get("confidence").is_some_and(|c| !c.is_null());
            if let (Some(clase), true) = (clase, tiene_confianza) {
                if let Some(categoria) = categorias.get_mut(clase.as_str()) {
                    categoria.cantidad += 1;
                    total_categorias += 1;
                }
            }
        }
    }

    calcular_porcentajes(&mut categorias, total_categorias);

    let anotadas = ImagenesAnotadas {
        etiquetada: decode_image(output.get("annotated_image")),
        visualizacion: decode_image(output.get("label_visualization_1")),
    };

    let resultado = ResultadoImagen {
        foto: foto.to_string(),
        estado: EstadoImagen::ProcesadaOk,
        error: None,
        categorias,
        total_racimos: potholes_detected.unwrap_or(total_categorias),
        potholes_detected,
        imagen_etiquetada: None,
        imagen_visualizacion: None,
    };

    (resultado, anotadas)
}

/// Result of a classification run over all photos of a guide
#[derive(Debug, Clone, Serialize)]
pub struct ResultadoClasificacion {
    pub codigo_guia: String,
    pub imagenes: Vec<ResultadoImagen>,
    pub categorias: Categorias,
    pub total_racimos_detectados: u64,
    pub conteo_imagenes_ok: usize,
    pub conteo_imagenes_error: usize,
    pub detalle_errores: Vec<String>,
    pub timestamp_finalizacion_utc: String,
}

/// Sum categories and totals over successfully processed photos
pub fn agregar(
    codigo_guia: &str,
    imagenes: Vec<ResultadoImagen>,
    timestamp_finalizacion_utc: String,
) -> ResultadoClasificacion {
    let mut categorias = categorias_vacias();
    let mut total = 0u64;
    let mut conteo_ok = 0usize;
    let mut detalle_errores = Vec::new();

    for imagen in &imagenes {
        match imagen.estado {
            EstadoImagen::ProcesadaOk => {
                conteo_ok += 1;
                total += imagen.total_racimos;
                for (clase, categoria) in &imagen.categorias {
                    if let Some(acumulada) = categorias.get_mut(clase) {
                        acumulada.cantidad += categoria.cantidad;
                    }
                }
            }
            EstadoImagen::Error => {
                let mensaje = imagen.error.as_deref().unwrap_or("Error desconocido");
                detalle_errores.push(format!("{}: {}", imagen.foto, mensaje));
            }
        }
    }

    calcular_porcentajes(&mut categorias, total);

    ResultadoClasificacion {
        codigo_guia: codigo_guia.to_string(),
        conteo_imagenes_error: imagenes.len() - conteo_ok,
        conteo_imagenes_ok: conteo_ok,
        imagenes,
        categorias,
        total_racimos_detectados: total,
        detalle_errores,
        timestamp_finalizacion_utc,
    }
}
