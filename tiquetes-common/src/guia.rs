//! Guide codes, consolidated guide view and workflow status
//!
//! A guide (guía) follows one supplier delivery through
//! entrada → pesaje → clasificacion → pesaje_neto → salida. Every stage
//! table keys on `codigo_guia`; [`get_datos_guia`] joins them into one view
//! and [`EstadoGuia`] derives how far the delivery has progressed.

use crate::time::{bogota, db_timestamp_to_bogota};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// Placeholder shown for missing text fields
pub const NO_DISPONIBLE: &str = "No disponible";

/// Supplier code with everything but ASCII letters and digits removed
pub fn normalizar_codigo_proveedor(codigo: &str) -> String {
    codigo.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Supplier code as embedded in a guide code: trimmed, URL-path safe
fn codigo_para_guia(codigo: &str) -> String {
    codigo
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// Base guide code `{codigo}_{YYYYMMDD}_{last 4 digits of unix seconds}`
///
/// The date is the Bogotá calendar date of `now`.
pub fn codigo_guia_base(codigo_proveedor: &str, now: DateTime<Utc>) -> String {
    let fecha = now.with_timezone(&bogota()).format("%Y%m%d");
    let secs = now.timestamp().to_string();
    let sufijo = &secs[secs.len().saturating_sub(4)..];
    format!("{}_{}_{}", codigo_para_guia(codigo_proveedor), fecha, sufijo)
}

/// Generate a guide code not yet present in `entry_records`
///
/// On collision `_2`, `_3`, … is appended to the base code.
pub async fn generar_codigo_guia(
    pool: &SqlitePool,
    codigo_proveedor: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    if normalizar_codigo_proveedor(codigo_proveedor).is_empty() {
        return Err(Error::InvalidInput("Supplier code is empty".to_string()));
    }

    let base = codigo_guia_base(codigo_proveedor, now);
    let mut candidate = base.clone();
    let mut n = 2;
    while crate::db::entradas::entry_exists(pool, &candidate).await? {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }

    tracing::info!(codigo_guia = %candidate, "Generated guide code");
    Ok(candidate)
}

#[derive(Debug, sqlx::FromRow)]
struct GuiaRow {
    codigo_guia: String,
    codigo_proveedor: Option<String>,
    nombre_proveedor: Option<String>,
    cantidad_racimos: Option<String>,
    placa: Option<String>,
    transportador: Option<String>,
    acarreo: Option<String>,
    cargo: Option<String>,
    codigo_guia_transporte_sap: Option<String>,
    nota: Option<String>,
    observaciones: Option<String>,
    url_qr: Option<String>,
    image_filename: Option<String>,
    plate_text: Option<String>,
    fecha_tiquete: Option<String>,
    timestamp_registro_utc: Option<String>,
    peso_bruto: Option<f64>,
    tipo_pesaje: Option<String>,
    imagen_pesaje: Option<String>,
    sap_pesaje: Option<String>,
    timestamp_pesaje_utc: Option<String>,
    estado_clasificacion: Option<String>,
    verde_manual: Option<f64>,
    sobremaduro_manual: Option<f64>,
    danio_corona_manual: Option<f64>,
    pendunculo_largo_manual: Option<f64>,
    podrido_manual: Option<f64>,
    clasificacion_consolidada: Option<String>,
    total_racimos_detectados: Option<i64>,
    timestamp_clasificacion_utc: Option<String>,
    peso_tara: Option<f64>,
    peso_neto: Option<f64>,
    peso_producto: Option<f64>,
    timestamp_pesaje_neto_utc: Option<String>,
    comentarios_salida: Option<String>,
    estado_salida: Option<String>,
    timestamp_salida_utc: Option<String>,
}

/// Everything known about one guide
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatosGuia {
    pub codigo_guia: String,
    pub codigo_proveedor: String,
    pub nombre_proveedor: String,
    pub cantidad_racimos: String,
    pub placa: String,
    pub transportador: String,
    pub acarreo: String,
    pub cargo: String,
    pub codigo_guia_transporte_sap: String,
    pub nota: String,
    pub observaciones: String,
    pub url_qr: String,
    pub image_filename: Option<String>,
    pub plate_text: String,
    pub fecha_tiquete: String,
    pub fecha_registro: String,
    pub hora_registro: String,

    pub peso_bruto: Option<f64>,
    pub tipo_pesaje: String,
    pub imagen_pesaje: Option<String>,
    pub fecha_pesaje: String,
    pub hora_pesaje: String,

    pub estado_clasificacion: Option<String>,
    pub clasificacion_manual: Option<ClasificacionManualView>,
    pub clasificacion_consolidada: Option<serde_json::Value>,
    pub total_racimos_detectados: Option<i64>,
    pub fecha_clasificacion: String,
    pub hora_clasificacion: String,

    pub peso_tara: Option<f64>,
    pub peso_neto: Option<f64>,
    pub peso_producto: Option<f64>,
    pub fecha_pesaje_neto: String,
    pub hora_pesaje_neto: String,

    pub tiene_salida: bool,
    pub comentarios_salida: String,
    pub fecha_salida: String,
    pub hora_salida: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClasificacionManualView {
    pub verde: f64,
    pub sobremaduro: f64,
    pub danio_corona: f64,
    pub pendunculo_largo: f64,
    pub podrido: f64,
}

fn display(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| NO_DISPONIBLE.to_string())
}

fn fecha_hora(ts: &Option<String>) -> (String, String) {
    ts.as_deref()
        .and_then(db_timestamp_to_bogota)
        .unwrap_or_else(|| (NO_DISPONIBLE.to_string(), NO_DISPONIBLE.to_string()))
}

impl From<GuiaRow> for DatosGuia {
    fn from(r: GuiaRow) -> Self {
        let (fecha_registro, hora_registro) = fecha_hora(&r.timestamp_registro_utc);
        let (fecha_pesaje, hora_pesaje) = fecha_hora(&r.timestamp_pesaje_utc);
        let (fecha_clasificacion, hora_clasificacion) = fecha_hora(&r.timestamp_clasificacion_utc);
        let (fecha_pesaje_neto, hora_pesaje_neto) = fecha_hora(&r.timestamp_pesaje_neto_utc);
        let (fecha_salida, hora_salida) = fecha_hora(&r.timestamp_salida_utc);

        let manual = [
            r.verde_manual,
            r.sobremaduro_manual,
            r.danio_corona_manual,
            r.pendunculo_largo_manual,
            r.podrido_manual,
        ];
        let clasificacion_manual = manual.iter().any(Option::is_some).then(|| ClasificacionManualView {
            verde: r.verde_manual.unwrap_or(0.0),
            sobremaduro: r.sobremaduro_manual.unwrap_or(0.0),
            danio_corona: r.danio_corona_manual.unwrap_or(0.0),
            pendunculo_largo: r.pendunculo_largo_manual.unwrap_or(0.0),
            podrido: r.podrido_manual.unwrap_or(0.0),
        });

        // SAP guide may have been captured at entry or at the scale
        let sap = r.sap_pesaje.filter(|s| !s.trim().is_empty()).or(r.codigo_guia_transporte_sap);

        Self {
            codigo_guia: r.codigo_guia,
            codigo_proveedor: display(r.codigo_proveedor),
            nombre_proveedor: display(r.nombre_proveedor),
            cantidad_racimos: display(r.cantidad_racimos),
            placa: display(r.placa),
            transportador: display(r.transportador),
            acarreo: display(r.acarreo),
            cargo: display(r.cargo),
            codigo_guia_transporte_sap: display(sap),
            nota: display(r.nota),
            observaciones: display(r.observaciones),
            url_qr: display(r.url_qr),
            image_filename: r.image_filename,
            plate_text: display(r.plate_text),
            fecha_tiquete: display(r.fecha_tiquete),
            fecha_registro,
            hora_registro,
            peso_bruto: r.peso_bruto,
            tipo_pesaje: display(r.tipo_pesaje),
            imagen_pesaje: r.imagen_pesaje,
            fecha_pesaje,
            hora_pesaje,
            estado_clasificacion: r.estado_clasificacion,
            clasificacion_manual,
            clasificacion_consolidada: r
                .clasificacion_consolidada
                .as_deref()
                .and_then(|j| serde_json::from_str(j).ok()),
            total_racimos_detectados: r.total_racimos_detectados,
            fecha_clasificacion,
            hora_clasificacion,
            peso_tara: r.peso_tara,
            peso_neto: r.peso_neto,
            peso_producto: r.peso_producto,
            fecha_pesaje_neto,
            hora_pesaje_neto,
            tiene_salida: r.estado_salida.is_some() || r.timestamp_salida_utc.is_some(),
            comentarios_salida: display(r.comentarios_salida),
            fecha_salida,
            hora_salida,
        }
    }
}

/// Consolidated view of a guide; `None` without an entry record
pub async fn get_datos_guia(pool: &SqlitePool, codigo_guia: &str) -> Result<Option<DatosGuia>> {
    let row = sqlx::query_as::<_, GuiaRow>(
        r#"
        SELECT
            e.codigo_guia, e.codigo_proveedor, e.nombre_proveedor, e.cantidad_racimos,
            e.placa, e.transportador, e.acarreo, e.cargo, e.codigo_guia_transporte_sap,
            e.nota, e.observaciones, e.url_qr, e.image_filename, e.plate_text,
            e.fecha_tiquete, e.timestamp_registro_utc,
            pb.peso_bruto, pb.tipo_pesaje, pb.imagen_pesaje,
            pb.codigo_guia_transporte_sap AS sap_pesaje, pb.timestamp_pesaje_utc,
            c.estado AS estado_clasificacion, c.verde_manual, c.sobremaduro_manual,
            c.danio_corona_manual, c.pendunculo_largo_manual, c.podrido_manual,
            c.clasificacion_consolidada, c.total_racimos_detectados,
            c.timestamp_clasificacion_utc,
            pn.peso_tara, pn.peso_neto, pn.peso_producto, pn.timestamp_pesaje_neto_utc,
            s.comentarios_salida, s.estado AS estado_salida, s.timestamp_salida_utc
        FROM entry_records e
        LEFT JOIN pesajes_bruto pb ON pb.codigo_guia = e.codigo_guia
        LEFT JOIN clasificaciones c ON c.codigo_guia = e.codigo_guia
        LEFT JOIN pesajes_neto pn ON pn.codigo_guia = e.codigo_guia
        LEFT JOIN salidas s ON s.codigo_guia = e.codigo_guia
        WHERE e.codigo_guia = ?
        "#,
    )
    .bind(codigo_guia)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(DatosGuia::from))
}

/// Workflow stage of a guide
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Etapa {
    Entrada,
    Pesaje,
    Clasificacion,
    PesajeNeto,
    Salida,
}

impl Etapa {
    pub const TODAS: [Etapa; 5] = [
        Etapa::Entrada,
        Etapa::Pesaje,
        Etapa::Clasificacion,
        Etapa::PesajeNeto,
        Etapa::Salida,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Etapa::Entrada => "entrada",
            Etapa::Pesaje => "pesaje",
            Etapa::Clasificacion => "clasificacion",
            Etapa::PesajeNeto => "pesaje_neto",
            Etapa::Salida => "salida",
        }
    }

    pub fn siguiente(&self) -> Option<Etapa> {
        match self {
            Etapa::Entrada => Some(Etapa::Pesaje),
            Etapa::Pesaje => Some(Etapa::Clasificacion),
            Etapa::Clasificacion => Some(Etapa::PesajeNeto),
            Etapa::PesajeNeto => Some(Etapa::Salida),
            Etapa::Salida => None,
        }
    }
}

/// Progress of a guide through the workflow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstadoGuia {
    pub estado: &'static str,
    pub descripcion: &'static str,
    pub porcentaje_avance: u8,
    pub pasos_completados: Vec<Etapa>,
    pub acciones_disponibles: Vec<Etapa>,
    pub datos_disponibles: Vec<Etapa>,
    pub siguiente_paso: Option<Etapa>,
}

impl EstadoGuia {
    /// Furthest completed stage
    ///
    /// Classification is optional for net weighing and exit, so each stage
    /// is checked on its own and the status follows the latest one found.
    pub fn from_datos(datos: Option<&DatosGuia>) -> Self {
        let Some(d) = datos else {
            return Self::build(&[]);
        };

        let hechos: Vec<Etapa> = Etapa::TODAS
            .iter()
            .copied()
            .filter(|etapa| etapa_completa(d, *etapa))
            .collect();
        Self::build(&hechos)
    }

    fn build(pasos_completados: &[Etapa]) -> Self {
        let ultima = pasos_completados.iter().copied().max();
        let (estado, descripcion, porcentaje_avance) = match ultima {
            None => ("creada", "Guía registrada sin procesos completados", 0),
            Some(Etapa::Entrada) => ("entrada_completada", "Entrada registrada", 25),
            Some(Etapa::Pesaje) => ("pesaje_completado", "Pesaje completado", 50),
            Some(Etapa::Clasificacion) => ("clasificacion_completada", "Clasificación completada", 70),
            Some(Etapa::PesajeNeto) => ("pesaje_neto_completado", "Pesaje neto completado", 80),
            Some(Etapa::Salida) => ("proceso_completado", "Proceso completado", 100),
        };

        let siguiente_paso = match ultima {
            None => Some(Etapa::Entrada),
            Some(u) => u.siguiente(),
        };
        let mut acciones_disponibles = pasos_completados.to_vec();
        acciones_disponibles.extend(siguiente_paso.filter(|s| !pasos_completados.contains(s)));

        Self {
            estado,
            descripcion,
            porcentaje_avance,
            datos_disponibles: pasos_completados.to_vec(),
            pasos_completados: pasos_completados.to_vec(),
            acciones_disponibles,
            siguiente_paso,
        }
    }

    pub fn completado(&self, etapa: Etapa) -> bool {
        self.pasos_completados.contains(&etapa)
    }
}

/// Whether the stored data records `etapa` for the guide
fn etapa_completa(datos: &DatosGuia, etapa: Etapa) -> bool {
    match etapa {
        Etapa::Entrada => true,
        Etapa::Pesaje => datos.peso_bruto.is_some_and(|p| p > 0.0),
        Etapa::Clasificacion => datos.estado_clasificacion.as_deref() == Some("completado"),
        Etapa::PesajeNeto => datos.peso_neto.is_some_and(|p| p > 0.0),
        Etapa::Salida => datos.tiene_salida,
    }
}

/// Status of a guide, `creada` when unknown
pub async fn get_estado_guia(pool: &SqlitePool, codigo_guia: &str) -> Result<EstadoGuia> {
    let datos = get_datos_guia(pool, codigo_guia).await?;
    Ok(EstadoGuia::from_datos(datos.as_ref()))
}

/// Fail with `OutOfSequence` unless `etapa` is complete for the guide
///
/// `NotFound` when the guide has no entry.
pub async fn require_etapa(pool: &SqlitePool, codigo_guia: &str, etapa: Etapa) -> Result<DatosGuia> {
    let datos = get_datos_guia(pool, codigo_guia)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Guía {}", codigo_guia)))?;

    if !etapa_completa(&datos, etapa) {
        return Err(Error::OutOfSequence(format!(
            "Guía {} has no {} registered",
            codigo_guia,
            etapa.as_str()
        )));
    }
    Ok(datos)
}
