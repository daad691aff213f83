//! Comparison of a SAP material-document export against recorded weights
//!
//! The export is tab-separated with four preamble lines. Column 4 holds the
//! SAP transport guide and column 8 the net weight in Spanish number format
//! (`.` thousands, `,` decimals).

use serde::Serialize;
use sqlx::SqlitePool;
use tiquetes_common::db::{entradas, pesajes};
use tiquetes_common::time::db_timestamp_to_bogota;
use tracing::debug;

const SKIP_LINES: usize = 4;
const COL_CODIGO_SAP: usize = 4;
const COL_PESO: usize = 8;

pub const FALTA_UN_PESO: &str = "Falta un peso";
pub const PESO_ARCHIVO_INVALIDO: &str = "Peso Arch. Inválido";

/// One data line of the export
#[derive(Debug, Clone, PartialEq)]
pub struct LineaSap {
    pub codigo_sap: String,
    pub peso_original: String,
    pub peso: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Alerta {
    #[serde(rename = "")]
    Ninguna,
    PesoInvalido,
    NoEncontradoDb,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultadoComparacion {
    pub codigo_sap_archivo: String,
    pub codigo_guia_app: Option<String>,
    pub fecha_registro_app: Option<String>,
    pub peso_neto_archivo: Option<f64>,
    pub peso_neto_archivo_original: String,
    pub peso_neto_app: Option<f64>,
    /// File minus app, when both weights are known
    pub diferencia: Option<f64>,
    pub diferencia_peso: String,
    pub alerta: Alerta,
}

/// `12.345,6` → `12345.6`
pub fn parse_peso_sap(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value
        .replace('.', "")
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Data lines of the export
pub fn parse_export(text: &str) -> Vec<LineaSap> {
    text.lines()
        .skip(SKIP_LINES)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.to_lowercase().contains("total"))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() <= COL_CODIGO_SAP.max(COL_PESO) {
                debug!("Skipping short SAP line ({} fields)", fields.len());
                return None;
            }
            let codigo_sap = fields[COL_CODIGO_SAP];
            if codigo_sap.is_empty() {
                return None;
            }
            Some(LineaSap {
                codigo_sap: codigo_sap.to_string(),
                peso_original: fields[COL_PESO].to_string(),
                peso: parse_peso_sap(fields[COL_PESO]),
            })
        })
        .collect()
}

/// Look each line up by SAP guide and compute the weight difference
pub async fn comparar(pool: &SqlitePool, lineas: Vec<LineaSap>) -> tiquetes_common::Result<Vec<ResultadoComparacion>> {
    let mut resultados = Vec::with_capacity(lineas.len());

    for linea in lineas {
        let mut resultado = ResultadoComparacion {
            codigo_sap_archivo: linea.codigo_sap.clone(),
            codigo_guia_app: None,
            fecha_registro_app: None,
            peso_neto_archivo: linea.peso,
            peso_neto_archivo_original: linea.peso_original.clone(),
            peso_neto_app: None,
            diferencia: None,
            diferencia_peso: "-".to_string(),
            alerta: Alerta::Ninguna,
        };

        let Some(peso_archivo) = linea.peso else {
            resultado.alerta = Alerta::PesoInvalido;
            resultado.diferencia_peso = PESO_ARCHIVO_INVALIDO.to_string();
            resultados.push(resultado);
            continue;
        };

        match pesajes::find_pesaje_bruto_by_sap(pool, &linea.codigo_sap).await? {
            Some(bruto) => {
                if let Some(entry) = entradas::get_entry(pool, &bruto.codigo_guia).await? {
                    resultado.fecha_registro_app = entry
                        .timestamp_registro_utc
                        .as_deref()
                        .and_then(db_timestamp_to_bogota)
                        .map(|(fecha, hora)| format!("{} {}", fecha, &hora[..hora.len().min(5)]));
                }
                resultado.peso_neto_app = pesajes::get_pesaje_neto(pool, &bruto.codigo_guia)
                    .await?
                    .and_then(|n| n.peso_neto);
                resultado.codigo_guia_app = Some(bruto.codigo_guia);

                match resultado.peso_neto_app {
                    Some(peso_app) => {
                        let diferencia = peso_archivo - peso_app;
                        resultado.diferencia = Some(diferencia);
                        resultado.diferencia_peso = format!("{:.2}", diferencia);
                    }
                    None => resultado.diferencia_peso = FALTA_UN_PESO.to_string(),
                }
            }
            None => resultado.alerta = Alerta::NoEncontradoDb,
        }

        resultados.push(resultado);
    }

    Ok(resultados)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "Reporte\nCentro\nFecha\nDoc\n\
a\tb\tc\td\t1001\tf\tg\th\t12.345,5\n\
\n\
a\tb\tc\td\t1002\tf\tg\th\tX\n\
a\tb\tc\td\t\tf\tg\th\t100\n\
*\t\t\t\t* Total\t\t\t\t99.999\n\
a\tb\tc\td\t1003\n";

    #[test]
    fn test_parse_export_lines() {
        let lineas = parse_export(EXPORT);
        assert_eq!(lineas.len(), 2);
        assert_eq!(lineas[0].codigo_sap, "1001");
        assert_eq!(lineas[0].peso, Some(12345.5));
        assert_eq!(lineas[1].codigo_sap, "1002");
        assert_eq!(lineas[1].peso, None);
    }

    #[test]
    fn test_parse_peso_sap() {
        assert_eq!(parse_peso_sap("1.234,50"), Some(1234.5));
        assert_eq!(parse_peso_sap("800"), Some(800.0));
        assert_eq!(parse_peso_sap(""), None);
        assert_eq!(parse_peso_sap("abc"), None);
    }

    #[test]
    fn test_alert_serialization() {
        assert_eq!(serde_json::to_value(Alerta::Ninguna).unwrap(), "");
        assert_eq!(serde_json::to_value(Alerta::NoEncontradoDb).unwrap(), "no_encontrado_db");
    }
}
