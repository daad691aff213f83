//! Daily budget file parsing (CSV and XLSX)
//!
//! Header names are matched after lowercasing and removing spaces and
//! underscores, so `Toneladas Proyectadas`, `toneladas_proyectadas` and
//! `TONELADASPROYECTADAS` are the same column.

use calamine::{Data, Reader, Xlsx};
use chrono::{Duration, NaiveDate};
use csv::ReaderBuilder;
use std::io::Cursor;
use thiserror::Error;

use crate::services::weight_parser::parse_decimal;

const DATE_HEADERS: [&str; 3] = ["fecha", "dia", "date"];
const TONNES_HEADERS: [&str; 6] = [
    "toneladasproyectadas",
    "toneladas",
    "proyectado",
    "presupuesto",
    "budget",
    "tons",
];
const CSV_SEPARATORS: [u8; 3] = [b';', b',', b'\t'];

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Formato no soportado: {0}. Use .xlsx o .csv")]
    UnsupportedFormat(String),

    #[error("No se encontraron las columnas de fecha y toneladas")]
    MissingColumns,

    #[error("Error leyendo CSV: {0}")]
    Csv(String),

    #[error("Error leyendo Excel: {0}")]
    Excel(String),
}

/// Parsed budget rows
#[derive(Debug, Default, PartialEq)]
pub struct PresupuestoParseado {
    pub filas: Vec<(NaiveDate, f64)>,
    /// Rows with an unparsable date or tonnage
    pub omitidos: usize,
}

fn normalizar_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .collect()
}

/// Indices of the date and tonnage columns
fn columnas<'a>(headers: impl IntoIterator<Item = &'a str>) -> Option<(usize, usize)> {
    let normalized: Vec<String> = headers.into_iter().map(normalizar_header).collect();
    let fecha = normalized.iter().position(|h| DATE_HEADERS.contains(&h.as_str()))?;
    let toneladas = TONNES_HEADERS
        .iter()
        .find_map(|name| normalized.iter().position(|h| h == name))?;
    Some((fecha, toneladas))
}

/// `YYYY-MM-DD`, `dd/mm/YYYY` or `dd-mm-YYYY`; a trailing time is ignored
pub fn parse_fecha(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date_part = value.split([' ', 'T']).next().unwrap_or(value);
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(serial.trunc() as i64))
}

pub fn parse_file(filename: &str, bytes: &[u8]) -> Result<PresupuestoParseado, BudgetError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => parse_csv(bytes),
        "xlsx" => parse_xlsx(bytes),
        other => Err(BudgetError::UnsupportedFormat(other.to_string())),
    }
}

/// Try each separator; the first whose header has both columns wins
pub fn parse_csv(bytes: &[u8]) -> Result<PresupuestoParseado, BudgetError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    for separator in CSV_SEPARATORS {
        let mut reader = ReaderBuilder::new()
            .delimiter(separator)
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers = reader.headers().map_err(|e| BudgetError::Csv(e.to_string()))?.clone();
        let Some((col_fecha, col_toneladas)) = columnas(headers.iter()) else {
            continue;
        };

        let mut parsed = PresupuestoParseado::default();
        for record in reader.records() {
            let record = record.map_err(|e| BudgetError::Csv(e.to_string()))?;
            if record.iter().all(|v| v.trim().is_empty()) {
                continue;
            }
            let fecha = record.get(col_fecha).and_then(parse_fecha);
            let toneladas = record.get(col_toneladas).and_then(parse_decimal);
            match (fecha, toneladas) {
                (Some(fecha), Some(toneladas)) => parsed.filas.push((fecha, toneladas)),
                _ => parsed.omitidos += 1,
            }
        }
        return Ok(parsed);
    }

    Err(BudgetError::MissingColumns)
}

fn celda_fecha(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::Float(f) => excel_serial_to_date(*f),
        Data::Int(i) => excel_serial_to_date(*i as f64),
        Data::String(s) | Data::DateTimeIso(s) => parse_fecha(s),
        _ => None,
    }
}

fn celda_numero(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// First worksheet; header in the first row
pub fn parse_xlsx(bytes: &[u8]) -> Result<PresupuestoParseado, BudgetError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| BudgetError::Excel(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| BudgetError::Excel("El archivo no tiene hojas".to_string()))?
        .map_err(|e| BudgetError::Excel(e.to_string()))?;

    let mut rows = range.rows();
    let header_row = rows.next().ok_or(BudgetError::MissingColumns)?;
    let headers: Vec<String> = header_row.iter().map(|c| c.to_string()).collect();
    let (col_fecha, col_toneladas) =
        columnas(headers.iter().map(String::as_str)).ok_or(BudgetError::MissingColumns)?;

    let mut parsed = PresupuestoParseado::default();
    for row in rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let fecha = row.get(col_fecha).and_then(celda_fecha);
        let toneladas = row.get(col_toneladas).and_then(celda_numero);
        match (fecha, toneladas) {
            (Some(fecha), Some(toneladas)) => parsed.filas.push((fecha, toneladas)),
            _ => parsed.omitidos += 1,
        }
    }

    Ok(parsed)
}
