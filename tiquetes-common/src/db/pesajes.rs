//! Gross (`pesajes_bruto`) and tare/net (`pesajes_neto`) weighings

use crate::db::models::{PesajeBruto, PesajeNeto};
use crate::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// How a weight was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipoPesaje {
    /// Read from the scale photo or entered at the scale
    Directo,
    /// Entered manually with an authorization code
    Virtual,
}

impl TipoPesaje {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipoPesaje::Directo => "directo",
            TipoPesaje::Virtual => "virtual",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPesajeBruto {
    pub codigo_guia: String,
    pub codigo_proveedor: Option<String>,
    pub nombre_proveedor: Option<String>,
    pub peso_bruto: f64,
    pub tipo_pesaje: TipoPesaje,
    pub codigo_guia_transporte_sap: Option<String>,
    pub imagen_pesaje: Option<String>,
    pub timestamp_pesaje_utc: String,
}

const BRUTO_COLUMNS: &str = "codigo_guia, codigo_proveedor, nombre_proveedor, peso_bruto, tipo_pesaje, \
    codigo_guia_transporte_sap, imagen_pesaje, timestamp_pesaje_utc";

/// Insert or replace the gross weighing of a guide
pub async fn upsert_pesaje_bruto(pool: &SqlitePool, p: &NewPesajeBruto) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pesajes_bruto (
            codigo_guia, codigo_proveedor, nombre_proveedor, peso_bruto, tipo_pesaje,
            codigo_guia_transporte_sap, imagen_pesaje, timestamp_pesaje_utc
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(codigo_guia) DO UPDATE SET
            codigo_proveedor = excluded.codigo_proveedor,
            nombre_proveedor = excluded.nombre_proveedor,
            peso_bruto = excluded.peso_bruto,
            tipo_pesaje = excluded.tipo_pesaje,
            codigo_guia_transporte_sap = COALESCE(excluded.codigo_guia_transporte_sap, pesajes_bruto.codigo_guia_transporte_sap),
            imagen_pesaje = COALESCE(excluded.imagen_pesaje, pesajes_bruto.imagen_pesaje),
            timestamp_pesaje_utc = excluded.timestamp_pesaje_utc
        "#,
    )
    .bind(&p.codigo_guia)
    .bind(&p.codigo_proveedor)
    .bind(&p.nombre_proveedor)
    .bind(p.peso_bruto)
    .bind(p.tipo_pesaje.as_str())
    .bind(&p.codigo_guia_transporte_sap)
    .bind(&p.imagen_pesaje)
    .bind(&p.timestamp_pesaje_utc)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_pesaje_bruto(pool: &SqlitePool, codigo_guia: &str) -> Result<Option<PesajeBruto>> {
    let row = sqlx::query_as::<_, PesajeBruto>(&format!(
        "SELECT {} FROM pesajes_bruto WHERE codigo_guia = ?",
        BRUTO_COLUMNS
    ))
    .bind(codigo_guia)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Gross weighing registered under a SAP transport guide number
pub async fn find_pesaje_bruto_by_sap(pool: &SqlitePool, codigo_sap: &str) -> Result<Option<PesajeBruto>> {
    let row = sqlx::query_as::<_, PesajeBruto>(&format!(
        "SELECT {} FROM pesajes_bruto WHERE codigo_guia_transporte_sap = ? \
         ORDER BY timestamp_pesaje_utc DESC LIMIT 1",
        BRUTO_COLUMNS
    ))
    .bind(codigo_sap)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn list_pesajes_bruto(pool: &SqlitePool) -> Result<Vec<PesajeBruto>> {
    let rows = sqlx::query_as::<_, PesajeBruto>(&format!(
        "SELECT {} FROM pesajes_bruto ORDER BY timestamp_pesaje_utc DESC",
        BRUTO_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct NewPesajeNeto {
    pub codigo_guia: String,
    pub peso_tara: f64,
    pub peso_neto: f64,
    pub peso_producto: f64,
    pub tipo_pesaje_neto: String,
    pub comentarios: Option<String>,
    pub respuesta_sap: Option<String>,
    pub timestamp_pesaje_neto_utc: String,
}

pub async fn upsert_pesaje_neto(pool: &SqlitePool, p: &NewPesajeNeto) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pesajes_neto (
            codigo_guia, peso_tara, peso_neto, peso_producto, tipo_pesaje_neto,
            comentarios, respuesta_sap, timestamp_pesaje_neto_utc
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(codigo_guia) DO UPDATE SET
            peso_tara = excluded.peso_tara,
            peso_neto = excluded.peso_neto,
            peso_producto = excluded.peso_producto,
            tipo_pesaje_neto = excluded.tipo_pesaje_neto,
            comentarios = excluded.comentarios,
            respuesta_sap = excluded.respuesta_sap,
            timestamp_pesaje_neto_utc = excluded.timestamp_pesaje_neto_utc
        "#,
    )
    .bind(&p.codigo_guia)
    .bind(p.peso_tara)
    .bind(p.peso_neto)
    .bind(p.peso_producto)
    .bind(&p.tipo_pesaje_neto)
    .bind(&p.comentarios)
    .bind(&p.respuesta_sap)
    .bind(&p.timestamp_pesaje_neto_utc)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_pesaje_neto(pool: &SqlitePool, codigo_guia: &str) -> Result<Option<PesajeNeto>> {
    let row = sqlx::query_as::<_, PesajeNeto>(
        "SELECT codigo_guia, peso_tara, peso_neto, peso_producto, tipo_pesaje_neto, \
         comentarios, respuesta_sap, timestamp_pesaje_neto_utc \
         FROM pesajes_neto WHERE codigo_guia = ?",
    )
    .bind(codigo_guia)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
