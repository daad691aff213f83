//! `clasificaciones` queries
//!
//! One row per guide. The manual stage writes counts and photos; the
//! automatic job later fills the `*_automatica*` columns of the same row.

use crate::db::models::{Clasificacion, ConteoManual};
use crate::{Error, Result};
use sqlx::SqlitePool;

const CLASIFICACION_COLUMNS: &str = "codigo_guia, codigo_proveedor, nombre_proveedor, verde_manual, \
    sobremaduro_manual, danio_corona_manual, pendunculo_largo_manual, podrido_manual, \
    clasificacion_manual_json, clasificacion_automatica_json, clasificacion_consolidada, \
    total_racimos_detectados, fotos_json, observaciones, estado, timestamp_clasificacion_utc";

/// Estado stored once manual classification is registered
pub const ESTADO_COMPLETADO: &str = "completado";

#[derive(Debug, Clone)]
pub struct NewClasificacionManual {
    pub codigo_guia: String,
    pub codigo_proveedor: Option<String>,
    pub nombre_proveedor: Option<String>,
    pub conteo: ConteoManual,
    /// Saved photo paths
    pub fotos: Vec<String>,
    pub observaciones: Option<String>,
    pub timestamp_clasificacion_utc: String,
}

/// Insert or replace the manual classification
///
/// Automatic results survive only while the photo set is unchanged; new
/// photos clear them until the job runs again.
pub async fn upsert_clasificacion_manual(pool: &SqlitePool, c: &NewClasificacionManual) -> Result<()> {
    let manual_json = serde_json::to_string(&c.conteo)
        .map_err(|e| Error::Internal(format!("Failed to serialize manual counts: {}", e)))?;
    let fotos_json = serde_json::to_string(&c.fotos)
        .map_err(|e| Error::Internal(format!("Failed to serialize photo list: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO clasificaciones (
            codigo_guia, codigo_proveedor, nombre_proveedor,
            verde_manual, sobremaduro_manual, danio_corona_manual,
            pendunculo_largo_manual, podrido_manual,
            clasificacion_manual_json, fotos_json, observaciones, estado,
            timestamp_clasificacion_utc
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(codigo_guia) DO UPDATE SET
            codigo_proveedor = excluded.codigo_proveedor,
            nombre_proveedor = excluded.nombre_proveedor,
            verde_manual = excluded.verde_manual,
            sobremaduro_manual = excluded.sobremaduro_manual,
            danio_corona_manual = excluded.danio_corona_manual,
            pendunculo_largo_manual = excluded.pendunculo_largo_manual,
            podrido_manual = excluded.podrido_manual,
            clasificacion_manual_json = excluded.clasificacion_manual_json,
            clasificacion_automatica_json = CASE WHEN fotos_json IS excluded.fotos_json
                THEN clasificacion_automatica_json ELSE NULL END,
            clasificacion_consolidada = CASE WHEN fotos_json IS excluded.fotos_json
                THEN clasificacion_consolidada ELSE NULL END,
            total_racimos_detectados = CASE WHEN fotos_json IS excluded.fotos_json
                THEN total_racimos_detectados ELSE NULL END,
            fotos_json = excluded.fotos_json,
            observaciones = excluded.observaciones,
            estado = excluded.estado,
            timestamp_clasificacion_utc = excluded.timestamp_clasificacion_utc
        "#,
    )
    .bind(&c.codigo_guia)
    .bind(&c.codigo_proveedor)
    .bind(&c.nombre_proveedor)
    .bind(c.conteo.verde as f64)
    .bind(c.conteo.sobremaduro as f64)
    .bind(c.conteo.danio_corona as f64)
    .bind(c.conteo.pendunculo_largo as f64)
    .bind(c.conteo.podrido as f64)
    .bind(manual_json)
    .bind(fotos_json)
    .bind(&c.observaciones)
    .bind(ESTADO_COMPLETADO)
    .bind(&c.timestamp_clasificacion_utc)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the automatic classification result of a guide
///
/// Fails with `NotFound` if the manual stage has not created the row.
pub async fn update_clasificacion_automatica(
    pool: &SqlitePool,
    codigo_guia: &str,
    automatica_json: &str,
    consolidada_json: &str,
    total_racimos_detectados: i64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE clasificaciones
        SET clasificacion_automatica_json = ?,
            clasificacion_consolidada = ?,
            total_racimos_detectados = ?
        WHERE codigo_guia = ?
        "#,
    )
    .bind(automatica_json)
    .bind(consolidada_json)
    .bind(total_racimos_detectados)
    .bind(codigo_guia)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Classification for guide {}", codigo_guia)));
    }
    Ok(())
}

pub async fn get_clasificacion(pool: &SqlitePool, codigo_guia: &str) -> Result<Option<Clasificacion>> {
    let row = sqlx::query_as::<_, Clasificacion>(&format!(
        "SELECT {} FROM clasificaciones WHERE codigo_guia = ?",
        CLASIFICACION_COLUMNS
    ))
    .bind(codigo_guia)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn list_clasificaciones(pool: &SqlitePool) -> Result<Vec<Clasificacion>> {
    let rows = sqlx::query_as::<_, Clasificacion>(&format!(
        "SELECT {} FROM clasificaciones ORDER BY timestamp_clasificacion_utc DESC",
        CLASIFICACION_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

impl Clasificacion {
    /// Photo paths saved by the manual stage
    pub fn fotos(&self) -> Vec<String> {
        self.fotos_json
            .as_deref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}
