//! Bulk-goods registrations and their first weighing

use crate::db::models::{NewRegistroGranel, PrimerPesajeGranel, RegistroGranel};
use crate::{Error, Result};
use sqlx::SqlitePool;

pub async fn insert_registro_granel(
    pool: &SqlitePool,
    registro: &NewRegistroGranel,
    usuario_registro: Option<&str>,
    timestamp_registro: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO RegistroEntradaGraneles (
            producto, fecha_autorizacion, placa, trailer, cedula_conductor,
            nombre_conductor, origen, destino, tipo_registro, observaciones,
            usuario_registro, timestamp_registro
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&registro.producto)
    .bind(&registro.fecha_autorizacion)
    .bind(&registro.placa)
    .bind(&registro.trailer)
    .bind(&registro.cedula_conductor)
    .bind(&registro.nombre_conductor)
    .bind(&registro.origen)
    .bind(&registro.destino)
    .bind(registro.tipo_registro.as_deref().unwrap_or("manual"))
    .bind(&registro.observaciones)
    .bind(usuario_registro)
    .bind(timestamp_registro)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_registro_granel(pool: &SqlitePool, id: i64) -> Result<Option<RegistroGranel>> {
    let row = sqlx::query_as::<_, RegistroGranel>(
        "SELECT id, producto, fecha_autorizacion, placa, trailer, cedula_conductor, \
         nombre_conductor, origen, destino, tipo_registro, observaciones, \
         usuario_registro, timestamp_registro \
         FROM RegistroEntradaGraneles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[derive(Debug, Clone)]
pub struct NewPrimerPesajeGranel {
    pub id_registro_granel: i64,
    pub peso_primer_kg: f64,
    pub codigo_sap_granel: Option<String>,
    pub usuario_pesaje: Option<String>,
    pub foto_soporte_path: Option<String>,
    pub timestamp_primer_pesaje: String,
}

/// Insert the first weighing; a registration accepts only one
pub async fn insert_primer_pesaje(pool: &SqlitePool, p: &NewPrimerPesajeGranel) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO PrimerPesajeGranel (
            id_registro_granel, peso_primer_kg, codigo_sap_granel,
            usuario_pesaje, foto_soporte_path, timestamp_primer_pesaje
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.id_registro_granel)
    .bind(p.peso_primer_kg)
    .bind(&p.codigo_sap_granel)
    .bind(&p.usuario_pesaje)
    .bind(&p.foto_soporte_path)
    .bind(&p.timestamp_primer_pesaje)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
            Err(Error::OutOfSequence(format!(
                "Registration {} already has a first weighing",
                p.id_registro_granel
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_primer_pesaje(pool: &SqlitePool, id_registro_granel: i64) -> Result<Option<PrimerPesajeGranel>> {
    let row = sqlx::query_as::<_, PrimerPesajeGranel>(
        "SELECT id, id_registro_granel, peso_primer_kg, codigo_sap_granel, usuario_pesaje, \
         foto_soporte_path, timestamp_primer_pesaje \
         FROM PrimerPesajeGranel WHERE id_registro_granel = ?",
    )
    .bind(id_registro_granel)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
