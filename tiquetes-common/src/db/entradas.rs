//! `entry_records` queries

use crate::db::models::{EntryRecord, NewEntry};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

const ENTRY_COLUMNS: &str = "id, codigo_guia, nombre_proveedor, codigo_proveedor, cantidad_racimos, \
    placa, transportador, acarreo, cargo, codigo_guia_transporte_sap, observaciones, \
    image_filename, plate_filename, plate_text, fecha_tiquete, nota, url_qr, estado, \
    timestamp_registro_utc";

/// Listing filter; date bounds are UTC storage strings
#[derive(Debug, Clone, Default)]
pub struct EntradaFilter {
    pub desde_utc: Option<String>,
    pub hasta_utc: Option<String>,
    pub codigo_proveedor: Option<String>,
    pub placa: Option<String>,
}

/// Editable entry fields; `None` leaves the stored value unchanged
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub codigo_proveedor: Option<String>,
    pub nombre_proveedor: Option<String>,
    pub placa: Option<String>,
    pub transportador: Option<String>,
    pub cantidad_racimos: Option<String>,
    pub nota: Option<String>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.codigo_proveedor.is_none()
            && self.nombre_proveedor.is_none()
            && self.placa.is_none()
            && self.transportador.is_none()
            && self.cantidad_racimos.is_none()
            && self.nota.is_none()
    }
}

pub async fn insert_entry(pool: &SqlitePool, entry: &NewEntry) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO entry_records (
            codigo_guia, nombre_proveedor, codigo_proveedor, cantidad_racimos, placa,
            transportador, acarreo, cargo, codigo_guia_transporte_sap, observaciones,
            image_filename, plate_filename, plate_text, fecha_tiquete, nota, url_qr,
            estado, timestamp_registro_utc
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'activo', ?)
        "#,
    )
    .bind(&entry.codigo_guia)
    .bind(&entry.nombre_proveedor)
    .bind(&entry.codigo_proveedor)
    .bind(&entry.cantidad_racimos)
    .bind(&entry.placa)
    .bind(&entry.transportador)
    .bind(&entry.acarreo)
    .bind(&entry.cargo)
    .bind(&entry.codigo_guia_transporte_sap)
    .bind(&entry.observaciones)
    .bind(&entry.image_filename)
    .bind(&entry.plate_filename)
    .bind(&entry.plate_text)
    .bind(&entry.fecha_tiquete)
    .bind(&entry.nota)
    .bind(&entry.url_qr)
    .bind(&entry.timestamp_registro_utc)
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => Err(
            Error::Duplicate(format!("Guide {} already registered", entry.codigo_guia)),
        ),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_entry(pool: &SqlitePool, codigo_guia: &str) -> Result<Option<EntryRecord>> {
    let entry = sqlx::query_as::<_, EntryRecord>(&format!(
        "SELECT {} FROM entry_records WHERE codigo_guia = ?",
        ENTRY_COLUMNS
    ))
    .bind(codigo_guia)
    .fetch_optional(pool)
    .await?;

    Ok(entry)
}

pub async fn entry_exists(pool: &SqlitePool, codigo_guia: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM entry_records WHERE codigo_guia = ?)")
            .bind(codigo_guia)
            .fetch_one(pool)
            .await?;

    Ok(exists)
}

/// Entries matching `filter`, newest first
pub async fn list_entries(pool: &SqlitePool, filter: &EntradaFilter) -> Result<Vec<EntryRecord>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM entry_records WHERE 1 = 1", ENTRY_COLUMNS));

    if let Some(desde) = &filter.desde_utc {
        qb.push(" AND timestamp_registro_utc >= ").push_bind(desde.clone());
    }
    if let Some(hasta) = &filter.hasta_utc {
        qb.push(" AND timestamp_registro_utc <= ").push_bind(hasta.clone());
    }
    if let Some(codigo) = filter.codigo_proveedor.as_deref().filter(|c| !c.is_empty()) {
        qb.push(" AND codigo_proveedor LIKE ").push_bind(format!("%{}%", codigo));
    }
    if let Some(placa) = filter.placa.as_deref().filter(|p| !p.is_empty()) {
        qb.push(" AND placa LIKE ").push_bind(format!("%{}%", placa));
    }
    qb.push(" ORDER BY timestamp_registro_utc DESC, id DESC");

    let entries = qb.build_query_as::<EntryRecord>().fetch_all(pool).await?;
    Ok(entries)
}

/// Apply `update` to an entry
///
/// Fails with `NotFound` when the guide has no entry.
pub async fn update_entry(pool: &SqlitePool, codigo_guia: &str, update: &EntryUpdate) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE entry_records
        SET codigo_proveedor = COALESCE(?, codigo_proveedor),
            nombre_proveedor = COALESCE(?, nombre_proveedor),
            placa = COALESCE(?, placa),
            transportador = COALESCE(?, transportador),
            cantidad_racimos = COALESCE(?, cantidad_racimos),
            nota = COALESCE(?, nota)
        WHERE codigo_guia = ?
        "#,
    )
    .bind(&update.codigo_proveedor)
    .bind(&update.nombre_proveedor)
    .bind(&update.placa)
    .bind(&update.transportador)
    .bind(&update.cantidad_racimos)
    .bind(&update.nota)
    .bind(codigo_guia)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Guide {}", codigo_guia)));
    }
    Ok(())
}
