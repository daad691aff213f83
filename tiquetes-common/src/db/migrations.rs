//! Versioned schema migrations
//!
//! Column additions are handled by `table_schemas`; migrations here move
//! data. Each one is idempotent and tolerates the columns it reads being
//! absent, so a fresh database runs them all as no-ops.
//!
//! Never edit an existing migration; add a new version instead.

use crate::time::{bogota, to_db_timestamp};
use crate::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Increment when adding a migration
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Latest applied version, 0 when none
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than this build ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: derive UTC timestamps from legacy local date/time columns
///
/// Older databases stored Bogotá-local `fecha_*`/`hora_*` text pairs per
/// stage. Rows without a UTC timestamp get one computed from those.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    let targets = [
        ("entry_records", "fecha_registro", "hora_registro", "timestamp_registro_utc"),
        ("pesajes_bruto", "fecha_pesaje", "hora_pesaje", "timestamp_pesaje_utc"),
        ("clasificaciones", "fecha_clasificacion", "hora_clasificacion", "timestamp_clasificacion_utc"),
        ("pesajes_neto", "fecha_pesaje", "hora_pesaje", "timestamp_pesaje_neto_utc"),
        ("salidas", "fecha_salida", "hora_salida", "timestamp_salida_utc"),
    ];

    for (table, fecha_col, hora_col, target_col) in targets {
        let filled = backfill_utc_timestamp(pool, table, fecha_col, hora_col, target_col).await?;
        if filled > 0 {
            info!("  Backfilled {} {}.{} value(s)", filled, table, target_col);
        }
    }

    Ok(())
}

/// Migration v2: copy legacy `num_placa` into `placa`
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    if !has_column(pool, "entry_records", "num_placa").await? {
        return Ok(());
    }

    let result = sqlx::query(
        "UPDATE entry_records SET placa = num_placa \
         WHERE (placa IS NULL OR placa = '') AND num_placa IS NOT NULL AND num_placa != ''",
    )
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        info!("  Copied num_placa into placa for {} entry record(s)", result.rows_affected());
    }
    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?",
        table
    ))
    .bind(column)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

async fn backfill_utc_timestamp(
    pool: &SqlitePool,
    table: &str,
    fecha_col: &str,
    hora_col: &str,
    target_col: &str,
) -> Result<u64> {
    for col in [fecha_col, hora_col, target_col] {
        if !has_column(pool, table, col).await? {
            return Ok(0);
        }
    }

    let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(&format!(
        "SELECT codigo_guia, {fecha}, {hora} FROM {table} \
         WHERE ({target} IS NULL OR {target} = '') AND {fecha} IS NOT NULL",
        fecha = fecha_col,
        hora = hora_col,
        table = table,
        target = target_col
    ))
    .fetch_all(pool)
    .await?;

    let mut filled = 0;
    for (codigo_guia, fecha, hora) in rows {
        let Some(ts) = fecha.as_deref().and_then(|f| legacy_local_to_utc(f, hora.as_deref())) else {
            warn!(
                table,
                codigo_guia = %codigo_guia,
                "Legacy date {:?} {:?} not parseable, left without UTC timestamp",
                fecha,
                hora
            );
            continue;
        };

        sqlx::query(&format!("UPDATE {} SET {} = ? WHERE codigo_guia = ?", table, target_col))
            .bind(ts)
            .bind(&codigo_guia)
            .execute(pool)
            .await?;
        filled += 1;
    }

    Ok(filled)
}

/// Legacy local `dd/mm/YYYY` (or ISO) date plus optional `HH:MM[:SS]` to a UTC storage string
pub(crate) fn legacy_local_to_utc(fecha: &str, hora: Option<&str>) -> Option<String> {
    let fecha = fecha.trim();
    let date = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(fecha, fmt).ok())?;

    let time = hora
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .and_then(|h| {
            NaiveTime::parse_from_str(h, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(h, "%H:%M"))
                .ok()
        })
        .unwrap_or(NaiveTime::MIN);

    bogota()
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .single()
        .map(|dt| to_db_timestamp(dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_local_to_utc() {
        assert_eq!(
            legacy_local_to_utc("05/01/2024", Some("22:15:00")).as_deref(),
            Some("2024-01-06 03:15:00")
        );
        assert_eq!(
            legacy_local_to_utc("2024-01-05", Some("08:30")).as_deref(),
            Some("2024-01-05 13:30:00")
        );
        assert_eq!(
            legacy_local_to_utc("05/01/2024", None).as_deref(),
            Some("2024-01-05 05:00:00")
        );
        assert!(legacy_local_to_utc("ayer", Some("10:00:00")).is_none());
    }
}
