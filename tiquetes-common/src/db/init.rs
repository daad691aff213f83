//! Database initialization
//!
//! Startup sequence:
//! 1. Open (or create) the SQLite file with WAL and foreign keys.
//! 2. `CREATE TABLE IF NOT EXISTS` for every table.
//! 3. Add columns missing from older databases (`table_schemas`).
//! 4. Versioned migrations (`migrations`).
//! 5. Indexes and default runtime settings.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open the database at `db_path`, creating tables and defaults as needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_tables(&pool).await?;

    crate::db::table_schemas::sync_all_table_schemas(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    // Indexed columns may only exist after sync on older databases
    create_indexes(&pool).await?;

    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create every table (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_users_table(pool).await?;

    // Fruit workflow, one row per guide per stage
    create_entry_records_table(pool).await?;
    create_pesajes_bruto_table(pool).await?;
    create_clasificaciones_table(pool).await?;
    create_pesajes_neto_table(pool).await?;
    create_salidas_table(pool).await?;

    // Bulk goods
    create_registro_entrada_graneles_table(pool).await?;
    create_primer_pesaje_granel_table(pool).await?;

    create_presupuesto_mensual_table(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_entry_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entry_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo_guia TEXT NOT NULL UNIQUE,
            nombre_proveedor TEXT,
            codigo_proveedor TEXT,
            cantidad_racimos TEXT,
            placa TEXT,
            transportador TEXT,
            acarreo TEXT,
            cargo TEXT,
            codigo_guia_transporte_sap TEXT,
            observaciones TEXT,
            image_filename TEXT,
            plate_filename TEXT,
            plate_text TEXT,
            fecha_tiquete TEXT,
            nota TEXT,
            url_qr TEXT,
            estado TEXT NOT NULL DEFAULT 'activo',
            timestamp_registro_utc TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pesajes_bruto_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pesajes_bruto (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo_guia TEXT NOT NULL UNIQUE,
            codigo_proveedor TEXT,
            nombre_proveedor TEXT,
            peso_bruto REAL,
            tipo_pesaje TEXT,
            codigo_guia_transporte_sap TEXT,
            imagen_pesaje TEXT,
            timestamp_pesaje_utc TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_clasificaciones_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clasificaciones (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo_guia TEXT NOT NULL UNIQUE,
            codigo_proveedor TEXT,
            nombre_proveedor TEXT,
            verde_manual REAL,
            sobremaduro_manual REAL,
            danio_corona_manual REAL,
            pendunculo_largo_manual REAL,
            podrido_manual REAL,
            clasificacion_manual_json TEXT,
            clasificacion_automatica_json TEXT,
            clasificacion_consolidada TEXT,
            total_racimos_detectados INTEGER,
            fotos_json TEXT,
            observaciones TEXT,
            estado TEXT,
            timestamp_clasificacion_utc TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pesajes_neto_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pesajes_neto (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo_guia TEXT NOT NULL UNIQUE,
            peso_tara REAL,
            peso_neto REAL,
            peso_producto REAL,
            tipo_pesaje_neto TEXT,
            comentarios TEXT,
            respuesta_sap TEXT,
            timestamp_pesaje_neto_utc TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_salidas_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS salidas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo_guia TEXT NOT NULL UNIQUE,
            comentarios_salida TEXT,
            estado TEXT NOT NULL DEFAULT 'completado',
            timestamp_salida_utc TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_registro_entrada_graneles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS RegistroEntradaGraneles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            producto TEXT NOT NULL,
            fecha_autorizacion TEXT,
            placa TEXT NOT NULL,
            trailer TEXT,
            cedula_conductor TEXT,
            nombre_conductor TEXT NOT NULL,
            origen TEXT,
            destino TEXT,
            tipo_registro TEXT NOT NULL DEFAULT 'manual',
            observaciones TEXT,
            usuario_registro TEXT,
            timestamp_registro TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_primer_pesaje_granel_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS PrimerPesajeGranel (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            id_registro_granel INTEGER NOT NULL UNIQUE
                REFERENCES RegistroEntradaGraneles(id) ON DELETE CASCADE,
            peso_primer_kg REAL NOT NULL,
            codigo_sap_granel TEXT,
            usuario_pesaje TEXT,
            foto_soporte_path TEXT,
            timestamp_primer_pesaje TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_presupuesto_mensual_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS presupuesto_mensual (
            fecha_presupuesto TEXT PRIMARY KEY,
            toneladas_proyectadas REAL NOT NULL,
            fecha_carga TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    for sql in [
        "CREATE INDEX IF NOT EXISTS idx_entry_records_proveedor ON entry_records(codigo_proveedor)",
        "CREATE INDEX IF NOT EXISTS idx_entry_records_timestamp ON entry_records(timestamp_registro_utc)",
        "CREATE INDEX IF NOT EXISTS idx_pesajes_bruto_sap ON pesajes_bruto(codigo_guia_transporte_sap)",
    ] {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

/// Write default runtime settings that are missing or NULL
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "webhook_timeout_secs", "30").await?;
    ensure_setting(pool, "revalidation_timeout_secs", "60").await?;
    ensure_setting(pool, "authorization_code_ttl_minutes", "30").await?;
    ensure_setting(pool, "max_clasificacion_fotos", "3").await?;
    ensure_setting(pool, "session_timeout_seconds", "43200").await?;
    ensure_setting(pool, "upload_max_bytes", "20971520").await?;

    Ok(())
}

/// Insert `key` with `default` unless a non-NULL value is present
async fn ensure_setting(pool: &SqlitePool, key: &str, default: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(default)
        .execute(pool)
        .await?;

    let reset = sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND value IS NULL")
        .bind(default)
        .bind(key)
        .execute(pool)
        .await?;

    if reset.rows_affected() > 0 {
        info!("Setting '{}' was NULL, reset to default {}", key, default);
    }

    Ok(())
}
