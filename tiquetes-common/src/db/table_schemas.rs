//! Declared columns per table
//!
//! Must stay in step with the DDL in `init.rs`. Columns listed here are added
//! to databases created before they existed.

use crate::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

fn text(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, "TEXT")
}

fn real(name: &str) -> ColumnDefinition {
    ColumnDefinition::new(name, "REAL")
}

fn id() -> ColumnDefinition {
    ColumnDefinition::new("id", "INTEGER").primary_key()
}

fn codigo_guia() -> ColumnDefinition {
    text("codigo_guia").not_null().unique()
}

pub struct EntryRecordsSchema;

impl TableSchema for EntryRecordsSchema {
    fn table_name() -> &'static str {
        "entry_records"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            codigo_guia(),
            text("nombre_proveedor"),
            text("codigo_proveedor"),
            text("cantidad_racimos"),
            text("placa"),
            text("transportador"),
            text("acarreo"),
            text("cargo"),
            text("codigo_guia_transporte_sap"),
            text("observaciones"),
            text("image_filename"),
            text("plate_filename"),
            text("plate_text"),
            text("fecha_tiquete"),
            text("nota"),
            text("url_qr"),
            text("estado").not_null().default("'activo'"),
            text("timestamp_registro_utc"),
        ]
    }
}

pub struct PesajesBrutoSchema;

impl TableSchema for PesajesBrutoSchema {
    fn table_name() -> &'static str {
        "pesajes_bruto"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            codigo_guia(),
            text("codigo_proveedor"),
            text("nombre_proveedor"),
            real("peso_bruto"),
            text("tipo_pesaje"),
            text("codigo_guia_transporte_sap"),
            text("imagen_pesaje"),
            text("timestamp_pesaje_utc"),
        ]
    }
}

pub struct ClasificacionesSchema;

impl TableSchema for ClasificacionesSchema {
    fn table_name() -> &'static str {
        "clasificaciones"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            codigo_guia(),
            text("codigo_proveedor"),
            text("nombre_proveedor"),
            real("verde_manual"),
            real("sobremaduro_manual"),
            real("danio_corona_manual"),
            real("pendunculo_largo_manual"),
            real("podrido_manual"),
            text("clasificacion_manual_json"),
            text("clasificacion_automatica_json"),
            text("clasificacion_consolidada"),
            ColumnDefinition::new("total_racimos_detectados", "INTEGER"),
            text("fotos_json"),
            text("observaciones"),
            text("estado"),
            text("timestamp_clasificacion_utc"),
        ]
    }
}

pub struct PesajesNetoSchema;

impl TableSchema for PesajesNetoSchema {
    fn table_name() -> &'static str {
        "pesajes_neto"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            codigo_guia(),
            real("peso_tara"),
            real("peso_neto"),
            real("peso_producto"),
            text("tipo_pesaje_neto"),
            text("comentarios"),
            text("respuesta_sap"),
            text("timestamp_pesaje_neto_utc"),
        ]
    }
}

pub struct SalidasSchema;

impl TableSchema for SalidasSchema {
    fn table_name() -> &'static str {
        "salidas"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            codigo_guia(),
            text("comentarios_salida"),
            text("estado").not_null().default("'completado'"),
            text("timestamp_salida_utc"),
        ]
    }
}

pub struct RegistroEntradaGranelesSchema;

impl TableSchema for RegistroEntradaGranelesSchema {
    fn table_name() -> &'static str {
        "RegistroEntradaGraneles"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            text("producto").not_null(),
            text("fecha_autorizacion"),
            text("placa").not_null(),
            text("trailer"),
            text("cedula_conductor"),
            text("nombre_conductor").not_null(),
            text("origen"),
            text("destino"),
            text("tipo_registro").not_null().default("'manual'"),
            text("observaciones"),
            text("usuario_registro"),
            text("timestamp_registro"),
        ]
    }
}

pub struct PrimerPesajeGranelSchema;

impl TableSchema for PrimerPesajeGranelSchema {
    fn table_name() -> &'static str {
        "PrimerPesajeGranel"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            ColumnDefinition::new("id_registro_granel", "INTEGER").not_null().unique(),
            real("peso_primer_kg").not_null(),
            text("codigo_sap_granel"),
            text("usuario_pesaje"),
            text("foto_soporte_path"),
            text("timestamp_primer_pesaje"),
        ]
    }
}

pub struct PresupuestoMensualSchema;

impl TableSchema for PresupuestoMensualSchema {
    fn table_name() -> &'static str {
        "presupuesto_mensual"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            text("fecha_presupuesto").primary_key(),
            real("toneladas_proyectadas").not_null(),
            text("fecha_carga"),
        ]
    }
}

pub struct UsersSchema;

impl TableSchema for UsersSchema {
    fn table_name() -> &'static str {
        "users"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            id(),
            text("username").not_null().unique(),
            text("email").not_null().unique(),
            text("password_hash").not_null(),
            text("password_salt").not_null(),
            ColumnDefinition::new("is_active", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("is_admin", "INTEGER").not_null().default("0"),
            text("created_at").not_null(),
        ]
    }
}

/// Add missing columns on every table; returns the number added
pub async fn sync_all_table_schemas(pool: &SqlitePool) -> Result<usize> {
    let mut added = 0;
    added += SchemaSync::sync_table::<EntryRecordsSchema>(pool).await?;
    added += SchemaSync::sync_table::<PesajesBrutoSchema>(pool).await?;
    added += SchemaSync::sync_table::<ClasificacionesSchema>(pool).await?;
    added += SchemaSync::sync_table::<PesajesNetoSchema>(pool).await?;
    added += SchemaSync::sync_table::<SalidasSchema>(pool).await?;
    added += SchemaSync::sync_table::<RegistroEntradaGranelesSchema>(pool).await?;
    added += SchemaSync::sync_table::<PrimerPesajeGranelSchema>(pool).await?;
    added += SchemaSync::sync_table::<PresupuestoMensualSchema>(pool).await?;
    added += SchemaSync::sync_table::<UsersSchema>(pool).await?;

    if added > 0 {
        info!("Schema sync added {} column(s)", added);
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_legacy_entry_records_gains_columns() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        // Layout used before QR links and plate text were stored
        sqlx::query(
            r#"
            CREATE TABLE entry_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                codigo_guia TEXT NOT NULL UNIQUE,
                nombre_proveedor TEXT,
                codigo_proveedor TEXT,
                cantidad_racimos TEXT,
                placa TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let added = SchemaSync::sync_table::<EntryRecordsSchema>(&pool).await.unwrap();
        assert_eq!(added, EntryRecordsSchema::expected_columns().len() - 6);

        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('entry_records')")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(names.iter().any(|n| n == "url_qr"));
        assert!(names.iter().any(|n| n == "plate_text"));
        assert!(names.iter().any(|n| n == "timestamp_registro_utc"));
    }

    #[test]
    fn test_every_stage_table_keys_on_codigo_guia() {
        for cols in [
            PesajesBrutoSchema::expected_columns(),
            ClasificacionesSchema::expected_columns(),
            PesajesNetoSchema::expected_columns(),
            SalidasSchema::expected_columns(),
        ] {
            assert!(cols.iter().any(|c| c.name == "codigo_guia" && c.unique && c.not_null));
        }
    }
}
