//! Declarative column synchronization
//!
//! Tables are first created with `CREATE TABLE IF NOT EXISTS`. Databases
//! created by older builds may still lack columns added since; each table
//! declares its expected columns through [`TableSchema`] and missing ones are
//! added with `ALTER TABLE ADD COLUMN` at startup.
//!
//! Type or constraint drift is reported but never repaired here: SQLite can
//! only change those by rebuilding the table, which belongs in `migrations`.

use crate::Result;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Expected column of a table
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type as written in DDL (`TEXT`, `INTEGER`, `REAL`)
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// SQL literal used as DEFAULT (quoted for text: `'activo'`)
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// `ALTER TABLE` clause for this column
    ///
    /// SQLite cannot add PRIMARY KEY or UNIQUE columns, and NOT NULL only
    /// with a default; those constraints are dropped with a warning.
    fn add_column_sql(&self, table: &str) -> String {
        let mut sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, self.name, self.sql_type);

        if self.primary_key || self.unique {
            warn!(
                table,
                column = %self.name,
                "Column added without PRIMARY KEY/UNIQUE constraint (not supported by ALTER TABLE)"
            );
        }

        match (&self.default_value, self.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                table,
                column = %self.name,
                "NOT NULL column has no default, adding as nullable"
            ),
            (None, false) => {}
        }

        sql
    }
}

/// Column as reported by `PRAGMA table_info`
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub cid: i32,
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub pk: bool,
}

/// Difference between a declared and an existing table
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: &'static str,
    },
}

/// Declared layout of one table
pub trait TableSchema {
    fn table_name() -> &'static str;

    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Reads the live schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Columns of `table_name` ordered by position
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", table_name))
            .fetch_all(pool)
            .await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();
        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}

/// Compares declared and live columns
pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for col in expected {
            let Some(live) = actual.iter().find(|c| c.name.eq_ignore_ascii_case(&col.name)) else {
                drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: col.clone(),
                });
                continue;
            };

            if !Self::types_compatible(&col.sql_type, &live.type_name) {
                drift.push(SchemaDrift::TypeMismatch {
                    table: table_name.to_string(),
                    column: col.name.clone(),
                    expected: col.sql_type.clone(),
                    actual: live.type_name.clone(),
                });
            }
            if col.not_null && !live.not_null && !col.primary_key {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: col.name.clone(),
                    constraint: "NOT NULL",
                });
            }
            if col.primary_key && !live.pk {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: col.name.clone(),
                    constraint: "PRIMARY KEY",
                });
            }
        }

        drift
    }

    /// Same SQLite type affinity
    fn types_compatible(expected: &str, actual: &str) -> bool {
        affinity(expected) == affinity(actual)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Affinity {
    Integer,
    Text,
    Real,
    Other(String),
}

fn affinity(sql_type: &str) -> Affinity {
    let t = sql_type.to_uppercase();
    if t.contains("INT") {
        Affinity::Integer
    } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
        Affinity::Text
    } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
        Affinity::Real
    } else {
        Affinity::Other(t)
    }
}

/// Applies missing columns
pub struct SchemaSync;

impl SchemaSync {
    /// Add missing columns of `T`; other drift is only logged
    pub async fn sync_table<T: TableSchema>(pool: &SqlitePool) -> Result<usize> {
        let table_name = T::table_name();

        if !SchemaIntrospector::table_exists(pool, table_name).await? {
            warn!(table = table_name, "Schema sync skipped: table does not exist");
            return Ok(0);
        }

        let actual = SchemaIntrospector::introspect_table(pool, table_name).await?;
        let drift = SchemaDiff::compare(table_name, &T::expected_columns(), &actual);

        if drift.is_empty() {
            debug!(table = table_name, "Schema up to date");
            return Ok(0);
        }

        let mut added = 0;
        for change in drift {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    Self::add_column(pool, &table, &column).await?;
                    added += 1;
                }
                SchemaDrift::TypeMismatch { table, column, expected, actual } => {
                    warn!(
                        "Type mismatch in {}.{}: expected '{}', found '{}' (needs migration)",
                        table, column, expected, actual
                    );
                }
                SchemaDrift::ConstraintMismatch { table, column, constraint } => {
                    warn!(
                        "Constraint {} missing on {}.{} (needs migration)",
                        constraint, table, column
                    );
                }
            }
        }

        Ok(added)
    }

    async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
        let sql = column.add_column_sql(table);

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => {
                info!("Added column {}.{} ({})", table, column.name, column.sql_type);
                Ok(())
            }
            // Another pool connection won the race
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    struct SalidasV1;

    impl TableSchema for SalidasV1 {
        fn table_name() -> &'static str {
            "salidas"
        }

        fn expected_columns() -> Vec<ColumnDefinition> {
            vec![
                ColumnDefinition::new("id", "INTEGER").primary_key(),
                ColumnDefinition::new("codigo_guia", "TEXT").not_null().unique(),
                ColumnDefinition::new("comentarios_salida", "TEXT"),
                ColumnDefinition::new("estado", "TEXT").not_null().default("'completado'"),
            ]
        }
    }

    #[test]
    fn test_affinity_matching() {
        assert!(SchemaDiff::types_compatible("INTEGER", "INT"));
        assert!(SchemaDiff::types_compatible("text", "VARCHAR(20)"));
        assert!(SchemaDiff::types_compatible("REAL", "DOUBLE"));
        assert!(!SchemaDiff::types_compatible("TEXT", "REAL"));
        assert!(!SchemaDiff::types_compatible("INTEGER", "TEXT"));
    }

    #[test]
    fn test_add_column_sql_with_default() {
        let col = ColumnDefinition::new("estado", "TEXT").not_null().default("'activo'");
        assert_eq!(
            col.add_column_sql("entry_records"),
            "ALTER TABLE entry_records ADD COLUMN estado TEXT NOT NULL DEFAULT 'activo'"
        );

        let nullable = ColumnDefinition::new("nota", "TEXT").not_null();
        assert_eq!(
            nullable.add_column_sql("entry_records"),
            "ALTER TABLE entry_records ADD COLUMN nota TEXT"
        );
    }

    #[tokio::test]
    async fn test_detects_missing_and_mismatched_columns() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE salidas (id INTEGER PRIMARY KEY, codigo_guia TEXT NOT NULL, estado INTEGER)")
            .execute(&pool)
            .await
            .unwrap();

        let actual = SchemaIntrospector::introspect_table(&pool, "salidas").await.unwrap();
        let drift = SchemaDiff::compare("salidas", &SalidasV1::expected_columns(), &actual);

        assert!(drift.iter().any(|d| matches!(d,
            SchemaDrift::MissingColumn { column, .. } if column.name == "comentarios_salida")));
        assert!(drift.iter().any(|d| matches!(d,
            SchemaDrift::TypeMismatch { column, .. } if column == "estado")));
    }

    #[tokio::test]
    async fn test_sync_adds_missing_columns_once() {
        let pool = memory_pool().await;
        sqlx::query("CREATE TABLE salidas (id INTEGER PRIMARY KEY, codigo_guia TEXT NOT NULL UNIQUE)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO salidas (codigo_guia) VALUES ('0150076A_20240105_1234')")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(SchemaSync::sync_table::<SalidasV1>(&pool).await.unwrap(), 2);
        assert_eq!(SchemaSync::sync_table::<SalidasV1>(&pool).await.unwrap(), 0);

        let estado: String = sqlx::query_scalar("SELECT estado FROM salidas")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(estado, "completado");
    }

    #[tokio::test]
    async fn test_sync_missing_table_is_noop() {
        let pool = memory_pool().await;
        assert!(!SchemaIntrospector::table_exists(&pool, "salidas").await.unwrap());
        assert_eq!(SchemaSync::sync_table::<SalidasV1>(&pool).await.unwrap(), 0);
    }
}
