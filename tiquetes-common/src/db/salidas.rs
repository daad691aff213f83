//! `salidas` queries

use crate::db::models::Salida;
use crate::Result;
use sqlx::SqlitePool;

pub async fn upsert_salida(
    pool: &SqlitePool,
    codigo_guia: &str,
    comentarios_salida: Option<&str>,
    timestamp_salida_utc: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO salidas (codigo_guia, comentarios_salida, estado, timestamp_salida_utc)
        VALUES (?, ?, 'completado', ?)
        ON CONFLICT(codigo_guia) DO UPDATE SET
            comentarios_salida = excluded.comentarios_salida,
            estado = excluded.estado,
            timestamp_salida_utc = excluded.timestamp_salida_utc
        "#,
    )
    .bind(codigo_guia)
    .bind(comentarios_salida)
    .bind(timestamp_salida_utc)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_salida(pool: &SqlitePool, codigo_guia: &str) -> Result<Option<Salida>> {
    let row = sqlx::query_as::<_, Salida>(
        "SELECT codigo_guia, comentarios_salida, estado, timestamp_salida_utc \
         FROM salidas WHERE codigo_guia = ?",
    )
    .bind(codigo_guia)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
