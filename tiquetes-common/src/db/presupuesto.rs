//! Daily budget (`presupuesto_mensual`)

use crate::db::models::PresupuestoDia;
use crate::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;

/// Store rows, replacing existing days; returns rows written
pub async fn upsert_presupuesto(
    pool: &SqlitePool,
    rows: &[(NaiveDate, f64)],
    fecha_carga: &str,
) -> Result<usize> {
    let mut tx = pool.begin().await?;

    for (fecha, toneladas) in rows {
        sqlx::query(
            "INSERT OR REPLACE INTO presupuesto_mensual (fecha_presupuesto, toneladas_proyectadas, fecha_carga) \
             VALUES (?, ?, ?)",
        )
        .bind(fecha.format("%Y-%m-%d").to_string())
        .bind(toneladas)
        .bind(fecha_carga)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len())
}

/// Budget rows in `[inicio, fin]` ordered by date
pub async fn list_presupuesto(
    pool: &SqlitePool,
    inicio: Option<NaiveDate>,
    fin: Option<NaiveDate>,
) -> Result<Vec<PresupuestoDia>> {
    let inicio = inicio.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
    let fin = fin
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "9999-12-31".to_string());

    let rows = sqlx::query_as::<_, PresupuestoDia>(
        "SELECT fecha_presupuesto, toneladas_proyectadas, fecha_carga FROM presupuesto_mensual \
         WHERE fecha_presupuesto >= ? AND fecha_presupuesto <= ? ORDER BY fecha_presupuesto",
    )
    .bind(inicio)
    .bind(fin)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
