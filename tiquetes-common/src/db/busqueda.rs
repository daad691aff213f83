//! Guide search and dashboard aggregates

use crate::Result;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Exit-based state filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstadoFiltro {
    /// No exit registered yet
    Activo,
    /// Exit registered
    Completado,
}

impl EstadoFiltro {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "activo" => Some(EstadoFiltro::Activo),
            "completado" => Some(EstadoFiltro::Completado),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BusquedaFilter {
    pub codigo_guia: Option<String>,
    pub placa: Option<String>,
    /// UTC bound, inclusive
    pub desde_utc: Option<String>,
    /// UTC bound, inclusive
    pub hasta_utc: Option<String>,
    pub proveedores: Vec<String>,
    pub estado: Option<EstadoFiltro>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GuiaResumen {
    pub codigo_guia: String,
    pub nombre_proveedor: Option<String>,
    pub codigo_proveedor: Option<String>,
    pub cantidad_racimos: Option<String>,
    pub placa: Option<String>,
    pub timestamp_registro_utc: Option<String>,
    pub tiene_salida: bool,
}

/// `Fruta` for a numeric bunch count, `Pepa` for loose fruit, otherwise `N/A`
pub fn tipo_fruta(cantidad_racimos: Option<&str>) -> &'static str {
    let value = cantidad_racimos.unwrap_or("").trim();
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        "Fruta"
    } else if value.to_lowercase().contains("pepa") {
        "Pepa"
    } else {
        "N/A"
    }
}

fn push_entry_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    desde_utc: &Option<String>,
    hasta_utc: &Option<String>,
    proveedores: &[String],
) {
    if let Some(desde) = desde_utc {
        qb.push(" AND e.timestamp_registro_utc >= ").push_bind(desde.clone());
    }
    if let Some(hasta) = hasta_utc {
        qb.push(" AND e.timestamp_registro_utc <= ").push_bind(hasta.clone());
    }
    if !proveedores.is_empty() {
        qb.push(" AND e.codigo_proveedor IN (");
        let mut list = qb.separated(", ");
        for p in proveedores {
            list.push_bind(p.clone());
        }
        list.push_unseparated(")");
    }
}

/// Entries matching the filter, newest first
pub async fn buscar_guias(pool: &SqlitePool, filter: &BusquedaFilter) -> Result<Vec<GuiaResumen>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT e.codigo_guia, e.nombre_proveedor, e.codigo_proveedor, e.cantidad_racimos,
               e.placa, e.timestamp_registro_utc,
               (s.codigo_guia IS NOT NULL) AS tiene_salida
        FROM entry_records e
        LEFT JOIN salidas s ON s.codigo_guia = e.codigo_guia
        WHERE 1 = 1
        "#,
    );

    push_entry_filters(&mut qb, &filter.desde_utc, &filter.hasta_utc, &filter.proveedores);

    if let Some(codigo) = filter.codigo_guia.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        qb.push(" AND e.codigo_guia LIKE ").push_bind(format!("%{}%", codigo));
    }
    if let Some(placa) = filter.placa.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        qb.push(" AND e.placa LIKE ").push_bind(format!("%{}%", placa));
    }
    match filter.estado {
        Some(EstadoFiltro::Activo) => {
            qb.push(" AND s.codigo_guia IS NULL");
        }
        Some(EstadoFiltro::Completado) => {
            qb.push(" AND s.codigo_guia IS NOT NULL");
        }
        None => {}
    }

    qb.push(" ORDER BY e.timestamp_registro_utc DESC, e.id DESC");

    let rows = qb.build_query_as::<GuiaResumen>().fetch_all(pool).await?;
    Ok(rows)
}

/// Supplier seen on at least one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Proveedor {
    pub codigo: String,
    pub nombre: String,
}

/// Distinct `(codigo, nombre)` pairs from entries, ordered by name
///
/// Pairs with a blank or `No disponible` side are left out.
pub async fn listar_proveedores(pool: &SqlitePool) -> Result<Vec<Proveedor>> {
    let rows = sqlx::query_as::<_, Proveedor>(
        r#"
        SELECT DISTINCT TRIM(codigo_proveedor) AS codigo, TRIM(nombre_proveedor) AS nombre
        FROM entry_records
        WHERE TRIM(COALESCE(codigo_proveedor, '')) NOT IN ('', 'No disponible')
          AND TRIM(COALESCE(nombre_proveedor, '')) NOT IN ('', 'No disponible')
        ORDER BY nombre, codigo
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mean manual counts per category over classified guides
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalidadPromedios {
    pub verde: f64,
    pub sobremaduro: f64,
    pub danio_corona: f64,
    pub pendunculo_largo: f64,
    pub podrido: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub registros_count: i64,
    pub total_racimos: i64,
    pub peso_neto_total: f64,
    /// Entries without gross weighing
    pub pesajes_pendientes: i64,
    /// Weighed entries without classification
    pub clasificaciones_pendientes: i64,
    pub calidad_promedios: CalidadPromedios,
    pub ultimos_registros: Vec<GuiaResumen>,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    cantidad_racimos: Option<String>,
    tiene_bruto: bool,
    tiene_clasificacion: bool,
    peso_neto: Option<f64>,
    verde_manual: Option<f64>,
    sobremaduro_manual: Option<f64>,
    danio_corona_manual: Option<f64>,
    pendunculo_largo_manual: Option<f64>,
    podrido_manual: Option<f64>,
}

pub async fn dashboard_stats(
    pool: &SqlitePool,
    desde_utc: Option<String>,
    hasta_utc: Option<String>,
    proveedores: &[String],
) -> Result<DashboardStats> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT e.cantidad_racimos,
               (pb.peso_bruto IS NOT NULL AND pb.peso_bruto > 0) AS tiene_bruto,
               (c.codigo_guia IS NOT NULL) AS tiene_clasificacion,
               pn.peso_neto,
               c.verde_manual, c.sobremaduro_manual, c.danio_corona_manual,
               c.pendunculo_largo_manual, c.podrido_manual
        FROM entry_records e
        LEFT JOIN pesajes_bruto pb ON pb.codigo_guia = e.codigo_guia
        LEFT JOIN clasificaciones c ON c.codigo_guia = e.codigo_guia
        LEFT JOIN pesajes_neto pn ON pn.codigo_guia = e.codigo_guia
        WHERE 1 = 1
        "#,
    );
    push_entry_filters(&mut qb, &desde_utc, &hasta_utc, proveedores);

    let rows = qb.build_query_as::<StatsRow>().fetch_all(pool).await?;

    let mut total_racimos = 0i64;
    let mut peso_neto_total = 0.0;
    let mut pesajes_pendientes = 0;
    let mut clasificaciones_pendientes = 0;
    let mut sums = [0.0f64; 5];
    let mut clasificadas = 0u32;

    for row in &rows {
        if let Some(n) = row
            .cantidad_racimos
            .as_deref()
            .map(str::trim)
            .and_then(|r| r.parse::<i64>().ok())
        {
            total_racimos += n;
        }
        peso_neto_total += row.peso_neto.unwrap_or(0.0);

        if !row.tiene_bruto {
            pesajes_pendientes += 1;
        } else if !row.tiene_clasificacion {
            clasificaciones_pendientes += 1;
        }

        let manual = [
            row.verde_manual,
            row.sobremaduro_manual,
            row.danio_corona_manual,
            row.pendunculo_largo_manual,
            row.podrido_manual,
        ];
        if manual.iter().any(Option::is_some) {
            clasificadas += 1;
            for (sum, value) in sums.iter_mut().zip(manual) {
                *sum += value.unwrap_or(0.0);
            }
        }
    }

    let mean = |sum: f64| {
        if clasificadas == 0 {
            0.0
        } else {
            (sum / clasificadas as f64 * 100.0).round() / 100.0
        }
    };
    let calidad_promedios = CalidadPromedios {
        verde: mean(sums[0]),
        sobremaduro: mean(sums[1]),
        danio_corona: mean(sums[2]),
        pendunculo_largo: mean(sums[3]),
        podrido: mean(sums[4]),
    };

    let ultimos_registros = buscar_guias(
        pool,
        &BusquedaFilter {
            desde_utc,
            hasta_utc,
            proveedores: proveedores.to_vec(),
            ..Default::default()
        },
    )
    .await?
    .into_iter()
    .take(10)
    .collect();

    tracing::debug!(registros = rows.len(), "Computed dashboard stats");

    Ok(DashboardStats {
        registros_count: rows.len() as i64,
        total_racimos,
        peso_neto_total,
        pesajes_pendientes,
        clasificaciones_pendientes,
        calidad_promedios,
        ultimos_registros,
    })
}
