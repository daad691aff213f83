//! Stage queries, guide view and status against a real database file

use chrono::{NaiveDate, TimeZone, Utc};
use sqlx::SqlitePool;
use tiquetes_common::db::busqueda::{
    buscar_guias, dashboard_stats, listar_proveedores, BusquedaFilter, EstadoFiltro, Proveedor,
};
use tiquetes_common::db::clasificaciones::{self, NewClasificacionManual};
use tiquetes_common::db::graneles::{self, NewPrimerPesajeGranel};
use tiquetes_common::db::init::init_database;
use tiquetes_common::db::pesajes::{self, NewPesajeBruto, NewPesajeNeto, TipoPesaje};
use tiquetes_common::db::entradas::EntryUpdate;
use tiquetes_common::db::{entradas, presupuesto, salidas, users};
use tiquetes_common::db::{ConteoManual, NewEntry, NewRegistroGranel};
use tiquetes_common::guia::{self, Etapa};
use tiquetes_common::Error;

async fn setup() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("tiquetes.db")).await.unwrap();
    (dir, pool)
}

async fn registrar_entrada(pool: &SqlitePool, codigo_guia: &str, proveedor: &str, racimos: &str, ts: &str) {
    entradas::insert_entry(
        pool,
        &NewEntry {
            codigo_guia: codigo_guia.to_string(),
            nombre_proveedor: format!("Proveedor {}", proveedor),
            codigo_proveedor: proveedor.to_string(),
            cantidad_racimos: racimos.to_string(),
            placa: "ABC123".to_string(),
            timestamp_registro_utc: ts.to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
}

async fn registrar_bruto(pool: &SqlitePool, codigo_guia: &str, peso: f64, sap: Option<&str>) {
    pesajes::upsert_pesaje_bruto(
        pool,
        &NewPesajeBruto {
            codigo_guia: codigo_guia.to_string(),
            codigo_proveedor: None,
            nombre_proveedor: None,
            peso_bruto: peso,
            tipo_pesaje: TipoPesaje::Directo,
            codigo_guia_transporte_sap: sap.map(str::to_string),
            imagen_pesaje: None,
            timestamp_pesaje_utc: "2024-01-05 14:00:00".to_string(),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_guide_code_collision_suffix() {
    let (_dir, pool) = setup().await;
    let now = Utc.with_ymd_and_hms(2024, 1, 5, 18, 0, 0).unwrap();

    let first = guia::generar_codigo_guia(&pool, "0150076A", now).await.unwrap();
    assert_eq!(first, "0150076A_20240105_7600");
    registrar_entrada(&pool, &first, "0150076A", "100", "2024-01-05 18:00:00").await;

    let second = guia::generar_codigo_guia(&pool, "0150076A", now).await.unwrap();
    assert_eq!(second, "0150076A_20240105_7600_2");
    registrar_entrada(&pool, &second, "0150076A", "100", "2024-01-05 18:00:00").await;

    let third = guia::generar_codigo_guia(&pool, "0150076A", now).await.unwrap();
    assert_eq!(third, "0150076A_20240105_7600_3");
}

#[tokio::test]
async fn test_empty_supplier_code_rejected() {
    let (_dir, pool) = setup().await;
    let result = guia::generar_codigo_guia(&pool, " - ", Utc::now()).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_full_workflow_status() {
    let (_dir, pool) = setup().await;
    let g = "0150076A_20240105_1111";

    assert_eq!(guia::get_estado_guia(&pool, g).await.unwrap().estado, "creada");
    assert!(guia::get_datos_guia(&pool, g).await.unwrap().is_none());

    registrar_entrada(&pool, g, "0150076A", "120", "2024-01-05 13:00:00").await;
    assert_eq!(guia::get_estado_guia(&pool, g).await.unwrap().estado, "entrada_completada");

    let err = guia::require_etapa(&pool, g, Etapa::Pesaje).await.unwrap_err();
    assert!(matches!(err, Error::OutOfSequence(_)));

    registrar_bruto(&pool, g, 15_200.5, Some("123456")).await;
    assert!(guia::require_etapa(&pool, g, Etapa::Pesaje).await.is_ok());

    clasificaciones::upsert_clasificacion_manual(
        &pool,
        &NewClasificacionManual {
            codigo_guia: g.to_string(),
            codigo_proveedor: Some("0150076A".to_string()),
            nombre_proveedor: None,
            conteo: ConteoManual { verde: 3, sobremaduro: 1, danio_corona: 0, pendunculo_largo: 2, podrido: 0 },
            fotos: vec!["uploads/clasificacion/g/foto-1.jpg".to_string()],
            observaciones: None,
            timestamp_clasificacion_utc: "2024-01-05 15:00:00".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(guia::get_estado_guia(&pool, g).await.unwrap().estado, "clasificacion_completada");

    pesajes::upsert_pesaje_neto(
        &pool,
        &NewPesajeNeto {
            codigo_guia: g.to_string(),
            peso_tara: 6_000.0,
            peso_neto: 9_200.5,
            peso_producto: 9_200.5,
            tipo_pesaje_neto: "directo".to_string(),
            comentarios: None,
            respuesta_sap: None,
            timestamp_pesaje_neto_utc: "2024-01-05 16:00:00".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(guia::get_estado_guia(&pool, g).await.unwrap().estado, "pesaje_neto_completado");

    salidas::upsert_salida(&pool, g, Some("Sin novedad"), "2024-01-05 17:30:00").await.unwrap();
    let estado = guia::get_estado_guia(&pool, g).await.unwrap();
    assert_eq!(estado.estado, "proceso_completado");
    assert_eq!(estado.porcentaje_avance, 100);

    let datos = guia::get_datos_guia(&pool, g).await.unwrap().unwrap();
    assert_eq!(datos.peso_bruto, Some(15_200.5));
    assert_eq!(datos.codigo_guia_transporte_sap, "123456");
    assert_eq!(datos.fecha_salida, "05/01/2024");
    assert_eq!(datos.hora_salida, "12:30:00");
    assert_eq!(datos.clasificacion_manual.as_ref().unwrap().verde, 3.0);
}

#[tokio::test]
async fn test_automatic_classification_requires_row() {
    let (_dir, pool) = setup().await;
    let err = clasificaciones::update_clasificacion_automatica(&pool, "nope", "{}", "{}", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

fn clasificacion_manual(codigo_guia: &str, verde: u32, fotos: &[&str]) -> NewClasificacionManual {
    NewClasificacionManual {
        codigo_guia: codigo_guia.to_string(),
        codigo_proveedor: Some("0150076A".to_string()),
        nombre_proveedor: None,
        conteo: ConteoManual { verde, ..Default::default() },
        fotos: fotos.iter().map(|f| f.to_string()).collect(),
        observaciones: None,
        timestamp_clasificacion_utc: "2024-01-05 15:00:00".to_string(),
    }
}

#[tokio::test]
async fn test_new_photos_clear_automatic_results() {
    let (_dir, pool) = setup().await;
    let g = "0150076A_20240105_2222";
    let foto = "uploads/clasificacion/g/foto-1.jpg";

    clasificaciones::upsert_clasificacion_manual(&pool, &clasificacion_manual(g, 1, &[foto]))
        .await
        .unwrap();
    clasificaciones::update_clasificacion_automatica(&pool, g, "{\"verde\":9}", "{}", 9)
        .await
        .unwrap();

    // Same photos: only the manual counts change
    clasificaciones::upsert_clasificacion_manual(&pool, &clasificacion_manual(g, 4, &[foto]))
        .await
        .unwrap();
    let c = clasificaciones::get_clasificacion(&pool, g).await.unwrap().unwrap();
    assert_eq!(c.verde_manual, Some(4.0));
    assert_eq!(c.total_racimos_detectados, Some(9));
    assert!(c.clasificacion_automatica_json.is_some());

    // Photos removed: automatic results no longer describe anything
    clasificaciones::upsert_clasificacion_manual(&pool, &clasificacion_manual(g, 4, &[]))
        .await
        .unwrap();
    let c = clasificaciones::get_clasificacion(&pool, g).await.unwrap().unwrap();
    assert!(c.fotos().is_empty());
    assert_eq!(c.total_racimos_detectados, None);
    assert_eq!(c.clasificacion_automatica_json, None);
    assert_eq!(c.clasificacion_consolidada, None);
}

#[tokio::test]
async fn test_entry_update_keeps_unset_fields() {
    let (_dir, pool) = setup().await;
    let g = "0150076A_20240105_3333";
    registrar_entrada(&pool, g, "0150076A", "120", "2024-01-05 13:00:00").await;

    let update = EntryUpdate {
        placa: Some("XYZ987".to_string()),
        nota: Some("Placa corregida".to_string()),
        ..Default::default()
    };
    entradas::update_entry(&pool, g, &update).await.unwrap();

    let entry = entradas::get_entry(&pool, g).await.unwrap().unwrap();
    assert_eq!(entry.placa.as_deref(), Some("XYZ987"));
    assert_eq!(entry.nota.as_deref(), Some("Placa corregida"));
    assert_eq!(entry.cantidad_racimos.as_deref(), Some("120"));
    assert_eq!(entry.nombre_proveedor.as_deref(), Some("Proveedor 0150076A"));

    let err = entradas::update_entry(&pool, "nope", &update).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_supplier_list_is_distinct_and_sorted() {
    let (_dir, pool) = setup().await;
    registrar_entrada(&pool, "B_20240105_0001", "B", "100", "2024-01-05 13:00:00").await;
    registrar_entrada(&pool, "A_20240105_0002", "A", "100", "2024-01-05 14:00:00").await;
    registrar_entrada(&pool, "A_20240105_0003", "A", "90", "2024-01-05 15:00:00").await;
    registrar_entrada(&pool, "ND_20240105_0004", "No disponible", "90", "2024-01-05 16:00:00").await;

    let proveedores = listar_proveedores(&pool).await.unwrap();
    assert_eq!(
        proveedores,
        vec![
            Proveedor { codigo: "A".to_string(), nombre: "Proveedor A".to_string() },
            Proveedor { codigo: "B".to_string(), nombre: "Proveedor B".to_string() },
        ]
    );
}

#[tokio::test]
async fn test_search_filters() {
    let (_dir, pool) = setup().await;
    registrar_entrada(&pool, "A_20240105_0001", "A", "100", "2024-01-05 13:00:00").await;
    registrar_entrada(&pool, "B_20240106_0002", "B", "Pepa", "2024-01-06 13:00:00").await;
    // 03:00 UTC on the 7th is still the 6th in Bogotá
    registrar_entrada(&pool, "A_20240106_0003", "A", "80", "2024-01-07 03:00:00").await;
    salidas::upsert_salida(&pool, "A_20240105_0001", None, "2024-01-05 20:00:00").await.unwrap();

    let all = buscar_guias(&pool, &BusquedaFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].codigo_guia, "A_20240106_0003");

    let (desde, hasta) = tiquetes_common::time::bogota_day_range_utc(
        NaiveDate::from_ymd_opt(2024, 1, 6),
        NaiveDate::from_ymd_opt(2024, 1, 6),
    );
    let dia = buscar_guias(&pool, &BusquedaFilter { desde_utc: desde, hasta_utc: hasta, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(dia.len(), 2);

    let activos = buscar_guias(
        &pool,
        &BusquedaFilter { estado: Some(EstadoFiltro::Activo), proveedores: vec!["A".into()], ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(activos.len(), 1);
    assert_eq!(activos[0].codigo_guia, "A_20240106_0003");

    let completados = buscar_guias(
        &pool,
        &BusquedaFilter { estado: Some(EstadoFiltro::Completado), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(completados.len(), 1);
    assert!(completados[0].tiene_salida);
}

#[tokio::test]
async fn test_dashboard_stats() {
    let (_dir, pool) = setup().await;
    registrar_entrada(&pool, "G1", "A", "100", "2024-01-05 13:00:00").await;
    registrar_entrada(&pool, "G2", "A", "Pepa", "2024-01-05 14:00:00").await;
    registrar_entrada(&pool, "G3", "B", "50", "2024-01-05 15:00:00").await;
    registrar_bruto(&pool, "G1", 10_000.0, None).await;
    registrar_bruto(&pool, "G3", 8_000.0, None).await;
    clasificaciones::upsert_clasificacion_manual(
        &pool,
        &NewClasificacionManual {
            codigo_guia: "G1".to_string(),
            codigo_proveedor: None,
            nombre_proveedor: None,
            conteo: ConteoManual { verde: 4, sobremaduro: 2, danio_corona: 0, pendunculo_largo: 0, podrido: 1 },
            fotos: vec![],
            observaciones: None,
            timestamp_clasificacion_utc: "2024-01-05 15:00:00".to_string(),
        },
    )
    .await
    .unwrap();

    let stats = dashboard_stats(&pool, None, None, &[]).await.unwrap();
    assert_eq!(stats.registros_count, 3);
    assert_eq!(stats.total_racimos, 150);
    assert_eq!(stats.pesajes_pendientes, 1);
    assert_eq!(stats.clasificaciones_pendientes, 1);
    assert_eq!(stats.calidad_promedios.verde, 4.0);
    assert_eq!(stats.ultimos_registros.len(), 3);

    let solo_b = dashboard_stats(&pool, None, None, &["B".to_string()]).await.unwrap();
    assert_eq!(solo_b.registros_count, 1);
    assert_eq!(solo_b.total_racimos, 50);
}

#[tokio::test]
async fn test_sap_lookup() {
    let (_dir, pool) = setup().await;
    registrar_entrada(&pool, "G1", "A", "100", "2024-01-05 13:00:00").await;
    registrar_bruto(&pool, "G1", 10_000.0, Some("8001234")).await;

    let found = pesajes::find_pesaje_bruto_by_sap(&pool, "8001234").await.unwrap().unwrap();
    assert_eq!(found.codigo_guia, "G1");
    assert!(pesajes::find_pesaje_bruto_by_sap(&pool, "999").await.unwrap().is_none());
}

#[tokio::test]
async fn test_granel_single_first_weighing() {
    let (_dir, pool) = setup().await;
    let id = graneles::insert_registro_granel(
        &pool,
        &NewRegistroGranel {
            producto: "Palmiste".to_string(),
            placa: "TRK001".to_string(),
            nombre_conductor: "Juan Pérez".to_string(),
            ..Default::default()
        },
        Some("operador"),
        "2024-01-05 13:00:00",
    )
    .await
    .unwrap();

    let registro = graneles::get_registro_granel(&pool, id).await.unwrap().unwrap();
    assert_eq!(registro.tipo_registro, "manual");
    assert_eq!(registro.usuario_registro.as_deref(), Some("operador"));

    let pesaje = NewPrimerPesajeGranel {
        id_registro_granel: id,
        peso_primer_kg: 12_500.0,
        codigo_sap_granel: Some("SAP-1".to_string()),
        usuario_pesaje: Some("operador".to_string()),
        foto_soporte_path: None,
        timestamp_primer_pesaje: "2024-01-05 14:00:00".to_string(),
    };
    graneles::insert_primer_pesaje(&pool, &pesaje).await.unwrap();
    let err = graneles::insert_primer_pesaje(&pool, &pesaje).await.unwrap_err();
    assert!(matches!(err, Error::OutOfSequence(_)));

    let stored = graneles::get_primer_pesaje(&pool, id).await.unwrap().unwrap();
    assert_eq!(stored.peso_primer_kg, 12_500.0);
}

#[tokio::test]
async fn test_presupuesto_replace_and_range() {
    let (_dir, pool) = setup().await;
    let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();

    presupuesto::upsert_presupuesto(&pool, &[(d(1), 10.0), (d(2), 12.5)], "2024-03-01 10:00:00")
        .await
        .unwrap();
    presupuesto::upsert_presupuesto(&pool, &[(d(2), 14.0), (d(3), 9.0)], "2024-03-02 10:00:00")
        .await
        .unwrap();

    let rows = presupuesto::list_presupuesto(&pool, Some(d(2)), Some(d(3))).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].fecha_presupuesto, "2024-03-02");
    assert_eq!(rows[0].toneladas_proyectadas, 14.0);

    assert_eq!(presupuesto::list_presupuesto(&pool, None, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_first_user_is_admin() {
    let (_dir, pool) = setup().await;

    let admin = users::create_user(&pool, "admin", "admin@planta.co", "secreto1").await.unwrap();
    assert!(admin.is_admin && admin.is_active);
    assert!(admin.verify_password("secreto1"));
    assert!(!admin.verify_password("otro"));

    let operador = users::create_user(&pool, "operador", "op@planta.co", "secreto2").await.unwrap();
    assert!(!operador.is_admin && !operador.is_active);

    let dup = users::create_user(&pool, "operador", "otro@planta.co", "secreto3").await;
    assert!(matches!(dup, Err(Error::Duplicate(_))));

    users::activate_user(&pool, operador.id).await.unwrap();
    let reloaded = users::get_user_by_username(&pool, "operador").await.unwrap().unwrap();
    assert!(reloaded.is_active);

    assert!(matches!(users::activate_user(&pool, 999).await, Err(Error::NotFound(_))));
}
