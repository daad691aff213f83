//! Background automatic classification
//!
//! A run is started by the HTTP handler and continues after the response
//! has been sent. Progress is kept in memory per guide; the final result is
//! written to `clasificaciones/clasificacion_{guia}.json` and summarized in
//! the `clasificaciones` row.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::services::classification::{agregar, analizar_respuesta, ImagenesAnotadas, ResultadoClasificacion, ResultadoImagen};
use crate::services::roboflow_client::RoboflowClient;
use tiquetes_common::db::clasificaciones::update_clasificacion_automatica;
use tiquetes_common::time::utc_timestamp_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstadoProceso {
    NotStarted,
    Processing,
    Completado,
    CompletadoSinDeteccion,
    ErrorProcesamiento,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgresoClasificacion {
    pub status: EstadoProceso,
    pub progress: u8,
    pub message: String,
}

impl ProgresoClasificacion {
    pub fn new(status: EstadoProceso, progress: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
        }
    }
}

/// In-memory progress of classification runs, keyed by guide code
#[derive(Clone, Default)]
pub struct ProgresoStore {
    inner: Arc<RwLock<HashMap<String, ProgresoClasificacion>>>,
}

impl ProgresoStore {
    pub async fn get(&self, codigo_guia: &str) -> Option<ProgresoClasificacion> {
        self.inner.read().await.get(codigo_guia).cloned()
    }

    pub async fn set(&self, codigo_guia: &str, progreso: ProgresoClasificacion) {
        self.inner.write().await.insert(codigo_guia.to_string(), progreso);
    }

    pub async fn is_processing(&self, codigo_guia: &str) -> bool {
        self.inner
            .read()
            .await
            .get(codigo_guia)
            .is_some_and(|p| p.status == EstadoProceso::Processing)
    }

    /// Forget the last run of a guide
    pub async fn clear(&self, codigo_guia: &str) {
        self.inner.write().await.remove(codigo_guia);
    }

    /// Mark a run as started unless one is already processing
    pub async fn try_start(&self, codigo_guia: &str) -> bool {
        let mut map = self.inner.write().await;
        if map
            .get(codigo_guia)
            .is_some_and(|p| p.status == EstadoProceso::Processing)
        {
            return false;
        }
        map.insert(
            codigo_guia.to_string(),
            ProgresoClasificacion::new(EstadoProceso::Processing, 0, "Procesamiento iniciado"),
        );
        true
    }
}

/// One classification run
pub struct ClasificacionJob {
    pub pool: SqlitePool,
    pub roboflow: RoboflowClient,
    pub progreso: ProgresoStore,
    pub clasificaciones_dir: PathBuf,
    pub codigo_guia: String,
    pub fotos: Vec<PathBuf>,
}

impl ClasificacionJob {
    /// Run on a detached task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(self) {
        let codigo_guia = self.codigo_guia.clone();
        info!(codigo_guia = %codigo_guia, fotos = self.fotos.len(), "Starting automatic classification");

        let total_fotos = self.fotos.len().max(1);
        let mut imagenes = Vec::with_capacity(self.fotos.len());

        for (idx, foto) in self.fotos.iter().enumerate() {
            let progress = (10 + idx * 80 / total_fotos) as u8;
            self.progreso
                .set(
                    &codigo_guia,
                    ProgresoClasificacion::new(
                        EstadoProceso::Processing,
                        progress,
                        format!("Procesando foto {} de {}", idx + 1, self.fotos.len()),
                    ),
                )
                .await;

            imagenes.push(self.procesar_foto(foto).await);
        }

        let resultado = agregar(&codigo_guia, imagenes, utc_timestamp_str());
        let final_status = match self.guardar(&resultado).await {
            Ok(()) => estado_final(&resultado),
            Err(e) => {
                error!(codigo_guia = %codigo_guia, "Failed to store classification result: {}", e);
                ProgresoClasificacion::new(
                    EstadoProceso::ErrorProcesamiento,
                    100,
                    format!("Error guardando resultados: {}", e),
                )
            }
        };

        info!(
            codigo_guia = %codigo_guia,
            status = ?final_status.status,
            total = resultado.total_racimos_detectados,
            "Automatic classification finished"
        );
        self.progreso.set(&codigo_guia, final_status).await;
    }

    async fn procesar_foto(&self, foto: &Path) -> ResultadoImagen {
        let nombre = foto.display().to_string();

        let bytes = match tokio::fs::read(foto).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(foto = %nombre, "Cannot read photo: {}", e);
                return ResultadoImagen::error(&nombre, format!("No se pudo leer la imagen: {}", e));
            }
        };

        let response = match self.roboflow.run_workflow(&bytes).await {
            Ok(response) => response,
            Err(e) => {
                warn!(foto = %nombre, "Roboflow failed: {}", e);
                return ResultadoImagen::error(&nombre, e.to_string());
            }
        };

        let (mut resultado, anotadas) = analizar_respuesta(&nombre, &response);
        let (etiquetada, visualizacion) = guardar_anotadas(foto, anotadas).await;
        resultado.imagen_etiquetada = etiquetada;
        resultado.imagen_visualizacion = visualizacion;
        resultado
    }

    async fn guardar(&self, resultado: &ResultadoClasificacion) -> tiquetes_common::Result<()> {
        let to_json = |e: serde_json::Error| tiquetes_common::Error::Internal(e.to_string());

        tokio::fs::create_dir_all(&self.clasificaciones_dir).await?;
        let path = self
            .clasificaciones_dir
            .join(format!("clasificacion_{}.json", resultado.codigo_guia));
        tokio::fs::write(&path, serde_json::to_vec_pretty(resultado).map_err(to_json)?).await?;

        if resultado.conteo_imagenes_ok == 0 {
            return Ok(());
        }

        let automatica = serde_json::to_string(resultado).map_err(to_json)?;
        let consolidada = serde_json::to_string(&resultado.categorias).map_err(to_json)?;
        update_clasificacion_automatica(
            &self.pool,
            &resultado.codigo_guia,
            &automatica,
            &consolidada,
            resultado.total_racimos_detectados as i64,
        )
        .await?;
        Ok(())
    }
}

fn estado_final(resultado: &ResultadoClasificacion) -> ProgresoClasificacion {
    if resultado.conteo_imagenes_ok == 0 {
        ProgresoClasificacion::new(
            EstadoProceso::ErrorProcesamiento,
            100,
            format!("Ninguna imagen pudo procesarse: {}", resultado.detalle_errores.join("; ")),
        )
    } else if resultado.total_racimos_detectados == 0 {
        ProgresoClasificacion::new(
            EstadoProceso::CompletadoSinDeteccion,
            100,
            "Procesamiento completado sin racimos detectados",
        )
    } else {
        ProgresoClasificacion::new(
            EstadoProceso::Completado,
            100,
            format!(
                "Procesamiento completado: {} racimos detectados",
                resultado.total_racimos_detectados
            ),
        )
    }
}

/// Save annotated images next to the photo as `{stem}_labeled_rf.jpg` and
/// `{stem}_viz_rf.jpg`
async fn guardar_anotadas(foto: &Path, anotadas: ImagenesAnotadas) -> (Option<String>, Option<String>) {
    let stem = foto
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "foto".to_string());
    let dir = foto.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut saved = [None, None];
    for (slot, (bytes, suffix)) in saved.iter_mut().zip([
        (anotadas.etiquetada, "labeled_rf"),
        (anotadas.visualizacion, "viz_rf"),
    ]) {
        let Some(bytes) = bytes else { continue };
        let path = dir.join(format!("{}_{}.jpg", stem, suffix));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => *slot = Some(path.display().to_string()),
            Err(e) => warn!(path = %path.display(), "Cannot save annotated image: {}", e),
        }
    }

    let [etiquetada, visualizacion] = saved;
    (etiquetada, visualizacion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_start_rejects_concurrent_run() {
        let store = ProgresoStore::default();
        assert!(store.try_start("G1").await);
        assert!(!store.try_start("G1").await);
        assert!(store.try_start("G2").await);

        store
            .set("G1", ProgresoClasificacion::new(EstadoProceso::Completado, 100, "ok"))
            .await;
        assert!(!store.is_processing("G1").await);
        assert!(store.try_start("G1").await);
        assert!(store.is_processing("G1").await);

        store.clear("G1").await;
        assert!(store.get("G1").await.is_none());
    }

    #[tokio::test]
    async fn test_annotated_images_saved_beside_photo() {
        let dir = tempfile::tempdir().unwrap();
        let foto = dir.path().join("foto_1.jpg");
        let anotadas = ImagenesAnotadas {
            etiquetada: Some(b"a".to_vec()),
            visualizacion: None,
        };

        let (etiquetada, visualizacion) = guardar_anotadas(&foto, anotadas).await;
        assert!(etiquetada.unwrap().ends_with("foto_1_labeled_rf.jpg"));
        assert!(visualizacion.is_none());
        assert!(dir.path().join("foto_1_labeled_rf.jpg").exists());
    }
}
