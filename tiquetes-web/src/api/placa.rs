//! Plate recognition outside the entry form
//!
//! `verificar` compares a fresh plate photo against the registered plate,
//! at the gate or at the scale. `reprocesar` re-reads the plate photo kept
//! in the entry draft.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use tiquetes_common::db::entradas;

use super::no_vacio;
use crate::error::{ApiError, ApiResult};
use crate::services::webhook_client::Webhook;
use crate::session::CurrentUser;
use crate::uploads::{load_upload, save_upload, ArchivoSubido, Formulario};
use crate::AppState;

/// Uppercase letters and digits only
pub fn normalizar_placa(placa: &str) -> String {
    placa
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Plate text read by the PLACA webhook, or a message for the operator
async fn leer_placa(state: &AppState, foto: &ArchivoSubido) -> Result<String, String> {
    let reply = state
        .webhooks
        .post_file(Webhook::Placa, foto.adjunto("file"), &[], state.settings.webhook_timeout())
        .await
        .map_err(|e| format!("Error al detectar la placa: {}", e))?;
    let text = reply.body.trim().to_uppercase();
    if text.is_empty() {
        return Err("No se pudo detectar el texto de la placa".to_string());
    }
    Ok(text)
}

/// POST /placa/verificar
///
/// The registered plate comes from `placa_registrada` or, failing that,
/// from the entry of `codigo_guia`.
pub async fn verificar(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut form = Formulario::read(multipart).await?;
    let foto = form.take_image("foto")?;
    let codigo_guia = form.text("codigo_guia");

    let placa_registrada = match form.text("placa_registrada") {
        Some(placa) => placa,
        None => {
            let registrada = match &codigo_guia {
                Some(codigo) => entradas::get_entry(&state.db, codigo)
                    .await?
                    .ok_or_else(|| ApiError::NotFound(format!("Guía {}", codigo)))?
                    .placa,
                None => None,
            };
            no_vacio(registrada).ok_or_else(|| {
                ApiError::BadRequest("No hay placa registrada para comparar".to_string())
            })?
        }
    }
    .to_uppercase();

    save_upload(&state.layout.uploads_dir, "verificacion_placa", &foto).await?;

    let placa_detectada = match leer_placa(&state, &foto).await {
        Ok(text) => text,
        Err(message) => {
            warn!(codigo_guia = ?codigo_guia, "Plate verification failed: {}", message);
            return Ok(Json(json!({"success": false, "message": message})));
        }
    };

    let coincide = normalizar_placa(&placa_registrada) == normalizar_placa(&placa_detectada);
    info!(
        codigo_guia = ?codigo_guia,
        registrada = %placa_registrada,
        detectada = %placa_detectada,
        coincide,
        user = %user.username,
        "Plate verified"
    );

    Ok(Json(json!({
        "success": true,
        "placa_detectada": placa_detectada,
        "placa_registrada": placa_registrada,
        "coincide": coincide,
    })))
}

/// POST /entrada/reprocesar-placa
pub async fn reprocesar(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let draft = state.sessions.entrada(&user.token).await;
    let filename = draft
        .plate_filename
        .ok_or_else(|| ApiError::BadRequest("No hay imagen de placa para procesar".to_string()))?;
    let foto = load_upload(&state.layout.uploads_dir, &filename)
        .await
        .map_err(|_| ApiError::NotFound(format!("Imagen de placa {}", filename)))?;

    let plate_text = match leer_placa(&state, &foto).await {
        Ok(text) => text,
        Err(message) => {
            warn!("Plate reprocessing failed: {}", message);
            return Ok(Json(json!({"success": false, "message": message})));
        }
    };

    let guardado = plate_text.clone();
    state
        .sessions
        .update_entrada(&user.token, move |draft| draft.plate_text = Some(guardado))
        .await;
    info!(user = %user.username, placa = %plate_text, "Plate reprocessed");

    Ok(Json(json!({"success": true, "plate_text": plate_text})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_normalization() {
        assert_eq!(normalizar_placa("abc-123"), "ABC123");
        assert_eq!(normalizar_placa(" ABC 123 "), "ABC123");
        assert_eq!(normalizar_placa("--"), "");
    }
}
