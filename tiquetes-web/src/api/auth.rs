//! Account registration, login and activation

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use tiquetes_common::db::users;

use super::{requerido, JsonOrForm};
use crate::error::{ApiError, ApiResult};
use crate::session::{clear_session_cookie, session_cookie, token_from_headers, CurrentUser};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// POST /auth/register
///
/// The first account is an active administrator; later ones wait for
/// activation.
pub async fn register(
    State(state): State<AppState>,
    JsonOrForm(req): JsonOrForm<RegisterRequest>,
) -> ApiResult<Response> {
    let username = requerido(req.username, "username")?;
    let email = requerido(req.email, "email")?;
    let password = req.password.unwrap_or_default();

    if !email.contains('@') {
        return Err(ApiError::BadRequest("Correo electrónico inválido".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "La contraseña debe tener al menos {} caracteres",
            MIN_PASSWORD_LEN
        )));
    }

    let user = users::create_user(&state.db, &username, &email, &password).await?;
    info!(username = %user.username, admin = user.is_admin, "User registered");

    let message = if user.is_active {
        "Usuario registrado"
    } else {
        "Usuario registrado; pendiente de activación por un administrador"
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": message,
            "user": user,
        })),
    )
        .into_response())
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    JsonOrForm(req): JsonOrForm<LoginRequest>,
) -> ApiResult<Response> {
    let username = requerido(req.username, "username")?;
    let password = req.password.unwrap_or_default();

    let user = users::get_user_by_username(&state.db, &username)
        .await?
        .filter(|u| u.verify_password(&password))
        .ok_or_else(|| ApiError::Unauthorized("Usuario o contraseña incorrectos".to_string()))?;

    if !user.is_active {
        return Err(ApiError::Forbidden("La cuenta no ha sido activada".to_string()));
    }

    let token = state.sessions.create(&user).await;
    info!(username = %user.username, "User logged in");

    Ok((
        [(header::SET_COOKIE, session_cookie(&token, state.sessions.ttl_seconds()))],
        Json(json!({
            "success": true,
            "username": user.username,
            "is_admin": user.is_admin,
        })),
    )
        .into_response())
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = token_from_headers(&headers) {
        state.sessions.remove(&token).await;
    }
    (
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(json!({"success": true})),
    )
        .into_response()
}

/// POST /admin/usuarios/:id/activar
pub async fn activate(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    if !user.is_admin {
        return Err(ApiError::Forbidden("Se requiere un administrador".to_string()));
    }

    users::activate_user(&state.db, id).await?;
    info!(admin = %user.username, user_id = id, "User activated");

    Ok(Json(json!({"success": true, "id": id})))
}
