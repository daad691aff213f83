//! Login sessions
//!
//! Sessions are server-side, keyed by a random token carried in the
//! `tiquetes_session` cookie. Besides the logged-in user, a session holds
//! the entry draft built up by the multi-step intake flow.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ApiError;
use crate::services::ticket_parser::TiqueteParseado;
use crate::AppState;
use tiquetes_common::db::models::User;

pub const SESSION_COOKIE: &str = "tiquetes_session";

/// Entry intake state between `procesar`, `revalidar` and `registrar`
#[derive(Debug, Clone, Default)]
pub struct EntradaBorrador {
    pub image_filename: Option<String>,
    pub plate_filename: Option<String>,
    pub parsed_data: Option<TiqueteParseado>,
    pub plate_text: Option<String>,
    pub datos_validados: Option<Map<String, Value>>,
}

#[derive(Debug, Clone)]
struct SessionData {
    user: CurrentUser,
    expira: DateTime<Utc>,
    entrada: EntradaBorrador,
}

/// Authenticated user of the current request
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub token: String,
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionData>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Start a session for `user`; returns the cookie token
    pub async fn create(&self, user: &User) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.expira > now);
        sessions.insert(
            token.clone(),
            SessionData {
                user: CurrentUser {
                    token: token.clone(),
                    user_id: user.id,
                    username: user.username.clone(),
                    is_admin: user.is_admin,
                },
                expira: now + self.ttl,
                entrada: EntradaBorrador::default(),
            },
        );
        token
    }

    /// User of a live session; an expired session is dropped
    pub async fn user(&self, token: &str) -> Option<CurrentUser> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(s) if s.expira > now => return Some(s.user.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        debug!("Session expired");
        self.sessions.write().await.remove(token);
        None
    }

    pub async fn remove(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    pub async fn entrada(&self, token: &str) -> EntradaBorrador {
        self.sessions
            .read()
            .await
            .get(token)
            .map(|s| s.entrada.clone())
            .unwrap_or_default()
    }

    /// Modify the entry draft in place
    pub async fn update_entrada<F>(&self, token: &str, f: F)
    where
        F: FnOnce(&mut EntradaBorrador),
    {
        if let Some(session) = self.sessions.write().await.get_mut(token) {
            f(&mut session.entrada);
        }
    }
}

/// Session token from the `Cookie` header
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

pub fn session_cookie(token: &str, max_age_seconds: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_seconds
    )
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

fn wants_html(request: &Request) -> bool {
    request.method() == Method::GET
        && request
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"))
}

/// Reject requests without a live session
///
/// Browser page loads are redirected to `/login`; everything else gets 401.
pub async fn require_login(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let user = match token_from_headers(request.headers()) {
        Some(token) => state.sessions.user(&token).await,
        None => None,
    };

    match user {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None if wants_html(&request) => Redirect::to("/login").into_response(),
        None => ApiError::Unauthorized("Login required".to_string()).into_response(),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Login required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn user() -> User {
        User {
            id: 1,
            username: "bascula".to_string(),
            email: "bascula@planta.co".to_string(),
            password_hash: String::new(),
            password_salt: String::new(),
            is_active: true,
            is_admin: false,
            created_at: "2024-01-05 18:00:00".to_string(),
        }
    }

    #[test]
    fn test_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; tiquetes_session=abc123; other=1"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc123"));

        let empty = HeaderMap::new();
        assert_eq!(token_from_headers(&empty), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = session_cookie("tok", 60);
        assert!(cookie.starts_with("tiquetes_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(clear_session_cookie().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_draft() {
        let store = SessionStore::new(3600);
        let token = store.create(&user()).await;

        let current = store.user(&token).await.unwrap();
        assert_eq!(current.username, "bascula");

        store
            .update_entrada(&token, |e| e.plate_text = Some("ABC123".into()))
            .await;
        assert_eq!(store.entrada(&token).await.plate_text.as_deref(), Some("ABC123"));

        store.remove(&token).await;
        assert!(store.user(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let store = SessionStore::new(0);
        let token = store.create(&user()).await;
        assert!(store.user(&token).await.is_none());
    }
}
