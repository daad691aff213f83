//! Manual-weighing authorization codes
//!
//! A code is sent to the approver through the AUTORIZACION webhook only;
//! the operator who requested it must obtain it from the approver. Codes are
//! bound to one guide and valid until they expire.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

const CODE_LEN: usize = 8;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodigoError {
    #[error("Código de autorización inválido")]
    Desconocido,

    #[error("El código no corresponde a esta guía")]
    OtraGuia,

    #[error("El código de autorización ha expirado")]
    Expirado,
}

#[derive(Debug, Clone)]
struct CodigoEmitido {
    codigo_guia: String,
    peso_manual: Option<String>,
    expira: DateTime<Utc>,
}

/// Random `[A-Z0-9]{8}` code
pub fn generar_codigo() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

#[derive(Clone, Default)]
pub struct AuthCodeStore {
    codes: Arc<RwLock<HashMap<String, CodigoEmitido>>>,
}

impl AuthCodeStore {
    /// Issue a new code for `codigo_guia`
    pub async fn emitir(
        &self,
        codigo_guia: &str,
        peso_manual: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> String {
        let mut codes = self.codes.write().await;
        codes.retain(|_, c| c.expira > now);

        let mut codigo = generar_codigo();
        while codes.contains_key(&codigo) {
            codigo = generar_codigo();
        }

        codes.insert(
            codigo.clone(),
            CodigoEmitido {
                codigo_guia: codigo_guia.to_string(),
                peso_manual,
                expira: now + ttl,
            },
        );
        codigo
    }

    /// Forget a code, e.g. when it could not be delivered
    pub async fn descartar(&self, codigo: &str) {
        self.codes.write().await.remove(codigo);
    }

    /// Check a code; returns the manual weight recorded with the request
    ///
    /// The guide is checked before expiry. An expired code is removed; a
    /// valid code stays usable until expiry.
    pub async fn validar(
        &self,
        codigo_guia: &str,
        codigo: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CodigoError> {
        let codigo = codigo.trim().to_uppercase();
        let mut codes = self.codes.write().await;

        let emitido = codes.get(&codigo).ok_or(CodigoError::Desconocido)?;
        if emitido.codigo_guia != codigo_guia {
            return Err(CodigoError::OtraGuia);
        }
        if emitido.expira <= now {
            codes.remove(&codigo);
            return Err(CodigoError::Expirado);
        }
        Ok(emitido.peso_manual.clone())
    }
}
