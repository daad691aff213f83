//! Multipart form reading and upload storage

use axum::extract::Multipart;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::services::webhook_client::ArchivoAdjunto;

/// Accepted image extensions
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// One uploaded file
#[derive(Debug, Clone)]
pub struct ArchivoSubido {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ArchivoSubido {
    pub fn extension(&self) -> Option<String> {
        extension(&self.filename)
    }

    pub fn is_image(&self) -> bool {
        is_image(&self.filename)
    }

    /// Attach to a webhook call under field `campo`
    pub fn adjunto(&self, campo: &'static str) -> ArchivoAdjunto {
        ArchivoAdjunto {
            campo,
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            bytes: self.bytes.clone(),
        }
    }
}

/// Text fields and files of a multipart request
#[derive(Debug, Default)]
pub struct Formulario {
    fields: HashMap<String, String>,
    files: HashMap<String, ArchivoSubido>,
}

impl Formulario {
    /// Drain a multipart body. File parts without a name or content are skipped.
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                    if filename.is_empty() || bytes.is_empty() {
                        continue;
                    }
                    debug!(field = %name, filename = %filename, size = bytes.len(), "Received upload");
                    form.files.insert(
                        name,
                        ArchivoSubido {
                            filename,
                            content_type,
                            bytes: bytes.to_vec(),
                        },
                    );
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// Trimmed, non-empty text field
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn require_text(&self, name: &str) -> ApiResult<String> {
        self.text(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Falta el campo '{}'", name)))
    }

    pub fn take_file(&mut self, name: &str) -> Option<ArchivoSubido> {
        self.files.remove(name)
    }

    /// Required file that must be an image
    pub fn take_image(&mut self, name: &str) -> ApiResult<ArchivoSubido> {
        let file = self
            .take_file(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Falta el archivo '{}'", name)))?;
        require_image(&file)?;
        Ok(file)
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

pub fn require_image(file: &ArchivoSubido) -> ApiResult<()> {
    if !file.is_image() {
        return Err(ApiError::BadRequest(format!(
            "Tipo de archivo no permitido: {}",
            file.filename
        )));
    }
    Ok(())
}

/// Lowercase extension without the dot
pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

pub fn is_image(filename: &str) -> bool {
    extension(filename).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Keep only characters safe in a file name
pub fn safe_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archivo");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "archivo".to_string()
    } else {
        cleaned
    }
}

/// Write `file` into `dir` as `{prefix}_{timestamp}_{name}`; returns the full path
pub async fn save_upload(dir: &Path, prefix: &str, file: &ArchivoSubido) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    let path = dir.join(format!("{}_{}_{}", prefix, stamp, safe_filename(&file.filename)));
    tokio::fs::write(&path, &file.bytes).await?;
    debug!(path = %path.display(), "Saved upload");
    Ok(path)
}

/// Read back a file saved by [`save_upload`]
pub async fn load_upload(dir: &Path, stored: &str) -> std::io::Result<ArchivoSubido> {
    let filename = safe_filename(stored);
    let bytes = tokio::fs::read(dir.join(&filename)).await?;
    let content_type = match extension(&filename).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(ArchivoSubido {
        filename,
        content_type: content_type.to_string(),
        bytes,
    })
}

/// File name component of a saved path, as stored in the database
pub fn stored_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
