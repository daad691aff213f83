//! Ticket webhook reply parsing
//!
//! The PROCESS webhook answers with markdown: a `| Campo | Original |
//! Sugerido |` table, optional free text, and an optional validation note
//! after `**Nota de Validación:**`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::services::webhook_client::strip_json_fence;

const NOTA_MARKER: &str = "**Nota de Validación:**";

/// One table row of the ticket reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampoTiquete {
    pub campo: String,
    pub original: String,
    pub sugerido: String,
}

impl CampoTiquete {
    /// Suggested value when present, otherwise the original
    pub fn valor(&self) -> &str {
        if self.sugerido.trim().is_empty() {
            self.original.trim()
        } else {
            self.sugerido.trim()
        }
    }
}

/// Parsed ticket reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TiqueteParseado {
    pub table_data: Vec<CampoTiquete>,
    pub nota: String,
    pub descripcion: String,
}

/// Outcome of a ticket parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultadoTiquete {
    Ok,
    /// Text came back but no field table; likely not a ticket photo
    Warning,
    Error,
}

impl TiqueteParseado {
    pub fn resultado(&self) -> ResultadoTiquete {
        if !self.table_data.is_empty() {
            ResultadoTiquete::Ok
        } else if !self.descripcion.is_empty() {
            ResultadoTiquete::Warning
        } else {
            ResultadoTiquete::Error
        }
    }

    /// Row whose `campo` matches `nombre` (case-insensitive)
    pub fn campo(&self, nombre: &str) -> Option<&CampoTiquete> {
        self.table_data
            .iter()
            .find(|c| c.campo.trim().eq_ignore_ascii_case(nombre))
    }
}

pub fn parse_markdown_response(text: &str) -> TiqueteParseado {
    let (tabla, nota) = match text.split_once(NOTA_MARKER) {
        Some((tabla, nota)) => (tabla, nota.trim()),
        None => (text, ""),
    };

    let mut parsed = TiqueteParseado {
        nota: nota.to_string(),
        ..Default::default()
    };
    let mut descripcion = Vec::new();
    let mut header_found = false;

    for line in tabla.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("---") {
            continue;
        }
        if !line.contains('|') {
            descripcion.push(line);
            continue;
        }

        let columns: Vec<&str> = line
            .split('|')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        if !header_found {
            if columns.first().is_some_and(|c| c.contains("Campo")) {
                header_found = true;
            }
            continue;
        }

        if columns.len() >= 3 {
            parsed.table_data.push(CampoTiquete {
                campo: columns[0].to_string(),
                original: columns[1].to_string(),
                sugerido: columns[2].to_string(),
            });
        }
    }

    parsed.descripcion = descripcion.join("\n");
    parsed
}

/// Corrected field sent for revalidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampoValor {
    pub campo: String,
    #[serde(default)]
    pub valor: String,
}

impl From<&CampoTiquete> for CampoValor {
    fn from(c: &CampoTiquete) -> Self {
        Self {
            campo: c.campo.trim().to_string(),
            valor: c.valor().to_string(),
        }
    }
}

/// Value of the `Código` row
pub fn codigo_de(campos: &[CampoValor]) -> Option<&str> {
    campos
        .iter()
        .find(|c| matches!(c.campo.trim().to_lowercase().as_str(), "código" | "codigo"))
        .map(|c| c.valor.trim())
        .filter(|v| !v.is_empty())
}

/// Record key for a ticket field name
pub fn clave_local(campo: &str) -> String {
    match campo.trim() {
        "Nombre del Agricultor" => "nombre_agricultor".to_string(),
        "Código" | "Codigo" => "codigo".to_string(),
        "Cantidad de Racimos" => "racimos".to_string(),
        "Placa" => "placa".to_string(),
        "Se Acarreó" | "Se Acarreo" => "acarreo".to_string(),
        "Se Cargó" | "Se Cargo" => "cargo".to_string(),
        "Transportador" => "transportador".to_string(),
        "Fecha" => "fecha_tiquete".to_string(),
        other => other.to_lowercase().replace(' ', "_"),
    }
}

/// Validated record built without the revalidation service
pub fn formatear_local(campos: &[CampoValor]) -> Map<String, Value> {
    campos
        .iter()
        .map(|c| (clave_local(&c.campo), Value::String(c.valor.trim().to_string())))
        .collect()
}

/// Validated record from a revalidation reply, if the reply is usable
///
/// Accepts a fenced JSON body, an array (first element) and `{data: {...}}`.
pub fn parse_revalidation_reply(body: &str) -> Option<Map<String, Value>> {
    let value: Value = serde_json::from_str(strip_json_fence(body)).ok()?;
    let value = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    let mut record = match value {
        Value::Object(map) => map,
        _ => return None,
    };
    if let Some(Value::Object(data)) = record.remove("data") {
        record = data;
    }
    (!record.is_empty()).then_some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPUESTA: &str = "\
| Campo | Original | Sugerido |
|-------|----------|----------|
| Nombre del Agricultor | Finca La Esperanza | Finca La Esperanza |
| Código | 0150076A | 0150076A |
| Cantidad de Racimos | 120 | 120 |
| Placa | ABC123 | ABC-123 |

**Nota de Validación:** La placa fue corregida.
";

    #[test]
    fn test_parses_table_and_note() {
        let parsed = parse_markdown_response(RESPUESTA);
        assert_eq!(parsed.table_data.len(), 4);
        assert_eq!(parsed.table_data[1].campo, "Código");
        assert_eq!(parsed.table_data[3].sugerido, "ABC-123");
        assert_eq!(parsed.nota, "La placa fue corregida.");
        assert_eq!(parsed.resultado(), ResultadoTiquete::Ok);
        assert_eq!(parsed.campo("placa").map(|c| c.valor()), Some("ABC-123"));
    }

    #[test]
    fn test_rows_before_header_are_ignored() {
        let text = "| x | y | z |\n| Campo | Original | Sugerido |\n| Placa | A | B |";
        let parsed = parse_markdown_response(text);
        assert_eq!(parsed.table_data.len(), 1);
        assert_eq!(parsed.table_data[0].campo, "Placa");
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let text = "| Campo | Original | Sugerido |\n| Placa | ABC |";
        assert!(parse_markdown_response(text).table_data.is_empty());
    }

    #[test]
    fn test_description_only_is_warning() {
        let parsed = parse_markdown_response("La imagen no corresponde a un tiquete.");
        assert!(parsed.table_data.is_empty());
        assert_eq!(parsed.descripcion, "La imagen no corresponde a un tiquete.");
        assert_eq!(parsed.resultado(), ResultadoTiquete::Warning);
    }

    #[test]
    fn test_empty_is_error() {
        assert_eq!(parse_markdown_response("  \n").resultado(), ResultadoTiquete::Error);
    }

    #[test]
    fn test_valor_falls_back_to_original() {
        let campo = CampoTiquete {
            campo: "Código".into(),
            original: "0150076A".into(),
            sugerido: " ".into(),
        };
        assert_eq!(campo.valor(), "0150076A");
    }

    #[test]
    fn test_local_formatting_keys() {
        let campos = vec![
            CampoValor { campo: "Nombre del Agricultor".into(), valor: "Finca".into() },
            CampoValor { campo: "Código".into(), valor: " 0150076A ".into() },
            CampoValor { campo: "Se Acarreó".into(), valor: "Si".into() },
            CampoValor { campo: "Fecha".into(), valor: "05/01/2024".into() },
            CampoValor { campo: "Número de Tiquete".into(), valor: "77".into() },
        ];
        let record = formatear_local(&campos);
        assert_eq!(record["nombre_agricultor"], "Finca");
        assert_eq!(record["codigo"], "0150076A");
        assert_eq!(record["acarreo"], "Si");
        assert_eq!(record["fecha_tiquete"], "05/01/2024");
        assert_eq!(record["número_de_tiquete"], "77");
        assert_eq!(codigo_de(&campos), Some("0150076A"));
    }

    #[test]
    fn test_revalidation_reply_shapes() {
        let fenced = "```json\n[{\"data\": {\"codigo\": \"0150076A\", \"placa\": \"ABC123\"}}]\n```";
        let record = parse_revalidation_reply(fenced).unwrap();
        assert_eq!(record["codigo"], "0150076A");
        assert_eq!(record["placa"], "ABC123");

        assert!(parse_revalidation_reply("Accepted").is_none());
        assert!(parse_revalidation_reply("{}").is_none());
        assert!(parse_revalidation_reply("[]").is_none());
    }
}
