//! Scale webhook reply parsing and decimal input handling

use regex::Regex;
use std::sync::OnceLock;

/// Patterns tried in order; the first match supplies the weight
const PESO_PATTERNS: [&str; 7] = [
    r#"(?i)El peso es:\s*"?(\d+(?:\.\d+)?)"?\s*(?:kg)?"#,
    r#"(?i)El peso tara es:\s*"?(\d+(?:\.\d+)?)"?\s*(?:kg|tm)?"#,
    r#"(?i)El peso bruto es:\s*"?(\d+(?:\.\d+)?)"?\s*(?:kg)?"#,
    r#"(?i)peso bruto es:\s*"?(\d+(?:\.\d+)?)"?\s*(?:kg)?"#,
    r#"(?i)peso es:\s*"?(\d+(?:\.\d+)?)"?\s*(?:kg)?"#,
    r#"(?i)Peso Bruto:\s*"?(\d+(?:\.\d+)?)"?\s*(?:kg)?"#,
    r#"(?i)Exitoso!\s*"?(\d+(?:\.\d+)?)"?\s*(?:kg)?"#,
];

fn peso_regexes() -> &'static [Regex] {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| PESO_PATTERNS.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

fn sap_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(r#"(?i)Guia de transporte SAP:\s*"?(\d+)"?"#).ok())
        .as_ref()
}

fn numero_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").ok()).as_ref()
}

/// Interpreted scale reply
#[derive(Debug, Clone, PartialEq)]
pub struct RespuestaBascula {
    pub exitoso: bool,
    /// Weight exactly as reported (digits, optional decimal point)
    pub peso: Option<String>,
    pub codigo_guia_transporte_sap: Option<String>,
}

/// Parse the PESAJE webhook reply
///
/// A reply without `Exitoso` is a failed reading. The SAP guide and the
/// weight are extracted independently; when no labelled weight is found the
/// first number in the text is used.
pub fn parse_respuesta_bascula(text: &str) -> RespuestaBascula {
    let exitoso = text.contains("Exitoso");

    let codigo_guia_transporte_sap = sap_regex()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let mut peso = peso_regexes()
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    if peso.is_none() && exitoso {
        peso = numero_regex()
            .and_then(|re| re.captures(text))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
    }

    RespuestaBascula {
        exitoso,
        peso,
        codigo_guia_transporte_sap,
    }
}

/// Parse a user-entered decimal; a comma is accepted as decimal separator
pub fn parse_decimal(value: &str) -> Option<f64> {
    let normalized = value.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_weight_and_sap_guide() {
        let r = parse_respuesta_bascula(
            "Exitoso! Guia de transporte SAP: \"123456\" El peso es: \"15230\" kg",
        );
        assert!(r.exitoso);
        assert_eq!(r.peso.as_deref(), Some("15230"));
        assert_eq!(r.codigo_guia_transporte_sap.as_deref(), Some("123456"));
    }

    #[test]
    fn test_pattern_order_prefers_el_peso_es() {
        let r = parse_respuesta_bascula("Exitoso! Peso Bruto: 900 kg. El peso es: 1000.5");
        assert_eq!(r.peso.as_deref(), Some("1000.5"));
    }

    #[test]
    fn test_case_insensitive_sap_guide() {
        let r = parse_respuesta_bascula("Exitoso! GUIA DE TRANSPORTE SAP: 777 peso bruto es: 12");
        assert_eq!(r.codigo_guia_transporte_sap.as_deref(), Some("777"));
        assert_eq!(r.peso.as_deref(), Some("12"));
    }

    #[test]
    fn test_tare_reply() {
        let r = parse_respuesta_bascula("Exitoso! El peso tara es: 5120 tm");
        assert_eq!(r.peso.as_deref(), Some("5120"));
    }

    #[test]
    fn test_fallback_to_first_number_when_successful() {
        let r = parse_respuesta_bascula("Exitoso, lectura 4521 registrada");
        assert_eq!(r.peso.as_deref(), Some("4521"));
    }

    #[test]
    fn test_failure_without_exitoso() {
        let r = parse_respuesta_bascula("No se pudo leer la báscula 12");
        assert!(!r.exitoso);
        assert_eq!(r.peso, None);
    }

    #[test]
    fn test_parse_decimal_accepts_comma() {
        assert_eq!(parse_decimal("1234,5"), Some(1234.5));
        assert_eq!(parse_decimal(" 80 "), Some(80.0));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("NaN"), None);
    }
}
