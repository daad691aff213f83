//! Single-page PDF summary of a guide
//!
//! Built directly as PDF objects with the standard Helvetica fonts, so no
//! font files are needed. Text is written in WinAnsi encoding; characters
//! outside it print as `?`.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use thiserror::Error;

use crate::services::qr::MatrizQr;
use tiquetes_common::guia::{DatosGuia, EstadoGuia};

/// A4 in points
const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const QR_SIZE: f32 = 120.0;
const LINE_HEIGHT: f32 = 16.0;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("QR generation failed: {0}")]
    Qr(#[from] qrcode::types::QrError),

    #[error("PDF generation failed: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// One labelled section of the document
struct Seccion {
    titulo: &'static str,
    filas: Vec<(&'static str, String)>,
}

fn peso(value: Option<f64>) -> String {
    value
        .map(|p| format!("{:.2} kg", p))
        .unwrap_or_else(|| "Pendiente".to_string())
}

fn secciones(datos: &DatosGuia, estado: &EstadoGuia) -> Vec<Seccion> {
    let mut out = vec![
        Seccion {
            titulo: "Entrada",
            filas: vec![
                ("Proveedor", format!("{} ({})", datos.nombre_proveedor, datos.codigo_proveedor)),
                ("Placa", datos.placa.clone()),
                ("Transportador", datos.transportador.clone()),
                ("Racimos", datos.cantidad_racimos.clone()),
                ("Acarreo / Cargo", format!("{} / {}", datos.acarreo, datos.cargo)),
                ("Registro", format!("{} {}", datos.fecha_registro, datos.hora_registro)),
            ],
        },
        Seccion {
            titulo: "Pesaje",
            filas: vec![
                ("Peso bruto", peso(datos.peso_bruto)),
                ("Tipo de pesaje", datos.tipo_pesaje.clone()),
                ("Guía SAP", datos.codigo_guia_transporte_sap.clone()),
                ("Fecha", format!("{} {}", datos.fecha_pesaje, datos.hora_pesaje)),
            ],
        },
    ];

    if let Some(m) = &datos.clasificacion_manual {
        out.push(Seccion {
            titulo: "Clasificación",
            filas: vec![
                ("Verdes", format!("{}", m.verde)),
                ("Sobremaduros", format!("{}", m.sobremaduro)),
                ("Daño en corona", format!("{}", m.danio_corona)),
                ("Pedúnculo largo", format!("{}", m.pendunculo_largo)),
                ("Podridos", format!("{}", m.podrido)),
                (
                    "Racimos detectados",
                    datos
                        .total_racimos_detectados
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "Sin clasificación automática".to_string()),
                ),
            ],
        });
    }

    out.push(Seccion {
        titulo: "Pesaje neto y salida",
        filas: vec![
            ("Peso tara", peso(datos.peso_tara)),
            ("Peso neto", peso(datos.peso_neto)),
            ("Peso producto", peso(datos.peso_producto)),
            ("Salida", format!("{} {}", datos.fecha_salida, datos.hora_salida)),
            ("Estado", format!("{} ({}%)", estado.descripcion, estado.porcentaje_avance)),
        ],
    });
    out
}

fn win_ansi(texto: &str) -> Object {
    let bytes = texto
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

fn texto(ops: &mut Vec<Operation>, fuente: &str, size: f32, x: f32, y: f32, contenido: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![Object::Name(fuente.as_bytes().to_vec()), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![win_ansi(contenido)]));
    ops.push(Operation::new("ET", vec![]));
}

/// Dark modules as filled squares with the top-left corner at (`x`, `y`)
fn dibujar_qr(ops: &mut Vec<Operation>, matriz: &MatrizQr, x: f32, y: f32, lado: f32) {
    let modulo = lado / matriz.ancho as f32;
    ops.push(Operation::new("rg", vec![0.0f32.into(), 0.0f32.into(), 0.0f32.into()]));
    for fila in 0..matriz.ancho {
        for columna in 0..matriz.ancho {
            if !matriz.oscuro(fila, columna) {
                continue;
            }
            let mx = x + columna as f32 * modulo;
            let my = y - (fila + 1) as f32 * modulo;
            ops.push(Operation::new(
                "re",
                vec![mx.into(), my.into(), modulo.into(), modulo.into()],
            ));
        }
    }
    ops.push(Operation::new("f", vec![]));
}

/// Render the guide summary with a QR code of `url_guia`
///
/// `generado` is the Bogotá date and time printed in the footer.
pub fn render_guia_pdf(
    datos: &DatosGuia,
    estado: &EstadoGuia,
    url_guia: &str,
    generado: &str,
) -> Result<Vec<u8>, PdfError> {
    let matriz = MatrizQr::new(url_guia)?;
    let mut ops = Vec::new();

    let top = PAGE_HEIGHT - MARGIN;
    texto(&mut ops, "F2", 18.0, MARGIN, top - 18.0, "Guía de recepción de fruta");
    texto(&mut ops, "F2", 12.0, MARGIN, top - 42.0, &datos.codigo_guia);
    texto(&mut ops, "F1", 9.0, MARGIN, top - 60.0, url_guia);
    dibujar_qr(&mut ops, &matriz, PAGE_WIDTH - MARGIN - QR_SIZE, top, QR_SIZE);

    let mut y = top - QR_SIZE - 30.0;
    for seccion in secciones(datos, estado) {
        texto(&mut ops, "F2", 12.0, MARGIN, y, seccion.titulo);
        y -= LINE_HEIGHT + 2.0;
        for (etiqueta, valor) in &seccion.filas {
            texto(&mut ops, "F1", 10.0, MARGIN + 10.0, y, etiqueta);
            texto(&mut ops, "F1", 10.0, MARGIN + 160.0, y, valor);
            y -= LINE_HEIGHT;
        }
        y -= 8.0;
    }
    texto(&mut ops, "F1", 8.0, MARGIN, MARGIN, &format!("Generado: {}", generado));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let content = Content { operations: ops };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(lopdf::Error::from)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_ansi_keeps_spanish_letters() {
        match win_ansi("Guía Ñ → x") {
            Object::String(bytes, _) => assert_eq!(bytes, b"Gu\xeda \xd1 ? x".to_vec()),
            other => panic!("unexpected object {:?}", other),
        }
    }

    #[test]
    fn test_render_contains_guide_and_sections() {
        let datos = DatosGuia {
            codigo_guia: "0150076A_20240105_7600".to_string(),
            codigo_proveedor: "0150076A".to_string(),
            nombre_proveedor: "Finca La Esperanza".to_string(),
            peso_bruto: Some(15230.0),
            clasificacion_manual: Some(Default::default()),
            ..Default::default()
        };
        let estado = EstadoGuia::from_datos(Some(&datos));
        let bytes = render_guia_pdf(
            &datos,
            &estado,
            "http://localhost:5002/guias/0150076A_20240105_7600",
            "05/01/2024 10:00:00",
        )
        .unwrap();

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("%PDF-1.5"));
        assert!(text.contains("(0150076A_20240105_7600)"));
        assert!(text.contains("15230.00 kg"));
        assert!(text.contains("Helvetica-Bold"));
        // Classification section only when a manual classification exists
        assert!(text.contains("Sobremaduros"));
        assert!(text.trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn test_weight_formatting() {
        assert_eq!(peso(Some(1020.5)), "1020.50 kg");
        assert_eq!(peso(None), "Pendiente");
    }
}
