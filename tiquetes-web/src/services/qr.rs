//! QR codes for guide links

use qrcode::render::svg;
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};

/// Smallest rendered side of the SVG, in pixels
const SVG_MIN_SIZE: u32 = 240;

fn codificar(data: &str) -> Result<QrCode, QrError> {
    QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
}

/// SVG document encoding `data`
pub fn qr_svg(data: &str) -> Result<String, QrError> {
    let code = codificar(data)?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(SVG_MIN_SIZE, SVG_MIN_SIZE)
        .quiet_zone(true)
        .build())
}

/// Module grid of a QR code, row by row from the top, without quiet zone
#[derive(Debug, Clone)]
pub struct MatrizQr {
    pub ancho: usize,
    oscuros: Vec<bool>,
}

impl MatrizQr {
    pub fn new(data: &str) -> Result<Self, QrError> {
        let code = codificar(data)?;
        Ok(Self {
            ancho: code.width(),
            oscuros: code
                .to_colors()
                .into_iter()
                .map(|c| c == Color::Dark)
                .collect(),
        })
    }

    pub fn oscuro(&self, fila: usize, columna: usize) -> bool {
        fila < self.ancho && columna < self.ancho && self.oscuros[fila * self.ancho + columna]
    }
}
