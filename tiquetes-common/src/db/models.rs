//! Database models

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EntryRecord {
    pub id: i64,
    pub codigo_guia: String,
    pub nombre_proveedor: Option<String>,
    pub codigo_proveedor: Option<String>,
    pub cantidad_racimos: Option<String>,
    pub placa: Option<String>,
    pub transportador: Option<String>,
    pub acarreo: Option<String>,
    pub cargo: Option<String>,
    pub codigo_guia_transporte_sap: Option<String>,
    pub observaciones: Option<String>,
    pub image_filename: Option<String>,
    pub plate_filename: Option<String>,
    pub plate_text: Option<String>,
    pub fecha_tiquete: Option<String>,
    pub nota: Option<String>,
    pub url_qr: Option<String>,
    pub estado: String,
    pub timestamp_registro_utc: Option<String>,
}

/// Fields supplied when registering an entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEntry {
    pub codigo_guia: String,
    pub nombre_proveedor: String,
    pub codigo_proveedor: String,
    pub cantidad_racimos: String,
    pub placa: String,
    pub transportador: Option<String>,
    pub acarreo: Option<String>,
    pub cargo: Option<String>,
    pub codigo_guia_transporte_sap: Option<String>,
    pub observaciones: Option<String>,
    pub image_filename: Option<String>,
    pub plate_filename: Option<String>,
    pub plate_text: Option<String>,
    pub fecha_tiquete: Option<String>,
    pub nota: Option<String>,
    pub url_qr: Option<String>,
    pub timestamp_registro_utc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PesajeBruto {
    pub codigo_guia: String,
    pub codigo_proveedor: Option<String>,
    pub nombre_proveedor: Option<String>,
    pub peso_bruto: Option<f64>,
    pub tipo_pesaje: Option<String>,
    pub codigo_guia_transporte_sap: Option<String>,
    pub imagen_pesaje: Option<String>,
    pub timestamp_pesaje_utc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Clasificacion {
    pub codigo_guia: String,
    pub codigo_proveedor: Option<String>,
    pub nombre_proveedor: Option<String>,
    pub verde_manual: Option<f64>,
    pub sobremaduro_manual: Option<f64>,
    pub danio_corona_manual: Option<f64>,
    pub pendunculo_largo_manual: Option<f64>,
    pub podrido_manual: Option<f64>,
    pub clasificacion_manual_json: Option<String>,
    pub clasificacion_automatica_json: Option<String>,
    pub clasificacion_consolidada: Option<String>,
    pub total_racimos_detectados: Option<i64>,
    pub fotos_json: Option<String>,
    pub observaciones: Option<String>,
    pub estado: Option<String>,
    pub timestamp_clasificacion_utc: Option<String>,
}

/// Manually counted bunches per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConteoManual {
    pub verde: u32,
    pub sobremaduro: u32,
    pub danio_corona: u32,
    pub pendunculo_largo: u32,
    pub podrido: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PesajeNeto {
    pub codigo_guia: String,
    pub peso_tara: Option<f64>,
    pub peso_neto: Option<f64>,
    pub peso_producto: Option<f64>,
    pub tipo_pesaje_neto: Option<String>,
    pub comentarios: Option<String>,
    pub respuesta_sap: Option<String>,
    pub timestamp_pesaje_neto_utc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Salida {
    pub codigo_guia: String,
    pub comentarios_salida: Option<String>,
    pub estado: String,
    pub timestamp_salida_utc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistroGranel {
    pub id: i64,
    pub producto: String,
    pub fecha_autorizacion: Option<String>,
    pub placa: String,
    pub trailer: Option<String>,
    pub cedula_conductor: Option<String>,
    pub nombre_conductor: String,
    pub origen: Option<String>,
    pub destino: Option<String>,
    pub tipo_registro: String,
    pub observaciones: Option<String>,
    pub usuario_registro: Option<String>,
    pub timestamp_registro: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRegistroGranel {
    pub producto: String,
    pub fecha_autorizacion: Option<String>,
    pub placa: String,
    pub trailer: Option<String>,
    pub cedula_conductor: Option<String>,
    pub nombre_conductor: String,
    pub origen: Option<String>,
    pub destino: Option<String>,
    pub tipo_registro: Option<String>,
    pub observaciones: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PrimerPesajeGranel {
    pub id: i64,
    pub id_registro_granel: i64,
    pub peso_primer_kg: f64,
    pub codigo_sap_granel: Option<String>,
    pub usuario_pesaje: Option<String>,
    pub foto_soporte_path: Option<String>,
    pub timestamp_primer_pesaje: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PresupuestoDia {
    pub fecha_presupuesto: String,
    pub toneladas_proyectadas: f64,
    pub fecha_carga: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub password_salt: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: String,
}
