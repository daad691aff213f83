//! HTML pages
//!
//! Small server-rendered pages: login, home and the public guide view that
//! the QR code points to. Everything interpolated is escaped.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use tiquetes_common::db::busqueda::{self, BusquedaFilter};
use tiquetes_common::guia::{get_datos_guia, EstadoGuia, Etapa};
use tiquetes_common::time::db_timestamp_to_bogota;

use crate::error::ApiResult;
use crate::session::CurrentUser;
use crate::AppState;

const RECENT_GUIDES: usize = 20;

const STYLE: &str = "body{font-family:sans-serif;margin:2rem;color:#222}\
table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:.3rem .6rem}\
.barra{background:#eee;width:100%;max-width:480px;height:1.2rem}\
.avance{background:#2e7d32;height:100%}";

/// Escape text for HTML element and attribute content
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = escape_html(title),
    ))
}

/// GET /login
pub async fn login_page() -> Html<String> {
    page(
        "Ingreso",
        r#"<h1>Ingreso</h1>
<form id="login">
  <label>Usuario <input name="username" required></label><br>
  <label>Contraseña <input name="password" type="password" required></label><br>
  <button type="submit">Ingresar</button>
</form>
<p id="error"></p>
<script>
document.getElementById('login').addEventListener('submit', async (ev) => {
  ev.preventDefault();
  const body = new URLSearchParams(new FormData(ev.target));
  const res = await fetch('/auth/login', {method: 'POST', body});
  if (res.ok) { window.location = '/'; return; }
  const data = await res.json().catch(() => ({}));
  document.getElementById('error').textContent = data.error ? data.error.message : 'Error';
});
</script>"#,
    )
}

/// GET /
pub async fn home(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Html<String>> {
    let guias = busqueda::buscar_guias(&state.db, &BusquedaFilter::default()).await?;

    let mut filas = String::new();
    for g in guias.iter().take(RECENT_GUIDES) {
        let fecha = g
            .timestamp_registro_utc
            .as_deref()
            .and_then(db_timestamp_to_bogota)
            .map(|(f, h)| format!("{} {}", f, h))
            .unwrap_or_default();
        filas.push_str(&format!(
            "<tr><td><a href=\"/guias/{codigo}\">{codigo}</a></td><td>{proveedor}</td><td>{placa}</td><td>{fecha}</td><td>{estado}</td></tr>\n",
            codigo = escape_html(&g.codigo_guia),
            proveedor = escape_html(g.nombre_proveedor.as_deref().unwrap_or("")),
            placa = escape_html(g.placa.as_deref().unwrap_or("")),
            fecha = escape_html(&fecha),
            estado = if g.tiene_salida { "Completado" } else { "Activo" },
        ));
    }

    let body = format!(
        r#"<h1>Recepción de fruta</h1>
<p>Usuario: {usuario}</p>
<ul>
  <li>Entrada: <code>POST /entrada/procesar</code>, <code>/entrada/registrar-manual</code></li>
  <li>Pesaje bruto: <code>POST /pesaje/registrar-directo</code>, <code>/pesaje/registrar-virtual</code></li>
  <li>Clasificación: <code>POST /clasificacion/registrar</code></li>
  <li>Pesaje neto: <code>POST /pesaje-neto/registrar</code></li>
  <li>Salida: <code>POST /salida/registrar</code></li>
</ul>
<h2>Guías recientes</h2>
<table>
<tr><th>Guía</th><th>Proveedor</th><th>Placa</th><th>Registro</th><th>Estado</th></tr>
{filas}</table>"#,
        usuario = escape_html(&user.username),
        filas = filas,
    );

    Ok(page("Recepción de fruta", &body))
}

fn peso(value: Option<f64>) -> String {
    value.map(|p| format!("{:.2} kg", p)).unwrap_or_else(|| "-".to_string())
}

/// GET /guias/:codigo
///
/// Public: this is the page behind the guide's QR link.
pub async fn guia_page(
    State(state): State<AppState>,
    Path(codigo_guia): Path<String>,
) -> ApiResult<Response> {
    let Some(datos) = get_datos_guia(&state.db, &codigo_guia).await? else {
        let body = format!("<h1>Guía no encontrada</h1><p>{}</p>", escape_html(&codigo_guia));
        return Ok((StatusCode::NOT_FOUND, page("Guía no encontrada", &body)).into_response());
    };
    let estado = EstadoGuia::from_datos(Some(&datos));

    let pasos: String = Etapa::TODAS
        .iter()
        .map(|e| {
            format!(
                "<li>{} {}</li>",
                if estado.completado(*e) { "&#10003;" } else { "&#9711;" },
                e.as_str()
            )
        })
        .collect();

    let filas = [
        ("Proveedor", format!("{} ({})", datos.nombre_proveedor, datos.codigo_proveedor)),
        ("Placa", datos.placa.clone()),
        ("Racimos", datos.cantidad_racimos.clone()),
        ("Transportador", datos.transportador.clone()),
        ("Guía SAP", datos.codigo_guia_transporte_sap.clone()),
        ("Registro", format!("{} {}", datos.fecha_registro, datos.hora_registro)),
        ("Peso bruto", peso(datos.peso_bruto)),
        ("Tipo de pesaje", datos.tipo_pesaje.clone()),
        ("Peso tara", peso(datos.peso_tara)),
        ("Peso neto", peso(datos.peso_neto)),
        ("Salida", format!("{} {}", datos.fecha_salida, datos.hora_salida)),
    ]
    .iter()
    .map(|(k, v)| format!("<tr><th>{}</th><td>{}</td></tr>\n", k, escape_html(v)))
    .collect::<String>();

    let body = format!(
        r#"<h1>Guía {codigo}</h1>
<p>{descripcion} ({avance}%)</p>
<div class="barra"><div class="avance" style="width:{avance}%"></div></div>
<ul>{pasos}</ul>
<table>
{filas}</table>
<p><img src="/guias/{codigo}/qr" alt="QR" width="160" height="160"></p>
<p><a href="/guias/{codigo}/pdf">Descargar PDF</a></p>"#,
        codigo = escape_html(&datos.codigo_guia),
        descripcion = escape_html(estado.descripcion),
        avance = estado.porcentaje_avance,
        pasos = pasos,
        filas = filas,
    );

    Ok(page(&format!("Guía {}", datos.codigo_guia), &body).into_response())
}
