use std::fmt::Display;

use anyhow::{anyhow, Context};
use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    ingest,
    models::GENERAL_SECTOR,
    rag,
};

pub const NOT_INITIALIZED: &str = "Banco de dados não inicializado.";

// --- Payloads de la API ---

fn general_sector() -> String {
    GENERAL_SECTOR.to_string()
}

#[derive(Deserialize)]
pub struct SectorQuery {
    #[serde(default = "general_sector")]
    setor: String,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    setor: Option<String>,
}

#[derive(Deserialize)]
pub struct QueryData {
    prompt: String,
    #[serde(default = "general_sector")]
    setor: String,
}

// --- Router ---

/// Rutas de la API (sin ficheros estáticos).
pub fn create_router(app_state: AppState) -> Router {
    let upload_limit = app_state.config.max_upload_bytes;
    Router::new()
        .route("/arquivos", get(list_files_handler))
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/perguntar", post(ask_handler))
        .route("/recarregar", get(reload_handler))
        .route("/status", get(status_handler))
        .with_state(app_state)
}

/// Aplicación completa: API, front-end estático en `/`, CORS y trazas HTTP.
pub fn build_app(app_state: AppState) -> Router {
    let static_dir = app_state.config.static_dir.clone();
    Router::new()
        .merge(create_router(app_state))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Respuesta de error uniforme: `{"ok": false, "error": "..."}`.
fn failure(context: &str, err: impl Display) -> Json<Value> {
    let message = format!("{err:#}");
    error!("{context}: {message}");
    Json(json!({ "ok": false, "error": message }))
}

// --- Handlers ---

#[axum::debug_handler]
async fn list_files_handler(
    State(state): State<AppState>,
    Query(query): Query<SectorQuery>,
) -> Json<Value> {
    match ingest::list_pdfs(&state.config.docs_dir, &query.setor).await {
        Ok(files) => Json(json!({ "arquivos": files })),
        Err(e) => failure("Listado de ficheros", e),
    }
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> Json<Value> {
    let Some(raw_sector) = query.setor else {
        return failure("Upload", "Falta o parâmetro 'setor'.");
    };
    let sector = match ingest::validate_sector(&raw_sector) {
        Ok(sector) => sector,
        Err(e) => return failure("Upload", e),
    };

    let filename = match save_upload(&state, &sector, multipart).await {
        Ok(name) => name,
        Err(e) => return failure("Upload", e),
    };

    match state.rebuild().await {
        Ok(_) => Json(json!({
            "ok": true,
            "message": format!("Arquivo {filename} salvo em {sector}!"),
        })),
        Err(e) => failure("Reconstrucción tras upload", e),
    }
}

/// Guarda el primer campo con nombre de fichero en `docs/<sector>/`.
async fn save_upload(state: &AppState, sector: &str, mut multipart: Multipart) -> anyhow::Result<String> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| anyhow!("Erro lendo o formulário: {e}"))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let filename = sanitize_filename(&raw_name)
            .ok_or_else(|| anyhow!("Nome de arquivo inválido: '{raw_name}'"))?;

        let is_pdf = mime_guess::from_path(&filename)
            .first()
            .map(|m| m.essence_str() == "application/pdf")
            .unwrap_or(false);
        if !is_pdf {
            return Err(anyhow!("Apenas arquivos PDF são aceitos: '{filename}'"));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| anyhow!("Erro lendo o arquivo: {e}"))?;

        let dir = state.config.docs_dir.join(sector);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("No se pudo crear {}", dir.display()))?;
        let path = dir.join(&filename);
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("Error escribiendo {}", path.display()))?;

        info!("Fichero subido: {} ({} bytes)", path.display(), data.len());
        return Ok(filename);
    }

    Err(anyhow!("Nenhum arquivo enviado."))
}

/// Sólo el último componente del nombre, para no escribir fuera del sector.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

#[axum::debug_handler]
async fn ask_handler(State(state): State<AppState>, Json(data): Json<QueryData>) -> Json<Value> {
    let Some(store) = state.current_index().await else {
        return Json(json!({ "ok": false, "error": NOT_INITIALIZED }));
    };

    let result = rag::answer(
        &store,
        state.embedder.as_ref(),
        state.llm.as_ref(),
        &data.prompt,
        &data.setor,
        state.config.top_k,
    )
    .await;

    match result {
        Ok(output) => Json(json!({ "ok": true, "output": output })),
        Err(e) => failure("Error al procesar la consulta RAG", e),
    }
}

#[axum::debug_handler]
async fn reload_handler(State(state): State<AppState>) -> Json<Value> {
    match state.rebuild().await {
        Ok(_) => Json(json!({ "ok": true, "mensagem": "Banco de dados atualizado!" })),
        Err(e) => failure("Recarga", e),
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_reduced_to_their_last_component() {
        assert_eq!(sanitize_filename("manual.pdf").as_deref(), Some("manual.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd.pdf").as_deref(), Some("passwd.pdf"));
        assert_eq!(sanitize_filename("C:\\Users\\ana\\folha.pdf").as_deref(), Some("folha.pdf"));
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
    }
}
