use std::sync::Arc;

use anyhow::{Context, Result};
use setor_rag_webapp::{
    api,
    app_state::AppState,
    config::AppConfig,
    embeddings,
    ingest::PdfLoader,
    llm::LlmManager,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Cargar configuración (sin API key no se arranca)
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;
    cfg.ensure_dirs()?;

    // 3. Embeddings y LLM
    let embedder = embeddings::build_embedder(&cfg).context("Error inicializando los embeddings")?;
    let llm = LlmManager::from_config(&cfg);
    info!("LLM: {:?}/{}", llm.provider, llm.chat_model);

    // 4. Estado compartido e índice inicial
    let app_state = AppState::new(cfg.clone(), embedder, Arc::new(llm), Arc::new(PdfLoader))
        .await
        .context("Error abriendo LanceDB")?;
    app_state.initialize().await;

    // 5. Router de la API + front-end estático
    let app = api::build_app(app_state);

    // 6. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
