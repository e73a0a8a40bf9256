use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    embeddings::Embedder,
    ingest::{self, DocumentLoader},
    llm::ChatCompleter,
    models::IndexSummary,
    splitter::TextSplitter,
    vector_store::{LanceIndex, VectorStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn ChatCompleter>,
    pub loader: Arc<dyn DocumentLoader>,
    pub lance: Arc<LanceIndex>,
    /// Índice activo. Las consultas clonan el `Arc` y sueltan el lock enseguida.
    pub index: Arc<RwLock<Option<Arc<VectorStore>>>>,
    /// Serializa las reconstrucciones.
    pub rebuild_lock: Arc<AsyncMutex<()>>,
    pub status: Arc<Mutex<Status>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub chunks: usize,
    pub built_at: Option<DateTime<Utc>>,
}

impl AppState {
    /// Abre (o crea) la base LanceDB en `config.data_dir`. No carga ningún
    /// índice; para eso está `initialize`.
    pub async fn new(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatCompleter>,
        loader: Arc<dyn DocumentLoader>,
    ) -> Result<Self> {
        let lance = LanceIndex::open(&config.data_dir).await?;
        Ok(Self {
            config,
            embedder,
            llm,
            loader,
            lance: Arc::new(lance),
            index: Arc::new(RwLock::new(None)),
            rebuild_lock: Arc::new(AsyncMutex::new(())),
            status: Arc::new(Mutex::new(Status {
                message: "Servidor listo.".to_string(),
                ..Status::default()
            })),
        })
    }

    /// Copia del índice activo, si existe.
    pub async fn current_index(&self) -> Option<Arc<VectorStore>> {
        self.index.read().await.clone()
    }

    /// Al arrancar: usa el índice persistido si fue generado con el mismo
    /// modelo de embeddings; si no, reconstruye desde `docs/`.
    pub async fn initialize(&self) {
        match self.lance.load_current().await {
            Ok(Some(store)) if store.embedding_model() == self.embedder.model_name()
                && store.dimensions() == self.embedder.dimensions() =>
            {
                info!("--- Cargando índice persistente ({} chunks) ---", store.len());
                self.install(Arc::new(store), "Índice cargado desde disco.").await;
                return;
            }
            Ok(Some(store)) => warn!(
                "El índice persistido usa el modelo '{}', se reconstruye con '{}'",
                store.embedding_model(),
                self.embedder.model_name()
            ),
            Ok(None) => info!("--- Creando nuevo índice a partir de los PDFs ---"),
            Err(e) => warn!("No se pudo leer el índice persistido: {e:#}. Se reconstruye."),
        }

        if let Err(e) = self.rebuild().await {
            error!("Error construyendo el índice inicial: {e:#}");
        }
    }

    /// Reconstruye el índice completo a partir de todos los PDFs de `docs/`.
    ///
    /// El índice nuevo se escribe en otra tabla y sólo sustituye al activo
    /// cuando está completo y publicado; mientras tanto las consultas siguen
    /// usando el anterior. Si no hay ningún documento el índice activo no cambia.
    pub async fn rebuild(&self) -> Result<IndexSummary> {
        let _guard = self.rebuild_lock.lock().await;
        self.set_status(true, "Reconstruyendo índice...");

        let result = self.rebuild_inner().await;

        match &result {
            Ok(summary) => {
                info!("Reconstrucción completada. {summary}");
                self.set_status(false, &format!("¡Indexación completada! {summary}"));
            }
            Err(e) => {
                error!("Error en la reconstrucción del índice: {e:#}");
                self.set_status(false, &format!("Error en la indexación: {e}"));
            }
        }
        result
    }

    async fn rebuild_inner(&self) -> Result<IndexSummary> {
        let mut summary = IndexSummary::default();
        let docs =
            ingest::load_documents(&self.config.docs_dir, self.loader.as_ref(), &mut summary).await?;

        if docs.is_empty() {
            warn!("Aviso: ningún PDF con texto en {}", self.config.docs_dir.display());
            return Ok(summary);
        }

        let splitter = TextSplitter::new(self.config.chunk_size, self.config.chunk_overlap);
        let store = ingest::build_index(
            &docs,
            &splitter,
            self.embedder.as_ref(),
            &self.lance,
            &mut summary,
        )
        .await?;

        let previous = self
            .current_index()
            .await
            .map(|current| current.manifest().table.clone());
        self.lance.publish(&store, previous.as_deref()).await?;

        self.install(Arc::new(store), "Índice reconstruido.").await;
        Ok(summary)
    }

    async fn install(&self, store: Arc<VectorStore>, message: &str) {
        {
            let mut status = self.lock_status();
            status.chunks = store.len();
            status.built_at = Some(store.built_at());
            status.message = message.to_string();
        }
        *self.index.write().await = Some(store);
    }

    fn set_status(&self, is_busy: bool, message: &str) {
        let mut status = self.lock_status();
        status.is_busy = is_busy;
        status.message = message.to_string();
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, Status> {
        // El estado es sólo informativo.
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status_snapshot(&self) -> Status {
        self.lock_status().clone()
    }
}
