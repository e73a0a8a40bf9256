//! Funciones de embedding: modelo local (fastembed) u OpenAI vía Rig.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::config::{AppConfig, EmbeddingProvider};

/// Convierte textos en vectores.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Devuelve exactamente un vector por texto, en el mismo orden.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la consulta"))
    }
}

/// Construye el embedder indicado en la configuración.
pub fn build_embedder(cfg: &AppConfig) -> Result<Arc<dyn Embedder>> {
    match cfg.embedding_provider {
        EmbeddingProvider::Local => Ok(Arc::new(FastEmbedder::new(
            &cfg.embedding_model,
            cfg.data_dir.join("models"),
        )?)),
        EmbeddingProvider::OpenAI => Ok(Arc::new(OpenAiEmbedder::new(&cfg.embedding_model)?)),
    }
}

// ---------------------------------------------------------------------
// LOCAL (fastembed / ONNX)
// ---------------------------------------------------------------------

/// Modelo de sentence-transformers ejecutado en local.
pub struct FastEmbedder {
    name: String,
    dimensions: usize,
    // fastembed no es reentrante en todas sus versiones
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedder {
    pub fn new(model_name: &str, cache_dir: std::path::PathBuf) -> Result<Self> {
        let (model, dimensions) = local_model(model_name)?;
        info!("Cargando modelo de embeddings local '{model_name}' (cache en {})...", cache_dir.display());

        let embedding = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(true),
        )?;

        info!("Modelo de embeddings '{model_name}' listo ({dimensions} dimensiones).");
        Ok(Self {
            name: model_name.to_string(),
            dimensions,
            model: Arc::new(Mutex::new(embedding)),
        })
    }
}

fn local_model(name: &str) -> Result<(FastEmbedModel, usize)> {
    match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok((FastEmbedModel::AllMiniLML6V2, 384))
        }
        "paraphrase-multilingual-MiniLM-L12-v2" => Ok((FastEmbedModel::ParaphraseMLMiniLML12V2, 384)),
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => Ok((FastEmbedModel::BGESmallENV15, 384)),
        other => Err(anyhow!("Modelo de embeddings local no soportado: {other}")),
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let model = self.model.clone();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let model = model
                .lock()
                .map_err(|_| anyhow!("El modelo de embeddings quedó envenenado por un pánico previo"))?;
            model.embed(texts, None)
        })
        .await??;

        check_count(expected, vectors.len())?;
        Ok(vectors)
    }
}

// ---------------------------------------------------------------------
// OPENAI (Rig)
// ---------------------------------------------------------------------

pub struct OpenAiEmbedder {
    name: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(model_name: &str) -> Result<Self> {
        let dimensions = match model_name {
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            "text-embedding-3-large" => 3072,
            other => return Err(anyhow!("Modelo de embeddings de OpenAI desconocido: {other}")),
        };
        Ok(Self {
            name: model_name.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        use rig::providers::openai;
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;

        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let client = openai::Client::from_env();
        let embedding_model = client.embedding_model(&self.name);
        let embeddings = embedding_model.embed_texts(texts).await?;

        check_count(expected, embeddings.len())?;
        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }
}

fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(anyhow!(
            "Número de embeddings ({got}) distinto al número de textos ({expected})"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_local_models_resolve_with_dimensions() {
        let (_, dims) = local_model("all-MiniLM-L6-v2").unwrap();
        assert_eq!(dims, 384);
        assert!(local_model("modelo-inventado").is_err());
    }

    #[test]
    fn openai_dimensions_follow_the_model() {
        assert_eq!(OpenAiEmbedder::new("text-embedding-3-large").unwrap().dimensions(), 3072);
        assert_eq!(OpenAiEmbedder::new("text-embedding-3-small").unwrap().model_name(), "text-embedding-3-small");
        assert!(OpenAiEmbedder::new("gpt-4o").is_err());
    }

    #[test]
    fn count_mismatch_is_rejected() {
        assert!(check_count(2, 2).is_ok());
        assert!(check_count(3, 2).is_err());
    }
}
