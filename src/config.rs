//! Carga y gestión de configuración de la aplicación (rutas, LLM y embeddings).

use std::env;
use std::path::PathBuf;
use anyhow::{anyhow, Context, Result};

/// Proveedor del modelo de chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Groq,
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Variable de entorno que contiene la API key del proveedor.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// Origen de los embeddings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Modelo local (fastembed / ONNX), sin llamadas de red tras la descarga.
    Local,
    OpenAI,
}

impl EmbeddingProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" | "fastembed" => Ok(Self::Local),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor de embeddings no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub docs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,

    pub llm_provider: LlmProvider,
    pub llm_api_key: String,
    pub llm_chat_model: String,

    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let llm_provider = LlmProvider::from_str(&var_or("LLM_PROVIDER", "groq"))?;
        let key_var = llm_provider.api_key_var();
        let llm_api_key = lookup(key_var)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("Falta {key_var} en el entorno (o en el fichero .env)"))?;

        let llm_chat_model = var_or("LLM_CHAT_MODEL", default_chat_model(&llm_provider));

        let embedding_provider =
            EmbeddingProvider::from_str(&var_or("EMBEDDING_PROVIDER", "local"))?;
        if embedding_provider == EmbeddingProvider::OpenAI
            && lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()).is_none()
        {
            return Err(anyhow!("EMBEDDING_PROVIDER=openai requiere OPENAI_API_KEY en el entorno"));
        }
        let embedding_model = var_or(
            "EMBEDDING_MODEL",
            match embedding_provider {
                EmbeddingProvider::Local => "all-MiniLM-L6-v2",
                EmbeddingProvider::OpenAI => "text-embedding-3-small",
            },
        );

        let chunk_size = parse_usize("CHUNK_SIZE", &var_or("CHUNK_SIZE", "1000"))?;
        let chunk_overlap = parse_usize("CHUNK_OVERLAP", &var_or("CHUNK_OVERLAP", "100"))?;
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(anyhow!(
                "CHUNK_OVERLAP ({chunk_overlap}) debe ser menor que CHUNK_SIZE ({chunk_size}) y este mayor que 0"
            ));
        }

        let top_k = parse_usize("TOP_K", &var_or("TOP_K", "4"))?;
        if top_k == 0 {
            return Err(anyhow!("TOP_K debe ser mayor que 0"));
        }
        let max_upload_mb = parse_usize("MAX_UPLOAD_MB", &var_or("MAX_UPLOAD_MB", "50"))?;

        Ok(Self {
            server_addr: var_or("SERVER_ADDR", "0.0.0.0:8000"),
            docs_dir: PathBuf::from(var_or("DOCS_DIR", "docs")),
            data_dir: PathBuf::from(var_or("DATA_DIR", "data")),
            static_dir: PathBuf::from(var_or("STATIC_DIR", "static")),
            llm_provider,
            llm_api_key,
            llm_chat_model,
            embedding_provider,
            embedding_model,
            chunk_size,
            chunk_overlap,
            top_k,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    /// Crea los directorios de documentos y datos si no existen.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.docs_dir)
            .with_context(|| format!("No se pudo crear {}", self.docs_dir.display()))?;
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("No se pudo crear {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn default_chat_model(provider: &LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Groq => "llama-3.3-70b-versatile",
        LlmProvider::OpenAI => "gpt-4o-mini",
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .with_context(|| format!("{key} no es un entero válido: '{raw}'"))
}
