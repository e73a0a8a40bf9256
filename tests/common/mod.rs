#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use setor_rag_webapp::{
    app_state::AppState, config::AppConfig, embeddings::Embedder, ingest::DocumentLoader,
    llm::ChatCompleter,
};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

pub const BOUNDARY: &str = "X-SETOR-RAG-BOUNDARY";
pub const EMBEDDER_DOWN: &str = "servicio de embeddings caído";
pub const LLM_DOWN: &str = "limite de requisições excedido";

/// Bolsa de palabras con hashing: determinista y sin red. Con `fail`
/// activado todas las llamadas devuelven error.
#[derive(Default)]
pub struct HashEmbedder {
    pub fail: AtomicBool,
}

impl HashEmbedder {
    const DIMS: usize = 64;

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; Self::DIMS];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
        {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % Self::DIMS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dimensions(&self) -> usize {
        Self::DIMS
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!(EMBEDDER_DOWN));
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Devuelve el mensaje de sistema recibido, para inspeccionar el contexto.
#[derive(Default)]
pub struct EchoLlm {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl ChatCompleter for EchoLlm {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!(LLM_DOWN));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("PERGUNTA: {user}\nSISTEMA: {system}"))
    }
}

/// Los "PDF" de los tests son texto plano.
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub embedder: Arc<HashEmbedder>,
    pub llm: Arc<EchoLlm>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_env(&[]).await
    }

    /// Como `new`, pero con variables de entorno adicionales.
    pub async fn with_env(extra: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir, extra).await
    }

    pub async fn in_dir(dir: TempDir, extra: &[(&str, &str)]) -> Self {
        let root = dir.path().to_path_buf();
        let mut vars: HashMap<String, String> = HashMap::from([
            ("GROQ_API_KEY".to_string(), "gsk_test".to_string()),
            ("DOCS_DIR".to_string(), root.join("docs").display().to_string()),
            ("DATA_DIR".to_string(), root.join("data").display().to_string()),
            ("STATIC_DIR".to_string(), root.join("static").display().to_string()),
            ("CHUNK_SIZE".to_string(), "200".to_string()),
            ("CHUNK_OVERLAP".to_string(), "20".to_string()),
        ]);
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        let cfg = AppConfig::from_lookup(|k: &str| vars.get(k).cloned()).unwrap();
        cfg.ensure_dirs().unwrap();

        let embedder = Arc::new(HashEmbedder::default());
        let llm = Arc::new(EchoLlm::default());
        let state = AppState::new(cfg, embedder.clone(), llm.clone(), Arc::new(TextLoader))
            .await
            .unwrap();
        Self { dir, state, embedder, llm }
    }

    pub fn docs(&self) -> PathBuf {
        self.dir.path().join("docs")
    }

    pub fn write_doc(&self, rel: &str, content: &str) {
        let path = self.docs().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn app(&self) -> Router {
        setor_rag_webapp::api::build_app(self.state.clone())
    }

    pub async fn get_json(&self, uri: &str) -> Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(self.app(), req).await
    }

    pub async fn ask(&self, prompt: &str, setor: Option<&str>) -> Value {
        let body = match setor {
            Some(s) => serde_json::json!({ "prompt": prompt, "setor": s }),
            None => serde_json::json!({ "prompt": prompt }),
        };
        let req = Request::builder()
            .method("POST")
            .uri("/perguntar")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(self.app(), req).await
    }

    /// `setor` va tal cual en la query string (ya codificado).
    pub async fn upload(&self, setor: &str, filename: &str, content: &str) -> Value {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/pdf\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri(format!("/upload?setor={setor}"))
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();
        send(self.app(), req).await
    }
}

pub async fn send(app: Router, req: Request<Body>) -> Value {
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
