//! Backend RAG por sectores: indexa los PDFs de `docs/<sector>/`, responde
//! preguntas con un LLM usando los chunks recuperados y sirve el front-end.

// Módulos de la aplicación
pub mod api;
pub mod app_state;
pub mod config;
pub mod embeddings;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod splitter;
pub mod vector_store;
