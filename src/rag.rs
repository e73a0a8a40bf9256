//! Consulta RAG sobre el vector store (LanceDB).
//!
//! Flujo:
//!   1. Embedding de la pregunta.
//!   2. Búsqueda de los `top_k` chunks más cercanos, filtrando por sector
//!      salvo que el sector sea `geral`.
//!   3. Si no hay resultados se devuelve un mensaje fijo, sin llamar al LLM.
//!   4. El texto de los chunks se concatena como contexto del mensaje de sistema.
//!   5. El LLM responde a la pregunta usando sólo ese contexto.

use anyhow::Result;
use tracing::debug;

use crate::{
    embeddings::Embedder,
    llm::ChatCompleter,
    models::is_general,
    vector_store::VectorStore,
};

/// Respuesta cuando la búsqueda no devuelve ningún chunk.
pub const NO_INFORMATION_FOUND: &str =
    "Não encontrei informações específicas nos documentos deste setor.";

/// Lanza una consulta RAG y devuelve el texto generado por el LLM.
pub async fn answer(
    store: &VectorStore,
    embedder: &dyn Embedder,
    llm: &dyn ChatCompleter,
    prompt: &str,
    sector: &str,
    top_k: usize,
) -> Result<String> {
    let filter = if is_general(sector) { None } else { Some(sector) };

    let query_vec = embedder.embed_query(prompt).await?;
    let hits = store.similarity_search(&query_vec, top_k, filter).await?;

    debug!("Buscando '{prompt}' en el sector '{sector}': {} chunks", hits.len());

    if hits.is_empty() {
        return Ok(NO_INFORMATION_FOUND.to_string());
    }

    let context = hits
        .iter()
        .map(|(_, chunk)| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    llm.complete(&system_message(&context), prompt).await
}

/// Mensaje de sistema con el contenido extraído de los PDFs.
pub fn system_message(context: &str) -> String {
    format!(
        "Você é um assistente técnico. Abaixo está o conteúdo extraído dos documentos PDF:\n\
         {context}\n\n\
         Responda apenas com base no conteúdo acima. Se não souber, diga que a informação não consta nos documentos."
    )
}
