//! Modelos de dominio (documentos fuente, chunks indexados y resúmenes).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sector comodín: en consultas y listados significa "todos los sectores",
/// y es la etiqueta de los ficheros que están en la raíz de `docs/`.
pub const GENERAL_SECTOR: &str = "geral";

/// Devuelve `true` si el sector indica "sin filtro".
pub fn is_general(sector: &str) -> bool {
    sector == GENERAL_SECTOR
}

/// Documento tal como sale del cargador: texto completo de un PDF.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub sector: String,
    pub text: String,
}

/// Trozo de texto indexado en el vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDoc {
    pub id: String,
    pub text: String,
    /// Ruta del fichero de origen.
    pub source: String,
    pub sector: String,
    /// Posición del chunk dentro de su documento.
    pub index: usize,
}

/// Resumen de una reconstrucción completa del índice.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexSummary {
    pub files_scanned: u32,
    pub files_indexed: u32,
    pub files_skipped: u32,
    pub chunks_created: usize,
    pub sectors: Vec<String>,
}

impl std::fmt::Display for IndexSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ficheros escaneados, {} indexados, {} omitidos. {} chunks en {} sectores.",
            self.files_scanned,
            self.files_indexed,
            self.files_skipped,
            self.chunks_created,
            self.sectors.len()
        )
    }
}
