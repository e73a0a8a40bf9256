//! Ingesta del árbol `docs/<sector>/*.pdf`: lectura de PDFs, etiquetado por
//! sector, división en chunks y embeddings que se escriben en una tabla
//! nueva de LanceDB.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::{
    embeddings::Embedder,
    models::{is_general, ChunkDoc, IndexSummary, SourceDocument, GENERAL_SECTOR},
    splitter::TextSplitter,
    vector_store::{IndexEntry, LanceIndex, VectorStore},
};

/// Número de chunks que se envían juntos al embedder.
const EMBED_BATCH: usize = 64;

/// Extrae el texto de un fichero.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<String>;
}

/// Cargador de PDFs basado en `pdf-extract`.
#[derive(Debug, Default, Clone)]
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await?
            .map_err(|e| anyhow!("pdf-extract: {e}"))?;
        Ok(text)
    }
}

/// Sector de un fichero: nombre de su directorio padre inmediato, o `geral`
/// si está directamente en la raíz de documentos.
pub fn sector_for_path(root: &Path, path: &Path) -> String {
    match path.parent() {
        Some(parent) if parent != root && parent.starts_with(root) => parent
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| GENERAL_SECTOR.to_string()),
        _ => GENERAL_SECTOR.to_string(),
    }
}

/// Un sector válido es un único componente de ruta normal. Devuelve el
/// nombre sin espacios alrededor, que es el que se usa en disco.
pub fn validate_sector(sector: &str) -> Result<String> {
    let trimmed = sector.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(anyhow!("Setor inválido: '{sector}'"));
    }
    Ok(trimmed.to_string())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Nombres de los PDFs de un sector. Con `geral` se recorre todo el árbol
/// y se eliminan los nombres repetidos.
pub async fn list_pdfs(root: &Path, sector: &str) -> Result<Vec<String>> {
    let root = root.to_path_buf();
    let sector = sector.to_string();
    Ok(tokio::task::spawn_blocking(move || scan_pdfs(&root, &sector)).await?)
}

fn scan_pdfs(root: &Path, sector: &str) -> Vec<String> {
    if is_general(sector) {
        if !root.is_dir() {
            return Vec::new();
        }
        let names: BTreeSet<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_pdf(e.path()))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        return names.into_iter().collect();
    }

    let Ok(sector) = validate_sector(sector) else {
        return Vec::new();
    };
    let dir = root.join(sector);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false) && is_pdf(&e.path()))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

fn walk_pdfs(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_pdf(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    paths
}

/// Recorre recursivamente `root` y carga todos los PDFs con su sector.
/// Los ficheros ilegibles o sin texto se omiten con un aviso.
pub async fn load_documents(
    root: &Path,
    loader: &dyn DocumentLoader,
    summary: &mut IndexSummary,
) -> Result<Vec<SourceDocument>> {
    if !tokio::fs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(anyhow!("La ruta no es un directorio: {}", root.display()));
    }

    let walk_root = root.to_path_buf();
    let paths = tokio::task::spawn_blocking(move || walk_pdfs(&walk_root)).await?;

    let mut docs = Vec::new();
    for path in paths {
        summary.files_scanned += 1;
        match loader.load(&path).await {
            Ok(text) if !text.trim().is_empty() => {
                let sector = sector_for_path(root, &path);
                docs.push(SourceDocument { path, sector, text });
            }
            Ok(_) => {
                summary.files_skipped += 1;
                warn!("PDF sin texto útil: {}", path.display());
            }
            Err(e) => {
                summary.files_skipped += 1;
                warn!("No se pudo extraer texto de {}: {}. Saltando fichero.", path.display(), e);
            }
        }
    }

    Ok(docs)
}

/// Divide y vectoriza todos los documentos, escribiéndolos por lotes en una
/// tabla nueva de `index`. La tabla no se publica aquí.
pub async fn build_index(
    docs: &[SourceDocument],
    splitter: &TextSplitter,
    embedder: &dyn Embedder,
    index: &LanceIndex,
    summary: &mut IndexSummary,
) -> Result<VectorStore> {
    let mut chunks = Vec::new();
    let mut sectors = BTreeSet::new();

    for doc in docs {
        let pieces = splitter.split(&doc.text);
        if pieces.is_empty() {
            summary.files_skipped += 1;
            continue;
        }
        summary.files_indexed += 1;
        sectors.insert(doc.sector.clone());

        let source = doc.path.to_string_lossy().to_string();
        chunks.extend(pieces.into_iter().enumerate().map(|(index, text)| ChunkDoc {
            id: Uuid::new_v4().to_string(),
            text,
            source: source.clone(),
            sector: doc.sector.clone(),
            index,
        }));
    }

    let mut writer = index.writer(embedder.model_name(), embedder.dimensions());
    let total = chunks.len();
    let mut done = 0;
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(texts).await?;
        if vectors.len() != batch.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                vectors.len(),
                batch.len()
            ));
        }
        let entries: Vec<IndexEntry> = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();
        writer.append(&entries).await?;
        done += entries.len();
        info!("Embeddings generados: {done}/{total}");
    }

    summary.chunks_created = done;
    summary.sectors = sectors.into_iter().collect();

    writer.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TextLoader;

    #[async_trait]
    impl DocumentLoader for TextLoader {
        async fn load(&self, path: &Path) -> Result<String> {
            Ok(fs::read_to_string(path)?)
        }
    }

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn sector_is_the_immediate_parent_directory() {
        let root = Path::new("/srv/docs");
        assert_eq!(sector_for_path(root, Path::new("/srv/docs/rh/manual.pdf")), "rh");
        assert_eq!(sector_for_path(root, Path::new("/srv/docs/ti/redes/vpn.pdf")), "redes");
        assert_eq!(sector_for_path(root, Path::new("/srv/docs/avisos.pdf")), "geral");
        assert_eq!(sector_for_path(root, Path::new("/outro/lugar/x.pdf")), "geral");
    }

    #[test]
    fn sectors_with_path_components_are_rejected() {
        assert_eq!(validate_sector("financeiro").unwrap(), "financeiro");
        assert_eq!(validate_sector("  rh\t").unwrap(), "rh");
        assert!(validate_sector("../etc").is_err());
        assert!(validate_sector("a/b").is_err());
        assert!(validate_sector("..").is_err());
        assert!(validate_sector("  ").is_err());
    }

    #[tokio::test]
    async fn listing_by_sector_and_general() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "rh/ferias.pdf", "x");
        write(root, "rh/notas.txt", "x");
        write(root, "ti/ferias.pdf", "x");
        write(root, "ti/VPN.PDF", "x");
        write(root, "raiz.pdf", "x");

        assert_eq!(list_pdfs(root, "rh").await.unwrap(), vec!["ferias.pdf"]);
        assert_eq!(list_pdfs(root, " rh ").await.unwrap(), vec!["ferias.pdf"]);
        assert_eq!(list_pdfs(root, "ti").await.unwrap(), vec!["VPN.PDF", "ferias.pdf"]);
        assert_eq!(
            list_pdfs(root, "geral").await.unwrap(),
            vec!["VPN.PDF", "ferias.pdf", "raiz.pdf"]
        );
        assert!(list_pdfs(root, "inexistente").await.unwrap().is_empty());
        assert!(list_pdfs(root, "..").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chunks_carry_the_sector_of_their_source_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "rh/ferias.pdf", "Trinta dias de férias por ano.");
        write(root, "financeiro/reembolso.pdf", "Reembolso em até 10 dias úteis.");
        write(root, "geral.pdf", "Horário de funcionamento: 8h às 18h.");
        write(root, "vazio/branco.pdf", "   ");

        let mut summary = IndexSummary::default();
        let docs = load_documents(root, &TextLoader, &mut summary).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(summary.files_scanned, 4);
        assert_eq!(summary.files_skipped, 1);

        let data = tempfile::tempdir().unwrap();
        let index = LanceIndex::open(data.path()).await.unwrap();
        let store = build_index(
            &docs,
            &TextSplitter::new(1000, 100),
            &LengthEmbedder,
            &index,
            &mut summary,
        )
        .await
        .unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.embedding_model(), "length");
        assert_eq!(summary.files_indexed, 3);
        assert_eq!(summary.sectors, vec!["financeiro", "geral", "rh"]);

        let chunks = store.chunks().await.unwrap();
        assert_eq!(chunks.len(), 3);
        for chunk in chunks {
            let expected = sector_for_path(root, Path::new(&chunk.source));
            assert_eq!(chunk.sector, expected);
            if chunk.source.ends_with("ferias.pdf") {
                assert_eq!(chunk.sector, "rh");
            }
            if chunk.source.ends_with("geral.pdf") {
                assert_eq!(chunk.sector, "geral");
            }
        }
    }

    #[tokio::test]
    async fn large_corpora_are_written_in_several_batches() {
        let docs: Vec<SourceDocument> = (0..150)
            .map(|i| SourceDocument {
                path: PathBuf::from(format!("docs/rh/doc{i:03}.pdf")),
                sector: "rh".to_string(),
                text: format!("documento número {i}"),
            })
            .collect();

        let data = tempfile::tempdir().unwrap();
        let index = LanceIndex::open(data.path()).await.unwrap();
        let mut summary = IndexSummary::default();
        let store = build_index(&docs, &TextSplitter::new(1000, 100), &LengthEmbedder, &index, &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.chunks_created, 150);
        assert_eq!(store.len(), 150);
        assert_eq!(store.chunks().await.unwrap().len(), 150);
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let mut summary = IndexSummary::default();
        let result = load_documents(Path::new("/no/existe/docs"), &TextLoader, &mut summary).await;
        assert!(result.is_err());
    }
}
