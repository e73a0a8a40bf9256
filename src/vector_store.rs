//! Vector store de los chunks sobre LanceDB (`DATA_DIR/lancedb`).
//!
//! Cada reconstrucción escribe una tabla nueva (`chunks_<uuid>`) y, al
//! terminar, la publica en `DATA_DIR/index_manifest.json`. La búsqueda usa
//! distancia coseno con un filtro opcional sobre la columna `setor`.
//!
//! API pública:
//!   - `LanceIndex::open(&Path)`, `LanceIndex::writer(..)`, `LanceIndex::load_current()`
//!   - `IndexWriter::append(..)` / `IndexWriter::finish()`
//!   - `VectorStore::similarity_search(&[f32], usize, Option<&str>)`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::ChunkDoc;

pub const MANIFEST_FILE: &str = "index_manifest.json";
const LANCE_DIR: &str = "lancedb";
const TABLE_PREFIX: &str = "chunks_";

/// Chunk junto a su vector.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: ChunkDoc,
    pub embedding: Vec<f32>,
}

/// Qué tabla está activa y con qué modelo se generó.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub table: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunks: usize,
    pub built_at: DateTime<Utc>,
}

/// Conexión a la base LanceDB del directorio de datos.
pub struct LanceIndex {
    db: Connection,
    data_dir: PathBuf,
}

impl LanceIndex {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let lance_path = data_dir.join(LANCE_DIR);
        tokio::fs::create_dir_all(&lance_path)
            .await
            .context("No se pudo crear el directorio de LanceDB")?;

        let path_str = lance_path
            .to_str()
            .ok_or_else(|| anyhow!("Ruta de LanceDB no es UTF-8: {}", lance_path.display()))?;
        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("No se pudo conectar a LanceDB")?;

        Ok(Self {
            db,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Empieza una tabla nueva; no afecta a la activa hasta `publish`.
    pub fn writer(&self, embedding_model: &str, dimensions: usize) -> IndexWriter {
        IndexWriter {
            db: self.db.clone(),
            name: format!("{TABLE_PREFIX}{}", Uuid::new_v4().simple()),
            embedding_model: embedding_model.to_string(),
            dimensions,
            table: None,
            rows: 0,
        }
    }

    /// Abre la tabla publicada en el manifiesto, si existe.
    pub async fn load_current(&self) -> Result<Option<VectorStore>> {
        let path = self.data_dir.join(MANIFEST_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Error leyendo {}", path.display())),
        };
        let manifest: IndexManifest = serde_json::from_slice(&bytes)
            .with_context(|| format!("Manifiesto corrupto en {}", path.display()))?;

        let table = self
            .db
            .open_table(&manifest.table)
            .execute()
            .await
            .with_context(|| format!("No se pudo abrir la tabla {}", manifest.table))?;

        Ok(Some(VectorStore { table, manifest }))
    }

    /// Marca `store` como índice activo y borra las tablas antiguas, salvo
    /// `previous`, que puede seguir atendiendo consultas en curso.
    pub async fn publish(&self, store: &VectorStore, previous: Option<&str>) -> Result<()> {
        let target = self.data_dir.join(MANIFEST_FILE);
        let tmp = self.data_dir.join(format!("{MANIFEST_FILE}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&store.manifest)?)
            .await
            .with_context(|| format!("Error escribiendo {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("Error renombrando {} a {}", tmp.display(), target.display()))?;

        let names = self.db.table_names().execute().await?;
        for name in names {
            let keep = name == store.manifest.table || Some(name.as_str()) == previous;
            if name.starts_with(TABLE_PREFIX) && !keep {
                if let Err(e) = self.db.drop_table(&name).await {
                    warn!("No se pudo borrar la tabla antigua {name}: {e}");
                }
            }
        }

        info!(
            "Índice publicado: tabla {} ({} chunks)",
            store.manifest.table, store.manifest.chunks
        );
        Ok(())
    }

    pub async fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.db.table_names().execute().await?)
    }
}

/// Escribe una tabla nueva por lotes.
pub struct IndexWriter {
    db: Connection,
    name: String,
    embedding_model: String,
    dimensions: usize,
    table: Option<Table>,
    rows: usize,
}

impl IndexWriter {
    pub async fn append(&mut self, entries: &[IndexEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let batch = entries_to_batch(entries, self.dimensions)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match &self.table {
            Some(table) => table
                .add(batches)
                .execute()
                .await
                .context("Error añadiendo chunks a LanceDB")?,
            None => {
                let table = self
                    .db
                    .create_table(&self.name, batches)
                    .execute()
                    .await
                    .with_context(|| format!("No se pudo crear la tabla {}", self.name))?;
                self.table = Some(table);
            }
        }
        self.rows += entries.len();
        Ok(())
    }

    pub async fn finish(self) -> Result<VectorStore> {
        let Some(table) = self.table else {
            bail!("No hay chunks que indexar");
        };
        Ok(VectorStore {
            table,
            manifest: IndexManifest {
                table: self.name,
                embedding_model: self.embedding_model,
                dimensions: self.dimensions,
                chunks: self.rows,
                built_at: Utc::now(),
            },
        })
    }
}

/// Tabla de LanceDB ya construida.
pub struct VectorStore {
    table: Table,
    manifest: IndexManifest,
}

impl VectorStore {
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn embedding_model(&self) -> &str {
        &self.manifest.embedding_model
    }

    pub fn dimensions(&self) -> usize {
        self.manifest.dimensions
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.manifest.built_at
    }

    pub fn len(&self) -> usize {
        self.manifest.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.chunks == 0
    }

    /// Devuelve los `top_k` chunks más parecidos a `query`, ordenados por
    /// similitud coseno descendente. Con `sector = Some(s)` sólo se
    /// consideran los chunks con `setor = s`.
    pub async fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        sector: Option<&str>,
    ) -> Result<Vec<(f32, ChunkDoc)>> {
        if query.len() != self.manifest.dimensions {
            bail!(
                "El vector de consulta tiene {} dimensiones, el índice {}",
                query.len(),
                self.manifest.dimensions
            );
        }

        let mut search = self
            .table
            .vector_search(query.to_vec())
            .context("No se pudo crear la búsqueda vectorial")?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(sector) = sector {
            search = search.only_if(sector_filter(sector));
        }

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .context("Error ejecutando la búsqueda vectorial")?
            .try_collect()
            .await?;

        let mut hits = Vec::new();
        for batch in &batches {
            let distances = column::<Float32Array>(batch, "_distance")?;
            for (i, chunk) in batch_to_chunks(batch)?.into_iter().enumerate() {
                hits.push((1.0 - distances.value(i), chunk));
            }
        }
        hits.sort_by(|a, b| b.0.total_cmp(&a.0));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Todos los chunks de la tabla (sin vectores).
    pub async fn chunks(&self) -> Result<Vec<ChunkDoc>> {
        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .limit(self.manifest.chunks.max(1))
            .execute()
            .await?
            .try_collect()
            .await?;

        let mut chunks = Vec::new();
        for batch in &batches {
            chunks.extend(batch_to_chunks(batch)?);
        }
        Ok(chunks)
    }
}

/// Filtro SQL de LanceDB; las comillas simples se duplican.
fn sector_filter(sector: &str) -> String {
    format!("setor = '{}'", sector.replace('\'', "''"))
}

fn schema(dimensions: usize) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("setor", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int64, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimensions as i32,
            ),
            false,
        ),
    ])
}

fn entries_to_batch(entries: &[IndexEntry], dimensions: usize) -> Result<RecordBatch> {
    if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimensions) {
        bail!(
            "El chunk {} tiene {} dimensiones, se esperaban {}",
            bad.chunk.id,
            bad.embedding.len(),
            dimensions
        );
    }

    let ids: Vec<&str> = entries.iter().map(|e| e.chunk.id.as_str()).collect();
    let texts: Vec<&str> = entries.iter().map(|e| e.chunk.text.as_str()).collect();
    let sources: Vec<&str> = entries.iter().map(|e| e.chunk.source.as_str()).collect();
    let sectors: Vec<&str> = entries.iter().map(|e| e.chunk.sector.as_str()).collect();
    let indices: Vec<i64> = entries.iter().map(|e| e.chunk.index as i64).collect();

    let flat: Vec<f32> = entries
        .iter()
        .flat_map(|e| e.embedding.iter().copied())
        .collect();
    let embeddings = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dimensions as i32,
        Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
        None,
    )
    .context("No se pudo crear la columna de embeddings")?;

    RecordBatch::try_new(
        Arc::new(schema(dimensions)),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(sectors)),
            Arc::new(Int64Array::from(indices)),
            Arc::new(embeddings),
        ],
    )
    .context("No se pudo crear el RecordBatch")
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow!("Falta la columna '{name}' en el resultado de LanceDB"))
}

fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<ChunkDoc>> {
    let ids = column::<StringArray>(batch, "id")?;
    let texts = column::<StringArray>(batch, "text")?;
    let sources = column::<StringArray>(batch, "source")?;
    let sectors = column::<StringArray>(batch, "setor")?;
    let indices = column::<Int64Array>(batch, "chunk_index")?;

    Ok((0..batch.num_rows())
        .map(|i| ChunkDoc {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            source: sources.value(i).to_string(),
            sector: sectors.value(i).to_string(),
            index: indices.value(i) as usize,
        })
        .collect())
}
