use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::document::Chunk;
use crate::embedding::{cosine_similarity, embedding_text, Embedder};

/// Name of the single collection held by an index
pub const COLLECTION_NAME: &str = "guides_docs";
/// Default number of chunks embedded and persisted together
pub const DEFAULT_BATCH_SIZE: usize = 100;

const INDEX_FILE: &str = "index.json";

/// A flat metadata value attached to an indexed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Equality constraints a record's metadata must all satisfy
pub type MetadataFilter = BTreeMap<String, MetadataValue>;

/// A chunk as stored in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

impl IndexRecord {
    fn matches(&self, filter: Option<&MetadataFilter>) -> bool {
        filter.is_none_or(|filter| {
            filter
                .iter()
                .all(|(key, value)| self.metadata.get(key) == Some(value))
        })
    }

    /// String metadata field, empty when missing
    pub fn meta_str(&self, key: &str) -> &str {
        self.metadata.get(key).and_then(|v| v.as_str()).unwrap_or_default()
    }
}

/// A search result with its cosine distance to the query
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f32,
}

impl SearchHit {
    pub fn meta_str(&self, key: &str) -> &str {
        self.metadata.get(key).and_then(|v| v.as_str()).unwrap_or_default()
    }

    /// Similarity rounded to three decimals
    pub fn relevance_score(&self) -> f64 {
        ((1.0 - f64::from(self.distance)) * 1000.0).round() / 1000.0
    }
}

/// Summary of an index
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub total_files: usize,
    pub collection_name: String,
    pub embedding_model: String,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    collection: String,
    embedder: String,
    dimension: usize,
    records: Vec<IndexRecord>,
}

/// Persistent vector index over documentation chunks
pub struct ChunkIndex {
    index_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    records: Vec<IndexRecord>,
    positions: HashMap<String, usize>,
}

impl ChunkIndex {
    /// Open the index stored in `index_dir`, creating an empty one if none exists
    pub fn open(index_dir: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let index_dir = index_dir.as_ref().to_path_buf();

        if !index_dir.exists() {
            fs::create_dir_all(&index_dir)
                .with_context(|| format!("failed to create index directory {}", index_dir.display()))?;
        }

        let records = match Self::load_records(&index_dir)? {
            Some(persisted) => {
                if persisted.embedder != embedder.name() || persisted.dimension != embedder.dimension() {
                    anyhow::bail!(
                        "index at {} was built with {} ({} dims), current embedder is {} ({} dims); rebuild the index",
                        index_dir.display(),
                        persisted.embedder,
                        persisted.dimension,
                        embedder.name(),
                        embedder.dimension()
                    );
                }
                persisted.records
            }
            None => Vec::new(),
        };

        let positions = records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.id.clone(), i))
            .collect();

        Ok(Self {
            index_dir,
            embedder,
            records,
            positions,
        })
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Embed and store chunks batch by batch, replacing records with the same id
    pub fn index_chunks(&mut self, chunks: &[Chunk], batch_size: usize) -> Result<()> {
        let batch_size = batch_size.max(1);
        let total_batches = chunks.len().div_ceil(batch_size);
        tracing::info!("Indexing {} chunks", chunks.len());

        for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(embedding_text).collect();
            let embeddings = self.embedder.embed_batch(&texts);

            for (chunk, embedding) in batch.iter().zip(embeddings) {
                self.upsert(IndexRecord {
                    id: chunk.chunk_id.clone(),
                    document: chunk.content.clone(),
                    embedding,
                    metadata: chunk_metadata(chunk),
                });
            }

            self.save_records()?;
            tracing::info!("Indexed batch {}/{}", batch_number + 1, total_batches);
        }

        tracing::info!("Successfully indexed {} chunks", chunks.len());
        Ok(())
    }

    fn upsert(&mut self, record: IndexRecord) {
        match self.positions.get(&record.id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Remove every record
    pub fn reset(&mut self) -> Result<()> {
        self.records.clear();
        self.positions.clear();
        self.save_records()
    }

    /// Nearest records to a query, most similar first
    pub fn search(&self, query: &str, n_results: usize, filter: Option<&MetadataFilter>) -> Vec<SearchHit> {
        if n_results == 0 {
            return Vec::new();
        }

        let query_embedding = self.embedder.embed(query);
        let mut scored: Vec<(&IndexRecord, f32)> = self
            .records
            .iter()
            .filter(|record| record.matches(filter))
            .map(|record| (record, cosine_similarity(&query_embedding, &record.embedding)))
            .collect();

        scored.sort_by(|(_, a), (_, b)| b.total_cmp(a));

        scored
            .into_iter()
            .take(n_results)
            .map(|(record, similarity)| SearchHit {
                id: record.id.clone(),
                document: record.document.clone(),
                metadata: record.metadata.clone(),
                distance: 1.0 - similarity,
            })
            .collect()
    }

    /// Records matching a filter in insertion order
    pub fn get(&self, filter: Option<&MetadataFilter>, limit: usize) -> Vec<&IndexRecord> {
        self.records
            .iter()
            .filter(|record| record.matches(filter))
            .take(limit)
            .collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&IndexRecord> {
        self.positions.get(id).map(|&position| &self.records[position])
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct indexed file paths, sorted
    pub fn files(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| record.meta_str("file").to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn chunks_for_file(&self, file: &str) -> Vec<&IndexRecord> {
        let filter = MetadataFilter::from([("file".to_string(), MetadataValue::from(file))]);
        self.get(Some(&filter), usize::MAX)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_chunks: self.count(),
            total_files: self.files().len(),
            collection_name: COLLECTION_NAME.to_string(),
            embedding_model: self.embedder.name().to_string(),
        }
    }

    /// Save records to disk
    fn save_records(&self) -> Result<()> {
        let index_path = self.index_dir.join(INDEX_FILE);
        let tmp_path = self.index_dir.join(format!("{INDEX_FILE}.tmp"));

        {
            let file = File::create(&tmp_path)
                .with_context(|| format!("failed to write {}", tmp_path.display()))?;
            let writer = BufWriter::new(file);
            let persisted = PersistedIndex {
                collection: COLLECTION_NAME.to_string(),
                embedder: self.embedder.name().to_string(),
                dimension: self.embedder.dimension(),
                records: self.records.clone(),
            };
            serde_json::to_writer(writer, &persisted)?;
        }
        fs::rename(&tmp_path, &index_path)?;

        Ok(())
    }

    /// Load records from disk
    fn load_records(index_dir: &Path) -> Result<Option<PersistedIndex>> {
        let index_path = index_dir.join(INDEX_FILE);

        if !index_path.exists() {
            return Ok(None);
        }

        let file = File::open(&index_path)?;
        let reader = BufReader::new(file);
        let persisted = serde_json::from_reader(reader)
            .with_context(|| format!("corrupt index file {}", index_path.display()))?;

        Ok(Some(persisted))
    }
}

/// Flat metadata for a chunk, scalar frontmatter fields prefixed with `meta_`
pub fn chunk_metadata(chunk: &Chunk) -> Metadata {
    let file_name = chunk.file.rsplit('/').next().unwrap_or(&chunk.file);

    let mut metadata = Metadata::from([
        ("chunk_id".to_string(), MetadataValue::from(chunk.chunk_id.as_str())),
        ("file".to_string(), MetadataValue::from(chunk.file.as_str())),
        ("file_name".to_string(), MetadataValue::from(file_name)),
        ("title".to_string(), MetadataValue::from(chunk.title.as_str())),
        ("section_header".to_string(), MetadataValue::from(chunk.section_header.as_str())),
        ("section_level".to_string(), MetadataValue::Int(chunk.section_level as i64)),
        ("section_uri".to_string(), MetadataValue::from(chunk.section_uri.as_str())),
    ]);

    for (key, value) in &chunk.metadata {
        let value = match value {
            serde_yaml::Value::Bool(b) => MetadataValue::Bool(*b),
            serde_yaml::Value::String(s) => MetadataValue::Str(s.clone()),
            serde_yaml::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => MetadataValue::Int(i),
                (None, Some(f)) => MetadataValue::Float(f),
                _ => continue,
            },
            _ => continue,
        };
        metadata.insert(format!("meta_{key}"), value);
    }

    metadata
}
