//! Similarity recall of previously asked questions.
//!
//! The question is embedded, every stored record is fetched, and an exact L2
//! index built over the fetched vectors picks the nearest ones. Results are
//! informational only and never feed back into generation.

pub mod chroma;
pub mod embedder;
pub mod index;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use self::embedder::Embedder;
use self::index::FlatL2Index;

pub type Embedding = Vec<f32>;

#[derive(Debug, Error)]
pub enum RecallError {
    #[error("Vector store unreachable: {0}")]
    Connectivity(String),
    #[error("Vector store error: {0}")]
    Store(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("top_k must be at least 1")]
    InvalidTopK,
    #[error("Recall configuration error: {0}")]
    Config(String),
}

/// A previously asked question and the SQL recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarQuestionRecord {
    pub id: String,
    pub question: String,
    pub sql_query: String,
    #[serde(skip)]
    pub embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallMatch {
    #[serde(flatten)]
    pub record: SimilarQuestionRecord,
    /// Squared L2 distance to the question embedding.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "matches", rename_all = "snake_case")]
pub enum RecallOutcome {
    /// The store holds no embeddings yet. Not an error.
    NoData,
    Matches(Vec<RecallMatch>),
}

impl RecallOutcome {
    pub fn matches(&self) -> &[RecallMatch] {
        match self {
            RecallOutcome::NoData => &[],
            RecallOutcome::Matches(matches) => matches,
        }
    }
}

/// Read/append access to the stored question embeddings.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<SimilarQuestionRecord>, RecallError>;

    async fn append(&self, record: SimilarQuestionRecord) -> Result<(), RecallError>;
}

pub struct SimilarityRecall {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn EmbeddingStore>,
}

impl SimilarityRecall {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn EmbeddingStore>) -> Self {
        Self { embedder, store }
    }

    pub async fn recall(&self, question: &str, top_k: usize) -> Result<RecallOutcome, RecallError> {
        if top_k == 0 {
            return Err(RecallError::InvalidTopK);
        }

        let question_embedding = self.embedder.embed(question).await?;
        let records = self.store.fetch_all().await?;

        if records.is_empty() {
            warn!("No embeddings found in the vector store");
            return Ok(RecallOutcome::NoData);
        }

        let mut index = FlatL2Index::new(question_embedding.len());
        for record in &records {
            index.add(&record.embedding)?;
        }

        // Hits are offsets into `records`
        let matches = index
            .search(&question_embedding, top_k)?
            .into_iter()
            .map(|(offset, distance)| RecallMatch {
                record: records[offset].clone(),
                distance,
            })
            .collect::<Vec<_>>();

        info!("Recalled {} similar questions out of {}", matches.len(), index.len());
        Ok(RecallOutcome::Matches(matches))
    }

    /// Stores a question/SQL pair for future recall.
    pub async fn remember(&self, question: &str, sql_query: &str) -> Result<SimilarQuestionRecord, RecallError> {
        let embedding = self.embedder.embed(question).await?;
        let record = SimilarQuestionRecord {
            id: record_id(),
            question: question.to_string(),
            sql_query: sql_query.to_string(),
            embedding,
        };

        self.store.append(record.clone()).await?;
        info!("Stored question {} for recall", record.id);
        Ok(record)
    }
}

fn record_id() -> String {
    let now = chrono::Utc::now();
    format!(
        "q-{}",
        now.timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros())
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Maps known texts to fixed vectors; anything else embeds to the origin.
    pub struct FixedEmbedder {
        pub vectors: Vec<(String, Embedding)>,
        pub dimension: usize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding, RecallError> {
            Ok(self
                .vectors
                .iter()
                .find(|(known, _)| known == text)
                .map(|(_, vector)| vector.clone())
                .unwrap_or_else(|| vec![0.0; self.dimension]))
        }
    }

    #[derive(Default)]
    pub struct MemoryStore {
        pub records: Mutex<Vec<SimilarQuestionRecord>>,
    }

    #[async_trait]
    impl EmbeddingStore for MemoryStore {
        async fn fetch_all(&self) -> Result<Vec<SimilarQuestionRecord>, RecallError> {
            Ok(self.records.lock().await.clone())
        }

        async fn append(&self, record: SimilarQuestionRecord) -> Result<(), RecallError> {
            self.records.lock().await.push(record);
            Ok(())
        }
    }

    pub fn record(id: &str, question: &str, sql_query: &str, embedding: &[f32]) -> SimilarQuestionRecord {
        SimilarQuestionRecord {
            id: id.to_string(),
            question: question.to_string(),
            sql_query: sql_query.to_string(),
            embedding: embedding.to_vec(),
        }
    }
}
