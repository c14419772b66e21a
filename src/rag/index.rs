//! Embedding index construction and persistence.
//!
//! [`IndexBuilder::build`] chunks a document, embeds every retained chunk,
//! and produces an [`EmbeddingIndex`] whose position `i` always corresponds
//! to chunk `i` of the returned sequence. Chunks whose embedding call fails
//! are dropped from *both* sides so the pair can never drift out of
//! alignment. The two artifacts are persisted together and loaded together;
//! finding one without the other is an invariant violation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::chunker::chunk_document;
use super::embeddings::{EmbeddingProvider, check_dimension, l2_normalize};

/// Bounded fan-out for per-chunk embedding calls. Purely a throughput knob;
/// result order follows chunk order regardless.
const EMBED_CONCURRENCY: usize = 8;

/// Errors raised while building, persisting, or loading the index pair.
#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    /// Every embedding call failed (or the document produced no chunks).
    #[error("no embeddings could be produced for the document")]
    #[diagnostic(
        code(membersight::rag::no_embeddings),
        help("Check the embedding provider and that the document has extractable text.")
    )]
    NoEmbeddings,

    /// One of the co-located artifacts is missing.
    #[error("index artifact missing: {path}")]
    #[diagnostic(
        code(membersight::rag::missing_artifact),
        help("The vector index and chunk sequence must be written and read together; rebuild the index.")
    )]
    MissingArtifact { path: PathBuf },

    /// Filesystem failure while reading or writing artifacts.
    #[error("index io error: {0}")]
    #[diagnostic(code(membersight::rag::io))]
    Io(#[from] std::io::Error),

    /// Artifact (de)serialization failure.
    #[error("index serialization error: {0}")]
    #[diagnostic(code(membersight::rag::serde))]
    Serde(#[from] serde_json::Error),

    /// The source document could not be loaded.
    #[error("document source error: {message}")]
    #[diagnostic(code(membersight::rag::document_source))]
    DocumentSource { message: String },

    /// Query-time embedding failure.
    #[error(transparent)]
    #[diagnostic(code(membersight::rag::embedding))]
    Embedding(#[from] super::embeddings::EmbeddingError),
}

/// An immutable unit of indexed text plus its position in the persisted
/// sequence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentChunk {
    pub position: usize,
    pub text: String,
}

/// L2-normalized vector table searchable by inner product.
///
/// Position `i` indexes chunk `i` of the chunk sequence persisted alongside.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingIndex {
    pub dimension: usize,
    pub built_at: DateTime<Utc>,
    vectors: Vec<Vec<f32>>,
}

impl EmbeddingIndex {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Inner-product nearest-neighbor search.
    ///
    /// Returns up to `top_k` `(position, score)` pairs in descending score
    /// order. Vectors are unit length, so this ranks by cosine similarity.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| {
                let score: f32 = vector.iter().zip(query).map(|(a, b)| a * b).sum();
                (position, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);
        scored
    }
}

/// Filesystem layout of the co-located artifact pair.
#[derive(Clone, Debug)]
pub struct IndexPaths {
    pub index_path: PathBuf,
    pub chunks_path: PathBuf,
}

impl IndexPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            index_path: dir.join("index.json"),
            chunks_path: dir.join("chunks.json"),
        }
    }

    pub fn exists(&self) -> bool {
        self.index_path.exists() || self.chunks_path.exists()
    }
}

/// Builds the aligned `(EmbeddingIndex, chunk sequence)` pair from document
/// text and persists it.
pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
}

impl IndexBuilder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Chunk and embed a document.
    ///
    /// A chunk whose embedding call fails is logged and skipped (from both
    /// the vector table and the chunk sequence). Fails only when zero
    /// embeddings succeed.
    pub async fn build(
        &self,
        document_text: &str,
    ) -> Result<(EmbeddingIndex, Vec<DocumentChunk>), IndexError> {
        let raw_chunks = chunk_document(document_text);
        info!(chunk_count = raw_chunks.len(), "chunked document for indexing");

        let provider = Arc::clone(&self.provider);
        let dimension = self.provider.dimension();
        let embedded: Vec<Option<(String, Vec<f32>)>> = stream::iter(
            raw_chunks.into_iter().enumerate().map(|(idx, text)| {
                let provider = Arc::clone(&provider);
                async move {
                    let result = provider
                        .embed(&text)
                        .await
                        .and_then(|vector| check_dimension(dimension, &vector).map(|()| vector));
                    match result {
                        Ok(mut vector) => {
                            l2_normalize(&mut vector);
                            Some((text, vector))
                        }
                        Err(err) => {
                            warn!(chunk = idx, error = %err, "skipping chunk: embedding failed");
                            None
                        }
                    }
                }
            }),
        )
        .buffered(EMBED_CONCURRENCY)
        .collect()
        .await;

        let mut chunks = Vec::new();
        let mut vectors = Vec::new();
        for (text, vector) in embedded.into_iter().flatten() {
            chunks.push(DocumentChunk {
                position: chunks.len(),
                text,
            });
            vectors.push(vector);
        }

        if vectors.is_empty() {
            return Err(IndexError::NoEmbeddings);
        }

        let index = EmbeddingIndex {
            dimension: self.provider.dimension(),
            built_at: Utc::now(),
            vectors,
        };
        info!(index_size = index.len(), "embedding index built");
        Ok((index, chunks))
    }
}

/// Persist the index and chunk sequence together.
pub async fn save_pair(
    paths: &IndexPaths,
    index: &EmbeddingIndex,
    chunks: &[DocumentChunk],
) -> Result<(), IndexError> {
    if let Some(parent) = paths.index_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&paths.index_path, serde_json::to_vec(index)?).await?;
    tokio::fs::write(&paths.chunks_path, serde_json::to_vec(chunks)?).await?;
    debug!(index = %paths.index_path.display(), chunks = %paths.chunks_path.display(), "persisted index pair");
    Ok(())
}

/// Load the persisted pair, failing if either artifact is absent.
pub async fn load_pair(paths: &IndexPaths) -> Result<(EmbeddingIndex, Vec<DocumentChunk>), IndexError> {
    for path in [&paths.index_path, &paths.chunks_path] {
        if !path.exists() {
            return Err(IndexError::MissingArtifact { path: path.clone() });
        }
    }
    let index_bytes = tokio::fs::read(&paths.index_path).await?;
    let chunk_bytes = tokio::fs::read(&paths.chunks_path).await?;
    let index: EmbeddingIndex = serde_json::from_slice(&index_bytes)?;
    let chunks: Vec<DocumentChunk> = serde_json::from_slice(&chunk_bytes)?;
    if index.len() != chunks.len() {
        // Tolerated at load time; the retriever bound-checks every hit.
        warn!(
            index_size = index.len(),
            chunk_count = chunks.len(),
            "persisted index and chunk sequence disagree on length"
        );
    }
    Ok((index, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embeddings::{EmbeddingError, MockEmbeddingProvider};
    use async_trait::async_trait;

    const DOC: &str = "Retroactive terminations reduce prior counts when members are backdated out of coverage.\n\nNetwork identifier mapping changes can re-attribute whole provider groups to another organization.\n\nChurn patterns pair large drops with large additions while net change stays small.";

    /// Fails every other embedding call, by text content so concurrency
    /// cannot change which chunks succeed.
    struct FlakyProvider {
        inner: MockEmbeddingProvider,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("Network") {
                return Err(EmbeddingError::Provider {
                    message: "simulated outage".into(),
                });
            }
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    /// Returns a truncated vector for one chunk, keyed by content.
    struct ShortVectorProvider {
        inner: MockEmbeddingProvider,
    }

    #[async_trait]
    impl EmbeddingProvider for ShortVectorProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut vector = self.inner.embed(text).await?;
            if text.contains("Churn") {
                vector.truncate(10);
            }
            Ok(vector)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    struct DeadProvider;

    #[async_trait]
    impl EmbeddingProvider for DeadProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Provider {
                message: "always down".into(),
            })
        }

        fn dimension(&self) -> usize {
            64
        }
    }

    #[tokio::test]
    async fn build_keeps_index_and_chunks_aligned() {
        let builder = IndexBuilder::new(Arc::new(MockEmbeddingProvider::new()));
        let (index, chunks) = builder.build(DOC).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, i);
        }
    }

    #[tokio::test]
    async fn failed_embeddings_drop_chunk_from_both_sides() {
        let builder = IndexBuilder::new(Arc::new(FlakyProvider {
            inner: MockEmbeddingProvider::new(),
        }));
        let (index, chunks) = builder.build(DOC).await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.text.contains("Network")));
    }

    #[tokio::test]
    async fn mis_sized_vectors_drop_their_chunk_from_both_sides() {
        let builder = IndexBuilder::new(Arc::new(ShortVectorProvider {
            inner: MockEmbeddingProvider::new(),
        }));
        let (index, chunks) = builder.build(DOC).await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.text.contains("Churn")));
    }

    #[tokio::test]
    async fn zero_successful_embeddings_is_fatal() {
        let builder = IndexBuilder::new(Arc::new(DeadProvider));
        let err = builder.build(DOC).await.unwrap_err();
        assert!(matches!(err, IndexError::NoEmbeddings));
    }

    #[tokio::test]
    async fn persisted_pair_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        let builder = IndexBuilder::new(Arc::new(MockEmbeddingProvider::new()));
        let (index, chunks) = builder.build(DOC).await.unwrap();

        save_pair(&paths, &index, &chunks).await.unwrap();
        let (loaded_index, loaded_chunks) = load_pair(&paths).await.unwrap();
        assert_eq!(loaded_index.len(), index.len());
        assert_eq!(loaded_chunks, chunks);
    }

    #[tokio::test]
    async fn missing_sibling_artifact_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        let builder = IndexBuilder::new(Arc::new(MockEmbeddingProvider::new()));
        let (index, chunks) = builder.build(DOC).await.unwrap();
        save_pair(&paths, &index, &chunks).await.unwrap();

        tokio::fs::remove_file(&paths.chunks_path).await.unwrap();
        let err = load_pair(&paths).await.unwrap_err();
        assert!(matches!(err, IndexError::MissingArtifact { .. }));
    }

    #[tokio::test]
    async fn search_ranks_by_descending_similarity() {
        let provider = Arc::new(MockEmbeddingProvider::new());
        let builder = IndexBuilder::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);
        let (index, chunks) = builder.build(DOC).await.unwrap();

        let mut query = provider.embed(&chunks[1].text).await.unwrap();
        l2_normalize(&mut query);
        let hits = index.search(&query, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1, "a chunk's own text is its nearest neighbor");
        assert!(hits[0].1 >= hits[1].1);
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }
}
