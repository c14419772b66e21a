//! Lazily-loaded vector retrieval over the persisted index pair.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::embeddings::{EmbeddingProvider, check_dimension, l2_normalize};
use super::index::{
    DocumentChunk, EmbeddingIndex, IndexBuilder, IndexError, IndexPaths, load_pair, save_pair,
};

/// Source of the raw rulebook text used for a rebuild.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self) -> Result<String, IndexError>;
}

/// Reads the document from a file on disk.
pub struct FileDocumentSource {
    path: PathBuf,
}

impl FileDocumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentSource for FileDocumentSource {
    async fn load(&self) -> Result<String, IndexError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| IndexError::DocumentSource {
                message: format!("{}: {err}", self.path.display()),
            })
    }
}

/// Serves a fixed in-memory document. Test and demo convenience.
pub struct StaticDocumentSource {
    text: String,
}

impl StaticDocumentSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl DocumentSource for StaticDocumentSource {
    async fn load(&self) -> Result<String, IndexError> {
        Ok(self.text.clone())
    }
}

struct Loaded {
    index: EmbeddingIndex,
    chunks: Vec<DocumentChunk>,
}

/// Top-k similarity retrieval backed by the persisted index pair.
///
/// The pair is loaded on first use and shared read-only between concurrent
/// retrievals. A rebuild (only when no persisted index exists) runs under
/// the write lock, so two callers cannot race to write the same artifacts.
pub struct VectorRetriever {
    provider: Arc<dyn EmbeddingProvider>,
    source: Arc<dyn DocumentSource>,
    paths: IndexPaths,
    loaded: RwLock<Option<Arc<Loaded>>>,
}

impl VectorRetriever {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        source: Arc<dyn DocumentSource>,
        paths: IndexPaths,
    ) -> Self {
        Self {
            provider,
            source,
            paths,
            loaded: RwLock::new(None),
        }
    }

    /// Return up to `top_k` chunk texts ranked by descending similarity.
    ///
    /// Hits pointing past the end of the chunk sequence are silently
    /// dropped. An empty index yields an empty result, not an error.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, IndexError> {
        let loaded = self.ensure_loaded().await?;
        if loaded.index.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_vec = self.provider.embed(query).await?;
        check_dimension(loaded.index.dimension, &query_vec)?;
        l2_normalize(&mut query_vec);

        let hits = loaded.index.search(&query_vec, top_k);
        debug!(top_k, hits = hits.len(), "retrieval complete");
        Ok(hits
            .into_iter()
            .filter_map(|(position, _score)| {
                loaded.chunks.get(position).map(|chunk| chunk.text.clone())
            })
            .collect())
    }

    async fn ensure_loaded(&self) -> Result<Arc<Loaded>, IndexError> {
        if let Some(loaded) = self.loaded.read().await.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let mut guard = self.loaded.write().await;
        // Another task may have finished loading while we waited.
        if let Some(loaded) = guard.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        let loaded = if self.paths.exists() {
            let (index, chunks) = load_pair(&self.paths).await?;
            info!(index_size = index.len(), "loaded persisted index pair");
            Loaded { index, chunks }
        } else {
            info!("no persisted index found, building");
            let text = self.source.load().await?;
            let builder = IndexBuilder::new(Arc::clone(&self.provider));
            let (index, chunks) = builder.build(&text).await?;
            save_pair(&self.paths, &index, &chunks).await?;
            Loaded { index, chunks }
        };

        let loaded = Arc::new(loaded);
        *guard = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}
