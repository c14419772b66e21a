//! Semantic retrieval over the rulebook document.
//!
//! ```text
//! Document text ──► chunker ──► DocumentChunk sequence
//!                       │
//!                       ▼
//!              IndexBuilder (embed + L2-normalize)
//!                       │
//!                       ▼
//!        EmbeddingIndex + chunks, persisted together
//!                       │
//!                       ▼
//!             VectorRetriever::retrieve(query, top_k)
//! ```

pub mod chunker;
pub mod embeddings;
pub mod index;
pub mod retriever;

pub use chunker::{MIN_CHUNK_CHARS, TARGET_CHUNK_CHARS, chunk_document};
pub use embeddings::{EmbeddingError, EmbeddingProvider, MockEmbeddingProvider, l2_normalize};
pub use index::{EmbeddingIndex, IndexBuilder, IndexError, IndexPaths};
pub use retriever::{DocumentSource, FileDocumentSource, StaticDocumentSource, VectorRetriever};
