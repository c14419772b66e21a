//! Embedding provider seam and deterministic mock.
//!
//! The same provider instance embeds both document chunks and retrieval
//! queries; mixing providers (or normalization schemes) between build time
//! and query time breaks the similarity space.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by embedding providers.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    /// The upstream embedding service rejected or failed the request.
    #[error("embedding provider error: {message}")]
    #[diagnostic(code(membersight::rag::embedding_provider))]
    Provider { message: String },

    /// The provider returned a vector of unexpected dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    #[diagnostic(
        code(membersight::rag::embedding_dimension),
        help("All vectors in one index must come from the same model.")
    )]
    DimensionMismatch { expected: usize, got: usize },
}

/// Produces fixed-dimension float vectors for text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text into a vector of [`dimension`](Self::dimension) floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimension of vectors this provider produces.
    fn dimension(&self) -> usize;
}

/// Validate a provider result against the expected dimension.
///
/// Every vector entering one index must have the index's dimension; a
/// mis-sized vector would silently corrupt similarity scores.
pub fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(EmbeddingError::DimensionMismatch {
            expected,
            got: vector.len(),
        })
    }
}

/// Scale a vector to unit L2 norm in place.
///
/// With every stored vector and every query vector normalized, inner-product
/// search ranks identically to cosine similarity. Zero vectors are left
/// untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Deterministic, offline embedding provider for tests and demos.
///
/// Hashes lowercase whitespace tokens into a fixed number of buckets, so
/// identical text always produces identical vectors and lexically similar
/// text lands nearby. Not a semantic model; good enough to exercise the
/// index and retriever deterministically.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimension: 64 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a, stable across runs and platforms.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            vector[self.bucket(token)] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let a1 = provider.embed("membership drop rules").await.unwrap();
        let a2 = provider.embed("membership drop rules").await.unwrap();
        let b = provider.embed("network mapping changes").await.unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(a1.len(), provider.dimension());
    }

    #[test]
    fn dimension_check_rejects_mis_sized_vectors() {
        assert!(check_dimension(64, &vec![0.0; 64]).is_ok());
        let err = check_dimension(64, &vec![0.0; 10]).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch { expected: 64, got: 10 }
        ));
    }

    #[test]
    fn normalization_yields_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
