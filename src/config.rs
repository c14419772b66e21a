//! Environment-driven configuration.
//!
//! Everything has a default, so `Config::from_env()` never fails; a `.env`
//! file is honored when present.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the analysis pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    /// Source rulebook document (extracted text).
    pub document_path: PathBuf,
    /// Directory holding the persisted index pair.
    pub index_dir: PathBuf,
    /// Generation model name passed to the transport.
    pub chat_model: String,
    /// Embedding model name passed to the embedding provider.
    pub embedding_model: String,
    /// Caller-visible timeout for one generation call.
    pub generation_timeout: Duration,
    /// Rulebook chunks retrieved per request.
    pub top_k: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            document_path: std::env::var("MEMBERSIGHT_DOCUMENT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/membership_rulebook.txt")),
            index_dir: std::env::var("MEMBERSIGHT_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".rag_index")),
            chat_model: std::env::var("MEMBERSIGHT_CHAT_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            embedding_model: std::env::var("MEMBERSIGHT_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-004".to_string()),
            generation_timeout: std::env::var("MEMBERSIGHT_GENERATION_TIMEOUT_SECS")
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(30)),
            top_k: std::env::var("MEMBERSIGHT_TOP_K")
                .ok()
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(4),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            document_path: PathBuf::from("data/membership_rulebook.txt"),
            index_dir: PathBuf::from(".rag_index"),
            chat_model: "gemini-2.5-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            generation_timeout: Duration::from_secs(30),
            top_k: 4,
        }
    }
}
