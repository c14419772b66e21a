//! Paragraph-bounded chunking with a sentence-accumulation fallback.

use std::sync::LazyLock;

use regex::Regex;

/// Chunks shorter than this are discarded as noise (page numbers, stray
/// heading fragments from text extraction).
pub const MIN_CHUNK_CHARS: usize = 50;

/// Target length for the sentence-accumulation fallback path.
pub const TARGET_CHUNK_CHARS: usize = 500;

static PARAGRAPH_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n|\n#").expect("paragraph boundary pattern"));

static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(.*?[.!?])(?:\s+|\z)").expect("sentence boundary pattern"));

/// Split extracted document text into retrieval chunks.
///
/// Primary strategy splits at paragraph and heading boundaries and drops
/// anything under [`MIN_CHUNK_CHARS`]. Documents with no blank-line structure
/// (single-block text extraction) fall back to accumulating sentences until a
/// chunk reaches [`TARGET_CHUNK_CHARS`]; the trailing partial chunk is kept.
pub fn chunk_document(text: &str) -> Vec<String> {
    let chunks: Vec<String> = PARAGRAPH_BOUNDARY
        .split(text)
        .map(str::trim)
        .filter(|chunk| chunk.len() > MIN_CHUNK_CHARS)
        .map(str::to_string)
        .collect();

    if !chunks.is_empty() {
        return chunks;
    }

    sentence_chunks(text)
}

fn sentence_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut consumed = 0;

    for capture in SENTENCE_BOUNDARY.captures_iter(text) {
        let whole = capture.get(0).expect("capture 0 always present");
        consumed = whole.end();
        current.push_str(capture[1].trim());
        current.push(' ');
        if current.len() > TARGET_CHUNK_CHARS {
            chunks.push(current.trim().to_string());
            current.clear();
        }
    }

    // Trailing text without terminal punctuation still belongs to the final chunk.
    let tail = text[consumed..].trim();
    if !tail.is_empty() {
        current.push_str(tail);
    }
    let last = current.trim();
    if !last.is_empty() {
        chunks.push(last.to_string());
    }

    chunks
}
