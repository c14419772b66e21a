//! # Membersight: retrieval-augmented membership-impact analysis
//!
//! Answers natural-language questions about membership-count changes for an
//! organization by combining three deterministic inputs - structured fact
//! lookup, semantic retrieval over a rulebook document, and derived
//! analytical signals - into a generation request, with a data-driven
//! fallback explanation when generation is unavailable or empty.
//!
//! ```text
//! query ──► extract org ──► FactStore ──► signals::derive ──► SignalSet
//!                                                  │
//!                            retrieval query ◄─────┘
//!                                  │
//!                       VectorRetriever (rulebook chunks)
//!                                  │
//!                       prompt assembly ──► GenerationClient
//!                                  │               │
//!                            AnalysisResult ◄── fallback on failure
//! ```
//!
//! ## Module Guide
//!
//! - [`facts`] - membership/provider-change records and the fact-store seam
//! - [`signals`] - the deterministic signal engine and its thresholds
//! - [`rag`] - chunking, embedding index, and vector retrieval
//! - [`session`] - conversation identity for generation continuity
//! - [`generation`] - the generation seam and stream-drain contract
//! - [`prompts`] - retrieval-query and prompt assembly
//! - [`controller`] - the per-request orchestration pipeline
//! - [`config`] - environment configuration

pub mod config;
pub mod controller;
pub mod facts;
pub mod generation;
pub mod prompts;
pub mod rag;
pub mod session;
pub mod signals;

pub use config::Config;
pub use controller::{AnalysisController, AnalysisResult, AnalysisSource, extract_org_cd};
pub use signals::SignalSet;
