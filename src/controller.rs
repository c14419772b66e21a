//! Orchestration of one analysis request.
//!
//! A request moves through a fixed sequence: extract the organization code,
//! fetch facts, derive signals, build the retrieval query, retrieve rulebook
//! context, assemble the prompt, generate, and recover deterministically when
//! generation produces nothing. Every path ends in an [`AnalysisResult`];
//! nothing in the pipeline surfaces an error to the end user.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::facts::{FactStore, MembershipRecord};
use crate::generation::{GenerationClient, GenerationOutcome, collect_stream};
use crate::prompts::{
    RULES_SEPARATOR, SYSTEM_PROMPT, build_response_prompt, build_retrieval_query,
    config_change_labels, fmt_count, fmt_signed,
};
use crate::rag::{EmbeddingProvider, FileDocumentSource, IndexPaths, VectorRetriever};
use crate::session::SessionStore;
use crate::signals::{self, SignalSet};

static ORG_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]\d{4}_P\d{3}").expect("org code pattern"));

static ORG_CODE_LEGACY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)org[_\s]*(\d+)").expect("legacy org code pattern"));

/// Default identity for the controller's conversation.
const DEFAULT_USER_ID: &str = "dashboard_user";

/// Provenance of the answer text in an [`AnalysisResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// Text came from the generation capability.
    Primary,
    /// Text was synthesized deterministically from facts and signals.
    Fallback,
    /// The query contained no recognizable organization code.
    NoOrg,
    /// The fact store had no row for the organization.
    NoData,
}

/// Membership metrics prepared for display and prompt assembly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MembershipDisplay {
    pub org_cd: String,
    pub prior_members: i64,
    pub current_members: i64,
    pub dropped_count: i64,
    pub dropped_pct: f64,
    pub new_count: i64,
    pub new_pct: f64,
    pub net_change: i64,
    pub movement: bool,
    pub retro_term_count: i64,
}

impl MembershipDisplay {
    fn from_record(record: &MembershipRecord, signals: &SignalSet) -> Self {
        Self {
            org_cd: record.org_cd.clone(),
            prior_members: record.prior_members,
            current_members: record.current_members,
            dropped_count: signals.dropped_count,
            dropped_pct: signals.dropped_pct,
            new_count: signals.new_count,
            new_pct: signals.new_pct,
            net_change: signals.net_change,
            movement: signals.movement,
            retro_term_count: record.retro_term_count,
        }
    }
}

/// Complete outcome of one analysis request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub text: String,
    pub data: Option<MembershipDisplay>,
    pub signals: SignalSet,
    pub org_cd: Option<String>,
    pub source: AnalysisSource,
}

impl AnalysisResult {
    fn terminal(text: impl Into<String>, org_cd: Option<String>, source: AnalysisSource) -> Self {
        Self {
            text: text.into(),
            data: None,
            signals: SignalSet::default(),
            org_cd,
            source,
        }
    }
}

/// Extract an organization code from free-form text.
///
/// Prefers the `S5660_P801` grammar; falls back to `ORG 3` / `org_12`
/// style references, zero-padded to three digits.
pub fn extract_org_cd(query: &str) -> Option<String> {
    if let Some(found) = ORG_CODE.find(query) {
        return Some(found.as_str().to_string());
    }
    ORG_CODE_LEGACY
        .captures(query)
        .map(|caps| format!("ORG_{:0>3}", &caps[1]))
}

/// Sequences fact lookup, signal derivation, retrieval, generation, and
/// fallback recovery for membership questions.
///
/// One controller owns one `(user, session)` conversation pair for its
/// lifetime; the pair is re-asserted before every generation call.
pub struct AnalysisController {
    facts: Arc<dyn FactStore>,
    generator: Arc<dyn GenerationClient>,
    retriever: Arc<VectorRetriever>,
    sessions: Arc<SessionStore>,
    user_id: String,
    session_id: String,
    generation_timeout: Duration,
    top_k: usize,
}

impl AnalysisController {
    pub fn builder() -> AnalysisControllerBuilder {
        AnalysisControllerBuilder::default()
    }

    /// Wire a controller from ambient configuration.
    ///
    /// The rulebook document, index location, timeout, and top-k come from
    /// `config`; the fact store, generation transport, and embedding
    /// provider are runtime seams the caller supplies.
    pub fn from_config(
        config: &Config,
        facts: Arc<dyn FactStore>,
        generator: Arc<dyn GenerationClient>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let retriever = Arc::new(VectorRetriever::new(
            provider,
            Arc::new(FileDocumentSource::new(&config.document_path)),
            IndexPaths::in_dir(&config.index_dir),
        ));
        Self::builder()
            .facts(facts)
            .generator(generator)
            .retriever(retriever)
            .generation_timeout(config.generation_timeout)
            .top_k(config.top_k)
            .build()
    }

    /// Run the full pipeline for one question.
    pub async fn analyze(&self, query: &str) -> AnalysisResult {
        let Some(org_cd) = extract_org_cd(query) else {
            return AnalysisResult::terminal(
                "Please specify an organization code like S5660_P801 or ORG_003.",
                None,
                AnalysisSource::NoOrg,
            );
        };

        let Some(record) = self.facts.membership(&org_cd).await else {
            info!(org = %org_cd, "no membership record found");
            return AnalysisResult::terminal(
                format!("No data found for {org_cd}. Please check the organization code."),
                Some(org_cd),
                AnalysisSource::NoData,
            );
        };

        let changes = self.facts.provider_changes(&org_cd).await;
        let signals = signals::derive(&record, &changes);
        let display = MembershipDisplay::from_record(&record, &signals);

        let rules_text = self.retrieve_rules(&signals).await;
        let prompt = format!(
            "{SYSTEM_PROMPT}\n\n{}",
            build_response_prompt(&display, &signals, &rules_text, changes.len(), query)
        );

        match self.generate(&prompt).await {
            GenerationOutcome::Text(text) => {
                self.sessions.record_turn(&self.user_id, &self.session_id);
                AnalysisResult {
                    text,
                    data: Some(display),
                    signals,
                    org_cd: Some(org_cd),
                    source: AnalysisSource::Primary,
                }
            }
            GenerationOutcome::Empty | GenerationOutcome::Failed(_) => {
                let text = fallback_text(&display, &signals, query);
                AnalysisResult {
                    text,
                    data: Some(display),
                    signals,
                    org_cd: Some(org_cd),
                    source: AnalysisSource::Fallback,
                }
            }
        }
    }

    /// Retrieve rulebook context for the signal-derived query.
    ///
    /// Retrieval problems degrade to empty context; the request continues.
    async fn retrieve_rules(&self, signals: &SignalSet) -> String {
        let rag_query = build_retrieval_query(signals);
        match self.retriever.retrieve(&rag_query, self.top_k).await {
            Ok(chunks) => chunks.join(RULES_SEPARATOR),
            Err(err) => {
                warn!(error = %err, "rulebook retrieval failed, continuing without context");
                String::new()
            }
        }
    }

    async fn generate(&self, prompt: &str) -> GenerationOutcome {
        let (session, _init) = self.sessions.get_or_create(&self.user_id, &self.session_id);

        let attempt = async {
            match self.generator.generate(prompt, &session).await {
                Ok(stream) => collect_stream(stream).await,
                Err(err) => GenerationOutcome::Failed(err.to_string()),
            }
        };

        match tokio::time::timeout(self.generation_timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout = ?self.generation_timeout, "generation timed out");
                GenerationOutcome::Failed("generation timed out".to_string())
            }
        }
    }
}

/// Deterministic explanation synthesized from display fields and signals.
///
/// Narrative order is fixed: state the facts, describe the movement split,
/// reason about causes from the true signals, then note a churn pattern.
/// Has no external dependency and cannot fail.
fn fallback_text(display: &MembershipDisplay, signals: &SignalSet, query: &str) -> String {
    let mut text = format!("Analysis for {}:\n\n", display.org_cd);

    let net = signals.net_change;
    // The correction here keys on the literal word only; the broader
    // drop-phrasing check belongs to the prompt-side correction block.
    if query.to_lowercase().contains("drop") && net > 0 {
        text.push_str(&format!(
            "Actually, membership didn't drop - it increased by {} members ({:.2}% growth). ",
            fmt_count(net),
            signals.new_pct
        ));
        text.push_str(&format!(
            "The organization grew from {} to {} members. ",
            fmt_count(display.prior_members),
            fmt_count(display.current_members)
        ));
    } else if net < 0 {
        text.push_str(&format!(
            "Membership decreased by {} members ({:.2}% drop), from {} to {} members. ",
            fmt_count(net.abs()),
            signals.dropped_pct,
            fmt_count(display.prior_members),
            fmt_count(display.current_members)
        ));
    } else {
        let change_pct = if display.prior_members > 0 {
            net as f64 / display.prior_members as f64 * 100.0
        } else {
            0.0
        };
        text.push_str(&format!(
            "Membership changed by {} members ({:+.2}% change), from {} to {} members. ",
            fmt_signed(net),
            change_pct,
            fmt_count(display.prior_members),
            fmt_count(display.current_members)
        ));
    }

    if signals.dropped_count > 0 || signals.new_count > 0 {
        text.push_str(&format!(
            "\n\nLooking at member movement: {} members dropped ({:.2}% of prior period) while {} new members were added ({:.2}% of prior period). ",
            fmt_count(signals.dropped_count),
            signals.dropped_pct,
            fmt_count(signals.new_count),
            signals.new_pct
        ));
        if signals.dropped_count > 0 && signals.new_count == 0 {
            text.push_str(
                "The net decrease is entirely due to dropped members with no new additions. ",
            );
        } else if signals.new_count > signals.dropped_count {
            text.push_str(&format!(
                "The net increase suggests that new member additions ({}) outweighed the drops ({}). ",
                fmt_count(signals.new_count),
                fmt_count(signals.dropped_count)
            ));
        } else if signals.dropped_count > signals.new_count {
            text.push_str(&format!(
                "The net decrease indicates that member drops ({}) exceeded new additions ({}). ",
                fmt_count(signals.dropped_count),
                fmt_count(signals.new_count)
            ));
        }
    }

    let mut causes = Vec::new();
    if signals.movement {
        causes.push(
            "membership movement between organizations (suggesting re-attribution or reassignment of members)"
                .to_string(),
        );
    }
    if signals.retro_dominant && signals.dropped_count > 0 {
        let retro_pct =
            display.retro_term_count as f64 / signals.dropped_count as f64 * 100.0;
        causes.push(format!(
            "retroactive terminations ({} members, {:.1}% of drops, suggesting data corrections or backdated terminations)",
            fmt_count(display.retro_term_count),
            retro_pct
        ));
    }
    let config_changes = config_change_labels(signals, false);
    if !config_changes.is_empty() {
        causes.push(format!(
            "provider configuration changes ({} changes that can re-attribute membership)",
            config_changes.join(", ")
        ));
    }

    if !causes.is_empty() {
        text.push_str(&format!(
            "\n\nThe data shows several indicators that help explain this change: {}. ",
            causes.join(", ")
        ));
        text.push_str(
            "These signals suggest that the membership change may be related to data reclassification, member reassignment, or configuration updates rather than actual membership loss or gain.",
        );
    }

    if signals.churn {
        text.push_str(
            "\n\nThis pattern of high drops offset by high additions (churn pattern) typically indicates member reclassification or movement between organizations rather than actual membership loss.",
        );
    }

    text
}

/// Builder for [`AnalysisController`].
#[derive(Default)]
pub struct AnalysisControllerBuilder {
    facts: Option<Arc<dyn FactStore>>,
    generator: Option<Arc<dyn GenerationClient>>,
    retriever: Option<Arc<VectorRetriever>>,
    sessions: Option<Arc<SessionStore>>,
    user_id: Option<String>,
    session_id: Option<String>,
    generation_timeout: Option<Duration>,
    top_k: Option<usize>,
}

impl AnalysisControllerBuilder {
    #[must_use]
    pub fn facts(mut self, facts: Arc<dyn FactStore>) -> Self {
        self.facts = Some(facts);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn retriever(mut self, retriever: Arc<VectorRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Share a session store between controllers. Defaults to a fresh store.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Pin the session identifier. Defaults to a fresh UUID per controller.
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Maximum wall-clock time for one generation call. Defaults to 30s.
    #[must_use]
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = Some(timeout);
        self
    }

    /// Number of rulebook chunks to retrieve. Defaults to 4.
    #[must_use]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Build the controller.
    ///
    /// # Panics
    ///
    /// Panics if `facts`, `generator`, or `retriever` was not provided.
    pub fn build(self) -> AnalysisController {
        AnalysisController {
            facts: self.facts.expect("AnalysisControllerBuilder requires a fact store"),
            generator: self
                .generator
                .expect("AnalysisControllerBuilder requires a generation client"),
            retriever: self
                .retriever
                .expect("AnalysisControllerBuilder requires a retriever"),
            sessions: self.sessions.unwrap_or_default(),
            user_id: self.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            session_id: self
                .session_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            generation_timeout: self.generation_timeout.unwrap_or(Duration::from_secs(30)),
            top_k: self.top_k.unwrap_or(4),
        }
    }
}
