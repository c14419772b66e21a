//! Structured fact records and the fact-store seam.
//!
//! The pipeline consumes two kinds of per-organization facts: one
//! [`MembershipRecord`] row and a list of [`ProviderChangeRecord`] entries.
//! Upstream stores deliver loosely typed rows (numbers sometimes arrive as
//! strings), so construction goes through total coercion helpers that default
//! to zero instead of failing.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coerce a loosely typed value to an integer count.
///
/// Accepts JSON numbers and numeric strings (including float-formatted ones
/// like `"1200.0"`). Anything unparseable, including null, yields zero.
pub fn coerce_int(value: Option<&Value>) -> i64 {
    coerce_float(value) as i64
}

/// Coerce a loosely typed value to a float, defaulting to zero.
pub fn coerce_float(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

/// One membership-impact row for an organization. Immutable once fetched.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MembershipRecord {
    pub org_cd: String,
    pub prior_members: i64,
    pub current_members: i64,
    pub dropped_count: i64,
    pub dropped_pct: f64,
    pub new_count: i64,
    pub new_pct: f64,
    pub net_change: i64,
    pub retro_term_count: i64,
    pub moved_from_org: Option<String>,
    pub moved_to_org: Option<String>,
}

impl MembershipRecord {
    /// Build a record from a raw row map, coercing every numeric field.
    ///
    /// Missing keys and unparseable values default to zero; the movement
    /// columns stay optional so the signal engine can distinguish absent
    /// from present-but-"null".
    pub fn from_row(org_cd: impl Into<String>, row: &FxHashMap<String, Value>) -> Self {
        Self {
            org_cd: org_cd.into(),
            prior_members: coerce_int(row.get("prior_members")),
            current_members: coerce_int(row.get("current_members")),
            dropped_count: coerce_int(row.get("dropped_count")),
            dropped_pct: coerce_float(row.get("dropped_pct")),
            new_count: coerce_int(row.get("new_count")),
            new_pct: coerce_float(row.get("new_pct")),
            net_change: coerce_int(row.get("net_change")),
            retro_term_count: coerce_int(row.get("retro_term_count")),
            moved_from_org: opt_string(row.get("moved_from_org_cd")),
            moved_to_org: opt_string(row.get("moved_to_org_cd")),
        }
    }
}

/// One provider configuration change entry for an organization.
///
/// `key_type` is a classifier; `keys_changed` and `test_type` are free-text
/// descriptions that the signal engine scans for marker substrings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderChangeRecord {
    pub key_type: String,
    pub keys_changed: String,
    pub test_type: String,
}

impl ProviderChangeRecord {
    pub fn new(
        key_type: impl Into<String>,
        keys_changed: impl Into<String>,
        test_type: impl Into<String>,
    ) -> Self {
        Self {
            key_type: key_type.into(),
            keys_changed: keys_changed.into(),
            test_type: test_type.into(),
        }
    }
}

/// Read-only source of membership and provider-change facts.
///
/// Implementations must never surface backend failures to the pipeline:
/// a failed membership lookup is `None`, a failed change lookup is an empty
/// list. Log the cause, return the benign shape.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Fetch the membership-impact row for an organization, if present.
    async fn membership(&self, org_cd: &str) -> Option<MembershipRecord>;

    /// Fetch provider configuration changes for an organization.
    async fn provider_changes(&self, org_cd: &str) -> Vec<ProviderChangeRecord>;
}

/// In-memory fact store for tests and demos.
#[derive(Default)]
pub struct StaticFactStore {
    memberships: FxHashMap<String, MembershipRecord>,
    changes: FxHashMap<String, Vec<ProviderChangeRecord>>,
}

impl StaticFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_membership(mut self, record: MembershipRecord) -> Self {
        self.memberships.insert(record.org_cd.clone(), record);
        self
    }

    #[must_use]
    pub fn with_changes(
        mut self,
        org_cd: impl Into<String>,
        changes: Vec<ProviderChangeRecord>,
    ) -> Self {
        self.changes.insert(org_cd.into(), changes);
        self
    }
}

#[async_trait]
impl FactStore for StaticFactStore {
    async fn membership(&self, org_cd: &str) -> Option<MembershipRecord> {
        self.memberships.get(org_cd).cloned()
    }

    async fn provider_changes(&self, org_cd: &str) -> Vec<ProviderChangeRecord> {
        self.changes.get(org_cd).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> FxHashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn coercion_accepts_numbers_and_numeric_strings() {
        assert_eq!(coerce_int(Some(&json!(1200))), 1200);
        assert_eq!(coerce_int(Some(&json!("1200"))), 1200);
        assert_eq!(coerce_int(Some(&json!("1200.0"))), 1200);
        assert_eq!(coerce_float(Some(&json!("12.5"))), 12.5);
    }

    #[test]
    fn coercion_defaults_to_zero_on_garbage() {
        assert_eq!(coerce_int(Some(&json!("not a number"))), 0);
        assert_eq!(coerce_int(Some(&Value::Null)), 0);
        assert_eq!(coerce_int(None), 0);
        assert_eq!(coerce_float(Some(&json!({"nested": true}))), 0.0);
    }

    #[test]
    fn from_row_tolerates_missing_and_string_typed_fields() {
        let record = MembershipRecord::from_row(
            "S5660_P801",
            &row(&[
                ("prior_members", json!("10000")),
                ("dropped_count", json!(1200)),
                ("dropped_pct", json!("12")),
                ("moved_from_org_cd", json!("ORG_002")),
            ]),
        );
        assert_eq!(record.prior_members, 10_000);
        assert_eq!(record.dropped_count, 1200);
        assert_eq!(record.dropped_pct, 12.0);
        assert_eq!(record.new_count, 0);
        assert_eq!(record.moved_from_org.as_deref(), Some("ORG_002"));
        assert_eq!(record.moved_to_org, None);
    }

    #[tokio::test]
    async fn static_store_returns_absent_for_unknown_org() {
        let store = StaticFactStore::new();
        assert!(store.membership("ORG_404").await.is_none());
        assert!(store.provider_changes("ORG_404").await.is_empty());
    }
}
