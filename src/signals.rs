//! Deterministic analytical-signal derivation.
//!
//! [`derive`] turns one [`MembershipRecord`] and its provider-change list into
//! a fixed-shape [`SignalSet`]. The function is pure and total: it never
//! fails, and every threshold below is part of the contract the rest of the
//! pipeline (retrieval-query construction, prompt assembly, fallback
//! narration) depends on.

use serde::{Deserialize, Serialize};

use crate::facts::{MembershipRecord, ProviderChangeRecord};

/// Retroactive terminations dominate when they cover at least this share of drops.
pub const RETRO_DOMINANT_SHARE: f64 = 0.30;
/// Absolute drop count above which the drop is considered high.
pub const DROP_COUNT_HIGH: i64 = 50_000;
/// Drop percentage above which the drop is considered high.
pub const DROP_PCT_HIGH: f64 = 10.0;
/// Absolute new-member count above which additions are considered high.
pub const NEW_COUNT_HIGH: i64 = 30_000;
/// New-member percentage above which additions are considered high.
pub const NEW_PCT_HIGH: f64 = 8.0;
/// Net change is "small" for churn when below this share of drops.
pub const NET_SMALL_SHARE: f64 = 0.25;

/// Fixed-shape set of named signals derived per request. Never mutated after
/// construction.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SignalSet {
    pub dropped_count: i64,
    pub dropped_pct: f64,
    pub new_count: i64,
    pub new_pct: f64,
    pub net_change: i64,
    pub change_count: usize,
    pub movement: bool,
    pub retro_dominant: bool,
    pub drop_high: bool,
    pub churn: bool,
    pub has_termed_key: bool,
    pub has_file_id: bool,
    pub has_plan_carrier_id: bool,
    pub has_network_id: bool,
}

/// A movement org reference counts only when present and not the literal
/// string "null" (upstream exports sometimes serialize SQL NULL that way).
fn present_org(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| !v.eq_ignore_ascii_case("null"))
}

fn any_marker(changes: &[ProviderChangeRecord], marker: &str) -> bool {
    changes.iter().any(|change| {
        change.keys_changed.to_lowercase().contains(marker)
            || change.test_type.to_lowercase().contains(marker)
    })
}

/// Derive the full signal set from one membership record and its
/// provider-change list.
pub fn derive(record: &MembershipRecord, changes: &[ProviderChangeRecord]) -> SignalSet {
    let dropped_count = record.dropped_count;
    let dropped_pct = record.dropped_pct;
    let new_count = record.new_count;
    let new_pct = record.new_pct;
    let net_change = record.net_change;

    let movement = present_org(&record.moved_from_org) || present_org(&record.moved_to_org);

    let retro_dominant = dropped_count > 0
        && record.retro_term_count as f64 >= RETRO_DOMINANT_SHARE * dropped_count as f64;

    let dropped_high = dropped_count > DROP_COUNT_HIGH || dropped_pct > DROP_PCT_HIGH;
    let new_high = new_count > NEW_COUNT_HIGH || new_pct > NEW_PCT_HIGH;
    let net_small =
        dropped_count > 0 && (net_change.abs() as f64) < NET_SMALL_SHARE * dropped_count as f64;

    let has_termed_key = changes
        .iter()
        .any(|change| change.key_type.eq_ignore_ascii_case("termed key"));

    SignalSet {
        dropped_count,
        dropped_pct,
        new_count,
        new_pct,
        net_change,
        change_count: changes.len(),
        movement,
        retro_dominant,
        drop_high: dropped_high,
        churn: dropped_high && new_high && net_small,
        has_termed_key,
        has_file_id: any_marker(changes, "file_id"),
        has_plan_carrier_id: any_marker(changes, "plan_carrier_id"),
        has_network_id: any_marker(changes, "network_id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(dropped: i64, dropped_pct: f64, new: i64, new_pct: f64, net: i64) -> MembershipRecord {
        MembershipRecord {
            org_cd: "S5660_P801".into(),
            dropped_count: dropped,
            dropped_pct,
            new_count: new,
            new_pct,
            net_change: net,
            ..Default::default()
        }
    }

    #[test]
    fn derive_is_total_on_default_record() {
        let signals = derive(&MembershipRecord::default(), &[]);
        assert_eq!(signals.dropped_count, 0);
        assert_eq!(signals.change_count, 0);
        assert!(!signals.movement);
        assert!(!signals.retro_dominant);
        assert!(!signals.drop_high);
        assert!(!signals.churn);
    }

    #[test]
    fn movement_ignores_literal_null() {
        let mut rec = record(0, 0.0, 0, 0.0, 0);
        rec.moved_from_org = Some("NULL".into());
        assert!(!derive(&rec, &[]).movement);

        rec.moved_to_org = Some("ORG_002".into());
        assert!(derive(&rec, &[]).movement);
    }

    #[test]
    fn retro_dominant_boundary_is_thirty_percent_inclusive() {
        let mut rec = record(1000, 1.0, 0, 0.0, -1000);
        rec.retro_term_count = 300;
        assert!(derive(&rec, &[]).retro_dominant);

        rec.retro_term_count = 299;
        assert!(!derive(&rec, &[]).retro_dominant);

        // No drops means retro share is undefined, signal stays off.
        rec.dropped_count = 0;
        rec.retro_term_count = 300;
        assert!(!derive(&rec, &[]).retro_dominant);
    }

    #[test]
    fn drop_high_triggers_on_either_pct_or_count() {
        assert!(derive(&record(100, 10.5, 0, 0.0, -100), &[]).drop_high);
        assert!(derive(&record(50_001, 0.1, 0, 0.0, -100), &[]).drop_high);
        assert!(!derive(&record(50_000, 10.0, 0, 0.0, -100), &[]).drop_high);
    }

    #[test]
    fn churn_requires_all_three_clauses() {
        // Worked example: big drops, big adds, small net.
        let churning = record(60_000, 12.0, 35_000, 9.0, 5_000);
        assert!(derive(&churning, &[]).churn);

        // |20_000| >= 0.25 * 60_000, so the net-small clause fails.
        let net_large = record(60_000, 12.0, 35_000, 9.0, 20_000);
        assert!(!derive(&net_large, &[]).churn);

        // Additions too low.
        let quiet_adds = record(60_000, 12.0, 10_000, 2.0, 5_000);
        assert!(!derive(&quiet_adds, &[]).churn);

        // Zero drops disables the net-small clause entirely.
        let no_drops = record(0, 0.0, 35_000, 9.0, 0);
        assert!(!derive(&no_drops, &[]).churn);
    }

    #[test]
    fn provider_flags_match_markers_case_insensitively() {
        let changes = vec![
            ProviderChangeRecord::new("Termed Key", "", ""),
            ProviderChangeRecord::new("remap", "FILE_ID updated", ""),
            ProviderChangeRecord::new("remap", "", "plan_carrier_id swap"),
        ];
        let signals = derive(&MembershipRecord::default(), &changes);
        assert!(signals.has_termed_key);
        assert!(signals.has_file_id);
        assert!(signals.has_plan_carrier_id);
        assert!(!signals.has_network_id);
        assert_eq!(signals.change_count, 3);
    }

    #[test]
    fn termed_key_matches_key_type_only() {
        // "termed key" in free text is not the classifier match.
        let changes = vec![ProviderChangeRecord::new("remap", "termed key noted", "")];
        assert!(!derive(&MembershipRecord::default(), &changes).has_termed_key);
    }
}
