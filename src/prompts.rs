//! Prompt assembly: retrieval-query construction and the generation prompt.
//!
//! Everything in this module is a pure function of its inputs, so the exact
//! bytes handed to retrieval and generation are reproducible from facts and
//! signals alone.

use crate::controller::MembershipDisplay;
use crate::signals::SignalSet;

/// Separator used when joining retrieved rulebook chunks.
pub const RULES_SEPARATOR: &str = "\n\n---\n\n";

/// Maximum characters of joined rulebook context included in the prompt.
pub const RULES_CONTEXT_LIMIT: usize = 2000;

/// Base terms for every rulebook retrieval query.
pub const BASE_RETRIEVAL_QUERY: &str =
    "membership drop explanation rules provider configuration changes retro termination movement churn";

pub const SYSTEM_PROMPT: &str = "\
You are an expert data analyst specializing in membership impact analysis. Your role is to provide deep analytical reasoning and clear explanations.

**Your Analytical Approach:**
1. **Observe** - Start by clearly stating what the data shows (the facts)
2. **Analyze** - Examine patterns, relationships, and signals in the data
3. **Reason** - Connect the dots: explain WHY things happened based on the signals and patterns
4. **Explain** - Provide clear, logical explanations that help the user understand not just WHAT happened, but WHY it happened
5. **Contextualize** - Reference the rulebook framework to provide deeper insights when relevant

**Writing Style:**
- Write in a clear, analytical, conversational style
- Be CONCISE and direct - keep responses brief
- Use specific numbers: reference exact counts and percentages to support your reasoning

DO NOT use formal templates, structured formats, or sections like \"Summary:\", \"Likely reasons:\", \"Evidence used:\", \"Confidence:\". Just provide natural analytical reasoning with clear explanations.";

/// Build the rulebook retrieval query from the signal set.
///
/// Marker phrases are appended in fixed order, one per true signal, so the
/// query is a pure function of the signals.
pub fn build_retrieval_query(signals: &SignalSet) -> String {
    let mut query = String::from(BASE_RETRIEVAL_QUERY);
    if signals.retro_dominant {
        query.push_str(" retro_term_mem_count retroactive terminations");
    }
    if signals.has_termed_key {
        query.push_str(" termed key");
    }
    if signals.has_file_id {
        query.push_str(" file_id mapping");
    }
    if signals.has_plan_carrier_id {
        query.push_str(" plan_carrier_id carrier mapping");
    }
    if signals.has_network_id {
        query.push_str(" network_id network mapping");
    }
    query
}

/// Insert thousands separators: `1234567` → `"1,234,567"`.
pub fn fmt_count(n: i64) -> String {
    let negative = n < 0;
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Like [`fmt_count`] but with an explicit sign, `+` included for zero.
pub fn fmt_signed(n: i64) -> String {
    if n < 0 {
        fmt_count(n)
    } else {
        format!("+{}", fmt_count(n))
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Does the question read like it is about a membership drop?
pub fn asks_about_drop(query: &str) -> bool {
    let lower = query.to_lowercase();
    ["drop", "lose", "decreas", "down", "fell", "decline"]
        .iter()
        .any(|word| lower.contains(word))
}

/// One fixed sentence per true analytical signal, in fixed order.
fn signal_insights(display: &MembershipDisplay, signals: &SignalSet) -> Vec<String> {
    let mut insights = Vec::new();

    let has_drop = signals.dropped_count > 0 && signals.net_change < 0;
    let has_increase = signals.net_change > 0;
    if has_increase && signals.dropped_count == 0 {
        insights.push(format!(
            "KEY FINDING: Membership increased by {} members ({:.2}% growth). Zero members dropped.",
            fmt_count(signals.net_change),
            signals.new_pct
        ));
    } else if has_drop {
        insights.push(format!(
            "KEY FINDING: Membership decreased by {} members ({:.2}% drop).",
            fmt_count(signals.net_change.abs()),
            signals.dropped_pct
        ));
    } else if has_increase {
        insights.push(format!(
            "KEY FINDING: Membership increased by {} members ({:.2}% growth), despite {} members dropping.",
            fmt_count(signals.net_change),
            signals.new_pct,
            fmt_count(signals.dropped_count)
        ));
    }

    if signals.movement {
        insights.push(
            "ANALYTICAL SIGNAL: Membership movement detected - members were reassigned between organizations (moved_to/moved_from indicators present)."
                .to_string(),
        );
    }

    if signals.retro_dominant && signals.dropped_count > 0 {
        let retro_pct =
            display.retro_term_count as f64 / signals.dropped_count as f64 * 100.0;
        insights.push(format!(
            "ANALYTICAL SIGNAL: Retroactive terminations ({} members, {:.1}% of drops) suggest data corrections or backdated terminations.",
            fmt_count(display.retro_term_count),
            retro_pct
        ));
    }

    let config_changes = config_change_labels(signals, true);
    if !config_changes.is_empty() {
        insights.push(format!(
            "ANALYTICAL SIGNAL: Provider configuration changes detected: {}. These mapping changes can re-attribute membership between organizations.",
            config_changes.join(", ")
        ));
    }

    if signals.churn {
        insights.push(
            "ANALYTICAL PATTERN: High churn pattern detected - significant drops offset by significant additions, suggesting reclassification or member movement."
                .to_string(),
        );
    }

    insights
}

/// Human labels for the provider-configuration flags, fixed order.
pub fn config_change_labels(signals: &SignalSet, include_termed_key: bool) -> Vec<&'static str> {
    let mut labels = Vec::new();
    if signals.has_network_id {
        labels.push("network ID mapping");
    }
    if signals.has_plan_carrier_id {
        labels.push("plan carrier ID mapping");
    }
    if signals.has_file_id {
        labels.push("file ID mapping");
    }
    if include_termed_key && signals.has_termed_key {
        labels.push("termed key configuration");
    }
    labels
}

/// Assemble the full generation prompt.
pub fn build_response_prompt(
    display: &MembershipDisplay,
    signals: &SignalSet,
    rules_text: &str,
    change_count: usize,
    query: &str,
) -> String {
    let net_pct = if display.prior_members > 0 {
        signals.net_change as f64 / display.prior_members as f64 * 100.0
    } else {
        0.0
    };

    let insights = signal_insights(display, signals);
    let insight_lines: String = insights
        .iter()
        .map(|insight| format!("- {insight}\n"))
        .collect();

    let rules_section = if rules_text.trim().is_empty() {
        "No specific rules retrieved"
    } else {
        truncate_chars(rules_text, RULES_CONTEXT_LIMIT)
    };

    let mut prompt = format!(
        "Question: \"{query}\"\n\n\
You're analyzing membership data for {org}. Here's what the data shows:\n\n\
**Membership Metrics:**\n\
- Prior period: {prior} members\n\
- Current period: {current} members\n\
- Net change: {net} members ({net_pct:+.2}% change)\n\n\
**Member Movement:**\n\
- Dropped: {dropped} members ({dropped_pct:.2}% of prior period)\n\
- New: {new} members ({new_pct:.2}% of prior period)\n\
- Retroactive terminations: {retro} members\n\n\
**Analytical Signals:**\n\
{insight_lines}\n\
**Provider Configuration Changes:** {change_count} change(s) detected\n\n\
**Relevant Analysis Framework (from rulebook):**\n\
{rules_section}\n\n\
**Your Task - Provide Analytical Reasoning:**\n\n\
Answer the user's question: state the facts first, explain the patterns the \
numbers reveal, reason about causes from the analytical signals, and close \
with the key insight.\n\n\
IMPORTANT: Write exactly 4 paragraphs, each 2-3 lines long:\n\n\
Paragraph 1: Answer the question directly and state the key finding (what happened and by how much).\n\n\
Paragraph 2: Explain the main cause based on the data signals.\n\n\
Paragraph 3: Provide reasoning from the rulebook framework - reference the relevant rules from the rulebook context above.\n\n\
Paragraph 4: Conclude with the key insight or what this means for the organization.\n\n\
Keep each paragraph concise (2-3 lines each, total ~100-120 words). Make sure Paragraph 3 specifically references the rulebook context provided.\n",
        org = display.org_cd,
        prior = fmt_count(display.prior_members),
        current = fmt_count(display.current_members),
        net = fmt_signed(signals.net_change),
        dropped = fmt_count(signals.dropped_count),
        dropped_pct = signals.dropped_pct,
        new = fmt_count(signals.new_count),
        new_pct = signals.new_pct,
        retro = fmt_count(display.retro_term_count),
    );

    if asks_about_drop(query) && signals.net_change > 0 {
        prompt.push_str(
            "\nIMPORTANT CORRECTION: The user asked about a membership drop, but the data shows membership INCREASED.\n\
Start your answer by directly and clearly correcting this, then explain what the data actually shows and what drove the increase.\n",
        );
    }

    prompt
}
