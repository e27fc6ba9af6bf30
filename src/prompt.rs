//! prompt.rs — size-bounded prompt construction.
//!
//! Determinism contract: given the same snapshot or summary input, the
//! builder emits byte-identical text. No clocks, no randomness; the only
//! dates present are the data's own year labels. Tests assert on fixed
//! strings, so wording changes here are breaking changes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::snapshot::CouncilDataSnapshot;

/// Tone/length variant requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Full financial summary, up to 20 words per factoid.
    Standard,
    /// Tighter output for embedding in small widgets, 12 words per factoid.
    Concise,
}

impl PromptStyle {
    fn max_words(self) -> usize {
        match self {
            PromptStyle::Standard => 20,
            PromptStyle::Concise => 12,
        }
    }
}

const INSIGHT_VOCABULARY: &str =
    "trend, comparison, peak, change, ranking, efficiency, volatility, general";

fn output_contract(out: &mut String, limit: usize, max_words: usize) {
    let _ = writeln!(out, "REQUIREMENTS:");
    let _ = writeln!(out, "- Produce exactly {limit} factoids.");
    let _ = writeln!(out, "- Each factoid is at most {max_words} words.");
    let _ = writeln!(
        out,
        "- Respond with a JSON array only, no prose and no code fences."
    );
    let _ = writeln!(
        out,
        "- Each element: {{\"text\": \"...\", \"insight_type\": \"...\", \"confidence\": 0.8}}"
    );
    let _ = writeln!(out, "- Allowed insight_type values: {INSIGHT_VOCABULARY}.");
    let _ = writeln!(
        out,
        "- Example: [{{\"text\": \"Debt rose 58% since 2019\", \"insight_type\": \"trend\", \"confidence\": 0.8}}]"
    );
}

/// Build the single-council prompt.
///
/// Metrics with fewer than 2 data points contribute the latest value only,
/// without a change figure; metrics with none are absent.
pub fn build_council_prompt(
    snapshot: &CouncilDataSnapshot,
    limit: usize,
    style: PromptStyle,
) -> String {
    let mut out = String::with_capacity(1024);
    let identity = &snapshot.identity;

    let _ = writeln!(
        out,
        "You write short, factual insights about UK local council finances."
    );
    let _ = write!(out, "Council: {}", identity.name);
    if let Some(ct) = &identity.council_type {
        let _ = write!(out, " ({ct} council");
        if let Some(nation) = &identity.nation {
            let _ = write!(out, ", {nation}");
        }
        let _ = write!(out, ")");
    }
    out.push('\n');

    if snapshot.has_financial_data() {
        let _ = writeln!(out, "Financial data (values in millions GBP):");
        for metric in snapshot.financial_time_series.keys() {
            if let Some((year, value)) = snapshot.latest_value(metric) {
                match snapshot.percent_change(metric) {
                    Some(pct) => {
                        let earliest_year = snapshot
                            .earliest_value(metric)
                            .map(|(y, _)| y)
                            .unwrap_or(year);
                        let _ = writeln!(
                            out,
                            "- {metric}: {value:.1}m in {year} ({pct:+.1}% since {earliest_year})"
                        );
                    }
                    None => {
                        let _ = writeln!(out, "- {metric}: {value:.1}m in {year}");
                    }
                }
            }
        }
    } else {
        let _ = writeln!(out, "Financial data: none available.");
    }

    if !snapshot.peer_comparisons.is_empty() {
        let _ = writeln!(out, "Peer comparisons:");
        for (metric, peer) in &snapshot.peer_comparisons {
            let _ = writeln!(
                out,
                "- {metric}: {:.1}m vs peer average {:.1}m (percentile {:.0})",
                peer.value, peer.peer_average, peer.percentile
            );
        }
    }

    if let Some(pop) = snapshot.population.latest {
        match &snapshot.population.trend {
            Some(trend) => {
                let _ = writeln!(out, "Population: {pop} ({trend})");
            }
            None => {
                let _ = writeln!(out, "Population: {pop}");
            }
        }
    }

    output_contract(&mut out, limit, style.max_words());
    out
}

/// Pre-aggregated cross-council statistics for one financial field. The
/// sitewide prompt consumes these instead of raw per-council series so its
/// size is bounded by the field ceiling, not by council count.
#[derive(Debug, Clone, Default)]
pub struct FieldSummary {
    pub field: String,
    /// (council name, latest value in millions), best first.
    pub top: Vec<(String, f64)>,
    /// (council name, latest value in millions), lowest first.
    pub bottom: Vec<(String, f64)>,
    pub average_by_type: BTreeMap<String, f64>,
    pub average_by_nation: BTreeMap<String, f64>,
}

fn ranked_line(out: &mut String, label: &str, entries: &[(String, f64)]) {
    if entries.is_empty() {
        return;
    }
    let joined = entries
        .iter()
        .map(|(name, v)| format!("{name} ({v:.1}m)"))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "  {label}: {joined}");
}

/// Build the cross-council prompt from at most `max_fields` summaries.
pub fn build_sitewide_prompt(
    summaries: &[FieldSummary],
    limit: usize,
    max_fields: usize,
) -> String {
    let mut out = String::with_capacity(1024);
    let _ = writeln!(
        out,
        "You write short, factual insights comparing UK local councils."
    );
    let _ = writeln!(
        out,
        "Aggregate statistics across councils (values in millions GBP):"
    );

    for summary in summaries.iter().take(max_fields) {
        let _ = writeln!(out, "- {}:", summary.field);
        ranked_line(&mut out, "highest", &summary.top);
        ranked_line(&mut out, "lowest", &summary.bottom);
        for (ty, avg) in &summary.average_by_type {
            let _ = writeln!(out, "  average for {ty} councils: {avg:.1}m");
        }
        for (nation, avg) in &summary.average_by_nation {
            let _ = writeln!(out, "  average in {nation}: {avg:.1}m");
        }
    }

    output_contract(&mut out, limit, PromptStyle::Standard.max_words());
    out
}
