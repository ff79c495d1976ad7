//! Token reconciliation between cumulative and incremental accounting
//!
//! Each fact's counters can be read two ways: as a cumulative snapshot, in
//! which case the usage of an entry is the delta from the previous reading, or
//! as an increment that is simply summed. Both totals are computed. The
//! delta-based sum is the one reported; a material gap between the two is
//! flagged on the summary.
//!
//! A delta never goes negative. When a reading is lower than the previous one
//! the counter is taken to have started over and the reading itself is the
//! delta.

use chrono::{DateTime, Utc};
use log::info;

use crate::usage::models::{ReconciliationSummary, ResetEvent, TokenCounts, UsageFact};

/// Relative difference between raw and delta totals above which they diverge
pub const DEFAULT_DIVERGENCE_TOLERANCE: f64 = 0.01;

fn clamped_delta(current: u64, previous: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        current
    }
}

/// Deltas over a sequence of cumulative readings for one category
pub fn category_deltas(readings: &[u64]) -> Vec<u64> {
    let mut previous = 0;
    readings
        .iter()
        .map(|&current| {
            let delta = clamped_delta(current, previous);
            previous = current;
            delta
        })
        .collect()
}

/// Whether two totals differ by more than `tolerance`, relative to the larger
pub fn is_divergent(raw: u64, delta: u64, tolerance: f64) -> bool {
    let larger = raw.max(delta);
    if larger == 0 {
        return false;
    }
    let diff = raw.abs_diff(delta) as f64;
    diff / larger as f64 > tolerance
}

/// Usage attributed to one entry under cumulative reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDelta {
    pub delta: TokenCounts,
    /// Input or output dropped below the previous reading
    pub reset: bool,
}

/// Running reconciliation over the facts of one block
#[derive(Debug, Default)]
pub struct TokenReconciler {
    previous: Option<TokenCounts>,
    delta_totals: TokenCounts,
    raw_totals: TokenCounts,
    resets: Vec<ResetEvent>,
}

impl TokenReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next reading. `index` is the fact's position in its block.
    pub fn observe(
        &mut self,
        index: usize,
        timestamp: DateTime<Utc>,
        reading: &TokenCounts,
    ) -> EntryDelta {
        let previous = self.previous.unwrap_or_default();

        let delta = TokenCounts {
            input_tokens: clamped_delta(reading.input_tokens, previous.input_tokens),
            output_tokens: clamped_delta(reading.output_tokens, previous.output_tokens),
            cache_creation_tokens: clamped_delta(
                reading.cache_creation_tokens,
                previous.cache_creation_tokens,
            ),
            cache_read_tokens: clamped_delta(
                reading.cache_read_tokens,
                previous.cache_read_tokens,
            ),
        };

        let reset = self.previous.is_some()
            && (reading.input_tokens < previous.input_tokens
                || reading.output_tokens < previous.output_tokens);
        if reset {
            self.resets.push(ResetEvent { index, timestamp });
        }

        self.delta_totals += delta;
        self.raw_totals += *reading;
        self.previous = Some(*reading);

        EntryDelta { delta, reset }
    }

    pub fn finish(self, tolerance: f64) -> ReconciliationSummary {
        let divergent = is_divergent(
            self.raw_totals.total(),
            self.delta_totals.total(),
            tolerance,
        );

        ReconciliationSummary {
            delta_totals: self.delta_totals,
            raw_totals: self.raw_totals,
            final_snapshot: self.previous.unwrap_or_default(),
            resets: self.resets,
            divergent,
        }
    }
}

/// Reconcile the facts of one block. Facts without a usage mapping carry no
/// reading and are left out; reset indices still refer to block positions.
pub fn reconcile(facts: &[UsageFact], tolerance: f64) -> ReconciliationSummary {
    reconcile_weighted(facts, tolerance, |_| 1).0
}

/// Reconcile a block and also sum each entry's delta scaled by `weight`
pub fn reconcile_weighted<F>(
    facts: &[UsageFact],
    tolerance: f64,
    weight: F,
) -> (ReconciliationSummary, u64)
where
    F: Fn(&UsageFact) -> u64,
{
    let mut reconciler = TokenReconciler::new();
    let mut weighted: u64 = 0;
    for (index, fact) in facts.iter().enumerate().filter(|(_, f)| f.has_usage) {
        let entry = reconciler.observe(index, fact.timestamp, &fact.tokens);
        weighted = weighted.saturating_add(entry.delta.total().saturating_mul(weight(fact)));
    }

    let summary = reconciler.finish(tolerance);
    if summary.divergent {
        info!(
            "Raw token sum {} diverges from delta sum {} ({} resets)",
            summary.raw_totals.total(),
            summary.delta_totals.total(),
            summary.reset_count()
        );
    }
    (summary, weighted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::models::EntryKind;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap()
    }

    fn reading(minutes: i64, input: u64, output: u64) -> UsageFact {
        UsageFact {
            timestamp: t0() + Duration::minutes(minutes),
            model_id: Some("claude-sonnet-4".to_string()),
            tokens: TokenCounts::new(input, output, 0, 0),
            cache_write_split: None,
            authoritative_cost: None,
            entry_kind: EntryKind::Assistant,
            has_usage: true,
            message_id: None,
            request_id: None,
        }
    }

    #[test]
    fn test_category_deltas_with_reset() {
        let deltas = category_deltas(&[100, 250, 80, 200]);
        assert_eq!(deltas, vec![100, 150, 80, 120]);
        assert_eq!(deltas.iter().sum::<u64>(), 450);
    }

    #[test]
    fn test_category_deltas_empty() {
        assert!(category_deltas(&[]).is_empty());
    }

    #[test]
    fn test_reconcile_reports_both_totals() {
        let facts = vec![
            reading(0, 100, 0),
            reading(1, 250, 0),
            reading(2, 80, 0),
            reading(3, 200, 0),
        ];
        let summary = reconcile(&facts, DEFAULT_DIVERGENCE_TOLERANCE);

        assert_eq!(summary.delta_totals.input_tokens, 450);
        assert_eq!(summary.raw_totals.input_tokens, 630);
        assert!(summary.divergent);
        assert_eq!(summary.reset_count(), 1);
        assert_eq!(summary.resets[0].index, 2);
        assert_eq!(summary.resets[0].timestamp, t0() + Duration::minutes(2));
        assert_eq!(summary.final_snapshot.input_tokens, 200);
    }

    #[test]
    fn test_reset_detected_on_output_drop() {
        let mut reconciler = TokenReconciler::new();
        let first = reconciler.observe(0, t0(), &TokenCounts::new(10, 500, 0, 0));
        assert!(!first.reset);
        let second = reconciler.observe(1, t0(), &TokenCounts::new(20, 40, 0, 0));
        assert!(second.reset);
        assert_eq!(second.delta, TokenCounts::new(10, 40, 0, 0));
    }

    #[test]
    fn test_cache_drop_is_not_a_reset() {
        let mut reconciler = TokenReconciler::new();
        reconciler.observe(0, t0(), &TokenCounts::new(10, 10, 0, 900));
        let next = reconciler.observe(1, t0(), &TokenCounts::new(20, 20, 0, 100));
        assert!(!next.reset);
        // the cache category still clamps to the raw reading
        assert_eq!(next.delta.cache_read_tokens, 100);
    }

    #[test]
    fn test_single_reading_is_not_divergent() {
        let summary = reconcile(&[reading(0, 100, 50)], DEFAULT_DIVERGENCE_TOLERANCE);
        assert_eq!(summary.delta_totals, summary.raw_totals);
        assert!(!summary.divergent);
        assert!(summary.resets.is_empty());
    }

    #[test]
    fn test_facts_without_usage_are_ignored() {
        let mut marker = reading(1, 0, 0);
        marker.has_usage = false;
        let facts = vec![reading(0, 100, 0), marker, reading(2, 50, 0)];
        let summary = reconcile(&facts, DEFAULT_DIVERGENCE_TOLERANCE);

        // 100 then 50 is a reset, recorded at block position 2
        assert_eq!(summary.resets.len(), 1);
        assert_eq!(summary.resets[0].index, 2);
        assert_eq!(summary.delta_totals.input_tokens, 150);
    }

    #[test]
    fn test_weighted_sum_scales_deltas() {
        let mut heavy = reading(1, 150, 0);
        heavy.model_id = Some("claude-opus-4".to_string());
        let facts = vec![reading(0, 100, 0), heavy];
        let (summary, weighted) =
            reconcile_weighted(&facts, DEFAULT_DIVERGENCE_TOLERANCE, |f| {
                if f.model_id.as_deref() == Some("claude-opus-4") { 5 } else { 1 }
            });

        assert_eq!(summary, reconcile(&facts, DEFAULT_DIVERGENCE_TOLERANCE));
        // 100 at weight 1, then a delta of 50 at weight 5
        assert_eq!(weighted, 100 + 50 * 5);
    }

    #[test]
    fn test_is_divergent_tolerance() {
        assert!(!is_divergent(0, 0, 0.01));
        assert!(!is_divergent(1000, 995, 0.01));
        assert!(is_divergent(1000, 980, 0.01));
        assert!(is_divergent(630, 450, 0.01));
    }
}
