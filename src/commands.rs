//! Console rendering for each CLI command

use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::usage::export::{write_snapshot, write_to, ExportError};
use crate::usage::models::{BlockReport, CloseReason, ReportOutcome, UsageReport};

const NO_DATA: &str = "No usage data found";

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

fn format_usd(amount: f64) -> String {
    format!("${:.4}", amount)
}

fn block_status(block: &BlockReport) -> &'static str {
    if block.is_active {
        return "active";
    }
    match block.close_reason {
        CloseReason::Expired => "expired",
        CloseReason::IdleGap => "idle gap",
        CloseReason::EndOfInput => "ended",
    }
}

/// Run `render` against the report, or print the no-data line
fn with_report<W, F>(outcome: &ReportOutcome, out: &mut W, render: F) -> io::Result<()>
where
    W: Write,
    F: FnOnce(&UsageReport, &mut W) -> io::Result<()>,
{
    match outcome.report() {
        Some(report) => render(report, out),
        None => writeln!(out, "{}", NO_DATA),
    }
}

/// One line per block plus grand totals and data-quality counters
pub fn render_report<W: Write>(outcome: &ReportOutcome, out: &mut W) -> io::Result<()> {
    with_report(outcome, out, |report, out| {
        writeln!(
            out,
            "{:<17} {:<9} {:>7} {:>12} {:>12} {:>11}  models",
            "start", "status", "entries", "tokens", "weighted", "cost"
        )?;
        for block in &report.blocks {
            writeln!(
                out,
                "{:<17} {:<9} {:>7} {:>12} {:>12} {:>11}  {}",
                format_time(&block.start_time),
                block_status(block),
                block.entry_count,
                block.tokens.total_tokens,
                block.tokens.weighted_tokens,
                format_usd(block.cost.effective_usd),
                block.models.join(", ")
            )?;
        }

        let totals = &report.totals;
        writeln!(out)?;
        writeln!(
            out,
            "Total: {} blocks, {} entries, {} tokens ({} weighted), {}",
            totals.block_count,
            totals.fact_count,
            totals.tokens.total_tokens,
            totals.tokens.weighted_tokens,
            format_usd(totals.cost.effective_usd)
        )?;
        writeln!(
            out,
            "Cost: {} calculated, {} recorded over {} entries",
            format_usd(totals.cost.calculated_usd),
            format_usd(totals.cost.authoritative_usd),
            totals.cost.authoritative_entries
        )?;

        let quality = &report.data_quality;
        writeln!(
            out,
            "Data: {} files read, {} skipped, {} lines skipped, {} duplicates removed",
            quality.files_read,
            quality.files_skipped,
            quality.lines_skipped,
            quality.duplicates_removed
        )?;
        writeln!(
            out,
            "Cost data: {} with recorded cost, {} with model and usage, {} usage without model",
            quality.entries_with_cost,
            quality.entries_with_model_and_usage,
            quality.entries_with_usage_no_model
        )?;
        if quality.assistant_missing_model > 0 || quality.assistant_missing_usage > 0 {
            writeln!(
                out,
                "Assistant entries missing model: {}, missing usage: {}",
                quality.assistant_missing_model, quality.assistant_missing_usage
            )?;
        }
        if !quality.unknown_models.is_empty() {
            writeln!(
                out,
                "Priced at default rate: {}",
                quality.unknown_models.join(", ")
            )?;
        }
        if totals.divergent_blocks > 0 {
            writeln!(
                out,
                "{} blocks have diverging raw and delta totals (see `reconcile`)",
                totals.divergent_blocks
            )?;
        }
        Ok(())
    })
}

/// Details for the block whose window is still open at `now`
pub fn render_active<W: Write>(
    outcome: &ReportOutcome,
    now: DateTime<Utc>,
    out: &mut W,
) -> io::Result<()> {
    with_report(outcome, out, |report, out| {
        let Some(block) = report.active_block() else {
            return writeln!(out, "No active block at {}", format_time(&now));
        };

        let remaining = block.time_remaining_minutes.unwrap_or(0);
        writeln!(
            out,
            "Active block: {} to {}",
            format_time(&block.start_time),
            format_time(&block.end_time)
        )?;
        writeln!(out, "Time remaining: {}h {}m", remaining / 60, remaining % 60)?;
        if let Some(reset) = &block.reset_time {
            writeln!(out, "Resets at: {}", format_time(reset))?;
        }
        writeln!(
            out,
            "Tokens: {} ({} weighted) over {} entries",
            block.tokens.total_tokens, block.tokens.weighted_tokens, block.entry_count
        )?;
        writeln!(out, "Cost: {}", format_usd(block.cost.effective_usd))?;
        match &block.burn_rate {
            Some(rate) => writeln!(
                out,
                "Burn rate: {:.1} tokens/min, {}/hour",
                rate.tokens_per_minute,
                format_usd(rate.cost_per_hour)
            ),
            None => writeln!(out, "Burn rate: not enough data"),
        }
    })
}

/// Delta-based against raw totals for each block
pub fn render_reconcile<W: Write>(outcome: &ReportOutcome, out: &mut W) -> io::Result<()> {
    with_report(outcome, out, |report, out| {
        writeln!(
            out,
            "{:<17} {:>12} {:>12} {:>6}  divergent",
            "start", "delta", "raw", "resets"
        )?;
        for block in &report.blocks {
            let rec = &block.reconciliation;
            writeln!(
                out,
                "{:<17} {:>12} {:>12} {:>6}  {}",
                format_time(&block.start_time),
                rec.delta_totals.total(),
                rec.raw_totals.total(),
                rec.reset_count(),
                if rec.divergent { "yes" } else { "no" }
            )?;
        }
        writeln!(
            out,
            "{} of {} blocks diverge",
            report.totals.divergent_blocks, report.totals.block_count
        )
    })
}

pub fn render_discrepancies<W: Write>(outcome: &ReportOutcome, out: &mut W) -> io::Result<()> {
    with_report(outcome, out, |report, out| {
        if report.discrepancies.is_empty() {
            return writeln!(out, "No cost discrepancies");
        }
        for d in &report.discrepancies {
            writeln!(
                out,
                "{}  {:<32} recorded {} calculated {} diff {}",
                d.timestamp.to_rfc3339(),
                d.model,
                format_usd(d.authoritative_usd),
                format_usd(d.calculated_usd),
                format_usd(d.difference_usd)
            )?;
        }
        writeln!(out, "{} discrepancies", report.discrepancies.len())
    })
}

pub fn render_daily<W: Write>(outcome: &ReportOutcome, out: &mut W) -> io::Result<()> {
    with_report(outcome, out, |report, out| {
        writeln!(
            out,
            "{:<10} {:>12} {:>12} {:>12} {:>12} {:>11}",
            "date", "input", "output", "cache write", "cache read", "cost"
        )?;
        for day in &report.daily_usage {
            writeln!(
                out,
                "{:<10} {:>12} {:>12} {:>12} {:>12} {:>11}",
                day.date,
                day.input_tokens,
                day.output_tokens,
                day.cache_creation_tokens,
                day.cache_read_tokens,
                format_usd(day.cost_usd)
            )?;
        }
        Ok(())
    })
}

/// Write the JSON snapshot to `path`, or to `out` when the path is `-`
pub fn export_report<W: Write>(
    outcome: &ReportOutcome,
    path: &Path,
    out: &mut W,
) -> Result<(), ExportError> {
    if path == Path::new("-") {
        return write_to(outcome, out);
    }

    write_snapshot(outcome, path)?;
    writeln!(out, "Wrote report to {}", path.display())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::export::from_json;
    use crate::usage::models::{EntryKind, TokenCounts, UsageFact};
    use crate::usage::pricing::PricingResolver;
    use crate::usage::reader::{LoadResult, ParsedFile};
    use crate::usage::stats::{build_report, FilterOptions, ReportSettings};
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap()
    }

    fn fact(minutes: i64, input: u64, cost: Option<f64>) -> UsageFact {
        UsageFact {
            timestamp: t0() + Duration::minutes(minutes),
            model_id: Some("claude-sonnet-4".to_string()),
            tokens: TokenCounts::new(input, 100, 0, 0),
            cache_write_split: None,
            authoritative_cost: cost,
            entry_kind: EntryKind::Assistant,
            has_usage: true,
            message_id: None,
            request_id: None,
        }
    }

    fn outcome(now: DateTime<Utc>) -> ReportOutcome {
        let load = LoadResult {
            files: vec![ParsedFile {
                path: PathBuf::from("a.jsonl"),
                project_path: "/p".to_string(),
                facts: vec![fact(0, 500, Some(1.0)), fact(30, 200, None)],
                lines_read: 2,
                lines_skipped: 0,
            }],
            ..Default::default()
        };
        build_report(
            load,
            &FilterOptions::new(),
            &PricingResolver::new(),
            &ReportSettings::default(),
            now,
        )
    }

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_no_data_message() {
        let text = render(|out| render_report(&ReportOutcome::NoData, out));
        assert_eq!(text.trim(), NO_DATA);
        let text = render(|out| render_daily(&ReportOutcome::NoData, out));
        assert_eq!(text.trim(), NO_DATA);
    }

    #[test]
    fn test_report_lists_blocks_and_totals() {
        let report = outcome(t0() + Duration::days(1));
        let text = render(|out| render_report(&report, out));
        assert!(text.contains("2025-08-01 10:00"));
        assert!(text.contains("Total: 1 blocks, 2 entries"));
        assert!(text.contains("claude-sonnet-4"));
        assert!(text.contains("Cost data: 1 with recorded cost, 2 with model and usage, 0 usage without model"));
        assert!(!text.contains("Assistant entries missing"));
    }

    #[test]
    fn test_active_block_rendering() {
        let now = t0() + Duration::hours(1);
        let report = outcome(now);
        let text = render(|out| render_active(&report, now, out));
        assert!(text.contains("Time remaining: 4h 0m"));
        assert!(text.contains("Resets at: 2025-08-01 15:00"));

        let later = t0() + Duration::days(1);
        let report = outcome(later);
        let text = render(|out| render_active(&report, later, out));
        assert!(text.starts_with("No active block"));
    }

    #[test]
    fn test_reconcile_and_discrepancies() {
        let report = outcome(t0() + Duration::days(1));
        let text = render(|out| render_reconcile(&report, out));
        // 500 then 200 input is a reset
        assert!(text.contains("yes"));

        let text = render(|out| render_discrepancies(&report, out));
        assert!(text.contains("1 discrepancies"));
    }

    #[test]
    fn test_export_to_stdout_is_valid_json() {
        let report = outcome(t0() + Duration::days(1));
        let mut buf = Vec::new();
        export_report(&report, Path::new("-"), &mut buf).unwrap();
        let restored = from_json(&String::from_utf8(buf).unwrap()).unwrap();
        let before = &report.report().unwrap().totals;
        let after = &restored.report().unwrap().totals;
        assert_eq!(before.tokens, after.tokens);
        assert!((before.cost.effective_usd - after.cost.effective_usd).abs() < 1e-9);
    }
}
