use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use tempfile::TempDir;

use claude_usage_blocks::usage::{
    build_report, load_all_files, read_snapshot, write_snapshot, CloseReason, FilterOptions,
    PricingResolver, ReportOutcome, ReportSettings,
};
use claude_usage_blocks::{execute, Cli};

fn record(ts: &str, msg: &str, req: &str, model: &str, input: u64, output: u64) -> String {
    format!(
        r#"{{"type":"assistant","timestamp":"{ts}","requestId":"{req}","message":{{"id":"{msg}","model":"{model}","usage":{{"input_tokens":{input},"output_tokens":{output},"cache_creation_input_tokens":0,"cache_read_input_tokens":0}}}}}}"#
    )
}

fn write_session(root: &Path, project: &str, file: &str, lines: &[String]) {
    let dir = root.join("projects").join(project);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), lines.join("\n") + "\n").unwrap();
}

/// Two projects; one record is duplicated across files and one line is garbage
fn fixture() -> TempDir {
    let root = TempDir::new().unwrap();
    write_session(
        root.path(),
        "-home-dev-alpha",
        "s1.jsonl",
        &[
            record("2025-08-01T10:15:00Z", "m1", "r1", "claude-sonnet-4-20250514", 1000, 200),
            "{ this is not json".to_string(),
            String::new(),
            record("2025-08-01T11:00:00Z", "m2", "r2", "claude-opus-4-1-20250805", 2000, 300),
        ],
    );
    write_session(
        root.path(),
        "-home-dev-beta",
        "s2.jsonl",
        &[
            // same message as alpha's first record
            record("2025-08-01T10:15:00Z", "m1", "r1", "claude-sonnet-4-20250514", 1000, 200),
            record("2025-08-01T17:30:00Z", "m3", "r3", "claude-sonnet-4-20250514", 500, 50),
            r#"{"type":"user","timestamp":"2025-08-01T17:31:00Z","message":{"role":"user"}}"#
                .to_string(),
        ],
    );
    root
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 1, 19, 0, 0).unwrap()
}

fn report_for(root: &Path, filter: &FilterOptions) -> ReportOutcome {
    let load = load_all_files(&[root.to_path_buf()]);
    build_report(
        load,
        filter,
        &PricingResolver::new(),
        &ReportSettings::default(),
        now(),
    )
}

#[test]
fn test_end_to_end_report() {
    let root = fixture();
    let outcome = report_for(root.path(), &FilterOptions::new());
    let report = outcome.report().expect("report");

    assert_eq!(report.files.len(), 2);
    assert_eq!(report.data_quality.files_read, 2);
    assert_eq!(report.data_quality.lines_skipped, 1);
    assert_eq!(report.data_quality.duplicates_removed, 1);
    assert!(report.data_quality.unknown_models.is_empty());
    assert_eq!(report.data_quality.entries_with_model_and_usage, 3);
    assert_eq!(report.data_quality.assistant_missing_usage, 0);

    // 10:15 and 11:00 share the 10:00 block; 17:30 comes after a 6.5h gap
    assert_eq!(report.blocks.len(), 2);
    let first = &report.blocks[0];
    assert_eq!(first.start_time, Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap());
    assert_eq!(first.entry_count, 2);
    assert_eq!(first.close_reason, CloseReason::IdleGap);
    assert_eq!(
        first.models,
        vec!["claude-sonnet-4-20250514", "claude-opus-4-1-20250805"]
    );

    let second = &report.blocks[1];
    assert_eq!(second.entry_count, 2);
    assert!(second.is_active);
    assert_eq!(report.active_block_id.as_deref(), Some(second.id.as_str()));
    assert_eq!(second.time_remaining_minutes, Some(3 * 60));

    // sonnet 1000/200 + opus 2000/300 + sonnet 500/50, all estimated
    let expected = (1000.0 * 3.0 + 200.0 * 15.0 + 2000.0 * 15.0 + 300.0 * 75.0 + 500.0 * 3.0
        + 50.0 * 15.0)
        / 1_000_000.0;
    assert!((report.totals.cost.effective_usd - expected).abs() < 1e-9);
    assert_eq!(report.totals.cost.estimated_entries, 4);
    assert_eq!(report.totals.raw_tokens.input_tokens, 3500);
}

#[test]
fn test_directory_named_like_a_session_does_not_stop_the_run() {
    let root = fixture();
    fs::create_dir_all(root.path().join("projects").join("-home-dev-alpha").join("weird.jsonl"))
        .unwrap();
    let outcome = report_for(root.path(), &FilterOptions::new());
    let report = outcome.report().expect("report");

    assert_eq!(report.data_quality.files_read, 2);
    assert_eq!(report.data_quality.files_skipped, 0);
}

#[test]
fn test_project_filter() {
    let root = fixture();
    let filter = FilterOptions::new().with_project(Some("/home/dev/beta".to_string()));
    let outcome = report_for(root.path(), &filter);
    let report = outcome.report().expect("report");

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.totals.fact_count, 3);
}

#[test]
fn test_empty_directory_is_no_data() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("projects")).unwrap();
    assert_eq!(report_for(root.path(), &FilterOptions::new()), ReportOutcome::NoData);
}

#[test]
fn test_snapshot_round_trip() {
    let root = fixture();
    let outcome = report_for(root.path(), &FilterOptions::new());
    let path = root.path().join("snapshot.json");

    write_snapshot(&outcome, &path).unwrap();
    let restored = read_snapshot(&path).unwrap();

    let before = outcome.report().unwrap();
    let after = restored.report().unwrap();
    assert_eq!(before.blocks.len(), after.blocks.len());
    assert_eq!(before.totals.tokens, after.totals.tokens);
    assert_eq!(before.totals.raw_tokens, after.totals.raw_tokens);
    assert!((before.totals.cost.effective_usd - after.totals.cost.effective_usd).abs() < 1e-9);
    assert!((before.totals.cost.calculated_usd - after.totals.cost.calculated_usd).abs() < 1e-9);
}

#[test]
fn test_cli_export_and_report() {
    let root = fixture();
    let config = root.path().join("config.json");
    fs::write(&config, r#"{"cacheTier":"1h"}"#).unwrap();
    let output = root.path().join("out").join("report.json");

    let data_dir = root.path().to_string_lossy().to_string();
    let config_arg = config.to_string_lossy().to_string();
    let output_arg = output.to_string_lossy().to_string();

    let cli = Cli::try_parse_from([
        "claude-usage-blocks",
        "--data-dir",
        data_dir.as_str(),
        "--config",
        config_arg.as_str(),
        "export",
        "--output",
        output_arg.as_str(),
    ])
    .unwrap();
    let mut out = Vec::new();
    execute(cli, &mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().contains("Wrote report to"));

    let restored = read_snapshot(&output).unwrap();
    assert_eq!(restored.report().unwrap().totals.block_count, 2);

    let cli = Cli::try_parse_from([
        "claude-usage-blocks",
        "--data-dir",
        data_dir.as_str(),
        "--config",
        config_arg.as_str(),
    ])
    .unwrap();
    let mut out = Vec::new();
    execute(cli, &mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().contains("Total: 2 blocks, 4 entries"));
}

#[test]
fn test_cli_missing_config_is_an_error() {
    let root = fixture();
    let missing = root.path().join("nope.json").to_string_lossy().to_string();
    let cli = Cli::try_parse_from(["claude-usage-blocks", "--config", missing.as_str(), "daily"])
        .unwrap();
    let mut out = Vec::new();
    assert!(execute(cli, &mut out).is_err());
}
