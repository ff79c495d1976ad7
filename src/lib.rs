//! Claude Code usage blocks - command line application

mod commands;
pub mod usage;

use std::io;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use usage::{
    get_claude_data_dirs, load_all_files, load_config, build_report, ConfigError, ExportError,
    FilterOptions, PricingError, PricingResolver, ReportSettings,
};

/// Error type for a CLI invocation
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid pricing override: {0}")]
    Pricing(#[from] PricingError),
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
    #[error("Output error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "5-hour session block usage report for Claude Code logs", long_about = None)]
pub struct Cli {
    /// Claude data directory (repeatable); defaults to CLAUDE_CONFIG_DIR or ~/.claude
    #[arg(long = "data-dir", value_name = "DIR", global = true)]
    pub data_dirs: Vec<PathBuf>,

    /// Config file path
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Only include entries at or after this instant (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_name = "TS", value_parser = parse_since, global = true)]
    pub since: Option<DateTime<Utc>>,

    /// Only include entries at or before this instant (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_name = "TS", value_parser = parse_until, global = true)]
    pub until: Option<DateTime<Utc>>,

    /// Only include one project, by decoded path
    #[arg(long, value_name = "PATH", global = true)]
    pub project: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// One line per block plus grand totals
    Report,
    /// The block whose window is still open
    Active,
    /// Delta-based versus raw token totals per block
    Reconcile,
    /// Entries whose recorded cost differs from the estimate
    Discrepancies,
    /// Per-day token and cost totals
    Daily,
    /// Write the full report as JSON
    Export {
        /// Output file, `-` for stdout
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

fn parse_instant(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("expected RFC 3339 or YYYY-MM-DD, got {:?}", value))?;
    let time = if end_of_day {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| format!("invalid date {:?}", value))
}

/// A bare date means the start of that day
pub fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    parse_instant(value, false)
}

/// A bare date means the end of that day
pub fn parse_until(value: &str) -> Result<DateTime<Utc>, String> {
    parse_instant(value, true)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .try_init();
}

/// Parse arguments, build the report and render the selected command
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    execute(cli, &mut io::stdout().lock())
}

/// Run a parsed command line, writing rendered output to `out`
pub fn execute<W: io::Write>(cli: Cli, out: &mut W) -> Result<(), AppError> {
    let config = load_config(cli.config.as_deref())?;
    let resolver = PricingResolver::with_overrides(&config.pricing_overrides)?;
    let settings = ReportSettings::from(&config);

    let data_dirs = if cli.data_dirs.is_empty() {
        get_claude_data_dirs(config.data_path.as_deref())
    } else {
        cli.data_dirs.clone()
    };

    let filter = FilterOptions::new()
        .with_date_range(cli.since, cli.until)
        .with_project(cli.project.clone());

    let now = Utc::now();
    let outcome = build_report(load_all_files(&data_dirs), &filter, &resolver, &settings, now);

    match cli.command.unwrap_or(Command::Report) {
        Command::Report => commands::render_report(&outcome, out)?,
        Command::Active => commands::render_active(&outcome, now, out)?,
        Command::Reconcile => commands::render_reconcile(&outcome, out)?,
        Command::Discrepancies => commands::render_discrepancies(&outcome, out)?,
        Command::Daily => commands::render_daily(&outcome, out)?,
        Command::Export { output } => commands::export_report(&outcome, &output, out)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_since_and_until() {
        assert_eq!(
            parse_since("2025-08-01").unwrap(),
            Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap()
        );
        let until = parse_until("2025-08-01").unwrap();
        assert!(until > Utc.with_ymd_and_hms(2025, 8, 1, 23, 59, 59).unwrap());
        assert_eq!(
            parse_since("2025-08-01T12:00:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2025, 8, 1, 10, 0, 0).unwrap()
        );
        assert!(parse_since("yesterday").is_err());
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "claude-usage-blocks",
            "export",
            "--output",
            "-",
            "--data-dir",
            "/a",
            "--data-dir",
            "/b",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.data_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(cli.verbose);
        assert_eq!(cli.command, Some(Command::Export { output: PathBuf::from("-") }));
    }

    #[test]
    fn test_cli_defaults_to_report() {
        let cli = Cli::try_parse_from(["claude-usage-blocks"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.data_dirs.is_empty());
    }
}
