//! JSONL file reading and parsing

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use glob::glob;
use log::{debug, warn};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::Value;

use crate::usage::config::{decode_project_path, get_display_name};
use crate::usage::models::{CacheWriteSplit, EntryKind, SessionEvent, TokenCounts, Usage, UsageFact};

/// Error type for reader operations
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory not found: {0}")]
    DirNotFound(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Why a single record was left out of aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MalformedJson(String),
    NotAnObject,
    MissingTimestamp,
    InvalidTimestamp(String),
    InvalidShape(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MalformedJson(e) => write!(f, "malformed JSON: {}", e),
            RejectReason::NotAnObject => write!(f, "record is not an object"),
            RejectReason::MissingTimestamp => write!(f, "missing timestamp"),
            RejectReason::InvalidTimestamp(ts) => write!(f, "invalid timestamp: {}", ts),
            RejectReason::InvalidShape(e) => write!(f, "unexpected field type: {}", e),
        }
    }
}

/// Project with its session files
#[derive(Debug, Clone)]
pub struct ProjectData {
    pub encoded_path: String,
    pub decoded_path: String,
    pub display_name: String,
    pub session_files: Vec<PathBuf>,
}

/// Facts parsed from one file, plus what was skipped
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub project_path: String,
    pub facts: Vec<UsageFact>,
    pub lines_read: u32,
    pub lines_skipped: u32,
}

/// Everything read from the data directories in one run
#[derive(Debug, Default)]
pub struct LoadResult {
    pub files: Vec<ParsedFile>,
    pub files_skipped: u32,
    pub dirs_missing: u32,
}

/// Parse one JSONL line into a usage fact
pub fn parse_line(line: &str) -> Result<UsageFact, RejectReason> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| RejectReason::MalformedJson(e.to_string()))?;
    parse_record(&value)
}

/// Turn one raw record into a usage fact, or say why it was rejected
pub fn parse_record(record: &Value) -> Result<UsageFact, RejectReason> {
    let object = record.as_object().ok_or(RejectReason::NotAnObject)?;

    let timestamp = match object.get("timestamp") {
        None | Some(Value::Null) => return Err(RejectReason::MissingTimestamp),
        Some(Value::String(ts)) => {
            parse_timestamp(ts).ok_or_else(|| RejectReason::InvalidTimestamp(ts.clone()))?
        }
        Some(other) => return Err(RejectReason::InvalidTimestamp(other.to_string())),
    };

    let event =
        SessionEvent::deserialize(record).map_err(|e| RejectReason::InvalidShape(e.to_string()))?;

    let message = event.message.as_ref();
    // Nested usage wins; top-level usage is an older layout
    let usage = message
        .and_then(|m| m.usage.as_ref())
        .or(event.usage.as_ref());

    let (tokens, cache_write_split) = usage.map(extract_tokens).unwrap_or_default();

    let message_id = message
        .and_then(|m| m.id.clone())
        .or_else(|| event.message_id.clone());

    Ok(UsageFact {
        timestamp,
        model_id: message.and_then(|m| m.model.clone()),
        tokens,
        cache_write_split,
        authoritative_cost: event.cost_usd,
        entry_kind: EntryKind::from_tag(event.event_type.as_deref()),
        has_usage: usage.is_some(),
        message_id,
        request_id: event.request_id,
    })
}

/// Extract token counts, defaulting missing fields to zero
fn extract_tokens(usage: &Usage) -> (TokenCounts, Option<CacheWriteSplit>) {
    let split = usage.cache_creation.as_ref().map(|c| CacheWriteSplit {
        five_minute: c.ephemeral_5m_input_tokens.unwrap_or(0),
        one_hour: c.ephemeral_1h_input_tokens.unwrap_or(0),
    });

    let cache_creation_tokens = usage
        .cache_creation_tokens
        .or_else(|| split.map(|s| s.five_minute.saturating_add(s.one_hour)))
        .unwrap_or(0);

    let tokens = TokenCounts {
        input_tokens: usage.input_tokens.unwrap_or(0),
        output_tokens: usage.output_tokens.unwrap_or(0),
        cache_creation_tokens,
        cache_read_tokens: usage.cache_read_tokens.unwrap_or(0),
    };

    (tokens, split)
}

/// Parse ISO timestamp to DateTime<Utc>
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();

    // RFC 3339 covers both a trailing 'Z' and numeric offsets
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            let naive = ts.strip_suffix('Z').unwrap_or(ts);
            NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

/// Read all usage facts from a JSONL file
pub fn read_jsonl_file(path: &Path, project_path: &str) -> Result<ParsedFile, ReaderError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut facts = Vec::new();
    let mut lines_read: u32 = 0;
    let mut lines_skipped: u32 = 0;

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = match line_result {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                debug!("Skipping non-UTF-8 line {} in {:?}: {}", line_num, path, e);
                lines_skipped = lines_skipped.saturating_add(1);
                continue;
            }
            // Any other read error repeats forever, so give up on the file
            Err(e) => return Err(ReaderError::Io(e)),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        lines_read = lines_read.saturating_add(1);

        match parse_line(line) {
            Ok(fact) => facts.push(fact),
            Err(reason) => {
                debug!("Skipping line {} in {:?}: {}", line_num, path, reason);
                lines_skipped = lines_skipped.saturating_add(1);
            }
        }
    }

    Ok(ParsedFile {
        path: path.to_path_buf(),
        project_path: project_path.to_string(),
        facts,
        lines_read,
        lines_skipped,
    })
}

/// List all projects under one Claude data directory
pub fn list_projects(data_dir: &Path) -> Result<Vec<ProjectData>, ReaderError> {
    let projects_dir = data_dir.join("projects");

    if !projects_dir.is_dir() {
        return Err(ReaderError::DirNotFound(
            projects_dir.to_string_lossy().to_string(),
        ));
    }

    let mut projects = Vec::new();

    for entry in fs::read_dir(&projects_dir)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_dir() {
            continue;
        }

        let Some(encoded_path) = path.file_name().and_then(|n| n.to_str()).map(String::from)
        else {
            warn!("{}", ReaderError::InvalidPath(path.to_string_lossy().to_string()));
            continue;
        };

        let decoded_path = decode_project_path(&encoded_path);
        let display_name = get_display_name(&decoded_path);

        let pattern = path.join("*.jsonl");
        let mut session_files: Vec<PathBuf> = glob(pattern.to_string_lossy().as_ref())
            .map(|paths| paths.filter_map(Result::ok).filter(|p| p.is_file()).collect())
            .unwrap_or_default();
        session_files.sort();

        if !session_files.is_empty() {
            projects.push(ProjectData {
                encoded_path,
                decoded_path,
                display_name,
                session_files,
            });
        }
    }

    projects.sort_by(|a, b| a.encoded_path.cmp(&b.encoded_path));
    Ok(projects)
}

/// Load every session file under the given data directories.
///
/// Missing directories and unreadable files are logged and skipped. Files are
/// parsed in parallel; each yields an independent list of facts.
pub fn load_all_files(data_dirs: &[PathBuf]) -> LoadResult {
    let mut result = LoadResult::default();
    let mut jobs: Vec<(PathBuf, String)> = Vec::new();

    for dir in data_dirs {
        match list_projects(dir) {
            Ok(projects) => {
                for project in projects {
                    for file in project.session_files {
                        jobs.push((file, project.decoded_path.clone()));
                    }
                }
            }
            Err(e) => {
                warn!("Skipping data directory {:?}: {}", dir, e);
                result.dirs_missing += 1;
            }
        }
    }

    let parsed: Vec<(PathBuf, Result<ParsedFile, ReaderError>)> = jobs
        .par_iter()
        .map(|(path, project)| (path.clone(), read_jsonl_file(path, project)))
        .collect();

    for (path, outcome) in parsed {
        match outcome {
            Ok(file) => result.files.push(file),
            Err(e) => {
                warn!("Failed to read session file {:?}: {}", path, e);
                result.files_skipped += 1;
            }
        }
    }

    result
}

/// Merge facts from all files into one time-ordered, deduplicated stream.
///
/// The sort is stable, so among facts sharing a dedup key the first one in
/// timestamp order (then file order) is kept. Returns the stream and the
/// number of duplicates removed.
pub fn merge_facts<I>(facts: I) -> (Vec<UsageFact>, u32)
where
    I: IntoIterator<Item = UsageFact>,
{
    let mut all: Vec<UsageFact> = facts.into_iter().collect();
    all.sort_by_key(|f| f.timestamp);

    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates: u32 = 0;
    let mut merged = Vec::with_capacity(all.len());

    for fact in all {
        if let Some(key) = fact.dedup_key() {
            if !seen.insert(key) {
                duplicates += 1;
                continue;
            }
        }
        merged.push(fact);
    }

    (merged, duplicates)
}
