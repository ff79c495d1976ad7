//! Data models for Claude Code usage blocks

use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::usage::pricing::{CacheTier, PricingOverride};

/// Nested mappings that are not JSON objects are treated as absent
fn object_or_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(value @ Value::Object(_)) => T::deserialize(value).map(Some).map_err(D::Error::custom),
        _ => Ok(None),
    }
}

/// One raw JSONL record, as written by Claude Code
#[derive(Debug, Clone, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "object_or_none")]
    pub message: Option<Message>,
    #[serde(rename = "costUSD", alias = "cost_usd")]
    pub cost_usd: Option<f64>,
    #[serde(default, deserialize_with = "object_or_none")]
    pub usage: Option<Usage>,
    #[serde(alias = "messageId")]
    pub message_id: Option<String>,
    #[serde(alias = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub role: Option<String>,
    pub id: Option<String>,
    pub model: Option<String>,
    #[serde(default, deserialize_with = "object_or_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Usage {
    #[serde(default, alias = "inputTokens")]
    pub input_tokens: Option<u64>,
    #[serde(default, alias = "outputTokens")]
    pub output_tokens: Option<u64>,
    #[serde(default, alias = "cache_creation_input_tokens", alias = "cacheCreationInputTokens")]
    pub cache_creation_tokens: Option<u64>,
    #[serde(default, alias = "cache_read_input_tokens", alias = "cacheReadInputTokens")]
    pub cache_read_tokens: Option<u64>,
    /// Per-retention split of cache writes, present on newer records
    #[serde(default, deserialize_with = "object_or_none")]
    pub cache_creation: Option<CacheCreation>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CacheCreation {
    #[serde(default)]
    pub ephemeral_5m_input_tokens: Option<u64>,
    #[serde(default)]
    pub ephemeral_1h_input_tokens: Option<u64>,
}

/// Tag of the record a fact was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Assistant,
    User,
    Other,
}

impl EntryKind {
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("assistant") => EntryKind::Assistant,
            Some("user") => EntryKind::User,
            _ => EntryKind::Other,
        }
    }
}

/// Token counts by category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64, cache_creation: u64, cache_read: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: cache_creation,
            cache_read_tokens: cache_read,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenCounts {
    type Output = TokenCounts;

    fn add(self, other: TokenCounts) -> TokenCounts {
        TokenCounts {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            cache_creation_tokens: self
                .cache_creation_tokens
                .saturating_add(other.cache_creation_tokens),
            cache_read_tokens: self.cache_read_tokens.saturating_add(other.cache_read_tokens),
        }
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, other: TokenCounts) {
        *self = *self + other;
    }
}

/// Cache writes broken down by an explicit retention marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheWriteSplit {
    pub five_minute: u64,
    pub one_hour: u64,
}

/// Normalized usage fact extracted from one log record. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageFact {
    pub timestamp: DateTime<Utc>,
    pub model_id: Option<String>,
    pub tokens: TokenCounts,
    /// Only set when the record carried a `usage.cache_creation` breakdown
    pub cache_write_split: Option<CacheWriteSplit>,
    pub authoritative_cost: Option<f64>,
    pub entry_kind: EntryKind,
    /// Whether the record carried any usage mapping at all
    pub has_usage: bool,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
}

impl UsageFact {
    /// Key used for cross-file deduplication; only records carrying both ids have one
    pub fn dedup_key(&self) -> Option<String> {
        match (&self.message_id, &self.request_id) {
            (Some(mid), Some(rid)) if !mid.is_empty() && !rid.is_empty() => {
                Some(format!("{}:{}", mid, rid))
            }
            _ => None,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model_id.as_deref().unwrap_or(UNKNOWN_MODEL)
    }
}

/// Placeholder used when a fact carries no model id
pub const UNKNOWN_MODEL: &str = "unknown";

/// Token totals derived from a block's facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAggregate {
    pub total_tokens: u64,
    pub weighted_tokens: u64,
    pub breakdown: TokenCounts,
}

impl TokenAggregate {
    pub fn merge(self, other: TokenAggregate) -> TokenAggregate {
        TokenAggregate {
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
            weighted_tokens: self.weighted_tokens.saturating_add(other.weighted_tokens),
            breakdown: self.breakdown + other.breakdown,
        }
    }
}

/// Calculated vs authoritative cost totals
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    /// Sum of estimates over every fact, authoritative or not
    pub calculated_usd: f64,
    /// Sum of the authoritative costs that were present
    pub authoritative_usd: f64,
    /// Authoritative where present, estimate elsewhere
    pub effective_usd: f64,
    pub authoritative_entries: u32,
    pub estimated_entries: u32,
}

impl CostSummary {
    pub fn merge(self, other: CostSummary) -> CostSummary {
        CostSummary {
            calculated_usd: self.calculated_usd + other.calculated_usd,
            authoritative_usd: self.authoritative_usd + other.authoritative_usd,
            effective_usd: self.effective_usd + other.effective_usd,
            authoritative_entries: self.authoritative_entries + other.authoritative_entries,
            estimated_entries: self.estimated_entries + other.estimated_entries,
        }
    }
}

/// Burn rate metrics for a block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    pub cost_per_hour: f64,
}

/// A counter decrease observed between consecutive facts of one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetEvent {
    /// Position of the fact within its block
    pub index: usize,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of comparing delta-based and raw-sum token accounting
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationSummary {
    /// Sum of per-entry deltas; the authoritative total
    pub delta_totals: TokenCounts,
    /// Plain sum of the raw per-entry readings
    pub raw_totals: TokenCounts,
    /// Last reading seen in each category
    pub final_snapshot: TokenCounts,
    pub resets: Vec<ResetEvent>,
    pub divergent: bool,
}

impl ReconciliationSummary {
    pub fn reset_count(&self) -> usize {
        self.resets.len()
    }
}

/// Why the segmenter sealed a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    /// The next fact fell more than a session length after the block start
    Expired,
    /// The next fact came more than a session length after the previous one
    IdleGap,
    EndOfInput,
}

/// Summary of one session block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockReport {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub actual_end_time: DateTime<Utc>,
    pub is_active: bool,
    pub entry_count: u32,
    pub models: Vec<String>,
    pub close_reason: CloseReason,
    pub tokens: TokenAggregate,
    pub cost: CostSummary,
    pub reconciliation: ReconciliationSummary,
    pub burn_rate: Option<BurnRate>,
    pub time_remaining_minutes: Option<i64>,
    pub reset_time: Option<DateTime<Utc>>,
}

/// An entry whose authoritative cost disagrees with the estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostDiscrepancy {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub authoritative_usd: f64,
    pub calculated_usd: f64,
    pub difference_usd: f64,
}

/// Partial aggregate for a single log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub path: String,
    pub project_path: String,
    pub lines_read: u32,
    pub lines_skipped: u32,
    pub fact_count: u32,
    pub tokens: TokenCounts,
    pub calculated_usd: f64,
    pub authoritative_usd: f64,
}

/// Daily usage statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
    pub message_count: u32,
}

/// Statistics for a specific model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub message_count: u32,
    pub percentage: f64,
}

/// Counters describing what was dropped or guessed along the way
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub files_read: u32,
    pub files_skipped: u32,
    pub lines_skipped: u32,
    pub duplicates_removed: u32,
    /// Model ids priced with the fallback rate
    pub unknown_models: Vec<String>,
    /// Entries carrying a recorded `costUSD`
    #[serde(default)]
    pub entries_with_cost: u32,
    #[serde(default)]
    pub entries_with_model_and_usage: u32,
    /// Entries with a usage mapping but no model id; priced at the default rate
    #[serde(default)]
    pub entries_with_usage_no_model: u32,
    #[serde(default)]
    pub assistant_missing_model: u32,
    #[serde(default)]
    pub assistant_missing_usage: u32,
}

/// Grand totals across every block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    pub block_count: u32,
    pub fact_count: u32,
    pub tokens: TokenAggregate,
    pub raw_tokens: TokenCounts,
    pub cost: CostSummary,
    pub divergent_blocks: u32,
}

/// Complete aggregate report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub generated_at: DateTime<Utc>,
    pub blocks: Vec<BlockReport>,
    pub active_block_id: Option<String>,
    pub totals: ReportTotals,
    pub discrepancies: Vec<CostDiscrepancy>,
    pub daily_usage: Vec<DailyUsage>,
    pub model_distribution: Vec<ModelStats>,
    pub files: Vec<FileSummary>,
    pub data_quality: DataQuality,
}

impl UsageReport {
    pub fn active_block(&self) -> Option<&BlockReport> {
        self.blocks.iter().find(|b| b.is_active)
    }
}

/// Result of a run: either a report or an explicit "nothing to report"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ReportOutcome {
    NoData,
    Report(Box<UsageReport>),
}

impl ReportOutcome {
    pub fn report(&self) -> Option<&UsageReport> {
        match self {
            ReportOutcome::Report(report) => Some(report),
            ReportOutcome::NoData => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_data_path")]
    pub data_path: Option<String>,
    #[serde(default)]
    pub cache_tier: CacheTier,
    #[serde(default = "default_discrepancy_epsilon")]
    pub discrepancy_epsilon: f64,
    #[serde(default = "default_divergence_tolerance")]
    pub divergence_tolerance: f64,
    #[serde(default)]
    pub pricing_overrides: Vec<PricingOverride>,
}

fn default_data_path() -> Option<String> {
    None
}

fn default_discrepancy_epsilon() -> f64 {
    0.001
}

fn default_divergence_tolerance() -> f64 {
    0.01
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            cache_tier: CacheTier::default(),
            discrepancy_epsilon: default_discrepancy_epsilon(),
            divergence_tolerance: default_divergence_tolerance(),
            pricing_overrides: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_counts_add_saturates() {
        let a = TokenCounts::new(u64::MAX, 1, 2, 3);
        let b = TokenCounts::new(5, 1, 1, 1);
        let sum = a + b;
        assert_eq!(sum.input_tokens, u64::MAX);
        assert_eq!(sum.output_tokens, 2);
        assert_eq!(sum.cache_read_tokens, 4);
    }

    #[test]
    fn test_dedup_key_needs_both_ids() {
        let mut fact = UsageFact {
            timestamp: Utc::now(),
            model_id: None,
            tokens: TokenCounts::default(),
            cache_write_split: None,
            authoritative_cost: None,
            entry_kind: EntryKind::Assistant,
            has_usage: false,
            message_id: Some("msg_1".to_string()),
            request_id: None,
        };
        assert_eq!(fact.dedup_key(), None);

        fact.request_id = Some("req_1".to_string());
        assert_eq!(fact.dedup_key().as_deref(), Some("msg_1:req_1"));
    }

    #[test]
    fn test_no_data_outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&ReportOutcome::NoData).unwrap();
        assert_eq!(json, r#"{"status":"noData"}"#);
    }

    #[test]
    fn test_app_config_defaults_from_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.data_path.is_none());
        assert_eq!(config.cache_tier, CacheTier::FiveMinute);
        assert!((config.discrepancy_epsilon - 0.001).abs() < 1e-12);
        assert!(config.pricing_overrides.is_empty());
    }
}
