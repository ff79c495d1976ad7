//! Report assembly for usage data

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Utc};
use log::debug;

use crate::usage::blocks::{find_active_block, identify_blocks, SessionBlock};
use crate::usage::cost::{estimate_fact, CostEstimate, DEFAULT_DISCREPANCY_EPSILON};
use crate::usage::models::{
    AppConfig, BlockReport, BurnRate, CostDiscrepancy, CostSummary, DailyUsage, DataQuality,
    EntryKind, FileSummary, ModelStats, ReportOutcome, ReportTotals, TokenAggregate, TokenCounts,
    UsageFact, UsageReport,
};
use crate::usage::pricing::{model_weight, CacheTier, PricingResolver};
use crate::usage::reader::{load_all_files, merge_facts, LoadResult, ParsedFile};
use crate::usage::reconcile::{reconcile_weighted, DEFAULT_DIVERGENCE_TOLERANCE};

/// Shortest first-to-last span over which a burn rate is reported
const MIN_BURN_RATE_SECONDS: i64 = 60;

/// Knobs for report assembly taken from the app config
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportSettings {
    pub default_tier: CacheTier,
    pub discrepancy_epsilon: f64,
    pub divergence_tolerance: f64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            default_tier: CacheTier::default(),
            discrepancy_epsilon: DEFAULT_DISCREPANCY_EPSILON,
            divergence_tolerance: DEFAULT_DIVERGENCE_TOLERANCE,
        }
    }
}

impl From<&AppConfig> for ReportSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_tier: config.cache_tier,
            discrepancy_epsilon: config.discrepancy_epsilon,
            divergence_tolerance: config.divergence_tolerance,
        }
    }
}

/// Filter options for usage data
#[derive(Debug, Default)]
pub struct FilterOptions {
    /// Filter by start date (inclusive)
    pub start_date: Option<DateTime<Utc>>,
    /// Filter by end date (inclusive)
    pub end_date: Option<DateTime<Utc>>,
    /// Filter by project path (decoded)
    pub project_path: Option<String>,
}

impl FilterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project_path = project;
        self
    }

    pub fn matches_project(&self, project_path: &str) -> bool {
        match &self.project_path {
            Some(filter_project) => filter_project == project_path,
            None => true,
        }
    }

    /// Check if a fact passes the date range
    pub fn matches(&self, fact: &UsageFact) -> bool {
        if let Some(start) = &self.start_date {
            if fact.timestamp < *start {
                return false;
            }
        }
        if let Some(end) = &self.end_date {
            if fact.timestamp > *end {
                return false;
            }
        }
        true
    }
}

fn cost_summary_of(estimate: &CostEstimate) -> CostSummary {
    let authoritative = estimate.authoritative.is_some() as u32;
    CostSummary {
        calculated_usd: estimate.calculated,
        authoritative_usd: estimate.authoritative.unwrap_or(0.0),
        effective_usd: estimate.effective(),
        authoritative_entries: authoritative,
        estimated_entries: 1 - authoritative,
    }
}

/// Partial aggregate for one file; independent of every other file
fn summarize_file(
    file: &ParsedFile,
    facts: &[UsageFact],
    resolver: &PricingResolver,
    tier: CacheTier,
) -> FileSummary {
    let mut summary = FileSummary {
        path: file.path.to_string_lossy().to_string(),
        project_path: file.project_path.clone(),
        lines_read: file.lines_read,
        lines_skipped: file.lines_skipped,
        fact_count: facts.len() as u32,
        ..Default::default()
    };

    for fact in facts {
        let estimate = estimate_fact(fact, resolver, tier);
        summary.tokens += fact.tokens;
        summary.calculated_usd += estimate.calculated;
        summary.authoritative_usd += estimate.authoritative.unwrap_or(0.0);
    }

    summary
}

/// Burn rate over the span between a block's first and last fact
fn calculate_burn_rate(block: &SessionBlock, total_tokens: u64, cost_usd: f64) -> Option<BurnRate> {
    let first = block.facts.first()?.timestamp;
    let span = block.actual_end() - first;
    if span.num_seconds() < MIN_BURN_RATE_SECONDS {
        return None;
    }

    let minutes = span.num_seconds() as f64 / 60.0;
    Some(BurnRate {
        tokens_per_minute: total_tokens as f64 / minutes,
        cost_per_hour: cost_usd / minutes * 60.0,
    })
}

fn summarize_block(
    block: &SessionBlock,
    estimates: &[CostEstimate],
    settings: &ReportSettings,
    active_id: Option<&str>,
    now: DateTime<Utc>,
) -> BlockReport {
    let id = block.id();
    let is_active = active_id == Some(id.as_str());

    let (reconciliation, weighted_tokens) =
        reconcile_weighted(&block.facts, settings.divergence_tolerance, |fact| {
            model_weight(fact.model_id.as_deref())
        });

    let tokens = TokenAggregate {
        total_tokens: reconciliation.delta_totals.total(),
        weighted_tokens,
        breakdown: reconciliation.delta_totals,
    };

    let cost = estimates
        .iter()
        .map(cost_summary_of)
        .fold(CostSummary::default(), CostSummary::merge);

    let burn_rate = calculate_burn_rate(block, tokens.total_tokens, cost.effective_usd);

    let (time_remaining_minutes, reset_time) = if is_active {
        let remaining = (block.end() - now).num_minutes().max(0);
        (Some(remaining), Some(block.end()))
    } else {
        (None, None)
    };

    BlockReport {
        id,
        start_time: block.start,
        end_time: block.end(),
        actual_end_time: block.actual_end(),
        is_active,
        entry_count: block.facts.len() as u32,
        models: block.models(),
        close_reason: block.close_reason,
        tokens,
        cost,
        reconciliation,
        burn_rate,
        time_remaining_minutes,
        reset_time,
    }
}

/// Entries whose authoritative cost disagrees with the estimate by more than `epsilon`
pub fn find_discrepancies(
    priced: &[(&UsageFact, &CostEstimate)],
    epsilon: f64,
) -> Vec<CostDiscrepancy> {
    priced
        .iter()
        .filter_map(|(fact, estimate)| {
            let difference = estimate.discrepancy(epsilon)?;
            Some(CostDiscrepancy {
                timestamp: fact.timestamp,
                model: fact.model_name().to_string(),
                authoritative_usd: estimate.authoritative.unwrap_or(0.0),
                calculated_usd: estimate.calculated,
                difference_usd: difference,
            })
        })
        .collect()
}

/// Calculate daily usage, keyed by UTC date.
///
/// Token columns sum each entry's raw counts, the same basis its cost is
/// priced on. Block totals use cumulative deltas instead, so the two views
/// can differ when a block diverges.
pub fn calculate_daily_usage(priced: &[(&UsageFact, &CostEstimate)]) -> Vec<DailyUsage> {
    let mut daily_map: HashMap<String, DailyUsage> = HashMap::new();

    for (fact, estimate) in priced {
        let date_key = format!(
            "{:04}-{:02}-{:02}",
            fact.timestamp.year(),
            fact.timestamp.month(),
            fact.timestamp.day()
        );

        let daily = daily_map.entry(date_key.clone()).or_insert_with(|| DailyUsage {
            date: date_key,
            ..Default::default()
        });

        daily.input_tokens = daily.input_tokens.saturating_add(fact.tokens.input_tokens);
        daily.output_tokens = daily.output_tokens.saturating_add(fact.tokens.output_tokens);
        daily.cache_creation_tokens = daily
            .cache_creation_tokens
            .saturating_add(fact.tokens.cache_creation_tokens);
        daily.cache_read_tokens = daily.cache_read_tokens.saturating_add(fact.tokens.cache_read_tokens);
        daily.cost_usd += estimate.effective();
        daily.message_count = daily.message_count.saturating_add(1);
    }

    let mut daily_list: Vec<_> = daily_map.into_values().collect();
    daily_list.sort_by(|a, b| a.date.cmp(&b.date));
    daily_list
}

/// Calculate model distribution; shares are of input plus output tokens.
///
/// Like daily usage this sums raw per-entry counts, not block deltas.
pub fn calculate_model_distribution(priced: &[(&UsageFact, &CostEstimate)]) -> Vec<ModelStats> {
    let mut model_map: HashMap<String, ModelStats> = HashMap::new();
    let mut total_tokens: u64 = 0;

    for (fact, estimate) in priced {
        let model_key = fact.model_name().to_string();
        let entry_total = fact.tokens.input_tokens.saturating_add(fact.tokens.output_tokens);
        total_tokens = total_tokens.saturating_add(entry_total);

        let stats = model_map.entry(model_key.clone()).or_insert_with(|| ModelStats {
            model: model_key,
            ..Default::default()
        });

        stats.input_tokens = stats.input_tokens.saturating_add(fact.tokens.input_tokens);
        stats.output_tokens = stats.output_tokens.saturating_add(fact.tokens.output_tokens);
        stats.cache_creation_tokens = stats
            .cache_creation_tokens
            .saturating_add(fact.tokens.cache_creation_tokens);
        stats.cache_read_tokens = stats.cache_read_tokens.saturating_add(fact.tokens.cache_read_tokens);
        stats.cost_usd += estimate.effective();
        stats.message_count = stats.message_count.saturating_add(1);
        stats.total_tokens = stats.total_tokens.saturating_add(entry_total);
    }

    let mut model_list: Vec<_> = model_map
        .into_values()
        .map(|mut m| {
            m.percentage = if total_tokens > 0 {
                (m.total_tokens as f64 / total_tokens as f64) * 100.0
            } else {
                0.0
            };
            m
        })
        .collect();

    // Sort by total tokens descending, then by name for a stable order
    model_list.sort_by(|a, b| {
        b.total_tokens
            .cmp(&a.total_tokens)
            .then_with(|| a.model.cmp(&b.model))
    });
    model_list
}

/// Model ids that fell through to the default rate, logged once each
fn collect_unknown_models(facts: &[UsageFact], resolver: &PricingResolver) -> Vec<String> {
    let distinct: BTreeSet<&str> = facts.iter().filter_map(|f| f.model_id.as_deref()).collect();

    distinct
        .into_iter()
        .filter(|model| resolver.lookup(model).is_fallback())
        .map(|model| {
            debug!("No pricing entry for model {}, using default rate", model);
            model.to_string()
        })
        .collect()
}

/// Count how many entries can be priced from recorded cost, from model and
/// usage, or only from usage at the default rate
fn count_cost_data(facts: &[UsageFact], quality: &mut DataQuality) {
    for fact in facts {
        let has_model = fact.model_id.is_some();
        if fact.authoritative_cost.is_some() {
            quality.entries_with_cost += 1;
        }
        if has_model && fact.has_usage {
            quality.entries_with_model_and_usage += 1;
        } else if fact.has_usage {
            quality.entries_with_usage_no_model += 1;
        }
        if fact.entry_kind == EntryKind::Assistant {
            if !has_model {
                quality.assistant_missing_model += 1;
            }
            if !fact.has_usage {
                quality.assistant_missing_usage += 1;
            }
        }
    }
}

/// Fold block summaries into grand totals
pub fn calculate_totals(blocks: &[BlockReport]) -> ReportTotals {
    ReportTotals {
        block_count: blocks.len() as u32,
        fact_count: blocks.iter().map(|b| b.entry_count).sum(),
        tokens: blocks
            .iter()
            .map(|b| b.tokens)
            .fold(TokenAggregate::default(), TokenAggregate::merge),
        raw_tokens: blocks
            .iter()
            .map(|b| b.reconciliation.raw_totals)
            .fold(TokenCounts::default(), |acc, t| acc + t),
        cost: blocks
            .iter()
            .map(|b| b.cost)
            .fold(CostSummary::default(), CostSummary::merge),
        divergent_blocks: blocks.iter().filter(|b| b.reconciliation.divergent).count() as u32,
    }
}

/// Build the complete report from loaded files.
///
/// Filters are applied per file, the surviving facts are merged into one
/// sorted and deduplicated stream, and that stream is segmented into blocks.
/// Returns `NoData` when no fact survives.
pub fn build_report(
    load: LoadResult,
    filter: &FilterOptions,
    resolver: &PricingResolver,
    settings: &ReportSettings,
    now: DateTime<Utc>,
) -> ReportOutcome {
    let mut data_quality = DataQuality {
        files_read: load.files.len() as u32,
        files_skipped: load.files_skipped,
        ..Default::default()
    };

    let mut files: Vec<FileSummary> = Vec::new();
    let mut all_facts: Vec<UsageFact> = Vec::new();

    for file in &load.files {
        data_quality.lines_skipped = data_quality.lines_skipped.saturating_add(file.lines_skipped);
        if !filter.matches_project(&file.project_path) {
            continue;
        }

        let facts: Vec<UsageFact> = file
            .facts
            .iter()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        if facts.is_empty() {
            continue;
        }

        files.push(summarize_file(file, &facts, resolver, settings.default_tier));
        all_facts.extend(facts);
    }

    if all_facts.is_empty() {
        return ReportOutcome::NoData;
    }

    let (facts, duplicates) = merge_facts(all_facts);
    data_quality.duplicates_removed = duplicates;
    data_quality.unknown_models = collect_unknown_models(&facts, resolver);
    count_cost_data(&facts, &mut data_quality);

    let blocks = identify_blocks(facts);
    let active_block_id = find_active_block(&blocks, now).map(SessionBlock::id);

    let estimates: Vec<Vec<CostEstimate>> = blocks
        .iter()
        .map(|block| {
            block
                .facts
                .iter()
                .map(|f| estimate_fact(f, resolver, settings.default_tier))
                .collect()
        })
        .collect();

    let block_reports: Vec<BlockReport> = blocks
        .iter()
        .zip(&estimates)
        .map(|(block, est)| summarize_block(block, est, settings, active_block_id.as_deref(), now))
        .collect();

    let priced: Vec<(&UsageFact, &CostEstimate)> = blocks
        .iter()
        .zip(&estimates)
        .flat_map(|(block, est)| block.facts.iter().zip(est.iter()))
        .collect();

    let totals = calculate_totals(&block_reports);
    debug!(
        "Built {} blocks from {} facts ({} duplicates removed)",
        totals.block_count, totals.fact_count, duplicates
    );

    ReportOutcome::Report(Box::new(UsageReport {
        generated_at: now,
        blocks: block_reports,
        active_block_id,
        totals,
        discrepancies: find_discrepancies(&priced, settings.discrepancy_epsilon),
        daily_usage: calculate_daily_usage(&priced),
        model_distribution: calculate_model_distribution(&priced),
        files,
        data_quality,
    }))
}

/// Load every file under `data_dirs` and build the report
pub fn get_usage_report(
    data_dirs: &[PathBuf],
    filter: &FilterOptions,
    resolver: &PricingResolver,
    settings: &ReportSettings,
    now: DateTime<Utc>,
) -> ReportOutcome {
    let load = load_all_files(data_dirs);
    build_report(load, filter, resolver, settings, now)
}
