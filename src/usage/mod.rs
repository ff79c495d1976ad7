//! Claude Code usage blocks - parsing, pricing, segmentation and reporting

pub mod models;
pub mod reader;
pub mod pricing;
pub mod cost;
pub mod blocks;
pub mod reconcile;
pub mod stats;
pub mod export;
pub mod config;

pub use models::*;
pub use reader::{load_all_files, merge_facts, parse_line, parse_record, LoadResult, ReaderError, RejectReason};
pub use pricing::{model_weight, CacheTier, PricingError, PricingOverride, PricingRate, PricingResolver};
pub use cost::{calculate_cost, calculate_cost_with_tiers, estimate_fact, CostEstimate};
pub use blocks::{find_active_block, identify_blocks, BlockSegmenter, SessionBlock};
pub use reconcile::{category_deltas, reconcile, reconcile_weighted, TokenReconciler};
pub use stats::{build_report, get_usage_report, FilterOptions, ReportSettings};
pub use export::{read_snapshot, write_snapshot, ExportError};
pub use config::{get_claude_data_dirs, load_config, ConfigError};
