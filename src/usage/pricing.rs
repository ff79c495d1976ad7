//! Pricing lookup for Claude models
//!
//! Model ids are matched against an ordered list of patterns. The id is
//! lower-cased and the first pattern it contains wins, so more specific
//! patterns must come before looser ones. [`validate_order`] enforces that no
//! pattern is shadowed by an earlier one.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

/// Cache writes are billed at a premium over the input rate
pub const CACHE_WRITE_5M_MULTIPLIER: f64 = 1.25;
pub const CACHE_WRITE_1H_MULTIPLIER: f64 = 2.0;
/// Cache reads are billed at a 90% discount on the input rate
pub const CACHE_READ_MULTIPLIER: f64 = 0.10;

/// Retention tier of a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheTier {
    #[default]
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "1h")]
    OneHour,
}

impl CacheTier {
    pub fn write_multiplier(self) -> f64 {
        match self {
            CacheTier::FiveMinute => CACHE_WRITE_5M_MULTIPLIER,
            CacheTier::OneHour => CACHE_WRITE_1H_MULTIPLIER,
        }
    }
}

impl FromStr for CacheTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "5m" | "short" => Ok(CacheTier::FiveMinute),
            "1h" | "long" => Ok(CacheTier::OneHour),
            other => Err(format!("unknown cache tier: {}", other)),
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::FiveMinute => write!(f, "5m"),
            CacheTier::OneHour => write!(f, "1h"),
        }
    }
}

/// Pricing per million tokens (USD)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingRate {
    pub input: f64,
    pub output: f64,
}

impl PricingRate {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn cache_write(&self, tier: CacheTier) -> f64 {
        self.input * tier.write_multiplier()
    }

    pub fn cache_read(&self) -> f64 {
        self.input * CACHE_READ_MULTIPLIER
    }
}

const OPUS_4_5: PricingRate = PricingRate::new(5.0, 25.0);
const OPUS: PricingRate = PricingRate::new(15.0, 75.0);
const SONNET: PricingRate = PricingRate::new(3.0, 15.0);
const HAIKU_4_5: PricingRate = PricingRate::new(1.0, 5.0);
const HAIKU_3_5: PricingRate = PricingRate::new(0.80, 4.0);
const HAIKU_3: PricingRate = PricingRate::new(0.25, 1.25);

/// Rate used for any model id no pattern matches
pub const DEFAULT_RATE: PricingRate = SONNET;

/// Built-in pricing table, most specific patterns first
pub const PRICING_TABLE: &[(&str, PricingRate)] = &[
    ("claude-opus-4-5", OPUS_4_5),
    ("claude-opus-4-1", OPUS),
    ("claude-opus-4", OPUS),
    ("claude-4-opus", OPUS),
    ("claude-3-opus", OPUS),
    ("claude-sonnet-4-5", SONNET),
    ("claude-sonnet-4", SONNET),
    ("claude-4-sonnet", SONNET),
    ("claude-3-7-sonnet", SONNET),
    ("claude-3-5-sonnet", SONNET),
    ("claude-3.5-sonnet", SONNET),
    ("claude-3-sonnet", SONNET),
    ("claude-haiku-4-5", HAIKU_4_5),
    ("claude-3-5-haiku", HAIKU_3_5),
    ("claude-3.5-haiku", HAIKU_3_5),
    ("claude-3-haiku", HAIKU_3),
];

/// User-supplied pricing entry, placed ahead of the built-in table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingOverride {
    pub pattern: String,
    pub input: f64,
    pub output: f64,
}

/// Error type for pricing table construction
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PricingError {
    #[error("Empty pricing pattern at position {0}")]
    EmptyPattern(usize),
    #[error("Invalid rate for pattern {0}: rates must be finite and non-negative")]
    InvalidRate(String),
    #[error("Pricing pattern {later:?} is unreachable: earlier pattern {earlier:?} always matches first")]
    Shadowed { earlier: String, later: String },
}

/// Check that no pattern is shadowed by an earlier one.
///
/// Matching is substring-based and first-match, so if an earlier pattern is a
/// substring of a later one, the later pattern can never win.
pub fn validate_order<S: AsRef<str>>(patterns: &[S]) -> Result<(), PricingError> {
    for (i, earlier) in patterns.iter().enumerate() {
        let earlier = earlier.as_ref();
        if earlier.is_empty() {
            return Err(PricingError::EmptyPattern(i));
        }
        for later in &patterns[i + 1..] {
            if later.as_ref().contains(earlier) {
                return Err(PricingError::Shadowed {
                    earlier: earlier.to_string(),
                    later: later.as_ref().to_string(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct PricingEntry {
    pattern: String,
    rate: PricingRate,
}

/// A resolved rate plus the pattern that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution<'a> {
    pub rate: PricingRate,
    /// `None` when the default rate was substituted
    pub matched: Option<&'a str>,
}

impl Resolution<'_> {
    pub fn is_fallback(&self) -> bool {
        self.matched.is_none()
    }
}

/// Maps model ids to per-million-token rates
#[derive(Debug, Clone)]
pub struct PricingResolver {
    entries: Vec<PricingEntry>,
    default_rate: PricingRate,
}

impl Default for PricingResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingResolver {
    /// Resolver over the built-in table
    pub fn new() -> Self {
        let entries = PRICING_TABLE
            .iter()
            .map(|(pattern, rate)| PricingEntry {
                pattern: pattern.to_string(),
                rate: *rate,
            })
            .collect();

        Self {
            entries,
            default_rate: DEFAULT_RATE,
        }
    }

    /// Resolver with user entries ahead of the built-in table.
    ///
    /// Overrides must be ordered among themselves. Built-in entries an override
    /// would shadow are dropped so the override covers the whole family.
    pub fn with_overrides(overrides: &[PricingOverride]) -> Result<Self, PricingError> {
        let mut entries = Vec::with_capacity(overrides.len() + PRICING_TABLE.len());
        for (i, o) in overrides.iter().enumerate() {
            let pattern = o.pattern.trim().to_lowercase();
            if pattern.is_empty() {
                return Err(PricingError::EmptyPattern(i));
            }
            if !valid_rate(o.input) || !valid_rate(o.output) {
                return Err(PricingError::InvalidRate(o.pattern.clone()));
            }
            entries.push(PricingEntry {
                pattern,
                rate: PricingRate::new(o.input, o.output),
            });
        }

        let override_patterns: Vec<&str> = entries.iter().map(|e| e.pattern.as_str()).collect();
        validate_order(&override_patterns)?;

        let builtin: Vec<PricingEntry> = PRICING_TABLE
            .iter()
            .filter(|(pattern, _)| {
                let shadowed = entries.iter().any(|e| pattern.contains(e.pattern.as_str()));
                if shadowed {
                    debug!("Pricing override replaces built-in entry {}", pattern);
                }
                !shadowed
            })
            .map(|(pattern, rate)| PricingEntry {
                pattern: pattern.to_string(),
                rate: *rate,
            })
            .collect();
        entries.extend(builtin);

        Ok(Self {
            entries,
            default_rate: DEFAULT_RATE,
        })
    }

    /// Patterns in match order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.pattern.as_str())
    }

    pub fn default_rate(&self) -> PricingRate {
        self.default_rate
    }

    /// Find the rate for a model id, reporting which pattern matched
    pub fn lookup(&self, model_id: &str) -> Resolution<'_> {
        let model_lower = model_id.to_lowercase();

        self.entries
            .iter()
            .find(|e| model_lower.contains(e.pattern.as_str()))
            .map(|e| Resolution {
                rate: e.rate,
                matched: Some(e.pattern.as_str()),
            })
            .unwrap_or(Resolution {
                rate: self.default_rate,
                matched: None,
            })
    }

    /// Get pricing for a model, falling back to the default rate
    pub fn resolve(&self, model_id: &str) -> PricingRate {
        self.lookup(model_id).rate
    }
}

fn valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate >= 0.0
}

/// Rate-limit weight of a model, used for weighted token totals
pub fn model_weight(model_id: Option<&str>) -> u64 {
    match model_id {
        Some(model) if model.to_lowercase().contains("opus") => 5,
        _ => 1,
    }
}
