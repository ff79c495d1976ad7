//! Cost estimation from token counts and resolved pricing

use crate::usage::models::{CacheWriteSplit, TokenCounts, UsageFact};
use crate::usage::pricing::{CacheTier, PricingRate, PricingResolver};

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Absolute difference (USD) above which an authoritative cost is reported
pub const DEFAULT_DISCREPANCY_EPSILON: f64 = 0.001;

/// Cost of a set of token counts with every cache write on the default 5m tier
pub fn calculate_cost(tokens: &TokenCounts, rate: &PricingRate) -> f64 {
    calculate_cost_with_tiers(tokens, None, rate, CacheTier::FiveMinute)
}

/// Cost of a set of token counts.
///
/// Cache writes covered by an explicit split are billed at their own tier;
/// anything left over uses `default_tier`. No rounding is applied.
pub fn calculate_cost_with_tiers(
    tokens: &TokenCounts,
    split: Option<&CacheWriteSplit>,
    rate: &PricingRate,
    default_tier: CacheTier,
) -> f64 {
    let input_cost = per_million(tokens.input_tokens) * rate.input;
    let output_cost = per_million(tokens.output_tokens) * rate.output;

    let cache_write_cost = match split {
        Some(split) => {
            let unmarked = tokens
                .cache_creation_tokens
                .saturating_sub(split.five_minute)
                .saturating_sub(split.one_hour);
            per_million(split.five_minute) * rate.cache_write(CacheTier::FiveMinute)
                + per_million(split.one_hour) * rate.cache_write(CacheTier::OneHour)
                + per_million(unmarked) * rate.cache_write(default_tier)
        }
        None => per_million(tokens.cache_creation_tokens) * rate.cache_write(default_tier),
    };

    let cache_read_cost = per_million(tokens.cache_read_tokens) * rate.cache_read();

    input_cost + output_cost + cache_write_cost + cache_read_cost
}

fn per_million(tokens: u64) -> f64 {
    tokens as f64 / TOKENS_PER_MILLION
}

/// Calculated cost of one fact alongside its authoritative cost, if any
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub calculated: f64,
    pub authoritative: Option<f64>,
}

impl CostEstimate {
    /// The cost to report: authoritative when present, otherwise the estimate
    pub fn effective(&self) -> f64 {
        self.authoritative.unwrap_or(self.calculated)
    }

    /// Absolute difference between authoritative and calculated cost, when it
    /// exceeds `epsilon`
    pub fn discrepancy(&self, epsilon: f64) -> Option<f64> {
        let authoritative = self.authoritative?;
        let diff = (authoritative - self.calculated).abs();
        (diff > epsilon).then_some(diff)
    }
}

/// Estimate the cost of a single fact
pub fn estimate_fact(
    fact: &UsageFact,
    resolver: &PricingResolver,
    default_tier: CacheTier,
) -> CostEstimate {
    let rate = match fact.model_id.as_deref() {
        Some(model) => resolver.resolve(model),
        None => resolver.default_rate(),
    };

    CostEstimate {
        calculated: calculate_cost_with_tiers(
            &fact.tokens,
            fact.cache_write_split.as_ref(),
            &rate,
            default_tier,
        ),
        authoritative: fact.authoritative_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::models::EntryKind;
    use chrono::Utc;

    const SONNET: PricingRate = PricingRate::new(3.0, 15.0);

    #[test]
    fn test_calculate_cost_sonnet() {
        let tokens = TokenCounts::new(1_000_000, 500_000, 0, 0);
        let cost = calculate_cost(&tokens, &SONNET);
        // 3.0 input + 7.5 output
        assert!((cost - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_cache_components() {
        let tokens = TokenCounts::new(0, 0, 1_000_000, 1_000_000);
        let cost = calculate_cost(&tokens, &SONNET);
        // 3.75 write + 0.30 read
        assert!((cost - 4.05).abs() < 1e-9);

        let long = calculate_cost_with_tiers(&tokens, None, &SONNET, CacheTier::OneHour);
        assert!((long - 6.30).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_split_overrides_default_tier() {
        let tokens = TokenCounts::new(0, 0, 1_000_000, 0);
        let split = CacheWriteSplit {
            five_minute: 0,
            one_hour: 400_000,
        };
        let cost =
            calculate_cost_with_tiers(&tokens, Some(&split), &SONNET, CacheTier::FiveMinute);
        // 0.4M at 6.00 + 0.6M unmarked at 3.75
        assert!((cost - (2.4 + 2.25)).abs() < 1e-9);
    }

    #[test]
    fn test_cost_is_monotonic_in_each_category() {
        let base = TokenCounts::new(1_000, 2_000, 3_000, 4_000);
        let base_cost = calculate_cost(&base, &SONNET);
        let bumps = [
            TokenCounts::new(1, 0, 0, 0),
            TokenCounts::new(0, 1, 0, 0),
            TokenCounts::new(0, 0, 1, 0),
            TokenCounts::new(0, 0, 0, 1),
        ];
        for bump in bumps {
            for step in [1u64, 10, 1_000, 1_000_000] {
                let scaled = TokenCounts::new(
                    bump.input_tokens * step,
                    bump.output_tokens * step,
                    bump.cache_creation_tokens * step,
                    bump.cache_read_tokens * step,
                );
                assert!(calculate_cost(&(base + scaled), &SONNET) >= base_cost);
            }
        }
    }

    #[test]
    fn test_zero_tokens_cost_nothing() {
        assert_eq!(calculate_cost(&TokenCounts::default(), &SONNET), 0.0);
    }

    #[test]
    fn test_estimate_prefers_authoritative_cost() {
        let estimate = CostEstimate {
            calculated: 0.010,
            authoritative: Some(0.0125),
        };
        assert!((estimate.effective() - 0.0125).abs() < 1e-12);
        let diff = estimate.discrepancy(DEFAULT_DISCREPANCY_EPSILON).unwrap();
        assert!((diff - 0.0025).abs() < 1e-12);

        let close = CostEstimate {
            calculated: 0.010,
            authoritative: Some(0.0105),
        };
        assert_eq!(close.discrepancy(DEFAULT_DISCREPANCY_EPSILON), None);

        let estimated_only = CostEstimate {
            calculated: 0.02,
            authoritative: None,
        };
        assert_eq!(estimated_only.effective(), 0.02);
        assert_eq!(estimated_only.discrepancy(0.0), None);
    }

    #[test]
    fn test_estimate_fact_without_model_uses_default_rate() {
        let fact = UsageFact {
            timestamp: Utc::now(),
            model_id: None,
            tokens: TokenCounts::new(1_000_000, 0, 0, 0),
            cache_write_split: None,
            authoritative_cost: None,
            entry_kind: EntryKind::Assistant,
            has_usage: true,
            message_id: None,
            request_id: None,
        };
        let estimate = estimate_fact(&fact, &PricingResolver::new(), CacheTier::FiveMinute);
        assert!((estimate.calculated - 3.0).abs() < 1e-9);
    }
}
