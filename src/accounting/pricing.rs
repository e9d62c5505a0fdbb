//! Token-based cost calculation per tier.
//!
//! ## Pricing Strategy
//!
//! - **Input tokens**: charged at the tier's per-1M-token input rate
//! - **Output tokens**: charged at the tier's per-1M-token output rate
//! - **Total cost**: `(input/1e6 * input_rate) + (output/1e6 * output_rate)`
//!
//! ## Example
//!
//! ```rust
//! use tierflow::accounting::PriceTable;
//! use tierflow::config::TiersConfig;
//! use tierflow::routing::Tier;
//!
//! let prices = PriceTable::from_config(&TiersConfig::default());
//! // Premium: $15/1M input + $75/1M output
//! let cost = prices.cost(Tier::Premium, 1_000_000, 0);
//! assert!((cost - 15.0).abs() < 1e-9);
//! ```

use crate::config::TiersConfig;
use crate::routing::Tier;

/// Prices for one tier, in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl TierPricing {
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

/// Price table for all tiers. Cheap to clone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTable {
    prices: [TierPricing; 3],
}

impl PriceTable {
    pub fn from_config(tiers: &TiersConfig) -> Self {
        let pricing = |tier: Tier| {
            let cfg = tiers.get(tier);
            TierPricing {
                input_per_million: cfg.input_cost_per_million,
                output_per_million: cfg.output_cost_per_million,
            }
        };
        Self {
            prices: [
                pricing(Tier::Cheap),
                pricing(Tier::Capable),
                pricing(Tier::Premium),
            ],
        }
    }

    pub fn get(&self, tier: Tier) -> TierPricing {
        self.prices[tier_index(tier)]
    }

    /// Cost in USD of a call at `tier` with the given token counts.
    pub fn cost(&self, tier: Tier, input_tokens: u32, output_tokens: u32) -> f64 {
        self.get(tier).cost(input_tokens, output_tokens)
    }

    /// Cost of the same call at the most expensive tier.
    pub fn baseline_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        self.cost(Tier::MOST_EXPENSIVE, input_tokens, output_tokens)
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::from_config(&TiersConfig::default())
    }
}

fn tier_index(tier: Tier) -> usize {
    match tier {
        Tier::Cheap => 0,
        Tier::Capable => 1,
        Tier::Premium => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prices() {
        let prices = PriceTable::default();

        // Cheap: $0.25 input + $1.25 output per 1M tokens
        let cost = prices.cost(Tier::Cheap, 1_000_000, 1_000_000);
        assert!((cost - 1.5).abs() < 1e-9);

        // Capable: 1000 in, 500 out = 0.003 + 0.0075
        let cost = prices.cost(Tier::Capable, 1000, 500);
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn test_zero_tokens_cost_nothing() {
        let prices = PriceTable::default();
        for tier in Tier::ALL {
            assert_eq!(prices.cost(tier, 0, 0), 0.0);
        }
    }

    #[test]
    fn test_baseline_uses_premium() {
        let prices = PriceTable::default();
        assert_eq!(
            prices.baseline_cost(1234, 567),
            prices.cost(Tier::Premium, 1234, 567)
        );
        assert!(prices.baseline_cost(1234, 567) >= prices.cost(Tier::Cheap, 1234, 567));
    }

    #[test]
    fn test_from_custom_config() {
        let mut tiers = TiersConfig::default();
        tiers.cheap.input_cost_per_million = 1.0;
        tiers.cheap.output_cost_per_million = 2.0;
        let prices = PriceTable::from_config(&tiers);
        assert_eq!(
            prices.get(Tier::Cheap),
            TierPricing {
                input_per_million: 1.0,
                output_per_million: 2.0
            }
        );
    }
}
