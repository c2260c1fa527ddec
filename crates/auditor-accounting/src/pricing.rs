//! Model price table.
//!
//! Prices are USD per one million tokens. Models missing from the table fall
//! back to the configured default price.

use std::collections::HashMap;

use auditor_config::{ModelPrice, PricingConfig};
use serde::Serialize;

/// Upstream provider name for OpenAI
pub const PROVIDER_OPENAI: &str = "openai";
/// Upstream provider name for Anthropic
pub const PROVIDER_ANTHROPIC: &str = "anthropic";

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

const BUILTIN_PRICES: &[(&str, &str, f64, f64)] = &[
    (PROVIDER_OPENAI, "gpt-4o", 2.50, 10.00),
    (PROVIDER_OPENAI, "gpt-4o-mini", 0.15, 0.60),
    (PROVIDER_OPENAI, "gpt-4-turbo", 10.00, 30.00),
    (PROVIDER_OPENAI, "gpt-3.5-turbo", 0.50, 1.50),
    (PROVIDER_ANTHROPIC, "claude-3-5-sonnet-20241022", 3.00, 15.00),
    (PROVIDER_ANTHROPIC, "claude-3-opus-20240229", 15.00, 75.00),
    (PROVIDER_ANTHROPIC, "claude-3-sonnet-20240229", 3.00, 15.00),
    (PROVIDER_ANTHROPIC, "claude-3-haiku-20240307", 0.25, 1.25),
];

/// Round to six decimal places (micro-dollars)
#[must_use]
pub fn round_micros(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Cost breakdown for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Cost {
    /// Prompt cost
    pub input_cost: f64,
    /// Completion cost
    pub output_cost: f64,
    /// Sum of the two
    pub total_cost: f64,
}

/// Provider/model price lookup.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<(String, String), ModelPrice>,
    default: ModelPrice,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::from_config(&PricingConfig::default())
    }
}

impl PricingTable {
    /// Built-in prices with configured overrides layered on top
    #[must_use]
    pub fn from_config(config: &PricingConfig) -> Self {
        let mut prices: HashMap<(String, String), ModelPrice> = BUILTIN_PRICES
            .iter()
            .map(|(provider, model, input, output)| {
                (
                    ((*provider).to_string(), (*model).to_string()),
                    ModelPrice::new(*input, *output),
                )
            })
            .collect();

        for (provider, models) in &config.providers {
            for (model, price) in models {
                prices.insert((provider.clone(), model.clone()), *price);
            }
        }

        Self {
            prices,
            default: config.default,
        }
    }

    /// Price for a model, or the default price
    #[must_use]
    pub fn price(&self, provider: &str, model: &str) -> ModelPrice {
        self.prices
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or(self.default)
    }

    /// Whether the model has an explicit price
    #[must_use]
    pub fn is_known(&self, provider: &str, model: &str) -> bool {
        self.prices
            .contains_key(&(provider.to_string(), model.to_string()))
    }

    /// Cost of a call. Each part is rounded to micro-dollars and the total
    /// is the sum of the rounded parts.
    #[must_use]
    pub fn cost(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> Cost {
        let price = self.price(provider, model);
        let input_cost = round_micros(input_tokens as f64 / TOKENS_PER_UNIT * price.input);
        let output_cost = round_micros(output_tokens as f64 / TOKENS_PER_UNIT * price.output);
        Cost {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_builtin_price() {
        let table = PricingTable::default();
        let cost = table.cost(PROVIDER_OPENAI, "gpt-4o", 1_000_000, 1_000_000);
        assert!((cost.input_cost - 2.5).abs() < 1e-9);
        assert!((cost.output_cost - 10.0).abs() < 1e-9);
        assert!((cost.total_cost - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let table = PricingTable::default();
        assert!(!table.is_known(PROVIDER_OPENAI, "gpt-9"));
        let cost = table.cost(PROVIDER_OPENAI, "gpt-9", 1_000, 1_000);
        assert!((cost.input_cost - 0.001).abs() < 1e-12);
        assert!((cost.output_cost - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_provider_is_part_of_the_key() {
        let table = PricingTable::default();
        assert!(table.is_known(PROVIDER_ANTHROPIC, "claude-3-haiku-20240307"));
        assert!(!table.is_known(PROVIDER_OPENAI, "claude-3-haiku-20240307"));
    }

    #[test]
    fn test_total_is_sum_of_rounded_parts() {
        let table = PricingTable::default();
        let cost = table.cost(PROVIDER_OPENAI, "gpt-4o-mini", 333, 777);
        assert!((cost.total_cost - (cost.input_cost + cost.output_cost)).abs() < 1e-12);
        assert!((cost.input_cost - round_micros(cost.input_cost)).abs() < 1e-15);
    }

    #[test]
    fn test_config_overrides() {
        let mut config = PricingConfig::default();
        config.default = ModelPrice::new(0.0, 0.0);
        config.providers.insert(
            PROVIDER_OPENAI.to_string(),
            BTreeMap::from([("gpt-4o".to_string(), ModelPrice::new(5.0, 20.0))]),
        );

        let table = PricingTable::from_config(&config);
        assert!((table.price(PROVIDER_OPENAI, "gpt-4o").input - 5.0).abs() < f64::EPSILON);
        assert!((table.price(PROVIDER_OPENAI, "gpt-4o-mini").input - 0.15).abs() < f64::EPSILON);
        assert!(table.cost(PROVIDER_OPENAI, "unknown", 10, 10).total_cost.abs() < f64::EPSILON);
    }
}
