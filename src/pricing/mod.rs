//! Token pricing and cost calculation.
//!
//! Costs are integers in microcents (1/10,000 of a cent; 1 USD =
//! 1,000,000 microcents) so accounting never accumulates float drift.
//! Prices are per 1,000 tokens to match how tenants reason about them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-model token prices.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_per_1k_microcents: i64,
    pub output_per_1k_microcents: i64,
}

impl ModelPricing {
    pub const fn per_1k(input: i64, output: i64) -> Self {
        Self {
            input_per_1k_microcents: input,
            output_per_1k_microcents: output,
        }
    }
}

/// Model-id → prices. Unknown models cost nothing; callers log them when
/// recording usage.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
}

/// One USD expressed in microcents.
const MICROCENTS_PER_USD: i64 = 1_000_000;

impl PricingTable {
    pub fn new(models: HashMap<String, ModelPricing>) -> Self {
        Self { models }
    }

    /// The built-in price list. Values are microcents per 1k tokens, e.g.
    /// gpt-4 input at $0.03/1k = 3 cents/1k = 30,000 microcents/1k.
    pub fn with_defaults() -> Self {
        let mut models = HashMap::new();
        models.insert("gpt-4".into(), ModelPricing::per_1k(30_000, 60_000));
        models.insert("gpt-4-turbo".into(), ModelPricing::per_1k(10_000, 30_000));
        models.insert("gpt-4o".into(), ModelPricing::per_1k(2_500, 10_000));
        models.insert("gpt-4o-mini".into(), ModelPricing::per_1k(150, 600));
        models.insert("gpt-3.5-turbo".into(), ModelPricing::per_1k(500, 1_500));
        models.insert("claude-3-opus".into(), ModelPricing::per_1k(15_000, 75_000));
        models.insert(
            "claude-3-5-sonnet".into(),
            ModelPricing::per_1k(3_000, 15_000),
        );
        models.insert("claude-3-haiku".into(), ModelPricing::per_1k(250, 1_250));
        Self { models }
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.models.get(model).copied()
    }

    /// Cost of a completion in microcents, or `None` for unknown models.
    pub fn cost_microcents(
        &self,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Option<i64> {
        let pricing = self.get(model)?;
        let input = (input_tokens as i128 * pricing.input_per_1k_microcents as i128) / 1000;
        let output = (output_tokens as i128 * pricing.output_per_1k_microcents as i128) / 1000;
        Some((input + output).clamp(0, i64::MAX as i128) as i64)
    }
}

/// Render a microcent amount as USD for wire payloads.
pub fn microcents_to_usd(microcents: i64) -> f64 {
    microcents as f64 / MICROCENTS_PER_USD as f64
}

/// Convert a USD amount to microcents (budget configuration, seeding).
pub fn usd_to_microcents(usd: f64) -> i64 {
    (usd * MICROCENTS_PER_USD as f64).round() as i64
}
