use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// USD price per million tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

impl ModelPricing {
    pub const fn new(input_per_million: Decimal, output_per_million: Decimal) -> Self {
        Self { input_per_million, output_per_million }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Decimal {
        let million = Decimal::from(1_000_000u64);
        (Decimal::from(input_tokens) * self.input_per_million
            + Decimal::from(output_tokens) * self.output_per_million)
            / million
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceTable {
    models: BTreeMap<String, ModelPricing>,
    fallback: Option<ModelPricing>,
}

impl Default for PriceTable {
    fn default() -> Self {
        let models = [
            ("llama-3.1-8b-instant", 5, 8),
            ("llama-3.1-70b-versatile", 59, 79),
            ("llama-3.2-1b-preview", 4, 4),
            ("llama-3.2-3b-preview", 6, 6),
            ("gpt-4o-mini", 15, 60),
            ("deepseek-chat", 27, 110),
        ]
        .into_iter()
        .map(|(name, input_cents, output_cents)| {
            (
                name.to_string(),
                ModelPricing::new(Decimal::new(input_cents, 2), Decimal::new(output_cents, 2)),
            )
        })
        .collect();

        Self { models, fallback: None }
    }
}

impl PriceTable {
    pub fn empty() -> Self {
        Self { models: BTreeMap::new(), fallback: None }
    }

    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    /// Pricing applied to models missing from the table.
    pub fn with_fallback(mut self, pricing: ModelPricing) -> Self {
        self.fallback = Some(pricing);
        self
    }

    pub fn pricing(&self, model: &str) -> Option<ModelPricing> {
        self.models.get(model).copied().or(self.fallback)
    }

    /// Unknown models cost zero.
    pub fn estimate(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Decimal {
        self.pricing(model)
            .map(|pricing| pricing.cost(input_tokens, output_tokens))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Token and dollar totals for one request, summed across retries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub generation_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Decimal,
}

impl UsageTotals {
    pub fn record(&mut self, prices: &PriceTable, model: &str, input_tokens: u64, output_tokens: u64) {
        self.generation_calls += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cost_usd += prices.estimate(model, input_tokens, output_tokens);
    }
}
