//! Estimated USD cost per model invocation.
//!
//! Rates are USD per million tokens and approximate list prices as of early
//! 2026. This is an estimate for comparing sessions, not a billing figure.

/// Per-million-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cached_input: f64,
}

impl ModelPricing {
    const fn new(input: f64, output: f64, cached_input: f64) -> Self {
        Self {
            input,
            output,
            cached_input,
        }
    }
}

const OPUS: ModelPricing = ModelPricing::new(15.00, 75.00, 1.50);
const SONNET: ModelPricing = ModelPricing::new(3.00, 15.00, 0.30);
const HAIKU: ModelPricing = ModelPricing::new(0.80, 4.00, 0.08);
const GPT: ModelPricing = ModelPricing::new(2.00, 8.00, 0.50);
const GPT_MINI: ModelPricing = ModelPricing::new(0.40, 1.60, 0.10);
const GEMINI_PRO: ModelPricing = ModelPricing::new(1.25, 10.00, 0.31);

/// Rates used for any model not in [`MODEL_PRICING`].
pub const DEFAULT_PRICING: ModelPricing = SONNET;

/// Known model identifiers, matched exactly.
pub const MODEL_PRICING: &[(&str, ModelPricing)] = &[
    ("claude-opus-4.6", OPUS),
    ("claude-opus-4.5", OPUS),
    ("claude-sonnet-4.6", SONNET),
    ("claude-sonnet-4.5", SONNET),
    ("claude-sonnet-4", SONNET),
    ("claude-haiku-4.5", HAIKU),
    ("gpt-5.3-codex", GPT),
    ("gpt-5.2-codex", GPT),
    ("gpt-5.2", GPT),
    ("gpt-5.1-codex-max", GPT),
    ("gpt-5.1-codex", GPT),
    ("gpt-5.1", GPT),
    ("gpt-5.1-codex-mini", GPT_MINI),
    ("gpt-5-mini", GPT_MINI),
    ("gpt-4.1", GPT),
    ("gemini-3-pro-preview", GEMINI_PRO),
];

/// Look up the rates for a model, falling back to [`DEFAULT_PRICING`].
pub fn pricing_for(model: &str) -> &'static ModelPricing {
    MODEL_PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, p)| p)
        .unwrap_or(&DEFAULT_PRICING)
}

/// Estimate the cost of one call.
///
/// Cache reads are billed at the cached rate and subtracted from the fresh
/// input count. The result is rounded to 6 decimal places.
pub fn compute_cost(
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    model: &str,
) -> f64 {
    let pricing = pricing_for(model);
    let fresh_input = input_tokens.saturating_sub(cache_read_tokens);
    let cost = (fresh_input as f64 * pricing.input
        + cache_read_tokens as f64 * pricing.cached_input
        + output_tokens as f64 * pricing.output)
        / 1_000_000.0;
    round_to(cost, 6)
}

/// Round half-to-even at `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round_ties_even() / scale
}
