//! Cost estimation from reported token usage.

use std::fmt;

use crate::model::Usage;

/// Price in milli-units of `currency` per million tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Price {
    pub input: u64,
    pub cached_input: u64,
    pub output: u64,
    pub currency: String,
}

impl Price {
    /// `deepseek-reasoner` snapshot of 2025-04-14.
    pub fn deepseek_reasoner() -> Self {
        Self {
            input: 4_000,
            cached_input: 1_000,
            output: 16_000,
            currency: "CNY".into(),
        }
    }

    /// Estimated cost of one response.
    pub fn cost(&self, usage: &Usage) -> Cost {
        let cached = usage.prompt_tokens_details.cached_tokens;
        let uncached = usage.prompt_tokens.saturating_sub(cached);
        // milli-unit per million tokens == parts per billion of a unit.
        let ppb = u128::from(self.input) * u128::from(uncached)
            + u128::from(self.cached_input) * u128::from(cached)
            + u128::from(self.output) * u128::from(usage.completion_tokens);
        Cost {
            amount: ppb as f64 / 1_000_000_000.0,
            currency: self.currency.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cost {
    pub amount: f64,
    pub currency: String,
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PromptTokensDetails;

    #[test]
    fn cached_tokens_are_billed_separately() {
        let price = Price {
            input: 1_000_000,
            cached_input: 1_000,
            output: 1_000_000_000,
            currency: "XAG".into(),
        };
        let usage = Usage {
            prompt_tokens: 3,
            completion_tokens: 3,
            prompt_tokens_details: PromptTokensDetails { cached_tokens: 2 },
            ..Usage::default()
        };
        assert_eq!(price.cost(&usage).to_string(), "3.001 XAG");
    }

    #[test]
    fn huge_reported_usage_does_not_overflow() {
        let usage = Usage {
            prompt_tokens: u64::MAX,
            completion_tokens: u64::MAX,
            ..Usage::default()
        };
        let cost = Price::deepseek_reasoner().cost(&usage);
        assert!(cost.amount.is_finite());
        assert!(cost.amount > 1e14);
    }

    #[test]
    fn reasoner_price_for_typical_answer() {
        let usage = Usage {
            prompt_tokens: 1_000_000,
            completion_tokens: 1_000_000,
            ..Usage::default()
        };
        assert_eq!(
            Price::deepseek_reasoner().cost(&usage).to_string(),
            "20.000 CNY"
        );
    }
}
