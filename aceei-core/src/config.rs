use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::ConfigError;
use crate::optimizer::OptimizerConfig;
use crate::types::{Price, PriceVector, TieBreak};

/// Where the price search starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialPrices {
    #[default]
    Zero,
    Uniform { price: Price },
    /// Independent uniform draws in `[0, max]`, from the search seed.
    Random { max: Price },
}

impl InitialPrices {
    pub fn build(self, num_items: usize, rng: &mut impl rand::Rng) -> PriceVector {
        match self {
            InitialPrices::Zero => PriceVector::zeros(num_items),
            InitialPrices::Uniform { price } => PriceVector::uniform(num_items, price),
            InitialPrices::Random { max } => {
                PriceVector::from_vec((0..num_items).map(|_| rng.random_range(0.0..=max)).collect())
            }
        }
    }
}

/// Hyperparameters of the tabu price search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(default)]
pub struct SearchConfig {
    /// Price step for neighbour moves.
    pub delta: Price,
    /// Clearing error at or below which the market counts as cleared.
    pub epsilon: f64,
    /// Two price vectors closer than this (per item) are the same vector.
    /// Must stay below `delta / 2`.
    pub price_tolerance: Price,
    /// Width of the budget interval scanned above each agent's budget.
    pub budget_window: Price,
    pub tie_break: TieBreak,
    /// Number of recently visited vectors that are tabu.
    pub tabu_tenure: usize,
    pub max_iterations: u32,
    /// Wall-clock budget, checked once per iteration.
    pub time_limit_secs: Option<f64>,
    /// Per-item neighbours generated each iteration, largest |excess| first.
    pub max_individual_moves: usize,
    /// Evaluated vectors kept for reuse, oldest dropped first.
    pub cache_capacity: usize,
    pub initial_prices: InitialPrices,
    pub seed: u64,
    pub big_m: Option<f64>,
    pub max_oversubscription: Option<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            delta: 0.1,
            epsilon: 1e-6,
            price_tolerance: 1e-9,
            budget_window: 0.1,
            tie_break: TieBreak::None,
            tabu_tenure: 20,
            max_iterations: 200,
            time_limit_secs: None,
            max_individual_moves: 16,
            cache_capacity: 4096,
            initial_prices: InitialPrices::Zero,
            seed: 0,
            big_m: None,
            max_oversubscription: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(ConfigError::InvalidDelta(self.delta));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        let tolerance = self.price_tolerance;
        if !(tolerance.is_finite() && tolerance > 0.0 && tolerance < self.delta / 2.0) {
            return Err(ConfigError::InvalidPriceTolerance {
                tolerance,
                delta: self.delta,
            });
        }
        if !(self.budget_window.is_finite() && self.budget_window >= 0.0) {
            return Err(ConfigError::InvalidBudgetWindow(self.budget_window));
        }
        if self.tabu_tenure == 0 {
            return Err(ConfigError::ZeroTabuTenure);
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if let Some(secs) = self.time_limit_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(ConfigError::InvalidTimeLimit(secs));
            }
        }
        match self.initial_prices {
            InitialPrices::Uniform { price: p } | InitialPrices::Random { max: p }
                if !(p.is_finite() && p >= 0.0) =>
            {
                return Err(ConfigError::InvalidInitialPrice(p));
            }
            _ => {}
        }
        if let Some(limit) = self.max_oversubscription {
            if !(limit.is_finite() && limit >= 0.0) {
                return Err(ConfigError::InvalidOversubscription(limit));
            }
        }
        Ok(())
    }

    pub fn optimizer(&self) -> OptimizerConfig {
        OptimizerConfig {
            big_m: self.big_m,
            max_oversubscription: self.max_oversubscription,
        }
    }
}
