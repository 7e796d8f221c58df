// Core value types shared by the demand oracle, envy builder, optimizer and search

use std::fmt;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::ConfigError;

// === TYPE ALIASES ===

pub type Price = f64;
pub type Value = f64;

/// Absolute tolerance for comparing prices and bundle costs.
pub const PRICE_EPS: f64 = 1e-9;
/// Absolute tolerance for comparing bundle values.
pub const VALUE_EPS: f64 = 1e-9;

// === NEWTYPE IDS ===

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct AgentId(pub u32);

impl AgentId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ItemId(pub u32);

impl ItemId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// === TIE-BREAK MODE ===

/// Which envy-freeness-with-tie-breaking constraint the optimizer enforces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// No envy constraint
    #[default]
    None,
    /// Compare the envied bundle as given
    Standard,
    /// Credit the envier with every free item it could add to the envied bundle
    Contested,
}

impl TieBreak {
    pub fn constrains_envy(self) -> bool {
        !matches!(self, TieBreak::None)
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreak::None => write!(f, "NO_EF_TB"),
            TieBreak::Standard => write!(f, "EF_TB"),
            TieBreak::Contested => write!(f, "CONTESTED_EF_TB"),
        }
    }
}

// === BUNDLE ===

/// An unordered set of items, stored sorted and de-duplicated so equal sets compare equal.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Bundle(Vec<ItemId>);

impl Bundle {
    pub fn new(items: impl IntoIterator<Item = ItemId>) -> Self {
        let mut items: Vec<ItemId> = items.into_iter().collect();
        items.sort_unstable();
        items.dedup();
        Self(items)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn items(&self) -> &[ItemId] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, item: ItemId) -> bool {
        self.0.binary_search(&item).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total price of the bundle under `prices`.
    pub fn cost(&self, prices: &PriceVector) -> Price {
        self.0.iter().map(|&item| prices.get(item)).sum()
    }
}

impl FromIterator<ItemId> for Bundle {
    fn from_iter<T: IntoIterator<Item = ItemId>>(iter: T) -> Self {
        Bundle::new(iter)
    }
}

// === PRICE VECTOR ===

/// Dense price per item, indexed by `ItemId`. Prices are never negative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceVector(Vec<Price>);

impl PriceVector {
    pub fn zeros(num_items: usize) -> Self {
        Self(vec![0.0; num_items])
    }

    pub fn uniform(num_items: usize, price: Price) -> Self {
        Self(vec![price.max(0.0); num_items])
    }

    /// Build from raw prices, flooring negatives at zero.
    pub fn from_vec(prices: Vec<Price>) -> Self {
        Self(prices.into_iter().map(|p| p.max(0.0)).collect())
    }

    pub fn get(&self, item: ItemId) -> Price {
        self.0[item.index()]
    }

    pub fn set(&mut self, item: ItemId, price: Price) {
        self.0[item.index()] = price.max(0.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Price] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, Price)> + '_ {
        self.0
            .iter()
            .enumerate()
            .map(|(idx, &p)| (ItemId(idx as u32), p))
    }

    pub fn is_free(&self, item: ItemId) -> bool {
        self.get(item) <= PRICE_EPS
    }

    /// Largest per-item price difference.
    pub fn distance(&self, other: &PriceVector) -> f64 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Prices snapped to a grid of width `tolerance`, usable as a hash key.
    pub fn quantize(&self, tolerance: f64) -> PriceKey {
        let step = tolerance.max(PRICE_EPS);
        PriceKey(self.0.iter().map(|p| (p / step).round() as i64).collect())
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct PriceKey(Vec<i64>);

// === BUDGETS ===

/// Initial budget per agent, indexed by `AgentId`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Budgets(Vec<f64>);

impl Budgets {
    pub fn uniform(num_agents: usize, budget: f64) -> Self {
        Self(vec![budget; num_agents])
    }

    pub fn from_fn(num_agents: usize, f: impl FnMut(AgentId) -> f64) -> Self {
        Self((0..num_agents as u32).map(AgentId).map(f).collect())
    }

    pub fn from_vec(budgets: Vec<f64>) -> Self {
        Self(budgets)
    }

    pub fn get(&self, agent: AgentId) -> f64 {
        self.0[agent.index()]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check there is one finite, non-negative budget per agent.
    pub fn validate(&self, num_agents: usize) -> Result<(), ConfigError> {
        if self.0.len() != num_agents {
            return Err(ConfigError::BudgetCountMismatch {
                expected: num_agents,
                found: self.0.len(),
            });
        }
        for (idx, &budget) in self.0.iter().enumerate() {
            if !budget.is_finite() || budget < 0.0 {
                return Err(ConfigError::InvalidBudget {
                    agent: idx as u32,
                    budget,
                });
            }
        }
        Ok(())
    }
}
