// Error types for instance construction, configuration and the allocation driver

use thiserror::Error;

use crate::solver::SolveStatus;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstanceError {
    #[error("duplicate agent name `{0}`")]
    DuplicateAgent(String),
    #[error("duplicate item name `{0}`")]
    DuplicateItem(String),
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
    #[error("unknown item `{0}`")]
    UnknownItem(String),
    #[error("valuation of agent {agent} for item {item} must be finite and non-negative (found {value})")]
    InvalidValuation { agent: u32, item: u32, value: f64 },
    #[error("agent id {0} out of range")]
    AgentOutOfRange(u32),
    #[error("item id {0} out of range")]
    ItemOutOfRange(u32),
    #[error("no capacity given for `{0}`")]
    MissingCapacity(String),
    #[error("random instance bounds are inverted: {0}")]
    InvalidBounds(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("price step delta must be positive and finite (found {0})")]
    InvalidDelta(f64),
    #[error("tolerance epsilon must be positive and finite (found {0})")]
    InvalidEpsilon(f64),
    #[error("budget window must be non-negative and finite (found {0})")]
    InvalidBudgetWindow(f64),
    #[error("tabu tenure must be at least 1")]
    ZeroTabuTenure,
    #[error("price tolerance must be positive and below half the price step {delta} (found {tolerance})")]
    InvalidPriceTolerance { tolerance: f64, delta: f64 },
    #[error("evaluation cache must hold at least one entry")]
    ZeroCacheCapacity,
    #[error("time limit must be positive (found {0} s)")]
    InvalidTimeLimit(f64),
    #[error("initial price must be non-negative and finite (found {0})")]
    InvalidInitialPrice(f64),
    #[error("expected {expected} budgets, found {found}")]
    BudgetCountMismatch { expected: usize, found: usize },
    #[error("budget of agent {agent} must be finite and non-negative (found {budget})")]
    InvalidBudget { agent: u32, budget: f64 },
    #[error("no budget given for agent `{0}`")]
    MissingBudget(String),
    #[error("budget given for unknown agent `{0}`")]
    UnknownBudgetAgent(String),
    #[error(
        "big-M {configured} is below the worst-case excess demand {required} of item {item}; the absolute-value linearization would under-report"
    )]
    BigMTooSmall {
        item: u32,
        required: f64,
        configured: f64,
    },
    #[error("max oversubscription must be non-negative (found {0})")]
    InvalidOversubscription(f64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AllocationError {
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no price vector produced a feasible allocation after {iterations} iterations (last status: {last_status})")]
    NoFeasiblePrices {
        iterations: u32,
        last_status: SolveStatus,
    },
}
