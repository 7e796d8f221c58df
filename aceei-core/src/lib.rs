// ACEEI course allocation with envy-free tie-breaking.
//
// Pipeline per candidate price vector:
//   demand (per-agent step functions) -> envy constraints -> allocation MIP
// driven by a tabu search over price vectors.

pub mod allocation;
pub mod config;
pub mod demand;
pub mod envy;
pub mod error;
pub mod instance;
pub mod optimizer;
pub mod search;
pub mod solver;
pub mod types;
mod wasm;

pub use allocation::{Allocation, AllocationViolation, envy_violations, validate_allocation};
pub use config::{InitialPrices, SearchConfig};
pub use demand::{DemandCorrespondence, DemandProfile, demand, market_demand, perturbed_demand};
pub use envy::{BundleChoice, EnvyConstraint, envy_constraints};
pub use error::{AllocationError, ConfigError, InstanceError};
pub use instance::{Instance, InstanceBuilder, InstanceSpec, RandomInstanceParams};
pub use optimizer::{AllocationOptimizer, OptimizerConfig, OptimizerOutcome, Selection};
pub use search::{Clearing, SearchOutcome, TabuSearch, find_aceei_with_eftb, find_aceei_with_eftb_using};
pub use solver::{GoodLpBackend, MipBackend, SolveStatus};
pub use types::*;
pub use wasm::*;

#[cfg(feature = "instrument")]
pub use instrument;
