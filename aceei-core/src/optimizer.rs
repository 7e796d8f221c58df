// Allocation optimizer: pick one demanded bundle per agent, minimizing L1 excess demand
//
// Variables per (agent, option): binary selection x.
// Variables per item: signed slack z, absolute slack y, sign binary s.
// Priced items must clear (incidence == cap + z); free items may be left
// undersubscribed (incidence <= cap + z). Envy pairs are mutually exclusive.

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::demand::DemandProfile;
use crate::envy::{self, EnvyConstraint};
use crate::error::ConfigError;
use crate::instance::Instance;
use crate::solver::{LinearExpr, MipBackend, MipModel, Sense, SolveStatus, VarId};
use crate::types::{AgentId, Budgets, Bundle, ItemId, Price, PriceVector, TieBreak};

// === CONFIG ===

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct OptimizerConfig {
    /// Override for the absolute-value big constant; derived per item when unset
    #[serde(default)]
    pub big_m: Option<f64>,
    /// Hard cap on oversubscription per item; unset means only the agent count bounds it
    #[serde(default)]
    pub max_oversubscription: Option<f64>,
}

/// Worst-case |excess demand| of an item: everyone wants it, or nobody does.
pub fn worst_case_slack(num_agents: usize, item_capacity: usize) -> f64 {
    item_capacity.max(num_agents.saturating_sub(item_capacity)) as f64
}

// === OUTCOME ===

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub agent: AgentId,
    /// Budget threshold the bundle is paired with in the agent's correspondence
    pub threshold: Price,
    pub bundle: Bundle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    /// One per agent, in id order
    pub selections: Vec<Selection>,
    /// Sum of |excess| over priced items plus oversubscription of free items
    pub objective: f64,
    /// Holders minus capacity, per item
    pub excess_demand: Vec<f64>,
    pub envy_constraints: usize,
}

impl OptimizerOutcome {
    pub fn bundle(&self, agent: AgentId) -> &Bundle {
        &self.selections[agent.index()].bundle
    }
}

/// Clearing error of a selection: what the model's objective evaluates to.
pub fn clearing_error(instance: &Instance, prices: &PriceVector, excess_demand: &[f64]) -> f64 {
    instance
        .items()
        .map(|item| {
            let excess = excess_demand[item.index()];
            if prices.is_free(item) {
                excess.max(0.0)
            } else {
                excess.abs()
            }
        })
        .sum()
}

/// Signed excess demand per item for a set of bundles.
pub fn excess_demand<'b>(instance: &Instance, bundles: impl IntoIterator<Item = &'b Bundle>) -> Vec<f64> {
    let mut holders = vec![0usize; instance.num_items()];
    for bundle in bundles {
        for item in bundle.iter() {
            holders[item.index()] += 1;
        }
    }
    instance
        .items()
        .map(|item| holders[item.index()] as f64 - instance.item_capacity(item) as f64)
        .collect()
}

// === OPTIMIZER ===

pub struct AllocationOptimizer<'a, B> {
    instance: &'a Instance,
    backend: B,
    big_m: Vec<f64>,
    slack_bounds: Vec<(f64, f64)>,
}

struct ItemVars {
    slack: VarId,
    abs: VarId,
    sign: VarId,
}

impl<'a, B: MipBackend> AllocationOptimizer<'a, B> {
    /// Fixes the per-item big constants and slack bounds once for the instance.
    pub fn new(instance: &'a Instance, backend: B, config: OptimizerConfig) -> Result<Self, ConfigError> {
        if let Some(limit) = config.max_oversubscription {
            if !limit.is_finite() || limit < 0.0 {
                return Err(ConfigError::InvalidOversubscription(limit));
            }
        }

        let agents = instance.num_agents();
        let mut big_m = Vec::with_capacity(instance.num_items());
        let mut slack_bounds = Vec::with_capacity(instance.num_items());
        for item in instance.items() {
            let capacity = instance.item_capacity(item);
            let required = worst_case_slack(agents, capacity);
            let m = match config.big_m {
                Some(configured) if !(configured >= required) => {
                    return Err(ConfigError::BigMTooSmall {
                        item: item.0,
                        required,
                        configured,
                    });
                }
                Some(configured) => configured,
                None => (agents + capacity) as f64,
            };
            big_m.push(m);

            let mut upper = agents.saturating_sub(capacity) as f64;
            if let Some(limit) = config.max_oversubscription {
                upper = upper.min(limit);
            }
            slack_bounds.push((-(capacity as f64), upper));
        }

        Ok(Self {
            instance,
            backend,
            big_m,
            slack_bounds,
        })
    }

    pub fn big_m(&self, item: ItemId) -> f64 {
        self.big_m[item.index()]
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Solve the selection program at `prices`.
    ///
    /// `Err` carries the solver status (typically infeasible); the caller decides
    /// how bad that is.
    pub fn optimize(
        &self,
        demand: &DemandProfile,
        prices: &PriceVector,
        tie_break: TieBreak,
        budgets: &Budgets,
    ) -> Result<OptimizerOutcome, SolveStatus> {
        let instance = self.instance;
        let options: Vec<Vec<Bundle>> = instance.agents().map(|a| envy::options(demand, a)).collect();
        let envy = envy::envy_constraints(instance, budgets, demand, tie_break, prices);

        let mut model = MipModel::new();

        // Selection variables, exactly one per agent
        let mut select: Vec<Vec<VarId>> = Vec::with_capacity(options.len());
        for agent in instance.agents() {
            let vars: Vec<VarId> = (0..options[agent.index()].len())
                .map(|k| model.add_binary(format!("x_{}_{k}", agent.0)))
                .collect();
            model.constrain(vars.iter().map(|&v| (v, 1.0)).collect(), Sense::Eq, 1.0);
            select.push(vars);
        }

        // Capacity with slack, and |slack| linearization
        let mut objective = LinearExpr::with_capacity(instance.num_items());
        for item in instance.items() {
            let vars = self.item_vars(&mut model, item);
            let m = self.big_m[item.index()];
            let capacity = instance.item_capacity(item) as f64;

            let mut incidence = LinearExpr::new();
            for agent in instance.agents() {
                for (k, bundle) in options[agent.index()].iter().enumerate() {
                    if bundle.contains(item) {
                        incidence.add(select[agent.index()][k], 1.0);
                    }
                }
            }
            incidence.add(vars.slack, -1.0);
            let sense = if prices.is_free(item) { Sense::Le } else { Sense::Eq };
            model.constrain(incidence, sense, capacity);

            let (y, z, s) = (vars.abs, vars.slack, vars.sign);
            model.constrain(LinearExpr::new().term(y, 1.0).term(z, -1.0), Sense::Ge, 0.0);
            model.constrain(LinearExpr::new().term(y, 1.0).term(z, 1.0), Sense::Ge, 0.0);
            // s = 1 when z >= 0: y <= z; s = 0: y <= -z
            model.constrain(
                LinearExpr::new().term(y, 1.0).term(z, -1.0).term(s, 2.0 * m),
                Sense::Le,
                2.0 * m,
            );
            model.constrain(
                LinearExpr::new().term(y, 1.0).term(z, 1.0).term(s, -2.0 * m),
                Sense::Le,
                0.0,
            );
            model.constrain(LinearExpr::new().term(z, 1.0).term(s, -m), Sense::Le, 0.0);
            model.constrain(LinearExpr::new().term(z, 1.0).term(s, -m), Sense::Ge, -m);

            objective.add(y, 1.0);
        }

        for constraint in &envy {
            if let (Some(i), Some(j)) = (
                self.option_var(&options, &select, constraint, true),
                self.option_var(&options, &select, constraint, false),
            ) {
                model.constrain(LinearExpr::new().term(i, 1.0).term(j, 1.0), Sense::Le, 1.0);
            }
        }

        model.minimize(objective);

        let solved = self.backend.solve(&model);

        #[cfg(feature = "instrument")]
        {
            let status = match &solved {
                Ok(_) => "optimal".to_string(),
                Err(status) => status.to_string(),
            };
            tracing::info!(
                target: "optimizer_solve",
                variables = model.num_vars() as u64,
                constraints = model.num_constraints() as u64,
                envy_constraints = envy.len() as u64,
                status = status.as_str(),
            );
        }

        let solution = solved?;

        let selections: Vec<Selection> = instance
            .agents()
            .map(|agent| {
                let vars = &select[agent.index()];
                let chosen = (0..vars.len())
                    .max_by(|&a, &b| solution.value(vars[a]).total_cmp(&solution.value(vars[b])))
                    .unwrap_or(0);
                let bundle = options[agent.index()][chosen].clone();
                let threshold = demand
                    .get(agent)
                    .threshold_of(&bundle)
                    .unwrap_or_else(|| budgets.get(agent));
                Selection {
                    agent,
                    threshold,
                    bundle,
                }
            })
            .collect();

        let excess = excess_demand(instance, selections.iter().map(|s| &s.bundle));
        let objective = clearing_error(instance, prices, &excess);

        Ok(OptimizerOutcome {
            selections,
            objective,
            excess_demand: excess,
            envy_constraints: envy.len(),
        })
    }

    fn item_vars(&self, model: &mut MipModel, item: ItemId) -> ItemVars {
        let (lower, upper) = self.slack_bounds[item.index()];
        let slack = model.add_continuous(lower, upper, format!("z_{}", item.0));
        let abs = model.add_continuous(0.0, lower.abs().max(upper), format!("y_{}", item.0));
        let sign = model.add_binary(format!("s_{}", item.0));
        ItemVars { slack, abs, sign }
    }

    fn option_var(
        &self,
        options: &[Vec<Bundle>],
        select: &[Vec<VarId>],
        constraint: &EnvyConstraint,
        envier: bool,
    ) -> Option<VarId> {
        let choice = if envier { &constraint.envier } else { &constraint.envied };
        let agent = choice.agent.index();
        options[agent]
            .iter()
            .position(|b| b == &choice.bundle)
            .map(|k| select[agent][k])
    }
}
