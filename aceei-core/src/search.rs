// Tabu price search: the outer loop over price vectors
//
// Each candidate vector is scored by demand -> envy -> optimizer. The search
// moves to the best admissible neighbour, remembers recent vectors as tabu and
// keeps the best feasible evaluation it has ever seen.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::allocation::Allocation;
use crate::config::SearchConfig;
use crate::demand::market_demand;
use crate::error::AllocationError;
use crate::instance::Instance;
use crate::optimizer::{AllocationOptimizer, OptimizerOutcome};
use crate::solver::{GoodLpBackend, MipBackend, SolveStatus};
use crate::types::{Budgets, ItemId, PriceKey, PriceVector, VALUE_EPS};

// === OUTCOME ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum Clearing {
    /// Clearing error within epsilon of zero
    Exact,
    /// Budget exhausted first; best vector found is returned
    Approximate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub allocation: Allocation,
    pub prices: PriceVector,
    pub excess_demand: Vec<f64>,
    pub objective: f64,
    /// Threshold each agent's won bundle is paired with
    pub new_budgets: Budgets,
    pub clearing: Clearing,
    pub iterations: u32,
    pub evaluations: u32,
}

impl SearchOutcome {
    pub fn is_exact(&self) -> bool {
        self.clearing == Clearing::Exact
    }
}

// === EVALUATIONS ===

#[derive(Debug)]
struct Evaluation {
    prices: PriceVector,
    result: Result<OptimizerOutcome, SolveStatus>,
}

impl Evaluation {
    /// Infeasible vectors are as bad as it gets.
    fn objective(&self) -> f64 {
        match &self.result {
            Ok(outcome) => outcome.objective,
            Err(_) => f64::INFINITY,
        }
    }

    fn is_feasible(&self) -> bool {
        self.result.is_ok()
    }
}

/// Evaluations by quantized price vector, oldest dropped once full.
///
/// The best evaluation is held outside the cache, so eviction never loses it.
struct EvaluationCache {
    capacity: usize,
    order: VecDeque<PriceKey>,
    entries: HashMap<PriceKey, Rc<Evaluation>>,
}

impl EvaluationCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &PriceKey) -> Option<Rc<Evaluation>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: PriceKey, evaluation: Rc<Evaluation>) {
        if self.entries.insert(key.clone(), evaluation).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    #[cfg(any(test, feature = "instrument"))]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// === TABU MEMORY ===

/// Recently visited vectors, oldest evicted first.
#[derive(Debug)]
pub struct TabuList {
    tenure: usize,
    tolerance: f64,
    visited: VecDeque<PriceVector>,
}

impl TabuList {
    pub fn new(tenure: usize, tolerance: f64) -> Self {
        Self {
            tenure,
            tolerance,
            visited: VecDeque::with_capacity(tenure),
        }
    }

    pub fn push(&mut self, prices: PriceVector) {
        if self.visited.len() == self.tenure {
            self.visited.pop_front();
        }
        self.visited.push_back(prices);
    }

    pub fn contains(&self, prices: &PriceVector) -> bool {
        self.visited
            .iter()
            .any(|seen| seen.distance(prices) <= self.tolerance)
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

// === WALL CLOCK ===

struct Deadline {
    #[cfg(not(target_arch = "wasm32"))]
    start: std::time::Instant,
    #[cfg(target_arch = "wasm32")]
    start_ms: f64,
    limit_secs: f64,
}

impl Deadline {
    fn start(limit_secs: Option<f64>) -> Option<Self> {
        limit_secs.map(|limit_secs| Self {
            #[cfg(not(target_arch = "wasm32"))]
            start: std::time::Instant::now(),
            #[cfg(target_arch = "wasm32")]
            start_ms: js_sys::Date::now(),
            limit_secs,
        })
    }

    fn elapsed_secs(&self) -> f64 {
        #[cfg(not(target_arch = "wasm32"))]
        {
            self.start.elapsed().as_secs_f64()
        }
        #[cfg(target_arch = "wasm32")]
        {
            (js_sys::Date::now() - self.start_ms) / 1000.0
        }
    }

    fn expired(&self) -> bool {
        self.elapsed_secs() >= self.limit_secs
    }
}

// === NEIGHBOURHOOD ===

/// Candidate vectors around `prices` given its excess demand.
///
/// First the gradient step `p + delta * z` for every item at once, then single
/// item moves by decreasing |z|: oversubscribed items up by `delta`, priced
/// undersubscribed items down by `delta`. Near-duplicates and vectors within
/// `tolerance` of `prices` are dropped.
pub fn neighbours(
    prices: &PriceVector,
    excess_demand: &[f64],
    delta: f64,
    max_individual_moves: usize,
    tolerance: f64,
) -> Vec<PriceVector> {
    let mut out: Vec<PriceVector> = Vec::new();
    let mut push = |candidate: PriceVector| {
        if candidate.distance(prices) > tolerance && out.iter().all(|c| c.distance(&candidate) > tolerance) {
            out.push(candidate);
        }
    };

    let gradient = PriceVector::from_vec(
        prices
            .iter()
            .map(|(item, p)| p + delta * excess_demand[item.index()])
            .collect(),
    );
    push(gradient);

    let mut by_pressure: Vec<(ItemId, f64)> = prices
        .iter()
        .map(|(item, _)| (item, excess_demand[item.index()]))
        .filter(|&(item, z)| z > VALUE_EPS || (z < -VALUE_EPS && !prices.is_free(item)))
        .collect();
    // Stable, so equal pressure keeps item order
    by_pressure.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));

    for (item, z) in by_pressure.into_iter().take(max_individual_moves) {
        let mut moved = prices.clone();
        let step = if z > 0.0 { delta } else { -delta };
        moved.set(item, prices.get(item) + step);
        push(moved);
    }
    out
}

// === SEARCH ===

pub struct TabuSearch<'a, B> {
    instance: &'a Instance,
    budgets: &'a Budgets,
    config: &'a SearchConfig,
    optimizer: AllocationOptimizer<'a, B>,
    cache: EvaluationCache,
    rng: StdRng,
    evaluations: u32,
    last_status: Option<SolveStatus>,
}

impl<'a, B: MipBackend> TabuSearch<'a, B> {
    /// Validates everything up front; nothing is solved until `run`.
    pub fn new(
        instance: &'a Instance,
        budgets: &'a Budgets,
        config: &'a SearchConfig,
        backend: B,
    ) -> Result<Self, AllocationError> {
        config.validate()?;
        budgets.validate(instance.num_agents())?;
        let optimizer = AllocationOptimizer::new(instance, backend, config.optimizer())?;
        Ok(Self {
            instance,
            budgets,
            config,
            optimizer,
            cache: EvaluationCache::new(config.cache_capacity),
            rng: StdRng::seed_from_u64(config.seed),
            evaluations: 0,
            last_status: None,
        })
    }

    fn evaluate(&mut self, prices: &PriceVector) -> Rc<Evaluation> {
        let key = prices.quantize(self.config.price_tolerance);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }

        let demand = market_demand(self.instance, prices, self.budgets, self.config.budget_window);
        let result = self
            .optimizer
            .optimize(&demand, prices, self.config.tie_break, self.budgets);
        if let Err(status) = &result {
            self.last_status = Some(status.clone());
        }
        self.evaluations += 1;

        let evaluation = Rc::new(Evaluation {
            prices: prices.clone(),
            result,
        });

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "price_eval",
            evaluation = self.evaluations as u64,
            objective = evaluation.objective(),
            feasible = evaluation.is_feasible(),
            price_sum = prices.as_slice().iter().sum::<f64>(),
            cached = self.cache.len() as u64,
        );

        self.cache.insert(key, Rc::clone(&evaluation));
        evaluation
    }

    /// `base` with every price moved by a random amount in `[-delta, delta]`.
    fn kick(&mut self, base: &PriceVector) -> PriceVector {
        let delta = self.config.delta;
        PriceVector::from_vec(
            base.as_slice()
                .iter()
                .map(|&p| p + self.rng.random_range(-delta..=delta))
                .collect(),
        )
    }

    pub fn run(mut self) -> Result<SearchOutcome, AllocationError> {
        let config = self.config;
        let deadline = Deadline::start(config.time_limit_secs);
        let mut tabu = TabuList::new(config.tabu_tenure, config.price_tolerance);

        let start = config
            .initial_prices
            .build(self.instance.num_items(), &mut self.rng);
        let mut current = self.evaluate(&start);
        tabu.push(start);
        let mut best = current.is_feasible().then(|| Rc::clone(&current));

        let mut iterations = 0u32;
        let mut restarts = 0u32;

        loop {
            let best_objective = best.as_ref().map_or(f64::INFINITY, |b| b.objective());
            if best_objective <= config.epsilon {
                break;
            }
            if iterations >= config.max_iterations {
                break;
            }
            if deadline.as_ref().is_some_and(Deadline::expired) {
                break;
            }
            iterations += 1;

            let candidates = match &current.result {
                Ok(outcome) => neighbours(
                    &current.prices,
                    &outcome.excess_demand,
                    config.delta,
                    config.max_individual_moves,
                    config.price_tolerance,
                ),
                Err(_) => Vec::new(),
            };

            let mut chosen: Option<Rc<Evaluation>> = None;
            let mut admissible = 0u32;
            for candidate in &candidates {
                let evaluation = self.evaluate(candidate);
                if !evaluation.is_feasible() {
                    continue;
                }
                let aspires = evaluation.objective() < best_objective - VALUE_EPS;
                if tabu.contains(candidate) && !aspires {
                    continue;
                }
                admissible += 1;
                let improves = chosen
                    .as_ref()
                    .is_none_or(|c| evaluation.objective() < c.objective() - VALUE_EPS);
                if improves {
                    chosen = Some(evaluation);
                }
            }

            current = match chosen {
                Some(next) => next,
                None => {
                    // Nowhere to go: jump near the best vector seen so far
                    restarts += 1;
                    let base = best
                        .as_ref()
                        .map_or_else(|| current.prices.clone(), |b| b.prices.clone());
                    let kicked = self.kick(&base);
                    self.evaluate(&kicked)
                }
            };
            tabu.push(current.prices.clone());

            if current.is_feasible() && current.objective() < best_objective - VALUE_EPS {
                best = Some(Rc::clone(&current));
            }

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "tabu_iteration",
                iteration = iterations as u64,
                objective = current.objective(),
                best = best.as_ref().map_or(f64::INFINITY, |b| b.objective()),
                candidates = candidates.len() as u64,
                admissible = admissible as u64,
                restarts = restarts as u64,
            );
            #[cfg(not(feature = "instrument"))]
            let _ = (admissible, restarts);
        }

        let Some(best) = best else {
            return Err(AllocationError::NoFeasiblePrices {
                iterations,
                last_status: self.last_status.unwrap_or(SolveStatus::Infeasible),
            });
        };
        let outcome = match &best.result {
            Ok(outcome) => outcome,
            Err(status) => {
                return Err(AllocationError::NoFeasiblePrices {
                    iterations,
                    last_status: status.clone(),
                });
            }
        };

        let clearing = if outcome.objective <= config.epsilon {
            Clearing::Exact
        } else {
            Clearing::Approximate
        };

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "search_done",
            iterations = iterations as u64,
            evaluations = self.evaluations as u64,
            objective = outcome.objective,
            exact = clearing == Clearing::Exact,
            backend = self.optimizer.backend_name(),
        );

        Ok(SearchOutcome {
            allocation: Allocation::new(outcome.selections.iter().map(|s| s.bundle.clone()).collect()),
            prices: best.prices.clone(),
            excess_demand: outcome.excess_demand.clone(),
            objective: outcome.objective,
            new_budgets: Budgets::from_vec(outcome.selections.iter().map(|s| s.threshold).collect()),
            clearing,
            iterations,
            evaluations: self.evaluations,
        })
    }
}

// === ENTRY POINTS ===

/// Search for ACEEI prices and an allocation with the default solver.
pub fn find_aceei_with_eftb(
    instance: &Instance,
    budgets: &Budgets,
    config: &SearchConfig,
) -> Result<SearchOutcome, AllocationError> {
    find_aceei_with_eftb_using(instance, budgets, config, GoodLpBackend)
}

pub fn find_aceei_with_eftb_using<B: MipBackend>(
    instance: &Instance,
    budgets: &Budgets,
    config: &SearchConfig,
    backend: B,
) -> Result<SearchOutcome, AllocationError> {
    TabuSearch::new(instance, budgets, config, backend)?.run()
}
