// Demand oracle: each agent's value-maximizing affordable bundle as a function of budget

use crate::instance::Instance;
use crate::types::{AgentId, Budgets, Bundle, ItemId, PRICE_EPS, Price, PriceVector, VALUE_EPS, Value};

// === DEMAND CORRESPONDENCE ===

#[derive(Debug, Clone, PartialEq)]
pub struct DemandEntry {
    pub threshold: Price,
    pub bundle: Bundle,
}

/// Step function from budget threshold to the best bundle affordable at that threshold.
///
/// Entries are sorted by threshold and every bundle appears once (at its lowest threshold).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandCorrespondence {
    entries: Vec<DemandEntry>,
}

impl DemandCorrespondence {
    pub fn from_entries(entries: impl IntoIterator<Item = (Price, Bundle)>) -> Self {
        let mut raw: Vec<DemandEntry> = entries
            .into_iter()
            .map(|(threshold, bundle)| DemandEntry { threshold, bundle })
            .collect();
        raw.sort_by(|a, b| {
            a.threshold
                .total_cmp(&b.threshold)
                .then_with(|| a.bundle.cmp(&b.bundle))
        });
        let mut entries: Vec<DemandEntry> = Vec::with_capacity(raw.len());
        for entry in raw {
            if !entries.iter().any(|e| e.bundle == entry.bundle) {
                entries.push(entry);
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[DemandEntry] {
        &self.entries
    }

    pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.entries.iter().map(|e| &e.bundle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn threshold_of(&self, bundle: &Bundle) -> Option<Price> {
        self.entries
            .iter()
            .find(|e| &e.bundle == bundle)
            .map(|e| e.threshold)
    }

    pub fn contains(&self, bundle: &Bundle) -> bool {
        self.threshold_of(bundle).is_some()
    }
}

/// Demand correspondences of every agent at one price vector, indexed by `AgentId`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandProfile {
    per_agent: Vec<DemandCorrespondence>,
}

impl DemandProfile {
    pub fn new(per_agent: Vec<DemandCorrespondence>) -> Self {
        Self { per_agent }
    }

    pub fn get(&self, agent: AgentId) -> &DemandCorrespondence {
        &self.per_agent[agent.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &DemandCorrespondence)> {
        self.per_agent
            .iter()
            .enumerate()
            .map(|(idx, c)| (AgentId(idx as u32), c))
    }

    pub fn num_agents(&self) -> usize {
        self.per_agent.len()
    }

    /// Total number of (agent, bundle) options.
    pub fn num_options(&self) -> usize {
        self.per_agent.iter().map(|c| c.len().max(1)).sum()
    }
}

// === BUDGET LIMIT ===

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetLimit {
    /// Cost may not exceed the amount
    AtMost(Price),
    /// Cost must be strictly below the amount
    Below(Price),
}

impl BudgetLimit {
    pub fn admits(self, cost: Price) -> bool {
        match self {
            BudgetLimit::AtMost(limit) => cost <= limit + PRICE_EPS,
            BudgetLimit::Below(limit) => cost < limit - PRICE_EPS,
        }
    }
}

// === BEST BUNDLE (BRANCH AND BOUND) ===

struct Candidate {
    item: ItemId,
    value: Value,
    price: Price,
}

struct Search<'a> {
    instance: &'a Instance,
    candidates: Vec<Candidate>,
    suffix_top: Vec<Vec<Value>>, // suffix_top[i][k]: best k values among candidates[i..]
    capacity: usize,
    limit: BudgetLimit,
    chosen: Vec<ItemId>,
    best: Option<(Value, Price, Vec<ItemId>)>,
}

impl Search<'_> {
    fn is_better(&self, value: Value, cost: Price, items: &[ItemId]) -> bool {
        let Some((best_value, best_cost, best_items)) = &self.best else {
            return true;
        };
        if value > best_value + VALUE_EPS {
            return true;
        }
        if value < best_value - VALUE_EPS {
            return false;
        }
        if cost < best_cost - PRICE_EPS {
            return true;
        }
        if cost > best_cost + PRICE_EPS {
            return false;
        }
        let mut sorted = items.to_vec();
        sorted.sort_unstable();
        sorted < *best_items
    }

    fn explore(&mut self, idx: usize, value: Value, cost: Price) {
        if self.is_better(value, cost, &self.chosen) {
            let mut items = self.chosen.clone();
            items.sort_unstable();
            self.best = Some((value, cost, items));
        }

        let slots = self.capacity - self.chosen.len();
        if idx >= self.candidates.len() || slots == 0 {
            return;
        }
        // Candidates are value-descending, so the next `slots` values bound any completion
        let k = slots.min(self.suffix_top[idx].len() - 1);
        let bound = value + self.suffix_top[idx][k];
        if let Some((best_value, _, _)) = &self.best {
            if bound < best_value - VALUE_EPS {
                return;
            }
        }

        let (item, item_value, item_price) = {
            let c = &self.candidates[idx];
            (c.item, c.value, c.price)
        };
        let new_cost = cost + item_price;
        if self.limit.admits(new_cost) && !self.instance.conflicts_with_any(item, &self.chosen) {
            self.chosen.push(item);
            self.explore(idx + 1, value + item_value, new_cost);
            self.chosen.pop();
        }
        self.explore(idx + 1, value, cost);
    }
}

/// The bundle maximizing `agent`'s value among bundles within `limit`, at most
/// `agent_capacity` items, free of conflicts.
///
/// Ties prefer the cheaper bundle, then the lexicographically smaller item list.
/// Items worth nothing to the agent are never picked. The empty bundle is always
/// admissible, so this never fails.
pub fn best_bundle(
    instance: &Instance,
    agent: AgentId,
    prices: &PriceVector,
    limit: BudgetLimit,
) -> Bundle {
    let forbidden = instance.agent_conflicts(agent);
    let candidates: Vec<Candidate> = instance
        .agent_ranking(agent)
        .filter(|item| !forbidden.contains(item))
        .map(|item| Candidate {
            item,
            value: instance.agent_item_value(agent, item),
            price: prices.get(item),
        })
        .filter(|c| c.value > VALUE_EPS && limit.admits(c.price))
        .collect();

    let capacity = instance.agent_capacity(agent);
    let suffix_top = candidates
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let mut acc = vec![0.0];
            for c in candidates[i..].iter().take(capacity) {
                acc.push(acc[acc.len() - 1] + c.value);
            }
            acc
        })
        .collect();

    let mut search = Search {
        instance,
        candidates,
        suffix_top,
        capacity,
        limit,
        chosen: Vec::new(),
        best: None,
    };
    search.explore(0, 0.0, 0.0);

    search
        .best
        .map(|(_, _, items)| Bundle::new(items))
        .unwrap_or_default()
}

// === DEMAND CONTRACTS ===

/// Best bundle at each given threshold.
pub fn demand(
    instance: &Instance,
    agent: AgentId,
    prices: &PriceVector,
    thresholds: &[Price],
) -> DemandCorrespondence {
    DemandCorrespondence::from_entries(thresholds.iter().map(|&threshold| {
        (
            threshold,
            best_bundle(instance, agent, prices, BudgetLimit::AtMost(threshold)),
        )
    }))
}

/// Exact demand step function over budgets in `[budget, budget + window]`.
///
/// Starts from the best bundle at the top of the interval and walks down through
/// every switch point: the next step is the best bundle strictly cheaper than the
/// current one. Stops once a bundle affordable at `budget` itself is found, which
/// is recorded at threshold `budget`.
pub fn perturbed_demand(
    instance: &Instance,
    agent: AgentId,
    prices: &PriceVector,
    budget: Price,
    window: Price,
) -> DemandCorrespondence {
    let mut entries = Vec::new();
    let mut limit = BudgetLimit::AtMost(budget + window.max(0.0));
    loop {
        let bundle = best_bundle(instance, agent, prices, limit);
        let cost = bundle.cost(prices);
        let reached_floor = cost <= budget + PRICE_EPS;
        entries.push((cost.max(budget), bundle));
        if reached_floor {
            break;
        }
        limit = BudgetLimit::Below(cost);
    }

    #[cfg(feature = "instrument")]
    tracing::debug!(
        target: "demand",
        agent = agent.0,
        budget = budget,
        steps = entries.len() as u64,
    );

    DemandCorrespondence::from_entries(entries)
}

/// Demand correspondence of every agent at `prices`.
pub fn market_demand(
    instance: &Instance,
    prices: &PriceVector,
    budgets: &Budgets,
    window: Price,
) -> DemandProfile {
    DemandProfile::new(
        instance
            .agents()
            .map(|agent| perturbed_demand(instance, agent, prices, budgets.get(agent), window))
            .collect(),
    )
}

/// Number of agents whose best bundle at their own budget contains each item.
pub fn aggregate_demand(instance: &Instance, prices: &PriceVector, budgets: &Budgets) -> Vec<usize> {
    let mut counts = vec![0; instance.num_items()];
    for agent in instance.agents() {
        let bundle = best_bundle(instance, agent, prices, BudgetLimit::AtMost(budgets.get(agent)));
        for item in bundle.iter() {
            counts[item.index()] += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::RandomInstanceParams;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn two_by_three() -> (Instance, AgentId, [ItemId; 3]) {
        let mut b = Instance::builder();
        let alice = b.agent("Alice", 2);
        let x = b.item("x", 1);
        let y = b.item("y", 1);
        let z = b.item("z", 2);
        b.value(alice, x, 5.0).value(alice, y, 4.0).value(alice, z, 1.0);
        (b.build().unwrap(), alice, [x, y, z])
    }

    /// Exhaustive reference: every subset within capacity, budget and conflicts.
    fn brute_force_best(instance: &Instance, agent: AgentId, prices: &PriceVector, limit: Price) -> Value {
        let n = instance.num_items();
        let mut best = 0.0;
        for mask in 0u32..(1 << n) {
            let items: Vec<ItemId> = (0..n as u32).filter(|i| mask & (1 << i) != 0).map(ItemId).collect();
            if items.len() > instance.agent_capacity(agent) {
                continue;
            }
            if items.iter().any(|i| instance.agent_conflicts(agent).contains(i)) {
                continue;
            }
            if items
                .iter()
                .enumerate()
                .any(|(k, &i)| instance.conflicts_with_any(i, &items[..k]))
            {
                continue;
            }
            let bundle = Bundle::new(items);
            if bundle.cost(prices) <= limit + PRICE_EPS {
                best = f64::max(best, instance.agent_bundle_value(agent, &bundle));
            }
        }
        best
    }

    #[test]
    fn best_bundle_respects_budget_and_capacity() {
        let (instance, alice, [x, y, z]) = two_by_three();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);

        let rich = best_bundle(&instance, alice, &prices, BudgetLimit::AtMost(5.0));
        assert_eq!(rich, Bundle::new([x, y]));

        let tight = best_bundle(&instance, alice, &prices, BudgetLimit::AtMost(3.0));
        assert_eq!(tight, Bundle::new([x, z]));

        let broke = best_bundle(&instance, alice, &prices, BudgetLimit::AtMost(0.0));
        assert_eq!(broke, Bundle::new([z]));
    }

    #[test]
    fn strict_limit_excludes_exact_cost() {
        let (instance, alice, [x, y, _]) = two_by_three();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        let at = best_bundle(&instance, alice, &prices, BudgetLimit::AtMost(3.5));
        let below = best_bundle(&instance, alice, &prices, BudgetLimit::Below(3.5));
        assert_eq!(at, Bundle::new([x, y]));
        assert_ne!(below, at);
    }

    #[test]
    fn conflicts_are_never_combined() {
        let mut b = Instance::builder();
        let a = b.agent("a", 3);
        let x = b.item("x", 1);
        let y = b.item("y", 1);
        let z = b.item("z", 1);
        b.value(a, x, 10.0).value(a, y, 9.0).value(a, z, 1.0);
        b.item_conflict(x, y);
        let instance = b.build().unwrap();
        let prices = PriceVector::zeros(3);
        let bundle = best_bundle(&instance, a, &prices, BudgetLimit::AtMost(10.0));
        assert_eq!(bundle, Bundle::new([x, z]));
    }

    #[test]
    fn equal_value_prefers_cheaper_bundle() {
        let mut b = Instance::builder();
        let a = b.agent("a", 1);
        let x = b.item("x", 1);
        let y = b.item("y", 1);
        b.value(a, x, 3.0).value(a, y, 3.0);
        let instance = b.build().unwrap();
        let prices = PriceVector::from_vec(vec![2.0, 1.0]);
        let bundle = best_bundle(&instance, a, &prices, BudgetLimit::AtMost(5.0));
        assert_eq!(bundle, Bundle::new([y]));
    }

    #[test]
    fn perturbed_demand_walks_every_switch_point() {
        let (instance, alice, [x, y, z]) = two_by_three();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        // Budget 1.0 affords (z); 1.5 affords (x, z); 3.5 affords (x, y)
        let corr = perturbed_demand(&instance, alice, &prices, 1.0, 3.0);
        let steps: Vec<(Price, Bundle)> = corr
            .entries()
            .iter()
            .map(|e| (e.threshold, e.bundle.clone()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (1.0, Bundle::new([z])),
                (1.5, Bundle::new([x, z])),
                (3.5, Bundle::new([x, y])),
            ]
        );
    }

    #[test]
    fn zero_window_yields_single_bundle() {
        let (instance, alice, [x, _, z]) = two_by_three();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        let corr = perturbed_demand(&instance, alice, &prices, 3.0, 0.0);
        assert_eq!(corr.len(), 1);
        assert_eq!(corr.threshold_of(&Bundle::new([x, z])), Some(3.0));
    }

    #[test]
    fn priced_out_agent_demands_empty_bundle() {
        let (instance, alice, _) = two_by_three();
        let prices = PriceVector::from_vec(vec![9.0, 9.0, 9.0]);
        let corr = perturbed_demand(&instance, alice, &prices, 1.0, 0.5);
        assert_eq!(corr.len(), 1);
        assert!(corr.contains(&Bundle::empty()));
    }

    #[test]
    fn demand_is_idempotent() {
        let (instance, alice, _) = two_by_three();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        let thresholds = [0.0, 1.5, 3.0, 3.5, 5.0];
        let first = demand(&instance, alice, &prices, &thresholds);
        let second = demand(&instance, alice, &prices, &thresholds);
        assert_eq!(first, second);
    }

    #[test]
    fn branch_and_bound_matches_brute_force_on_random_instances() {
        let mut rng = StdRng::seed_from_u64(11);
        let params = RandomInstanceParams {
            num_agents: 4,
            num_items: 7,
            agent_capacity_bounds: (1, 4),
            ..Default::default()
        };
        for _ in 0..20 {
            let instance = Instance::random_uniform(&params, &mut rng).unwrap();
            let prices = PriceVector::from_vec(
                (0..instance.num_items())
                    .map(|_| (rng.random_range(0.0..3.0f64) * 4.0).round() / 4.0)
                    .collect(),
            );
            for agent in instance.agents() {
                let budget = rng.random_range(0.0..6.0);
                let bundle = best_bundle(&instance, agent, &prices, BudgetLimit::AtMost(budget));
                assert!(bundle.len() <= instance.agent_capacity(agent));
                assert!(bundle.cost(&prices) <= budget + PRICE_EPS);
                let expected = brute_force_best(&instance, agent, &prices, budget);
                let got = instance.agent_bundle_value(agent, &bundle);
                assert!(
                    (got - expected).abs() < 1e-6,
                    "agent {agent:?}: branch and bound found {got}, brute force {expected}"
                );
            }
        }
    }

    #[test]
    fn raising_a_price_never_raises_its_demand() {
        let mut rng = StdRng::seed_from_u64(5);
        let params = RandomInstanceParams {
            num_agents: 8,
            num_items: 6,
            agent_capacity_bounds: (1, 3),
            ..Default::default()
        };
        for _ in 0..15 {
            let instance = Instance::random_uniform(&params, &mut rng).unwrap();
            let budgets = Budgets::from_fn(instance.num_agents(), |_| rng.random_range(1.0..4.0));
            let prices = PriceVector::from_vec(
                (0..instance.num_items()).map(|_| rng.random_range(0.0..2.0)).collect(),
            );
            let before = aggregate_demand(&instance, &prices, &budgets);
            for item in instance.items() {
                let mut raised = prices.clone();
                raised.set(item, prices.get(item) + rng.random_range(0.1..1.5));
                let after = aggregate_demand(&instance, &raised, &budgets);
                assert!(
                    after[item.index()] <= before[item.index()],
                    "demand for {item:?} rose from {} to {} after a price increase",
                    before[item.index()],
                    after[item.index()]
                );
            }
        }
    }
}
