// Allocation instance: agents, items, capacities, conflicts and valuations.
//
// Immutable once built. Everything the market engine needs is a read-only query.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::error::{ConfigError, InstanceError};
use crate::types::{AgentId, Budgets, Bundle, ItemId, Value};

// === RECORDS ===

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    /// Maximum number of items the agent may hold
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    /// Maximum number of agents that may hold the item
    pub capacity: usize,
}

// === INSTANCE ===

#[derive(Debug, Clone)]
pub struct Instance {
    agents: Vec<Agent>,
    items: Vec<Item>,
    valuations: Vec<Vec<Value>>, // [agent][item]
    item_conflicts: Vec<Vec<ItemId>>,
    agent_conflicts: Vec<Vec<ItemId>>,
    rankings: Vec<Vec<ItemId>>, // per agent, value descending
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::default()
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn agents(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.agents.iter().map(|a| a.id)
    }

    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.items.iter().map(|i| i.id)
    }

    pub fn agent(&self, agent: AgentId) -> &Agent {
        &self.agents[agent.index()]
    }

    pub fn item(&self, item: ItemId) -> &Item {
        &self.items[item.index()]
    }

    pub fn agent_by_name(&self, name: &str) -> Option<AgentId> {
        self.agents.iter().find(|a| a.name == name).map(|a| a.id)
    }

    pub fn item_by_name(&self, name: &str) -> Option<ItemId> {
        self.items.iter().find(|i| i.name == name).map(|i| i.id)
    }

    pub fn agent_capacity(&self, agent: AgentId) -> usize {
        self.agent(agent).capacity
    }

    pub fn item_capacity(&self, item: ItemId) -> usize {
        self.item(item).capacity
    }

    pub fn agent_item_value(&self, agent: AgentId, item: ItemId) -> Value {
        self.valuations[agent.index()][item.index()]
    }

    pub fn agent_bundle_value(&self, agent: AgentId, bundle: &Bundle) -> Value {
        bundle
            .iter()
            .map(|item| self.agent_item_value(agent, item))
            .sum()
    }

    /// Items in descending order of value to `agent`, ties by item id.
    ///
    /// Each call starts a fresh pass; the iterator is also `Clone`.
    pub fn agent_ranking(&self, agent: AgentId) -> impl Iterator<Item = ItemId> + Clone + '_ {
        self.rankings[agent.index()].iter().copied()
    }

    /// Items that may not be held together with `item`.
    pub fn item_conflicts(&self, item: ItemId) -> &[ItemId] {
        &self.item_conflicts[item.index()]
    }

    /// Items `agent` may never hold.
    pub fn agent_conflicts(&self, agent: AgentId) -> &[ItemId] {
        &self.agent_conflicts[agent.index()]
    }

    /// Whether adding `item` to `chosen` would break an item conflict.
    pub fn conflicts_with_any(&self, item: ItemId, chosen: &[ItemId]) -> bool {
        let conflicts = self.item_conflicts(item);
        !conflicts.is_empty() && chosen.iter().any(|c| conflicts.contains(c))
    }

    /// Human-readable `(x, y)` rendering of a bundle.
    pub fn bundle_names(&self, bundle: &Bundle) -> Vec<String> {
        bundle.iter().map(|i| self.item(i).name.clone()).collect()
    }

    /// Export back into the named document form.
    pub fn to_spec(&self) -> InstanceSpec {
        let valuations = self
            .agents
            .iter()
            .map(|agent| {
                let values = self
                    .items
                    .iter()
                    .map(|item| {
                        (
                            item.name.clone(),
                            self.valuations[agent.id.index()][item.id.index()],
                        )
                    })
                    .collect();
                (agent.name.clone(), values)
            })
            .collect();
        let named = |ids: &[ItemId]| -> Vec<String> {
            ids.iter().map(|&i| self.item(i).name.clone()).collect()
        };
        InstanceSpec {
            valuations,
            agent_capacities: Capacities::PerName(
                self.agents
                    .iter()
                    .map(|a| (a.name.clone(), a.capacity as u32))
                    .collect(),
            ),
            item_capacities: Capacities::PerName(
                self.items
                    .iter()
                    .map(|i| (i.name.clone(), i.capacity as u32))
                    .collect(),
            ),
            item_conflicts: self
                .items
                .iter()
                .filter(|i| !self.item_conflicts[i.id.index()].is_empty())
                .map(|i| (i.name.clone(), named(&self.item_conflicts[i.id.index()])))
                .collect(),
            agent_conflicts: self
                .agents
                .iter()
                .filter(|a| !self.agent_conflicts[a.id.index()].is_empty())
                .map(|a| (a.name.clone(), named(&self.agent_conflicts[a.id.index()])))
                .collect(),
        }
    }
}

// === BUILDER ===

#[derive(Debug, Default)]
pub struct InstanceBuilder {
    agents: Vec<Agent>,
    items: Vec<Item>,
    values: HashMap<(AgentId, ItemId), Value>,
    item_conflicts: Vec<(ItemId, ItemId)>,
    agent_conflicts: Vec<(AgentId, ItemId)>,
}

impl InstanceBuilder {
    /// Add an agent, returns its ID
    pub fn agent(&mut self, name: impl Into<String>, capacity: usize) -> AgentId {
        let id = AgentId::new(self.agents.len() as u32);
        self.agents.push(Agent {
            id,
            name: name.into(),
            capacity,
        });
        id
    }

    /// Add an item, returns its ID
    pub fn item(&mut self, name: impl Into<String>, capacity: usize) -> ItemId {
        let id = ItemId::new(self.items.len() as u32);
        self.items.push(Item {
            id,
            name: name.into(),
            capacity,
        });
        id
    }

    pub fn value(&mut self, agent: AgentId, item: ItemId, value: Value) -> &mut Self {
        self.values.insert((agent, item), value);
        self
    }

    /// Declare two items mutually exclusive (symmetric).
    pub fn item_conflict(&mut self, a: ItemId, b: ItemId) -> &mut Self {
        self.item_conflicts.push((a, b));
        self
    }

    /// Forbid `agent` from ever holding `item`.
    pub fn agent_conflict(&mut self, agent: AgentId, item: ItemId) -> &mut Self {
        self.agent_conflicts.push((agent, item));
        self
    }

    pub fn build(self) -> Result<Instance, InstanceError> {
        let num_agents = self.agents.len();
        let num_items = self.items.len();

        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(InstanceError::DuplicateAgent(agent.name.clone()));
            }
        }
        let mut seen = BTreeSet::new();
        for item in &self.items {
            if !seen.insert(item.name.as_str()) {
                return Err(InstanceError::DuplicateItem(item.name.clone()));
            }
        }

        let check_agent = |a: AgentId| {
            if a.index() < num_agents {
                Ok(())
            } else {
                Err(InstanceError::AgentOutOfRange(a.0))
            }
        };
        let check_item = |i: ItemId| {
            if i.index() < num_items {
                Ok(())
            } else {
                Err(InstanceError::ItemOutOfRange(i.0))
            }
        };

        let mut valuations = vec![vec![0.0; num_items]; num_agents];
        for (&(agent, item), &value) in &self.values {
            check_agent(agent)?;
            check_item(item)?;
            if !value.is_finite() || value < 0.0 {
                return Err(InstanceError::InvalidValuation {
                    agent: agent.0,
                    item: item.0,
                    value,
                });
            }
            valuations[agent.index()][item.index()] = value;
        }

        let mut item_conflicts: Vec<BTreeSet<ItemId>> = vec![BTreeSet::new(); num_items];
        for &(a, b) in &self.item_conflicts {
            check_item(a)?;
            check_item(b)?;
            if a != b {
                item_conflicts[a.index()].insert(b);
                item_conflicts[b.index()].insert(a);
            }
        }

        let mut agent_conflicts: Vec<BTreeSet<ItemId>> = vec![BTreeSet::new(); num_agents];
        for &(agent, item) in &self.agent_conflicts {
            check_agent(agent)?;
            check_item(item)?;
            agent_conflicts[agent.index()].insert(item);
        }

        let rankings = valuations
            .iter()
            .map(|values| {
                let mut order: Vec<ItemId> = (0..num_items as u32).map(ItemId).collect();
                // Stable sort keeps item id order among equal values
                order.sort_by(|a, b| values[b.index()].total_cmp(&values[a.index()]));
                order
            })
            .collect();

        Ok(Instance {
            agents: self.agents,
            items: self.items,
            valuations,
            item_conflicts: item_conflicts
                .into_iter()
                .map(|s| s.into_iter().collect())
                .collect(),
            agent_conflicts: agent_conflicts
                .into_iter()
                .map(|s| s.into_iter().collect())
                .collect(),
            rankings,
        })
    }
}

// === NAMED DOCUMENT FORM ===

/// Capacity given once for everyone or per name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(untagged)]
pub enum Capacities {
    Uniform(u32),
    PerName(BTreeMap<String, u32>),
}

impl Capacities {
    fn lookup(&self, name: &str) -> Result<usize, InstanceError> {
        match self {
            Capacities::Uniform(c) => Ok(*c as usize),
            Capacities::PerName(map) => map
                .get(name)
                .map(|&c| c as usize)
                .ok_or_else(|| InstanceError::MissingCapacity(name.to_string())),
        }
    }
}

/// Serializable instance keyed by agent and item names.
///
/// Agents and items get ids in name order. An item is known if it appears in any
/// valuation or in `item_capacities`; unlisted valuations are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct InstanceSpec {
    pub valuations: BTreeMap<String, BTreeMap<String, f64>>,
    pub agent_capacities: Capacities,
    pub item_capacities: Capacities,
    #[serde(default)]
    pub item_conflicts: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub agent_conflicts: BTreeMap<String, Vec<String>>,
}

impl Instance {
    pub fn from_spec(spec: &InstanceSpec) -> Result<Instance, InstanceError> {
        let mut item_names: BTreeSet<&str> = spec
            .valuations
            .values()
            .flat_map(|values| values.keys().map(String::as_str))
            .collect();
        if let Capacities::PerName(map) = &spec.item_capacities {
            item_names.extend(map.keys().map(String::as_str));
        }

        let mut builder = Instance::builder();
        let mut item_ids = HashMap::new();
        for name in item_names {
            let id = builder.item(name, spec.item_capacities.lookup(name)?);
            item_ids.insert(name, id);
        }
        let item_id = |name: &str| {
            item_ids
                .get(name)
                .copied()
                .ok_or_else(|| InstanceError::UnknownItem(name.to_string()))
        };

        let mut agent_ids = HashMap::new();
        for (agent_name, values) in &spec.valuations {
            let agent = builder.agent(agent_name.as_str(), spec.agent_capacities.lookup(agent_name)?);
            agent_ids.insert(agent_name.as_str(), agent);
            for (item_name, &value) in values {
                let item = item_id(item_name)?;
                builder.value(agent, item, value);
            }
        }

        for (item_name, others) in &spec.item_conflicts {
            let item = item_id(item_name)?;
            for other in others {
                let other = item_id(other)?;
                builder.item_conflict(item, other);
            }
        }
        for (agent_name, items) in &spec.agent_conflicts {
            let agent = agent_ids
                .get(agent_name.as_str())
                .copied()
                .ok_or_else(|| InstanceError::UnknownAgent(agent_name.clone()))?;
            for item_name in items {
                let item = item_id(item_name)?;
                builder.agent_conflict(agent, item);
            }
        }

        builder.build()
    }
}

impl Budgets {
    /// Budgets from a `{agent name: budget}` map; every agent needs one.
    pub fn from_names(instance: &Instance, named: &BTreeMap<String, f64>) -> Result<Budgets, ConfigError> {
        if let Some(unknown) = named.keys().find(|name| instance.agent_by_name(name).is_none()) {
            return Err(ConfigError::UnknownBudgetAgent(unknown.clone()));
        }
        let mut budgets = Vec::with_capacity(instance.num_agents());
        for agent in instance.agents() {
            let name = &instance.agent(agent).name;
            let budget = named
                .get(name)
                .copied()
                .ok_or_else(|| ConfigError::MissingBudget(name.clone()))?;
            budgets.push(budget);
        }
        let budgets = Budgets::from_vec(budgets);
        budgets.validate(instance.num_agents())?;
        Ok(budgets)
    }
}

// === RANDOM INSTANCES ===

/// Parameters for `Instance::random_uniform`. Bounds are inclusive.
#[derive(Debug, Clone, Copy)]
pub struct RandomInstanceParams {
    pub num_agents: usize,
    pub num_items: usize,
    pub agent_capacity_bounds: (usize, usize),
    pub item_capacity_bounds: (usize, usize),
    pub item_base_value_bounds: (f64, f64),
    pub item_subjective_ratio_bounds: (f64, f64),
    /// Each agent's values are rescaled (and rounded) to roughly this total
    pub normalized_sum_of_values: f64,
}

impl Default for RandomInstanceParams {
    fn default() -> Self {
        Self {
            num_agents: 5,
            num_items: 10,
            agent_capacity_bounds: (2, 3),
            item_capacity_bounds: (1, 3),
            item_base_value_bounds: (1.0, 5.0),
            item_subjective_ratio_bounds: (0.5, 1.5),
            normalized_sum_of_values: 100.0,
        }
    }
}

impl Instance {
    /// Random instance: each item has a base value, each agent scales it by a
    /// private ratio, then values are normalized per agent. Agents are named
    /// `s1..`, items `c1..`.
    pub fn random_uniform(
        params: &RandomInstanceParams,
        rng: &mut impl Rng,
    ) -> Result<Instance, InstanceError> {
        let p = params;
        if p.agent_capacity_bounds.0 > p.agent_capacity_bounds.1 {
            return Err(InstanceError::InvalidBounds("agent_capacity_bounds"));
        }
        if p.item_capacity_bounds.0 > p.item_capacity_bounds.1 {
            return Err(InstanceError::InvalidBounds("item_capacity_bounds"));
        }
        if !(0.0..=p.item_base_value_bounds.1).contains(&p.item_base_value_bounds.0) {
            return Err(InstanceError::InvalidBounds("item_base_value_bounds"));
        }
        if !(0.0..=p.item_subjective_ratio_bounds.1).contains(&p.item_subjective_ratio_bounds.0) {
            return Err(InstanceError::InvalidBounds("item_subjective_ratio_bounds"));
        }

        let mut builder = Instance::builder();
        let items: Vec<ItemId> = (1..=p.num_items)
            .map(|i| {
                let cap = rng.random_range(p.item_capacity_bounds.0..=p.item_capacity_bounds.1);
                builder.item(format!("c{i}"), cap)
            })
            .collect();
        let base_values: Vec<f64> = items
            .iter()
            .map(|_| rng.random_range(p.item_base_value_bounds.0..=p.item_base_value_bounds.1))
            .collect();

        for a in 1..=p.num_agents {
            let cap = rng.random_range(p.agent_capacity_bounds.0..=p.agent_capacity_bounds.1);
            let agent = builder.agent(format!("s{a}"), cap);
            let raw: Vec<f64> = base_values
                .iter()
                .map(|base| {
                    base * rng.random_range(
                        p.item_subjective_ratio_bounds.0..=p.item_subjective_ratio_bounds.1,
                    )
                })
                .collect();
            let total: f64 = raw.iter().sum();
            let scale = if total > 0.0 {
                p.normalized_sum_of_values / total
            } else {
                0.0
            };
            for (&item, value) in items.iter().zip(raw) {
                builder.value(agent, item, (value * scale).round());
            }
        }

        builder.build()
    }
}
