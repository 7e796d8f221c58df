// Final allocation and the checks run against it

use std::collections::BTreeMap;

use crate::envy::contested_bundle;
use crate::instance::Instance;
use crate::types::{AgentId, Budgets, Bundle, ItemId, PriceVector, TieBreak, VALUE_EPS};

/// One bundle per agent, indexed by `AgentId`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    bundles: Vec<Bundle>,
}

impl Allocation {
    pub fn new(bundles: Vec<Bundle>) -> Self {
        Self { bundles }
    }

    pub fn bundle(&self, agent: AgentId) -> &Bundle {
        &self.bundles[agent.index()]
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &Bundle)> {
        self.bundles
            .iter()
            .enumerate()
            .map(|(idx, b)| (AgentId(idx as u32), b))
    }

    pub fn num_agents(&self) -> usize {
        self.bundles.len()
    }

    /// Agents holding each item, indexed by `ItemId`.
    pub fn holder_counts(&self, num_items: usize) -> Vec<usize> {
        let mut counts = vec![0; num_items];
        for bundle in &self.bundles {
            for item in bundle.iter() {
                counts[item.index()] += 1;
            }
        }
        counts
    }

    pub fn holders(&self, item: ItemId) -> usize {
        self.bundles.iter().filter(|b| b.contains(item)).count()
    }

    /// `{agent name: [item names]}`
    pub fn to_named(&self, instance: &Instance) -> BTreeMap<String, Vec<String>> {
        self.iter()
            .map(|(agent, bundle)| (instance.agent(agent).name.clone(), instance.bundle_names(bundle)))
            .collect()
    }
}

// === VALIDATION ===

#[derive(Debug, Clone, PartialEq)]
pub enum AllocationViolation {
    AgentOverCapacity { agent: AgentId, held: usize, capacity: usize },
    ItemOverCapacity { item: ItemId, holders: usize, capacity: usize },
    Conflict { agent: AgentId, items: (ItemId, ItemId) },
    ForbiddenItem { agent: AgentId, item: ItemId },
}

/// Every capacity and conflict rule the allocation breaks. Empty means valid.
pub fn validate_allocation(instance: &Instance, allocation: &Allocation) -> Vec<AllocationViolation> {
    let mut violations = Vec::new();

    for (agent, bundle) in allocation.iter() {
        let capacity = instance.agent_capacity(agent);
        if bundle.len() > capacity {
            violations.push(AllocationViolation::AgentOverCapacity {
                agent,
                held: bundle.len(),
                capacity,
            });
        }
        let forbidden = instance.agent_conflicts(agent);
        for (k, item) in bundle.iter().enumerate() {
            if forbidden.contains(&item) {
                violations.push(AllocationViolation::ForbiddenItem { agent, item });
            }
            for &other in &bundle.items()[..k] {
                if instance.item_conflicts(item).contains(&other) {
                    violations.push(AllocationViolation::Conflict {
                        agent,
                        items: (other, item),
                    });
                }
            }
        }
    }

    let counts = allocation.holder_counts(instance.num_items());
    for item in instance.items() {
        let capacity = instance.item_capacity(item);
        if counts[item.index()] > capacity {
            violations.push(AllocationViolation::ItemOverCapacity {
                item,
                holders: counts[item.index()],
                capacity,
            });
        }
    }

    violations
}

/// (envier, envied) pairs where a strictly richer agent values the poorer agent's
/// tie-break adjusted bundle above its own. Always empty for `TieBreak::None`.
pub fn envy_violations(
    instance: &Instance,
    allocation: &Allocation,
    budgets: &Budgets,
    tie_break: TieBreak,
    prices: &PriceVector,
) -> Vec<(AgentId, AgentId)> {
    if !tie_break.constrains_envy() {
        return Vec::new();
    }
    let mut pairs = Vec::new();
    for (rich, own) in allocation.iter() {
        let own_value = instance.agent_bundle_value(rich, own);
        for (poor, theirs) in allocation.iter() {
            if budgets.get(rich) <= budgets.get(poor) {
                continue;
            }
            let target = match tie_break {
                TieBreak::Contested => contested_bundle(instance, rich, theirs, prices),
                _ => theirs.clone(),
            };
            if instance.agent_bundle_value(rich, &target) > own_value + VALUE_EPS {
                pairs.push((rich, poor));
            }
        }
    }
    pairs
}
