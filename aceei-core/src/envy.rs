// Envy constraint builder: (agent, bundle) choices that may not be selected together
//
// A higher-budget agent must never prefer what a lower-budget agent could be
// handed. Each forbidden combination becomes one `EnvyConstraint`.

use crate::demand::DemandProfile;
use crate::instance::Instance;
use crate::types::{AgentId, Budgets, Bundle, PriceVector, TieBreak, VALUE_EPS};

// === TYPES ===

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleChoice {
    pub agent: AgentId,
    pub bundle: Bundle,
}

impl BundleChoice {
    pub fn new(agent: AgentId, bundle: Bundle) -> Self {
        Self { agent, bundle }
    }
}

/// `envier` taking its bundle while `envied` takes theirs is forbidden.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvyConstraint {
    pub envier: BundleChoice,
    pub envied: BundleChoice,
}

// === TIE-BREAK ADJUSTMENT ===

/// `bundle` plus every free item it lacks, cut down to the `envier`'s best
/// `agent_capacity` items by the envier's own valuation.
pub fn contested_bundle(
    instance: &Instance,
    envier: AgentId,
    bundle: &Bundle,
    prices: &PriceVector,
) -> Bundle {
    let mut items: Vec<_> = bundle.iter().collect();
    items.extend(
        instance
            .items()
            .filter(|&item| prices.is_free(item) && !bundle.contains(item)),
    );
    // Stable sort keeps item order among equal values, so truncation is deterministic
    items.sort_by(|&a, &b| {
        instance
            .agent_item_value(envier, b)
            .total_cmp(&instance.agent_item_value(envier, a))
    });
    items.truncate(instance.agent_capacity(envier));
    Bundle::new(items)
}

fn adjusted(
    instance: &Instance,
    envier: AgentId,
    bundle: &Bundle,
    tie_break: TieBreak,
    prices: &PriceVector,
) -> Bundle {
    match tie_break {
        TieBreak::Contested => contested_bundle(instance, envier, bundle, prices),
        TieBreak::None | TieBreak::Standard => bundle.clone(),
    }
}

// === PAIRWISE CHECK ===

/// Every (own bundle, other's bundle) pair where `envier` strictly prefers the
/// other's (tie-break adjusted) bundle. The returned envied bundle is the
/// unadjusted one, since that is what the optimizer selects.
pub fn envied_pairs(
    instance: &Instance,
    envier: AgentId,
    envied: AgentId,
    demand: &DemandProfile,
    tie_break: TieBreak,
    prices: &PriceVector,
) -> Vec<(Bundle, Bundle)> {
    let own = options(demand, envier);
    let theirs = options(demand, envied);

    let mut pairs = Vec::new();
    for bundle_j in &theirs {
        let target = adjusted(instance, envier, bundle_j, tie_break, prices);
        let target_value = instance.agent_bundle_value(envier, &target);
        for bundle_i in &own {
            if target_value > instance.agent_bundle_value(envier, bundle_i) + VALUE_EPS {
                pairs.push((bundle_i.clone(), bundle_j.clone()));
            }
        }
    }
    pairs
}

/// Bundles the optimizer may select for `agent`; an empty correspondence means
/// the empty bundle alone.
pub(crate) fn options(demand: &DemandProfile, agent: AgentId) -> Vec<Bundle> {
    let corr = demand.get(agent);
    if corr.is_empty() {
        vec![Bundle::empty()]
    } else {
        corr.bundles().cloned().collect()
    }
}

// === FULL CONSTRAINT SET ===

/// All envy constraints among agents of unequal initial budget.
///
/// Agents are visited in id order, envied bundles in correspondence order, so the
/// output order is reproducible. `TieBreak::None` yields nothing.
pub fn envy_constraints(
    instance: &Instance,
    budgets: &Budgets,
    demand: &DemandProfile,
    tie_break: TieBreak,
    prices: &PriceVector,
) -> Vec<EnvyConstraint> {
    if !tie_break.constrains_envy() {
        return Vec::new();
    }

    let mut constraints = Vec::new();
    for student in instance.agents() {
        for other in instance.agents() {
            if student == other || budgets.get(student) <= budgets.get(other) {
                continue;
            }
            for (bundle_i, bundle_j) in envied_pairs(instance, student, other, demand, tie_break, prices) {
                #[cfg(feature = "instrument")]
                tracing::debug!(
                    target: "envy",
                    envier = student.0,
                    envied = other.0,
                    own_len = bundle_i.len() as u64,
                    envied_len = bundle_j.len() as u64,
                );
                constraints.push(EnvyConstraint {
                    envier: BundleChoice::new(student, bundle_i),
                    envied: BundleChoice::new(other, bundle_j),
                });
            }
        }
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::DemandCorrespondence;
    use crate::types::ItemId;

    struct Market {
        instance: Instance,
        alice: AgentId,
        bob: AgentId,
        x: ItemId,
        y: ItemId,
        z: ItemId,
    }

    fn alice_and_bob() -> Market {
        let mut b = Instance::builder();
        let alice = b.agent("Alice", 2);
        let bob = b.agent("Bob", 2);
        let x = b.item("x", 1);
        let y = b.item("y", 1);
        let z = b.item("z", 2);
        b.value(alice, x, 5.0).value(alice, y, 4.0).value(alice, z, 1.0);
        b.value(bob, x, 4.0).value(bob, y, 6.0).value(bob, z, 3.0);
        Market {
            instance: b.build().unwrap(),
            alice,
            bob,
            x,
            y,
            z,
        }
    }

    fn profile(m: &Market) -> DemandProfile {
        DemandProfile::new(vec![
            DemandCorrespondence::from_entries([
                (3.5, Bundle::new([m.x, m.y])),
                (3.0, Bundle::new([m.x, m.z])),
            ]),
            DemandCorrespondence::from_entries([
                (3.5, Bundle::new([m.x, m.y])),
                (2.0, Bundle::new([m.y, m.z])),
            ]),
        ])
    }

    #[test]
    fn standard_forbids_alice_xz_with_bob_xy() {
        let m = alice_and_bob();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        let budgets = Budgets::from_vec(vec![5.0, 4.0]);

        let constraints = envy_constraints(&m.instance, &budgets, &profile(&m), TieBreak::Standard, &prices);

        assert_eq!(
            constraints,
            vec![EnvyConstraint {
                envier: BundleChoice::new(m.alice, Bundle::new([m.x, m.z])),
                envied: BundleChoice::new(m.bob, Bundle::new([m.x, m.y])),
            }]
        );
    }

    #[test]
    fn no_tie_break_means_no_constraints() {
        let m = alice_and_bob();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        let budgets = Budgets::from_vec(vec![5.0, 4.0]);
        assert!(envy_constraints(&m.instance, &budgets, &profile(&m), TieBreak::None, &prices).is_empty());
    }

    #[test]
    fn equal_budgets_never_constrain() {
        let m = alice_and_bob();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        let budgets = Budgets::uniform(2, 4.0);
        assert!(envy_constraints(&m.instance, &budgets, &profile(&m), TieBreak::Standard, &prices).is_empty());
    }

    #[test]
    fn empty_own_bundle_envies_every_valued_bundle() {
        let mut b = Instance::builder();
        let alice = b.agent("Alice", 1);
        let bob = b.agent("Bob", 1);
        let x = b.item("x", 1);
        let y = b.item("y", 1);
        b.value(alice, x, 10.0).value(alice, y, 20.0);
        b.value(bob, x, 10.0).value(bob, y, 20.0);
        let instance = b.build().unwrap();

        let demand = DemandProfile::new(vec![
            DemandCorrespondence::from_entries([(0.0, Bundle::empty()), (1.1, Bundle::new([y]))]),
            DemandCorrespondence::from_entries([(1.1, Bundle::new([y])), (1.0, Bundle::new([x]))]),
        ]);
        let prices = PriceVector::from_vec(vec![1.0, 1.1]);
        let budgets = Budgets::from_vec(vec![1.1, 1.0]);

        let constraints = envy_constraints(&instance, &budgets, &demand, TieBreak::Standard, &prices);
        let envied: Vec<Bundle> = constraints.iter().map(|c| c.envied.bundle.clone()).collect();

        assert!(constraints.iter().all(|c| c.envier.agent == alice && c.envier.bundle.is_empty()));
        assert_eq!(envied, vec![Bundle::new([x]), Bundle::new([y])]);
    }

    #[test]
    fn contested_adds_free_items_up_to_capacity() {
        let m = alice_and_bob();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        // Alice values x > y > z; z is free so (y) grows to (y, z)
        let adjusted = contested_bundle(&m.instance, m.alice, &Bundle::new([m.y]), &prices);
        assert_eq!(adjusted, Bundle::new([m.y, m.z]));

        // Already full bundles keep the envier's two favourite items
        let full = contested_bundle(&m.instance, m.alice, &Bundle::new([m.x, m.y]), &prices);
        assert_eq!(full, Bundle::new([m.x, m.y]));
    }

    #[test]
    fn contested_can_create_envy_standard_does_not() {
        let mut b = Instance::builder();
        let rich = b.agent("rich", 2);
        let poor = b.agent("poor", 2);
        let x = b.item("x", 1);
        let free = b.item("free", 2);
        let y = b.item("y", 1);
        b.value(rich, x, 5.0).value(rich, free, 3.0).value(rich, y, 7.0);
        b.value(poor, x, 5.0).value(poor, free, 1.0).value(poor, y, 1.0);
        let instance = b.build().unwrap();
        let prices = PriceVector::from_vec(vec![1.0, 0.0, 1.0]);
        let budgets = Budgets::from_vec(vec![2.0, 1.0]);

        // rich holds (y) worth 7; poor holds (x) worth 5 to rich, 8 once the free item is added
        let demand = DemandProfile::new(vec![
            DemandCorrespondence::from_entries([(1.0, Bundle::new([y]))]),
            DemandCorrespondence::from_entries([(1.0, Bundle::new([x]))]),
        ]);

        let standard = envy_constraints(&instance, &budgets, &demand, TieBreak::Standard, &prices);
        assert!(standard.is_empty());

        let contested = envy_constraints(&instance, &budgets, &demand, TieBreak::Contested, &prices);
        assert_eq!(contested.len(), 1);
        assert_eq!(contested[0].envier, BundleChoice::new(rich, Bundle::new([y])));
        assert_eq!(contested[0].envied, BundleChoice::new(poor, Bundle::new([x])));
    }

    #[test]
    fn ordering_is_reproducible() {
        let m = alice_and_bob();
        let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
        let budgets = Budgets::from_vec(vec![5.0, 4.0]);
        let first = envy_constraints(&m.instance, &budgets, &profile(&m), TieBreak::Contested, &prices);
        let second = envy_constraints(&m.instance, &budgets, &profile(&m), TieBreak::Contested, &prices);
        assert_eq!(first, second);
    }
}
