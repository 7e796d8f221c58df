//! Allocation optimizer scenarios: envy exclusion, clearing and infeasibility.

use aceei_core::{
    AllocationOptimizer, Budgets, Bundle, DemandCorrespondence, DemandProfile, GoodLpBackend, Instance,
    ItemId, OptimizerConfig, PriceVector, SolveStatus, TieBreak, envy_constraints,
};

struct AliceBob {
    instance: Instance,
    x: ItemId,
    y: ItemId,
    z: ItemId,
}

/// Alice {x:5, y:4, z:1}, Bob {x:4, y:6, z:3}; both capacity 2; x, y capacity 1, z capacity 2.
fn alice_bob() -> AliceBob {
    let mut b = Instance::builder();
    let alice = b.agent("Alice", 2);
    let bob = b.agent("Bob", 2);
    let x = b.item("x", 1);
    let y = b.item("y", 1);
    let z = b.item("z", 2);
    b.value(alice, x, 5.0).value(alice, y, 4.0).value(alice, z, 1.0);
    b.value(bob, x, 4.0).value(bob, y, 6.0).value(bob, z, 3.0);
    AliceBob {
        instance: b.build().unwrap(),
        x,
        y,
        z,
    }
}

fn literal_profile(m: &AliceBob) -> DemandProfile {
    DemandProfile::new(vec![
        DemandCorrespondence::from_entries([(3.5, Bundle::new([m.x, m.y])), (3.0, Bundle::new([m.x, m.z]))]),
        DemandCorrespondence::from_entries([(3.5, Bundle::new([m.x, m.y])), (2.0, Bundle::new([m.y, m.z]))]),
    ])
}

#[test]
fn literal_scenario_clears_without_the_envied_pair() {
    let m = alice_bob();
    let alice = m.instance.agent_by_name("Alice").unwrap();
    let bob = m.instance.agent_by_name("Bob").unwrap();
    let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
    let budgets = Budgets::from_vec(vec![5.0, 4.0]);
    let demand = literal_profile(&m);

    let constraints = envy_constraints(&m.instance, &budgets, &demand, TieBreak::Standard, &prices);
    assert_eq!(constraints.len(), 1, "exactly one forbidden pair expected");

    let optimizer = AllocationOptimizer::new(&m.instance, GoodLpBackend, OptimizerConfig::default()).unwrap();
    let outcome = optimizer
        .optimize(&demand, &prices, TieBreak::Standard, &budgets)
        .expect("literal scenario is feasible");

    assert_eq!(outcome.bundle(alice), &Bundle::new([m.x, m.z]));
    assert_eq!(outcome.bundle(bob), &Bundle::new([m.y, m.z]));
    assert_eq!(outcome.objective, 0.0);
    assert_eq!(outcome.excess_demand, vec![0.0, 0.0, 0.0]);
    assert_eq!(outcome.envy_constraints, 1);
    assert_eq!(outcome.selections[alice.index()].threshold, 3.0);
    assert_eq!(outcome.selections[bob.index()].threshold, 2.0);
}

#[test]
fn every_agent_gets_exactly_one_option_from_its_correspondence() {
    let m = alice_bob();
    let prices = PriceVector::from_vec(vec![1.5, 2.0, 0.0]);
    let budgets = Budgets::from_vec(vec![5.0, 4.0]);
    let demand = literal_profile(&m);
    let optimizer = AllocationOptimizer::new(&m.instance, GoodLpBackend, OptimizerConfig::default()).unwrap();

    for tie_break in [TieBreak::None, TieBreak::Standard, TieBreak::Contested] {
        let outcome = optimizer.optimize(&demand, &prices, tie_break, &budgets).unwrap();
        assert_eq!(outcome.selections.len(), 2);
        for selection in &outcome.selections {
            assert!(
                demand.get(selection.agent).contains(&selection.bundle),
                "{tie_break}: {:?} picked {:?}, not in its correspondence",
                selection.agent,
                selection.bundle
            );
        }
    }
}

#[test]
fn envy_exclusion_forces_the_richer_agent_off_the_empty_bundle() {
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

    let optimizer = AllocationOptimizer::new(&instance, GoodLpBackend, OptimizerConfig::default()).unwrap();
    let outcome = optimizer
        .optimize(&demand, &prices, TieBreak::Standard, &budgets)
        .unwrap();

    assert_eq!(outcome.bundle(alice), &Bundle::new([y]));
    assert_eq!(outcome.bundle(bob), &Bundle::new([x]));
    assert_eq!(outcome.objective, 0.0);
}

#[test]
fn hard_capacity_makes_oversubscription_infeasible() {
    let mut b = Instance::builder();
    let a = b.agent("a", 1);
    let c = b.agent("c", 1);
    let x = b.item("x", 1);
    b.value(a, x, 1.0).value(c, x, 1.0);
    let instance = b.build().unwrap();

    // Both agents can only take x; x holds one
    let demand = DemandProfile::new(vec![
        DemandCorrespondence::from_entries([(1.0, Bundle::new([x]))]),
        DemandCorrespondence::from_entries([(1.0, Bundle::new([x]))]),
    ]);
    let prices = PriceVector::from_vec(vec![0.5]);
    let budgets = Budgets::uniform(2, 1.0);

    let hard = OptimizerConfig {
        max_oversubscription: Some(0.0),
        ..Default::default()
    };
    let optimizer = AllocationOptimizer::new(&instance, GoodLpBackend, hard).unwrap();
    assert_eq!(
        optimizer.optimize(&demand, &prices, TieBreak::None, &budgets),
        Err(SolveStatus::Infeasible)
    );

    // The soft model prices the same situation as one unit of excess
    let soft = AllocationOptimizer::new(&instance, GoodLpBackend, OptimizerConfig::default()).unwrap();
    let outcome = soft.optimize(&demand, &prices, TieBreak::None, &budgets).unwrap();
    assert_eq!(outcome.excess_demand, vec![1.0]);
    assert_eq!(outcome.objective, 1.0);
}

#[test]
fn unavoidable_envy_is_reported_infeasible() {
    let mut b = Instance::builder();
    let rich = b.agent("rich", 1);
    let poor = b.agent("poor", 1);
    let x = b.item("x", 1);
    let y = b.item("y", 1);
    b.value(rich, x, 1.0).value(rich, y, 5.0);
    b.value(poor, x, 1.0).value(poor, y, 5.0);
    let instance = b.build().unwrap();

    // rich can only pick x, poor can only pick y, and rich prefers y
    let demand = DemandProfile::new(vec![
        DemandCorrespondence::from_entries([(2.0, Bundle::new([x]))]),
        DemandCorrespondence::from_entries([(1.0, Bundle::new([y]))]),
    ]);
    let prices = PriceVector::from_vec(vec![1.0, 1.0]);
    let budgets = Budgets::from_vec(vec![2.0, 1.0]);
    let optimizer = AllocationOptimizer::new(&instance, GoodLpBackend, OptimizerConfig::default()).unwrap();

    assert_eq!(
        optimizer.optimize(&demand, &prices, TieBreak::Standard, &budgets),
        Err(SolveStatus::Infeasible)
    );
    assert!(optimizer.optimize(&demand, &prices, TieBreak::None, &budgets).is_ok());
}

#[test]
fn free_items_may_stay_empty_but_priced_items_must_fill() {
    let m = alice_bob();
    let alice = m.instance.agent_by_name("Alice").unwrap();
    let budgets = Budgets::from_vec(vec![5.0, 4.0]);
    let demand = DemandProfile::new(vec![
        DemandCorrespondence::from_entries([(1.0, Bundle::new([m.x]))]),
        DemandCorrespondence::from_entries([(1.0, Bundle::empty())]),
    ]);
    let optimizer = AllocationOptimizer::new(&m.instance, GoodLpBackend, OptimizerConfig::default()).unwrap();

    // y and z free: nothing to pay for leaving them empty
    let free = PriceVector::from_vec(vec![1.0, 0.0, 0.0]);
    let outcome = optimizer.optimize(&demand, &free, TieBreak::None, &budgets).unwrap();
    assert_eq!(outcome.bundle(alice), &Bundle::new([m.x]));
    assert_eq!(outcome.objective, 0.0);

    // z priced at capacity 2 with no takers: two units short
    let priced = PriceVector::from_vec(vec![1.0, 0.0, 0.5]);
    let outcome = optimizer.optimize(&demand, &priced, TieBreak::None, &budgets).unwrap();
    assert_eq!(outcome.excess_demand, vec![0.0, -1.0, -2.0]);
    assert_eq!(outcome.objective, 2.0);
}
