//! Set repository algebra against `BTreeSet`.
//!
//! Random sets are created in a repository and every operation is checked
//! against the standard library on the same elements:
//! - union, intersection and difference of random pairs
//! - membership and counts
//! - node sharing between equal sets and pruning of unused nodes
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package duchain-core --test set_algebra
//! cargo test --package duchain-core --test set_algebra -- --nocapture
//! ```

use duchain_core::{Set, SetRepository};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

// ============================================================================
// Test Helpers
// ============================================================================

const CYCLES: u64 = 10;
const SETS_PER_CYCLE: usize = 12;
const PAIRS_PER_CYCLE: usize = 150;

fn random_elements(rng: &mut StdRng) -> BTreeSet<u32> {
    let size = rng.gen_range(0..200);
    let spread = rng.gen_range(1..600);
    (0..size).map(|_| rng.gen_range(0..spread)).collect()
}

fn assert_same(set: &Set, expected: &BTreeSet<u32>, what: &str) {
    assert_eq!(&set.std_set(), expected, "{} produced the wrong elements", what);
    assert_eq!(set.count(), expected.len(), "{} has the wrong count", what);
    assert_eq!(set.is_empty(), expected.is_empty());
}

// ============================================================================
// Randomized Cycles
// ============================================================================

#[test]
fn test_random_pairs_match_std_sets() {
    for cycle in 0..CYCLES {
        let mut rng = StdRng::seed_from_u64(0x5e7 + cycle);
        let repository = SetRepository::new(format!("cycle-{}", cycle));

        let mut sets: Vec<(Set, BTreeSet<u32>)> = Vec::new();
        for _ in 0..SETS_PER_CYCLE {
            let elements = random_elements(&mut rng);
            let set = repository.create_set(elements.iter().copied());
            assert_same(&set, &elements, "create_set");
            sets.push((set, elements));
        }

        for _ in 0..PAIRS_PER_CYCLE {
            let (a, expected_a) = &sets[rng.gen_range(0..sets.len())];
            let (b, expected_b) = &sets[rng.gen_range(0..sets.len())];

            let union: BTreeSet<u32> = expected_a.union(expected_b).copied().collect();
            let intersection: BTreeSet<u32> =
                expected_a.intersection(expected_b).copied().collect();
            let difference: BTreeSet<u32> = expected_a.difference(expected_b).copied().collect();

            assert_same(&a.union(b), &union, "union");
            assert_same(&a.intersection(b), &intersection, "intersection");
            assert_same(&a.difference(b), &difference, "difference");
            assert_same(&repository.union(a, b), &union, "repository union");

            for _ in 0..10 {
                let probe = rng.gen_range(0..700);
                assert_eq!(a.contains(probe), expected_a.contains(&probe));
            }
        }
    }
}

#[test]
fn test_results_are_canonical() {
    let mut rng = StdRng::seed_from_u64(42);
    let repository = SetRepository::new("canonical");

    for _ in 0..50 {
        let a = random_elements(&mut rng);
        let b = random_elements(&mut rng);
        let set_a = repository.create_set(a.iter().copied());
        let set_b = repository.create_set(b.iter().copied());

        let direct = repository.create_set(a.union(&b).copied());
        assert_eq!(set_a.union(&set_b), direct);
        assert_eq!(set_b.union(&set_a), direct);
    }
}

#[test]
fn test_iteration_is_ascending() {
    let repository = SetRepository::new("order");
    let set = repository.create_set([90, 3, 17, 4, 5, 6, 200, 3]);
    assert_eq!(set.to_vec(), vec![3, 4, 5, 6, 17, 90, 200]);
    assert_eq!(set.iter().collect::<Vec<_>>(), set.to_vec());
}

#[test]
fn test_prune_keeps_live_sets() {
    let repository = SetRepository::new("prune");
    let mut rng = StdRng::seed_from_u64(7);

    let kept: Vec<(Set, BTreeSet<u32>)> = (0..5)
        .map(|_| {
            let elements = random_elements(&mut rng);
            (repository.create_set(elements.iter().copied()), elements)
        })
        .collect();
    for _ in 0..40 {
        let elements = random_elements(&mut rng);
        drop(repository.create_set(elements));
    }

    repository.prune();
    assert!(repository.live_node_count() <= repository.node_count());
    for (set, elements) in &kept {
        assert_same(set, elements, "pruned repository");
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_algebra_matches_btreeset(
        a in prop::collection::btree_set(0u32..400, 0..120),
        b in prop::collection::btree_set(0u32..400, 0..120),
    ) {
        let repository = SetRepository::new("proptest");
        let set_a = repository.create_set(a.iter().copied());
        let set_b = repository.create_set(b.iter().copied());

        prop_assert_eq!(set_a.union(&set_b).std_set(), a.union(&b).copied().collect::<BTreeSet<_>>());
        prop_assert_eq!(
            set_a.intersection(&set_b).std_set(),
            a.intersection(&b).copied().collect::<BTreeSet<_>>()
        );
        prop_assert_eq!(
            set_a.difference(&set_b).std_set(),
            a.difference(&b).copied().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn prop_with_and_without(
        elements in prop::collection::btree_set(0u32..100, 0..50),
        item in 0u32..100,
    ) {
        let repository = SetRepository::new("single");
        let set = repository.create_set(elements.iter().copied());

        prop_assert!(set.with(item).contains(item));
        prop_assert!(!set.without(item).contains(item));
        prop_assert_eq!(set.with(item).without(item).count(), elements.len() - usize::from(elements.contains(&item)));
    }
}
