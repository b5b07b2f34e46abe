//! Interaction compilation and expansion through the public API.

use std::collections::BTreeSet;

use fast_features::interactions::eval_sum_ft_squared_of_generated_ft;
use fast_features::{
    compile_interactions, generate_interactions, ExamplePredict, GenerateMode, InteractionCache,
    InteractionsGenerator,
};

fn example(groups: &[(u8, &[f32])]) -> ExamplePredict {
    let mut ec = ExamplePredict::new(0);
    for &(ns, values) in groups {
        let fs = ec.feature_group(ns);
        for (i, &v) in values.iter().enumerate() {
            fs.add_feature_raw(1000 * ns as u64 + i as u64, v);
        }
    }
    ec
}

fn terms(list: &[&str]) -> Vec<Vec<u8>> {
    list.iter().map(|s| s.as_bytes().to_vec()).collect()
}

/// Count of emitted features and the sum of their squared values.
fn expand(ec: &ExamplePredict, interactions: &[Vec<u8>], permutations: bool) -> (usize, f32) {
    let mut cache = InteractionCache::new();
    let mut sum_sq = 0.0f32;
    let mut emitted = 0usize;
    let count = generate_interactions(
        interactions,
        permutations,
        ec,
        18,
        &mut |v: f32, _i: u64| {
            sum_sq += v * v;
            emitted += 1;
        },
        &mut cache,
    );
    assert_eq!(count, emitted);
    (count, sum_sq)
}

#[test_log::test]
fn quadratic_wildcard_covers_every_pair() {
    let namespaces: BTreeSet<u8> = b"ab".iter().copied().collect();
    let compiled = compile_interactions(&terms(&["::"]), &namespaces, GenerateMode::Combinations, false);
    assert_eq!(compiled, terms(&["aa", "ab", "bb"]));

    let with_dups = compile_interactions(&terms(&["::"]), &namespaces, GenerateMode::Combinations, true);
    assert_eq!(with_dups.len(), 4);
}

#[test_log::test]
fn fixed_namespaces_survive_expansion() {
    let namespaces: BTreeSet<u8> = b"abc".iter().copied().collect();
    let compiled = compile_interactions(&terms(&["a:"]), &namespaces, GenerateMode::Combinations, false);
    assert_eq!(compiled, terms(&["aa", "ab", "ac"]));

    let perms = compile_interactions(&terms(&[":::"]), &namespaces, GenerateMode::Permutations, true);
    assert_eq!(perms.len(), 27);
    assert!(perms.iter().all(|t| t.len() == 3));
}

#[test_log::test]
fn emitted_squares_match_estimate() {
    let ec = example(&[(b'a', &[1.0, 2.0]), (b'b', &[3.0, 1.0, 1.0]), (b'c', &[2.0])]);
    for term in ["ab", "aa", "aab", "abc", "aabc", "aaab", "bbbb"] {
        let interactions = terms(&[term]);
        for permutations in [false, true] {
            let (_, sum_sq) = expand(&ec, &interactions, permutations);
            let estimate =
                eval_sum_ft_squared_of_generated_ft(permutations, &interactions, ec.feature_space());
            assert_eq!(sum_sq, estimate, "term {term} permutations {permutations}");
        }
    }
}

#[test_log::test]
fn counts_follow_multiset_sizes() {
    let ec = example(&[(b'a', &[1.0, 1.0]), (b'b', &[1.0, 1.0, 1.0])]);
    assert_eq!(expand(&ec, &terms(&["aab"]), false).0, 3 * 3);
    assert_eq!(expand(&ec, &terms(&["aab"]), true).0, 4 * 3);
    assert_eq!(expand(&ec, &terms(&["bbb"]), false).0, 10);
    assert_eq!(expand(&ec, &terms(&["abz"]), false).0, 0);
}

#[test_log::test]
fn generator_recompiles_only_on_new_namespaces() {
    let mut generator = InteractionsGenerator::new(GenerateMode::Combinations, false);
    let templates = terms(&["::"]);

    let first = example(&[(b'a', &[1.0])]);
    assert!(generator.update_interactions_if_new_namespace_seen(&templates, first.feature_space()));
    assert_eq!(generator.generated_interactions, terms(&["aa"]));
    assert!(!generator.update_interactions_if_new_namespace_seen(&templates, first.feature_space()));

    let second = example(&[(b'b', &[1.0])]);
    assert!(generator.update_interactions_if_new_namespace_seen(&templates, second.feature_space()));
    assert_eq!(generator.generated_interactions, terms(&["aa", "ab", "bb"]));
}

#[test_log::test]
fn split_repeat_compiles_to_combinations() {
    let ec = example(&[(b'a', &[1.0, 2.0]), (b'x', &[3.0])]);
    let namespaces: BTreeSet<u8> = ec.namespaces().into_iter().collect();
    let compiled =
        compile_interactions(&terms(&[":x:"]), &namespaces, GenerateMode::Combinations, false);
    assert_eq!(compiled, terms(&["aax", "axx", "xxx"]));

    // aax: 3 unordered pairs of a, axx: 2, xxx: 1
    assert_eq!(expand(&ec, &terms(&["aax"]), false).0, 3);
    assert_eq!(expand(&ec, &compiled, false).0, 6);
    // the written order would pair every a with every a in both orders
    assert_eq!(expand(&ec, &terms(&["axa"]), false).0, 4);
}

#[test_log::test]
fn fixed_namespace_with_two_wildcards_keeps_ordered_pairs() {
    let namespaces: BTreeSet<u8> = b"ab".iter().copied().collect();
    let kept = compile_interactions(&terms(&["x::"]), &namespaces, GenerateMode::Combinations, true);
    assert_eq!(kept, terms(&["aax", "xab", "xba", "bbx"]));
    let filtered =
        compile_interactions(&terms(&["x::"]), &namespaces, GenerateMode::Permutations, false);
    assert_eq!(filtered, terms(&["aax", "xab", "bbx"]));
}
