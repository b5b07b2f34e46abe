//! Linear plus interaction traversal of an example.

use ahash::AHashSet;

use crate::constants::{FeatureValue, NamespaceIndex};
use crate::example::{ExamplePredict, Interaction};
use crate::feature_group::Features;
use crate::interactions::eval_sum_ft_squared_of_generated_ft;
use crate::interactions_predict::{
    feature_to_weight_index, generate_interactions, generate_interactions_audit, InteractionCache,
    InteractionSink,
};
use crate::weights::WeightStore;

/// Feed the linear features of one group to `sink`, each value multiplied by `mult`.
#[inline]
pub fn foreach_feature_in_group<S: InteractionSink>(
    fs: &Features,
    scale: u64,
    offset: u64,
    mult: FeatureValue,
    sink: &mut S,
) {
    for (value, index) in fs.iter() {
        sink.feature(mult * value, feature_to_weight_index(index, scale, offset));
    }
}

fn foreach_linear<const AUDIT: bool, S: InteractionSink>(
    ec: &ExamplePredict,
    ignore_linear: &AHashSet<NamespaceIndex>,
    sink: &mut S,
) {
    let (scale, offset) = (ec.ft_index_scale, ec.ft_index_offset);
    for (ns, fs) in ec.iter() {
        if ignore_linear.contains(&ns) {
            continue;
        }
        if AUDIT {
            for (i, (value, index)) in fs.iter().enumerate() {
                sink.push_audit(fs.audit_at(i));
                sink.feature(value, feature_to_weight_index(index, scale, offset));
                sink.pop_audit();
            }
        } else {
            foreach_feature_in_group(fs, scale, offset, 1.0, sink);
        }
    }
}

/// Every linear feature (namespaces in `ignore_linear` skipped, visited in
/// ascending namespace order) and then every interaction of `interactions`.
///
/// Returns the number of interacted features; linear features are not counted.
pub fn foreach_feature<S: InteractionSink>(
    ec: &ExamplePredict,
    ignore_linear: &AHashSet<NamespaceIndex>,
    interactions: &[Interaction],
    permutations: bool,
    hash_bits: u32,
    sink: &mut S,
    cache: &mut InteractionCache,
) -> usize {
    foreach_linear::<false, S>(ec, ignore_linear, sink);
    generate_interactions(interactions, permutations, ec, hash_bits, sink, cache)
}

/// [`foreach_feature`] with audit names pushed around every feature.
pub fn foreach_feature_audit<S: InteractionSink>(
    ec: &ExamplePredict,
    ignore_linear: &AHashSet<NamespaceIndex>,
    interactions: &[Interaction],
    permutations: bool,
    hash_bits: u32,
    sink: &mut S,
    cache: &mut InteractionCache,
) -> usize {
    foreach_linear::<true, S>(ec, ignore_linear, sink);
    generate_interactions_audit(interactions, permutations, ec, hash_bits, sink, cache)
}

/// `initial + Σ value · weight[index]` over every feature of `ec`, with the
/// number of interacted features.
pub fn inline_predict_with_count<W: WeightStore>(
    weights: &W,
    ignore_linear: &AHashSet<NamespaceIndex>,
    interactions: &[Interaction],
    permutations: bool,
    ec: &ExamplePredict,
    cache: &mut InteractionCache,
    initial: f32,
) -> (f32, usize) {
    let mut prediction = initial;
    let num_interacted = foreach_feature(
        ec,
        ignore_linear,
        interactions,
        permutations,
        weights.hash_bits(),
        &mut |value: f32, index: u64| prediction += value * weights.get(index),
        cache,
    );
    (prediction, num_interacted)
}

/// `initial + Σ value · weight[index]` over every feature of `ec`.
#[inline]
pub fn inline_predict<W: WeightStore>(
    weights: &W,
    ignore_linear: &AHashSet<NamespaceIndex>,
    interactions: &[Interaction],
    permutations: bool,
    ec: &ExamplePredict,
    cache: &mut InteractionCache,
    initial: f32,
) -> f32 {
    inline_predict_with_count(
        weights,
        ignore_linear,
        interactions,
        permutations,
        ec,
        cache,
        initial,
    )
    .0
}

/// Squared norm of the whole expanded example: every group's
/// `sum_feat_sq` plus the generated-feature estimate for `interactions`.
pub fn total_sum_feat_sq(
    permutations: bool,
    ec: &ExamplePredict,
    interactions: &[Interaction],
) -> f32 {
    let linear: f32 = ec.iter().map(|(_, fs)| fs.sum_feat_sq()).sum();
    linear + eval_sum_ft_squared_of_generated_ft(permutations, interactions, ec.feature_space())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{DenseParameters, SparseParameters};

    fn example() -> ExamplePredict {
        let mut ec = ExamplePredict::new(0);
        ec.feature_group(b'a').add_feature_raw(1, 2.0);
        ec.feature_group(b'a').add_feature_raw(2, 1.0);
        ec.feature_group(b'b').add_feature_raw(3, 3.0);
        ec
    }

    #[test_log::test]
    fn linear_prediction_sums_value_times_weight() {
        let weights = DenseParameters::new(10, 0, 0);
        weights.set(1, 0.5);
        weights.set(2, -1.0);
        weights.set(3, 2.0);
        let ec = example();
        let mut cache = InteractionCache::new();
        let p = inline_predict(&weights, &AHashSet::new(), &[], false, &ec, &mut cache, 0.25);
        assert_eq!(p, 0.25 + 1.0 - 1.0 + 6.0);

        let ignore: AHashSet<u8> = [b'b'].into_iter().collect();
        let p = inline_predict(&weights, &ignore, &[], false, &ec, &mut cache, 0.0);
        assert_eq!(p, 0.0);
    }

    #[test_log::test]
    fn interacted_count_ignores_linear_filter() {
        let weights = SparseParameters::new(10, 0, 0);
        let ec = example();
        let ignore: AHashSet<u8> = [b'a', b'b'].into_iter().collect();
        let mut cache = InteractionCache::new();
        let (p, count) = inline_predict_with_count(
            &weights,
            &ignore,
            &[vec![b'a', b'b']],
            false,
            &ec,
            &mut cache,
            1.0,
        );
        assert_eq!(p, 1.0);
        assert_eq!(count, 2);
        assert_eq!(weights.block_count(), 0);
    }

    #[test_log::test]
    fn foreach_feature_visits_linear_then_interactions() {
        let ec = example();
        let mut seen = Vec::new();
        let mut cache = InteractionCache::new();
        let count = foreach_feature(
            &ec,
            &AHashSet::new(),
            &[vec![b'a', b'b']],
            false,
            18,
            &mut |v: f32, i: u64| seen.push((v, i)),
            &mut cache,
        );
        assert_eq!(count, 2);
        assert_eq!(seen.len(), 5);
        assert_eq!(&seen[..3], &[(2.0, 1), (1.0, 2), (3.0, 3)]);
        assert_eq!(seen[3].0, 6.0);
    }

    #[test_log::test]
    fn total_sum_includes_interactions() {
        let ec = example();
        // linear 5 + 9, pair a*b: 5 * 9
        assert_eq!(total_sum_feat_sq(false, &ec, &[vec![b'a', b'b']]), 14.0 + 45.0);
        assert_eq!(total_sum_feat_sq(false, &ec, &[]), 14.0);
    }
}
