//! Flattening an example into one feature group.

use std::sync::Arc;

use ahash::AHashSet;

use crate::constants::NamespaceIndex;
use crate::example::ExamplePredict;
use crate::feature_group::Features;
use crate::interactions_predict::InteractionCache;
use crate::predict::foreach_feature;

/// Merge runs of equal indices in a sorted group by summing their values.
///
/// Returns the new `sum_feat_sq`, computed from the merged values. Audit
/// entries follow the first feature of each run.
pub fn collision_cleanup(fs: &mut Features) -> f32 {
    if fs.is_empty() {
        fs.sum_feat_sq = 0.0;
        return 0.0;
    }

    let with_audit = fs.has_audit();
    let mut sum_sq = 0.0f32;
    let mut last = 0usize;
    for i in 1..fs.len() {
        if fs.indices[i] == fs.indices[last] {
            fs.values[last] += fs.values[i];
        } else {
            sum_sq += fs.values[last] * fs.values[last];
            last += 1;
            fs.values[last] = fs.values[i];
            fs.indices[last] = fs.indices[i];
            if with_audit {
                fs.audit_info.swap(last, i);
            }
        }
    }
    sum_sq += fs.values[last] * fs.values[last];

    let new_len = last + 1;
    fs.values.truncate(new_len);
    fs.indices.truncate(new_len);
    fs.audit_info.truncate(if with_audit { new_len } else { 0 });
    fs.sum_feat_sq = sum_sq;
    sum_sq
}

/// Every linear and interacted feature of `ec` as one group, keyed by
/// unscaled index, sorted under `parse_mask`, with collisions summed.
///
/// Scale and offset are forced to `1`/`0` for the traversal and restored
/// afterwards.
pub fn flatten_features(
    ec: &mut ExamplePredict,
    ignore_linear: &AHashSet<NamespaceIndex>,
    permutations: bool,
    hash_bits: u32,
    parse_mask: u64,
    cache: &mut InteractionCache,
) -> Features {
    let mut fs = Features::new();
    {
        let mut unscaled = ec.stash_scale_offset();
        unscaled.ft_index_scale = 1;
        unscaled.ft_index_offset = 0;
        let interactions = Arc::clone(&unscaled.interactions);
        let mut push = |value: f32, index: u64| fs.add_feature_raw(index, value);
        foreach_feature(
            &unscaled,
            ignore_linear,
            &interactions,
            permutations,
            hash_bits,
            &mut push,
            cache,
        );
    }
    fs.sort(parse_mask);
    collision_cleanup(&mut fs);
    fs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::FnvHasher;

    #[test_log::test]
    fn collisions_are_summed() {
        let mut fs = Features::new();
        for (i, v) in [(1u64, 1.0f32), (1, 2.0), (4, 1.0), (9, 0.5), (9, 0.5), (9, 1.0)] {
            fs.add_feature_raw(i, v);
        }
        let sum = collision_cleanup(&mut fs);
        assert_eq!(fs.indices(), &[1, 4, 9]);
        assert_eq!(fs.values(), &[3.0, 1.0, 2.0]);
        assert_eq!(sum, 9.0 + 1.0 + 4.0);
        assert_eq!(fs.sum_feat_sq(), sum);
    }

    #[test_log::test]
    fn flatten_restores_scale_and_merges() {
        let mut ec = ExamplePredict::new(0);
        ec.feature_group(b'a').add_feature_raw(3, 1.0);
        ec.feature_group(b'b').add_feature_raw(3, 2.0);
        ec.feature_group(b'b').add_feature_raw(8, 1.0);
        ec.interactions = Arc::new(vec![vec![b'a', b'b']]);
        ec.ft_index_scale = 4;
        ec.ft_index_offset = 2;

        let mut cache = InteractionCache::new();
        let flat = flatten_features(&mut ec, &AHashSet::new(), false, 18, u64::MAX, &mut cache);

        assert_eq!((ec.ft_index_scale, ec.ft_index_offset), (4, 2));
        // linear index 3 collides across namespaces: 1 + 2
        let three = flat.indices().iter().position(|&i| i == 3).unwrap();
        assert_eq!(flat.values()[three], 3.0);
        let pair = FnvHasher::new().hash(3).hash(8).truncated_hash(18) as u64;
        assert!(flat.indices().contains(&pair));
        assert!(flat.indices().windows(2).all(|w| w[0] < w[1]));
        let expected: f32 = flat.values().iter().map(|v| v * v).sum();
        assert_eq!(flat.sum_feat_sq(), expected);
    }
}
