//! Interaction-expansion kernel.
//!
//! For every compiled term the kernel walks the cross product of the term's
//! feature groups and reports each synthesized feature to an
//! [`InteractionSink`] as `(value, weight_index)`. Nothing is materialized:
//!   - value: product of the participating feature values
//!   - index: the raw feature indices folded through [`FnvHasher`], XOR-folded
//!     to the store's hash bits, then `* ft_index_scale + ft_index_offset`
//!
//! Outside permutation mode, adjacent repeats of one namespace produce
//! combinations only: the inner cursor starts at the outer cursor's position,
//! so every feature is also paired with itself.
//!
//! Pairs and triples use dedicated nested loops. Longer terms run an
//! odometer over an explicit frame stack held in an [`InteractionCache`].

use smallvec::SmallVec;

use crate::constants::{FeatureIndex, FeatureValue, NamespaceIndex};
use crate::example::{ExamplePredict, Interaction};
use crate::feature_group::{AuditStrings, Features};
use crate::hash::FnvHasher;

/// Receiver of synthesized features.
///
/// Any `FnMut(f32, u64)` closure is a sink. Audit-aware sinks also override
/// `push_audit`/`pop_audit`, which bracket each nesting level of a term.
pub trait InteractionSink {
    fn feature(&mut self, value: FeatureValue, weight_index: u64);

    fn push_audit(&mut self, _audit: &AuditStrings) {}

    fn pop_audit(&mut self) {}
}

impl<F: FnMut(FeatureValue, u64)> InteractionSink for F {
    #[inline]
    fn feature(&mut self, value: FeatureValue, weight_index: u64) {
        self(value, weight_index)
    }
}

#[inline]
pub fn interaction_value(value1: FeatureValue, value2: FeatureValue) -> FeatureValue {
    value1 * value2
}

#[inline]
pub fn feature_to_weight_index(index: FeatureIndex, scale: u64, offset: u64) -> u64 {
    index.wrapping_mul(scale).wrapping_add(offset)
}

/// One cursor of the generic walk.
#[derive(Debug, Clone, Copy)]
struct FeatureGenData {
    current: usize,
    len: usize,
    /// Same namespace as the previous frame: start from its cursor.
    self_interaction: bool,
    /// Hash of the indices chosen by the frames before this one.
    hasher: FnvHasher,
    /// Product of the values chosen by the frames before this one.
    x: FeatureValue,
}

/// Scratch frames reused across examples by the generic walk.
#[derive(Debug, Default)]
pub struct InteractionCache {
    state_data: Vec<FeatureGenData>,
}

impl InteractionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
struct KernelParams {
    hash_bits: u32,
    scale: u64,
    offset: u64,
}

/// Emit `fs[start..]` combined with the prefix `(value, hasher)`.
#[inline(always)]
fn inner_kernel<const AUDIT: bool, S: InteractionSink>(
    fs: &Features,
    start: usize,
    value: FeatureValue,
    hasher: FnvHasher,
    params: KernelParams,
    sink: &mut S,
) {
    let values = &fs.values[start..];
    let indices = &fs.indices[start..];
    for (offset, (&v, &idx)) in values.iter().zip(indices).enumerate() {
        if AUDIT {
            sink.push_audit(fs.audit_at(start + offset));
        }
        let hash = hasher.hash(idx as u32).truncated_hash(params.hash_bits) as u64;
        sink.feature(
            interaction_value(value, v),
            feature_to_weight_index(hash, params.scale, params.offset),
        );
        if AUDIT {
            sink.pop_audit();
        }
    }
}

fn process_quadratic<const AUDIT: bool, S: InteractionSink>(
    first: &Features,
    second: &Features,
    same_namespace: bool,
    params: KernelParams,
    sink: &mut S,
) -> usize {
    let mut num_features = 0;
    for i in 0..first.len() {
        if AUDIT {
            sink.push_audit(first.audit_at(i));
        }
        let hasher = FnvHasher::new().hash(first.indices[i] as u32);
        let start = if same_namespace { i } else { 0 };
        num_features += second.len() - start;
        inner_kernel::<AUDIT, S>(second, start, first.values[i], hasher, params, sink);
        if AUDIT {
            sink.pop_audit();
        }
    }
    num_features
}

fn process_cubic<const AUDIT: bool, S: InteractionSink>(
    groups: [&Features; 3],
    same_namespace1: bool,
    same_namespace2: bool,
    params: KernelParams,
    sink: &mut S,
) -> usize {
    let [first, second, third] = groups;
    let mut num_features = 0;
    for i in 0..first.len() {
        if AUDIT {
            sink.push_audit(first.audit_at(i));
        }
        let first_hasher = FnvHasher::new().hash(first.indices[i] as u32);
        let first_value = first.values[i];

        let j_start = if same_namespace1 { i } else { 0 };
        for j in j_start..second.len() {
            if AUDIT {
                sink.push_audit(second.audit_at(j));
            }
            let hasher = first_hasher.hash(second.indices[j] as u32);
            let value = interaction_value(first_value, second.values[j]);
            let start = if same_namespace2 { j } else { 0 };
            num_features += third.len() - start;
            inner_kernel::<AUDIT, S>(third, start, value, hasher, params, sink);
            if AUDIT {
                sink.pop_audit();
            }
        }
        if AUDIT {
            sink.pop_audit();
        }
    }
    num_features
}

fn process_generic<const AUDIT: bool, S: InteractionSink>(
    term: &[NamespaceIndex],
    groups: &[&Features],
    permutations: bool,
    params: KernelParams,
    sink: &mut S,
    cache: &mut InteractionCache,
) -> usize {
    let frames = &mut cache.state_data;
    frames.clear();
    frames.extend(groups.iter().enumerate().map(|(t, fs)| FeatureGenData {
        current: 0,
        len: fs.len(),
        self_interaction: !permutations && t > 0 && term[t] == term[t - 1],
        hasher: FnvHasher::new(),
        x: 1.0,
    }));

    let last = frames.len() - 1;
    let mut num_features = 0;
    let mut cur = 0usize;
    loop {
        if cur < last {
            let next = cur + 1;
            let position = frames[cur].current;
            frames[next].current = if frames[next].self_interaction { position } else { 0 };

            let fs = groups[cur];
            if AUDIT {
                sink.push_audit(fs.audit_at(position));
            }
            let idx = fs.indices[position] as u32;
            let value = fs.values[position];
            if cur == 0 {
                frames[next].hasher = FnvHasher::new().hash(idx);
                frames[next].x = value;
            } else {
                frames[next].hasher = frames[cur].hasher.hash(idx);
                frames[next].x = interaction_value(value, frames[cur].x);
            }
            cur = next;
        } else {
            let start = if permutations { 0 } else { frames[last].current };
            num_features += frames[last].len - start;
            let FeatureGenData { hasher, x, .. } = frames[last];
            inner_kernel::<AUDIT, S>(groups[last], start, x, hasher, params, sink);

            // carry into the previous frames
            let mut exhausted;
            loop {
                cur -= 1;
                frames[cur].current += 1;
                exhausted = frames[cur].current == frames[cur].len;
                if AUDIT {
                    sink.pop_audit();
                }
                if !exhausted || cur == 0 {
                    break;
                }
            }
            if cur == 0 && exhausted {
                break;
            }
        }
    }
    num_features
}

fn generate_interactions_impl<const AUDIT: bool, S: InteractionSink>(
    interactions: &[Interaction],
    permutations: bool,
    ec: &ExamplePredict,
    hash_bits: u32,
    sink: &mut S,
    cache: &mut InteractionCache,
) -> usize {
    let params = KernelParams {
        hash_bits,
        scale: ec.ft_index_scale,
        offset: ec.ft_index_offset,
    };

    let mut num_features = 0;
    'terms: for term in interactions {
        let mut groups: SmallVec<[&Features; 8]> = SmallVec::new();
        for ns in term {
            match ec.get(*ns) {
                Some(fs) if !fs.is_empty() => groups.push(fs),
                _ => continue 'terms,
            }
        }

        num_features += match groups.len() {
            0 => 0,
            1 => {
                inner_kernel::<AUDIT, S>(groups[0], 0, 1.0, FnvHasher::new(), params, sink);
                groups[0].len()
            }
            2 => {
                let same = !permutations && term[0] == term[1];
                process_quadratic::<AUDIT, S>(groups[0], groups[1], same, params, sink)
            }
            3 => {
                let same1 = !permutations && term[0] == term[1];
                let same2 = !permutations && term[1] == term[2];
                process_cubic::<AUDIT, S>(
                    [groups[0], groups[1], groups[2]],
                    same1,
                    same2,
                    params,
                    sink,
                )
            }
            _ => process_generic::<AUDIT, S>(term, &groups, permutations, params, sink, cache),
        };
    }
    num_features
}

/// Expand `interactions` over `ec` and feed every synthesized feature to
/// `sink`. Returns the number of synthesized features.
///
/// Terms with an absent or empty namespace contribute nothing. `hash_bits`
/// is the weight store's hash width.
pub fn generate_interactions<S: InteractionSink>(
    interactions: &[Interaction],
    permutations: bool,
    ec: &ExamplePredict,
    hash_bits: u32,
    sink: &mut S,
    cache: &mut InteractionCache,
) -> usize {
    generate_interactions_impl::<false, S>(interactions, permutations, ec, hash_bits, sink, cache)
}

/// Like [`generate_interactions`], also bracketing every nesting level with
/// [`InteractionSink::push_audit`] / [`InteractionSink::pop_audit`].
pub fn generate_interactions_audit<S: InteractionSink>(
    interactions: &[Interaction],
    permutations: bool,
    ec: &ExamplePredict,
    hash_bits: u32,
    sink: &mut S,
    cache: &mut InteractionCache,
) -> usize {
    generate_interactions_impl::<true, S>(interactions, permutations, ec, hash_bits, sink, cache)
}

/// Sink that records the audit name of every synthesized feature, e.g.
/// `a^x*b^y`, next to its value and weight index.
#[derive(Debug, Default)]
pub struct AuditCollector {
    stack: Vec<String>,
    pub features: Vec<(String, FeatureValue, u64)>,
}

impl AuditCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InteractionSink for AuditCollector {
    fn feature(&mut self, value: FeatureValue, weight_index: u64) {
        self.features.push((self.stack.join("*"), value, weight_index));
    }

    fn push_audit(&mut self, audit: &AuditStrings) {
        self.stack.push(audit.to_string());
    }

    fn pop_audit(&mut self) {
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(groups: &[(u8, &[(u64, f32)])]) -> ExamplePredict {
        let mut ec = ExamplePredict::new(0);
        for &(ns, feats) in groups {
            let fs = ec.feature_group(ns);
            for &(i, v) in feats {
                fs.add_feature_raw(i, v);
            }
        }
        ec
    }

    fn collect(
        interactions: &[Interaction],
        permutations: bool,
        ec: &ExamplePredict,
    ) -> (usize, Vec<(f32, u64)>) {
        let mut out = Vec::new();
        let mut cache = InteractionCache::new();
        let count = generate_interactions(
            interactions,
            permutations,
            ec,
            18,
            &mut |v: f32, i: u64| out.push((v, i)),
            &mut cache,
        );
        (count, out)
    }

    fn pair_index(a: u64, b: u64) -> u64 {
        FnvHasher::new().hash(a as u32).hash(b as u32).truncated_hash(18) as u64
    }

    #[test_log::test]
    fn distinct_pair_count_is_product() {
        let ec = example(&[(b'a', &[(1, 1.0), (2, 2.0), (3, 3.0)]), (b'b', &[(10, 0.5), (11, 4.0)])]);
        let (count, out) = collect(&[vec![b'a', b'b']], false, &ec);
        assert_eq!(count, 6);
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], (0.5, pair_index(1, 10)));
        assert_eq!(out[5], (12.0, pair_index(3, 11)));
    }

    #[test_log::test]
    fn self_pair_includes_diagonal() {
        let ec = example(&[(b'a', &[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)])]);
        let (count, out) = collect(&[vec![b'a', b'a']], false, &ec);
        assert_eq!(count, 4 * 5 / 2);
        assert_eq!(out[0], (1.0, pair_index(1, 1)));
        assert_eq!(out[1], (2.0, pair_index(1, 2)));

        let (count, _) = collect(&[vec![b'a', b'a']], true, &ec);
        assert_eq!(count, 16);
    }

    #[test_log::test]
    fn empty_namespace_skips_term() {
        let mut ec = example(&[(b'a', &[(1, 1.0)])]);
        ec.feature_group(b'b');
        let (count, out) = collect(&[vec![b'a', b'b'], vec![b'a', b'z']], false, &ec);
        assert_eq!(count, 0);
        assert!(out.is_empty());
    }

    #[test_log::test]
    fn scale_and_offset_shape_weight_index() {
        let mut ec = example(&[(b'a', &[(1, 1.0)]), (b'b', &[(2, 1.0)])]);
        ec.ft_index_scale = 4;
        ec.ft_index_offset = 3;
        let (_, out) = collect(&[vec![b'a', b'b']], false, &ec);
        assert_eq!(out[0].1, pair_index(1, 2) * 4 + 3);
    }

    #[test_log::test]
    fn cubic_counts() {
        let ec = example(&[
            (b'a', &[(1, 1.0), (2, 1.0)]),
            (b'b', &[(3, 1.0), (4, 1.0), (5, 1.0)]),
        ]);
        // a * a * b: pairs within a with diagonal (3) times |b|
        let (count, _) = collect(&[vec![b'a', b'a', b'b']], false, &ec);
        assert_eq!(count, 3 * 3);
        // a * b * b: |a| times self pairs of b (6)
        let (count, _) = collect(&[vec![b'a', b'b', b'b']], false, &ec);
        assert_eq!(count, 2 * 6);
        // a * a * a over 2 features: multisets of size 3 = 4
        let (count, out) = collect(&[vec![b'a', b'a', b'a']], false, &ec);
        assert_eq!(count, 4);
        assert_eq!(out.len(), 4);
        let (count, _) = collect(&[vec![b'a', b'b', b'a']], true, &ec);
        assert_eq!(count, 2 * 3 * 2);
    }

    #[test_log::test]
    fn generic_walk_matches_multiset_count() {
        let ec = example(&[
            (b'a', &[(1, 1.0), (2, 2.0), (3, 3.0)]),
            (b'b', &[(4, 0.5), (5, 1.5)]),
        ]);
        // aaaa over 3 features: C(6, 4) = 15
        let (count, out) = collect(&[vec![b'a'; 4]], false, &ec);
        assert_eq!(count, 15);
        assert_eq!(out.len(), 15);
        // permutations: 3^4
        let (count, _) = collect(&[vec![b'a'; 4]], true, &ec);
        assert_eq!(count, 81);
        // aabb: 6 * 3
        let (count, out) = collect(&[vec![b'a', b'a', b'b', b'b']], false, &ec);
        assert_eq!(count, 18);
        assert_eq!(out.len(), 18);
    }

    #[test_log::test]
    fn generic_walk_hashes_raw_indices_in_order() {
        let ec = example(&[
            (b'a', &[(1, 2.0)]),
            (b'b', &[(2, 3.0)]),
            (b'c', &[(3, 5.0)]),
            (b'd', &[(4, 7.0)]),
        ]);
        let (count, out) = collect(&[b"abcd".to_vec()], false, &ec);
        assert_eq!(count, 1);
        let expected = FnvHasher::new().hash(1).hash(2).hash(3).hash(4).truncated_hash(18) as u64;
        assert_eq!(out, vec![(210.0, expected)]);
    }

    #[test_log::test]
    fn generic_and_cubic_agree_with_reused_cache() {
        let ec = example(&[
            (b'a', &[(1, 1.0), (2, 2.0)]),
            (b'b', &[(3, 3.0), (4, 4.0), (5, 5.0)]),
        ]);
        let mut cache = InteractionCache::new();
        for _ in 0..2 {
            let mut total = 0.0f32;
            let count = generate_interactions(
                &[b"aabb".to_vec(), b"abab".to_vec()],
                false,
                &ec,
                18,
                &mut |v: f32, _i: u64| total += v,
                &mut cache,
            );
            // aabb: 3 * 6 ; abab (no adjacent repeats): 2*3*2*3
            assert_eq!(count, 18 + 36);
            assert!(total > 0.0);
        }
    }

    #[test_log::test]
    fn audit_names_compose_per_level() {
        let mut ec = ExamplePredict::new(0);
        {
            let a = ec.feature_group(b'a');
            a.namespace_name = "a".to_string();
            a.add_feature_raw(1, 1.0);
            a.add_audit_string("x");
        }
        {
            let b = ec.feature_group(b'b');
            b.namespace_name = "b".to_string();
            b.add_feature_raw(2, 2.0);
            b.add_audit_string("y");
            b.add_feature_raw(3, 3.0);
            b.add_audit_string("z");
        }
        let mut collector = AuditCollector::new();
        let mut cache = InteractionCache::new();
        let count = generate_interactions_audit(
            &[vec![b'a', b'b'], vec![b'a', b'b', b'b', b'b']],
            false,
            &ec,
            18,
            &mut collector,
            &mut cache,
        );
        assert_eq!(count, 2 + 4);
        let names: Vec<&str> = collector.features.iter().map(|f| f.0.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "a^x*b^y",
                "a^x*b^z",
                "a^x*b^y*b^y*b^y",
                "a^x*b^y*b^y*b^z",
                "a^x*b^y*b^z*b^z",
                "a^x*b^z*b^z*b^z",
            ]
        );
        assert!(collector.stack.is_empty());
    }
}
