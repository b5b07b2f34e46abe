//! The feature space of one example.
//!
//! `ExamplePredict` maps namespace ids to [`Features`] and carries the
//! `scale`/`offset` pair that turns a feature index into a weight index, the
//! active interaction list, and a cached order-independent fingerprint of the
//! feature space. Any mutable access to the feature space drops the cached
//! fingerprint.
//!
//! Usage:
//!   let mut ec = ExamplePredict::new(0);
//!   ec.feature_group_by_name("user").add_feature("age_25", 1.0, false);
//!   {
//!       let mut stashed = ec.stash_features();
//!       stashed.delete_all_namespaces();   // restored when `stashed` drops
//!   }

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::{
    reserved_namespace_name, NamespaceIndex, CONSTANT_NAMESPACE, DEFAULT_NAMESPACE,
    DEFAULT_NAMESPACE_STR,
};
use crate::feature_group::Features;
use crate::hash::{hash_namespace, namespace_string_to_index};
use crate::stash::StashGuard;

/// One interaction term: a sequence of namespace ids.
pub type Interaction = Vec<NamespaceIndex>;

/// Namespace id → feature group. Ordered, so every traversal of an example
/// visits namespaces (and accumulates floats) in the same order.
pub type FeatureGroups = BTreeMap<NamespaceIndex, Features>;

pub type FeaturesStash<'a> = StashGuard<'a, ExamplePredict, FeatureGroups>;
pub type InteractionsStash<'a> = StashGuard<'a, ExamplePredict, Arc<Vec<Interaction>>>;
pub type ScaleOffsetStash<'a> = StashGuard<'a, ExamplePredict, (u64, u64)>;

#[derive(Debug, Clone)]
pub struct ExamplePredict {
    pub ft_index_scale: u64,
    pub ft_index_offset: u64,
    /// Compiled interaction terms shared between examples of a stream.
    pub interactions: Arc<Vec<Interaction>>,
    pub debug_current_reduction_depth: usize,
    hash_seed: u64,
    feature_space: FeatureGroups,
    feature_space_hash: Option<u64>,
}

impl Default for ExamplePredict {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ExamplePredict {
    pub fn new(hash_seed: u64) -> Self {
        ExamplePredict {
            ft_index_scale: 1,
            ft_index_offset: 0,
            interactions: Arc::new(Vec::new()),
            debug_current_reduction_depth: 0,
            hash_seed,
            feature_space: FeatureGroups::default(),
            feature_space_hash: None,
        }
    }

    pub fn with_interactions(hash_seed: u64, interactions: Arc<Vec<Interaction>>) -> Self {
        ExamplePredict {
            interactions,
            ..Self::new(hash_seed)
        }
    }

    #[inline]
    pub fn hash_seed(&self) -> u64 {
        self.hash_seed
    }

    // ------------------------------------------------------------------------
    // Namespace access
    // ------------------------------------------------------------------------

    /// Non-creating lookup.
    #[inline]
    pub fn get(&self, ns: NamespaceIndex) -> Option<&Features> {
        self.feature_space.get(&ns)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Features> {
        self.get(self.namespace_string_to_index(name))
    }

    /// Group of namespace `ns`, created on first access.
    pub fn feature_group(&mut self, ns: NamespaceIndex) -> &mut Features {
        self.feature_space_hash = None;
        let seed = self.hash_seed;
        self.feature_space.entry(ns).or_insert_with(|| {
            let namespace_hash = if ns == DEFAULT_NAMESPACE {
                hash_namespace(DEFAULT_NAMESPACE_STR, 0)
            } else {
                ns as u64
            };
            let name = reserved_namespace_name(ns).unwrap_or_default();
            Features::with_namespace(name, namespace_hash)
        })
    }

    /// Group of the namespace called `name`, created on first access. A new
    /// group is named `name` and salted with the hash of `name`.
    pub fn feature_group_by_name(&mut self, name: &str) -> &mut Features {
        self.feature_space_hash = None;
        let seed = self.hash_seed;
        let ns = namespace_string_to_index(name, seed);
        self.feature_space.entry(ns).or_insert_with(|| {
            let namespace_name = reserved_namespace_name(ns)
                .filter(|reserved| !reserved.is_empty())
                .unwrap_or(name);
            Features::with_namespace(namespace_name, hash_namespace(name, seed))
        })
    }

    /// Replace a namespace's group wholesale.
    pub fn set_features(&mut self, ns: NamespaceIndex, fs: Features) {
        self.feature_space_hash = None;
        self.feature_space.insert(ns, fs);
    }

    /// Namespace ids present, ascending.
    pub fn namespaces(&self) -> Vec<NamespaceIndex> {
        self.feature_space.keys().copied().collect()
    }

    #[inline]
    pub fn contains(&self, ns: NamespaceIndex) -> bool {
        self.feature_space.contains_key(&ns)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.contains(self.namespace_string_to_index(name))
    }

    /// True if the namespace is absent or has no features.
    pub fn is_empty_namespace(&self, ns: NamespaceIndex) -> bool {
        self.get(ns).map_or(true, Features::is_empty)
    }

    /// Number of namespaces present.
    #[inline]
    pub fn len(&self) -> usize {
        self.feature_space.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.feature_space.is_empty()
    }

    pub fn delete_namespace(&mut self, ns: NamespaceIndex) -> Option<Features> {
        self.feature_space_hash = None;
        self.feature_space.remove(&ns)
    }

    pub fn delete_namespace_by_name(&mut self, name: &str) -> Option<Features> {
        let ns = self.namespace_string_to_index(name);
        self.delete_namespace(ns)
    }

    pub fn delete_all_namespaces(&mut self) {
        self.feature_space_hash = None;
        self.feature_space.clear();
    }

    #[inline]
    pub fn feature_space(&self) -> &FeatureGroups {
        &self.feature_space
    }

    pub fn iter(&self) -> impl Iterator<Item = (NamespaceIndex, &Features)> {
        self.feature_space.iter().map(|(&ns, fs)| (ns, fs))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NamespaceIndex, &mut Features)> {
        self.feature_space_hash = None;
        self.feature_space.iter_mut().map(|(&ns, fs)| (ns, fs))
    }

    /// Total number of features over all namespaces.
    pub fn num_features(&self) -> usize {
        self.feature_space.values().map(Features::len).sum()
    }

    // ------------------------------------------------------------------------
    // Name helpers
    // ------------------------------------------------------------------------

    #[inline]
    pub fn hash_namespace(&self, name: &str) -> u64 {
        hash_namespace(name, self.hash_seed)
    }

    #[inline]
    pub fn namespace_string_to_index(&self, name: &str) -> NamespaceIndex {
        namespace_string_to_index(name, self.hash_seed)
    }

    /// Name of a present namespace; empty when absent or unnamed.
    pub fn get_string_name(&self, ns: NamespaceIndex) -> &str {
        self.get(ns).map_or("", |fs| fs.namespace_name.as_str())
    }

    /// Namespace whose group carries `namespace_hash`, if any.
    pub fn invert_hash_namespace(&self, namespace_hash: u64) -> Option<NamespaceIndex> {
        self.feature_space
            .iter()
            .find(|(_, fs)| fs.namespace_hash == namespace_hash)
            .map(|(&ns, _)| ns)
    }

    // ------------------------------------------------------------------------
    // Fingerprint
    // ------------------------------------------------------------------------

    /// Sum of namespace ids, feature indices and value bits over the whole
    /// feature space. Addition makes it independent of iteration order.
    pub fn get_or_calculate_order_independent_feature_space_hash(&mut self) -> u64 {
        if let Some(hash) = self.feature_space_hash {
            return hash;
        }
        let mut hash = 0u64;
        for (&ns, fs) in &self.feature_space {
            hash = hash.wrapping_add(ns as u64);
            for (value, index) in fs.iter() {
                // +0.0 and -0.0 hash alike
                let value_bits = if value == 0.0 { 0 } else { value.to_bits() as u64 };
                hash = hash.wrapping_add(index).wrapping_add(value_bits);
            }
        }
        self.feature_space_hash = Some(hash);
        hash
    }

    pub fn clear_feature_space_hash(&mut self) {
        self.feature_space_hash = None;
    }

    // ------------------------------------------------------------------------
    // Stash guards
    // ------------------------------------------------------------------------

    /// Snapshot every feature group; restored when the guard drops.
    pub fn stash_features(&mut self) -> FeaturesStash<'_> {
        let snapshot = self.feature_space.clone();
        StashGuard::new(self, snapshot, |ec, saved| {
            ec.feature_space = saved;
            ec.feature_space_hash = None;
        })
    }

    /// Snapshot the interaction list; restored when the guard drops.
    pub fn stash_interactions(&mut self) -> InteractionsStash<'_> {
        let snapshot = Arc::clone(&self.interactions);
        StashGuard::new(self, snapshot, |ec, saved| ec.interactions = saved)
    }

    /// Snapshot `(ft_index_scale, ft_index_offset)`; restored when the guard drops.
    pub fn stash_scale_offset(&mut self) -> ScaleOffsetStash<'_> {
        let snapshot = (self.ft_index_scale, self.ft_index_offset);
        StashGuard::new(self, snapshot, |ec, (scale, offset)| {
            ec.ft_index_scale = scale;
            ec.ft_index_offset = offset;
        })
    }

    // ------------------------------------------------------------------------
    // Namespace transplanting
    // ------------------------------------------------------------------------

    /// Append `fs` to namespace `ns`, creating it when absent.
    pub fn append_example_namespace(&mut self, ns: NamespaceIndex, fs: &Features) {
        self.feature_group(ns).concat(fs);
    }

    /// Remove the trailing `fs.len()` features of namespace `ns`, undoing an
    /// earlier [`ExamplePredict::append_example_namespace`]. An emptied
    /// namespace is deleted.
    pub fn truncate_example_namespace(&mut self, ns: NamespaceIndex, fs: &Features) {
        let Some(target) = self.feature_space.get_mut(&ns) else {
            return;
        };
        self.feature_space_hash = None;
        let new_len = target.len().saturating_sub(fs.len());
        target.truncate_to_with_removed(new_len, fs.sum_feat_sq());
        if target.is_empty() {
            self.feature_space.remove(&ns);
        }
    }

    /// Append every namespace of `source` except the constant namespace.
    pub fn append_example_namespaces_from_example(&mut self, source: &ExamplePredict) {
        for (ns, fs) in source.iter() {
            if ns != CONSTANT_NAMESPACE {
                self.append_example_namespace(ns, fs);
            }
        }
    }

    /// Undo [`ExamplePredict::append_example_namespaces_from_example`].
    pub fn truncate_example_namespaces_from_example(&mut self, source: &ExamplePredict) {
        for (ns, fs) in source.iter() {
            if ns != CONSTANT_NAMESPACE {
                self.truncate_example_namespace(ns, fs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExamplePredict {
        let mut ec = ExamplePredict::new(0);
        ec.feature_group(b'a').add_feature_raw(1, 1.0);
        ec.feature_group(b'a').add_feature_raw(2, 2.0);
        ec.feature_group(b'b').add_feature_raw(7, 0.5);
        ec
    }

    #[test_log::test]
    fn groups_are_created_on_first_access() {
        let mut ec = ExamplePredict::new(3);
        assert!(!ec.contains(DEFAULT_NAMESPACE));
        let fs = ec.feature_group(DEFAULT_NAMESPACE);
        // unsalted by the example seed
        assert_eq!(fs.namespace_hash, hash_namespace(" ", 0));
        assert_ne!(fs.namespace_hash, hash_namespace(" ", 3));
        assert_eq!(fs.namespace_name, " ");
        assert_eq!(ec.feature_group(b'x').namespace_hash, b'x' as u64);
        assert_eq!(ec.namespaces(), vec![DEFAULT_NAMESPACE, b'x']);
        assert!(ec.is_empty_namespace(b'x'));
    }

    #[test_log::test]
    fn by_name_access_uses_seeded_hash() {
        let mut ec = ExamplePredict::new(11);
        ec.feature_group_by_name("user").add_feature("age", 1.0, false);
        let ns = namespace_string_to_index("user", 11);
        let fs = ec.get(ns).unwrap();
        assert_eq!(fs.namespace_name, "user");
        assert_eq!(fs.namespace_hash, hash_namespace("user", 11));
        assert_eq!(ec.get_string_name(ns), "user");
        assert_eq!(ec.invert_hash_namespace(hash_namespace("user", 11)), Some(ns));
        assert!(ec.contains_name("user"));
        assert!(ec.delete_namespace_by_name("user").is_some());
        assert!(ec.is_empty());
    }

    #[test_log::test]
    fn fingerprint_ignores_order_and_tracks_mutation() {
        let mut forward = ExamplePredict::new(0);
        forward.feature_group(b'a').add_feature_raw(1, 1.0);
        forward.feature_group(b'b').add_feature_raw(2, 3.0);

        let mut backward = ExamplePredict::new(0);
        backward.feature_group(b'b').add_feature_raw(2, 3.0);
        backward.feature_group(b'a').add_feature_raw(1, 1.0);

        let h = forward.get_or_calculate_order_independent_feature_space_hash();
        assert_eq!(h, backward.get_or_calculate_order_independent_feature_space_hash());

        forward.feature_group(b'a').add_feature_raw(5, 1.0);
        assert_ne!(h, forward.get_or_calculate_order_independent_feature_space_hash());
    }

    #[test_log::test]
    fn nested_stashes_restore_in_reverse_order() {
        let mut ec = sample();
        ec.ft_index_scale = 4;
        let before = ec.feature_space().clone();
        {
            let mut features = ec.stash_features();
            features.delete_namespace(b'a');
            let mut scale = features.stash_scale_offset();
            scale.ft_index_scale = 1;
            scale.ft_index_offset = 9;
            scale.feature_group(b'z').add_feature_raw(3, 3.0);
        }
        assert_eq!(ec.ft_index_scale, 4);
        assert_eq!(ec.ft_index_offset, 0);
        assert_eq!(ec.feature_space(), &before);
    }

    #[test_log::test]
    fn stash_interactions_restores_list() {
        let mut ec = ExamplePredict::new(0);
        ec.interactions = Arc::new(vec![vec![b'a', b'b']]);
        {
            let mut guard = ec.stash_interactions();
            guard.interactions = Arc::new(Vec::new());
            assert!(guard.interactions.is_empty());
        }
        assert_eq!(*ec.interactions, vec![vec![b'a', b'b']]);
    }

    #[test_log::test]
    fn append_then_truncate_round_trips() {
        let mut ec = sample();
        let mut other = ExamplePredict::new(0);
        other.feature_group(b'a').add_feature_raw(9, 3.0);
        other.feature_group(b'c').add_feature_raw(4, 1.0);
        other.feature_group(CONSTANT_NAMESPACE).add_feature_raw(0, 1.0);

        ec.append_example_namespaces_from_example(&other);
        assert_eq!(ec.get(b'a').unwrap().len(), 3);
        assert!(ec.contains(b'c'));
        assert!(!ec.contains(CONSTANT_NAMESPACE));

        ec.truncate_example_namespaces_from_example(&other);
        assert_eq!(ec.get(b'a').unwrap().indices(), &[1, 2]);
        assert_eq!(ec.get(b'a').unwrap().sum_feat_sq(), 5.0);
        assert!(!ec.contains(b'c'));
    }
}
