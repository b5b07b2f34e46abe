//! Interaction-term compiler.
//!
//! Interaction terms are namespace-id sequences that may contain the wildcard
//! id `:`. Compiling replaces every wildcard with each known interacting
//! namespace, then sorts the list (shorter first, then lexicographic),
//! optionally drops duplicate terms and groups repeated namespaces inside a
//! term so the expansion kernel can detect self-interactions.
//!
//! [`InteractionsGenerator`] keeps the set of namespaces seen on one example
//! stream and recompiles only when that set grows.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::constants::{
    NamespaceIndex, CCB_SLOT_NAMESPACE, DEFAULT_NAMESPACE, SPECIAL_NAMESPACES, WILDCARD_NAMESPACE,
};
use crate::example::{FeatureGroups, Interaction};

/// Above this many `n + k` items the factorials behind the reservation
/// estimate no longer fit in a `u64`.
const MAX_RESERVATION_ITEMS: usize = 21;

/// How wildcards are substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerateMode {
    /// Unordered selections with repetition (`ab` and `ba` are the same term).
    #[default]
    Combinations,
    /// Ordered selections with repetition.
    Permutations,
}

impl GenerateMode {
    pub fn from_permutations(permutations: bool) -> Self {
        if permutations {
            GenerateMode::Permutations
        } else {
            GenerateMode::Combinations
        }
    }
}

/// Namespaces that take part in wildcard expansion: every non-reserved id,
/// plus the default namespace and the CCB slot namespace.
#[inline]
pub fn is_interaction_ns(ns: NamespaceIndex) -> bool {
    if ns == DEFAULT_NAMESPACE || ns == CCB_SLOT_NAMESPACE {
        return true;
    }
    !SPECIAL_NAMESPACES.contains(&ns)
}

#[inline]
pub fn contains_wildcard(term: &[NamespaceIndex]) -> bool {
    term.contains(&WILDCARD_NAMESPACE)
}

/// Whether a sorted term mixes a repeated namespace with other ids.
///
/// Called on the sorted form of a term: `aab` and `abb` are true, so `aba`
/// and `baa` get rewritten to `aab`. One repeated namespace (`aaa`) and
/// terms without repeats (`abc`) are false and keep their written order.
pub fn must_be_left_sorted<T: PartialEq>(term: &[T]) -> bool {
    if term.len() <= 1 {
        return true;
    }
    let mut diff_found = false;
    let mut pair_found = false;
    for w in term.windows(2) {
        if w[0] == w[1] {
            if diff_found {
                return true;
            }
            pair_found = true;
        } else {
            if pair_found {
                return true;
            }
            diff_found = true;
        }
    }
    false
}

/// Sort-and-group pass over a compiled list.
///
/// With `filter_duplicates`, terms that are equal as multisets are removed,
/// keeping the first occurrence. Terms whose sorted form
/// [`must_be_left_sorted`] are replaced with that form, which puts repeats
/// side by side for the kernel. Relative term order is preserved.
/// Returns `(removed, sorted)` counts.
pub fn sort_and_filter_duplicate_interactions<T: Ord + Clone>(
    terms: &mut Vec<Vec<T>>,
    filter_duplicates: bool,
) -> (usize, usize) {
    // (sorted copy, original position)
    let mut vec_sorted: Vec<(Vec<T>, usize)> = terms
        .iter()
        .enumerate()
        .map(|(pos, term)| {
            let mut sorted = term.clone();
            sorted.sort();
            (sorted, pos)
        })
        .collect();

    let mut removed_cnt = 0;
    if filter_duplicates {
        // stable: equal terms keep their original order, so the first survives
        vec_sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let before = vec_sorted.len();
        vec_sorted.dedup_by(|later, earlier| later.0 == earlier.0);
        removed_cnt = before - vec_sorted.len();
        vec_sorted.sort_by_key(|(_, pos)| *pos);
    }

    let mut sorted_cnt = 0;
    let mut res = Vec::with_capacity(vec_sorted.len());
    for (sorted, pos) in vec_sorted {
        let original = &mut terms[pos];
        if must_be_left_sorted(&sorted) {
            if *original != sorted {
                sorted_cnt += 1;
            }
            res.push(sorted);
        } else {
            res.push(std::mem::take(original));
        }
    }
    *terms = res;
    (removed_cnt, sorted_cnt)
}

// ============================================================================
// Combinatorics
// ============================================================================

fn factorial(n: usize) -> Option<u64> {
    (1..=n as u64).try_fold(1u64, |acc, x| acc.checked_mul(x))
}

/// `C(n + k - 1, k)`, or `None` when the factorials overflow.
pub fn number_of_combinations_with_repetition(n: usize, k: usize) -> Option<u64> {
    if n == 0 {
        return Some(u64::from(k == 0));
    }
    let top = factorial(n + k - 1)?;
    let bottom = factorial(k)?.checked_mul(factorial(n - 1)?)?;
    Some(top / bottom)
}

/// `n^k`, or `None` on overflow.
pub fn number_of_permutations_with_repetition(n: usize, k: usize) -> Option<u64> {
    let k = u32::try_from(k).ok()?;
    (n as u64).checked_pow(k)
}

fn reservation(count: Option<u64>, n: usize, k: usize) -> usize {
    if n + k > MAX_RESERVATION_ITEMS {
        return 0;
    }
    count.and_then(|c| usize::try_from(c).ok()).unwrap_or(0)
}

/// Every multiset of size `k` drawn from `namespaces`.
///
/// Each selection is produced as a non-increasing run of positions in
/// `namespaces`; the compiler's grouping pass puts repeated ids together.
pub fn generate_namespace_combinations_with_repetition<T: Copy>(
    namespaces: &[T],
    k: usize,
) -> Vec<Vec<T>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    let n = namespaces.len();
    if n == 0 {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(reservation(
        number_of_combinations_with_repetition(n, k),
        n,
        k,
    ));
    let last_index = n - 1;
    // indices[k] is an overflow sentinel
    let mut indices = vec![0usize; k + 1];
    loop {
        for i in 0..k {
            if indices[i] > last_index {
                indices[i + 1] += 1;
                let carried = indices[i + 1];
                for slot in indices.iter_mut().take(i + 1) {
                    *slot = carried;
                }
            }
        }
        if indices[k] > 0 {
            break;
        }
        result.push(indices[..k].iter().map(|&i| namespaces[i]).collect());
        indices[0] += 1;
    }
    result
}

/// Every sequence of length `k` over `namespaces`, in lexicographic position order.
pub fn generate_namespace_permutations_with_repetition<T: Copy>(
    namespaces: &[T],
    k: usize,
) -> Vec<Vec<T>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    let n = namespaces.len();
    if n == 0 {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(reservation(
        number_of_permutations_with_repetition(n, k),
        n,
        k,
    ));
    // one-based odometer; the last digit starts one below its first value
    let mut chosen = vec![1usize; k];
    chosen[k - 1] = 0;
    let mut next_index = k;
    loop {
        if chosen[next_index - 1] == n {
            next_index -= 1;
            if next_index == 0 {
                break;
            }
        } else {
            chosen[next_index - 1] += 1;
            while next_index < k {
                next_index += 1;
                chosen[next_index - 1] = 1;
            }
            result.push(chosen.iter().map(|&i| namespaces[i - 1]).collect());
        }
    }
    result
}

/// All pairs over `namespaces` including self pairs. Without
/// `leave_duplicate_interactions` only `a <= b` ordered pairs are kept.
pub fn expand_quadratics_wildcard_interactions(
    leave_duplicate_interactions: bool,
    namespaces: &BTreeSet<NamespaceIndex>,
) -> Vec<Interaction> {
    let mut out: BTreeSet<Interaction> = BTreeSet::new();
    let ordered: Vec<NamespaceIndex> = namespaces.iter().copied().collect();
    for (i, &a) in ordered.iter().enumerate() {
        for &b in &ordered[i..] {
            out.insert(vec![a, b]);
            out.insert(vec![b, b]);
            if leave_duplicate_interactions {
                out.insert(vec![b, a]);
            }
        }
    }
    out.into_iter().collect()
}

/// Shorter terms first, then lexicographic.
pub fn sort_interactions_comparator<T: Ord>(a: &[T], b: &[T]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

// ============================================================================
// Compilation
// ============================================================================

/// Substitute the wildcards of one term.
///
/// Two wildcards always take the quadratic expansion, whatever the mode;
/// fixed namespaces go back to their positions afterwards.
pub fn compile_interaction(
    term: &[NamespaceIndex],
    namespaces: &BTreeSet<NamespaceIndex>,
    mode: GenerateMode,
    leave_duplicate_interactions: bool,
) -> Vec<Interaction> {
    let mut fixed: Vec<(usize, NamespaceIndex)> = Vec::new();
    let mut num_wildcards = 0usize;
    for (pos, &ns) in term.iter().enumerate() {
        if ns == WILDCARD_NAMESPACE {
            num_wildcards += 1;
        } else {
            fixed.push((pos, ns));
        }
    }

    let ordered: Vec<NamespaceIndex> = namespaces.iter().copied().collect();
    let mut result = match mode {
        _ if num_wildcards == 2 => {
            expand_quadratics_wildcard_interactions(leave_duplicate_interactions, namespaces)
        }
        GenerateMode::Combinations => {
            generate_namespace_combinations_with_repetition(&ordered, num_wildcards)
        }
        GenerateMode::Permutations => {
            generate_namespace_permutations_with_repetition(&ordered, num_wildcards)
        }
    };
    for generated in &mut result {
        for &(pos, ns) in &fixed {
            generated.insert(pos, ns);
        }
    }
    result
}

/// Compile a whole interaction list against the known namespaces.
pub fn compile_interactions(
    terms: &[Interaction],
    namespaces: &BTreeSet<NamespaceIndex>,
    mode: GenerateMode,
    leave_duplicate_interactions: bool,
) -> Vec<Interaction> {
    let mut out: Vec<Interaction> = Vec::new();
    for term in terms {
        if !contains_wildcard(term) {
            out.push(term.clone());
            continue;
        }
        out.extend(compile_interaction(
            term,
            namespaces,
            mode,
            leave_duplicate_interactions,
        ));
    }
    out.sort_by(|a, b| sort_interactions_comparator(a, b));

    let (removed, sorted) =
        sort_and_filter_duplicate_interactions(&mut out, !leave_duplicate_interactions);
    if removed > 0 {
        log::warn!(
            "Duplicate namespace interactions were found. Removed: {}. You can use \
             leave_duplicate_interactions to disable this behaviour.",
            removed
        );
    }
    if sorted > 0 {
        log::debug!("Sorted {} interactions so repeated namespaces are adjacent", sorted);
    }
    out
}

/// Per-stream compilation context.
///
/// Usage:
///   let mut gen = InteractionsGenerator::new(GenerateMode::Combinations, false);
///   for ec in examples {
///       gen.update_interactions_if_new_namespace_seen(&templates, ec.feature_space());
///       kernel(&gen.generated_interactions, ...);
///   }
#[derive(Debug, Clone, Default)]
pub struct InteractionsGenerator {
    pub generated_interactions: Vec<Interaction>,
    pub mode: GenerateMode,
    pub leave_duplicate_interactions: bool,
    all_seen_namespaces: BTreeSet<NamespaceIndex>,
}

impl InteractionsGenerator {
    pub fn new(mode: GenerateMode, leave_duplicate_interactions: bool) -> Self {
        InteractionsGenerator {
            mode,
            leave_duplicate_interactions,
            ..Default::default()
        }
    }

    pub fn all_seen_namespaces(&self) -> &BTreeSet<NamespaceIndex> {
        &self.all_seen_namespaces
    }

    /// Record the interacting namespaces of `feature_space` and recompile
    /// `terms` if any of them is new. Returns true if recompiled.
    pub fn update_interactions_if_new_namespace_seen(
        &mut self,
        terms: &[Interaction],
        feature_space: &FeatureGroups,
    ) -> bool {
        let previous = self.all_seen_namespaces.len();
        self.all_seen_namespaces.extend(
            feature_space
                .keys()
                .copied()
                .filter(|&ns| is_interaction_ns(ns)),
        );
        if self.all_seen_namespaces.len() == previous {
            return false;
        }

        self.generated_interactions = compile_interactions(
            terms,
            &self.all_seen_namespaces,
            self.mode,
            self.leave_duplicate_interactions,
        );
        log::debug!(
            "Recompiled {} interaction specs over {} namespaces into {} terms",
            terms.len(),
            self.all_seen_namespaces.len(),
            self.generated_interactions.len()
        );
        true
    }
}

// ============================================================================
// Generated-feature statistics
// ============================================================================

/// Sum of squared values of every feature the kernel would synthesize for
/// `interactions`, computed without enumerating them.
///
/// Terms are expected in compiled form: repeated namespaces adjacent.
pub fn eval_sum_ft_squared_of_generated_ft(
    permutations: bool,
    interactions: &[Interaction],
    feature_space: &FeatureGroups,
) -> f32 {
    let mut sum_ft_sq = 0.0f32;
    let mut results: Vec<f32> = Vec::new();

    for term in interactions {
        let mut sum_ft_sq_gen = 1.0f32;
        if permutations {
            for ns in term {
                sum_ft_sq_gen *= feature_space.get(ns).map_or(0.0, |fs| fs.sum_feat_sq());
            }
        } else {
            let mut i = 0;
            while i < term.len() {
                let ns = term[i];
                let mut run = 1;
                while i + run < term.len() && term[i + run] == ns {
                    run += 1;
                }
                i += run;

                let Some(fs) = feature_space.get(&ns) else {
                    sum_ft_sq_gen = 0.0;
                    break;
                };
                if run == 1 {
                    sum_ft_sq_gen *= fs.sum_feat_sq();
                    continue;
                }

                // complete homogeneous sum of degree `run` over squared values
                results.clear();
                results.resize(run, 0.0);
                for &value in fs.values() {
                    let x = value * value;
                    results[0] += x;
                    for j in 1..run {
                        results[j] += results[j - 1] * x;
                    }
                }
                sum_ft_sq_gen *= results[run - 1];
            }
        }
        sum_ft_sq += sum_ft_sq_gen;
    }
    sum_ft_sq
}
