//! k-skip n-gram features.
//!
//! For a namespace with features `f0 f1 f2 ...` in order, an n-gram with
//! skips appends one feature per window, indexed as
//! `((f_i * Q + f_{i+m1}) * Q + f_{i+m2}) ...` (Q = `QUADRATIC_CONSTANT`,
//! wrapping) with value 1. The offsets `m` grow by one plus the skips used.
//!
//! Definitions are strings: `"3"` applies to every namespace, `"a3"` to
//! namespace `a` only. Skip definitions use the same syntax.

use ahash::AHashMap;

use crate::constants::{NamespaceIndex, QUADRATIC_CONSTANT};
use crate::error::{FeatureError, Result};
use crate::example::ExamplePredict;
use crate::feature_group::Features;

#[derive(Debug, Clone, Default)]
pub struct KSkipNgramTransformer {
    ngram_definition: AHashMap<NamespaceIndex, u32>,
    ngram_default: u32,
    skip_definition: AHashMap<NamespaceIndex, u32>,
    skip_default: u32,
    gram_mask: Vec<usize>,
}

/// Record one definition: a bare number sets `defaults`, `<ns><number>` a
/// per-namespace entry.
fn compile_gram(
    gram: &str,
    defaults: &mut u32,
    definitions: &mut AHashMap<NamespaceIndex, u32>,
    kind: &str,
) -> Result<()> {
    let Some(&first) = gram.as_bytes().first() else {
        return Err(FeatureError::InvalidConfig(format!("empty {kind} definition")));
    };
    let parse = |digits: &str| {
        digits.parse::<u32>().map_err(|_| {
            FeatureError::InvalidConfig(format!("cannot parse {kind} definition '{gram}'"))
        })
    };

    if first.is_ascii_digit() {
        let n = parse(gram)?;
        *defaults = n;
        log::info!("Generating {}-{} for all namespaces.", n, kind);
    } else {
        if gram.len() == 1 {
            return Err(FeatureError::InvalidConfig(format!(
                "the {kind} definition '{gram}' must be a namespace followed by a number"
            )));
        }
        let n = parse(gram.get(1..).unwrap_or_default())?;
        definitions.insert(first, n);
        log::info!("Generating {}-{} for {} namespaces.", n, kind, first as char);
    }
    Ok(())
}

impl KSkipNgramTransformer {
    /// `grams` and `skips` are definition strings such as `"2"` or `"a3"`.
    pub fn build<S: AsRef<str>>(grams: &[S], skips: &[S]) -> Result<Self> {
        let mut transformer = KSkipNgramTransformer::default();
        for gram in grams {
            compile_gram(
                gram.as_ref(),
                &mut transformer.ngram_default,
                &mut transformer.ngram_definition,
                "grams",
            )?;
        }
        for skip in skips {
            compile_gram(
                skip.as_ref(),
                &mut transformer.skip_default,
                &mut transformer.skip_definition,
                "skips",
            )?;
        }
        Ok(transformer)
    }

    pub fn ngram_for(&self, ns: NamespaceIndex) -> u32 {
        self.ngram_definition.get(&ns).copied().unwrap_or(self.ngram_default)
    }

    pub fn skip_for(&self, ns: NamespaceIndex) -> u32 {
        self.skip_definition.get(&ns).copied().unwrap_or(self.skip_default)
    }

    /// Append the n-gram features of every namespace of `ec`.
    pub fn generate_grams(&mut self, ec: &mut ExamplePredict) {
        let mut gram_mask = std::mem::take(&mut self.gram_mask);
        for ns in ec.namespaces() {
            let ngram = self.ngram_for(ns);
            if ngram < 2 {
                continue;
            }
            let skips = self.skip_for(ns);
            let fs = ec.feature_group(ns);
            let length = fs.len();
            for n in 1..ngram {
                gram_mask.clear();
                gram_mask.push(0);
                add_grams(n, skips, fs, length, &mut gram_mask, 0);
            }
        }
        self.gram_mask = gram_mask;
    }
}

fn add_grams(
    ngram: u32,
    skip_gram: u32,
    fs: &mut Features,
    initial_length: usize,
    gram_mask: &mut Vec<usize>,
    skips: usize,
) {
    let last_mask = gram_mask.last().copied().unwrap_or(0);
    if ngram == 0 && last_mask < initial_length {
        let windows = initial_length - last_mask;
        for i in 0..windows {
            let mut new_index = fs.indices[i];
            for &offset in &gram_mask[1..] {
                new_index = new_index
                    .wrapping_mul(QUADRATIC_CONSTANT)
                    .wrapping_add(fs.indices[i + offset]);
            }
            fs.add_feature_raw(new_index, 1.0);

            if fs.has_audit() {
                let mut name = fs.audit_info[i].feature_name.clone();
                for &offset in &gram_mask[1..] {
                    name.push('^');
                    name.push_str(&fs.audit_info[i + offset].feature_name);
                }
                fs.add_audit_string(&name);
            }
        }
    }
    if ngram > 0 {
        gram_mask.push(last_mask + 1 + skips);
        add_grams(ngram - 1, skip_gram, fs, initial_length, gram_mask, 0);
        gram_mask.pop();
    }
    if skip_gram > 0 && ngram > 0 {
        add_grams(ngram, skip_gram - 1, fs, initial_length, gram_mask, skips + 1);
    }
}
