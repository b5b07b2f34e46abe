//! Duplicate removal over sorted feature groups.

use crate::example::ExamplePredict;
use crate::feature_group::Features;

/// Keep the first feature of every run of equal indices.
///
/// `fs` must already be sorted. Unlike collision cleanup, duplicates are
/// dropped, not summed. With `max_unique = Some(n)` at most `n` distinct
/// features are kept: `Some(0)` empties the group, `Some(1)` keeps the first
/// entry only. `None` keeps every distinct index.
pub fn unique_features(fs: &mut Features, max_unique: Option<usize>) {
    if fs.is_empty() {
        return;
    }
    match max_unique {
        Some(0) => {
            fs.clear();
            return;
        }
        Some(1) => {
            fs.truncate_to(1);
            return;
        }
        _ => {}
    }

    let with_audit = fs.has_audit();
    let mut last = 0usize;
    let mut unique_found = 1usize;
    for i in 1..fs.len() {
        if max_unique.is_some_and(|max| unique_found >= max) {
            break;
        }
        if fs.indices[i] != fs.indices[last] {
            last += 1;
            unique_found += 1;
            if last != i {
                fs.values[last] = fs.values[i];
                fs.indices[last] = fs.indices[i];
                if with_audit {
                    fs.audit_info.swap(last, i);
                }
            }
        }
    }

    fs.values.truncate(last + 1);
    fs.indices.truncate(last + 1);
    fs.audit_info.truncate(if with_audit { last + 1 } else { 0 });
    fs.recompute_sum_feat_sq();
}

/// Sort every namespace of `ec` by `parse_mask` and drop duplicate indices.
pub fn unique_sort_features(parse_mask: u64, ec: &mut ExamplePredict) {
    for (_, fs) in ec.iter_mut() {
        if fs.sort(parse_mask) {
            unique_features(fs, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_group(raw: &[u64]) -> Features {
        let mut fs = Features::new();
        for &i in raw {
            fs.add_feature_raw(i, 1.0);
        }
        fs.sort(u64::MAX);
        fs
    }

    const RAW: [u64; 13] = [1, 2, 1, 1, 25, 3, 3, 3, 5, 7, 13, 11, 12];

    #[test_log::test]
    fn capped_unique() {
        let mut fs = sorted_group(&RAW);
        unique_features(&mut fs, Some(5));
        assert_eq!(fs.indices(), &[1, 2, 3, 5, 7]);
        assert_eq!(fs.sum_feat_sq(), 5.0);
    }

    #[test_log::test]
    fn uncapped_unique() {
        let mut fs = sorted_group(&RAW);
        unique_features(&mut fs, None);
        assert_eq!(fs.indices(), &[1, 2, 3, 5, 7, 11, 12, 13, 25]);
        assert_eq!(fs.values().len(), 9);
        assert_eq!(fs.sum_feat_sq(), 9.0);
    }

    #[test_log::test]
    fn zero_and_one_caps() {
        let mut fs = sorted_group(&RAW);
        unique_features(&mut fs, Some(0));
        assert!(fs.is_empty());
        assert_eq!(fs.sum_feat_sq(), 0.0);

        let mut fs = sorted_group(&RAW);
        unique_features(&mut fs, Some(1));
        assert_eq!(fs.indices(), &[1]);
    }

    #[test_log::test]
    fn keeps_first_value_of_each_run() {
        let mut fs = Features::new();
        fs.add_feature_raw(4, 1.0);
        fs.add_feature_raw(4, 3.0);
        fs.add_feature_raw(9, 2.0);
        unique_features(&mut fs, None);
        assert_eq!(fs.values(), &[1.0, 2.0]);
        assert_eq!(fs.sum_feat_sq(), 5.0);
    }
}
