// src/typecheck/schedule.rs

//! Worker pool sizing and greedy load balancing.

use crate::config::model::TypecheckSection;
use crate::typecheck::split::SplitConfig;

/// Worker counts `(fast, full)` for `logical_cores` execution units: a
/// quarter and a half of them, each at least one and at most the
/// configured maximum.
pub fn pool_sizes(logical_cores: usize, pools: &TypecheckSection) -> (usize, usize) {
    (
        (logical_cores / 4).clamp(1, pools.fast_workers_max.max(1)),
        (logical_cores / 2).clamp(1, pools.full_workers_max.max(1)),
    )
}

/// Longest-processing-time assignment: configs by descending size, each
/// pushed into the bucket with the least total size so far (the last one
/// on ties).
pub fn assign_buckets(mut configs: Vec<SplitConfig>, buckets: usize) -> Vec<Vec<SplitConfig>> {
    let mut out: Vec<Vec<SplitConfig>> = (0..buckets.max(1)).map(|_| Vec::new()).collect();
    let mut totals = vec![0u64; out.len()];
    configs.sort_by(|a, b| b.size.cmp(&a.size));

    for cfg in configs {
        let (target, _) = totals
            .iter()
            .enumerate()
            .rev()
            .min_by_key(|(_, total)| **total)
            .unwrap_or((0, &0));
        totals[target] += cfg.size;
        out[target].push(cfg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PassKind;
    use std::path::PathBuf;

    fn cfg(name: &str, size: u64) -> SplitConfig {
        SplitConfig {
            kind: PassKind::Full,
            config_file: PathBuf::from(format!("/b/noEmit/{name}.tsconfig.json")),
            pkg_name: name.to_string(),
            size,
        }
    }

    fn names(bucket: &[SplitConfig]) -> Vec<&str> {
        bucket.iter().map(|c| c.pkg_name.as_str()).collect()
    }

    #[test]
    fn greedy_trace_for_five_configs_in_two_buckets() {
        let configs = vec![cfg("e", 10), cfg("c", 30), cfg("a", 50), cfg("d", 20), cfg("b", 40)];
        let buckets = assign_buckets(configs, 2);

        // 50 -> B (tie), 40 -> A, 30 -> A (40 < 50), 20 -> B (50 < 70), 10 -> B (tie).
        assert_eq!(names(&buckets[0]), ["b", "c"]);
        assert_eq!(names(&buckets[1]), ["a", "d", "e"]);
        let totals: Vec<u64> = buckets.iter().map(|b| b.iter().map(|c| c.size).sum()).collect();
        assert_eq!(totals, [70, 80]);
    }

    #[test]
    fn more_buckets_than_configs_leaves_some_empty() {
        let buckets = assign_buckets(vec![cfg("a", 1)], 3);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets.iter().filter(|b| b.is_empty()).count(), 2);
    }

    #[test]
    fn pools_are_clamped() {
        let pools = TypecheckSection::default();
        assert_eq!(pool_sizes(1, &pools), (1, 1));
        assert_eq!(pool_sizes(6, &pools), (1, 3));
        assert_eq!(pool_sizes(12, &pools), (3, 6));
        assert_eq!(pool_sizes(64, &pools), (4, 8));
    }
}
