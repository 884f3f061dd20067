//! Capacity-aware selection.
//!
//! A deterministic single-pass greedy packing per priority bucket. Groups are
//! visited from highest to lowest priority; within a group items are ordered
//! by size (ascending for `Count`, descending for `Space`) and each item is
//! accepted if it still fits. A rejected item does not end the group, and a
//! finished group is never revisited. This is not an optimal knapsack and is
//! not meant to be one.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::model::{FileRecord, Objective, SelectionPlan};

/// Choose a capacity-bounded subset of `records`.
///
/// Zero-byte records are ignored. Sorting is stable, so records of equal
/// size keep their input order and the result is a pure function of the
/// input.
pub fn select(records: &[FileRecord], capacity: u64, objective: Objective) -> SelectionPlan {
    let mut groups: BTreeMap<Reverse<i32>, Vec<&FileRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.size > 0) {
        groups.entry(Reverse(record.priority)).or_default().push(record);
    }

    let mut plan = SelectionPlan::default();
    for (_, mut items) in groups {
        match objective {
            Objective::Count => items.sort_by_key(|r| r.size),
            Objective::Space => items.sort_by_key(|r| Reverse(r.size)),
        }
        for record in items {
            if let Some(next) = plan.used_bytes.checked_add(record.size) {
                if next <= capacity {
                    plan.used_bytes = next;
                    plan.records.push(record.clone());
                }
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn rec(name: &str, size: u64, priority: i32) -> FileRecord {
        FileRecord {
            path: PathBuf::from(format!("/src/{}", name)),
            size,
            modified: SystemTime::UNIX_EPOCH,
            priority,
        }
    }

    fn names(plan: &SelectionPlan) -> Vec<String> {
        plan.records
            .iter()
            .map(|r| r.path.file_name().expect("name").to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_higher_priority_first_then_leftover_capacity() {
        let records = vec![
            rec("a", 100, 100),
            rec("b", 300, 100),
            rec("c", 500, 90),
            rec("d", 2000, 10),
        ];
        let plan = select(&records, 1000, Objective::Count);
        assert_eq!(names(&plan), vec!["a", "b", "c"]);
        assert_eq!(plan.used_bytes, 900);
    }

    #[test]
    fn test_rejected_item_does_not_end_group() {
        let records = vec![rec("big", 800, 50), rec("mid", 300, 50), rec("small", 100, 50)];
        let plan = select(&records, 450, Objective::Space);
        assert_eq!(names(&plan), vec!["mid", "small"]);
        assert_eq!(plan.used_bytes, 400);
    }

    #[test]
    fn test_count_orders_ascending_space_descending() {
        let records = vec![rec("m", 20, 1), rec("s", 10, 1), rec("l", 30, 1)];
        assert_eq!(names(&select(&records, 1000, Objective::Count)), vec!["s", "m", "l"]);
        assert_eq!(names(&select(&records, 1000, Objective::Space)), vec!["l", "m", "s"]);
    }

    #[test]
    fn test_lower_priority_never_evicts_higher() {
        // The low-priority small file fits only because the high group left room
        let records = vec![rec("hi-a", 600, 90), rec("hi-b", 500, 90), rec("lo", 300, 5)];
        let plan = select(&records, 1000, Objective::Space);
        assert_eq!(names(&plan), vec!["hi-a", "lo"]);
        assert_eq!(plan.used_bytes, 900);
    }

    #[test]
    fn test_zero_byte_files_are_ignored() {
        let records = vec![rec("empty", 0, 100), rec("one", 1, 100)];
        let plan = select(&records, 10, Objective::Count);
        assert_eq!(names(&plan), vec!["one"]);
    }

    #[test]
    fn test_zero_capacity_selects_nothing() {
        let plan = select(&[rec("a", 1, 1)], 0, Objective::Count);
        assert!(plan.is_empty());
        assert_eq!(plan.used_bytes, 0);
    }

    #[test]
    fn test_used_never_exceeds_capacity() {
        let records: Vec<FileRecord> = (1..200u64)
            .map(|i| rec(&format!("f{}", i), (i * 7919) % 1000 + 1, (i % 5) as i32))
            .collect();
        for capacity in [0, 1, 50, 999, 12_345, 100_000] {
            for objective in [Objective::Count, Objective::Space] {
                let plan = select(&records, capacity, objective);
                assert!(plan.used_bytes <= capacity);
                let sum: u64 = plan.records.iter().map(|r| r.size).sum();
                assert_eq!(sum, plan.used_bytes);
            }
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let records = vec![
            rec("x", 10, 3),
            rec("y", 10, 3),
            rec("z", 5, 7),
            rec("w", 10, 3),
        ];
        let first = select(&records, 25, Objective::Count);
        for _ in 0..10 {
            assert_eq!(select(&records, 25, Objective::Count), first);
        }
        assert_eq!(names(&first), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_objective_order_within_each_group() {
        let records: Vec<FileRecord> = (0..50u64)
            .map(|i| rec(&format!("f{}", i), (i * 37) % 17 + 1, (i % 3) as i32))
            .collect();
        let plan = select(&records, u64::MAX, Objective::Count);
        for pair in plan.records.windows(2) {
            if pair[0].priority == pair[1].priority {
                assert!(pair[0].size <= pair[1].size);
            } else {
                assert!(pair[0].priority > pair[1].priority);
            }
        }
    }
}
