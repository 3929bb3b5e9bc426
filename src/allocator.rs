//! The new-workspace allocator.
//!
//! Every active output gets one placeholder tile offering a fresh
//! workspace.  Placeholders carry a workspace *number* that no existing
//! workspace uses; the number is only turned into a real workspace if the
//! user jumps to (or drops a window on) the placeholder.

use crate::knowledge::{Knowledge, OutputRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Lowest number the sequential policy hands out.
pub const SEQUENTIAL_FLOOR: i64 = 1000;

/// How placeholder numbers are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Count upwards from `max(1000, highest existing number)`.
    #[default]
    Sequential,
    /// Fill the lowest gaps among the positive integers.
    Filler,
}

/// A workspace that does not exist yet, bound to an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub num: i64,
    pub output: String,
}

/// `count` distinct positive numbers absent from `existing`.
pub fn fresh_numbers(existing: &[i64], count: usize, policy: AllocationPolicy) -> Vec<i64> {
    let used: HashSet<i64> = existing.iter().copied().collect();
    let start = match policy {
        AllocationPolicy::Sequential => existing
            .iter()
            .copied()
            .max()
            .unwrap_or(SEQUENTIAL_FLOOR)
            .max(SEQUENTIAL_FLOOR),
        AllocationPolicy::Filler => 1,
    };
    (start..)
        .filter(|n| !used.contains(n))
        .take(count)
        .collect()
}

/// One placeholder per output, ordered landscape outputs first (stable
/// otherwise) to match the ordering the packer applies to tiles.
pub fn allocate(
    existing: &[i64],
    outputs: &[OutputRecord],
    policy: AllocationPolicy,
) -> Vec<Placeholder> {
    let mut placeholders: Vec<(bool, Placeholder)> = fresh_numbers(existing, outputs.len(), policy)
        .into_iter()
        .zip(outputs)
        .map(|(num, output)| {
            (
                output.rect.is_landscape(),
                Placeholder {
                    num,
                    output: output.name.clone(),
                },
            )
        })
        .collect();
    placeholders.sort_by_key(|(landscape, _)| !landscape);
    placeholders.into_iter().map(|(_, p)| p).collect()
}

/// Placeholders for a session over `knowledge`.
pub fn for_session(knowledge: &Knowledge, policy: AllocationPolicy) -> Vec<Placeholder> {
    allocate(&knowledge.workspace_numbers(), knowledge.outputs(), policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Rect;

    fn output(name: &str, w: u32, h: u32) -> OutputRecord {
        OutputRecord {
            name: name.into(),
            rect: Rect::new(0, 0, w, h),
            alias: None,
            primary: false,
        }
    }

    #[test]
    fn sequential_starts_at_floor() {
        assert_eq!(
            fresh_numbers(&[1, 2, 3], 2, AllocationPolicy::Sequential),
            vec![1000, 1001]
        );
        assert_eq!(
            fresh_numbers(&[], 1, AllocationPolicy::Sequential),
            vec![1000]
        );
    }

    #[test]
    fn sequential_continues_after_highest() {
        let nums = fresh_numbers(&[4, 1000, 1003], 3, AllocationPolicy::Sequential);
        assert_eq!(nums, vec![1004, 1005, 1006]);
        assert!(nums.iter().all(|n| *n >= 1003));
    }

    #[test]
    fn filler_takes_lowest_gaps() {
        assert_eq!(
            fresh_numbers(&[1, 2, 4, 7], 3, AllocationPolicy::Filler),
            vec![3, 5, 6]
        );
        assert_eq!(fresh_numbers(&[], 2, AllocationPolicy::Filler), vec![1, 2]);
    }

    #[test]
    fn results_are_disjoint_from_existing() {
        let existing = [1, 3, 5, 999, 1000, 1001, 1500];
        for policy in [AllocationPolicy::Sequential, AllocationPolicy::Filler] {
            let nums = fresh_numbers(&existing, 5, policy);
            assert_eq!(nums.len(), 5);
            assert!(nums.iter().all(|n| *n > 0 && !existing.contains(n)));
        }
    }

    #[test]
    fn placeholders_are_ordered_landscape_first() {
        let outputs = [
            output("portrait", 1080, 1920),
            output("wide", 2560, 1440),
            output("square", 1000, 1000),
        ];
        let placeholders = allocate(&[1], &outputs, AllocationPolicy::Filler);
        let names: Vec<&str> = placeholders.iter().map(|p| p.output.as_str()).collect();
        assert_eq!(names, vec!["wide", "square", "portrait"]);
        let nums: Vec<i64> = placeholders.iter().map(|p| p.num).collect();
        // Numbers stay bound to their output.
        assert_eq!(nums, vec![3, 4, 2]);
    }

    #[test]
    fn policy_names_in_config() {
        let p: AllocationPolicy = serde_json::from_str(r#""filler""#).unwrap();
        assert_eq!(p, AllocationPolicy::Filler);
        assert_eq!(AllocationPolicy::default(), AllocationPolicy::Sequential);
    }
}
