//! Deterministic diversity-balanced partition.
//!
//! Candidates are bucketed by their diversity key, buckets are ordered
//! largest first (first-seen order breaks ties), and the flattened sequence
//! is dealt round-robin across `ceil(n / size)` groups. Because each bucket
//! is contiguous in the dealing order, a bucket only repeats inside a group
//! once every group already holds one of its members.

use std::collections::HashMap;

use tracing::debug;

use super::model::{GroupCandidate, GroupPlan};
use crate::error::GroupingError;

/// Partition `candidates` into groups of roughly `target_group_size`.
///
/// The same input slice always yields the same plans. An empty input
/// yields no groups.
pub fn form_groups(
    candidates: &[GroupCandidate],
    target_group_size: i64,
) -> Result<Vec<GroupPlan>, GroupingError> {
    if target_group_size <= 0 {
        return Err(GroupingError::InvalidConfiguration(format!(
            "target group size must be positive, got {target_group_size}"
        )));
    }
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let size = usize::try_from(target_group_size).unwrap_or(usize::MAX);
    let group_count = candidates.len().div_ceil(size);

    let ordered = bucket_order(candidates);
    let mut groups: Vec<Vec<GroupCandidate>> = vec![Vec::new(); group_count];
    for (i, candidate) in ordered.into_iter().enumerate() {
        groups[i % group_count].push(candidate.clone());
    }

    debug!(
        candidates = candidates.len(),
        target_group_size,
        group_count,
        "Partitioned candidates"
    );

    Ok(groups
        .into_iter()
        .zip(1u32..)
        .map(|(members, number)| GroupPlan { number, members })
        .collect())
}

/// Flatten candidates bucket by bucket: buckets by size descending then
/// first appearance, members within a bucket by skill level.
fn bucket_order(candidates: &[GroupCandidate]) -> Vec<&GroupCandidate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<Vec<&GroupCandidate>> = Vec::new();

    for candidate in candidates {
        let key = candidate.diversity_key();
        let slot = *index.entry(key).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(candidate);
    }

    for bucket in &mut buckets {
        bucket.sort_by_key(|c| c.skill_level);
    }
    // Stable: equal-sized buckets keep first-seen order.
    buckets.sort_by(|a, b| b.len().cmp(&a.len()));

    buckets.into_iter().flatten().collect()
}
