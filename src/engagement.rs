//! 0–5 engagement tiers for a single product feature.

use crate::models::EngagementBucket;

pub const MAX_LEVEL: u8 = 5;

/// Executions at or above this, with at least 18 active days, reach level 5.
const POWER_USER_EXECUTIONS: u64 = 60;

/// Maps execution and active-day counts onto the adoption tier.
///
/// Lower bounds are inclusive. Any off-by-one here moves real users between
/// reported tiers.
pub fn engagement_level(executions: u64, active_days: u64) -> u8 {
    if executions == 0 || active_days == 0 {
        return 0;
    }
    match active_days {
        1..=4 => 1,
        5..=9 => 2,
        10..=17 => 3,
        _ if executions < POWER_USER_EXECUTIONS => 4,
        _ => 5,
    }
}

/// Counts of users per level, always six buckets in level order.
pub fn engagement_distribution<I>(pairs: I) -> Vec<EngagementBucket>
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut counts = [0u64; MAX_LEVEL as usize + 1];
    for (executions, active_days) in pairs {
        counts[engagement_level(executions, active_days) as usize] += 1;
    }
    counts
        .iter()
        .enumerate()
        .map(|(level, count)| EngagementBucket {
            level: level as u8,
            count: *count,
        })
        .collect()
}
