//! Job priority levels.

use serde::{Deserialize, Serialize};

/// Relative scheduling weight of a campaign's jobs.
///
/// Workers drain higher-priority jobs first; within one priority, jobs run
/// in paced batch order. There is no fairness guarantee across campaigns
/// sharing a pool; a greedy priority pick is intentional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}
