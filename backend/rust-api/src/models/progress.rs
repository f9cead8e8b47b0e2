use serde::{Deserialize, Serialize};

/// Named XP band. `xp_max` is `None` for the open-ended top tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankTier {
    pub name: String,
    pub xp_min: u64,
    pub xp_max: Option<u64>,
}

impl RankTier {
    pub fn contains(&self, xp: u64) -> bool {
        xp >= self.xp_min && self.xp_max.map_or(true, |max| xp <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankProgress {
    pub current: RankTier,
    pub next: Option<RankTier>,
    pub tier_index: usize,
    pub xp_in_tier: u64,
    /// Width of the current tier; 1 for the open-ended tier.
    pub xp_for_tier: u64,
    pub progress_percent: f64,
}

/// Accumulated XP for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: String,
    pub name: String,
    pub xp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub name: String,
    pub xp: u64,
    pub rank: String,
    pub position: u64,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}
