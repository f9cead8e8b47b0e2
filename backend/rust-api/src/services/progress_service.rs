use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::metrics::XP_AWARDED_TOTAL;
use crate::models::progress::{LeaderboardQuery, LeaderboardResponse};
use crate::models::{Answer, LeaderboardEntry, RankProgress, UserProgress, XpReward};
use crate::services::rank_table::RankTable;
use crate::storage::ProgressStore;

pub const DEFAULT_LEADERBOARD_LIMIT: u32 = 50;
pub const MAX_LEADERBOARD_LIMIT: u32 = 100;

const XP_PER_CORRECT: u64 = 10;
const NO_MISTAKES_BONUS: f64 = 10.0;
const ALL_CORRECT_MULTIPLIER: f64 = 0.25;
const FAST_SOLVE_MULTIPLIER: f64 = 0.15;
const FAST_SOLVE_SECS: u32 = 30;

/// XP earned by a finished attempt. Only graded answers (`is_correct` set) count;
/// an attempt with no graded answers earns nothing.
pub fn xp_for_answers(answers: &[Answer]) -> u64 {
    let graded: Vec<(bool, Option<u32>)> = answers
        .iter()
        .filter_map(|a| a.is_correct.map(|c| (c, a.time_spent)))
        .collect();
    if graded.is_empty() {
        return 0;
    }

    let correct = graded.iter().filter(|(c, _)| *c).count() as u64;
    let base = (correct * XP_PER_CORRECT) as f64;
    let all_correct = graded.iter().all(|(c, _)| *c);
    let fast = graded
        .iter()
        .all(|(_, t)| t.is_some_and(|secs| secs <= FAST_SOLVE_SECS));

    let mut bonus = 0.0;
    if all_correct {
        bonus += NO_MISTAKES_BONUS + ALL_CORRECT_MULTIPLIER * base;
    }
    if fast {
        bonus += FAST_SOLVE_MULTIPLIER * base;
    }

    (base + bonus).round() as u64
}

pub struct ProgressService {
    store: Arc<dyn ProgressStore>,
    ranks: Arc<RankTable>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn ProgressStore>, ranks: Arc<RankTable>) -> Self {
        Self { store, ranks }
    }

    pub async fn apply_reward(&self, reward: &XpReward) -> Result<UserProgress> {
        let progress = self
            .store
            .add_xp(&reward.user_id, &reward.name, reward.amount)
            .await?;
        XP_AWARDED_TOTAL.inc_by(reward.amount);
        tracing::info!(
            user_id = %reward.user_id,
            session_id = %reward.session_id,
            amount = reward.amount,
            total = progress.xp,
            "XP awarded"
        );
        Ok(progress)
    }

    /// A user with no rewards yet sits at 0 XP.
    pub async fn progress_for(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<(UserProgress, RankProgress)> {
        let progress = self.store.get(user_id).await?.unwrap_or_else(|| UserProgress {
            user_id: user_id.to_string(),
            name: name.to_string(),
            xp: 0,
        });
        let rank = self.ranks.tier_for(progress.xp);
        Ok((progress, rank))
    }

    pub fn rank_for(&self, xp: u64) -> RankProgress {
        self.ranks.tier_for(xp)
    }

    pub async fn leaderboard(&self, query: &LeaderboardQuery) -> Result<LeaderboardResponse> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
            .clamp(1, MAX_LEADERBOARD_LIMIT);
        let page = query.page.unwrap_or(1).max(1);
        let offset = u64::from(page - 1) * u64::from(limit);

        // one extra row tells whether another page exists
        let mut rows = self.store.top(offset, limit + 1).await?;
        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);

        let leaderboard = rows
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                rank: self.ranks.tier_for(p.xp).current.name,
                position: offset + i as u64 + 1,
                user_id: p.user_id,
                name: p.name,
                xp: p.xp,
            })
            .collect();

        Ok(LeaderboardResponse {
            leaderboard,
            page,
            limit,
            has_more,
        })
    }
}

/// Applies rewards until every sender is dropped. A failed write is logged and
/// the reward dropped; finish stays idempotent so the attempt itself is safe.
pub async fn run_reward_consumer(
    progress: Arc<ProgressService>,
    mut rewards: mpsc::UnboundedReceiver<XpReward>,
) {
    while let Some(reward) = rewards.recv().await {
        if let Err(e) = progress.apply_reward(&reward).await {
            tracing::error!(
                user_id = %reward.user_id,
                session_id = %reward.session_id,
                error = %e,
                "Failed to apply XP reward"
            );
        }
    }
    tracing::debug!("Reward channel closed, consumer exiting");
}
