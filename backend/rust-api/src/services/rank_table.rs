use crate::error::{ArenaError, Result};
use crate::models::{RankProgress, RankTier};

const DEFAULT_TIERS: &[(&str, u64, Option<u64>)] = &[
    ("Novice", 0, Some(99)),
    ("Apprentice", 100, Some(299)),
    ("Scholar", 300, Some(699)),
    ("Expert", 700, Some(1_499)),
    ("Master", 1_500, Some(2_999)),
    ("Grandmaster", 3_000, Some(5_999)),
    ("Legend", 6_000, None),
];

/// Ordered XP bands covering `[0, inf)` with no gaps or overlaps.
#[derive(Debug, Clone)]
pub struct RankTable {
    tiers: Vec<RankTier>,
}

impl RankTable {
    /// The built-in ladder from Novice to Legend, checked like any other table.
    pub fn standard() -> Result<Self> {
        Self::new(
            DEFAULT_TIERS
                .iter()
                .map(|(name, xp_min, xp_max)| RankTier {
                    name: name.to_string(),
                    xp_min: *xp_min,
                    xp_max: *xp_max,
                })
                .collect(),
        )
    }

    /// Rejects tables that leave gaps, overlap, or do not end in an open tier.
    pub fn new(tiers: Vec<RankTier>) -> Result<Self> {
        let Some(first) = tiers.first() else {
            return Err(ArenaError::validation("rank table is empty"));
        };
        if first.xp_min != 0 {
            return Err(ArenaError::validation("first rank tier must start at 0 XP"));
        }

        for (i, tier) in tiers.iter().enumerate() {
            let is_last = i + 1 == tiers.len();
            match (tier.xp_max, is_last) {
                (None, true) => {}
                (None, false) => {
                    return Err(ArenaError::validation(format!(
                        "tier {} is open-ended but is not the last tier",
                        tier.name
                    )))
                }
                (Some(_), true) => {
                    return Err(ArenaError::validation(format!(
                        "last tier {} must be open-ended",
                        tier.name
                    )))
                }
                (Some(max), false) => {
                    if max < tier.xp_min {
                        return Err(ArenaError::validation(format!(
                            "tier {} ends before it starts",
                            tier.name
                        )));
                    }
                    let next = &tiers[i + 1];
                    if max.checked_add(1) != Some(next.xp_min) {
                        return Err(ArenaError::validation(format!(
                            "tiers {} and {} are not contiguous",
                            tier.name, next.name
                        )));
                    }
                }
            }
        }

        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[RankTier] {
        &self.tiers
    }

    pub fn tier_for(&self, xp: u64) -> RankProgress {
        // xp_min of the first tier is 0, so at least one tier qualifies
        let index = self
            .tiers
            .partition_point(|t| t.xp_min <= xp)
            .saturating_sub(1);
        let current = &self.tiers[index];
        let xp_in_tier = xp - current.xp_min;

        let (xp_for_tier, progress_percent) = match current.xp_max {
            None => (1, 100.0),
            Some(max) => {
                let width = max - current.xp_min + 1;
                let percent = (xp_in_tier as f64 / width as f64 * 100.0).clamp(0.0, 100.0);
                (width, percent)
            }
        };

        RankProgress {
            current: current.clone(),
            next: self.tiers.get(index + 1).cloned(),
            tier_index: index,
            xp_in_tier,
            xp_for_tier,
            progress_percent,
        }
    }
}
