//! Stat engine: saturating arithmetic on the {hunger, happiness, energy} vector.

use crate::model::{Category, MinigameKind, Stats, STAT_MAX, STAT_MIN};

/// Signed per-stat change. Any magnitude is legal; application saturates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatDelta {
    pub hunger: f64,
    pub happiness: f64,
    pub energy: f64,
}

impl StatDelta {
    pub const ZERO: StatDelta = StatDelta::new(0.0, 0.0, 0.0);

    pub const fn new(hunger: f64, happiness: f64, energy: f64) -> Self {
        Self {
            hunger,
            happiness,
            energy,
        }
    }
}

/// Applied once per decay tick while the pet is active.
pub const DECAY: StatDelta = StatDelta::new(-1.2, -0.7, -1.0);

pub const CARE_XP: u32 = 10;
pub const CHAT_XP: u32 = 5;

const MINIGAME_HAPPINESS: f64 = 20.0;
const MINIGAME_XP: u32 = 50;
const UNSCORED_BONUS: u32 = 15;

pub fn apply_delta(stats: Stats, delta: StatDelta) -> Stats {
    Stats {
        hunger: saturate(stats.hunger, delta.hunger),
        happiness: saturate(stats.happiness, delta.happiness),
        energy: saturate(stats.energy, delta.energy),
    }
}

fn saturate(value: f64, delta: f64) -> f64 {
    let next = value + delta;
    if next.is_nan() {
        // NaN delta (or NaN loaded from a hand-edited save) leaves the stat alone.
        return if value.is_nan() { STAT_MIN } else { value.clamp(STAT_MIN, STAT_MAX) };
    }
    next.clamp(STAT_MIN, STAT_MAX)
}

impl Stats {
    pub fn apply(self, delta: StatDelta) -> Stats {
        apply_delta(self, delta)
    }
}

pub fn care_delta(category: Category) -> StatDelta {
    match category {
        Category::Food => StatDelta::new(20.0, 5.0, 0.0),
        Category::Play => StatDelta::new(0.0, 25.0, -15.0),
        Category::Rest => StatDelta::new(-10.0, 0.0, 35.0),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinigameReward {
    pub delta: StatDelta,
    pub xp: u32,
}

impl MinigameReward {
    /// `score` is ignored for unscored kinds.
    pub fn for_result(kind: MinigameKind, score: u32) -> Self {
        let bonus = match kind {
            MinigameKind::Tapping => score.saturating_mul(3) / 2,
            MinigameKind::Breathing => UNSCORED_BONUS,
        };
        let energy = match kind {
            MinigameKind::Breathing => 40.0,
            MinigameKind::Tapping => -10.0,
        };
        Self {
            delta: StatDelta::new(0.0, MINIGAME_HAPPINESS + f64::from(bonus), energy),
            xp: MINIGAME_XP.saturating_add(bonus),
        }
    }
}
