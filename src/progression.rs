//! Experience thresholds and the evolution gate.

use crate::model::{ImageHandle, Pet, Stage, Stats};

pub const EVOLVE_MIN_HAPPINESS: f64 = 80.0;

/// XP needed to leave `stage`. Ancient has a threshold but no successor.
pub fn xp_threshold(stage: Stage) -> u32 {
    match stage {
        Stage::Baby => 100,
        Stage::Teen => 300,
        Stage::Adult => 600,
        Stage::Ancient => 1000,
    }
}

pub fn can_evolve(pet: &Pet) -> bool {
    !pet.stage.is_terminal()
        && pet.xp >= xp_threshold(pet.stage)
        && pet.stats.happiness >= EVOLVE_MIN_HAPPINESS
}

/// Post-evolution snapshot: one stage up, stats full, xp cleared, descriptive
/// fields replaced. Identity, customization and discoveries carry over.
pub fn evolved(
    pet: &Pet,
    stage: Stage,
    species: &str,
    personality: &str,
    image_url: ImageHandle,
) -> Pet {
    Pet {
        species: species.to_string(),
        personality: personality.to_string(),
        image_url,
        stats: Stats::FULL,
        stage,
        xp: 0,
        ..pet.clone()
    }
}
