//! Care catalog: static seed items plus the pet's discovery ledger.
//!
//! Seed items are never persisted; only discoveries live in the pet blob.
//! Discovery dedup is deliberately fuzzy: a candidate is rejected if its
//! lower-cased name equals, contains, or is contained in any known name.

use crate::model::{CareItem, Category, Pet};
use tracing::debug;

struct Seed {
    name: &'static str,
    icon: &'static str,
    minigame: bool,
}

const FOODS: &[Seed] = &[
    Seed { name: "Crisp Apple", icon: "🍎", minigame: false },
    Seed { name: "Fresh Water", icon: "💧", minigame: false },
    Seed { name: "Honey Tea", icon: "🍵", minigame: false },
];

const PLAY: &[Seed] = &[
    Seed { name: "Celestial Tapper", icon: "🎯", minigame: true },
    Seed { name: "Daily Stretch", icon: "🧘", minigame: false },
    Seed { name: "Quick Drawing", icon: "🎨", minigame: false },
];

const REST: &[Seed] = &[
    Seed { name: "Guided Breath", icon: "🌬️", minigame: true },
    Seed { name: "Reading Break", icon: "📖", minigame: false },
    Seed { name: "Power Nap", icon: "😴", minigame: false },
];

fn seeds(category: Category) -> &'static [Seed] {
    match category {
        Category::Food => FOODS,
        Category::Play => PLAY,
        Category::Rest => REST,
    }
}

pub fn seed(category: Category) -> Vec<CareItem> {
    seeds(category)
        .iter()
        .map(|s| CareItem {
            name: s.name.to_string(),
            icon: s.icon.to_string(),
            category,
            is_minigame: s.minigame,
        })
        .collect()
}

/// Seed items first, then discoveries in the order they were learned.
pub fn effective(pet: &Pet, category: Category) -> Vec<CareItem> {
    let mut items = seed(category);
    items.extend(pet.discoveries(category).iter().cloned());
    items
}

/// Exact (case-insensitive) lookup across every category.
pub fn find(pet: &Pet, name: &str) -> Option<CareItem> {
    let wanted = name.trim().to_lowercase();
    Category::ALL
        .into_iter()
        .flat_map(|c| effective(pet, c))
        .find(|item| item.name.to_lowercase() == wanted)
}

/// Lower-cased names of every effective item in all three categories.
pub fn existing_names(pet: &Pet) -> Vec<String> {
    Category::ALL
        .into_iter()
        .flat_map(|c| effective(pet, c))
        .map(|item| item.name.to_lowercase())
        .collect()
}

pub fn is_duplicate(known: &[String], candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    known
        .iter()
        .any(|existing| *existing == lower || existing.contains(&lower) || lower.contains(existing.as_str()))
}

/// An activity proposed by the extraction collaborator, already validated
/// into a known category.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub icon: String,
    pub category: Category,
}

/// Filters one extraction batch. Each accepted name joins `known` before the
/// next candidate is checked, so later near-duplicates in the same batch lose.
pub fn accept_discoveries(known: &mut Vec<String>, candidates: Vec<Candidate>) -> Vec<CareItem> {
    let mut accepted = Vec::new();
    for candidate in candidates {
        let name = candidate.name.trim();
        if is_duplicate(known, name) {
            debug!(candidate = name, "discovery rejected as duplicate");
            continue;
        }
        known.push(name.to_lowercase());
        accepted.push(CareItem::new(name, candidate.icon, candidate.category));
    }
    accepted
}

/// Appends accepted items to the matching ledgers.
pub fn record(pet: &mut Pet, items: &[CareItem]) {
    for item in items {
        pet.discoveries_mut(item.category).push(item.clone());
    }
}
