use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const STAT_MIN: f64 = 0.0;
pub const STAT_MAX: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub hunger: f64,
    pub happiness: f64,
    pub energy: f64,
}

impl Stats {
    pub const HATCHED: Stats = Stats {
        hunger: 80.0,
        happiness: 80.0,
        energy: 100.0,
    };

    pub const FULL: Stats = Stats {
        hunger: STAT_MAX,
        happiness: STAT_MAX,
        energy: STAT_MAX,
    };

    pub const fn new(hunger: f64, happiness: f64, energy: f64) -> Self {
        Self {
            hunger,
            happiness,
            energy,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Baby,
    Teen,
    Adult,
    Ancient,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Baby, Stage::Teen, Stage::Adult, Stage::Ancient];

    /// Successor in the fixed stage order. `Ancient` maps to itself.
    pub fn next(self) -> Stage {
        match self {
            Stage::Baby => Stage::Teen,
            Stage::Teen => Stage::Adult,
            Stage::Adult => Stage::Ancient,
            Stage::Ancient => Stage::Ancient,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Ancient
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Baby => "Baby",
            Stage::Teen => "Teen",
            Stage::Adult => "Adult",
            Stage::Ancient => "Ancient",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Play,
    Rest,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Food, Category::Play, Category::Rest];

    pub fn name(self) -> &'static str {
        match self {
            Category::Food => "food",
            Category::Play => "play",
            Category::Rest => "rest",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "food" => Ok(Category::Food),
            "play" => Ok(Category::Play),
            "rest" => Ok(Category::Rest),
            other => anyhow::bail!("unknown care category {other:?}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinigameKind {
    /// Scored: happiness and xp bonus scale with the final score.
    Tapping,
    /// Unscored: flat bonus, restores energy.
    Breathing,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareItem {
    pub name: String,
    pub icon: String,
    pub category: Category,
    #[serde(
        rename = "isMinigame",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_minigame: bool,
}

impl CareItem {
    pub fn new(name: impl Into<String>, icon: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            icon: icon.into(),
            category,
            is_minigame: false,
        }
    }

    pub fn minigame_kind(&self) -> Option<MinigameKind> {
        if !self.is_minigame {
            return None;
        }
        match self.category {
            Category::Play => Some(MinigameKind::Tapping),
            Category::Rest => Some(MinigameKind::Breathing),
            Category::Food => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Environment {
    #[default]
    #[serde(rename = "Celestial Garden")]
    Garden,
    #[serde(rename = "Cyberpunk City")]
    City,
    #[serde(rename = "Ancient Temple")]
    Temple,
    #[serde(rename = "Crystal Cave")]
    Cave,
    #[serde(rename = "Oceanic Abyss")]
    Ocean,
}

impl Environment {
    pub const ALL: [Environment; 5] = [
        Environment::Garden,
        Environment::City,
        Environment::Temple,
        Environment::Cave,
        Environment::Ocean,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Environment::Garden => "garden",
            Environment::City => "city",
            Environment::Temple => "temple",
            Environment::Cave => "cave",
            Environment::Ocean => "ocean",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Environment::Garden => "Celestial Garden",
            Environment::City => "Cyberpunk City",
            Environment::Temple => "Ancient Temple",
            Environment::Cave => "Crystal Cave",
            Environment::Ocean => "Oceanic Abyss",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Environment::Garden => "Floating islands with glowing flora",
            Environment::City => "Neon-soaked skyscrapers and rain",
            Environment::Temple => "Mossy stone ruins with warm sunbeams",
            Environment::Cave => "Vibrant glowing minerals and stalactites",
            Environment::Ocean => "Corals, bubbles, and deep bioluminescence",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    /// Accepts either the short id (`cave`) or the display name, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Environment::ALL
            .into_iter()
            .find(|env| env.id().eq_ignore_ascii_case(wanted) || env.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| anyhow::anyhow!("unknown environment {wanted:?}"))
    }
}

pub const ACCESSORIES: [&str; 10] = [
    "Wizard Hat",
    "Cyberpunk Visor",
    "Royal Crown",
    "Silk Bow Tie",
    "Explorer's Vest",
    "Neon Collar",
    "Steampunk Goggles",
    "Flower Crown",
    "Heroic Cape",
    "Pirate Eye Patch",
];

/// Canonical spelling of a known accessory, matched case-insensitively.
pub fn accessory(name: &str) -> Option<&'static str> {
    let wanted = name.trim();
    ACCESSORIES
        .into_iter()
        .find(|known| known.eq_ignore_ascii_case(wanted))
}

/// Insertion-ordered accessory selection, at most [`Accessories::MAX_SELECTED`] long.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accessories(Vec<String>);

impl Accessories {
    pub const MAX_SELECTED: usize = 2;

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|a| a == name)
    }

    /// Selects each name in order. Repeats are ignored; only the newest
    /// [`Accessories::MAX_SELECTED`] survive.
    pub fn selecting<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Accessories::default();
        for name in names {
            let name = name.into();
            if !out.contains(&name) {
                out.toggle(&name);
            }
        }
        out
    }

    /// Removes `name` if selected, otherwise appends it and evicts the oldest
    /// selections beyond the cap.
    pub fn toggle(&mut self, name: &str) {
        if let Some(idx) = self.0.iter().position(|a| a == name) {
            self.0.remove(idx);
            return;
        }
        while self.0.len() >= Self::MAX_SELECTED {
            self.0.remove(0);
        }
        self.0.push(name.to_string());
    }
}


/// Opaque handle to generated imagery (a data URL for the Gemini adapter).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(String);

impl ImageHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    pub id: Uuid,
    pub name: String,
    pub species: String,
    pub personality: String,
    pub image_url: ImageHandle,
    pub stats: Stats,
    pub stage: Stage,
    pub xp: u32,
    #[serde(default)]
    pub selected_accessories: Accessories,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub discovered_foods: Vec<CareItem>,
    #[serde(default)]
    pub discovered_play: Vec<CareItem>,
    #[serde(default)]
    pub discovered_rest: Vec<CareItem>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Pet {
    pub fn hatch(
        name: impl Into<String>,
        species: impl Into<String>,
        personality: impl Into<String>,
        image_url: ImageHandle,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            species: species.into(),
            personality: personality.into(),
            image_url,
            stats: Stats::HATCHED,
            stage: Stage::Baby,
            xp: 0,
            selected_accessories: Accessories::default(),
            environment: Environment::default(),
            discovered_foods: Vec::new(),
            discovered_play: Vec::new(),
            discovered_rest: Vec::new(),
            created_at,
        }
    }

    pub fn discoveries(&self, category: Category) -> &[CareItem] {
        match category {
            Category::Food => &self.discovered_foods,
            Category::Play => &self.discovered_play,
            Category::Rest => &self.discovered_rest,
        }
    }

    pub fn discoveries_mut(&mut self, category: Category) -> &mut Vec<CareItem> {
        match category {
            Category::Food => &mut self.discovered_foods,
            Category::Play => &mut self.discovered_play,
            Category::Rest => &mut self.discovered_rest,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
