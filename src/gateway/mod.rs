//! Generative collaborator boundary.
//!
//! The controller only ever sees the strict shapes defined here. Adapters
//! hand raw model text to the `parse_*` helpers, which reject anything that
//! does not coerce cleanly; a rejected response is a collaborator failure.

pub mod gemini;

use crate::catalog::Candidate;
use crate::model::{Category, ChatMessage, Environment, ImageHandle, Pet, Stage};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PetSummary {
    pub name: String,
    pub species: String,
    pub personality: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvolutionSummary {
    pub species: String,
    pub personality: String,
}

/// Inspiration image supplied at creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data_base64: String,
}

impl ReferenceImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// The appearance-relevant projection of a pet, plus the creation description.
#[derive(Clone, Debug, PartialEq)]
pub struct Portrait {
    pub description: String,
    pub species: String,
    pub personality: String,
    pub stage: Stage,
    pub accessories: Vec<String>,
    pub environment: Environment,
}

impl Portrait {
    pub fn of(pet: &Pet, description: &str) -> Self {
        Self {
            description: description.to_string(),
            species: pet.species.clone(),
            personality: pet.personality.clone(),
            stage: pet.stage,
            accessories: pet.selected_accessories.as_slice().to_vec(),
            environment: pet.environment,
        }
    }

    /// Portrait for a pet that does not exist yet.
    pub fn hatchling(description: &str, summary: &PetSummary) -> Self {
        Self {
            description: description.to_string(),
            species: summary.species.clone(),
            personality: summary.personality.clone(),
            stage: Stage::Baby,
            accessories: Vec::new(),
            environment: Environment::default(),
        }
    }

    pub fn evolving_into(mut self, stage: Stage, summary: &EvolutionSummary) -> Self {
        self.stage = stage;
        self.species = summary.species.clone();
        self.personality = summary.personality.clone();
        self
    }
}

#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Name, species and personality for a fresh pet.
    async fn summarize(&self, description: &str) -> Result<PetSummary>;

    async fn generate_appearance(
        &self,
        portrait: &Portrait,
        reference: Option<&ReferenceImage>,
    ) -> Result<ImageHandle>;

    async fn converse(&self, pet: &Pet, history: &[ChatMessage], message: &str) -> Result<String>;

    /// Candidate activities mentioned in `message`. `existing` holds lower-cased
    /// names the model should avoid; the core re-checks regardless.
    async fn extract_activities(&self, message: &str, existing: &[String]) -> Result<Vec<Candidate>>;

    async fn summarize_evolution(&self, pet: &Pet, target: Stage) -> Result<EvolutionSummary>;
}

/// Models sometimes wrap JSON in markdown fences even when asked not to.
fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn required(field: &'static str, value: Option<String>) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("response is missing {field}"),
    }
}

#[derive(Deserialize)]
struct RawSummary {
    name: Option<String>,
    species: Option<String>,
    personality: Option<String>,
}

pub fn parse_summary(text: &str) -> Result<PetSummary> {
    let raw: RawSummary = serde_json::from_str(strip_fences(text)).context("summary is not a JSON object")?;
    Ok(PetSummary {
        name: required("name", raw.name)?,
        species: required("species", raw.species)?,
        personality: required("personality", raw.personality)?,
    })
}

pub fn parse_evolution_summary(text: &str) -> Result<EvolutionSummary> {
    let raw: RawSummary =
        serde_json::from_str(strip_fences(text)).context("evolution summary is not a JSON object")?;
    Ok(EvolutionSummary {
        species: required("species", raw.species)?,
        personality: required("personality", raw.personality)?,
    })
}

#[derive(Deserialize)]
struct RawCandidate {
    name: Option<String>,
    icon: Option<String>,
    category: Option<String>,
}

fn candidate(entry: RawCandidate) -> Result<Candidate> {
    let category: Category = required("category", entry.category)?.parse()?;
    Ok(Candidate {
        name: required("name", entry.name)?,
        icon: required("icon", entry.icon)?,
        category,
    })
}

/// The payload must be a JSON array; individual entries that lack a name,
/// icon or known category are dropped.
pub fn parse_candidates(text: &str) -> Result<Vec<Candidate>> {
    let raw: Vec<RawCandidate> =
        serde_json::from_str(strip_fences(text)).context("activities are not a JSON array")?;
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        match candidate(entry) {
            Ok(c) => out.push(c),
            Err(e) => debug!(error = %e, "dropping malformed activity"),
        }
    }
    Ok(out)
}
