//! Pet lifecycle controller.
//!
//! Owns the single live [`Pet`] and is the only writer of its persisted
//! blob. Every mutation builds the next snapshot from the current in-memory
//! one, persists it, and only then swaps it in, all under one lock. The lock
//! is never held across a collaborator call; long operations re-acquire it
//! and re-validate before applying their result.
//!
//! ```text
//!   Uninitialized ──create──▶ Creating ──ok──▶ Active ◀──complete/fail── Evolving
//!         ▲                      │ err           │  └──────begin_evolution───────▲
//!         └──────────────────────┘               └──release──▶ Uninitialized
//! ```

use crate::catalog;
use crate::error::PetError;
use crate::gateway::{AiGateway, Portrait, ReferenceImage};
use crate::model::{accessory, CareItem, Category, ChatMessage, Environment, ImageHandle, MinigameKind, Pet, Stage, Stats};
use crate::progression;
use crate::stats::{care_delta, MinigameReward, CARE_XP, CHAT_XP, DECAY};
use crate::storage::{KeyValueStore, PetStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    /// Identity and first appearance are being generated.
    Creating,
    Active,
    /// An evolution transaction is staged or in flight.
    Evolving,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Creating => "being created",
            Phase::Active => "active",
            Phase::Evolving => "evolving",
        };
        f.write_str(s)
    }
}

/// Ephemeral, never persisted. `target` is filled once the new form exists.
#[derive(Clone, Debug, PartialEq)]
pub struct EvolutionTransaction {
    pub previous_image: ImageHandle,
    pub target_stage: Stage,
    pub target: Option<Pet>,
    attempt: u64,
}

impl EvolutionTransaction {
    pub fn next_image(&self) -> Option<&ImageHandle> {
        self.target.as_ref().map(|p| &p.image_url)
    }

    pub fn is_ready(&self) -> bool {
        self.target.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CareOutcome {
    Applied { item: CareItem, stats: Stats, xp: u32 },
    /// The item is a minigame; nothing changes until it is completed.
    MinigameStarted { item: CareItem, kind: MinigameKind },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatTurn {
    pub reply: Option<String>,
    pub discovered: Vec<CareItem>,
}

impl ChatTurn {
    /// Only the last discovery of a turn is announced.
    pub fn learned(&self) -> Option<&CareItem> {
        self.discovered.last()
    }
}

struct Session<S> {
    store: PetStore<S>,
    phase: Phase,
    pet: Option<Pet>,
    description: String,
    evolution: Option<EvolutionTransaction>,
    evolution_attempts: u64,
    /// Pet whose appearance request is in flight.
    regenerating: Option<Uuid>,
    minigame: Option<MinigameKind>,
    history: Vec<ChatMessage>,
    chatting: bool,
}

impl<S: KeyValueStore> Session<S> {
    fn active_pet(&self) -> Result<&Pet, PetError> {
        match self.phase {
            Phase::Active => self.pet.as_ref().ok_or(PetError::NoPet),
            Phase::Uninitialized => Err(PetError::NoPet),
            other => Err(PetError::Busy(other)),
        }
    }

    /// Write-through: the in-memory pet only changes if the write succeeded.
    fn commit(&mut self, next: Pet) -> Result<&Pet, PetError> {
        self.store.save_pet(&next).map_err(PetError::Storage)?;
        Ok(self.pet.insert(next))
    }

    fn reset(&mut self) {
        self.pet = None;
        self.description.clear();
        self.evolution = None;
        self.minigame = None;
        self.history.clear();
        self.chatting = false;
        self.regenerating = None;
    }
}

pub struct Controller<G, S> {
    gateway: Arc<G>,
    session: Arc<Mutex<Session<S>>>,
    phase_tx: Arc<watch::Sender<Phase>>,
}

impl<G, S> Clone for Controller<G, S> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            session: Arc::clone(&self.session),
            phase_tx: Arc::clone(&self.phase_tx),
        }
    }
}

impl<G: AiGateway, S: KeyValueStore> Controller<G, S> {
    /// Resumes a persisted pet if there is a readable one. An undecodable blob
    /// is logged and ignored; it is overwritten by the next created pet.
    pub fn restore(gateway: G, kv: S) -> Self {
        let store = PetStore::new(kv);
        let pet = store.load_pet().unwrap_or_else(|e| {
            warn!(error = %format!("{e:#}"), "discarding unreadable saved pet");
            None
        });
        let description = store.load_description().ok().flatten().unwrap_or_default();
        let phase = if pet.is_some() {
            Phase::Active
        } else {
            Phase::Uninitialized
        };
        if let Some(p) = &pet {
            info!(pet = %p.name, stage = %p.stage, "restored pet");
        }

        let (phase_tx, _) = watch::channel(phase);
        Self {
            gateway: Arc::new(gateway),
            session: Arc::new(Mutex::new(Session {
                store,
                phase,
                pet,
                description,
                evolution: None,
                evolution_attempts: 0,
                regenerating: None,
                minigame: None,
                history: Vec::new(),
                chatting: false,
            })),
            phase_tx: Arc::new(phase_tx),
        }
    }

    fn set_phase(&self, session: &mut Session<S>, phase: Phase) {
        if session.phase != phase {
            debug!(from = %session.phase, to = %phase, "phase");
        }
        session.phase = phase;
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }

    /* -----------------------------
       Queries
    ------------------------------ */

    pub fn phase(&self) -> Phase {
        self.session.lock().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn pet(&self) -> Option<Pet> {
        self.session.lock().pet.clone()
    }

    pub fn description(&self) -> String {
        self.session.lock().description.clone()
    }

    pub fn can_evolve(&self) -> bool {
        let s = self.session.lock();
        s.phase == Phase::Active && s.pet.as_ref().is_some_and(progression::can_evolve)
    }

    pub fn catalog(&self, category: Category) -> Vec<CareItem> {
        match self.session.lock().pet.as_ref() {
            Some(pet) => catalog::effective(pet, category),
            None => catalog::seed(category),
        }
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.session.lock().history.clone()
    }

    pub fn evolution(&self) -> Option<EvolutionTransaction> {
        self.session.lock().evolution.clone()
    }

    pub fn minigame(&self) -> Option<MinigameKind> {
        self.session.lock().minigame
    }

    /* -----------------------------
       Creation / release
    ------------------------------ */

    pub async fn create(&self, description: &str, reference: Option<ReferenceImage>) -> Result<Pet, PetError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(PetError::EmptyInput("description"));
        }
        {
            let mut s = self.session.lock();
            match s.phase {
                Phase::Uninitialized => {}
                Phase::Active => return Err(PetError::AlreadyExists),
                other => return Err(PetError::Busy(other)),
            }
            self.set_phase(&mut s, Phase::Creating);
        }
        info!("creating pet");

        let generated = async {
            let summary = self.gateway.summarize(description).await?;
            let portrait = Portrait::hatchling(description, &summary);
            let image = self
                .gateway
                .generate_appearance(&portrait, reference.as_ref())
                .await?;
            anyhow::Ok((summary, image))
        }
        .await;

        let mut s = self.session.lock();
        let (summary, image) = match generated {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "creation failed");
                self.set_phase(&mut s, Phase::Uninitialized);
                return Err(PetError::Gateway(e));
            }
        };

        let pet = Pet::hatch(summary.name, summary.species, summary.personality, image, Utc::now());
        let saved = match s.store.save_pet(&pet) {
            Ok(()) => s.store.save_description(description),
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            if let Err(cleanup) = s.store.clear() {
                warn!(error = %format!("{cleanup:#}"), "could not roll back partial save");
            }
            self.set_phase(&mut s, Phase::Uninitialized);
            return Err(PetError::Storage(e));
        }

        s.reset();
        s.description = description.to_string();
        s.pet = Some(pet.clone());
        self.set_phase(&mut s, Phase::Active);
        info!(pet = %pet.name, species = %pet.species, "pet created");
        Ok(pet)
    }

    /// Forgets the pet and its description. `confirmed` must be the caller's
    /// explicit yes.
    pub fn release(&self, confirmed: bool) -> Result<(), PetError> {
        if !confirmed {
            return Err(PetError::ReleaseNotConfirmed);
        }
        let mut s = self.session.lock();
        match s.phase {
            Phase::Uninitialized => return Err(PetError::NoPet),
            Phase::Creating => return Err(PetError::Busy(Phase::Creating)),
            Phase::Active | Phase::Evolving => {}
        }
        s.store.clear().map_err(PetError::Storage)?;
        let name = s.pet.as_ref().map(|p| p.name.clone()).unwrap_or_default();
        s.reset();
        self.set_phase(&mut s, Phase::Uninitialized);
        info!(pet = %name, "pet released");
        Ok(())
    }

    /* -----------------------------
       Stat mutations
    ------------------------------ */

    /// One decay step. Ignored unless the pet is active.
    pub fn tick(&self) -> Result<Option<Stats>, PetError> {
        let mut s = self.session.lock();
        let Ok(pet) = s.active_pet() else {
            return Ok(None);
        };
        let mut next = pet.clone();
        next.stats = next.stats.apply(DECAY);
        let stats = s.commit(next)?.stats;
        debug!(hunger = stats.hunger, happiness = stats.happiness, energy = stats.energy, "decay");
        Ok(Some(stats))
    }

    pub fn perform_care(&self, item_name: &str) -> Result<CareOutcome, PetError> {
        self.care(item_name, None)
    }

    /// Like [`Controller::perform_care`], but the item must belong to `category`.
    pub fn perform_care_in(&self, category: Category, item_name: &str) -> Result<CareOutcome, PetError> {
        self.care(item_name, Some(category))
    }

    fn care(&self, item_name: &str, expected: Option<Category>) -> Result<CareOutcome, PetError> {
        let mut s = self.session.lock();
        let pet = s.active_pet()?;
        let item = catalog::find(pet, item_name).ok_or_else(|| PetError::UnknownCareItem(item_name.trim().to_string()))?;
        if let Some(category) = expected.filter(|c| *c != item.category) {
            return Err(PetError::WrongCategory { item: item.name, category });
        }

        if let Some(kind) = item.minigame_kind() {
            s.minigame = Some(kind);
            debug!(item = %item.name, ?kind, "minigame started");
            return Ok(CareOutcome::MinigameStarted { item, kind });
        }

        let mut next = pet.clone();
        next.stats = next.stats.apply(care_delta(item.category));
        next.xp = next.xp.saturating_add(CARE_XP);
        let committed = s.commit(next)?;
        info!(item = %item.name, xp = committed.xp, "care");
        Ok(CareOutcome::Applied {
            stats: committed.stats,
            xp: committed.xp,
            item,
        })
    }

    /// Applies the reward for the running minigame. `score` only matters for
    /// scored kinds.
    pub fn complete_minigame(&self, score: u32) -> Result<MinigameReward, PetError> {
        let mut s = self.session.lock();
        let kind = s.minigame.ok_or(PetError::NoMinigame)?;
        let pet = s.active_pet()?;
        let reward = MinigameReward::for_result(kind, score);

        let mut next = pet.clone();
        next.stats = next.stats.apply(reward.delta);
        next.xp = next.xp.saturating_add(reward.xp);
        s.commit(next)?;
        s.minigame = None;
        info!(?kind, score, xp = reward.xp, "minigame complete");
        Ok(reward)
    }

    pub fn abandon_minigame(&self) -> bool {
        self.session.lock().minigame.take().is_some()
    }

    /* -----------------------------
       Conversation
    ------------------------------ */

    /// One chat turn. A failed reply yields an empty turn; failed extraction
    /// just means nothing new was learned.
    pub async fn chat(&self, message: &str) -> Result<ChatTurn, PetError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(PetError::EmptyInput("message"));
        }

        let (snapshot, history, names) = {
            let mut s = self.session.lock();
            let pet = s.active_pet()?.clone();
            if s.chatting {
                return Err(PetError::ChatInFlight);
            }
            let names = catalog::existing_names(&pet);
            let history = s.history.clone();
            s.history.push(ChatMessage::user(message));
            s.chatting = true;
            (pet, history, names)
        };

        let (reply, extracted) = tokio::join!(
            self.gateway.converse(&snapshot, &history, message),
            self.gateway.extract_activities(message, &names),
        );

        let mut s = self.session.lock();
        s.chatting = false;

        let reply = match reply {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "chat reply failed");
                return Ok(ChatTurn::default());
            }
        };
        let candidates = extracted.unwrap_or_else(|e| {
            debug!(error = %format!("{e:#}"), "activity extraction failed");
            Vec::new()
        });

        // Released (or replaced) while we were waiting.
        let Some(live) = s.pet.as_ref().filter(|p| p.id == snapshot.id) else {
            return Ok(ChatTurn::default());
        };

        let mut known = catalog::existing_names(live);
        let discovered = catalog::accept_discoveries(&mut known, candidates);
        let mut next = live.clone();
        catalog::record(&mut next, &discovered);
        next.xp = next.xp.saturating_add(CHAT_XP);
        s.commit(next)?;
        s.history.push(ChatMessage::model(reply.clone()));

        if let Some(item) = discovered.last() {
            info!(item = %item.name, category = %item.category, total = discovered.len(), "learned activity");
        }
        Ok(ChatTurn {
            reply: Some(reply),
            discovered,
        })
    }

    /* -----------------------------
       Appearance-affecting edits
    ------------------------------ */

    /// Adds or removes an accessory, then refreshes the appearance best-effort.
    pub async fn toggle_accessory(&self, name: &str) -> Result<Pet, PetError> {
        let canonical = accessory(name).ok_or_else(|| PetError::UnknownAccessory(name.trim().to_string()))?;
        let id = {
            let mut s = self.session.lock();
            let mut next = s.active_pet()?.clone();
            next.selected_accessories.toggle(canonical);
            s.commit(next)?.id
        };
        self.regenerate(id).await;
        self.pet().ok_or(PetError::NoPet)
    }

    pub async fn set_environment(&self, environment: Environment) -> Result<Pet, PetError> {
        let id = {
            let mut s = self.session.lock();
            let pet = s.active_pet()?;
            if pet.environment == environment {
                return Ok(pet.clone());
            }
            let mut next = pet.clone();
            next.environment = environment;
            s.commit(next)?.id
        };
        self.regenerate(id).await;
        self.pet().ok_or(PetError::NoPet)
    }

    /// At most one regeneration runs at a time; an edit arriving meanwhile
    /// does not queue another. Failure keeps the old image.
    async fn regenerate(&self, id: Uuid) {
        let portrait = {
            let mut s = self.session.lock();
            if s.regenerating.is_some() {
                debug!("appearance regeneration already in flight");
                return;
            }
            let Some(pet) = s.pet.as_ref().filter(|p| p.id == id) else {
                return;
            };
            let portrait = Portrait::of(pet, &s.description);
            s.regenerating = Some(id);
            portrait
        };

        let result = self.gateway.generate_appearance(&portrait, None).await;

        let mut s = self.session.lock();
        if s.regenerating == Some(id) {
            s.regenerating = None;
        }
        let image = match result {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "appearance regeneration failed; keeping previous image");
                return;
            }
        };
        // A portrait of an earlier stage must never replace an evolved one.
        let active = s.phase == Phase::Active;
        let Some(live) = s
            .pet
            .as_ref()
            .filter(|p| active && p.id == id && p.stage == portrait.stage)
        else {
            debug!("discarding appearance for a pet that moved on");
            return;
        };
        let mut next = live.clone();
        next.image_url = image;
        if let Err(e) = s.commit(next) {
            warn!(error = %e, "could not persist regenerated appearance");
        }
    }

    /* -----------------------------
       Evolution
    ------------------------------ */

    /// Stages an evolution: generates the new form without touching the
    /// persisted pet. On failure the transaction is dropped and the pet is
    /// back to `Active`, unchanged.
    pub async fn begin_evolution(&self) -> Result<EvolutionTransaction, PetError> {
        let (snapshot, target_stage, description, attempt) = {
            let mut s = self.session.lock();
            let pet = s.active_pet()?.clone();
            if !progression::can_evolve(&pet) {
                return Err(PetError::NotEligible);
            }
            if s.regenerating.is_some() {
                return Err(PetError::Pending("an appearance update"));
            }
            if s.chatting {
                return Err(PetError::Pending("a conversation"));
            }
            s.evolution_attempts += 1;
            let attempt = s.evolution_attempts;
            let target_stage = pet.stage.next();
            s.evolution = Some(EvolutionTransaction {
                previous_image: pet.image_url.clone(),
                target_stage,
                target: None,
                attempt,
            });
            s.minigame = None;
            self.set_phase(&mut s, Phase::Evolving);
            let description = s.description.clone();
            (pet, target_stage, description, attempt)
        };
        info!(pet = %snapshot.name, from = %snapshot.stage, to = %target_stage, "evolution started");

        let generated = async {
            let summary = self
                .gateway
                .summarize_evolution(&snapshot, target_stage)
                .await?;
            let portrait = Portrait::of(&snapshot, &description).evolving_into(target_stage, &summary);
            let image = self.gateway.generate_appearance(&portrait, None).await?;
            anyhow::Ok((summary, image))
        }
        .await;

        let mut s = self.session.lock();
        let still_ours = s.evolution.as_ref().is_some_and(|tx| tx.attempt == attempt);
        if !still_ours {
            return Err(PetError::EvolutionDiscarded);
        }

        let (summary, image) = match generated {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "evolution failed");
                s.evolution = None;
                self.set_phase(&mut s, Phase::Active);
                return Err(PetError::Gateway(e));
            }
        };

        let Some(live) = s.pet.as_ref() else {
            return Err(PetError::EvolutionDiscarded);
        };
        let target = progression::evolved(live, target_stage, &summary.species, &summary.personality, image);
        let Some(tx) = s.evolution.as_mut() else {
            return Err(PetError::EvolutionDiscarded);
        };
        tx.target = Some(target);
        Ok(tx.clone())
    }

    /// Commits a staged evolution. If nothing was staged yet the transaction
    /// is discarded and `Ok(None)` is returned.
    pub fn complete_evolution(&self) -> Result<Option<Pet>, PetError> {
        let mut s = self.session.lock();
        if s.phase != Phase::Evolving {
            return Err(PetError::NotEvolving);
        }
        let staged = s.evolution.take().and_then(|tx| tx.target);
        let Some(target) = staged else {
            info!("evolution discarded before the new form was ready");
            self.set_phase(&mut s, Phase::Active);
            return Ok(None);
        };

        // Rebuild from the live pet so anything learned mid-evolution is kept.
        let next = match s.pet.as_ref() {
            Some(live) => progression::evolved(
                live,
                target.stage,
                &target.species,
                &target.personality,
                target.image_url.clone(),
            ),
            None => target,
        };
        let committed = s.commit(next).map(Pet::clone);
        self.set_phase(&mut s, Phase::Active);
        let committed = committed?;
        info!(pet = %committed.name, stage = %committed.stage, species = %committed.species, "evolved");
        Ok(Some(committed))
    }

    /// Stage and commit in one go.
    pub async fn evolve(&self) -> Result<Pet, PetError> {
        self.begin_evolution().await?;
        self.complete_evolution()?.ok_or(PetError::EvolutionDiscarded)
    }
}
