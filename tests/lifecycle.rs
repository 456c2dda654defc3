//! End-to-end lifecycle tests against a scripted generative backend and an
//! in-memory store.

use aetherpet::catalog::Candidate;
use aetherpet::controller::{CareOutcome, Controller, Phase};
use aetherpet::error::PetError;
use aetherpet::gateway::{AiGateway, EvolutionSummary, PetSummary, Portrait, ReferenceImage};
use aetherpet::model::{Category, ChatMessage, Environment, ImageHandle, MinigameKind, Pet, Stage, Stats};
use aetherpet::storage::{KeyValueStore, MemoryStore, PetStore, PET_KEY};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/* -----------------------------
   Scripted backend
------------------------------ */

#[derive(Default)]
struct Script {
    fail_summary: bool,
    fail_image: bool,
    fail_reply: bool,
    fail_extract: bool,
    fail_evolution: bool,
    candidates: Vec<Candidate>,
    gate: Option<Arc<Notify>>,
    chat_gate: Option<Arc<Notify>>,
}

#[derive(Default)]
struct Backend {
    script: Mutex<Script>,
    images: AtomicUsize,
    replies: AtomicUsize,
    portraits: Mutex<Vec<Portrait>>,
    references: Mutex<Vec<ReferenceImage>>,
}

/// Cloned handles share one backend, so a test can script it after the
/// controller took ownership.
#[derive(Clone, Default)]
struct ScriptedGateway(Arc<Backend>);

impl Deref for ScriptedGateway {
    type Target = Backend;

    fn deref(&self) -> &Backend {
        &self.0
    }
}

impl Backend {
    fn set(&self, f: impl FnOnce(&mut Script)) {
        f(&mut *self.script.lock());
    }

    fn image_calls(&self) -> usize {
        self.images.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiGateway for ScriptedGateway {
    async fn summarize(&self, _description: &str) -> Result<PetSummary> {
        if self.script.lock().fail_summary {
            return Err(anyhow!("summary unavailable"));
        }
        Ok(PetSummary {
            name: "Nebby".into(),
            species: "Star Moth".into(),
            personality: "Curious and gentle".into(),
        })
    }

    async fn generate_appearance(
        &self,
        portrait: &Portrait,
        reference: Option<&ReferenceImage>,
    ) -> Result<ImageHandle> {
        let n = self.images.fetch_add(1, Ordering::SeqCst) + 1;
        self.portraits.lock().push(portrait.clone());
        if let Some(r) = reference {
            self.references.lock().push(r.clone());
        }
        let gate = self.script.lock().gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.script.lock().fail_image {
            return Err(anyhow!("image unavailable"));
        }
        Ok(ImageHandle::new(format!("img-{n}")))
    }

    async fn converse(&self, pet: &Pet, history: &[ChatMessage], message: &str) -> Result<String> {
        self.replies.fetch_add(1, Ordering::SeqCst);
        let gate = self.script.lock().chat_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.script.lock().fail_reply {
            return Err(anyhow!("reply unavailable"));
        }
        Ok(format!("{} hears {message:?} after {} messages", pet.name, history.len()))
    }

    async fn extract_activities(&self, _message: &str, _existing: &[String]) -> Result<Vec<Candidate>> {
        let s = self.script.lock();
        if s.fail_extract {
            return Err(anyhow!("extraction unavailable"));
        }
        Ok(s.candidates.clone())
    }

    async fn summarize_evolution(&self, _pet: &Pet, target: Stage) -> Result<EvolutionSummary> {
        if self.script.lock().fail_evolution {
            return Err(anyhow!("evolution summary unavailable"));
        }
        Ok(EvolutionSummary {
            species: format!("{target} Star Moth"),
            personality: "Wise beyond its wings".into(),
        })
    }
}

type Ctl = Controller<ScriptedGateway, MemoryStore>;

fn fresh() -> (Ctl, ScriptedGateway, MemoryStore) {
    let gw = ScriptedGateway::default();
    let store = MemoryStore::new();
    let ctl = Controller::restore(gw.clone(), store.clone());
    (ctl, gw, store)
}

fn seeded(pet: &Pet) -> (Ctl, ScriptedGateway, MemoryStore) {
    let gw = ScriptedGateway::default();
    let store = MemoryStore::new();
    let mut typed = PetStore::new(store.clone());
    typed.save_pet(pet).unwrap();
    typed.save_description("a moth made of starlight").unwrap();
    let ctl = Controller::restore(gw.clone(), store.clone());
    (ctl, gw, store)
}

fn pet_with(stage: Stage, xp: u32, stats: Stats) -> Pet {
    let born = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let mut pet = Pet::hatch("Nebby", "Star Moth", "Curious", ImageHandle::new("img-0"), born);
    pet.stage = stage;
    pet.xp = xp;
    pet.stats = stats;
    pet
}

fn candidate(name: &str, category: Category) -> Candidate {
    Candidate {
        name: name.into(),
        icon: "✨".into(),
        category,
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/* -----------------------------
   Creation / release / restore
------------------------------ */

#[tokio::test]
async fn create_hatches_a_baby_and_persists_it() {
    let (ctl, gw, store) = fresh();
    assert_eq!(ctl.phase(), Phase::Uninitialized);

    let reference = ReferenceImage::from_bytes("image/png", b"\x89PNG");
    let pet = ctl.create("  a moth made of starlight ", Some(reference)).await.unwrap();

    assert_eq!(ctl.phase(), Phase::Active);
    assert_eq!(pet.name, "Nebby");
    assert_eq!(pet.stage, Stage::Baby);
    assert_eq!(pet.xp, 0);
    assert_eq!(pet.stats, Stats::HATCHED);
    assert_eq!(pet.environment, Environment::Garden);
    assert_eq!(pet.image_url.as_str(), "img-1");
    assert_eq!(ctl.description(), "a moth made of starlight");
    assert_eq!(gw.references.lock().len(), 1);

    let reloaded = PetStore::new(store.clone()).load_pet().unwrap().unwrap();
    assert_eq!(reloaded.id, pet.id);
    assert_eq!(reloaded.stats, pet.stats);
    assert_eq!(reloaded.image_url, pet.image_url);
    assert_eq!(
        PetStore::new(store).load_description().unwrap().as_deref(),
        Some("a moth made of starlight")
    );
}

#[tokio::test]
async fn create_rejects_blank_and_duplicate_requests() {
    let (ctl, _gw, _store) = fresh();
    assert!(matches!(ctl.create("   ", None).await, Err(PetError::EmptyInput(_))));

    ctl.create("a moth", None).await.unwrap();
    assert!(matches!(ctl.create("another", None).await, Err(PetError::AlreadyExists)));
}

#[tokio::test]
async fn failed_creation_leaves_nothing_behind() {
    let (ctl, gw, store) = fresh();
    gw.set(|s| s.fail_image = true);

    let err = ctl.create("a moth", None).await.unwrap_err();
    assert!(matches!(err, PetError::Gateway(_)));
    assert_eq!(ctl.phase(), Phase::Uninitialized);
    assert!(ctl.pet().is_none());
    assert!(store.raw(PET_KEY).is_none());

    gw.set(|s| {
        s.fail_image = false;
        s.fail_summary = true;
    });
    assert!(ctl.create("a moth", None).await.is_err());
    assert_eq!(gw.image_calls(), 1, "no image is requested without a summary");
}

#[tokio::test]
async fn restore_resumes_the_saved_pet() {
    let pet = pet_with(Stage::Teen, 42, Stats::new(10.0, 20.0, 30.0));
    let (ctl, _gw, _store) = seeded(&pet);
    assert_eq!(ctl.phase(), Phase::Active);
    assert_eq!(ctl.pet(), Some(pet));
    assert_eq!(ctl.description(), "a moth made of starlight");
}

#[tokio::test]
async fn corrupt_blob_starts_fresh() {
    let gw = ScriptedGateway::default();
    let mut store = MemoryStore::new();
    store.set(PET_KEY, "{not json").unwrap();
    let ctl = Controller::restore(gw, store);
    assert_eq!(ctl.phase(), Phase::Uninitialized);
    assert!(ctl.pet().is_none());
}

#[tokio::test]
async fn release_requires_confirmation_and_clears_storage() {
    let (ctl, _gw, store) = fresh();
    ctl.create("a moth", None).await.unwrap();

    assert!(matches!(ctl.release(false), Err(PetError::ReleaseNotConfirmed)));
    assert_eq!(ctl.phase(), Phase::Active);
    assert!(store.raw(PET_KEY).is_some());

    ctl.release(true).unwrap();
    assert_eq!(ctl.phase(), Phase::Uninitialized);
    assert!(ctl.pet().is_none());
    assert!(store.raw(PET_KEY).is_none());
    assert!(ctl.history().is_empty());
    assert!(matches!(ctl.release(true), Err(PetError::NoPet)));
}

/* -----------------------------
   Decay / care / minigames
------------------------------ */

#[tokio::test]
async fn tick_decays_only_an_active_pet() {
    let (ctl, _gw, store) = fresh();
    assert_eq!(ctl.tick().unwrap(), None);

    ctl.create("a moth", None).await.unwrap();
    let stats = ctl.tick().unwrap().unwrap();
    assert!(approx(stats.hunger, 78.8));
    assert!(approx(stats.happiness, 79.3));
    assert!(approx(stats.energy, 99.0));

    let saved = PetStore::new(store).load_pet().unwrap().unwrap();
    assert!(approx(saved.stats.hunger, stats.hunger));
}

#[tokio::test]
async fn decay_floors_at_zero() {
    let pet = pet_with(Stage::Baby, 0, Stats::new(0.5, 0.0, 1.0));
    let (ctl, _gw, _store) = seeded(&pet);
    let stats = ctl.tick().unwrap().unwrap();
    assert_eq!(stats, Stats::new(0.0, 0.0, 0.0));
}

#[tokio::test]
async fn feeding_moves_stats_and_awards_xp() {
    let pet = pet_with(Stage::Baby, 0, Stats::new(50.0, 50.0, 50.0));
    let (ctl, _gw, _store) = seeded(&pet);

    match ctl.perform_care("crisp apple").unwrap() {
        CareOutcome::Applied { item, stats, xp } => {
            assert_eq!(item.name, "Crisp Apple");
            assert_eq!(stats, Stats::new(70.0, 55.0, 50.0));
            assert_eq!(xp, 10);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(ctl.perform_care("Moon Cheese"), Err(PetError::UnknownCareItem(_))));
}

#[tokio::test]
async fn category_verbs_reject_items_of_another_category() {
    let pet = pet_with(Stage::Baby, 0, Stats::new(50.0, 50.0, 50.0));
    let (ctl, _gw, store) = seeded(&pet);
    let before = store.raw(PET_KEY);

    let err = ctl.perform_care_in(Category::Food, "Power Nap").unwrap_err();
    assert!(matches!(err, PetError::WrongCategory { category: Category::Food, .. }));
    assert_eq!(store.raw(PET_KEY), before);

    let outcome = ctl.perform_care_in(Category::Rest, "power nap").unwrap();
    assert!(matches!(outcome, CareOutcome::Applied { xp: 10, .. }));
}

#[tokio::test]
async fn minigame_items_defer_their_reward() {
    let pet = pet_with(Stage::Baby, 0, Stats::new(50.0, 50.0, 50.0));
    let (ctl, _gw, _store) = seeded(&pet);

    assert!(matches!(ctl.complete_minigame(3), Err(PetError::NoMinigame)));
    let outcome = ctl.perform_care("Celestial Tapper").unwrap();
    assert!(matches!(outcome, CareOutcome::MinigameStarted { kind: MinigameKind::Tapping, .. }));
    assert_eq!(ctl.pet().unwrap().stats, Stats::new(50.0, 50.0, 50.0));

    let reward = ctl.complete_minigame(10).unwrap();
    assert_eq!(reward.xp, 65);
    let after = ctl.pet().unwrap();
    assert_eq!(after.stats, Stats::new(50.0, 85.0, 40.0));
    assert_eq!(after.xp, 65);
    assert_eq!(ctl.minigame(), None);

    ctl.perform_care("Guided Breath").unwrap();
    assert!(ctl.abandon_minigame());
    assert!(matches!(ctl.complete_minigame(0), Err(PetError::NoMinigame)));
}

/* -----------------------------
   Conversation
------------------------------ */

#[tokio::test]
async fn chat_learns_new_activities_without_near_duplicates() {
    let (ctl, gw, _store) = fresh();
    ctl.create("a moth", None).await.unwrap();
    gw.set(|s| {
        s.candidates = vec![
            candidate("Nap", Category::Rest),
            candidate("Power Nap Deluxe", Category::Rest),
            candidate("Yoga", Category::Play),
            candidate("Yoga Session", Category::Play),
            candidate("Star Fruit", Category::Food),
        ];
    });

    let turn = ctl.chat("we did yoga and ate star fruit").await.unwrap();
    assert!(turn.reply.is_some());
    let names: Vec<_> = turn.discovered.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["Yoga", "Star Fruit"]);
    assert_eq!(turn.learned().map(|i| i.name.as_str()), Some("Star Fruit"));

    let pet = ctl.pet().unwrap();
    assert_eq!(pet.xp, 5);
    assert_eq!(pet.discoveries(Category::Play).len(), 1);
    assert!(ctl.catalog(Category::Food).iter().any(|i| i.name == "Star Fruit"));
    assert_eq!(ctl.history().len(), 2);

    let again = ctl.chat("more yoga!").await.unwrap();
    assert!(again.discovered.is_empty());
    assert_eq!(ctl.pet().unwrap().xp, 10);
}

#[tokio::test]
async fn failed_reply_changes_nothing() {
    let (ctl, gw, store) = fresh();
    ctl.create("a moth", None).await.unwrap();
    let before = store.raw(PET_KEY);
    gw.set(|s| {
        s.fail_reply = true;
        s.candidates = vec![candidate("Kite Flying", Category::Play)];
    });

    let turn = ctl.chat("hello").await.unwrap();
    assert_eq!(turn.reply, None);
    assert_eq!(gw.replies.load(Ordering::SeqCst), 1);
    assert!(turn.discovered.is_empty());
    assert_eq!(store.raw(PET_KEY), before);
}

#[tokio::test]
async fn failed_extraction_still_replies() {
    let (ctl, gw, _store) = fresh();
    ctl.create("a moth", None).await.unwrap();
    gw.set(|s| s.fail_extract = true);

    let turn = ctl.chat("hello").await.unwrap();
    assert!(turn.reply.is_some());
    assert!(turn.discovered.is_empty());
    assert_eq!(ctl.pet().unwrap().xp, 5);
}

#[tokio::test]
async fn chat_needs_a_pet_and_a_message() {
    let (ctl, _gw, _store) = fresh();
    assert!(matches!(ctl.chat("hi").await, Err(PetError::NoPet)));
    ctl.create("a moth", None).await.unwrap();
    assert!(matches!(ctl.chat("  ").await, Err(PetError::EmptyInput(_))));
}

/* -----------------------------
   Appearance edits
------------------------------ */

#[tokio::test]
async fn accessories_evict_oldest_and_keep_edit_on_image_failure() {
    let (ctl, gw, _store) = fresh();
    ctl.create("a moth", None).await.unwrap();

    ctl.toggle_accessory("wizard hat").await.unwrap();
    ctl.toggle_accessory("Royal Crown").await.unwrap();
    let pet = ctl.toggle_accessory("Heroic Cape").await.unwrap();
    assert_eq!(pet.selected_accessories.as_slice(), ["Royal Crown", "Heroic Cape"]);
    assert_eq!(pet.image_url.as_str(), "img-4");

    gw.set(|s| s.fail_image = true);
    let pet = ctl.toggle_accessory("Royal Crown").await.unwrap();
    assert_eq!(pet.selected_accessories.as_slice(), ["Heroic Cape"]);
    assert_eq!(pet.image_url.as_str(), "img-4");

    assert!(matches!(
        ctl.toggle_accessory("Jetpack").await,
        Err(PetError::UnknownAccessory(_))
    ));
}

#[tokio::test]
async fn environment_change_regenerates_once() {
    let (ctl, gw, _store) = fresh();
    ctl.create("a moth", None).await.unwrap();

    let pet = ctl.set_environment(Environment::Ocean).await.unwrap();
    assert_eq!(pet.environment, Environment::Ocean);
    assert_eq!(gw.image_calls(), 2);
    assert_eq!(gw.portraits.lock().last().map(|p| p.environment), Some(Environment::Ocean));

    ctl.set_environment(Environment::Ocean).await.unwrap();
    assert_eq!(gw.image_calls(), 2, "same environment is a no-op");
}

#[tokio::test]
async fn edits_during_regeneration_do_not_queue_another() {
    let (ctl, gw, _store) = fresh();
    ctl.create("a moth", None).await.unwrap();
    let gate = Arc::new(Notify::new());
    gw.set(|s| s.gate = Some(Arc::clone(&gate)));

    let first = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.toggle_accessory("Neon Collar").await }
    });
    while gw.image_calls() < 2 {
        tokio::task::yield_now().await;
    }

    let second = ctl.set_environment(Environment::Cave).await.unwrap();
    assert_eq!(second.environment, Environment::Cave);
    assert_eq!(gw.image_calls(), 2);

    gate.notify_one();
    let pet = first.await.unwrap().unwrap();
    assert_eq!(pet.image_url.as_str(), "img-2");
    assert_eq!(pet.environment, Environment::Cave);
    assert!(pet.selected_accessories.contains("Neon Collar"));
}

/* -----------------------------
   Evolution
------------------------------ */

#[tokio::test]
async fn evolution_is_gated_on_xp_and_happiness() {
    let pet = pet_with(Stage::Teen, 299, Stats::new(50.0, 95.0, 50.0));
    let (ctl, _gw, _store) = seeded(&pet);
    assert!(!ctl.can_evolve());
    assert!(matches!(ctl.begin_evolution().await, Err(PetError::NotEligible)));

    let pet = pet_with(Stage::Teen, 300, Stats::new(50.0, 79.9, 50.0));
    let (ctl, _gw, _store) = seeded(&pet);
    assert!(!ctl.can_evolve());

    let pet = pet_with(Stage::Ancient, 5000, Stats::new(100.0, 100.0, 100.0));
    let (ctl, _gw, _store) = seeded(&pet);
    assert!(!ctl.can_evolve());
}

#[tokio::test]
async fn evolution_resets_progress_and_keeps_identity() {
    let mut pet = pet_with(Stage::Teen, 300, Stats::new(40.0, 90.0, 20.0));
    pet.selected_accessories.toggle("Wizard Hat");
    pet.environment = Environment::Temple;
    let (ctl, _gw, store) = seeded(&pet);
    assert!(ctl.can_evolve());

    let evolved = ctl.evolve().await.unwrap();
    assert_eq!(ctl.phase(), Phase::Active);
    assert_eq!(evolved.stage, Stage::Adult);
    assert_eq!(evolved.xp, 0);
    assert_eq!(evolved.stats, Stats::FULL);
    assert_eq!(evolved.species, "Adult Star Moth");
    assert_eq!(evolved.id, pet.id);
    assert_eq!(evolved.name, pet.name);
    assert_eq!(evolved.environment, Environment::Temple);
    assert!(evolved.selected_accessories.contains("Wizard Hat"));
    assert_ne!(evolved.image_url, pet.image_url);

    let saved = PetStore::new(store).load_pet().unwrap().unwrap();
    assert_eq!(saved, evolved);
}

#[tokio::test]
async fn failed_evolution_leaves_pet_untouched() {
    let pet = pet_with(Stage::Teen, 300, Stats::new(50.0, 90.0, 50.0));
    let (ctl, gw, store) = seeded(&pet);
    let before = store.raw(PET_KEY);
    gw.set(|s| s.fail_image = true);

    let err = ctl.begin_evolution().await.unwrap_err();
    assert!(matches!(err, PetError::Gateway(_)));
    assert_eq!(ctl.phase(), Phase::Active);
    assert!(ctl.evolution().is_none());
    assert_eq!(store.raw(PET_KEY), before);
    assert_eq!(ctl.pet(), Some(pet));

    gw.set(|s| {
        s.fail_image = false;
        s.fail_evolution = true;
    });
    assert!(ctl.evolve().await.is_err());
    assert_eq!(store.raw(PET_KEY), before);
}

#[tokio::test]
async fn staged_evolution_blocks_care_until_committed() {
    let pet = pet_with(Stage::Baby, 100, Stats::new(50.0, 85.0, 50.0));
    let (ctl, _gw, store) = seeded(&pet);
    let before = store.raw(PET_KEY);

    let tx = ctl.begin_evolution().await.unwrap();
    assert!(tx.is_ready());
    assert_eq!(tx.target_stage, Stage::Teen);
    assert_eq!(tx.previous_image, pet.image_url);
    assert_eq!(ctl.phase(), Phase::Evolving);
    assert_eq!(store.raw(PET_KEY), before, "staging does not persist");

    assert!(matches!(ctl.perform_care("Honey Tea"), Err(PetError::Busy(Phase::Evolving))));
    assert_eq!(ctl.tick().unwrap(), None);

    let committed = ctl.complete_evolution().unwrap().unwrap();
    assert_eq!(committed.stage, Stage::Teen);
    assert!(matches!(ctl.complete_evolution(), Err(PetError::NotEvolving)));
}

#[tokio::test]
async fn release_during_evolution_discards_it() {
    let pet = pet_with(Stage::Teen, 300, Stats::new(50.0, 90.0, 50.0));
    let (ctl, gw, store) = seeded(&pet);
    let gate = Arc::new(Notify::new());
    gw.set(|s| s.gate = Some(Arc::clone(&gate)));

    let pending = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.begin_evolution().await }
    });
    while gw.image_calls() < 1 {
        tokio::task::yield_now().await;
    }
    assert_eq!(ctl.phase(), Phase::Evolving);

    ctl.release(true).unwrap();
    gate.notify_one();
    assert!(matches!(pending.await.unwrap(), Err(PetError::EvolutionDiscarded)));
    assert_eq!(ctl.phase(), Phase::Uninitialized);
    assert!(store.raw(PET_KEY).is_none());
}

#[tokio::test]
async fn evolution_waits_for_a_pending_appearance_update() {
    let pet = pet_with(Stage::Teen, 300, Stats::new(50.0, 90.0, 50.0));
    let (ctl, gw, store) = seeded(&pet);
    let gate = Arc::new(Notify::new());
    gw.set(|s| s.gate = Some(Arc::clone(&gate)));

    let edit = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.toggle_accessory("Wizard Hat").await }
    });
    while gw.image_calls() < 1 {
        tokio::task::yield_now().await;
    }
    let edited = store.raw(PET_KEY);

    assert!(matches!(ctl.evolve().await, Err(PetError::Pending(_))));
    assert_eq!(ctl.phase(), Phase::Active);
    assert!(ctl.evolution().is_none());
    assert_eq!(store.raw(PET_KEY), edited);

    gate.notify_one();
    let teen = edit.await.unwrap().unwrap();
    assert_eq!(teen.stage, Stage::Teen);
    assert_eq!(teen.image_url.as_str(), "img-1");

    gw.set(|s| s.gate = None);
    let adult = ctl.evolve().await.unwrap();
    assert_eq!(adult.stage, Stage::Adult);
    assert_eq!(adult.image_url.as_str(), "img-2");
    assert!(adult.selected_accessories.contains("Wizard Hat"));
    assert_eq!(gw.portraits.lock().last().map(|p| p.stage), Some(Stage::Adult));

    let saved = PetStore::new(store).load_pet().unwrap().unwrap();
    assert_eq!(saved.image_url, adult.image_url);
    assert_eq!(saved.stage, Stage::Adult);
}

#[tokio::test]
async fn evolution_waits_for_a_pending_chat_and_failure_keeps_the_blob() {
    let pet = pet_with(Stage::Teen, 300, Stats::new(50.0, 90.0, 50.0));
    let (ctl, gw, store) = seeded(&pet);
    let gate = Arc::new(Notify::new());
    gw.set(|s| {
        s.chat_gate = Some(Arc::clone(&gate));
        s.candidates = vec![candidate("Kite Flying", Category::Play)];
    });

    let talk = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.chat("we flew kites").await }
    });
    while gw.replies.load(Ordering::SeqCst) < 1 {
        tokio::task::yield_now().await;
    }

    assert!(matches!(ctl.begin_evolution().await, Err(PetError::Pending(_))));
    assert_eq!(ctl.phase(), Phase::Active);

    gate.notify_one();
    let turn = talk.await.unwrap().unwrap();
    assert_eq!(turn.learned().map(|i| i.name.as_str()), Some("Kite Flying"));
    let after_chat = store.raw(PET_KEY);

    gw.set(|s| s.fail_image = true);
    assert!(matches!(ctl.begin_evolution().await, Err(PetError::Gateway(_))));
    assert_eq!(ctl.phase(), Phase::Active);
    assert_eq!(store.raw(PET_KEY), after_chat);

    let kept = ctl.pet().unwrap();
    assert_eq!(kept.stage, Stage::Teen);
    assert_eq!(kept.xp, 305);
    assert_eq!(kept.image_url, pet.image_url);
}

#[tokio::test]
async fn release_clears_a_pending_appearance_update() {
    let (ctl, gw, _store) = fresh();
    ctl.create("a moth", None).await.unwrap();
    let gate = Arc::new(Notify::new());
    gw.set(|s| s.gate = Some(Arc::clone(&gate)));

    let stale = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.set_environment(Environment::City).await }
    });
    while gw.image_calls() < 2 {
        tokio::task::yield_now().await;
    }

    ctl.release(true).unwrap();
    gw.set(|s| s.gate = None);
    let second = ctl.create("a second moth", None).await.unwrap();
    assert_eq!(second.image_url.as_str(), "img-3");

    let updated = ctl.toggle_accessory("Silk Bow Tie").await.unwrap();
    assert_eq!(gw.image_calls(), 4, "new pet's edit is not blocked by the old request");
    assert_eq!(updated.image_url.as_str(), "img-4");

    gate.notify_one();
    assert!(stale.await.is_ok());
    let live = ctl.pet().unwrap();
    assert_eq!(live.id, second.id);
    assert_eq!(live.image_url.as_str(), "img-4");
    assert_eq!(live.environment, Environment::Garden);
}
