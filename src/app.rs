use crate::config::{
    api_key_from_env, load_settings, project_paths, save_settings_atomic, Settings, API_KEY_VARS,
};
use crate::controller::Controller;
use crate::error::PetError;
use crate::gateway::gemini::GeminiGateway;
use crate::gateway::{AiGateway, ReferenceImage};
use crate::input::{parse_command, Command};
use crate::model::Category;
use crate::render;
use crate::scheduler::DecayScheduler;
use crate::storage::{FileStore, KeyValueStore};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub struct App<G, S> {
    controller: Controller<G, S>,
    color: bool,
}

impl<G, S> App<G, S>
where
    G: AiGateway + 'static,
    S: KeyValueStore + 'static,
{
    pub fn new(controller: Controller<G, S>, color: bool) -> Self {
        Self { controller, color }
    }

    /// Reads commands from stdin until `quit` or EOF. Commands that call the
    /// generative backend run as their own tasks so decay keeps ticking.
    pub async fn run(&self, settings: &Settings) -> Result<()> {
        let (mut scheduler, mut ticks) =
            DecayScheduler::spawn(settings.decay_interval(), self.controller.subscribe());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        println!("{}", render::phase_hint(self.controller.phase()));
        if let Some(pet) = self.controller.pet() {
            println!("{}", render::status(&pet, self.controller.can_evolve(), self.color));
        }

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("reading stdin")? else {
                        break;
                    };
                    match parse_command(&line) {
                        Ok(Some(Command::Quit)) => break,
                        Ok(Some(cmd)) => self.dispatch(cmd),
                        Ok(None) => {}
                        Err(msg) => println!("{msg}"),
                    }
                }
                Some(_tick) = ticks.recv() => {
                    if let Err(e) = self.controller.tick() {
                        warn!(error = %e, "decay tick not saved");
                    }
                }
            }
        }

        scheduler.stop();
        Ok(())
    }

    fn dispatch(&self, cmd: Command) {
        let controller = self.controller.clone();
        let color = self.color;
        tokio::spawn(async move {
            let out = execute(&controller, cmd, color).await;
            if !out.is_empty() {
                println!("{out}");
            }
        });
    }
}

async fn execute<G, S>(controller: &Controller<G, S>, cmd: Command, color: bool) -> String
where
    G: AiGateway,
    S: KeyValueStore,
{
    let name = || controller.pet().map(|p| p.name).unwrap_or_default();
    let result: Result<String, String> = async {
        match cmd {
            Command::Create { description, image } => {
                let reference = match image {
                    Some(path) => Some(load_reference(&path).map_err(|e| format!("{e:#}"))?),
                    None => None,
                };
                println!("Consulting the stars...");
                let pet = controller
                    .create(&description, reference)
                    .await
                    .map_err(|e| format!("The cosmos are turbulent ({e}). Please try again."))?;
                Ok(render::status(&pet, false, color))
            }
            Command::Status => match controller.pet() {
                Some(pet) => Ok(render::status(&pet, controller.can_evolve(), color)),
                None => Ok(render::phase_hint(controller.phase()).to_string()),
            },
            Command::Catalog(only) => {
                let cats = match only {
                    Some(c) => vec![c],
                    None => Category::ALL.to_vec(),
                };
                Ok(cats
                    .into_iter()
                    .map(|c| render::catalog(c, &controller.catalog(c)))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Command::Care { item, category } => {
                let outcome = match category {
                    Some(c) => controller.perform_care_in(c, &item),
                    None => controller.perform_care(&item),
                };
                outcome.map(|o| render::care(&o)).map_err(|e| e.to_string())
            }
            Command::Finish(score) => {
                let reward = controller.complete_minigame(score).map_err(|e| e.to_string())?;
                Ok(format!("Minigame complete: +{} xp", reward.xp))
            }
            Command::Say(message) => {
                let turn = controller.chat(&message).await.map_err(|e| e.to_string())?;
                Ok(render::chat(&name(), &turn))
            }
            Command::Wear(accessory) => {
                println!("Updating pet appearance...");
                let pet = controller.toggle_accessory(&accessory).await.map_err(|e| e.to_string())?;
                Ok(render::status(&pet, controller.can_evolve(), color))
            }
            Command::Travel(env) => {
                println!("Travelling to {env}...");
                let pet = controller.set_environment(env).await.map_err(|e| e.to_string())?;
                Ok(render::status(&pet, controller.can_evolve(), color))
            }
            Command::Evolve => {
                let tx = controller.begin_evolution().await.map_err(|e| match e {
                    PetError::Gateway(_) => {
                        "Evolution was interrupted by cosmic interference.".to_string()
                    }
                    other => other.to_string(),
                })?;
                println!("{}", render::evolution(&name(), &tx));
                match controller.complete_evolution().map_err(|e| e.to_string())? {
                    Some(pet) => Ok(render::status(&pet, false, color)),
                    None => Ok("The evolution faded away.".to_string()),
                }
            }
            Command::Release { confirmed } => {
                if !confirmed {
                    return Ok("Are you sure? Type `release yes` to let your pet go.".to_string());
                }
                let who = name();
                controller.release(true).map_err(|e| e.to_string())?;
                Ok(format!("{who} drifts back into the aether."))
            }
            Command::Help => Ok(render::help()),
            Command::Quit => Ok(String::new()),
        }
    }
    .await;

    result.unwrap_or_else(|e| e)
}

fn load_reference(path: &Path) -> Result<ReferenceImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(ReferenceImage::from_bytes(mime, &bytes))
}

/// A companion creature that lives in your terminal.
#[derive(Parser, Debug)]
#[command(name = "aetherpet", about = "AI virtual pet for the terminal")]
struct Cli {
    /// Where the pet and settings are stored (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds between passive decay ticks
    #[arg(long)]
    decay_secs: Option<u64>,

    /// Text model used for summaries, chat and extraction
    #[arg(long)]
    model: Option<String>,

    /// Image model used for portraits
    #[arg(long)]
    image_model: Option<String>,

    /// Plain output without ANSI colors
    #[arg(long)]
    no_color: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("AETHERPET_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("aetherpet=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let paths = project_paths(cli.data_dir.as_deref())?;
    let mut settings = load_settings(&paths.settings_path);
    if !paths.settings_path.exists() {
        save_settings_atomic(&paths.settings_path, &settings)?;
    }
    if let Some(secs) = cli.decay_secs {
        settings.decay_interval_secs = secs;
    }
    if let Some(model) = cli.model {
        settings.text_model = model.clone();
        settings.evolution_model = model;
    }
    if let Some(model) = cli.image_model {
        settings.image_model = model;
    }
    info!(dir = %paths.data_dir.display(), decay_secs = settings.decay_interval_secs, "starting");

    let key = api_key_from_env()
        .with_context(|| format!("set one of {} to talk to the pet", API_KEY_VARS.join(" or ")))?;
    let gateway = GeminiGateway::new(&settings, key)?;
    let store = FileStore::new(&paths.data_dir)?;
    let controller = Controller::restore(gateway, store);

    App::new(controller, !cli.no_color).run(&settings).await
}
