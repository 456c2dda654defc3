use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub evolution_model: String,
    pub chat_temperature: f32,
    pub request_timeout_secs: u64,
    pub decay_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            text_model: "gemini-3-flash-preview".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            evolution_model: "gemini-3-pro-preview".to_string(),
            chat_temperature: 0.9,
            request_timeout_secs: 120,
            decay_interval_secs: 12,
        }
    }
}

impl Settings {
    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.decay_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

pub struct Paths {
    pub data_dir: PathBuf,
    pub settings_path: PathBuf,
}

/// Resolves the data directory (or uses `override_dir`) and makes sure it exists.
pub fn project_paths(override_dir: Option<&Path>) -> Result<Paths> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => ProjectDirs::from("com", "aetherpet", "AetherPet")
            .context("could not resolve project directories")?
            .data_local_dir()
            .to_path_buf(),
    };
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(Paths {
        settings_path: dir.join("settings.json"),
        data_dir: dir,
    })
}

/// Missing or unreadable settings fall back to defaults.
pub fn load_settings(path: &Path) -> Settings {
    if let Ok(s) = fs::read_to_string(path) {
        match serde_json::from_str::<Settings>(&s) {
            Ok(v) => return v,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring malformed settings"),
        }
    }
    Settings::default()
}

pub fn save_settings_atomic(path: &Path, s: &Settings) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(s)?;
    fs::write(&tmp, data)?;
    atomic_rename(&tmp, path)?;
    Ok(())
}

pub fn atomic_rename(from: &Path, to: &Path) -> Result<()> {
    // rename-over-existing is atomic on unix; windows refuses it.
    if cfg!(windows) && to.exists() {
        let _ = fs::remove_file(to);
    }
    fs::rename(from, to).with_context(|| format!("replacing {}", to.display()))?;
    Ok(())
}

pub fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
