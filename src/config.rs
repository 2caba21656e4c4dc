use crate::error::Result;
use crate::player::PlayerKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings read from `~/.ytmcli/config.toml`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub player: PlayerKind,
    pub mpv_path: String,
    pub vlc_path: String,
    pub tick_ms: u64,
    pub request_timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub stop_grace_ms: u64,
    pub seek_step_secs: i64,
    pub volume_step: u8,
    pub initial_volume: Option<u8>,
    pub vlc_port: u16,
    pub history_limit: usize,
    pub log_level: String,
    /// Spectrum bars under the status block, when audio capture is available.
    pub visualizer: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            player: PlayerKind::Mpv,
            mpv_path: "mpv".to_string(),
            vlc_path: "cvlc".to_string(),
            tick_ms: 100,
            request_timeout_ms: 500,
            startup_timeout_ms: 3000,
            stop_grace_ms: 200,
            seek_step_secs: 5,
            volume_step: 10,
            initial_volume: None,
            vlc_port: 8080,
            history_limit: 100,
            log_level: "info".to_string(),
            visualizer: true,
        }
    }
}

impl Config {
    /// Loads the file at `path`, falling back to defaults when it does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn player_program(&self) -> &str {
        match self.player {
            PlayerKind::Mpv => &self.mpv_path,
            PlayerKind::Vlc => &self.vlc_path,
        }
    }
}

/// `~/.ytmcli`, the home of the config file, history and logs.
pub fn data_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")?;
    Ok(PathBuf::from(home).join(".ytmcli"))
}
