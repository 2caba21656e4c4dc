//! Turns a search query into a playable stream URL with yt-dlp.

use crate::error::{Error, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub url: String,
    pub title: Option<String>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct Format {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
}

impl Format {
    fn is_audio_only(&self) -> bool {
        self.acodec.as_deref().is_some_and(|codec| codec != "none")
            && self.vcodec.as_deref() == Some("none")
    }
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<Format>,
}

/// Picks the first audio-only format from `yt-dlp -j` output.
pub fn parse_info(query: &str, json: &str) -> Result<Resolved> {
    let info: VideoInfo = serde_json::from_str(json).map_err(|e| {
        debug!("yt-dlp output for \"{query}\" was not JSON: {e}");
        Error::ResolutionFailed(query.to_string())
    })?;

    let url = info
        .formats
        .iter()
        .find(|format| format.is_audio_only())
        .and_then(|format| format.url.clone())
        .or(info.url)
        .ok_or_else(|| Error::ResolutionFailed(query.to_string()))?;

    let duration = info
        .duration
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64);

    Ok(Resolved {
        url,
        title: info.title,
        duration,
    })
}

pub async fn resolve(query: &str) -> Result<Resolved> {
    let search = format!("ytsearch:{query}");
    let mut command = Command::new("yt-dlp");
    command.args([
        "--extractor-args",
        "youtube:player_client=android_music",
        "--no-warnings",
        "-f",
        "bestaudio",
        "-j",
        &search,
    ]);
    fetch(command, query, RESOLVE_TIMEOUT).await
}

/// Runs the resolver command and parses the first line it prints. The child
/// is killed if `limit` passes first.
async fn fetch(mut command: Command, query: &str, limit: Duration) -> Result<Resolved> {
    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match timeout(limit, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Failed to run yt-dlp: {e}");
            return Err(Error::ResolutionFailed(query.to_string()));
        }
        Err(_) => {
            warn!("yt-dlp timed out after {limit:?}");
            return Err(Error::ResolutionFailed(query.to_string()));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            "yt-dlp failed: {}",
            stderr.lines().next().unwrap_or("unknown error")
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        return Err(Error::ResolutionFailed(query.to_string()));
    }
    parse_info(query, first)
}
