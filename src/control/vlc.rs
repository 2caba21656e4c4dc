use super::{
    native_volume, seconds, settle, step_volume, ChannelError, ControlChannel, PlayState, Status,
    DISPLAY_PER_NATIVE,
};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default, Deserialize)]
struct VlcStatus {
    #[serde(default)]
    time: f64,
    #[serde(default)]
    length: f64,
    #[serde(default)]
    state: String,
    /// 0..=512, where 256 is 100%
    #[serde(default)]
    volume: f64,
}

impl From<VlcStatus> for Status {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(raw: VlcStatus) -> Self {
        let state = match raw.state.as_str() {
            "playing" => PlayState::Playing,
            "paused" => PlayState::Paused,
            "stopped" => PlayState::Stopped,
            _ => PlayState::Unknown,
        };
        Status {
            position: seconds(raw.time),
            length: seconds(raw.length),
            state,
            volume: raw.volume.max(0.0).round() as u16,
        }
    }
}

/// VLC's `http` interface on loopback, guarded by the per-spawn password.
#[derive(Debug)]
pub struct VlcHttp {
    client: Client,
    status_url: String,
    password: String,
    gate: Mutex<()>,
}

impl VlcHttp {
    pub fn new(port: u16, password: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            status_url: format!("http://127.0.0.1:{port}/requests/status.json"),
            password: password.into(),
            gate: Mutex::new(()),
        })
    }

    async fn request(&self, query: &[(&str, String)]) -> std::result::Result<VlcStatus, ChannelError> {
        let _gate = self.gate.lock().await;
        let response = self
            .client
            .get(&self.status_url)
            .basic_auth("", Some(&self.password))
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn command(&self, operation: &str, query: &[(&str, String)]) -> bool {
        settle(operation, self.request(query).await).is_some()
    }

    async fn step(&self, delta: f64) -> bool {
        let Some(current) = settle("vlc volume read", self.request(&[]).await) else {
            return false;
        };
        let target = step_volume(native_volume(current.volume), delta);
        self.command("vlc volume write", &volume_query(target)).await
    }
}

#[allow(clippy::cast_possible_truncation)]
fn volume_query(native: f64) -> [(&'static str, String); 2] {
    let raw = (native * DISPLAY_PER_NATIVE).round() as i64;
    [("command", "volume".to_string()), ("val", raw.to_string())]
}

fn seek_query(delta_secs: i64) -> [(&'static str, String); 2] {
    [("command", "seek".to_string()), ("val", format!("{delta_secs:+}"))]
}

#[async_trait]
impl ControlChannel for VlcHttp {
    async fn get_status(&self) -> Option<Status> {
        settle("vlc status", self.request(&[]).await).map(Status::from)
    }

    async fn pause(&self) -> bool {
        self.command("vlc pause", &[("command", "pl_pause".to_string())])
            .await
    }

    async fn volume_up(&self, step: u8) -> bool {
        self.step(f64::from(step)).await
    }

    async fn volume_down(&self, step: u8) -> bool {
        self.step(-f64::from(step)).await
    }

    async fn seek(&self, delta_secs: i64) -> bool {
        self.command("vlc seek", &seek_query(delta_secs)).await
    }

    async fn quit(&self) -> bool {
        // with --play-and-exit, stopping the playlist ends the process
        self.command("vlc quit", &[("command", "pl_stop".to_string())])
            .await
    }
}
