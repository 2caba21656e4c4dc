//! Lifecycle of the external player process.

use crate::control::{ControlChannel, MpvIpc, VlcHttp};
use crate::error::{Error, Result};
use log::{debug, info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlayerKind {
    Mpv,
    Vlc,
}

/// Where a running player accepts control requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Socket(PathBuf),
    Http { port: u16, password: String },
}

impl Endpoint {
    /// Builds the control channel that speaks this endpoint's protocol.
    pub fn connect(&self, request_timeout: Duration) -> Result<Arc<dyn ControlChannel>> {
        Ok(match self {
            Endpoint::Socket(path) => Arc::new(MpvIpc::new(path.clone(), request_timeout)),
            Endpoint::Http { port, password } => {
                Arc::new(VlcHttp::new(*port, password.clone(), request_timeout)?)
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerExit {
    pub code: Option<i32>,
    pub success: bool,
}

impl PlayerExit {
    fn lost() -> Self {
        Self {
            code: None,
            success: false,
        }
    }
}

pub fn build_player_args(
    kind: PlayerKind,
    stream_url: &str,
    endpoint: &Endpoint,
    volume: Option<u8>,
) -> Vec<String> {
    let mut args = Vec::new();
    match (kind, endpoint) {
        (PlayerKind::Mpv, Endpoint::Socket(path)) => {
            args.extend([
                "--no-video".to_string(),
                "--no-terminal".to_string(),
                "--msg-level=all=no".to_string(),
                "--keep-open=no".to_string(),
                format!("--input-ipc-server={}", path.display()),
            ]);
            if let Some(volume) = volume {
                args.push(format!("--volume={volume}"));
            }
        }
        (PlayerKind::Vlc, Endpoint::Http { port, password }) => {
            args.extend([
                "--no-video".to_string(),
                "--play-and-exit".to_string(),
                "--quiet".to_string(),
                "--extraintf".to_string(),
                "http".to_string(),
                "--http-host".to_string(),
                "127.0.0.1".to_string(),
                "--http-port".to_string(),
                port.to_string(),
                "--http-password".to_string(),
                password.clone(),
            ]);
            if let Some(volume) = volume {
                // VLC's scale puts 100% at 256
                args.push("--volume".to_string());
                args.push((u32::from(volume) * 256 / 100).to_string());
            }
        }
        (kind, endpoint) => {
            warn!("{kind:?} can not be controlled through {endpoint:?}");
        }
    }
    args.push(stream_url.to_string());
    args
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Launch settings for one kind of player.
#[derive(Debug, Clone)]
pub struct PlayerProcess {
    pub kind: PlayerKind,
    pub program: String,
    pub volume: Option<u8>,
    pub vlc_port: u16,
    pub grace: Duration,
}

impl PlayerProcess {
    /// Spawns the player on a fresh control endpoint.
    pub fn start(&self, stream_url: &str) -> Result<PlayerHandle> {
        let (endpoint, scratch) = match self.kind {
            PlayerKind::Mpv => {
                let dir = tempfile::Builder::new().prefix("ytmcli-").tempdir()?;
                (Endpoint::Socket(dir.path().join("mpv.sock")), Some(dir))
            }
            PlayerKind::Vlc => (
                Endpoint::Http {
                    port: self.vlc_port,
                    password: random_password(),
                },
                None,
            ),
        };

        let mut command = Command::new(&self.program);
        command.args(build_player_args(self.kind, stream_url, &endpoint, self.volume));
        PlayerHandle::spawn(command, &self.program, endpoint, scratch, self.grace)
    }
}

/// A live player process and its control endpoint.
///
/// The child is owned by a waiter task that publishes the exit status, so
/// any task can check for exit, wait for it, or terminate the process.
#[derive(Debug)]
pub struct PlayerHandle {
    pid: Option<u32>,
    endpoint: Endpoint,
    exit: watch::Receiver<Option<PlayerExit>>,
    grace: Duration,
    scratch: std::sync::Mutex<Option<TempDir>>,
    stopped: tokio::sync::Mutex<bool>,
}

impl PlayerHandle {
    pub fn spawn(
        mut command: Command,
        program: &str,
        endpoint: Endpoint,
        scratch: Option<TempDir>,
        grace: Duration,
    ) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // own process group, so a Ctrl-C at the terminal only reaches us
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::SpawnFailed {
                program: program.to_string(),
                source,
            })?;
        let pid = child.id();
        info!("Started {program} (pid {pid:?}) with control endpoint {endpoint:?}");

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => PlayerExit {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    warn!("Lost track of player process: {e}");
                    PlayerExit::lost()
                }
            };
            debug!("Player exited: {exit:?}");
            let _ = tx.send(Some(exit));
        });

        Ok(Self {
            pid,
            endpoint,
            exit: rx,
            grace,
            scratch: std::sync::Mutex::new(scratch),
            stopped: tokio::sync::Mutex::new(false),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn exit_status(&self) -> Option<PlayerExit> {
        *self.exit.borrow()
    }

    /// Resolves once the process has exited.
    pub async fn wait_exit(&self) -> PlayerExit {
        let mut exit = self.exit.clone();
        let status = match exit.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or_else(PlayerExit::lost),
            Err(_) => PlayerExit::lost(),
        };
        status
    }

    async fn exited_within(&self, limit: Duration) -> bool {
        timeout(limit, self.wait_exit()).await.is_ok()
    }

    /// Polls the control channel until it answers, the player dies, or `limit` passes.
    pub async fn wait_ready(&self, channel: &dyn ControlChannel, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.has_exited() {
                return false;
            }
            if channel.get_status().await.is_some() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("Control endpoint {:?} not reachable after {limit:?}", self.endpoint);
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    fn signal(&self, sig: Signal) {
        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        if let Err(e) = signal::kill(Pid::from_raw(pid), sig) {
            debug!("{sig:?} to player {pid} failed: {e}");
        }
    }

    /// Quit request, then SIGTERM, then SIGKILL, each given `grace` to take
    /// effect. Removes the control endpoint. Later calls are no-ops.
    pub async fn force_stop(&self, channel: &dyn ControlChannel) {
        let mut stopped = self.stopped.lock().await;
        if *stopped {
            return;
        }

        if !self.has_exited() {
            channel.quit().await;
            if !self.exited_within(self.grace).await {
                debug!("Player ignored quit request, sending SIGTERM");
                self.signal(Signal::SIGTERM);
                if !self.exited_within(self.grace).await {
                    warn!("Player still alive after SIGTERM, killing it");
                    self.signal(Signal::SIGKILL);
                    self.exited_within(self.grace).await;
                }
            }
        }

        self.remove_endpoint();
        *stopped = true;
    }

    fn remove_endpoint(&self) {
        if let Endpoint::Socket(path) = &self.endpoint {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    debug!("Could not remove {}: {e}", path.display());
                }
            }
        }
        let scratch = match self.scratch.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(dir) = scratch {
            if let Err(e) = dir.close() {
                debug!("Could not remove endpoint directory: {e}");
            }
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        if !self.has_exited() {
            self.signal(Signal::SIGKILL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testing::FakeChannel;

    fn sleeper(dir: &TempDir) -> PlayerHandle {
        let socket = dir.path().join("mpv.sock");
        std::fs::write(&socket, b"").unwrap();
        let mut command = Command::new("sleep");
        command.arg("30");
        PlayerHandle::spawn(
            command,
            "sleep",
            Endpoint::Socket(socket),
            None,
            Duration::from_millis(100),
        )
        .unwrap()
    }

    #[test]
    fn mpv_args_select_audio_only_and_ipc() {
        let endpoint = Endpoint::Socket(PathBuf::from("/tmp/x/mpv.sock"));
        let args = build_player_args(PlayerKind::Mpv, "https://a/b", &endpoint, Some(70));
        assert!(args.contains(&"--no-video".to_string()));
        assert!(args.contains(&"--input-ipc-server=/tmp/x/mpv.sock".to_string()));
        assert!(args.contains(&"--volume=70".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--idle")));
        assert_eq!(args.last().unwrap(), "https://a/b");
    }

    #[test]
    fn vlc_args_bind_http_on_loopback() {
        let endpoint = Endpoint::Http {
            port: 8080,
            password: "pw".to_string(),
        };
        let args = build_player_args(PlayerKind::Vlc, "u", &endpoint, Some(50));
        let joined = args.join(" ");
        assert!(joined.contains("--extraintf http"));
        assert!(joined.contains("--http-host 127.0.0.1"));
        assert!(joined.contains("--http-port 8080"));
        assert!(joined.contains("--http-password pw"));
        assert!(joined.contains("--volume 128"));
        assert!(joined.contains("--play-and-exit"));
    }

    #[test]
    fn passwords_are_fresh_per_spawn() {
        let a = random_password();
        let b = random_password();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_failed() {
        let player = PlayerProcess {
            kind: PlayerKind::Mpv,
            program: "/nonexistent/ytmcli-player".to_string(),
            volume: None,
            vlc_port: 8080,
            grace: Duration::from_millis(50),
        };
        let err = player.start("u").unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn exit_is_observed_with_code() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let handle = PlayerHandle::spawn(
            command,
            "sh",
            Endpoint::Socket(PathBuf::from("/nonexistent/sock")),
            None,
            Duration::from_millis(50),
        )
        .unwrap();

        let exit = handle.wait_exit().await;
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn player_leads_its_own_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sleeper(&dir);
        let pid = Pid::from_raw(i32::try_from(handle.pid().unwrap()).unwrap());

        assert_eq!(nix::unistd::getpgid(Some(pid)).unwrap(), pid);
        assert_ne!(nix::unistd::getpgid(None).unwrap(), pid);

        handle.force_stop(&FakeChannel::default()).await;
    }

    #[tokio::test]
    async fn exit_can_be_awaited_more_than_once() {
        let command = Command::new("true");
        let handle = PlayerHandle::spawn(
            command,
            "true",
            Endpoint::Socket(PathBuf::from("/nonexistent/sock")),
            None,
            Duration::from_millis(50),
        )
        .unwrap();

        let first = handle.wait_exit().await;
        assert_eq!(handle.wait_exit().await, first);
        assert!(first.success);
    }

    #[tokio::test]
    async fn force_stop_terminates_and_removes_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sleeper(&dir);
        let channel = FakeChannel::default();
        assert!(!handle.has_exited());

        handle.force_stop(&channel).await;

        assert!(handle.has_exited());
        assert_eq!(channel.calls(), ["quit"]);
        assert!(!dir.path().join("mpv.sock").exists());
    }

    #[tokio::test]
    async fn force_stop_twice_matches_once() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sleeper(&dir);
        let channel = FakeChannel::default();

        handle.force_stop(&channel).await;
        let first = handle.exit_status();
        handle.force_stop(&channel).await;

        assert_eq!(handle.exit_status(), first);
        assert!(handle.has_exited());
        assert_eq!(channel.calls(), ["quit"]);
        assert!(!dir.path().join("mpv.sock").exists());
    }

    #[tokio::test]
    async fn wait_ready_gives_up_after_limit() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sleeper(&dir);
        let channel = FakeChannel::default();

        let started = Instant::now();
        assert!(!handle.wait_ready(&channel, Duration::from_millis(250)).await);
        assert!(started.elapsed() < Duration::from_secs(2));

        handle.force_stop(&channel).await;
    }
}
