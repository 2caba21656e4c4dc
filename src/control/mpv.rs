use super::{
    bounded, display_volume, seconds, settle, step_volume, ChannelError, ControlChannel,
    PlayState, Status,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

#[derive(Serialize)]
struct Request<'a> {
    command: &'a [Value],
    request_id: u64,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    request_id: Option<u64>,
    #[serde(default)]
    event: Option<String>,
}

impl Reply {
    fn succeeded(&self) -> bool {
        self.error.as_deref() == Some("success")
    }
}

/// mpv's JSON IPC over the `--input-ipc-server` Unix socket.
///
/// One connection is kept open and shared; the mutex keeps a single
/// request/response in flight. Any failure drops the connection so the next
/// exchange starts from a clean stream.
#[derive(Debug)]
pub struct MpvIpc {
    socket: PathBuf,
    timeout: Duration,
    conn: Mutex<Option<BufReader<UnixStream>>>,
    next_id: AtomicU64,
}

impl MpvIpc {
    pub fn new(socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            timeout,
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn exchange(&self, command: &[Value]) -> Result<Reply, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.conn.lock().await;
        let result = bounded(
            self.timeout,
            round_trip(&mut conn, &self.socket, command, id),
        )
        .await;
        if result.is_err() {
            *conn = None;
        }
        result
    }

    async fn get_property(&self, name: &str) -> Result<Option<Value>, ChannelError> {
        let reply = self.exchange(&[json!("get_property"), json!(name)]).await?;
        if reply.succeeded() {
            Ok(reply.data)
        } else {
            // e.g. "property unavailable" for time-pos before anything is loaded
            Ok(None)
        }
    }

    async fn command(&self, operation: &str, command: &[Value]) -> bool {
        settle(operation, self.exchange(command).await)
            .is_some_and(|reply| reply.succeeded())
    }

    async fn read_status(&self) -> Result<Status, ChannelError> {
        let pause = self.get_property("pause").await?;
        let time_pos = self.get_property("time-pos").await?;
        let duration = self.get_property("duration").await?;
        let volume = self.get_property("volume").await?;
        Ok(status_from_properties(
            pause.and_then(|v| v.as_bool()),
            time_pos.and_then(|v| v.as_f64()),
            duration.and_then(|v| v.as_f64()),
            volume.and_then(|v| v.as_f64()),
        ))
    }

    async fn step(&self, delta: f64) -> bool {
        let current = settle("mpv volume read", self.get_property("volume").await)
            .flatten()
            .and_then(|v| v.as_f64());
        let Some(current) = current else {
            return false;
        };
        let target = step_volume(current, delta);
        self.command(
            "mpv volume write",
            &[json!("set_property"), json!("volume"), json!(target)],
        )
        .await
    }
}

async fn round_trip(
    conn: &mut Option<BufReader<UnixStream>>,
    socket: &Path,
    command: &[Value],
    id: u64,
) -> Result<Reply, ChannelError> {
    if conn.is_none() {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(ChannelError::Unreachable)?;
        *conn = Some(BufReader::new(stream));
    }
    let Some(stream) = conn.as_mut() else {
        return Err(ChannelError::Closed);
    };

    let mut line = serde_json::to_string(&Request {
        command,
        request_id: id,
    })?;
    line.push('\n');
    stream
        .get_mut()
        .write_all(line.as_bytes())
        .await
        .map_err(ChannelError::Unreachable)?;

    let mut buf = String::new();
    loop {
        buf.clear();
        let read = stream
            .read_line(&mut buf)
            .await
            .map_err(ChannelError::Unreachable)?;
        if read == 0 {
            return Err(ChannelError::Closed);
        }
        let text = buf.trim();
        if text.is_empty() {
            continue;
        }
        let reply: Reply = serde_json::from_str(text)?;
        if reply.event.is_some() || reply.request_id != Some(id) {
            continue;
        }
        return Ok(reply);
    }
}

fn status_from_properties(
    pause: Option<bool>,
    time_pos: Option<f64>,
    duration: Option<f64>,
    volume: Option<f64>,
) -> Status {
    let state = match (time_pos, pause) {
        (None, _) => PlayState::Stopped,
        (Some(_), Some(true)) => PlayState::Paused,
        (Some(_), Some(false)) => PlayState::Playing,
        (Some(_), None) => PlayState::Unknown,
    };
    Status {
        position: seconds(time_pos.unwrap_or(0.0)),
        length: seconds(duration.unwrap_or(0.0)),
        state,
        volume: display_volume(volume.unwrap_or(100.0)),
    }
}

#[async_trait]
impl ControlChannel for MpvIpc {
    async fn get_status(&self) -> Option<Status> {
        // the whole four-property read shares one deadline
        settle("mpv status", bounded(self.timeout, self.read_status()).await)
    }

    async fn pause(&self) -> bool {
        self.command("mpv pause", &[json!("cycle"), json!("pause")])
            .await
    }

    async fn volume_up(&self, step: u8) -> bool {
        self.step(f64::from(step)).await
    }

    async fn volume_down(&self, step: u8) -> bool {
        self.step(-f64::from(step)).await
    }

    async fn seek(&self, delta_secs: i64) -> bool {
        self.command(
            "mpv seek",
            &[json!("seek"), json!(delta_secs), json!("relative")],
        )
        .await
    }

    async fn quit(&self) -> bool {
        self.command("mpv quit", &[json!("quit")]).await
    }
}
