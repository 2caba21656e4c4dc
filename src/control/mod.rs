//! Out-of-band control of a running player.
//!
//! Every operation is one bounded request/response exchange. Failures never
//! leave this module: they are logged and reported as `None` or `false`, so a
//! slow or half-started player can not take the status loop down with it.

mod mpv;
mod vlc;

pub use mpv::MpvIpc;
pub use vlc::VlcHttp;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Upper bound of the native volume range that volume intents may request.
pub const MAX_NATIVE_VOLUME: f64 = 100.0;

/// Display units per native volume unit (100% native == 256 display).
pub const DISPLAY_PER_NATIVE: f64 = 2.56;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
    #[default]
    Unknown,
}

impl PlayState {
    pub fn label(self) -> &'static str {
        match self {
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
            PlayState::Stopped => "stopped",
            PlayState::Unknown => "unknown",
        }
    }
}

/// One status snapshot. `volume` is in display units (0..=256 at 100%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub position: Duration,
    pub length: Duration,
    pub state: PlayState,
    pub volume: u16,
}

#[async_trait]
pub trait ControlChannel: Send + Sync + fmt::Debug {
    /// Latest status, or `None` when the endpoint could not be read this time.
    async fn get_status(&self) -> Option<Status>;

    /// Toggles between playing and paused.
    async fn pause(&self) -> bool;

    async fn volume_up(&self, step: u8) -> bool;

    async fn volume_down(&self, step: u8) -> bool;

    /// Relative seek; negative values go backwards. The player clamps to the track.
    async fn seek(&self, delta_secs: i64) -> bool;

    /// Asks the player to exit. Does not wait for the process.
    async fn quit(&self) -> bool;
}

#[derive(Debug, Error)]
pub(crate) enum ChannelError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(#[source] io::Error),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("connection closed by player")]
    Closed,

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<serde_json::Error> for ChannelError {
    fn from(error: serde_json::Error) -> Self {
        ChannelError::Malformed(error.to_string())
    }
}

/// Applies a volume step in native units. Steps up stop at `MAX_NATIVE_VOLUME`;
/// steps down from an amplified level go down by `delta`, never below zero.
pub fn step_volume(native: f64, delta: f64) -> f64 {
    let target = native + delta;
    let target = if delta > 0.0 {
        target.min(MAX_NATIVE_VOLUME)
    } else {
        target
    };
    target.max(0.0)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn display_volume(native: f64) -> u16 {
    (native.max(0.0) * DISPLAY_PER_NATIVE).round() as u16
}

pub fn native_volume(display: f64) -> f64 {
    display / DISPLAY_PER_NATIVE
}

pub(crate) async fn bounded<T, F>(limit: Duration, exchange: F) -> Result<T, ChannelError>
where
    F: Future<Output = Result<T, ChannelError>>,
{
    tokio::time::timeout(limit, exchange)
        .await
        .unwrap_or(Err(ChannelError::Timeout))
}

/// Logs a failed exchange and degrades it to `None`.
pub(crate) fn settle<T>(operation: &str, result: Result<T, ChannelError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("{operation} failed: {e}");
            None
        }
    }
}

pub(crate) fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_steps_stay_inside_native_range() {
        assert_eq!(step_volume(95.0, 10.0), 100.0);
        assert_eq!(step_volume(5.0, -10.0), 0.0);
        assert_eq!(step_volume(40.0, 10.0), 50.0);
    }

    #[test]
    fn amplified_volume_is_never_raised_further() {
        assert_eq!(step_volume(130.0, 10.0), 100.0);
    }

    #[test]
    fn amplified_volume_steps_down_by_one_step() {
        assert_eq!(step_volume(125.0, -10.0), 115.0);
        assert_eq!(step_volume(105.0, -10.0), 95.0);
    }

    #[test]
    fn repeated_steps_never_leave_range() {
        let mut volume = 50.0;
        for delta in [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, -10.0, -10.0] {
            volume = step_volume(volume, delta);
            assert!((0.0..=MAX_NATIVE_VOLUME).contains(&volume));
        }
        assert_eq!(volume, 80.0);
        for _ in 0..20 {
            volume = step_volume(volume, -10.0);
        }
        assert_eq!(volume, 0.0);
    }

    #[test]
    fn display_scale_is_two_point_five_six() {
        assert_eq!(display_volume(100.0), 256);
        assert_eq!(display_volume(50.0), 128);
        assert_eq!(display_volume(-3.0), 0);
        assert!((native_volume(256.0) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_and_nan_seconds_are_zero() {
        assert_eq!(seconds(-1.0), Duration::ZERO);
        assert_eq!(seconds(f64::NAN), Duration::ZERO);
        assert_eq!(seconds(2.5), Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn bounded_exchange_times_out() {
        let result: Result<(), ChannelError> = bounded(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ChannelError::Timeout)));
    }
}
