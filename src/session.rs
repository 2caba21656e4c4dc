//! One track from spawn to cleanup.

use crate::config::Config;
use crate::control::ControlChannel;
use crate::error::Result;
use crate::history::SharedHistory;
use crate::player::{PlayerExit, PlayerHandle, PlayerProcess};
use crate::status_loop::{Console, ExitLatch, ExitReason, LoopSettings, StatusLoop};
use crate::visualizer::Visualizer;
use log::{error, info, warn};
use ratatui::backend::Backend;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    UserQuit,
    UserStop,
    Crashed,
    Interrupted,
}

impl Outcome {
    /// Classifies a finished session from the loop's reason (None if the loop
    /// itself failed) and the player's exit status.
    pub fn decide(reason: Option<ExitReason>, exit: Option<PlayerExit>) -> Outcome {
        match reason {
            Some(ExitReason::UserQuit) => Outcome::UserQuit,
            Some(ExitReason::UserStop) => Outcome::UserStop,
            Some(ExitReason::Interrupted) => Outcome::Interrupted,
            Some(ExitReason::NaturalFinish) if exit.is_some_and(|exit| exit.success) => {
                Outcome::Finished
            }
            Some(ExitReason::NaturalFinish) | None => Outcome::Crashed,
        }
    }
}

type ConsoleFactory<B> = Box<dyn FnMut() -> io::Result<Console<B>> + Send>;

enum FirstDone {
    Loop(std::result::Result<ExitReason, tokio::task::JoinError>),
    PlayerExited,
    Interrupted,
}

pub struct PlaybackSession<B: Backend> {
    process: PlayerProcess,
    settings: LoopSettings,
    request_timeout: Duration,
    startup_timeout: Duration,
    visualizer: bool,
    history: Option<SharedHistory>,
    console: ConsoleFactory<B>,
    current: Option<(Arc<PlayerHandle>, Arc<dyn ControlChannel>)>,
}

impl<B: Backend + Send + 'static> PlaybackSession<B> {
    pub fn new(
        config: &Config,
        history: Option<SharedHistory>,
        console: impl FnMut() -> io::Result<Console<B>> + Send + 'static,
    ) -> Self {
        Self {
            process: PlayerProcess {
                kind: config.player,
                program: config.player_program().to_string(),
                volume: config.initial_volume,
                vlc_port: config.vlc_port,
                grace: config.stop_grace(),
            },
            settings: LoopSettings {
                tick: config.tick(),
                volume_step: config.volume_step,
                seek_step: config.seek_step_secs,
            },
            request_timeout: config.request_timeout(),
            startup_timeout: config.startup_timeout(),
            visualizer: config.visualizer,
            history,
            console: Box::new(console),
            current: None,
        }
    }

    /// Plays `url` until the track ends or the user leaves it.
    ///
    /// Only a player that cannot be launched is an error; everything after
    /// the spawn is reported through the returned [`Outcome`]. The status
    /// loop has been joined and the player stopped by the time this returns.
    pub async fn play(
        &mut self,
        url: &str,
        title: Option<String>,
        expected_length: Option<Duration>,
    ) -> Result<Outcome> {
        self.shutdown().await;

        // listening before the spawn keeps a Ctrl-C during startup from being lost
        let mut ctrl_c = signal(SignalKind::interrupt())?;
        let player = Arc::new(self.process.start(url)?);
        let channel = match player.endpoint().connect(self.request_timeout) {
            Ok(channel) => channel,
            Err(e) => {
                // dropping the last handle kills the process and its scratch dir
                drop(player);
                return Err(e);
            }
        };
        self.current = Some((Arc::clone(&player), Arc::clone(&channel)));

        let interrupted = tokio::select! {
            biased;
            _ = ctrl_c.recv() => true,
            ready = player.wait_ready(channel.as_ref(), self.startup_timeout) => {
                if !ready {
                    warn!("Player control endpoint not ready, status will show as unknown");
                }
                false
            }
        };
        if interrupted {
            info!("Interrupted while the player was starting");
            self.shutdown().await;
            return Ok(Outcome::Interrupted);
        }

        let console = match (self.console)() {
            Ok(console) => console,
            Err(e) => {
                self.shutdown().await;
                return Err(e.into());
            }
        };

        let latch = ExitLatch::default();
        let (stop_tx, stop_rx) = watch::channel(false);
        let status_loop = StatusLoop::new(
            Arc::clone(&channel),
            Arc::clone(&player),
            console,
            self.settings,
            latch.clone(),
            stop_rx,
        )
        .with_title(title, expected_length)
        .with_history(self.history.clone())
        .with_visualizer(if self.visualizer {
            Visualizer::start()
        } else {
            Visualizer::disabled()
        });
        let mut running = tokio::spawn(status_loop.run());

        // a Ctrl-C that also took the player down still counts as Ctrl-C
        let first = tokio::select! {
            biased;
            _ = ctrl_c.recv() => FirstDone::Interrupted,
            joined = &mut running => FirstDone::Loop(joined),
            _ = player.wait_exit() => FirstDone::PlayerExited,
        };

        let joined = match first {
            FirstDone::Loop(joined) => joined,
            FirstDone::Interrupted => {
                latch.record(ExitReason::Interrupted);
                player.force_stop(channel.as_ref()).await;
                let _ = stop_tx.send(true);
                running.await
            }
            FirstDone::PlayerExited => {
                let _ = stop_tx.send(true);
                running.await
            }
        };

        let reason = match joined {
            Ok(reason) => Some(reason),
            Err(e) => {
                error!("Status loop failed: {e}");
                None
            }
        };

        self.shutdown().await;
        let outcome = Outcome::decide(reason, player.exit_status());
        info!("Session ended: {outcome:?} (player exit {:?})", player.exit_status());
        Ok(outcome)
    }

    /// Stops the current player, if any. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if let Some((player, channel)) = self.current.take() {
            player.force_stop(channel.as_ref()).await;
        }
    }
}
