//! The render/input/dispatch loop that runs while a track plays.

use crate::control::ControlChannel;
use crate::history::SharedHistory;
use crate::input::{InputEvent, InputSource, Intent, ModeGuard, RawMode, TerminalInput, TerminalMode};
use crate::player::PlayerHandle;
use crate::ui::{draw_ui, UiState};
use crate::visualizer::Visualizer;
use log::{debug, info, warn};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    NaturalFinish,
    UserQuit,
    UserStop,
    Interrupted,
}

/// The first exit reason recorded for a session; later ones are ignored.
#[derive(Debug, Clone, Default)]
pub struct ExitLatch(Arc<Mutex<Option<ExitReason>>>);

impl ExitLatch {
    /// Records `reason` unless another one got there first, and returns the winner.
    pub fn record(&self, reason: ExitReason) -> ExitReason {
        let mut slot = match self.0.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot.get_or_insert(reason)
    }

    pub fn get(&self) -> Option<ExitReason> {
        match self.0.lock() {
            Ok(slot) => *slot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub tick: Duration,
    pub volume_step: u8,
    pub seek_step: i64,
}

/// Everything the loop needs from the terminal.
pub struct Console<B: Backend> {
    pub terminal: Terminal<B>,
    pub input: Box<dyn InputSource>,
    pub mode: Box<dyn TerminalMode>,
}

impl Console<CrosstermBackend<Stdout>> {
    pub fn stdio() -> io::Result<Self> {
        Ok(Self {
            terminal: Terminal::new(CrosstermBackend::new(io::stdout()))?,
            input: Box::new(TerminalInput),
            mode: Box::new(RawMode),
        })
    }
}

pub struct StatusLoop<B: Backend> {
    channel: Arc<dyn ControlChannel>,
    player: Arc<PlayerHandle>,
    terminal: Terminal<B>,
    input: Box<dyn InputSource>,
    mode: Option<Box<dyn TerminalMode>>,
    history: Option<SharedHistory>,
    settings: LoopSettings,
    ui: UiState,
    visualizer: Visualizer,
    latch: ExitLatch,
    stop: watch::Receiver<bool>,
    stopping: bool,
    pending: JoinSet<()>,
}

impl<B: Backend> StatusLoop<B> {
    pub fn new(
        channel: Arc<dyn ControlChannel>,
        player: Arc<PlayerHandle>,
        console: Console<B>,
        settings: LoopSettings,
        latch: ExitLatch,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            channel,
            player,
            terminal: console.terminal,
            input: console.input,
            mode: Some(console.mode),
            history: None,
            settings,
            ui: UiState::new(None, None),
            visualizer: Visualizer::disabled(),
            latch,
            stop,
            stopping: false,
            pending: JoinSet::new(),
        }
    }

    pub fn with_title(mut self, title: Option<String>, expected_length: Option<Duration>) -> Self {
        self.ui = UiState::new(title, expected_length);
        self
    }

    pub fn with_history(mut self, history: Option<SharedHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_visualizer(mut self, visualizer: Visualizer) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }

    /// Runs ticks until the track ends, the user leaves, or the session says stop.
    pub async fn run(mut self) -> ExitReason {
        self.drive().await
    }

    /// Same as `run`, but leaves the loop around so its last frame can be read.
    ///
    /// The terminal mode is held for exactly the duration of this call.
    pub async fn drive(&mut self) -> ExitReason {
        let _guard = self.mode.take().and_then(|mode| match ModeGuard::acquire(mode) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!("Could not switch terminal to raw mode: {e}");
                None
            }
        });

        let reason = loop {
            let started = Instant::now();
            if let Some(reason) = self.tick().await {
                break reason;
            }
            self.rest(started + self.settings.tick).await;
        };

        // in-flight control requests are each bounded by the channel timeout
        while self.pending.join_next().await.is_some() {}
        info!("Status loop finished: {reason:?}");
        reason
    }

    async fn tick(&mut self) -> Option<ExitReason> {
        let signalled = *self.stop.borrow();
        if self.stopping || signalled || self.player.has_exited() {
            return Some(self.latch.record(ExitReason::NaturalFinish));
        }

        let status = self.channel.get_status().await;
        self.ui.observe(status);
        self.ui.spectrum = self.visualizer.view();
        if let Err(e) = draw_ui(&mut self.terminal, &self.ui) {
            debug!("Frame render failed: {e}");
        }

        while self.pending.try_join_next().is_some() {}

        match self.input.poll(Duration::ZERO)? {
            InputEvent::Intent(intent) => self.dispatch(intent).await,
            InputEvent::Interrupt => Some(self.finish(ExitReason::Interrupted).await),
        }
    }

    async fn rest(&mut self, deadline: Instant) {
        tokio::select! {
            () = sleep_until(deadline) => {}
            changed = self.stop.changed() => {
                if changed.is_err() {
                    // session dropped its end; nobody is waiting on us any more
                    self.stopping = true;
                }
            }
        }
    }

    async fn dispatch(&mut self, intent: Intent) -> Option<ExitReason> {
        debug!("Dispatching {intent:?}");
        match intent {
            Intent::Quit => Some(self.finish(ExitReason::UserQuit).await),
            Intent::Stop => Some(self.finish(ExitReason::UserStop).await),
            Intent::DeleteLastHistory => {
                self.forget_last();
                None
            }
            Intent::VolumeUp
            | Intent::VolumeDown
            | Intent::SeekForward
            | Intent::SeekBackward
            | Intent::TogglePause => {
                self.send(intent);
                None
            }
        }
    }

    fn send(&mut self, intent: Intent) {
        let channel = Arc::clone(&self.channel);
        let LoopSettings {
            volume_step,
            seek_step,
            ..
        } = self.settings;
        self.pending.spawn(async move {
            let applied = match intent {
                Intent::VolumeUp => channel.volume_up(volume_step).await,
                Intent::VolumeDown => channel.volume_down(volume_step).await,
                Intent::SeekForward => channel.seek(seek_step).await,
                Intent::SeekBackward => channel.seek(-seek_step).await,
                Intent::TogglePause => channel.pause().await,
                _ => true,
            };
            if !applied {
                debug!("{intent:?} was not applied by the player");
            }
        });
    }

    fn forget_last(&mut self) {
        let Some(history) = self.history.clone() else {
            return;
        };
        self.pending.spawn_blocking(move || {
            let mut history = match history.lock() {
                Ok(history) => history,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Err(e) = history.delete_last() {
                warn!("Could not update history: {e}");
            }
        });
    }

    async fn finish(&mut self, reason: ExitReason) -> ExitReason {
        let reason = self.latch.record(reason);
        self.player.force_stop(self.channel.as_ref()).await;
        reason
    }
}
