//! Keyboard input and the terminal mode it needs.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute,
};
use std::io;
use std::time::Duration;

/// A normalized user action from one keystroke or escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    VolumeUp,
    VolumeDown,
    SeekForward,
    SeekBackward,
    TogglePause,
    Quit,
    Stop,
    DeleteLastHistory,
}

impl Intent {
    /// Letter shortcuts, case-insensitive.
    pub fn from_char(c: char) -> Option<Intent> {
        match c.to_ascii_lowercase() {
            'i' => Some(Intent::VolumeUp),
            'o' => Some(Intent::VolumeDown),
            'l' => Some(Intent::SeekForward),
            'k' => Some(Intent::SeekBackward),
            'p' | ' ' => Some(Intent::TogglePause),
            'q' => Some(Intent::Quit),
            's' => Some(Intent::Stop),
            'r' => Some(Intent::DeleteLastHistory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Intent(Intent),
    /// Ctrl-C, which raw mode delivers as a key instead of a signal.
    Interrupt,
}

impl InputEvent {
    pub fn from_key(key: &KeyEvent) -> Option<InputEvent> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(InputEvent::Interrupt)
            }
            KeyCode::Up => Some(InputEvent::Intent(Intent::VolumeUp)),
            KeyCode::Down => Some(InputEvent::Intent(Intent::VolumeDown)),
            KeyCode::Right => Some(InputEvent::Intent(Intent::SeekForward)),
            KeyCode::Left => Some(InputEvent::Intent(Intent::SeekBackward)),
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                Intent::from_char(c).map(InputEvent::Intent)
            }
            _ => None,
        }
    }
}

pub trait InputSource: Send {
    /// Reads at most one keystroke, waiting no longer than `timeout`.
    fn poll(&mut self, timeout: Duration) -> Option<InputEvent>;
}

/// Keys from the controlling terminal through crossterm's event reader,
/// which also decodes the `ESC [ A..D` arrow sequences.
#[derive(Debug, Default)]
pub struct TerminalInput;

impl InputSource for TerminalInput {
    fn poll(&mut self, timeout: Duration) -> Option<InputEvent> {
        match event::poll(timeout) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                log::debug!("Input poll failed: {e}");
                return None;
            }
        }
        match event::read() {
            Ok(Event::Key(key)) => InputEvent::from_key(&key),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Input read failed: {e}");
                None
            }
        }
    }
}

pub trait TerminalMode: Send {
    /// Switches to no-echo, unbuffered single-key mode.
    fn enter(&mut self) -> io::Result<()>;

    /// Returns to the mode observed before `enter`.
    fn leave(&mut self) -> io::Result<()>;
}

/// crossterm raw mode with the cursor hidden and the screen cleared.
#[derive(Debug, Default)]
pub struct RawMode;

impl TerminalMode for RawMode {
    fn enter(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, Hide, Clear(ClearType::All), MoveTo(0, 0)) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        Ok(())
    }

    fn leave(&mut self) -> io::Result<()> {
        let mut stdout = io::stdout();
        let _ = execute!(stdout, Clear(ClearType::All), MoveTo(0, 0), Show);
        disable_raw_mode()
    }
}

/// Holds a terminal mode for as long as it lives; dropping it, including
/// while unwinding, restores the previous mode.
pub struct ModeGuard {
    mode: Box<dyn TerminalMode>,
    active: bool,
}

impl ModeGuard {
    /// Enters `mode`. A failed `enter` may have switched part of the way, so
    /// the mode is left again before the error is returned.
    pub fn acquire(mode: Box<dyn TerminalMode>) -> io::Result<Self> {
        let mut guard = Self { mode, active: true };
        guard.mode.enter()?;
        Ok(guard)
    }

    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.mode.leave() {
            log::warn!("Could not restore terminal mode: {e}");
        }
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays a fixed list of events, one per poll.
    #[derive(Debug, Default)]
    pub struct ScriptedInput {
        pub events: VecDeque<Option<InputEvent>>,
    }

    impl ScriptedInput {
        pub fn new(events: impl IntoIterator<Item = Option<InputEvent>>) -> Self {
            Self {
                events: events.into_iter().collect(),
            }
        }
    }

    impl InputSource for ScriptedInput {
        fn poll(&mut self, _timeout: Duration) -> Option<InputEvent> {
            self.events.pop_front().flatten()
        }
    }

    /// Records whether the fake terminal is currently in raw mode.
    #[derive(Debug, Clone, Default)]
    pub struct FakeMode {
        pub raw: Arc<AtomicBool>,
        pub leaves: Arc<AtomicUsize>,
        /// Switch to raw, then fail the rest of the setup.
        pub fail_enter: bool,
    }

    impl TerminalMode for FakeMode {
        fn enter(&mut self) -> io::Result<()> {
            self.raw.store(true, Ordering::SeqCst);
            if self.fail_enter {
                return Err(io::Error::other("screen setup failed"));
            }
            Ok(())
        }

        fn leave(&mut self) -> io::Result<()> {
            self.raw.store(false, Ordering::SeqCst);
            self.leaves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
