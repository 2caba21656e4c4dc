//! Terminal front end for an external audio player: spawns mpv or VLC on a
//! resolved stream, renders its status, and forwards keystrokes as control
//! requests until the track ends or the user leaves.

pub mod config;
pub mod control;
pub mod error;
pub mod history;
pub mod input;
pub mod player;
pub mod resolve;
pub mod session;
pub mod status_loop;
pub mod ui;
pub mod visualizer;

pub use error::{Error, Result};
