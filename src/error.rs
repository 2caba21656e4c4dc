use flexi_logger::FlexiLoggerError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to launch {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("could not resolve \"{0}\" to a playable URL")]
    ResolutionFailed(String),

    #[error("I/O operation failed: {0}")]
    Io(#[from] io::Error),

    #[error("config parsing error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("logger initialization error: {0}")]
    Logger(#[from] FlexiLoggerError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("audio capture unavailable: {0}")]
    AudioCapture(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}
