use clap::Parser;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{info, warn};
use ratatui::backend::Backend;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use ytmcli::config::{self, Config};
use ytmcli::history::{History, SharedHistory};
use ytmcli::player::PlayerKind;
use ytmcli::resolve::resolve;
use ytmcli::session::{Outcome, PlaybackSession};
use ytmcli::status_loop::Console;
use ytmcli::{Error, Result};

#[derive(Parser)]
#[command(
    name = "ytmcli",
    about = "Search YouTube Music and play the result in the terminal.",
    version
)]
struct Cli {
    /// Song to play once; without it, songs are asked for in a loop
    query: Vec<String>,

    #[arg(short, long, value_enum, help = "Player backend to drive")]
    player: Option<PlayerKind>,

    #[arg(short, long, help = "Config file (default ~/.ytmcli/config.toml)")]
    config: Option<PathBuf>,

    #[arg(long, help = "Log level or flexi_logger spec, e.g. debug")]
    log_level: Option<String>,

    #[arg(long, action = clap::ArgAction::SetTrue, help = "Print the search history and exit")]
    history: bool,
}

fn start_logger(level: &str, dir: &Path) -> Result<LoggerHandle> {
    Ok(Logger::try_with_str(level)?
        .log_to_file(FileSpec::default().directory(dir))
        .rotate(
            Criterion::Size(1_000_000),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(3),
        )
        .duplicate_to_stderr(Duplicate::None)
        .start()?)
}

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: could not start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let code = match runtime.block_on(run()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    };
    // a prompt read interrupted by Ctrl-C is still parked on stdin
    runtime.shutdown_background();
    code
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let data_dir = config::data_dir()?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join("config.toml"));
    let mut config = Config::load(&config_path).await?;
    if let Some(player) = cli.player {
        config.player = player;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let log_dir = data_dir.join("logs");
    tokio::fs::create_dir_all(&log_dir).await?;
    let _logger = start_logger(&config.log_level, &log_dir)?;
    info!("Starting with {config:?}");

    let history_path = data_dir.join("history");
    let limit = config.history_limit;
    let history = tokio::task::spawn_blocking(move || History::open(history_path, limit)).await??;
    if cli.history {
        for entry in history.all() {
            println!("{entry}");
        }
        return Ok(ExitCode::SUCCESS);
    }
    let history: SharedHistory = Arc::new(Mutex::new(history));

    let mut session = PlaybackSession::new(&config, Some(Arc::clone(&history)), Console::stdio);

    if !cli.query.is_empty() {
        let query = cli.query.join(" ");
        let outcome = play_query(&mut session, &history, &query).await;
        session.shutdown().await;
        return match outcome? {
            Some(outcome) => {
                report(outcome);
                Ok(ExitCode::SUCCESS)
            }
            None => Ok(ExitCode::FAILURE),
        };
    }

    let result = prompt_loop(&mut session, &history).await;
    session.shutdown().await;
    result.map(|()| ExitCode::SUCCESS)
}

async fn prompt_loop<B: Backend + Send + 'static>(
    session: &mut PlaybackSession<B>,
    history: &SharedHistory,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Enter song: ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Ok(()) = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            return Ok(());
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }

        match play_query(session, history, query).await? {
            Some(outcome @ (Outcome::UserQuit | Outcome::Interrupted)) => {
                report(outcome);
                return Ok(());
            }
            Some(outcome) => report(outcome),
            None => {}
        }
    }
}

/// Resolves and plays one query. `None` means nothing playable was found.
async fn play_query<B: Backend + Send + 'static>(
    session: &mut PlaybackSession<B>,
    history: &SharedHistory,
    query: &str,
) -> Result<Option<Outcome>> {
    println!("Searching for \"{query}\"...");
    let resolved = match resolve(query).await {
        Ok(resolved) => resolved,
        Err(Error::ResolutionFailed(_)) => {
            warn!("Nothing playable for \"{query}\"");
            eprintln!("No playable result for \"{query}\"");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let recorded = {
        let history = Arc::clone(history);
        let entry = query.to_string();
        tokio::task::spawn_blocking(move || match history.lock() {
            Ok(mut history) => history.add(&entry),
            Err(poisoned) => poisoned.into_inner().add(&entry),
        })
        .await?
    };
    if let Err(e) = recorded {
        warn!("Could not save history: {e}");
    }

    info!("Playing {:?} from {}", resolved.title, resolved.url);
    let outcome = session
        .play(&resolved.url, resolved.title, resolved.duration)
        .await?;
    Ok(Some(outcome))
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Finished => println!("Playback finished"),
        Outcome::UserStop => println!("Playback stopped"),
        Outcome::UserQuit => println!("Bye"),
        Outcome::Interrupted => println!("Stopping (Ctrl+C)..."),
        Outcome::Crashed => eprintln!("The player stopped unexpectedly, see ~/.ytmcli/logs"),
    }
}
