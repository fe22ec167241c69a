use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use stepwise::narration::{CommandNarrator, Narrator, SilentNarrator};
use stepwise::pipeline::{
    review_code, DeepRequestOutcome, OrchestratorSettings, OrchestratorUpdate, PlayState,
    SessionEvent, SessionSettings, TraceSession,
};
use stepwise::trace::{store, CodeIssue, DecodeOptions, Decoder, LiveGuesser};
use stepwise::{oracle, util, Config, ResultCache, SavedTrace, SourceId, TraceFrame};

/// Watch a program think: streamed execution traces with narrated playback.
#[derive(Parser)]
#[command(name = "stepwise", version, about)]
struct Cli {
    /// Data directory (default: ~/.stepwise)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the oracle for an execution trace of a source file.
    Simulate {
        file: PathBuf,

        /// Captured program output to include in the request
        #[arg(long)]
        output: Option<PathBuf>,

        /// Skip the cache and overwrite it
        #[arg(long)]
        force: bool,

        /// Play the trace back after it arrives
        #[arg(long)]
        play: bool,

        #[arg(long)]
        no_narration: bool,

        /// Save the trace under this title
        #[arg(long)]
        save: Option<String>,
    },

    /// Decode a saved oracle response without calling the oracle.
    Decode {
        file: PathBuf,

        /// Decode code issues instead of trace frames
        #[arg(long)]
        issues: bool,
    },

    /// Show the live guess for the last line of a file.
    Guess { file: PathBuf },

    /// Ask the oracle to review a source file.
    Review { file: PathBuf },

    /// List saved traces, newest first.
    Saved,

    /// Play back a saved trace.
    Replay {
        saved: PathBuf,

        #[arg(long)]
        no_narration: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir);

    // Initialize logging to file (~/.stepwise/logs/stepwise.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Simulate {
            file,
            output,
            force,
            play,
            no_narration,
            save,
        } => simulate(&config, &file, output.as_deref(), force, play, no_narration, save).await,
        Commands::Decode { file, issues } => decode(&config, &file, issues),
        Commands::Guess { file } => guess(&config, &file),
        Commands::Review { file } => review(&config, &file).await,
        Commands::Saved => list_saved(),
        Commands::Replay {
            saved,
            no_narration,
        } => replay(&config, &saved, no_narration).await,
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn source_id(path: &Path) -> SourceId {
    SourceId::new(path.display().to_string())
}

fn narrator(config: &Config, no_narration: bool) -> Arc<dyn Narrator> {
    if no_narration || !config.playback.narration {
        Arc::new(SilentNarrator)
    } else {
        Arc::new(CommandNarrator::new())
    }
}

fn print_frame(frame: &TraceFrame) {
    println!(
        "{:>3}  {:<9} {}",
        frame.sequence_index,
        frame.action.as_str(),
        frame.description
    );
}

async fn simulate(
    config: &Config,
    file: &Path,
    output: Option<&Path>,
    force: bool,
    play: bool,
    no_narration: bool,
    save: Option<String>,
) -> Result<()> {
    let code = read_source(file)?;
    let captured_output = output.map(read_source).transpose()?;
    let id = source_id(file);

    let oracle = oracle::from_config(&config.oracle)?;
    if !oracle.is_available() {
        bail!("Oracle '{}' is not available", oracle.name());
    }

    let mut session = TraceSession::new(
        id.clone(),
        Arc::new(ResultCache::new()),
        oracle,
        narrator(config, no_narration),
        SessionSettings::from_config(config),
    );
    session.load_code(code);
    session.set_captured_output(captured_output);

    match session.run_deep(force) {
        DeepRequestOutcome::Started { .. } => eprintln!("Simulating {}...", file.display()),
        DeepRequestOutcome::CoolingDown { remaining } => {
            bail!("Rate limited, try again in {}s", remaining.as_secs())
        }
        _ => {}
    }

    if let Some(OrchestratorUpdate::Failed(error)) = session.settle().await {
        bail!(error);
    }

    let frames = session.snapshot().frames;
    if frames.is_empty() {
        bail!("No trace available");
    }
    frames.iter().for_each(print_frame);

    if let Some(title) = save {
        let saved = SavedTrace::new(title, "simulation", Some(id), frames.to_vec());
        let path = saved.save()?;
        eprintln!("Saved to {}", path.display());
    }

    if play {
        play_through(&mut session).await;
    }
    Ok(())
}

async fn play_through(session: &mut TraceSession) {
    println!();
    if let Some(frame) = session.snapshot().current_frame() {
        print_frame(frame);
    }
    let mut shown = session.playback().index();

    session.toggle_play();
    while session.playback().state() == PlayState::Playing {
        if let SessionEvent::Playback { index, .. } = session.step().await {
            if index != shown {
                shown = index;
                if let Some(frame) = session.snapshot().current_frame() {
                    print_frame(frame);
                }
            }
        }
    }
    session.close();
}

fn decode(config: &Config, file: &Path, issues: bool) -> Result<()> {
    let text = read_source(file)?;
    let decoder = Decoder::new(DecodeOptions {
        max_backtrack: config.max_backtrack,
    });

    let json = if issues {
        let issues = decoder
            .decode::<CodeIssue>(&text)
            .into_result()
            .map_err(|reason| anyhow!("Could not decode issues: {reason}"))?;
        serde_json::to_string_pretty(&issues)?
    } else {
        let frames = decoder
            .decode_frames(&text)
            .into_result()
            .map_err(|reason| anyhow!("Could not decode trace: {reason}"))?;
        serde_json::to_string_pretty(&frames)?
    };
    println!("{json}");
    Ok(())
}

fn guess(config: &Config, file: &Path) -> Result<()> {
    let text = read_source(file)?;
    match LiveGuesser::new(config.live.assumed_items.clone()).guess(&text) {
        Some(frame) => println!("{}", serde_json::to_string_pretty(&frame)?),
        None => eprintln!("Nothing to guess from the last line"),
    }
    Ok(())
}

async fn review(config: &Config, file: &Path) -> Result<()> {
    let code = read_source(file)?;
    let oracle = oracle::from_config(&config.oracle)?;
    if !oracle.is_available() {
        bail!("Oracle '{}' is not available", oracle.name());
    }

    let settings = OrchestratorSettings::from_config(config);
    let issues = review_code(oracle.as_ref(), source_id(file), &code, &settings).await?;
    if issues.is_empty() {
        println!("No issues found");
    }
    for issue in issues {
        println!("{}:{} [{}] {}", file.display(), issue.line, issue.severity, issue.message);
        if !issue.suggestion.is_empty() {
            println!("    {}", issue.suggestion);
        }
    }
    Ok(())
}

fn list_saved() -> Result<()> {
    for (path, saved) in store::list_saved(&util::traces_dir())? {
        println!(
            "{}  {:<24} {:<12} {:>3} frames  {}",
            saved.saved_at.format("%Y-%m-%d %H:%M"),
            saved.title,
            saved.kind,
            saved.frames.len(),
            path.display()
        );
    }
    Ok(())
}

async fn replay(config: &Config, path: &Path, no_narration: bool) -> Result<()> {
    let saved = SavedTrace::load(path)?;
    println!("{} ({}, {} frames)", saved.title, saved.kind, saved.frames.len());

    let id = saved
        .source_id
        .clone()
        .unwrap_or_else(|| SourceId::new(saved.id.to_string()));
    let mut session = TraceSession::new(
        id,
        Arc::new(ResultCache::new()),
        oracle::from_config(&config.oracle)?,
        narrator(config, no_narration),
        SessionSettings::from_config(config),
    );
    session.replay(saved);
    play_through(&mut session).await;
    Ok(())
}
