use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;

use chatpace::config::EngineConfig;
use chatpace::coordinator::BehaviorCoordinator;
use chatpace::emotion::EmotionMap;
use chatpace::model::Timeline;
use chatpace::playback::backends::console::ConsoleBroadcaster;
use chatpace::playback::backends::memory::MemoryStore;
use chatpace::playback::{RunReport, Scheduler};
use chatpace::sim;

#[derive(Debug, Parser)]
#[command(name = "chatpace")]
#[command(about = "Human-like chat reply pacing: typing, pauses, typos and recalls", long_about = None)]
struct Cli {
    /// Log verbosity (-v info, -vv debug, -vvv trace). Logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args, Clone)]
struct EngineArgs {
    /// Engine configuration (JSON). Missing fields use defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Sticker asset root, overriding the config file.
    #[arg(long, value_name = "DIR")]
    sticker_root: Option<PathBuf>,

    /// Sticker pack directory under the asset root (repeatable).
    #[arg(long = "sticker-pack", value_name = "NAME")]
    sticker_packs: Vec<String>,

    /// Optional RNG seed (for debugging)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Args, Clone)]
struct PlaybackArgs {
    /// Conversation id used for stored records
    #[arg(long, default_value = "cli")]
    conversation: String,

    /// Sender id of the simulated participant
    #[arg(long, default_value = chatpace::session::ASSISTANT_SENDER)]
    sender: String,

    /// Disable console trace output
    #[arg(long)]
    no_trace: bool,

    /// Hide typing indicator lines in the transcript
    #[arg(long)]
    no_typing: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a timeline (JSON) for one reply
    Plan {
        /// Reply text file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Output timeline file (defaults to stdout)
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Emotion labels, as a JSON object or `label=intensity,...`
        #[arg(long, value_name = "EMOTIONS")]
        emotions: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Replay a timeline against an in-memory chat and print the transcript
    Play {
        /// Timeline file (JSON)
        #[arg(long, value_name = "PATH")]
        timeline: PathBuf,

        #[command(flatten)]
        playback: PlaybackArgs,
    },

    /// Build a timeline then immediately replay it
    Run {
        /// Reply text file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Optional output timeline file to save
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Emotion labels, as a JSON object or `label=intensity,...`
        #[arg(long, value_name = "EMOTIONS")]
        emotions: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        playback: PlaybackArgs,
    },

    /// Chat with a model; every reply is paced like a person typing
    ///
    /// Requires `--features llm` and OPENAI_API_KEY (a `.env` file is read).
    Chat {
        /// Model name
        #[arg(long, default_value_t = chatpace::llm::openai::DEFAULT_MODEL.to_string())]
        model: String,

        /// Persona description appended to the system prompt
        #[arg(long)]
        persona: Option<String>,

        /// Display name of the simulated participant
        #[arg(long)]
        name: Option<String>,

        /// Display name of the user
        #[arg(long)]
        nickname: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,

        /// Disable console trace output
        #[arg(long)]
        no_trace: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == std::ffi::OsStr::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }

    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn load_config(engine: &EngineArgs) -> Result<EngineConfig> {
    let mut config = match &engine.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(root) = &engine.sticker_root {
        config.sticker.asset_root = Some(root.clone());
    }
    if !engine.sticker_packs.is_empty() {
        config.sticker.packs = engine.sticker_packs.clone();
    }
    config.validate().context("invalid engine configuration")?;
    Ok(config)
}

/// Accepts `{"happy":"high"}` or `happy=high,sad=low`. Unknown labels are dropped.
fn parse_emotions_arg(raw: Option<&str>) -> Result<EmotionMap> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(EmotionMap::neutral());
    };

    let pairs: Vec<(String, String)> = if raw.starts_with('{') {
        let map: BTreeMap<String, String> =
            serde_json::from_str(raw).context("--emotions is not a JSON object of strings")?;
        map.into_iter().collect()
    } else {
        raw.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| {
                let (label, intensity) = part
                    .split_once('=')
                    .ok_or_else(|| anyhow!("expected label=intensity, got {part:?}"))?;
                Ok((label.trim().to_string(), intensity.trim().to_string()))
            })
            .collect::<Result<_>>()?
    };

    let emotions = EmotionMap::normalize(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if emotions.len() < pairs.len() {
        warn!(
            given = pairs.len(),
            kept = emotions.len(),
            "some emotion labels were not recognised"
        );
    }
    if emotions.is_empty() {
        return Ok(EmotionMap::neutral());
    }
    Ok(emotions)
}

fn build_timeline(input: &Path, emotions: Option<&str>, engine: &EngineArgs) -> Result<Timeline> {
    let text = read_input(input)?;
    let config = load_config(engine)?;
    let emotions = parse_emotions_arg(emotions)?;
    let mut rng = rng_from_seed(engine.seed);

    let coordinator = BehaviorCoordinator::new(&config);
    let timeline = coordinator.plan(&text, &emotions, &mut rng);

    let stats = sim::stats(&timeline);
    eprintln!(
        "Planned: {} actions, {} sends, {} recalls, {} stickers, ~{:.1}s, mood {}",
        stats.actions,
        stats.sends,
        stats.recalls,
        stats.images,
        stats.span_secs,
        timeline.mood.as_str()
    );
    Ok(timeline)
}

fn play_timeline(timeline: Timeline, playback: &PlaybackArgs) -> Result<()> {
    sim::check_invariants(&timeline.actions).context("timeline failed validation")?;

    let stats = sim::stats(&timeline);
    eprintln!(
        "Playing: {} actions, ~{:.1}s",
        stats.actions, stats.span_secs
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let (report, visible): (RunReport, usize) = runtime.block_on(async {
        let store = Arc::new(MemoryStore::new());
        let console = Arc::new(ConsoleBroadcaster::new(!playback.no_typing));
        let scheduler = Scheduler::new(store.clone(), console, playback.sender.clone())
            .with_trace(!playback.no_trace);

        let handle = scheduler.run_timeline(timeline.actions, playback.conversation.clone());
        let token = handle.cancellation_token();
        ctrlc::set_handler(move || token.cancel())
            .context("failed to install Ctrl+C handler")?;

        let report = handle.wait().await?;
        let visible = store.visible_messages(&playback.conversation).len();
        Ok::<_, anyhow::Error>((report, visible))
    })?;

    eprintln!(
        "Finished ({:?}): {} executed, {} skipped, {} failed, {} messages visible",
        report.state, report.executed, report.skipped, report.failed, visible
    );
    Ok(())
}

fn chat(
    model: String,
    persona: chatpace::llm::Persona,
    engine: &EngineArgs,
    no_trace: bool,
) -> Result<()> {
    use chatpace::llm::openai::OpenAiReplyClient;
    use chatpace::session::ChatSession;
    use tokio::sync::mpsc;

    let config = load_config(engine)?;
    let source = OpenAiReplyClient::from_env()?
        .with_model(model)
        .with_persona(persona);

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async {
        let store = Arc::new(MemoryStore::new());
        let console = Arc::new(ConsoleBroadcaster::new(true));
        let mut session = ChatSession::new(
            "cli",
            Arc::new(BehaviorCoordinator::new(&config)),
            Arc::new(source),
            store,
            console,
        )
        .with_trace(!no_trace);
        if let Some(seed) = engine.seed {
            session = session.with_seed(seed);
        }
        session.start();

        let quit = CancellationToken::new();
        let token = quit.clone();
        ctrlc::set_handler(move || token.cancel()).context("failed to install Ctrl+C handler")?;

        let (tx, mut rx) = mpsc::channel::<String>(16);
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });

        eprintln!("Type a message and press Enter. Ctrl+C quits.");
        loop {
            let line = tokio::select! {
                () = quit.cancelled() => break,
                line = rx.recv() => line,
            };
            let Some(line) = line else { break };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            session.submit_user_message(text).await?;
        }

        while !quit.is_cancelled() && session.active_runs().await > 0 {
            tokio::select! {
                () = quit.cancelled() => {}
                () = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
        session.stop().await;
        Ok::<(), anyhow::Error>(())
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Plan {
            input,
            output,
            emotions,
            engine,
        } => {
            let timeline = build_timeline(&input, emotions.as_deref(), &engine)?;
            let json =
                serde_json::to_string_pretty(&timeline).context("failed to serialize timeline")?;
            if let Some(out) = output {
                write_output(&out, &json)?;
            } else {
                println!("{json}");
            }
        }
        Command::Play { timeline, playback } => {
            let json = fs::read_to_string(&timeline)
                .with_context(|| format!("failed to read {}", timeline.display()))?;
            let timeline: Timeline =
                serde_json::from_str(&json).context("failed to parse timeline JSON")?;
            play_timeline(timeline, &playback)?;
        }
        Command::Run {
            input,
            output,
            emotions,
            engine,
            playback,
        } => {
            let timeline = build_timeline(&input, emotions.as_deref(), &engine)?;
            if let Some(out) = output {
                let json = serde_json::to_string_pretty(&timeline)
                    .context("failed to serialize timeline")?;
                write_output(&out, &json)?;
            }
            play_timeline(timeline, &playback)?;
        }
        Command::Chat {
            model,
            persona,
            name,
            nickname,
            engine,
            no_trace,
        } => {
            let persona = chatpace::llm::Persona {
                description: persona,
                character_name: name,
                user_nickname: nickname,
            };
            chat(model, persona, &engine, no_trace)?;
        }
    }

    Ok(())
}
