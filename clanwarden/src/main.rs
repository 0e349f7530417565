// clanwarden/src/main.rs
//
// Clanwarden: chat spam detection and escalating moderation for a clan chat.
//
// Two operational modes:
//   tail    — follow a live JSONL chat event feed
//   replay  — replay a captured feed at scaled speed (testing/tuning)
//
// Outputs (in --output):
//   outbound.jsonl   every announcement, private reply and kick command
//   violators.json   current violator table
//   records.json     player records (unless --records points elsewhere)
//
// Usage:
//   clanwarden --mode tail --path /var/log/clan/chat.jsonl --directory users.json
//   clanwarden --mode replay --path captured.jsonl --speed 10.0 --config clanwarden.toml

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clanwarden::directory::MemoryDirectory;
use clanwarden::events::ChatEvent;
use clanwarden::notify::JsonlSink;
use clanwarden::state::board::JsonFileUiSink;
use clanwarden::state::records::JsonRecordStore;
use clanwarden::{ModerationSession, Settings};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "clanwarden",
    about   = "Chat moderation daemon: spam detection with warn-to-ban escalation",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/clanwarden_feed.jsonl",
          help = "JSONL chat event feed (tail/replay modes)")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/clanwarden_output",
          help = "Output directory for notices, violator table and records")]
    output: PathBuf,

    #[arg(long, help = "TOML settings file")]
    config: Option<PathBuf>,

    #[arg(long, help = "JSON user directory (owners, moderators, permissions)")]
    directory: Option<PathBuf>,

    #[arg(long, help = "Player record file (default: <output>/records.json)")]
    records: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,    // follow a live JSONL feed
    Replay,  // replay a static JSONL file at scaled speed
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner(cli: &Cli) {
    println!("\x1b[1m");
    println!("  ┌─┐┬  ┌─┐┌┐┌┬ ┬┌─┐┬─┐┌┬┐┌─┐┌┐┌");
    println!("  │  │  ├─┤│││││││├─┤├┬┘ ││├┤ │││");
    println!("  └─┘┴─┘┴ ┴┘└┘└┴┘┴ ┴┴└──┴┘└─┘┘└┘");
    println!("\x1b[0m");
    println!("  \x1b[90mChat spam detection | warn → ban escalation\x1b[0m\n");
    match cli.mode {
        Mode::Tail => println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.path.display()),
        Mode::Replay => println!(
            "  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x",
            cli.path.display(), cli.speed
        ),
    }
    println!("  Output: \x1b[90m{}\x1b[0m", cli.output.display());
    println!("  Press Ctrl+C to stop.\n");
}

async fn print_stats_loop(session: Arc<ModerationSession>, start: Instant) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let s = session.stats();
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  events={}  eps={:.1}  flagged={}  users={}  bans={} ──\x1b[0m",
            elapsed, s.processed, s.processed as f64 / elapsed,
            s.flagged, s.tracked_users, s.active_bans
        );
    }
}

// ── Event sources ─────────────────────────────────────────────────────────────

fn parse_line(line: &str) -> Option<ChatEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<ChatEvent>(line) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!("Parse error: {}", e);
            None
        }
    }
}

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<ChatEvent>) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    while lines.next_line().await?.is_some() {} // skip history

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                if let Some(ev) = parse_line(&line) {
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

fn event_time(ev: &ChatEvent) -> Option<DateTime<Utc>> {
    match ev {
        ChatEvent::Message { timestamp, .. } => *timestamp,
        _ => None,
    }
}

/// Re-timestamped on send so the detector sees the replay clock.
fn restamp(ev: ChatEvent) -> ChatEvent {
    match ev {
        ChatEvent::Message { username, channel, text, .. } => {
            ChatEvent::Message { username, channel, text, timestamp: Some(Utc::now()) }
        }
        other => other,
    }
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<ChatEvent>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;

    // untimed lines inherit the previous line's time
    let mut events: Vec<(i64, ChatEvent)> = Vec::new();
    let mut last_ts = 0i64;
    for ev in content.lines().filter_map(parse_line) {
        if let Some(ts) = event_time(&ev) {
            last_ts = ts.timestamp_millis();
        }
        events.push((last_ts, ev));
    }
    if events.is_empty() {
        return Ok(());
    }
    events.sort_by_key(|(ts, _)| *ts);

    let speed     = if speed > 0.0 { speed } else { 1.0 };
    let base_ts   = events[0].0;
    let base_wall = Instant::now();
    let total     = events.len();

    for (ts, event) in events {
        let offset = (ts - base_ts).max(0) as f64 / speed / 1000.0;
        let target = base_wall + std::time::Duration::from_secs_f64(offset);
        let now    = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        if tx.send(restamp(event)).await.is_err() {
            break;
        }
    }
    info!(events = total, "Replay finished");
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn open_session(cli: &Cli) -> Result<Arc<ModerationSession>> {
    let settings = Settings::load(cli.config.as_deref())?;
    std::fs::create_dir_all(&cli.output)?;

    let directory = match cli.directory.as_deref() {
        Some(p) => MemoryDirectory::from_json_file(p)?,
        None => MemoryDirectory::new(),
    }
    .auto_register();

    let records = cli.records.clone().unwrap_or_else(|| cli.output.join("records.json"));
    let store = JsonRecordStore::open(records)?;
    let sink = JsonlSink::new(cli.output.clone())?;
    let ui = JsonFileUiSink::new(cli.output.join("violators.json"));

    Ok(ModerationSession::new(
        settings,
        Arc::new(store),
        Arc::new(directory),
        Arc::new(sink),
        Arc::new(ui),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("clanwarden=info".parse()?))
        .compact().init();

    let cli     = Cli::parse();
    let session = open_session(&cli)?;
    let start   = Instant::now();
    let (tx, rx) = mpsc::channel::<ChatEvent>(4096);

    print_banner(&cli);
    session.start();

    let stats = tokio::spawn(print_stats_loop(Arc::clone(&session), start));

    let path = cli.path.clone();
    let source = match cli.mode {
        Mode::Tail => tokio::spawn(async move {
            if let Err(e) = tail_jsonl(path, tx).await {
                error!("Tail source failed: {}", e);
            }
        }),
        Mode::Replay => {
            let speed = cli.speed;
            tokio::spawn(async move {
                if let Err(e) = replay_jsonl(path, tx, speed).await {
                    error!("Replay source failed: {}", e);
                }
            })
        }
    };

    let runner = tokio::spawn(Arc::clone(&session).run(rx));
    tokio::select! {
        res = runner => {
            if let Err(e) = res {
                error!("Event loop stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    source.abort();
    stats.abort();
    session.shutdown().await;
    Ok(())
}
