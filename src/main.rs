use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ore_engine::prelude::*;

#[derive(Parser)]
#[command(name = "ore-engine", version, about = "Idle mining accrual engine")]
struct Cli {
    /// Path to config.toml (defaults to ~/.ore-engine/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a mining session, reading commands from stdin
    Play {
        /// Use an in-process store instead of the configured API
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective configuration and player key
    Status,
    /// Create the player key and a config file if missing
    Keygen {
        /// Player id to record in the config file
        #[arg(long)]
        player_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ore_engine=debug,info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Play { dry_run } => play(cli.config, dry_run).await,
        Command::Status => status(cli.config),
        Command::Keygen { player_id } => keygen(cli.config, player_id),
    }
}

async fn play(config_path: Option<PathBuf>, dry_run: bool) -> Result<()> {
    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║                   ORE ENGINE v1.0.0                    ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let config = Config::load(config_path.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn AuthoritativeStore> = if dry_run {
        info!("🧪 Dry run: using in-process store");
        let tiers = config.tiers;
        Arc::new(MemoryStore::new(
            clock.clone(),
            tiers.capacity().unwrap_or_default(),
            tiers.regen_rate().unwrap_or_default(),
        ))
    } else {
        let identity = PlayerIdentity::load_or_generate(&PlayerIdentity::default_path())
            .context("Failed to load player identity")?;
        if config.store.player_id.is_empty() {
            warn!("⚠️  store.player_id is empty; run `ore-engine keygen --player-id <id>` first");
        }
        info!("🔑 Player key: {}", identity.public_key_base64());
        Arc::new(
            HttpStore::new(
                config.store.api_url.clone(),
                config.store.player_id.clone(),
                Some(identity),
                config.request_timeout(),
            )
            .context("Failed to build HTTP client")?,
        )
    };

    let session = MiningSession::new(&config, store, clock);
    let handle = session.handle();
    let (lifecycle, rx) = mpsc::channel(16);
    let running = tokio::spawn(session.run(rx));

    let mut events = handle.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::OfflineEarnings { amount } => println!("⛏️  While you were away: +{}", amount),
                EngineEvent::Notice { message } => println!("📣 {}", message),
                EngineEvent::ReconcileFailed { attempt, error } => {
                    println!("⏳ Waiting for server (attempt {}): {}", attempt, error)
                }
                other => info!("{:?}", other),
            }
        }
    });

    println!("Commands: claim | overclock | bot <secs> | hide | show | status | quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let mut words = line.split_whitespace();

        match words.next() {
            Some("claim") => println!("{:?}", handle.claim().await),
            Some("overclock") => println!("{:?}", handle.request_overclock().await),
            Some("bot") => match words.next().map(str::parse::<u64>) {
                Some(Ok(secs)) => println!("{:?}", handle.request_bot(secs).await),
                _ => println!("usage: bot <secs>"),
            },
            Some("hide") => lifecycle.send(LifecycleEvent::Background).await?,
            Some("show") => lifecycle.send(LifecycleEvent::Foreground).await?,
            Some("status") => print_snapshot(&handle.snapshot()),
            Some("quit") => break,
            Some(other) => println!("unknown command: {}", other),
            None => {}
        }
    }

    info!("Shutting down...");
    // The session may already have exited on a fatal reconcile error.
    lifecycle.send(LifecycleEvent::Teardown).await.ok();
    match running.await? {
        Ok(()) => {
            print_snapshot(&handle.snapshot());
            Ok(())
        }
        Err(e) => {
            error!("❌ Session ended with error: {}", e);
            Err(e.into())
        }
    }
}

fn print_snapshot(s: &ResourceSnapshot) {
    println!(
        "[{:?}] score {} | energy {:.1}/{} | +{}/s | overclock {}s | bot {}s",
        s.phase, s.score, s.energy, s.capacity, s.effective_rate, s.overclock_remaining, s.bot_remaining
    );
}

fn status(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    println!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);

    let key_path = PlayerIdentity::default_path();
    if key_path.exists() {
        let identity = PlayerIdentity::load_or_generate(&key_path)?;
        println!("player key: {}", identity.public_key_base64());
    } else {
        println!("player key: (none, run `ore-engine keygen`)");
    }
    Ok(())
}

fn keygen(config_path: Option<PathBuf>, player_id: Option<String>) -> Result<()> {
    let identity = PlayerIdentity::load_or_generate(&PlayerIdentity::default_path())?;
    println!("player key: {}", identity.public_key_base64());

    let path = config_path.unwrap_or_else(Config::config_path);
    let mut config = if path.exists() {
        Config::load(Some(&path))?
    } else {
        Config::default()
    };
    if let Some(id) = player_id {
        config.store.player_id = id;
    }
    config.save(&path)?;
    info!("✅ Configuration saved to {:?}", path);
    Ok(())
}
