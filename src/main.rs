//! WagerHub engine host
//!
//! Runs the crash and lottery engines on in-memory storage, logs every
//! notification and shuts down gracefully on Ctrl-C.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use wagerhub::{
    games::lottery::LotteryGame,
    games::session::SESSION_IDLE_TTL,
    storage::{MemoryCrashStore, MemoryLotteryStore, MemorySessionStore},
    BroadcastNotifier, ConfigLoader, CrashEngine, DiceEngine, EngineMetrics, LimboEngine, LotteryEngine,
    MineEngine, RandomEntropy, SyntheticPrice, WagerConfig, WagerResult,
};

/// WagerHub engine host
#[derive(Parser, Debug)]
#[command(name = "wagerhub")]
#[command(about = "Provably fair crash, lottery and session game engines", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the config file and RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,

    /// Use short phase intervals for local runs
    #[arg(long)]
    fast: bool,

    /// Seconds between metrics log lines
    #[arg(long, default_value = "30")]
    metrics_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.fast {
        WagerConfig::fast()
    } else {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &args.config {
            loader = loader.with_path(path);
        }
        loader.load()?
    };

    let filter = match &args.log_filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting WagerHub");
    run(config, Duration::from_secs(args.metrics_interval.max(1))).await?;
    info!("👋 WagerHub stopped");
    Ok(())
}

async fn run(config: WagerConfig, metrics_interval: Duration) -> WagerResult<()> {
    let notifier = Arc::new(BroadcastNotifier::default());
    let metrics = Arc::new(EngineMetrics::new());
    spawn_notification_log(&notifier);

    let crash = CrashEngine::start(
        config.crash.clone(),
        Arc::new(MemoryCrashStore::new()),
        notifier.clone(),
        Arc::new(RandomEntropy),
        metrics.clone(),
    )
    .await?;

    let price = Arc::new(SyntheticPrice::new());
    let mut lotteries = Vec::new();
    for (game, settings) in [
        (LotteryGame::WINGO, config.wingo.clone()),
        (LotteryGame::NINE, config.nine.clone()),
        (LotteryGame::MULTI_WINGO, config.multi_wingo.clone()),
    ] {
        let engine = LotteryEngine::start(
            game,
            settings,
            Arc::new(MemoryLotteryStore::new()),
            notifier.clone(),
            price.clone(),
            metrics.clone(),
        )
        .await?;
        lotteries.push(engine);
    }

    let sessions = Arc::new(MemorySessionStore::new());
    let dice = DiceEngine::new(config.dice.clone(), sessions.clone(), notifier.clone(), metrics.clone());
    let limbo = LimboEngine::new(config.limbo.clone(), sessions.clone(), notifier.clone(), metrics.clone());
    let mine = MineEngine::new(config.mine.clone(), sessions, notifier.clone(), metrics.clone());
    info!("🎲 Session engines ready: dice, limbo, mine");

    let mut report = tokio::time::interval(metrics_interval);
    report.tick().await;
    loop {
        tokio::select! {
            biased;
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Could not listen for Ctrl-C: {}", e);
                }
                info!("🛑 Shutdown requested");
                break;
            }
            _ = report.tick() => {
                let evicted = dice.book().evict_idle(SESSION_IDLE_TTL)
                    + limbo.book().evict_idle(SESSION_IDLE_TTL)
                    + mine.book().evict_idle(SESSION_IDLE_TTL);
                if evicted > 0 {
                    debug!(evicted, "Idle sessions released");
                }
                let round = crash.get_round().await;
                info!(
                    round_id = round.round_id,
                    status = %round.status,
                    "📊 Metrics: {:?}",
                    metrics.snapshot()
                );
            }
        }
    }

    crash.shutdown().await;
    for engine in &lotteries {
        engine.shutdown().await;
    }
    Ok(())
}

/// Log every published notification until the notifier goes away
fn spawn_notification_log(notifier: &BroadcastNotifier) {
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => debug!(channel = %notification.channel, "📣 {}", notification.payload),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
