use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::time::Duration;
use topic_recorder::broker::{MqttBroker, connection_status};
use topic_recorder::clock::Shutdown;
use topic_recorder::config::BrokerArgs;
use topic_recorder::record::DurableLog;
use topic_recorder::replayer::{DEFAULT_CONNECT_TIMEOUT, ReplayOptions, Replayer, validate_speed};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(about = "Replay a recorded topic log onto a renamed topic tree")]
struct Args {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Recorded log file to read
    #[arg(long, short = 'i', env = "RECORD_FILE")]
    input: PathBuf,

    /// Base topic the log was recorded under
    #[arg(long, env = "BASE_TOPIC", default_value = "/charlie")]
    base_topic: String,

    /// Base topic replayed messages are published under
    #[arg(long, env = "BASE_TOPIC_REPLAY", default_value = "/charlie_replay")]
    replay_topic: String,

    /// Speed multiplier; 2.0 replays twice as fast
    #[arg(long, env = "REPLAY_SPEED", default_value_t = 1.0)]
    speed: f64,

    /// Seconds to wait for the broker before giving up
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout: u64,
}

fn main() -> Result<()> {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    validate_speed(args.speed).context("--speed")?;

    let opts = args.broker.options("replayer");
    let (broker, event_loop) = MqttBroker::connect(&opts);
    let (mut watcher, status) = connection_status();

    // network loop in the background so the publish loop can observe Connected
    let loop_broker = broker.clone();
    let network = std::thread::spawn(move || {
        if let Err(e) = event_loop.run(&loop_broker, &mut watcher) {
            error!(error = %e, "network loop stopped");
        }
    });

    let shutdown = Shutdown::new();
    let on_interrupt = shutdown.clone();
    ctrlc::set_handler(move || on_interrupt.trigger()).context("install ctrl-c handler")?;

    let replayer = Replayer::new(
        &broker,
        &status,
        DurableLog::new(&args.input),
        ReplayOptions {
            recording_base: args.base_topic.clone(),
            replay_base: args.replay_topic.clone(),
            connect_timeout: Duration::from_secs(args.connect_timeout),
        },
    )
    .with_shutdown(shutdown);

    let summary = replayer
        .start(args.speed)
        .with_context(|| format!("replaying {:?} via {}", args.input, opts.address))?;
    network
        .join()
        .map_err(|_| anyhow!("network thread panicked"))?;

    info!(
        published = summary.published,
        cancelled = summary.cancelled,
        elapsed = ?summary.elapsed,
        "replayer finished"
    );
    Ok(())
}
