use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use topic_recorder::broker::{Broker, MqttBroker};
use topic_recorder::config::{BrokerArgs, default_log_path};
use topic_recorder::record::DurableLog;
use topic_recorder::recorder::Recorder;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Record every message under an MQTT topic tree to a JSON-lines log")]
struct Args {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Base topic; the base and all nested topics are recorded
    #[arg(long, env = "BASE_TOPIC", default_value = "/charlie")]
    base_topic: String,

    /// Output log path; defaults to captures/BASE_YYYY_MM_DD.log
    #[arg(long, env = "RECORD_FILE")]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let out_path = args
        .out
        .clone()
        .unwrap_or_else(|| default_log_path(&args.base_topic));
    let mut recorder = Recorder::new(DurableLog::new(&out_path), &args.base_topic);
    let resume = recorder.resume();
    info!(path = %out_path.display(), ?resume, "recorder ready");

    let opts = args.broker.options("recorder");
    let (broker, event_loop) = MqttBroker::connect(&opts);

    // Disconnecting ends the event loop below after pending requests flush
    let shutdown_broker = broker.clone();
    ctrlc::set_handler(move || {
        if let Err(e) = shutdown_broker.disconnect() {
            warn!(error = %e, "disconnect on interrupt failed");
        }
    })
    .context("install ctrl-c handler")?;

    event_loop
        .run(&broker, &mut recorder)
        .with_context(|| format!("recording from {}", opts.address))?;

    let stats = recorder.stats();
    info!(recorded = stats.recorded, dropped = stats.dropped, next_index = recorder.next_index(), "recorder stopped");
    Ok(())
}
