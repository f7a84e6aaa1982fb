//! Command-line and environment configuration shared by both binaries.
use crate::broker::BrokerOptions;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerAddress {
    type Err = String;

    /// Accepts `host` or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| format!("invalid port in {s:?}: {e}"))?;
                (host, port)
            }
            None => (s, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() {
            return Err(format!("missing host in {s:?}"));
        }
        Ok(BrokerAddress {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct BrokerArgs {
    /// Broker address, `host` or `host:port`
    #[arg(long, env = "BROKER_ADDRESS", default_value = "localhost")]
    pub broker: BrokerAddress,

    /// MQTT client identifier (defaults to the tool name)
    #[arg(long, env = "MQTT_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(long, default_value_t = 30)]
    pub keep_alive: u64,
}

impl BrokerArgs {
    pub fn options(&self, default_client_id: &str) -> BrokerOptions {
        BrokerOptions {
            address: self.broker.clone(),
            client_id: self
                .client_id
                .clone()
                .unwrap_or_else(|| default_client_id.to_string()),
            keep_alive: Duration::from_secs(self.keep_alive),
        }
    }
}

/// Default capture path: `captures/<BASE>_YYYY_MM_DD.log`, using the local
/// date when the offset is known and UTC otherwise.
pub fn default_log_path(base_topic: &str) -> PathBuf {
    let date = match time::OffsetDateTime::now_local() {
        Ok(now) => now.date(),
        Err(_) => {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            time::OffsetDateTime::from_unix_timestamp(secs)
                .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
                .date()
        }
    };
    let stem: String = base_topic
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "ALL".to_string() } else { stem.to_uppercase() };
    let fname = format!(
        "{}_{}_{:02}_{:02}.log",
        stem,
        date.year(),
        date.month() as u8,
        date.day()
    );
    let mut p = PathBuf::from("captures");
    p.push(fname);
    p
}
