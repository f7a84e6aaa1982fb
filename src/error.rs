//! Error taxonomy shared by the recorder and the replayer.
//!
//! Every variant carries enough context (path, line, byte offset or topic)
//! to diagnose the problem without opening the log file by hand.
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The broker link could not be established or maintained.
    #[error("broker connection: {0}")]
    Connection(String),

    /// The broker did not acknowledge the connection within the bounded wait.
    #[error("not connected to broker after {0:?}")]
    NotConnected(Duration),

    /// The last line of the log could not be used to resume the index.
    ///
    /// Resuming anyway risks a duplicate `message_index` across sessions.
    #[error("corrupt tail in {} at byte {offset}: {reason}", path.display())]
    CorruptTail {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// A line in the middle of the log could not be parsed.
    #[error("corrupt entry at {}:{line}: {reason}", path.display())]
    CorruptEntry {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// An inbound payload is not valid JSON.
    #[error("cannot decode payload on {topic}: {source}")]
    Decode {
        topic: String,
        source: serde_json::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("log io on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("encode entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
