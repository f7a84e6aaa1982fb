//! Durable on-disk log: one JSON object per line, append-only.
//!
//! ```text
//! {"timestamp":1718000000.25,"topic":"/charlie/imu","payload":{..},"message_index":41}
//! ```
//!
//! Every append is a self-contained open-append-close so that a crash
//! between two messages never loses an entry that was already reported as
//! written. The last written index is recovered from the final line only.
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bytes read per step when scanning backwards for the last line.
const TAIL_CHUNK: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: f64, // wall-clock seconds at receipt
    pub topic: String,
    pub payload: Value,
    pub message_index: u64,
}

#[derive(Debug)]
pub struct DurableLog {
    path: PathBuf,
    // set when recovery saw a final line without its newline
    terminate_tail: bool,
}

impl DurableLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            terminate_tail: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry` as a single line, creating the file (and its parent
    /// directory) on first write. The file is closed before returning.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let mut line = Vec::with_capacity(256);
        if self.terminate_tail {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| self.io(source))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io(source))?;
        file.write_all(&line).map_err(|source| self.io(source))?;
        file.flush().map_err(|source| self.io(source))?;
        self.terminate_tail = false;
        Ok(())
    }

    /// Returns the index the next appended entry should carry.
    ///
    /// An absent or empty log yields 0. A final line that is unterminated,
    /// unparsable or lacks `message_index` yields [`Error::CorruptTail`];
    /// the caller decides whether to accept the risk of duplicate indices.
    pub fn recover_last_index(&mut self) -> Result<u64> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(self.io(source)),
        };
        let len = file.metadata().map_err(|source| self.io(source))?.len();
        if len == 0 {
            return Ok(0);
        }
        let tail = read_last_line(&mut file, len).map_err(|source| self.io(source))?;
        debug!(path = %self.path.display(), offset = tail.offset, "read last log line");

        if !tail.terminated {
            self.terminate_tail = true;
            return Err(self.corrupt_tail(tail.offset, "final line is unterminated (interrupted write)"));
        }
        let value: Value = serde_json::from_slice(&tail.bytes)
            .map_err(|e| self.corrupt_tail(tail.offset, e.to_string()))?;
        let index = value
            .get("message_index")
            .and_then(Value::as_u64)
            .ok_or_else(|| self.corrupt_tail(tail.offset, "last entry has no message_index"))?;
        Ok(index + 1)
    }

    /// Opens the log for a forward pass in file order. Restart by calling
    /// this again.
    pub fn read_all(&self) -> Result<LogReader> {
        let file = File::open(&self.path).map_err(|source| self.io(source))?;
        Ok(LogReader {
            path: self.path.clone(),
            reader: BufReader::new(file),
            buf: Vec::new(),
            line: 0,
            done: false,
        })
    }

    fn io(&self, source: std::io::Error) -> Error {
        Error::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn corrupt_tail(&self, offset: u64, reason: impl Into<String>) -> Error {
        Error::CorruptTail {
            path: self.path.clone(),
            offset,
            reason: reason.into(),
        }
    }
}

struct LastLine {
    offset: u64, // byte offset where the line starts
    bytes: Vec<u8>,
    terminated: bool,
}

fn read_last_line(file: &mut File, len: u64) -> std::io::Result<LastLine> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    let terminated = last[0] == b'\n';

    let mut start = if terminated { len - 1 } else { len };
    let mut bytes: Vec<u8> = Vec::new();
    while start > 0 {
        let chunk_start = start.saturating_sub(TAIL_CHUNK);
        let mut chunk = vec![0u8; (start - chunk_start) as usize];
        file.seek(SeekFrom::Start(chunk_start))?;
        file.read_exact(&mut chunk)?;
        if let Some(nl) = chunk.iter().rposition(|&b| b == b'\n') {
            chunk.drain(..=nl);
            chunk.extend_from_slice(&bytes);
            bytes = chunk;
            start = chunk_start + nl as u64 + 1;
            break;
        }
        chunk.extend_from_slice(&bytes);
        bytes = chunk;
        start = chunk_start;
    }
    Ok(LastLine {
        offset: start,
        bytes,
        terminated,
    })
}

/// Forward iterator over the entries of a log file.
///
/// Yields entries until end of file. The first unparsable line ends the
/// pass with [`Error::CorruptEntry`]; an unterminated final line is treated
/// as absent.
pub struct LogReader {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line: usize,
    done: bool,
}

impl Iterator for LogReader {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                self.line += 1;
                if self.buf.last() != Some(&b'\n') {
                    warn!(path = %self.path.display(), line = self.line, "ignoring unterminated final line");
                    self.done = true;
                    return None;
                }
                let text = &self.buf[..self.buf.len() - 1];
                match serde_json::from_slice::<LogEntry>(text) {
                    Ok(entry) => Some(Ok(entry)),
                    Err(e) => {
                        self.done = true;
                        Some(Err(Error::CorruptEntry {
                            path: self.path.clone(),
                            line: self.line,
                            reason: e.to_string(),
                        }))
                    }
                }
            }
            Err(source) => {
                self.done = true;
                Some(Err(Error::Io {
                    path: self.path.clone(),
                    source,
                }))
            }
        }
    }
}
