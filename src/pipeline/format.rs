//! Input format sniffing and the one-shot signal that publishes it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::warn;
use std::fmt;
use std::time::{Duration, Instant};

use crate::streaming::parsing::{parse_u64_fast, Fields};

/// What the reader decided the input stream contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    /// Not recognisable as either supported layout.
    Unknown,
    /// `<token> [frequency] [label]` rows.
    Kmers,
    /// FASTA/FASTQ reads that still need k-mer counting.
    Sequences,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Unknown => write!(f, "unknown"),
            InputFormat::Kmers => write!(f, "k-mer table"),
            InputFormat::Sequences => write!(f, "sequences"),
        }
    }
}

/// Classify a stream from its first data line.
///
/// `None` means the stream had no data lines; an empty stream is an empty
/// k-mer table.
pub fn sniff_format(first_line: Option<&str>) -> InputFormat {
    let line = match first_line {
        Some(line) => line,
        None => return InputFormat::Kmers,
    };

    if line.starts_with('>') || line.starts_with('@') {
        return InputFormat::Sequences;
    }

    let mut fields = Fields::new(line.as_bytes());
    let token = match fields.next() {
        Some(token) => token,
        None => return InputFormat::Unknown,
    };
    if !token.iter().all(|b| b.is_ascii_alphabetic()) {
        return InputFormat::Unknown;
    }

    let second = fields.next();
    let third = fields.next();
    match (second, third, fields.next()) {
        (None, _, _) => InputFormat::Kmers,
        (Some(_), None, _) => InputFormat::Kmers,
        (Some(frequency), Some(_), None) if parse_u64_fast(frequency).is_some() => {
            InputFormat::Kmers
        }
        _ => InputFormat::Unknown,
    }
}

/// Reader side of the one-shot format signal.
#[derive(Debug)]
pub struct FormatPublisher {
    tx: Sender<InputFormat>,
}

/// Orchestrator side of the one-shot format signal.
#[derive(Debug)]
pub struct FormatSignal {
    rx: Receiver<InputFormat>,
}

/// Create a connected publisher/signal pair.
pub fn format_signal() -> (FormatPublisher, FormatSignal) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (FormatPublisher { tx }, FormatSignal { rx })
}

impl FormatPublisher {
    /// Publish the decision. Consumes the publisher so it happens once.
    pub fn publish(self, format: InputFormat) {
        // The orchestrator may already have given up; nothing to do then.
        let _ = self.tx.send(format);
    }
}

impl FormatSignal {
    /// Block until the reader publishes, warning every `warn_every`.
    ///
    /// Returns `None` if the reader terminated without deciding.
    pub fn wait(&self, warn_every: Duration) -> Option<InputFormat> {
        let started = Instant::now();
        loop {
            match self.rx.recv_timeout(warn_every) {
                Ok(format) => return Some(format),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Still waiting for input format detection after {:.0}s",
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}
