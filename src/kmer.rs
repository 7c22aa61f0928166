//! The crate-wide error type.

use crate::pipeline::channel::ChannelError;
use crate::pipeline::{InputFormat, StageFailure};
use std::io;
use thiserror::Error;

/// Errors that can occur while reading, merging or writing k-mer tables.
#[derive(Error, Debug)]
pub enum KmerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error at record {record}: {message}")]
    Parse { record: u64, message: String },

    #[error("Invalid input: {0}")]
    InvalidFormat(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Input format mismatch: expected {expected}, detected {found}")]
    FormatMismatch {
        expected: InputFormat,
        found: InputFormat,
    },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("worker panicked: {0}")]
    Panic(String),

    #[error("{}", format_failures(.0))]
    Pipeline(Vec<StageFailure>),
}

impl KmerError {
    /// True for errors that only echo a failure that happened in another stage.
    pub fn is_secondary(&self) -> bool {
        matches!(
            self,
            KmerError::Channel(ChannelError::Poisoned { .. })
                | KmerError::Channel(ChannelError::Disconnected { .. })
        )
    }
}

fn format_failures(failures: &[StageFailure]) -> String {
    let parts: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    format!("pipeline failed: {}", parts.join("; "))
}

pub type Result<T> = std::result::Result<T, KmerError>;
