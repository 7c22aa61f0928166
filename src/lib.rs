//! kmtk: K-mer Table Toolkit
//!
//! This library merges sorted k-mer count tables in a bounded-memory
//! streaming pipeline.
//!
//! # Features
//!
//! - **Pipelined processing**: reader, merger and writer run concurrently
//!   on a fixed worker pool connected by bounded batch channels
//! - **Streaming I/O**: memory use is bounded by queue capacity, not input size
//! - **Format sniffing**: FASTA/FASTQ input is rejected before any merging
//! - **Gzip**: compressed input is detected by content, `.gz` output by name
//!
//! # Example
//!
//! ```rust,no_run
//! use kmtk::commands::MergeCommand;
//!
//! let mut out = Vec::new();
//! let report = MergeCommand::new()
//!     .with_min_frequency(2)
//!     .run(&["a.kmers", "b.kmers"], &mut out)
//!     .unwrap();
//! eprintln!("{}", report);
//! ```

pub mod commands;
pub mod config;
pub mod kmer;
pub mod pipeline;
pub mod record;
pub mod streaming;

// Re-export commonly used types
pub use config::{FilterConfig, PipelineConfig, SourceMode};
pub use kmer::KmerError;
pub use pipeline::{merge_sorted, Pipeline, PipelineReport, Source};
pub use record::{Record, Run};
pub use streaming::parse_records;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::MergeCommand;
    pub use crate::config::{FilterConfig, PipelineConfig, SourceMode};
    pub use crate::kmer::KmerError;
    pub use crate::pipeline::{merge_sorted, Pipeline, PipelineReport, Source};
    pub use crate::record::{Record, Run};
    pub use crate::streaming::parse_records;
}
