//! Three-stage streaming merge pipeline.
//!
//! ```text
//!   sources ─► reader ─► [input: Batch<String>] ─► merger ─► [output: Batch<Record>] ─► writer ─► sink
//!                │
//!                └─► format signal ─► orchestrator
//! ```
//!
//! Exactly one worker per stage. Batches keep their order end to end, so the
//! output is in input order.

pub mod channel;
pub mod format;
pub mod merger;
pub mod orchestrator;
pub mod reader;
pub mod writer;

pub use channel::{Batch, BatchReceiver, BatchSender, ChannelError, Message};
pub use format::{sniff_format, InputFormat};
pub use merger::{filter, merge_sorted, MergeState, MergeStats, MergerStage};
pub use orchestrator::{Pipeline, PipelineReport, PipelineState, Stage, StageFailure};
pub use reader::{ReaderStage, ReaderStats, Source};
pub use writer::{Destination, WriterStage, WriterStats};
