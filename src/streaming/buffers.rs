//! Buffer and queue size constants for the streaming pipeline.
//!
//! These constants control memory usage vs throughput tradeoffs. The
//! defaults absorb bursty decompression without letting the input queue
//! grow past a few million lines.

/// Default number of lines or records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Default number of batch slots per channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16 * 1024;

/// Largest accepted number of batch slots per channel.
/// Slots are allocated up front when a channel is created.
pub const MAX_CHANNEL_CAPACITY: usize = 1 << 20;

/// Default output buffer size (2 MB).
pub const DEFAULT_OUTPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Default input buffer size (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Default line buffer capacity.
/// k-mer table lines are short; this covers tokens up to a few hundred bases.
pub const DEFAULT_LINE_BUFFER: usize = 256;

/// Seconds between "still waiting" warnings while the input format is sniffed.
pub const FORMAT_WAIT_WARN_SECS: u64 = 5;

/// Worker pool size: reader, merger and writer plus the coordinator.
pub const WORKER_THREADS: usize = 4;
