//! Streaming run-length merge with frequency filtering.
//!
//! # Algorithm
//!
//! For input sorted by token:
//! 1. Parse each line and uppercase its token
//! 2. Track the current run (token, summed frequency, first label)
//! 3. If the next token matches, fold it into the run
//! 4. If not, filter the finished run into the output batch and start anew
//!
//! # Memory Complexity
//!
//! O(batch) - one run plus one output batch, regardless of input size. The
//! run survives batch boundaries, so duplicates split across two input
//! batches still merge.
//!
//! # Requirements
//!
//! Input MUST be sorted by token. Unsorted input is not detected unless
//! `check_sorted` is set; it silently produces split runs.

use crate::config::FilterConfig;
use crate::kmer::Result;
use crate::pipeline::channel::{Batch, BatchReceiver, BatchSender, Message};
use crate::record::{Record, Run};
use crate::streaming::parsing::parse_record;
use crate::streaming::validation::SortValidator;
use log::debug;

/// The merger's accumulator. Owned by exactly one merger.
#[derive(Debug, Default)]
pub struct MergeState {
    current: Option<Run>,
    validator: Option<SortValidator>,
}

impl MergeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator that rejects tokens smaller than their predecessor.
    pub fn checked() -> Self {
        Self {
            current: None,
            validator: Some(SortValidator::new()),
        }
    }

    /// Feed one record; returns the run it completed, if any.
    pub fn advance(&mut self, record: Record) -> Result<Option<Run>> {
        if let Some(ref mut validator) = self.validator {
            validator.validate(&record.token)?;
        }

        match self.current {
            Some(ref mut run) if run.token == record.token => {
                run.absorb(record);
                Ok(None)
            }
            _ => Ok(self.current.replace(Run::start(record))),
        }
    }

    /// End of input: hand back the run still in flight.
    pub fn finish(&mut self) -> Option<Run> {
        self.current.take()
    }

    /// The run currently being accumulated.
    pub fn current(&self) -> Option<&Run> {
        self.current.as_ref()
    }
}

/// Apply frequency bounds and relabeling to a finished run.
///
/// Bounds are inclusive. A run that never carried a frequency fails any
/// configured bound.
pub fn filter(run: Run, config: &FilterConfig) -> Option<Record> {
    if config.has_bounds() {
        let frequency = run.frequency?;
        if config.min_frequency.is_some_and(|min| frequency < min) {
            return None;
        }
        if config.max_frequency.is_some_and(|max| frequency > max) {
            return None;
        }
    }

    let label = match config.relabel {
        Some(ref relabel) => Some(relabel.clone()),
        None => run.label,
    };

    Some(Record {
        token: run.token,
        frequency: run.frequency,
        label,
    })
}

/// Merge an already sorted record sequence in memory.
///
/// Same semantics as the merger stage, without channels or threads.
pub fn merge_sorted<I>(records: I, config: &FilterConfig) -> Result<Vec<Record>>
where
    I: IntoIterator<Item = Record>,
{
    let mut state = MergeState::new();
    let mut out = Vec::new();
    for mut record in records {
        record.token.make_ascii_uppercase();
        if let Some(run) = state.advance(record)? {
            out.extend(filter(run, config));
        }
    }
    if let Some(run) = state.finish() {
        out.extend(filter(run, config));
    }
    Ok(out)
}

/// Statistics from the merger stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    /// Input records parsed
    pub records_read: u64,
    /// Distinct runs completed
    pub runs: u64,
    /// Runs that passed the filter
    pub records_written: u64,
    /// Runs dropped by the frequency bounds
    pub records_filtered: u64,
    /// Non-empty output batches sent
    pub batches_written: u64,
}

impl MergeStats {
    /// How many input records collapsed into each run.
    pub fn compression_ratio(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.records_read as f64 / self.runs as f64
        }
    }
}

impl std::fmt::Display for MergeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Read: {}, Runs: {}, Written: {}, Filtered: {}, Compression: {:.2}x",
            self.records_read,
            self.runs,
            self.records_written,
            self.records_filtered,
            self.compression_ratio()
        )
    }
}

/// Single consumer of the input channel, single producer of the output one.
#[derive(Debug, Clone)]
pub struct MergerStage {
    filter: FilterConfig,
    batch_size: usize,
    check_sorted: bool,
}

impl MergerStage {
    pub fn new(filter: FilterConfig, batch_size: usize) -> Self {
        Self {
            filter,
            batch_size,
            check_sorted: false,
        }
    }

    pub fn with_check_sorted(mut self, check: bool) -> Self {
        self.check_sorted = check;
        self
    }

    /// Merge until end-of-stream, then forward end-of-stream.
    ///
    /// On failure both channels are poisoned so neither neighbour blocks.
    pub fn run(
        &self,
        input: &BatchReceiver<String>,
        output: &BatchSender<Record>,
    ) -> Result<MergeStats> {
        let result = self.merge(input, output);
        if result.is_err() {
            input.poison();
            output.poison();
        }
        result
    }

    fn merge(
        &self,
        input: &BatchReceiver<String>,
        output: &BatchSender<Record>,
    ) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        let mut state = if self.check_sorted {
            MergeState::checked()
        } else {
            MergeState::new()
        };
        let mut buffer = Batch::try_with_capacity(self.batch_size)?;

        loop {
            match input.take()? {
                Message::Data(batch) => {
                    for line in batch {
                        stats.records_read += 1;
                        let record = parse_record(&line, stats.records_read)?;
                        if let Some(run) = state.advance(record)? {
                            self.emit(run, &mut buffer, output, &mut stats)?;
                        }
                    }
                }
                Message::EndOfStream => break,
            }
        }

        if let Some(run) = state.finish() {
            self.emit(run, &mut buffer, output, &mut stats)?;
        }
        if !buffer.is_empty() {
            output.put(buffer)?;
            stats.batches_written += 1;
        }
        output.finish()?;

        debug!("Merger finished: {}", stats);
        Ok(stats)
    }

    fn emit(
        &self,
        run: Run,
        buffer: &mut Batch<Record>,
        output: &BatchSender<Record>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        stats.runs += 1;
        match filter(run, &self.filter) {
            Some(record) => {
                buffer.push(record);
                stats.records_written += 1;
                if buffer.len() >= self.batch_size {
                    let full =
                        std::mem::replace(buffer, Batch::try_with_capacity(self.batch_size)?);
                    output.put(full)?;
                    stats.batches_written += 1;
                }
            }
            None => stats.records_filtered += 1,
        }
        Ok(())
    }
}
