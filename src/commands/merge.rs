//! `kmtk merge`: combine sorted k-mer tables, summing duplicate counts.

use crate::config::{FilterConfig, PipelineConfig, SourceMode};
use crate::kmer::{KmerError, Result};
use crate::pipeline::{Destination, Pipeline, PipelineReport, Source};
use crate::streaming::buffers::{DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY};
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Streaming merge of one or more sorted k-mer tables.
#[derive(Debug, Clone)]
pub struct MergeCommand {
    /// Drop runs below this summed frequency
    pub min_frequency: Option<u64>,
    /// Drop runs above this summed frequency
    pub max_frequency: Option<u64>,
    /// Replace every label with this one
    pub relabel: Option<String>,
    /// K-way merge the inputs instead of concatenating them
    pub interleave: bool,
    /// Fail on out-of-order tokens
    pub check_sorted: bool,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl Default for MergeCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeCommand {
    pub fn new() -> Self {
        Self {
            min_frequency: None,
            max_frequency: None,
            relabel: None,
            interleave: false,
            check_sorted: false,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_min_frequency(mut self, min: u64) -> Self {
        self.min_frequency = Some(min);
        self
    }

    pub fn with_max_frequency(mut self, max: u64) -> Self {
        self.max_frequency = Some(max);
        self
    }

    pub fn with_relabel(mut self, label: impl Into<String>) -> Self {
        self.relabel = Some(label.into());
        self
    }

    pub fn with_interleave(mut self, interleave: bool) -> Self {
        self.interleave = interleave;
        self
    }

    pub fn with_check_sorted(mut self, check: bool) -> Self {
        self.check_sorted = check;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Pipeline configuration equivalent to this command.
    pub fn config(&self) -> PipelineConfig {
        let filter = FilterConfig {
            min_frequency: self.min_frequency,
            max_frequency: self.max_frequency,
            relabel: self.relabel.clone(),
        };
        let mode = if self.interleave {
            SourceMode::Interleave
        } else {
            SourceMode::Concatenate
        };

        PipelineConfig::new()
            .with_filter(filter)
            .with_batch_size(self.batch_size)
            .with_channel_capacity(self.queue_capacity)
            .with_source_mode(mode)
            .with_check_sorted(self.check_sorted)
    }

    /// Merge the given paths into `output`. No paths means stdin.
    pub fn run<P: AsRef<Path>, W: Write + Send>(
        &self,
        inputs: &[P],
        output: &mut W,
    ) -> Result<PipelineReport> {
        let sources = if inputs.is_empty() {
            vec![Source::Stdin]
        } else {
            inputs.iter().map(Source::from_arg).collect()
        };
        self.run_sources(sources, output)
    }

    /// Merge explicit sources into `output`.
    pub fn run_sources<W: Write + Send>(
        &self,
        sources: Vec<Source>,
        output: &mut W,
    ) -> Result<PipelineReport> {
        let mut pipeline = Pipeline::new(self.config());
        pipeline.run(sources, output)
    }

    /// Merge into stdout, or into `output_path` when given (`.gz` compresses).
    ///
    /// The output file is not touched unless the configuration is valid, it
    /// is not one of the inputs, and the inputs are k-mer tables.
    pub fn run_to<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        output_path: Option<&PathBuf>,
    ) -> Result<PipelineReport> {
        self.config().validate()?;
        if let Some(path) = output_path {
            reject_output_among_inputs(path, inputs)?;
        }

        let mut destination = match output_path {
            Some(path) => Destination::deferred(path),
            None => Destination::stdout(),
        };
        let report = self.run(inputs, &mut destination)?;
        destination.finish()?;

        if let Some(path) = output_path {
            info!("Wrote {} records to {}", report.writer.records_written, path.display());
        }
        Ok(report)
    }
}

/// Fail when `output` names the same file as one of the inputs.
fn reject_output_among_inputs<P: AsRef<Path>>(output: &Path, inputs: &[P]) -> Result<()> {
    let Ok(output_real) = fs::canonicalize(output) else {
        return Ok(());
    };
    for input in inputs {
        let input = input.as_ref();
        if input.as_os_str() == "-" {
            continue;
        }
        if fs::canonicalize(input).is_ok_and(|real| real == output_real) {
            return Err(KmerError::Config(format!(
                "output file '{}' is also an input",
                output.display()
            )));
        }
    }
    Ok(())
}
