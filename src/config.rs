//! Run configuration for the merge pipeline.
//!
//! Both structs are built once before any worker starts and are read-only
//! for the rest of the run.

use crate::kmer::KmerError;
use crate::streaming::buffers::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, FORMAT_WAIT_WARN_SECS, MAX_CHANNEL_CAPACITY,
};
use std::time::Duration;

/// Frequency-range filter and relabeling applied to every merged run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// Drop runs whose summed frequency is below this value (inclusive bound).
    pub min_frequency: Option<u64>,
    /// Drop runs whose summed frequency is above this value (inclusive bound).
    pub max_frequency: Option<u64>,
    /// Force this label on every output record.
    pub relabel: Option<String>,
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
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

    /// True when either frequency bound is configured.
    #[inline]
    pub fn has_bounds(&self) -> bool {
        self.min_frequency.is_some() || self.max_frequency.is_some()
    }

    /// Check that the bounds describe a non-empty range and the label is usable.
    pub fn validate(&self) -> Result<(), KmerError> {
        if let (Some(min), Some(max)) = (self.min_frequency, self.max_frequency) {
            if min > max {
                return Err(KmerError::Config(format!(
                    "--min-frequency ({}) is greater than --max-frequency ({})",
                    min, max
                )));
            }
        }
        if let Some(ref label) = self.relabel {
            if label.is_empty() || label.chars().any(|c| c == '\t' || c == '\n' || c == ' ') {
                return Err(KmerError::Config(format!(
                    "--re-label '{}' must be non-empty and contain no whitespace",
                    label
                )));
            }
            // A two-column `token label` line with a numeric label reads back as a frequency.
            if label.bytes().all(|b| b.is_ascii_digit()) {
                return Err(KmerError::Config(format!(
                    "--re-label '{}' must not be a number",
                    label
                )));
            }
        }
        Ok(())
    }
}

/// How multiple input sources are combined into one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceMode {
    /// Read sources one after another; their concatenation must be sorted.
    #[default]
    Concatenate,
    /// K-way merge of individually sorted sources by token.
    Interleave,
}

/// Tuning and behaviour of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    /// Lines or records per batch.
    pub batch_size: usize,
    /// Batch slots per channel.
    pub channel_capacity: usize,
    pub source_mode: SourceMode,
    /// Fail the merger on out-of-order tokens instead of mis-grouping them.
    pub check_sorted: bool,
    /// Interval between warnings while waiting for the input format.
    pub format_wait_warning: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            source_mode: SourceMode::Concatenate,
            check_sorted: false,
            format_wait_warning: Duration::from_secs(FORMAT_WAIT_WARN_SECS),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_source_mode(mut self, mode: SourceMode) -> Self {
        self.source_mode = mode;
        self
    }

    pub fn with_check_sorted(mut self, check: bool) -> Self {
        self.check_sorted = check;
        self
    }

    pub fn validate(&self) -> Result<(), KmerError> {
        if self.batch_size == 0 {
            return Err(KmerError::Config("batch size must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(KmerError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(KmerError::Config(format!(
                "queue capacity {} exceeds the maximum of {}",
                self.channel_capacity, MAX_CHANNEL_CAPACITY
            )));
        }
        self.filter.validate()
    }
}
