//! Core record types for k-mer count tables.

use std::cmp::Ordering;
use std::fmt;

/// A single `<token> [frequency] [label]` row.
///
/// The token is the sort and merge key. Tokens produced by the parser are
/// already normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub token: String,
    pub frequency: Option<u64>,
    pub label: Option<String>,
}

impl Record {
    /// Create a record carrying only a token.
    #[inline]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            frequency: None,
            label: None,
        }
    }

    /// Set the frequency column.
    #[inline]
    pub fn with_frequency(mut self, frequency: u64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Set the label column.
    #[inline]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Token as bytes, the form used for ordering comparisons.
    #[inline]
    pub fn key(&self) -> &[u8] {
        self.token.as_bytes()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)?;
        if let Some(frequency) = self.frequency {
            write!(f, "\t{}", frequency)?;
        }
        if let Some(ref label) = self.label {
            write!(f, "\t{}", label)?;
        }
        Ok(())
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(other.key())
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A maximal group of adjacent records sharing a token, folded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub token: String,
    /// Sum of every frequency seen in the run, `None` if no record had one.
    pub frequency: Option<u64>,
    /// First label seen in the run.
    pub label: Option<String>,
    /// Number of input records folded into this run.
    pub count: u64,
}

impl Run {
    /// Start a run from its first record.
    pub fn start(record: Record) -> Self {
        Self {
            token: record.token,
            frequency: record.frequency,
            label: record.label,
            count: 1,
        }
    }

    /// Fold a duplicate record into the run.
    ///
    /// Frequencies add (saturating); the first-seen label is kept.
    pub fn absorb(&mut self, record: Record) {
        if let Some(f) = record.frequency {
            self.frequency = Some(self.frequency.unwrap_or(0).saturating_add(f));
        }
        if self.label.is_none() {
            self.label = record.label;
        }
        self.count += 1;
    }
}
