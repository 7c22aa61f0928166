//! Sort validation for streaming merges.
//!
//! The merger groups duplicates by comparing each token only with the one
//! before it, so it requires tokens in non-decreasing byte order.
//! `SortValidator` backs `--check-sorted` and reports violations instead of
//! silently emitting split runs.

use crate::kmer::KmerError;

/// Inline sort validator for use within streaming loops.
///
/// Validates as records are processed so the input is only read once.
#[derive(Debug, Default)]
pub struct SortValidator {
    prev_token: Option<String>,
    record_count: u64,
}

impl SortValidator {
    /// Create a new sort validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate that the given token maintains sort order.
    #[inline]
    pub fn validate(&mut self, token: &str) -> Result<(), KmerError> {
        self.record_count += 1;

        if let Some(ref prev) = self.prev_token {
            if token.as_bytes() < prev.as_bytes() {
                return Err(KmerError::InvalidFormat(format!(
                    "input not sorted: token '{}' at record {} comes after '{}'",
                    token, self.record_count, prev
                )));
            }
            if token == prev {
                return Ok(());
            }
        }

        self.prev_token = Some(token.to_string());
        Ok(())
    }
}
