//! Shared streaming utilities.
//!
//! - Low-allocation line parsing
//! - Sort validation
//! - Efficient output formatting
//! - Buffer and queue sizing
//!
//! Nothing here holds more than one line or one run in memory.

pub mod buffers;
pub mod output;
pub mod parsing;
pub mod validation;

pub use output::RecordWriter;
pub use parsing::{
    first_field, parse_record, parse_records, parse_u64_fast, should_skip_line, Fields,
};
pub use validation::SortValidator;
