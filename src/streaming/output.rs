//! Efficient output formatting for merged records.
//!
//! Uses itoa for integer formatting to avoid allocation in the hot path.

use crate::kmer::KmerError;
use crate::record::Record;
use crate::streaming::buffers::DEFAULT_OUTPUT_BUFFER;
use std::io::{BufWriter, Write};

/// Buffered writer for `token[\tfrequency][\tlabel]` lines.
pub struct RecordWriter<W: Write> {
    writer: BufWriter<W>,
    itoa_buf: itoa::Buffer,
}

impl<W: Write> RecordWriter<W> {
    /// Create a new RecordWriter with the default 2MB buffer.
    pub fn new(output: W) -> Self {
        Self::with_capacity(DEFAULT_OUTPUT_BUFFER, output)
    }

    /// Create a new RecordWriter with specified buffer size.
    pub fn with_capacity(capacity: usize, output: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
            itoa_buf: itoa::Buffer::new(),
        }
    }

    /// Write one record followed by a newline.
    #[inline]
    pub fn write_record(&mut self, record: &Record) -> Result<(), KmerError> {
        self.writer.write_all(record.token.as_bytes())?;
        if let Some(frequency) = record.frequency {
            self.writer.write_all(b"\t")?;
            self.writer
                .write_all(self.itoa_buf.format(frequency).as_bytes())?;
        }
        if let Some(ref label) = record.label {
            self.writer.write_all(b"\t")?;
            self.writer.write_all(label.as_bytes())?;
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flush the output buffer.
    pub fn flush(&mut self) -> Result<(), KmerError> {
        self.writer.flush()?;
        Ok(())
    }
}
