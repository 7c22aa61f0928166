//! Writer stage: record batches to the output destination.

use crate::kmer::Result;
use crate::pipeline::channel::{BatchReceiver, Message};
use crate::record::Record;
use crate::streaming::buffers::DEFAULT_OUTPUT_BUFFER;
use crate::streaming::output::RecordWriter;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Where merged records end up.
pub enum Destination {
    Stdout(io::Stdout),
    /// A file that is created on the first write or on `finish`.
    Pending(PathBuf),
    File(File),
    Gzip(GzEncoder<File>),
}

impl Destination {
    pub fn stdout() -> Self {
        Destination::Stdout(io::stdout())
    }

    /// Create `path`, gzip-compressing when it ends in `.gz`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::open(path.as_ref())?)
    }

    /// Like `create`, but leaves an existing file untouched until output
    /// is actually produced.
    pub fn deferred<P: Into<PathBuf>>(path: P) -> Self {
        Destination::Pending(path.into())
    }

    fn open(path: &Path) -> io::Result<Self> {
        let file = File::create(path).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
        })?;
        if path.extension().is_some_and(|ext| ext == "gz") {
            Ok(Destination::Gzip(GzEncoder::new(file, Compression::default())))
        } else {
            Ok(Destination::File(file))
        }
    }

    fn ensure_open(&mut self) -> io::Result<()> {
        if let Destination::Pending(path) = self {
            debug!("Creating output file {}", path.display());
            *self = Self::open(path)?;
        }
        Ok(())
    }

    /// Flush everything, writing the gzip trailer if compressing.
    pub fn finish(mut self) -> Result<()> {
        self.ensure_open()?;
        match self {
            Destination::Stdout(mut out) => out.flush()?,
            Destination::Pending(_) => {}
            Destination::File(mut file) => file.flush()?,
            Destination::Gzip(encoder) => {
                encoder.finish()?.flush()?;
            }
        }
        Ok(())
    }
}

impl Write for Destination {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        match self {
            Destination::Stdout(out) => out.write(buf),
            Destination::Pending(_) => Ok(0),
            Destination::File(file) => file.write(buf),
            Destination::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Destination::Stdout(out) => out.flush(),
            Destination::Pending(_) => Ok(()),
            Destination::File(file) => file.flush(),
            Destination::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Statistics from the writer stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriterStats {
    pub records_written: u64,
    pub batches_received: u64,
}

/// Sole consumer of the output channel.
#[derive(Debug, Clone)]
pub struct WriterStage {
    buffer_size: usize,
}

impl Default for WriterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterStage {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_OUTPUT_BUFFER,
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Write every record until end-of-stream, then flush.
    ///
    /// Whatever was written is flushed even when the stage fails; the output
    /// channel is poisoned on failure.
    pub fn run<W: Write>(&self, input: &BatchReceiver<Record>, output: W) -> Result<WriterStats> {
        let mut writer = RecordWriter::with_capacity(self.buffer_size, output);
        let result = Self::drain(input, &mut writer);
        let flushed = writer.flush();

        let result = match (result, flushed) {
            (Ok(stats), Ok(())) => Ok(stats),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), flushed) => {
                if let Err(flush_err) = flushed {
                    warn!("Could not flush partial output: {}", flush_err);
                }
                Err(e)
            }
        };
        if result.is_err() {
            input.poison();
        }
        result
    }

    fn drain<W: Write>(
        input: &BatchReceiver<Record>,
        writer: &mut RecordWriter<W>,
    ) -> Result<WriterStats> {
        let mut stats = WriterStats::default();
        loop {
            match input.take()? {
                Message::Data(batch) => {
                    stats.batches_received += 1;
                    for record in batch.iter() {
                        writer.write_record(record)?;
                        stats.records_written += 1;
                    }
                }
                Message::EndOfStream => break,
            }
        }
        debug!(
            "Writer finished: {} records in {} batches",
            stats.records_written, stats.batches_received
        );
        Ok(stats)
    }
}
