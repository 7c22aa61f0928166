//! Reader stage: sources to batches of raw lines.
//!
//! All sources are decoded into one logical line stream, either by
//! concatenation or by a k-way heap merge on the token. The first data line
//! decides the input format, which is published before any batch is sent.
//! Gzip input is recognised by its magic bytes, so compressed stdin works
//! the same as a `.gz` file.

use crate::config::SourceMode;
use crate::kmer::{KmerError, Result};
use crate::pipeline::channel::{Batch, BatchSender};
use crate::pipeline::format::{sniff_format, FormatPublisher};
use crate::streaming::buffers::{DEFAULT_INPUT_BUFFER, DEFAULT_LINE_BUFFER};
use crate::streaming::parsing::{first_field, should_skip_line};
use flate2::read::MultiGzDecoder;
use log::{debug, info};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One input to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Stdin,
    Path(PathBuf),
    /// In-memory table, mainly for embedding and tests.
    Memory { name: String, data: Vec<u8> },
}

impl Source {
    /// Interpret a command-line argument; `-` means stdin.
    pub fn from_arg<P: AsRef<Path>>(arg: P) -> Self {
        let path = arg.as_ref();
        if path.as_os_str() == "-" {
            Source::Stdin
        } else {
            Source::Path(path.to_path_buf())
        }
    }

    pub fn memory(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Source::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Human-readable name used in logs and errors.
    pub fn name(&self) -> String {
        match self {
            Source::Stdin => "<stdin>".to_string(),
            Source::Path(path) => path.display().to_string(),
            Source::Memory { name, .. } => name.clone(),
        }
    }

    /// Open the source, transparently decompressing gzip.
    pub fn open(self) -> Result<Box<dyn BufRead + Send>> {
        let name = self.name();
        let raw: Box<dyn Read + Send> = match self {
            Source::Stdin => Box::new(io::stdin()),
            Source::Path(path) => Box::new(File::open(&path).map_err(|e| annotate(&name, e))?),
            Source::Memory { data, .. } => Box::new(Cursor::new(data)),
        };

        let mut reader = BufReader::with_capacity(DEFAULT_INPUT_BUFFER, raw);
        let compressed = reader
            .fill_buf()
            .map_err(|e| annotate(&name, e))?
            .starts_with(&GZIP_MAGIC);

        if compressed {
            debug!("{}: gzip input detected", name);
            Ok(Box::new(BufReader::with_capacity(
                DEFAULT_INPUT_BUFFER,
                MultiGzDecoder::new(reader),
            )))
        } else {
            Ok(Box::new(reader))
        }
    }
}

fn annotate(name: &str, e: io::Error) -> KmerError {
    KmerError::Io(io::Error::new(e.kind(), format!("{}: {}", name, e)))
}

/// Data lines of a single opened source.
struct LineSource {
    name: String,
    reader: Box<dyn BufRead + Send>,
    buffer: String,
}

impl LineSource {
    fn open(source: Source) -> Result<Self> {
        let name = source.name();
        let reader = source.open()?;
        Ok(Self {
            name,
            reader,
            buffer: String::with_capacity(DEFAULT_LINE_BUFFER),
        })
    }

    /// Next non-blank, non-comment line without its line terminator.
    fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            self.buffer.clear();
            let bytes_read = self
                .reader
                .read_line(&mut self.buffer)
                .map_err(|e| annotate(&self.name, e))?;
            if bytes_read == 0 {
                return Ok(None);
            }

            let line = self.buffer.trim_end_matches(['\n', '\r']);
            if should_skip_line(line.as_bytes()) {
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }
}

/// Pending line of one source inside the interleaving heap.
struct HeapEntry {
    key: Vec<u8>,
    source: usize,
    line: String,
}

impl HeapEntry {
    fn new(source: usize, line: String) -> Self {
        let key = first_field(line.as_bytes())
            .map(|token| token.to_ascii_uppercase())
            .unwrap_or_default();
        Self { key, source, line }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Equal tokens come out in source order so the earliest label wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.source.cmp(&other.source))
    }
}

/// All sources viewed as one line stream.
enum LineStream {
    Concatenate(VecDeque<LineSource>),
    Interleave {
        sources: Vec<LineSource>,
        heap: BinaryHeap<Reverse<HeapEntry>>,
    },
}

impl LineStream {
    fn open(sources: Vec<Source>, mode: SourceMode) -> Result<Self> {
        let opened = sources
            .into_iter()
            .map(LineSource::open)
            .collect::<Result<Vec<_>>>()?;

        match mode {
            SourceMode::Concatenate => Ok(LineStream::Concatenate(opened.into())),
            SourceMode::Interleave => {
                let mut sources = opened;
                let mut heap = BinaryHeap::with_capacity(sources.len());
                for (idx, source) in sources.iter_mut().enumerate() {
                    if let Some(line) = source.next_line()? {
                        heap.push(Reverse(HeapEntry::new(idx, line)));
                    }
                }
                Ok(LineStream::Interleave { sources, heap })
            }
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        match self {
            LineStream::Concatenate(queue) => {
                while let Some(source) = queue.front_mut() {
                    if let Some(line) = source.next_line()? {
                        return Ok(Some(line));
                    }
                    debug!("{}: exhausted", source.name);
                    queue.pop_front();
                }
                Ok(None)
            }
            LineStream::Interleave { sources, heap } => {
                let Some(Reverse(entry)) = heap.pop() else {
                    return Ok(None);
                };
                if let Some(next) = sources[entry.source].next_line()? {
                    heap.push(Reverse(HeapEntry::new(entry.source, next)));
                }
                Ok(Some(entry.line))
            }
        }
    }
}

/// Statistics from the reader stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReaderStats {
    pub sources: usize,
    pub lines_read: u64,
    pub batches_sent: u64,
}

/// Decodes sources and feeds the input channel.
#[derive(Debug, Clone)]
pub struct ReaderStage {
    batch_size: usize,
    mode: SourceMode,
}

impl ReaderStage {
    pub fn new(batch_size: usize, mode: SourceMode) -> Self {
        Self { batch_size, mode }
    }

    /// Read every source to exhaustion, then send end-of-stream.
    ///
    /// The format decision is published exactly once, before the first batch.
    /// If a source cannot be opened the publisher is dropped undecided. On any
    /// failure the input channel is poisoned.
    pub fn run(
        &self,
        sources: Vec<Source>,
        output: &BatchSender<String>,
        publisher: FormatPublisher,
    ) -> Result<ReaderStats> {
        let result = self.read_all(sources, output, publisher);
        if result.is_err() {
            output.poison();
        }
        result
    }

    fn read_all(
        &self,
        sources: Vec<Source>,
        output: &BatchSender<String>,
        publisher: FormatPublisher,
    ) -> Result<ReaderStats> {
        let mut stats = ReaderStats {
            sources: sources.len(),
            ..Default::default()
        };
        let names: Vec<String> = sources.iter().map(Source::name).collect();
        info!("Reading {} source(s): {}", names.len(), names.join(", "));

        let mut stream = LineStream::open(sources, self.mode)?;

        let first = stream.next_line()?;
        let format = sniff_format(first.as_deref());
        info!("Detected input format: {}", format);
        publisher.publish(format);

        let mut batch = Batch::try_with_capacity(self.batch_size)?;
        let mut pending = first;
        while let Some(line) = pending {
            stats.lines_read += 1;
            batch.push(line);
            if batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Batch::try_with_capacity(self.batch_size)?);
                output.put(full)?;
                stats.batches_sent += 1;
            }
            pending = stream.next_line()?;
        }

        if !batch.is_empty() {
            output.put(batch)?;
            stats.batches_sent += 1;
        }
        output.finish()?;

        debug!(
            "Reader finished: {} lines in {} batches",
            stats.lines_read, stats.batches_sent
        );
        Ok(stats)
    }
}
