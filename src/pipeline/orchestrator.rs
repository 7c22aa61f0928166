//! Pipeline orchestration.
//!
//! ```text
//!   Init ──► Sniffing ──► Running ──► Draining ──► Done
//!               │            │            │
//!               └────────────┴────────────┴──────► Failed
//! ```
//!
//! The coordinator runs inside a fixed rayon pool next to the three stage
//! jobs. It starts the reader, waits for the format decision, and only then
//! starts the merger and writer. Every job reports exactly one outcome, even
//! when it panics, and the scope is not left until every job has returned.

use crate::config::PipelineConfig;
use crate::kmer::{KmerError, Result};
use crate::pipeline::channel;
use crate::pipeline::format::{format_signal, InputFormat};
use crate::pipeline::merger::{MergeStats, MergerStage};
use crate::pipeline::reader::{ReaderStage, ReaderStats, Source};
use crate::pipeline::writer::{WriterStage, WriterStats};
use crate::record::Record;
use crate::streaming::buffers::WORKER_THREADS;
use log::{debug, error, info, warn};
use std::any::Any;
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Sniffing,
    Running,
    Draining,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "init",
            PipelineState::Sniffing => "sniffing",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The three worker roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Reader,
    Merger,
    Writer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reader => "reader",
            Stage::Merger => "merger",
            Stage::Writer => "writer",
        };
        f.write_str(name)
    }
}

/// A worker's error tagged with the stage that raised it.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: KmerError,
}

impl StageFailure {
    pub fn new(stage: Stage, error: KmerError) -> Self {
        Self { stage, error }
    }

    /// Poisoning or disconnection caused by another stage's failure.
    pub fn is_secondary(&self) -> bool {
        self.error.is_secondary()
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

/// Per-stage statistics of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub format: InputFormat,
    pub reader: ReaderStats,
    pub merger: MergeStats,
    pub writer: WriterStats,
}

impl PipelineReport {
    fn new(format: InputFormat) -> Self {
        Self {
            format,
            reader: ReaderStats::default(),
            merger: MergeStats::default(),
            writer: WriterStats::default(),
        }
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Format: {}, Sources: {}, Lines: {}, {}, Batches out: {}",
            self.format,
            self.reader.sources,
            self.reader.lines_read,
            self.merger,
            self.writer.batches_received
        )
    }
}

enum StageOutcome {
    Reader(Result<ReaderStats>),
    Merger(Result<MergeStats>),
    Writer(Result<WriterStats>),
}

/// Runs reader, merger and writer over a set of sources.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: PipelineState::Init,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Merge `sources` into `output`.
    ///
    /// Returns the per-stage report, or the first configuration error, a
    /// format mismatch, or every stage failure with primary causes first.
    pub fn run<W: Write + Send>(
        &mut self,
        sources: Vec<Source>,
        output: &mut W,
    ) -> Result<PipelineReport> {
        self.state = PipelineState::Init;
        let result = self.execute(sources, output);
        match result {
            Ok(_) => self.transition(PipelineState::Done),
            Err(ref e) => {
                debug!("Pipeline failed: {}", e);
                self.transition(PipelineState::Failed);
            }
        }
        result
    }

    fn execute<W: Write + Send>(
        &mut self,
        sources: Vec<Source>,
        output: &mut W,
    ) -> Result<PipelineReport> {
        self.config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(WORKER_THREADS)
            .thread_name(|i| format!("kmtk-worker-{}", i))
            .build()
            .map_err(|e| {
                KmerError::ResourceExhausted(format!("cannot start worker pool: {}", e))
            })?;

        let capacity = self.config.channel_capacity;
        let (input_tx, input_rx) = channel::bounded::<String>("input", capacity);
        let (output_tx, output_rx) = channel::bounded::<Record>("output", capacity);
        let (publisher, signal) = format_signal();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<StageOutcome>();

        let reader = ReaderStage::new(self.config.batch_size, self.config.source_mode);
        let merger = MergerStage::new(self.config.filter.clone(), self.config.batch_size)
            .with_check_sorted(self.config.check_sorted);
        let writer = WriterStage::new();
        let warn_every = self.config.format_wait_warning;

        let format = pool.scope(|scope| {
            self.transition(PipelineState::Sniffing);

            let tx = done_tx.clone();
            scope.spawn(move |_| {
                let result = guarded(Stage::Reader, || reader.run(sources, &input_tx, publisher));
                let _ = tx.send(StageOutcome::Reader(result));
            });

            let format = signal.wait(warn_every);
            match format {
                Some(InputFormat::Kmers) => {
                    self.transition(PipelineState::Running);

                    let tx = done_tx.clone();
                    scope.spawn(move |_| {
                        let result =
                            guarded(Stage::Merger, || merger.run(&input_rx, &output_tx));
                        let _ = tx.send(StageOutcome::Merger(result));
                    });

                    let tx = done_tx.clone();
                    scope.spawn(move |_| {
                        let result = guarded(Stage::Writer, || writer.run(&output_rx, output));
                        let _ = tx.send(StageOutcome::Writer(result));
                    });
                }
                _ => {
                    // Nobody will consume: unblock the reader and let it fail.
                    input_rx.poison();
                    drop(input_rx);
                    drop(output_tx);
                    drop(output_rx);
                }
            }

            self.transition(PipelineState::Draining);
            format
        });
        drop(done_tx);

        let mut report = PipelineReport::new(format.unwrap_or(InputFormat::Unknown));
        let mut failures = Vec::new();
        for outcome in done_rx.try_iter() {
            match outcome {
                StageOutcome::Reader(Ok(stats)) => report.reader = stats,
                StageOutcome::Merger(Ok(stats)) => report.merger = stats,
                StageOutcome::Writer(Ok(stats)) => report.writer = stats,
                StageOutcome::Reader(Err(e)) => failures.push(StageFailure::new(Stage::Reader, e)),
                StageOutcome::Merger(Err(e)) => failures.push(StageFailure::new(Stage::Merger, e)),
                StageOutcome::Writer(Err(e)) => failures.push(StageFailure::new(Stage::Writer, e)),
            }
        }

        match format {
            Some(InputFormat::Kmers) => {}
            Some(found) => {
                return Err(KmerError::FormatMismatch {
                    expected: InputFormat::Kmers,
                    found,
                })
            }
            None if failures.is_empty() => {
                return Err(KmerError::InvalidFormat(
                    "reader terminated before detecting the input format".into(),
                ))
            }
            None => {}
        }

        if !failures.is_empty() {
            failures.sort_by_key(StageFailure::is_secondary);
            for failure in &failures {
                debug!("Stage failure: {}", failure);
            }
            return Err(KmerError::Pipeline(failures));
        }

        if report.writer.batches_received != report.merger.batches_written {
            warn!(
                "Writer received {} batches but merger sent {}",
                report.writer.batches_received, report.merger.batches_written
            );
        }
        info!(
            "Merged {} records into {} runs, wrote {}",
            report.merger.records_read, report.merger.runs, report.writer.records_written
        );
        Ok(report)
    }
}

/// Run a stage body, turning a panic into an ordinary failure.
fn guarded<T, F>(stage: Stage, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!("{} stage panicked: {}", stage, message);
        Err(KmerError::Panic(message))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterConfig, SourceMode};
    use crate::pipeline::channel::ChannelError;
    use std::io;
    use std::path::PathBuf;

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    fn run(config: PipelineConfig, sources: Vec<Source>) -> (Pipeline, Result<PipelineReport>, String) {
        let mut pipeline = Pipeline::new(config);
        let mut out = Vec::new();
        let result = pipeline.run(sources, &mut out);
        (pipeline, result, String::from_utf8(out).unwrap())
    }

    /// The `index`-th k-mer of length `k` in lexicographic order.
    fn kmer(mut index: usize, k: usize) -> String {
        let mut bases = vec![b'A'; k];
        for slot in bases.iter_mut().rev() {
            *slot = b"ACGT"[index % 4];
            index /= 4;
        }
        String::from_utf8(bases).unwrap()
    }

    fn example() -> Source {
        Source::memory("example", "AAAA 3 s1\nAAAA 2 s2\nAACC 5 s1\n")
    }

    #[test]
    fn test_min_frequency_keeps_both_runs() {
        let config = PipelineConfig::new().with_filter(FilterConfig::new().with_min_frequency(4));
        let (pipeline, result, out) = run(config, vec![example()]);

        let report = result.unwrap();
        assert_eq!(out, "AAAA\t5\ts1\nAACC\t5\ts1\n");
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(report.format, InputFormat::Kmers);
        assert_eq!(report.merger.records_read, 3);
        assert_eq!(report.writer.records_written, 2);
    }

    #[test]
    fn test_min_frequency_drops_everything() {
        let config = PipelineConfig::new().with_filter(FilterConfig::new().with_min_frequency(6));
        let (pipeline, result, out) = run(config, vec![example()]);

        let report = result.unwrap();
        assert!(out.is_empty());
        assert_eq!(report.merger.records_filtered, 2);
        assert_eq!(report.writer.batches_received, 0);
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[test]
    fn test_relabel_across_sources() {
        let config = PipelineConfig::new()
            .with_filter(FilterConfig::new().with_relabel("MERGED"))
            .with_source_mode(SourceMode::Interleave);
        let sources = vec![
            Source::memory("a", "AAAA\t1\ta\nCCCC\t1\ta\n"),
            Source::memory("b", "AAAA\t2\tb\nGGGG\t1\tb\n"),
            Source::memory("c", "CCCC\t4\tc\n"),
        ];
        let (_, result, out) = run(config, sources);

        result.unwrap();
        assert_eq!(out, "AAAA\t3\tMERGED\nCCCC\t5\tMERGED\nGGGG\t1\tMERGED\n");
    }

    #[test]
    fn test_small_batches_and_queue_apply_backpressure() {
        let content: String = (0..2000)
            .map(|i| format!("{k}\t1\n{k}\t2\n", k = kmer(i, 6)))
            .collect();
        let config = PipelineConfig::new()
            .with_batch_size(7)
            .with_channel_capacity(1);
        let (_, result, out) = run(config, vec![Source::memory("big", content)]);

        let report = result.unwrap();
        assert_eq!(out.lines().count(), 2000);
        assert!(out.lines().all(|line| line.ends_with("\t3")));
        assert_eq!(report.reader.lines_read, 4000);
        assert_eq!(report.writer.batches_received, report.merger.batches_written);
        assert_eq!(report.merger.batches_written, 2000_u64.div_ceil(7));
    }

    #[test]
    fn test_sequence_input_is_rejected_without_output() {
        let (pipeline, result, out) =
            run(PipelineConfig::new(), vec![Source::memory("reads", ">r1\nACGT\n")]);

        assert!(matches!(
            result,
            Err(KmerError::FormatMismatch {
                expected: InputFormat::Kmers,
                found: InputFormat::Sequences,
            })
        ));
        assert!(out.is_empty());
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let (_, result, _) = run(
            PipelineConfig::new(),
            vec![Source::memory("bed", "chr1\t100\t200\n")],
        );
        assert!(matches!(
            result,
            Err(KmerError::FormatMismatch {
                found: InputFormat::Unknown,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_file_fails_in_reader() {
        let source = Source::Path(PathBuf::from("/nonexistent/kmtk/counts.txt"));
        let (pipeline, result, _) = run(PipelineConfig::new(), vec![source]);

        match result {
            Err(KmerError::Pipeline(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].stage, Stage::Reader);
                assert!(matches!(failures[0].error, KmerError::Io(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_parse_error_reported_before_secondary_failures() {
        let content: String = (0..500)
            .map(|i| format!("{}\t1\n", kmer(i, 6)))
            .chain(std::iter::once("ZZZZ\tbad\tlabel\n".to_string()))
            .collect();
        let config = PipelineConfig::new().with_batch_size(4).with_channel_capacity(1);
        let (_, result, _) = run(config, vec![Source::memory("broken", content)]);

        match result {
            Err(KmerError::Pipeline(failures)) => {
                assert_eq!(failures[0].stage, Stage::Merger);
                assert!(matches!(failures[0].error, KmerError::Parse { record: 501, .. }));
                assert!(failures[1..].iter().all(StageFailure::is_secondary));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unsorted_input_detected_when_checking() {
        let config = PipelineConfig::new().with_check_sorted(true);
        let (_, result, _) = run(
            config,
            vec![Source::memory("unsorted", "CCCC\t1\nAAAA\t1\n")],
        );

        match result {
            Err(KmerError::Pipeline(failures)) => {
                assert_eq!(failures[0].stage, Stage::Merger);
                assert!(matches!(failures[0].error, KmerError::InvalidFormat(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_writer_failure_is_primary() {
        let mut pipeline = Pipeline::new(PipelineConfig::new());
        let mut output = FailingWriter;
        let result = pipeline.run(vec![example()], &mut output);

        match result {
            Err(KmerError::Pipeline(failures)) => {
                assert_eq!(failures[0].stage, Stage::Writer);
                assert!(matches!(failures[0].error, KmerError::Io(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_fails_before_start() {
        let config = PipelineConfig::new()
            .with_filter(FilterConfig::new().with_min_frequency(9).with_max_frequency(1));
        let (pipeline, result, _) = run(config, vec![example()]);

        assert!(matches!(result, Err(KmerError::Config(_))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_oversized_queue_fails_before_start() {
        let config = PipelineConfig::new().with_channel_capacity(usize::MAX / 4);
        let (pipeline, result, out) = run(config, vec![example()]);

        assert!(matches!(result, Err(KmerError::Config(ref m)) if m.contains("queue capacity")));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(out.is_empty());
    }

    #[test]
    fn test_truncated_gzip_fails_in_reader() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let content: String = (0..20_000).map(|i| format!("{}\t1\n", kmer(i, 8))).collect();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        let mut compressed = encoder.finish().unwrap();
        compressed.truncate(compressed.len() / 2);

        let config = PipelineConfig::new().with_batch_size(64).with_channel_capacity(2);
        let (_, result, _) = run(config, vec![Source::memory("cut.gz", compressed)]);

        match result {
            Err(KmerError::Pipeline(failures)) => {
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].stage, Stage::Reader);
                assert!(matches!(failures[0].error, KmerError::Io(_)));
                assert!(failures[0].to_string().contains("cut.gz"));
                assert!(failures[1..].iter().all(StageFailure::is_secondary));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_succeeds() {
        let (_, result, out) = run(PipelineConfig::new(), vec![Source::memory("empty", "")]);
        let report = result.unwrap();
        assert!(out.is_empty());
        assert_eq!(report.writer.batches_received, 0);
    }

    #[test]
    fn test_guarded_captures_panics() {
        let result: Result<()> = guarded(Stage::Merger, || panic!("boom"));
        assert!(matches!(result, Err(KmerError::Panic(ref m)) if m == "boom"));

        let result: Result<u8> = guarded(Stage::Writer, || Ok(1));
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_secondary_failures_sort_last() {
        let mut failures = vec![
            StageFailure::new(
                Stage::Reader,
                KmerError::Channel(ChannelError::Poisoned { channel: "input" }),
            ),
            StageFailure::new(Stage::Merger, KmerError::InvalidFormat("bad".into())),
        ];
        failures.sort_by_key(StageFailure::is_secondary);
        assert_eq!(failures[0].stage, Stage::Merger);
        assert_eq!(
            KmerError::Pipeline(failures).to_string(),
            "pipeline failed: merger: Invalid input: bad; reader: channel 'input' was poisoned by a failing stage"
        );
    }
}
