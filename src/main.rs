//! kmtk: K-mer Table Toolkit
//!
//! Usage: kmtk <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;
use std::process;

use kmtk::commands::MergeCommand;
use kmtk::kmer::KmerError;
use kmtk::streaming::buffers::{DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY};

#[derive(Parser)]
#[command(name = "kmtk")]
#[command(version)]
#[command(about = "kmtk: K-mer Table Toolkit - streaming operations on sorted k-mer count tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge sorted k-mer tables, summing the frequencies of repeated tokens
    Merge {
        /// Input tables (use - or nothing for stdin; gzip is detected)
        inputs: Vec<PathBuf>,

        /// Drop k-mers whose summed frequency is below this value
        #[arg(short = 'm', long)]
        min_frequency: Option<u64>,

        /// Drop k-mers whose summed frequency is above this value
        #[arg(short = 'M', long)]
        max_frequency: Option<u64>,

        /// Replace the label of every output k-mer
        #[arg(short = 'L', long = "re-label")]
        relabel: Option<String>,

        /// Output file (default: stdout; a .gz suffix compresses)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Merge individually sorted inputs by token instead of concatenating them
        #[arg(long)]
        interleave: bool,

        /// Fail on out-of-order tokens instead of emitting split runs
        #[arg(long)]
        check_sorted: bool,

        /// Lines per batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Batches buffered between stages
        #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
        queue_capacity: usize,

        /// Print pipeline statistics to stderr
        #[arg(long)]
        stats: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Merge {
            inputs,
            min_frequency,
            max_frequency,
            relabel,
            output,
            interleave,
            check_sorted,
            batch_size,
            queue_capacity,
            stats,
        } => run_merge(
            inputs,
            min_frequency,
            max_frequency,
            relabel,
            output,
            interleave,
            check_sorted,
            batch_size,
            queue_capacity,
            stats,
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_merge(
    inputs: Vec<PathBuf>,
    min_frequency: Option<u64>,
    max_frequency: Option<u64>,
    relabel: Option<String>,
    output: Option<PathBuf>,
    interleave: bool,
    check_sorted: bool,
    batch_size: usize,
    queue_capacity: usize,
    stats: bool,
) -> Result<(), KmerError> {
    let mut cmd = MergeCommand::new()
        .with_interleave(interleave)
        .with_check_sorted(check_sorted)
        .with_batch_size(batch_size)
        .with_queue_capacity(queue_capacity);
    cmd.min_frequency = min_frequency;
    cmd.max_frequency = max_frequency;
    cmd.relabel = relabel;

    let report = cmd.run_to(&inputs, output.as_ref())?;

    if stats {
        eprintln!("Merge stats: {}", report);
    }

    Ok(())
}
