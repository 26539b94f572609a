//! Lattica CLI - Distributed Batch SOM Training
//!
//! Command-line interface for training self-organizing lattices over
//! partitioned data sets. Ranks run as threads of this process; the
//! parallel backend is selected here, at the entry point, and injected
//! into every rank.

use clap::{Parser, Subcommand, ValueEnum};
use lattica::{
    ChannelComm, Communicator, Dataset, Lattice, LatticaError, Result, SerialComm, SharedComm,
    TrainReport, TrainSettings,
};
use log::error;
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Parser)]
#[command(name = "lattica")]
#[command(author = "Lattica Contributors")]
#[command(version)]
#[command(about = "Distributed batch SOM training", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Parallel transport connecting the ranks.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// Single rank, degenerate collectives
    Serial,
    /// Message passing over per-rank channels
    Channel,
    /// One-sided shared lanes with a barrier
    Shared,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a lattice over a data set
    Train {
        /// Input file: one record per line, whitespace-separated doubles
        #[arg(short, long)]
        dataset: PathBuf,

        /// Dimension of a square lattice (used when rows/cols are absent)
        #[arg(short, long, default_value = "10")]
        latticedim: usize,

        /// Number of lattice rows
        #[arg(long)]
        rows: Option<usize>,

        /// Number of lattice columns
        #[arg(long)]
        cols: Option<usize>,

        /// Epoch cap; 0 means one epoch per record
        #[arg(short, long, default_value = "0")]
        epochs: usize,

        /// Convergence threshold on the normalized diff
        #[arg(long, default_value = "0")]
        diffmin: f64,

        /// Global batch size; 0 means the whole data set per batch
        #[arg(short, long, default_value = "0")]
        batchsize: usize,

        /// Initial neighborhood radius (default: half the smaller side)
        #[arg(short, long)]
        nradius: Option<f64>,

        /// Radius decay rate; negative values shrink the radius
        #[arg(long, default_value = "0.1")]
        rdecay: f64,

        /// Random seed for reproducibility (default: wall clock)
        #[arg(short = 's', long)]
        rseed: Option<u64>,

        /// Directory receiving the lattice state dumps
        #[arg(short, long, default_value = ".")]
        outdir: PathBuf,

        /// Number of ranks
        #[arg(long, default_value = "1")]
        ranks: usize,

        /// Parallel backend
        #[arg(long, value_enum, default_value = "serial")]
        backend: Backend,
    },

    /// Print data-set statistics
    Stats {
        /// Input file to inspect
        #[arg(short, long)]
        dataset: PathBuf,

        /// Batch size used for the partitioning report
        #[arg(short, long, default_value = "0")]
        batchsize: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let outcome = match cli.command {
        Commands::Train {
            dataset,
            latticedim,
            rows,
            cols,
            epochs,
            diffmin,
            batchsize,
            nradius,
            rdecay,
            rseed,
            outdir,
            ranks,
            backend,
        } => {
            let mut settings = TrainSettings::new(dataset);
            settings.latticedim = latticedim;
            settings.rows = rows;
            settings.cols = cols;
            settings.epochs = epochs;
            settings.diffmin = diffmin;
            settings.batchsize = batchsize;
            settings.nradius = nradius;
            settings.rdecay = rdecay;
            settings.rseed = rseed;
            settings.outdir = outdir;
            cmd_train(&settings, ranks, backend)
        }
        Commands::Stats { dataset, batchsize } => cmd_stats(&dataset, batchsize),
    };

    if let Err(err) = outcome {
        error!("{err}");
        std::process::exit(1);
    }
}

fn cmd_train(settings: &TrainSettings, ranks: usize, backend: Backend) -> Result<()> {
    if ranks == 0 {
        return Err(LatticaError::Config("at least one rank is required".to_string()));
    }

    let report = match backend {
        Backend::Serial => {
            if ranks > 1 {
                return Err(LatticaError::Config(format!(
                    "the serial backend supports exactly one rank, got {ranks}"
                )));
            }
            train_rank(SerialComm::new(), settings)?
        }
        Backend::Channel => train_group(ChannelComm::group(ranks), settings)?,
        Backend::Shared => train_group(SharedComm::group(ranks), settings)?,
    };

    println!(
        "trained {} epochs, final diff {}, total {} us (communication {} us)",
        report.epochs, report.diff, report.total_micros, report.comm_micros
    );
    Ok(())
}

fn cmd_stats(dataset: &Path, batchsize: usize) -> Result<()> {
    let comm = SerialComm::new();
    let dataset = Dataset::load(dataset, batchsize, &comm)?;
    println!("Records: {}", dataset.total_records());
    println!("Dimensions: {}", dataset.dimensions());
    println!("Batch size: {}", dataset.batch_size());
    println!("Value mean: {}", dataset.value_mean());
    Ok(())
}

fn train_rank(comm: impl Communicator, settings: &TrainSettings) -> Result<TrainReport> {
    let dataset = Dataset::load(&settings.dataset, settings.batchsize, &comm)?;
    let lattice = Lattice::new(settings.rows(), settings.cols())?;
    lattice.train(&dataset, settings, &comm, None)
}

/// Runs one rank per thread and returns rank 0's report.
///
/// A failing rank aborts the whole process: its peers may already be
/// blocked in a collective that can never complete.
fn train_group<C>(comms: Vec<C>, settings: &TrainSettings) -> Result<TrainReport>
where
    C: Communicator + Send,
{
    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                let settings = settings.clone();
                scope.spawn(move || match train_rank(comm, &settings) {
                    Ok(report) => report,
                    Err(err) => {
                        error!("rank {rank}: {err}");
                        std::process::exit(1);
                    }
                })
            })
            .collect();

        let mut report = None;
        for (rank, handle) in handles.into_iter().enumerate() {
            let rank_report = handle.join().map_err(|_| {
                LatticaError::Invariant(format!("rank {rank} panicked during training"))
            })?;
            if rank == 0 {
                report = Some(rank_report);
            }
        }
        report.ok_or_else(|| LatticaError::Invariant("no rank produced a report".to_string()))
    })
}
