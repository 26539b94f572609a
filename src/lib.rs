//! # Lattica - Distributed Batch SOM Training
//!
//! Lattica trains a two-dimensional Self-Organizing Map — a grid of weight
//! vectors that iteratively self-arrange so that neighboring cells
//! represent similar input records — over a data set partitioned across an
//! arbitrary number of ranks.
//!
//! ## Overview
//!
//! Records are assigned to ranks by a deterministic round-robin scheme
//! that respects batch boundaries; every rank holds only its share.
//! Weights are replicated: each batch, every rank stages
//! neighborhood-weighted contributions for its records into a local
//! fraction (numerator grid + scalar denominator), one all-sum stitches
//! the fractions together, and the quotient is committed identically
//! everywhere. Initialization draws random records that may live on any
//! rank and broadcasts them from their owner.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lattica::{Dataset, Lattice, SerialComm, TrainSettings};
//!
//! let comm = SerialComm::new();
//! let mut settings = TrainSettings::new("records.txt");
//! settings.latticedim = 16;
//! settings.epochs = 50;
//! settings.rseed = Some(42);
//!
//! let dataset = Dataset::load(&settings.dataset, settings.batchsize, &comm)?;
//! let lattice = Lattice::new(settings.rows(), settings.cols())?;
//! let report = lattice.train(&dataset, &settings, &comm, None)?;
//! println!("trained {} epochs, final diff {}", report.epochs, report.diff);
//! ```
//!
//! ## Architecture
//!
//! - [`parallel`] - rank identity, collectives, symmetric buffers and the
//!   three backends (serial, channel message passing, shared lanes)
//! - [`dataset`] - loading, partitioning and global/local addressing
//! - [`som`] - the weights lattice, the batch fraction and the driver
//! - [`config`] - training settings with their defaults
//! - [`error`] - the crate error type
//!
//! ## Running multi-rank
//!
//! Ranks are threads of one process connected by the chosen backend; build
//! a group and hand one communicator to each rank:
//!
//! ```rust,ignore
//! use lattica::{ChannelComm, Dataset, Lattice, TrainSettings};
//!
//! let settings = TrainSettings::new("records.txt");
//! std::thread::scope(|scope| {
//!     for comm in ChannelComm::group(4) {
//!         let settings = settings.clone();
//!         scope.spawn(move || {
//!             let dataset = Dataset::load(&settings.dataset, settings.batchsize, &comm)?;
//!             let lattice = Lattice::new(settings.rows(), settings.cols())?;
//!             lattice.train(&dataset, &settings, &comm, None)
//!         });
//!     }
//! });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod parallel;
pub mod som;

// Re-export commonly used types
pub use config::TrainSettings;
pub use dataset::Dataset;
pub use error::{LatticaError, Result};
pub use parallel::{distribute, ChannelComm, Communicator, SerialComm, SharedComm, SymBuffer};
pub use som::{initialize_weights, BatchFraction, EpochView, Lattice, TrainReport, WeightGrid};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
