//! The training driver: initialization, batches, epochs, convergence.
//!
//! One driver runs per rank, single threaded; all parallelism is between
//! ranks through the communicator. Every rank walks the same (epoch,
//! batch) iteration space and performs exactly one fraction reduction per
//! batch plus one broadcast per cell at initialization time, which keeps
//! the collective schedule symmetric by construction.

use crate::config::TrainSettings;
use crate::dataset::Dataset;
use crate::error::{LatticaError, Result};
use crate::parallel::Communicator;
use crate::som::{BatchFraction, WeightGrid};
use log::{debug, info};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A view of the training state handed to the per-epoch callback.
#[derive(Debug)]
pub struct EpochView<'a> {
    /// The epoch that just ended; 0 right after initialization.
    pub epoch: usize,
    /// The current weights, identical on every rank.
    pub weights: &'a WeightGrid,
}

/// Outcome of a completed training run.
#[derive(Debug)]
pub struct TrainReport {
    /// Number of epochs actually run.
    pub epochs: usize,
    /// Normalized diff of the last committed batch.
    pub diff: f64,
    /// Wall-clock training time in microseconds, maximum over all ranks.
    pub total_micros: u64,
    /// Time spent inside collectives in microseconds, maximum over all
    /// ranks.
    pub comm_micros: u64,
    /// The trained weights.
    pub weights: WeightGrid,
}

/// A two-dimensional lattice that can be trained against a data set.
#[derive(Debug, Clone)]
pub struct Lattice {
    rows: usize,
    cols: usize,
}

/// Constant parameters captured once at the start of a training run.
#[derive(Debug)]
struct Constants {
    epochs: usize,
    diffmin: f64,
    local_batch_size: usize,
    batches: usize,
    nradius: f64,
    rdecay: f64,
    valmean: f64,
}

impl Constants {
    fn resolve(lattice: &Lattice, dataset: &Dataset, settings: &TrainSettings) -> Result<Self> {
        let epochs = if settings.epochs > 0 {
            settings.epochs
        } else {
            dataset.total_records()
        };

        let diffmin = if settings.diffmin > 1e-6 {
            settings.diffmin
        } else {
            0.0
        };

        let nradius = settings
            .nradius
            .unwrap_or_else(|| 0.5 * lattice.rows.min(lattice.cols) as f64);
        if nradius < 0.0 {
            return Err(LatticaError::Config(format!(
                "neighborhood radius must be non-negative, got {nradius}"
            )));
        }

        let batch_size = dataset.batch_size();
        let batches = (dataset.total_records() + batch_size - 1) / batch_size;

        Ok(Self {
            epochs,
            diffmin,
            local_batch_size: dataset.local_batch_size(),
            batches,
            nradius,
            rdecay: settings.rdecay,
            valmean: dataset.value_mean(),
        })
    }
}

/// Mutable cursors of a training run.
struct TrainRun<'a> {
    constants: Constants,
    dataset: &'a Dataset,
    weights: WeightGrid,
    fraction: BatchFraction,
    epoch: usize,
    batch: usize,
    nradius: f64,
    diff: f64,
}

impl TrainRun<'_> {
    /// Presents this rank's share of the current batch, reduces the
    /// fraction across ranks and commits it to the weights.
    fn present_batch(&mut self, comm: &dyn Communicator) -> Result<()> {
        self.fraction.init();

        let first = (self.batch - 1) * self.constants.local_batch_size;
        let end = (first + self.constants.local_batch_size).min(self.dataset.local_records());
        debug!(
            "rank {} batch {} of {}: local records {first}..{end}",
            self.dataset.rank(),
            self.batch,
            self.constants.batches
        );

        for lidx in first..end {
            let record = self.dataset.local_record(lidx);
            let (bmu_row, bmu_col) = bmu_find(&self.weights, record);
            self.fraction
                .accumulate(record, bmu_row, bmu_col, self.nradius, &self.weights);
        }

        self.fraction.reduce(comm)?;

        let raw_diff = commit(&self.fraction, &mut self.weights);
        self.diff = raw_diff / (self.constants.valmean * self.weights.size3() as f64);
        Ok(())
    }
}

impl Lattice {
    /// Creates a rows × cols lattice.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(LatticaError::Config(format!(
                "lattice must have positive extent, got {rows}x{cols}"
            )));
        }
        Ok(Self { rows, cols })
    }

    /// Creates a square dim × dim lattice.
    pub fn square(dim: usize) -> Result<Self> {
        Self::new(dim, dim)
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Trains the lattice over the data set with the given settings.
    ///
    /// `on_epoch` is an optional callback fired right after initialization
    /// (epoch 0) and at the end of every epoch that does not trigger the
    /// convergence exit. The data set must have been loaded through the
    /// same communicator group.
    pub fn train(
        &self,
        dataset: &Dataset,
        settings: &TrainSettings,
        comm: &dyn Communicator,
        on_epoch: Option<&dyn Fn(&EpochView<'_>)>,
    ) -> Result<TrainReport> {
        if dataset.ranks() != comm.ranks() || dataset.rank() != comm.rank() {
            return Err(LatticaError::Invariant(format!(
                "dataset partitioned for rank {} of {} cannot train on rank {} of {}",
                dataset.rank(),
                dataset.ranks(),
                comm.rank(),
                comm.ranks()
            )));
        }

        let constants = Constants::resolve(self, dataset, settings)?;
        if comm.rank() == 0 {
            info!(
                "training a {}x{} lattice over {} records ({} ranks, {} epochs cap, \
                 {} batches per epoch, initial radius {})",
                self.rows,
                self.cols,
                dataset.total_records(),
                comm.ranks(),
                constants.epochs,
                constants.batches,
                constants.nradius
            );
        }

        let started = Instant::now();
        let mut run = TrainRun {
            weights: initialize_weights(dataset, self.rows, self.cols, settings.rseed, comm)?,
            fraction: BatchFraction::new(self.rows, self.cols, dataset.dimensions(), comm),
            nradius: constants.nradius,
            constants,
            dataset,
            epoch: 0,
            batch: 0,
            diff: 1.0,
        };

        self.dump_state(&run.weights, 0, settings, comm)?;
        if let Some(hook) = on_epoch {
            hook(&EpochView {
                epoch: 0,
                weights: &run.weights,
            });
        }

        for epoch in 1..=run.constants.epochs {
            run.epoch = epoch;
            for batch in 1..=run.constants.batches {
                run.batch = batch;
                run.present_batch(comm)?;
            }

            run.nradius = next_radius(run.constants.nradius, epoch, run.constants.rdecay);

            if comm.rank() == 0 {
                info!("epoch {epoch} of {} diff {}", run.constants.epochs, run.diff);
            }

            // Convergence is observed identically on every rank because the
            // diff derives from globally reduced values.
            if run.diff < run.constants.diffmin {
                break;
            }

            if let Some(hook) = on_epoch {
                hook(&EpochView {
                    epoch,
                    weights: &run.weights,
                });
            }
        }
        let elapsed = started.elapsed().as_micros() as u64;

        self.dump_state(&run.weights, run.epoch, settings, comm)?;

        let mut send = comm.alloc_doubles(1);
        let mut recv = comm.alloc_doubles(1);
        send[0] = elapsed as f64;
        comm.max_all(&send, &mut recv)?;
        let total_micros = recv[0] as u64;
        send[0] = comm.comm_micros() as f64;
        comm.max_all(&send, &mut recv)?;
        let comm_micros = recv[0] as u64;

        if comm.rank() == 0 {
            info!("training total time (microseconds): {total_micros}");
            info!("training communication time (microseconds): {comm_micros}");
        }

        Ok(TrainReport {
            epochs: run.epoch,
            diff: run.diff,
            total_micros,
            comm_micros,
            weights: run.weights,
        })
    }

    /// Writes the lattice state to `<outdir>/lattice<EPOCH>.out`; only
    /// rank 0 writes.
    fn dump_state(
        &self,
        weights: &WeightGrid,
        epoch: usize,
        settings: &TrainSettings,
        comm: &dyn Communicator,
    ) -> Result<()> {
        if comm.rank() > 0 {
            return Ok(());
        }
        let path = settings.outdir.join(format!("lattice{epoch}.out"));
        debug!("writing lattice state at epoch {epoch} to {}", path.display());
        let mut writer = BufWriter::new(File::create(&path)?);
        weights.dump(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Initializes a weight grid by drawing records at random global indices.
///
/// Every rank seeds the same generator and draws the same index sequence
/// in lattice order; the owning rank stages the record in a symmetric
/// buffer and broadcasts it, so the resulting grids are identical on all
/// ranks. A seed of `None` (or 0) takes the wall clock, chosen by rank 0
/// and broadcast so that the whole group agrees on it.
pub fn initialize_weights(
    dataset: &Dataset,
    rows: usize,
    cols: usize,
    seed: Option<u64>,
    comm: &dyn Communicator,
) -> Result<WeightGrid> {
    let seed = resolve_seed(seed, comm)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut weights = WeightGrid::new(rows, cols, dataset.dimensions());
    let mut sendbuff = comm.alloc_doubles(dataset.dimensions());

    for row in 0..rows {
        for col in 0..cols {
            let gidx = rng.gen_range(0..dataset.total_records());
            let (owner, lidx) = dataset.global_to_local(gidx);
            if comm.rank() == owner {
                sendbuff
                    .as_mut_slice()
                    .copy_from_slice(dataset.local_record(lidx));
            }
            comm.broadcast(&mut sendbuff, owner)?;
            let index = weights.index(row, col);
            weights.entry_mut(index).copy_from_slice(&sendbuff);
        }
    }
    Ok(weights)
}

fn resolve_seed(requested: Option<u64>, comm: &dyn Communicator) -> Result<u64> {
    match requested {
        Some(seed) if seed > 0 => Ok(seed),
        _ => {
            let mut buf = comm.alloc_doubles(1);
            if comm.rank() == 0 {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| {
                        LatticaError::Invariant("system clock is before the Unix epoch".to_string())
                    })?;
                buf[0] = now.as_secs() as f64;
            }
            comm.broadcast(&mut buf, 0)?;
            Ok(buf[0] as u64)
        }
    }
}

/// Radius schedule: `nradius * exp(epoch * rdecay)`.
///
/// With a positive `rdecay` the radius grows over epochs; a negative value
/// gives the conventional shrinking schedule.
#[inline]
pub(crate) fn next_radius(nradius: f64, epoch: usize, rdecay: f64) -> f64 {
    nradius * (epoch as f64 * rdecay).exp()
}

/// Finds the best-matching unit: the cell whose weight vector has minimum
/// squared Euclidean distance to the record. Ties resolve to the earliest
/// cell in row-major order.
pub(crate) fn bmu_find(weights: &WeightGrid, record: &[f64]) -> (usize, usize) {
    let mut best_row = 0;
    let mut best_col = 0;
    let mut min_dist = squared_distance(weights.entry(0), record);

    for row in 0..weights.rows() {
        for col in 0..weights.cols() {
            let dist = squared_distance(weights.entry(weights.index(row, col)), record);
            if dist < min_dist {
                min_dist = dist;
                best_row = row;
                best_col = col;
            }
        }
    }
    (best_row, best_col)
}

#[inline]
fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Commits the reduced fraction to the weights and returns the L1
/// magnitude of the update.
fn commit(fraction: &BatchFraction, weights: &mut WeightGrid) -> f64 {
    let denominator = fraction.denominator();
    let mut diff = 0.0;
    for (weight, numerator) in weights
        .as_mut_slice()
        .iter_mut()
        .zip(fraction.numerator().as_slice().iter())
    {
        let update = numerator / denominator;
        *weight += update;
        diff += update.abs();
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    fn grid_with(entries: &[&[f64]], rows: usize, cols: usize) -> WeightGrid {
        let mut grid = WeightGrid::new(rows, cols, entries[0].len());
        for (i, entry) in entries.iter().enumerate() {
            grid.entry_mut(i).copy_from_slice(entry);
        }
        grid
    }

    #[test]
    fn test_bmu_on_1x1_lattice() {
        let grid = WeightGrid::new(1, 1, 2);
        assert_eq!(bmu_find(&grid, &[100.0, -3.0]), (0, 0));
    }

    #[test]
    fn test_bmu_finds_true_minimum_away_from_origin_cell() {
        // The minimum sits at (1, 1); a search that keeps re-measuring the
        // (0, 0) cell would never leave the origin.
        let grid = grid_with(
            &[&[9.0], &[5.0], &[4.0], &[1.0]],
            2,
            2,
        );
        assert_eq!(bmu_find(&grid, &[1.0]), (1, 1));
    }

    #[test]
    fn test_bmu_tie_resolves_to_earliest_cell() {
        let grid = grid_with(&[&[1.0], &[3.0], &[3.0], &[1.0]], 2, 2);
        // Cells (0, 1) and (1, 0) are equidistant from 3.0.
        assert_eq!(bmu_find(&grid, &[3.0]), (0, 1));
    }

    #[test]
    fn test_commit_updates_and_diff() {
        let comm = SerialComm::new();
        let mut weights = WeightGrid::new(1, 2, 1);
        weights.as_mut_slice().copy_from_slice(&[1.0, 2.0]);

        let mut fraction = BatchFraction::new(1, 2, 1, &comm);
        fraction.init();
        // Stage a record at the first cell with radius 0: numerator is
        // (record - weight) at the BMU only, denominator 1.
        fraction.accumulate(&[3.0], 0, 0, 0.0, &weights);

        let diff = commit(&fraction, &mut weights);
        assert_eq!(weights.as_slice(), &[3.0, 2.0]);
        assert!((diff - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_radius_schedule_grows_with_positive_decay() {
        let r1 = next_radius(2.0, 1, 0.1);
        let r2 = next_radius(2.0, 2, 0.1);
        assert!(r1 > 2.0);
        assert!(r2 > r1);
        assert!((r1 - 2.0 * (0.1f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_radius_schedule_shrinks_with_negative_decay() {
        let r1 = next_radius(2.0, 1, -0.1);
        let r2 = next_radius(2.0, 2, -0.1);
        assert!(r1 < 2.0);
        assert!(r2 < r1);
        assert!(r2 > 0.0);
    }

    #[test]
    fn test_lattice_rejects_zero_extent() {
        assert!(Lattice::new(0, 3).is_err());
        assert!(Lattice::new(3, 0).is_err());
        assert!(Lattice::square(4).is_ok());
    }

    #[test]
    fn test_resolve_seed_keeps_explicit_value() {
        let comm = SerialComm::new();
        assert_eq!(resolve_seed(Some(42), &comm).unwrap(), 42);
    }

    #[test]
    fn test_resolve_seed_zero_takes_wall_clock() {
        let comm = SerialComm::new();
        let seed = resolve_seed(Some(0), &comm).unwrap();
        assert!(seed > 0);
    }
}
