//! Training settings for the lattica engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_latticedim() -> usize {
    10
}

fn default_rdecay() -> f64 {
    0.1
}

fn default_outdir() -> PathBuf {
    PathBuf::from(".")
}

/// Settings consumed by the training driver.
///
/// Every field except `dataset` has a documented default; absent optional
/// fields resolve against the lattice geometry or the data set at training
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSettings {
    /// Input file: one record per line, whitespace-separated doubles.
    pub dataset: PathBuf,

    /// Dimension of a square lattice, used when `rows`/`cols` are absent.
    /// Default: 10.
    #[serde(default = "default_latticedim")]
    pub latticedim: usize,

    /// Number of lattice rows. Default: `latticedim`.
    #[serde(default)]
    pub rows: Option<usize>,

    /// Number of lattice columns. Default: `latticedim`.
    #[serde(default)]
    pub cols: Option<usize>,

    /// Epoch cap. 0 means "as many epochs as there are records".
    /// Default: 0.
    #[serde(default)]
    pub epochs: usize,

    /// Convergence threshold on the normalized batch diff. Values at or
    /// below 1e-6 disable the convergence test. Default: 0.
    #[serde(default)]
    pub diffmin: f64,

    /// Global batch size. 0, or any value smaller than the rank count,
    /// means "no batching": the whole data set is one batch.
    /// Default: 0.
    #[serde(default)]
    pub batchsize: usize,

    /// Initial neighborhood radius. Absent means half the smaller lattice
    /// side; an explicit 0.0 is honored and restricts every update to the
    /// BMU cell. Default: absent.
    #[serde(default)]
    pub nradius: Option<f64>,

    /// Radius decay rate, applied as `radius = nradius * exp(epoch * rdecay)`
    /// at the end of each epoch. Positive values grow the radius; pass a
    /// negative value for the conventional shrinking schedule.
    /// Default: 0.1.
    #[serde(default = "default_rdecay")]
    pub rdecay: f64,

    /// Seed for the random number generator. Absent means "seed from the
    /// wall clock" (chosen by rank 0 and broadcast); any set value makes
    /// runs replicable. Default: absent.
    #[serde(default)]
    pub rseed: Option<u64>,

    /// Directory receiving the `lattice<EPOCH>.out` state dumps.
    /// Default: the current directory.
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
}

impl TrainSettings {
    /// Creates settings for the given data set with default values for
    /// every other parameter.
    pub fn new(dataset: impl Into<PathBuf>) -> Self {
        Self {
            dataset: dataset.into(),
            latticedim: default_latticedim(),
            rows: None,
            cols: None,
            epochs: 0,
            diffmin: 0.0,
            batchsize: 0,
            nradius: None,
            rdecay: default_rdecay(),
            rseed: None,
            outdir: default_outdir(),
        }
    }

    /// Number of lattice rows, falling back to `latticedim`.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows.unwrap_or(self.latticedim)
    }

    /// Number of lattice columns, falling back to `latticedim`.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols.unwrap_or(self.latticedim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = TrainSettings::new("data.txt");
        assert_eq!(settings.latticedim, 10);
        assert_eq!(settings.rows(), 10);
        assert_eq!(settings.cols(), 10);
        assert_eq!(settings.epochs, 0);
        assert_eq!(settings.batchsize, 0);
        assert!(settings.nradius.is_none());
        assert!((settings.rdecay - 0.1).abs() < 1e-12);
        assert!(settings.rseed.is_none());
    }

    #[test]
    fn test_explicit_geometry_wins() {
        let mut settings = TrainSettings::new("data.txt");
        settings.latticedim = 16;
        settings.rows = Some(4);
        assert_eq!(settings.rows(), 4);
        assert_eq!(settings.cols(), 16);
    }

    #[test]
    fn test_clone_keeps_fields() {
        let mut settings = TrainSettings::new("d.txt");
        settings.rseed = Some(7);
        settings.nradius = Some(0.0);
        let copy = settings.clone();
        assert_eq!(copy.rseed, Some(7));
        assert_eq!(copy.nradius, Some(0.0));
    }
}
