//! The batch fraction: staged, neighborhood-weighted update contributions.

use crate::error::Result;
use crate::parallel::{Communicator, SymBuffer};
use crate::som::WeightGrid;

/// Accumulator for one batch's weight update.
///
/// Holds a numerator grid shaped exactly like the weights and a single
/// scalar denominator; their element-wise quotient is the update committed
/// at the end of the batch. Both live in symmetric buffers next to
/// same-shape back-buffers, so a reduction can sum into the sibling and
/// swap instead of copying.
#[derive(Debug)]
pub struct BatchFraction {
    numerator: WeightGrid,
    numerator_buffer: WeightGrid,
    denominator: SymBuffer,
    denominator_buffer: SymBuffer,
}

impl BatchFraction {
    /// Creates a zeroed fraction for a ROWS × COLS × D weights shape.
    pub fn new(rows: usize, cols: usize, dimensions: usize, comm: &dyn Communicator) -> Self {
        Self {
            numerator: WeightGrid::new(rows, cols, dimensions),
            numerator_buffer: WeightGrid::new(rows, cols, dimensions),
            denominator: comm.alloc_doubles(1),
            denominator_buffer: comm.alloc_doubles(1),
        }
    }

    /// Zeroes the numerator and the denominator in place.
    pub fn init(&mut self) {
        self.numerator.as_mut_slice().fill(0.0);
        self.denominator[0] = 0.0;
    }

    /// The numerator grid.
    #[inline]
    pub fn numerator(&self) -> &WeightGrid {
        &self.numerator
    }

    /// The scalar denominator.
    #[inline]
    pub fn denominator(&self) -> f64 {
        self.denominator[0]
    }

    /// Stages one record's contribution around its best-matching unit.
    ///
    /// Visits the cells within `⌊radius⌋` grid steps of `(bmu_row,
    /// bmu_col)`, clipped to the lattice, weighting each by
    /// `h = exp(-d² / (2·radius))` where `d²` is the squared grid distance
    /// to the BMU. The BMU itself always receives `h = 1`, which also
    /// covers the degenerate `radius = 0` where the box shrinks to the BMU
    /// alone.
    ///
    /// # Panics
    ///
    /// Panics if the record length does not match the grid's dimensions or
    /// the BMU position lies outside the grid.
    pub fn accumulate(
        &mut self,
        record: &[f64],
        bmu_row: usize,
        bmu_col: usize,
        radius: f64,
        weights: &WeightGrid,
    ) {
        let dimensions = weights.dimensions();
        assert_eq!(
            record.len(),
            dimensions,
            "record length does not match the weight dimensionality"
        );
        debug_assert!(radius >= 0.0);

        let share = radius as usize;
        let row_first = bmu_row.saturating_sub(share);
        let col_first = bmu_col.saturating_sub(share);
        let row_end = (bmu_row + share + 1).min(weights.rows());
        let col_end = (bmu_col + share + 1).min(weights.cols());

        for row in row_first..row_end {
            for col in col_first..col_end {
                let index = weights.index(row, col);
                let dr = row as f64 - bmu_row as f64;
                let dc = col as f64 - bmu_col as f64;
                let sqdist = dr * dr + dc * dc;
                let h = if sqdist == 0.0 {
                    1.0
                } else {
                    (-sqdist / (2.0 * radius)).exp()
                };

                self.denominator[0] += h;
                let entry = weights.entry(index);
                let numerator = self.numerator.entry_mut(index);
                for d in 0..dimensions {
                    numerator[d] += h * (record[d] - entry[d]);
                }
            }
        }
    }

    /// Sums the fraction across all ranks and leaves the global values in
    /// place on every rank.
    ///
    /// Sums into the back-buffers and swaps; this is the only communication
    /// performed inside a batch.
    pub fn reduce(&mut self, comm: &dyn Communicator) -> Result<()> {
        comm.sum_all(
            self.numerator.as_slice(),
            self.numerator_buffer.as_mut_slice(),
        )?;
        self.numerator.swap(&mut self.numerator_buffer);

        comm.sum_all(&self.denominator, &mut self.denominator_buffer)?;
        self.denominator.swap(&mut self.denominator_buffer);
        Ok(())
    }
}
