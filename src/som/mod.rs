//! Batch Self-Organizing Map: weights lattice, batch fraction, driver.
//!
//! Training follows the batch SOM formulation: every record of a batch
//! stages a neighborhood-weighted contribution into a numerator grid and a
//! scalar denominator, the fraction is summed across all ranks, and the
//! element-wise quotient is committed to the replicated weights. One
//! reduction per batch is the only communication of the inner loop.

mod fraction;
mod trainer;
mod weights;

pub use fraction::BatchFraction;
pub use trainer::{initialize_weights, EpochView, Lattice, TrainReport};
pub use weights::WeightGrid;
