//! Single-process backend: one rank, degenerate collectives.

use super::{check_counts, check_root, CommTimer, Communicator};
use crate::error::Result;

/// Communicator for a single-rank computation.
///
/// Broadcast is a no-op and the reductions degenerate to element copies,
/// which keeps a one-rank run on exactly the same code path as a
/// multi-rank one.
#[derive(Debug, Default)]
pub struct SerialComm {
    timer: CommTimer,
}

impl SerialComm {
    /// Creates the single-rank communicator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn ranks(&self) -> usize {
        1
    }

    fn backend(&self) -> &'static str {
        "serial"
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        check_root(root, 1)?;
        self.timer.time(|| {
            let _ = buf; // the data is already everywhere it needs to be
        });
        Ok(())
    }

    fn sum_all(&self, src: &[f64], dst: &mut [f64]) -> Result<()> {
        check_counts(src.len(), dst.len())?;
        self.timer.time(|| dst.copy_from_slice(src));
        Ok(())
    }

    fn max_all(&self, src: &[f64], dst: &mut [f64]) -> Result<()> {
        check_counts(src.len(), dst.len())?;
        self.timer.time(|| dst.copy_from_slice(src));
        Ok(())
    }

    fn comm_micros(&self) -> u64 {
        self.timer.total_micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let comm = SerialComm::new();
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.ranks(), 1);
        assert_eq!(comm.backend(), "serial");
    }

    #[test]
    fn test_broadcast_is_noop() {
        let comm = SerialComm::new();
        let mut buf = [1.0, 2.0, 3.0];
        comm.broadcast(&mut buf, 0).unwrap();
        assert_eq!(buf, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_broadcast_rejects_bad_root() {
        let comm = SerialComm::new();
        let mut buf = [0.0];
        assert!(comm.broadcast(&mut buf, 1).is_err());
    }

    #[test]
    fn test_reductions_copy() {
        let comm = SerialComm::new();
        let src = [4.0, -2.0];
        let mut dst = [0.0, 0.0];
        comm.sum_all(&src, &mut dst).unwrap();
        assert_eq!(dst, src);
        dst = [0.0, 0.0];
        comm.max_all(&src, &mut dst).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn test_reduction_count_mismatch() {
        let comm = SerialComm::new();
        let src = [1.0, 2.0];
        let mut dst = [0.0];
        assert!(comm.sum_all(&src, &mut dst).is_err());
    }
}
