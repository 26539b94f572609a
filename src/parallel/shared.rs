//! One-sided shared-memory backend.
//!
//! Ranks are threads of one process sharing a hub of per-rank lanes, the
//! in-process rendition of a symmetric heap: a collective has every rank
//! post its contribution to its own lane, a barrier closes the exposure
//! epoch, and then every rank reads whichever lanes it needs. Reductions
//! fold the lanes locally in ascending rank order, so each rank computes
//! the same sum in the same order and the results are bit-identical
//! everywhere.

use super::{check_counts, check_root, CommTimer, Communicator};
use crate::error::{LatticaError, Result};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

#[derive(Debug)]
struct Hub {
    ranks: usize,
    barrier: Barrier,
    lanes: Vec<Mutex<Vec<f64>>>,
}

/// Communicator backed by shared lanes and a barrier.
///
/// Build a full group with [`SharedComm::group`] and hand one value to
/// each rank thread.
#[derive(Debug)]
pub struct SharedComm {
    rank: usize,
    hub: Arc<Hub>,
    timer: CommTimer,
}

impl SharedComm {
    /// Creates communicators for a group of `ranks` ranks.
    ///
    /// The returned vector holds one communicator per rank, in rank order;
    /// every collective must then be entered by all of them.
    pub fn group(ranks: usize) -> Vec<SharedComm> {
        assert!(ranks > 0, "a group needs at least one rank");
        let hub = Arc::new(Hub {
            ranks,
            barrier: Barrier::new(ranks),
            lanes: (0..ranks).map(|_| Mutex::new(Vec::new())).collect(),
        });
        (0..ranks)
            .map(|rank| SharedComm {
                rank,
                hub: Arc::clone(&hub),
                timer: CommTimer::default(),
            })
            .collect()
    }

    fn lane(&self, rank: usize) -> Result<MutexGuard<'_, Vec<f64>>> {
        self.hub.lanes[rank]
            .lock()
            .map_err(|_| LatticaError::Invariant("a rank died holding a lane lock".to_string()))
    }

    fn post(&self, data: &[f64]) -> Result<()> {
        let mut lane = self.lane(self.rank)?;
        lane.clear();
        lane.extend_from_slice(data);
        Ok(())
    }

    /// Folds all lanes into `dst` in ascending rank order.
    fn fold(&self, dst: &mut [f64], combine: impl Fn(f64, f64) -> f64) -> Result<()> {
        for rank in 0..self.hub.ranks {
            let lane = self.lane(rank)?;
            if lane.len() != dst.len() {
                return Err(LatticaError::Invariant(format!(
                    "rank {rank} entered a reduction with {} doubles, expected {}",
                    lane.len(),
                    dst.len()
                )));
            }
            if rank == 0 {
                dst.copy_from_slice(&lane);
            } else {
                for (d, s) in dst.iter_mut().zip(lane.iter()) {
                    *d = combine(*d, *s);
                }
            }
        }
        Ok(())
    }

    fn reduce(&self, src: &[f64], dst: &mut [f64], combine: impl Fn(f64, f64) -> f64) -> Result<()> {
        check_counts(src.len(), dst.len())?;
        if self.hub.ranks == 1 {
            self.timer.time(|| dst.copy_from_slice(src));
            return Ok(());
        }
        self.timer.time(|| -> Result<()> {
            self.post(src)?;
            self.hub.barrier.wait();
            let folded = self.fold(dst, combine);
            // Lanes may be reused only after every rank has read them.
            self.hub.barrier.wait();
            folded
        })
    }
}

impl Communicator for SharedComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn ranks(&self) -> usize {
        self.hub.ranks
    }

    fn backend(&self) -> &'static str {
        "shared"
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        check_root(root, self.hub.ranks)?;
        if self.hub.ranks == 1 {
            return Ok(());
        }
        self.timer.time(|| -> Result<()> {
            if self.rank == root {
                self.post(buf)?;
            }
            self.hub.barrier.wait();
            let copied = if self.rank == root {
                Ok(())
            } else {
                let lane = self.lane(root)?;
                if lane.len() != buf.len() {
                    Err(LatticaError::Invariant(format!(
                        "broadcast root posted {} doubles, this rank expects {}",
                        lane.len(),
                        buf.len()
                    )))
                } else {
                    buf.copy_from_slice(&lane);
                    Ok(())
                }
            };
            self.hub.barrier.wait();
            copied
        })
    }

    fn sum_all(&self, src: &[f64], dst: &mut [f64]) -> Result<()> {
        self.reduce(src, dst, |a, b| a + b)
    }

    fn max_all(&self, src: &[f64], dst: &mut [f64]) -> Result<()> {
        self.reduce(src, dst, f64::max)
    }

    fn comm_micros(&self) -> u64 {
        self.timer.total_micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_group<T, F>(ranks: usize, f: F) -> Vec<T>
    where
        F: Fn(SharedComm) -> T + Send + Sync,
        T: Send,
    {
        let comms = SharedComm::group(ranks);
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_group_identity() {
        let results = run_group(3, |comm| (comm.rank(), comm.ranks()));
        for (rank, result) in results.iter().enumerate() {
            assert_eq!(*result, (rank, 3));
        }
    }

    #[test]
    fn test_sum_all_over_four_ranks() {
        let results = run_group(4, |comm| {
            let src = [comm.rank() as f64 + 1.0, 10.0];
            let mut dst = [0.0, 0.0];
            comm.sum_all(&src, &mut dst).unwrap();
            dst
        });
        for dst in results {
            assert_eq!(dst, [10.0, 40.0]);
        }
    }

    #[test]
    fn test_max_all_over_four_ranks() {
        let results = run_group(4, |comm| {
            let src = [-(comm.rank() as f64), comm.rank() as f64];
            let mut dst = [0.0, 0.0];
            comm.max_all(&src, &mut dst).unwrap();
            dst
        });
        for dst in results {
            assert_eq!(dst, [0.0, 3.0]);
        }
    }

    #[test]
    fn test_broadcast_from_nonzero_root() {
        let results = run_group(3, |comm| {
            let mut buf = if comm.rank() == 2 {
                [7.0, 8.0, 9.0]
            } else {
                [0.0; 3]
            };
            comm.broadcast(&mut buf, 2).unwrap();
            buf
        });
        for buf in results {
            assert_eq!(buf, [7.0, 8.0, 9.0]);
        }
    }

    #[test]
    fn test_consecutive_collectives_keep_lanes_clean() {
        let results = run_group(2, |comm| {
            let mut out = Vec::new();
            for round in 0..3 {
                let src = [comm.rank() as f64 + round as f64];
                let mut dst = [0.0];
                comm.sum_all(&src, &mut dst).unwrap();
                out.push(dst[0]);
            }
            out
        });
        for out in results {
            assert_eq!(out, vec![1.0, 3.0, 5.0]);
        }
    }

    #[test]
    fn test_single_rank_degenerates_to_copy() {
        let comms = SharedComm::group(1);
        let comm = &comms[0];
        let src = [5.0, 6.0];
        let mut dst = [0.0, 0.0];
        comm.sum_all(&src, &mut dst).unwrap();
        assert_eq!(dst, src);
        let mut buf = [1.0];
        comm.broadcast(&mut buf, 0).unwrap();
        assert_eq!(buf, [1.0]);
    }
}
