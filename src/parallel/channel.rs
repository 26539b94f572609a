//! Message-passing backend over in-process channels.
//!
//! Each rank thread owns an inbox and a sender to every peer. Broadcast
//! sends the root's block to every other rank; the reductions gather all
//! contributions at rank 0, fold them in ascending rank order and scatter
//! the result back. The rank-0 fold gives the same summation order as the
//! shared-memory backend, so the two transports produce bit-identical
//! reductions for equal rank counts.

use super::{check_counts, check_root, CommTimer, Communicator};
use crate::error::{LatticaError, Result};
use std::sync::mpsc::{channel, Receiver, Sender};

struct Packet {
    from: usize,
    data: Vec<f64>,
}

/// Communicator backed by per-rank message channels.
///
/// Build a full group with [`ChannelComm::group`] and hand one value to
/// each rank thread.
pub struct ChannelComm {
    rank: usize,
    ranks: usize,
    peers: Vec<Sender<Packet>>,
    inbox: Receiver<Packet>,
    timer: CommTimer,
}

impl ChannelComm {
    /// Creates communicators for a group of `ranks` ranks, in rank order.
    pub fn group(ranks: usize) -> Vec<ChannelComm> {
        assert!(ranks > 0, "a group needs at least one rank");
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..ranks).map(|_| channel()).unzip();
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelComm {
                rank,
                ranks,
                peers: senders.clone(),
                inbox,
                timer: CommTimer::default(),
            })
            .collect()
    }

    fn send(&self, to: usize, data: Vec<f64>) -> Result<()> {
        self.peers[to]
            .send(Packet {
                from: self.rank,
                data,
            })
            .map_err(|_| LatticaError::Invariant(format!("rank {to} left the group")))
    }

    fn recv(&self) -> Result<Packet> {
        self.inbox
            .recv()
            .map_err(|_| LatticaError::Invariant("all peers left the group".to_string()))
    }

    fn reduce(&self, src: &[f64], dst: &mut [f64], combine: impl Fn(f64, f64) -> f64) -> Result<()> {
        check_counts(src.len(), dst.len())?;
        if self.ranks == 1 {
            self.timer.time(|| dst.copy_from_slice(src));
            return Ok(());
        }
        self.timer.time(|| -> Result<()> {
            if self.rank != 0 {
                self.send(0, src.to_vec())?;
                let reply = self.recv()?;
                if reply.data.len() != dst.len() {
                    return Err(LatticaError::Invariant(format!(
                        "reduction reply holds {} doubles, expected {}",
                        reply.data.len(),
                        dst.len()
                    )));
                }
                dst.copy_from_slice(&reply.data);
                return Ok(());
            }

            // Rank 0 gathers one contribution per peer, keyed by origin.
            let mut lanes: Vec<Option<Vec<f64>>> = vec![None; self.ranks];
            for _ in 1..self.ranks {
                let packet = self.recv()?;
                if packet.data.len() != dst.len() {
                    return Err(LatticaError::Invariant(format!(
                        "rank {} entered a reduction with {} doubles, expected {}",
                        packet.from,
                        packet.data.len(),
                        dst.len()
                    )));
                }
                lanes[packet.from] = Some(packet.data);
            }

            dst.copy_from_slice(src);
            for (from, lane) in lanes.iter().enumerate().skip(1) {
                let lane = lane.as_ref().ok_or_else(|| {
                    LatticaError::Invariant(format!(
                        "rank {from} sent no contribution to the reduction"
                    ))
                })?;
                for (d, s) in dst.iter_mut().zip(lane.iter()) {
                    *d = combine(*d, *s);
                }
            }

            for peer in 1..self.ranks {
                self.send(peer, dst.to_vec())?;
            }
            Ok(())
        })
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn ranks(&self) -> usize {
        self.ranks
    }

    fn backend(&self) -> &'static str {
        "channel"
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        check_root(root, self.ranks)?;
        if self.ranks == 1 {
            return Ok(());
        }
        self.timer.time(|| -> Result<()> {
            if self.rank == root {
                for peer in (0..self.ranks).filter(|&p| p != root) {
                    self.send(peer, buf.to_vec())?;
                }
                return Ok(());
            }
            let packet = self.recv()?;
            if packet.from != root {
                return Err(LatticaError::Invariant(format!(
                    "broadcast from rank {} arrived while expecting root {root}",
                    packet.from
                )));
            }
            if packet.data.len() != buf.len() {
                return Err(LatticaError::Invariant(format!(
                    "broadcast root sent {} doubles, this rank expects {}",
                    packet.data.len(),
                    buf.len()
                )));
            }
            buf.copy_from_slice(&packet.data);
            Ok(())
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
