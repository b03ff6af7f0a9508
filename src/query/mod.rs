//! Bounded multi-hop traversal over the transactional engine.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::txn::Transaction;
use crate::types::{Label, Timestamp, VertexId};

/// Time spent constructing iterators (`query`) versus draining them
/// (`resolve`), aggregated over every hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct HopTiming {
    pub query: Duration,
    pub resolve: Duration,
}

#[derive(Debug, Clone)]
pub struct KHopResult {
    /// Total edge versions observed inside the window.
    pub count: u64,
    /// Distinct vertices reached, the source included.
    pub visited: u64,
    pub timing: HopTiming,
}

/// Breadth-first expansion from `src` over `label` edges, up to `hops`
/// levels, counting every edge version inside the `[start, end]` window.
/// A destination is expanded at most once.
pub fn k_hop(
    txn: &Transaction<'_>,
    src: VertexId,
    label: Label,
    hops: u32,
    start: Timestamp,
    end: Timestamp,
) -> Result<KHopResult> {
    let mut queue: VecDeque<(VertexId, u32)> = VecDeque::new();
    let mut visited: HashSet<VertexId> = HashSet::new();
    queue.push_back((src, hops));
    visited.insert(src);

    let mut count = 0u64;
    let mut timing = HopTiming::default();

    while let Some((vertex, remaining)) = queue.pop_front() {
        let begin = Instant::now();
        let edges = txn.get_edges_with_version(vertex, label, start, end, false)?;
        let constructed = Instant::now();
        timing.query += constructed - begin;

        for edge in edges {
            count += 1;
            if remaining > 1 && visited.insert(edge.dst) {
                queue.push_back((edge.dst, remaining - 1));
            }
        }
        timing.resolve += constructed.elapsed();
    }

    Ok(KHopResult {
        count,
        visited: visited.len() as u64,
        timing,
    })
}
