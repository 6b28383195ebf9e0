use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Pessimistic per-edge reservation lock table.
///
/// Two planning cycles whose candidate paths share a canal section must
/// serialize; cycles touching disjoint sections proceed in parallel. A
/// guard holds its edges until dropped, which the planning engine does once
/// the cycle's commands are finalized.
#[derive(Debug, Default)]
pub struct EdgeReservations {
    held: Mutex<HashSet<usize>>,
    released: Condvar,
}

pub struct ReservationGuard<'a> {
    table: &'a EdgeReservations,
    edges: Vec<usize>,
}

impl EdgeReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire all `edges` atomically, blocking until no other cycle holds
    /// any of them. Edges are deduplicated; all-or-nothing acquisition
    /// avoids lock-order deadlocks between overlapping cycles.
    pub fn acquire(&self, edges: impl IntoIterator<Item = usize>) -> ReservationGuard<'_> {
        let mut wanted: Vec<usize> = edges.into_iter().collect();
        wanted.sort_unstable();
        wanted.dedup();

        let mut held = self.held.lock();
        while wanted.iter().any(|e| held.contains(e)) {
            self.released.wait(&mut held);
        }
        held.extend(wanted.iter().copied());
        trace!(edges = wanted.len(), "edge reservations acquired");
        ReservationGuard {
            table: self,
            edges: wanted,
        }
    }

    /// Non-blocking variant; `None` if any edge is already held.
    pub fn try_acquire(
        &self,
        edges: impl IntoIterator<Item = usize>,
    ) -> Option<ReservationGuard<'_>> {
        let mut wanted: Vec<usize> = edges.into_iter().collect();
        wanted.sort_unstable();
        wanted.dedup();

        let mut held = self.held.lock();
        if wanted.iter().any(|e| held.contains(e)) {
            return None;
        }
        held.extend(wanted.iter().copied());
        Some(ReservationGuard {
            table: self,
            edges: wanted,
        })
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();
        for e in &self.edges {
            held.remove(e);
        }
        self.table.released.notify_all();
    }
}
