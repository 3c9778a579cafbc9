//! The dispatch hub (spec.md §2's "Dispatch hub & queue"; supplemented from
//! `original_source/` per `SPEC_FULL.md` §9 — an index FIFO rather than an event FIFO).

use std::collections::VecDeque;

use crate::error::PeerId;

/// Tracks which peers have events pending delivery to the application, without re-enqueuing a
/// peer that is already queued.
pub struct DispatchHub {
    queue: VecDeque<PeerId>,
}

impl DispatchHub {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    /// Enqueues `peer_id` unless it is already pending. `needs_dispatch` is the peer's own flag,
    /// checked and flipped here so the hub never needs to scan its queue for membership.
    pub fn mark(&mut self, peer_id: PeerId, needs_dispatch: &mut bool) {
        if !*needs_dispatch {
            *needs_dispatch = true;
            self.queue.push_back(peer_id);
        }
    }

    pub fn pop(&mut self) -> Option<PeerId> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_twice_only_queues_once() {
        let mut hub = DispatchHub::new();
        let mut flag_a = false;
        hub.mark(PeerId(0), &mut flag_a);
        hub.mark(PeerId(0), &mut flag_a);
        assert_eq!(hub.len(), 1);
        assert_eq!(hub.pop(), Some(PeerId(0)));
        assert!(hub.is_empty());
    }
}
