// Append Queue: FIFO of fetched buffers awaiting delivery to the decode sink.
//
// Concurrent fetches complete in any order, so each fetch reserves a slot
// when it is issued and fills it on completion. The head is released only
// once it is filled, which keeps delivery order equal to issue order.

use crate::segment::FetchedBuffer;
use std::collections::BTreeMap;
use tracing::trace;

/// Position of a reserved slot in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

#[derive(Debug)]
enum Slot {
    Pending { generation: u64 },
    Ready(FetchedBuffer),
}

impl Slot {
    fn generation(&self) -> u64 {
        match self {
            Slot::Pending { generation } => *generation,
            Slot::Ready(buffer) => buffer.generation,
        }
    }
}

#[derive(Debug, Default)]
pub struct AppendQueue {
    slots: BTreeMap<Ticket, Slot>,
    next_ticket: u64,
    ready_bytes: usize,
}

impl AppendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an already fetched buffer to the tail.
    pub fn enqueue(&mut self, buffer: FetchedBuffer) {
        let ticket = self.reserve(buffer.generation);
        self.fill(ticket, buffer);
    }

    /// Reserves the next slot for a fetch that is about to be issued.
    pub fn reserve(&mut self, generation: u64) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.slots.insert(ticket, Slot::Pending { generation });
        ticket
    }

    /// Fills a reserved slot. Returns `false` (and drops the buffer) when
    /// the slot no longer exists or belongs to another generation.
    pub fn fulfill(&mut self, ticket: Ticket, buffer: FetchedBuffer) -> bool {
        match self.slots.get(&ticket) {
            Some(Slot::Pending { generation }) if *generation == buffer.generation => {
                self.fill(ticket, buffer);
                true
            }
            _ => {
                trace!(?ticket, kind = %buffer.kind, "Dropping buffer for released slot");
                false
            }
        }
    }

    /// Releases a reserved slot whose fetch failed or was cancelled.
    pub fn abandon(&mut self, ticket: Ticket) -> bool {
        match self.slots.get(&ticket) {
            Some(Slot::Pending { .. }) => {
                self.slots.remove(&ticket);
                true
            }
            _ => false,
        }
    }

    /// Removes the head if it has been filled.
    pub fn pop_ready(&mut self) -> Option<FetchedBuffer> {
        let entry = self.slots.first_entry()?;
        if !matches!(entry.get(), Slot::Ready(_)) {
            return None;
        }
        match entry.remove() {
            Slot::Ready(buffer) => {
                self.ready_bytes -= buffer.len();
                Some(buffer)
            }
            Slot::Pending { .. } => None,
        }
    }

    pub fn head_is_ready(&self) -> bool {
        matches!(self.slots.values().next(), Some(Slot::Ready(_)))
    }

    /// Drops every slot, pending or filled, older than `generation`.
    /// Returns the number of slots removed.
    pub fn purge_before(&mut self, generation: u64) -> usize {
        let before = self.slots.len();
        let mut freed = 0;
        self.slots.retain(|_, slot| {
            let keep = slot.generation() >= generation;
            if !keep && let Slot::Ready(buffer) = slot {
                freed += buffer.len();
            }
            keep
        });
        self.ready_bytes -= freed;
        before - self.slots.len()
    }

    /// Total slots, pending and filled.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Pending { .. }))
            .count()
    }

    /// Bytes held by filled slots.
    pub fn ready_bytes(&self) -> usize {
        self.ready_bytes
    }

    fn fill(&mut self, ticket: Ticket, buffer: FetchedBuffer) {
        self.ready_bytes += buffer.len();
        self.slots.insert(ticket, Slot::Ready(buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{RepresentationId, SegmentKind};
    use bytes::Bytes;

    fn buffer(generation: u64, kind: SegmentKind) -> FetchedBuffer {
        FetchedBuffer {
            representation: RepresentationId::new("720p"),
            kind,
            generation,
            data: Bytes::from(format!("{kind}")),
        }
    }

    fn drain(queue: &mut AppendQueue) -> Vec<SegmentKind> {
        std::iter::from_fn(|| queue.pop_ready()).map(|b| b.kind).collect()
    }

    #[test]
    fn enqueue_is_fifo() {
        let mut queue = AppendQueue::new();
        queue.enqueue(buffer(1, SegmentKind::Init));
        for i in 1..=4 {
            queue.enqueue(buffer(1, SegmentKind::Media(i)));
        }
        assert_eq!(
            drain(&mut queue),
            vec![
                SegmentKind::Init,
                SegmentKind::Media(1),
                SegmentKind::Media(2),
                SegmentKind::Media(3),
                SegmentKind::Media(4),
            ]
        );
        assert!(queue.is_empty());
        assert_eq!(queue.ready_bytes(), 0);
    }

    #[test]
    fn out_of_order_fills_are_resequenced() {
        let mut queue = AppendQueue::new();
        let tickets: Vec<_> = (0..3).map(|_| queue.reserve(1)).collect();

        assert!(queue.fulfill(tickets[2], buffer(1, SegmentKind::Media(3))));
        assert!(queue.pop_ready().is_none());
        assert!(queue.fulfill(tickets[1], buffer(1, SegmentKind::Media(2))));
        assert!(!queue.head_is_ready());

        assert!(queue.fulfill(tickets[0], buffer(1, SegmentKind::Media(1))));
        assert_eq!(
            drain(&mut queue),
            vec![
                SegmentKind::Media(1),
                SegmentKind::Media(2),
                SegmentKind::Media(3)
            ]
        );
    }

    #[test]
    fn abandoned_slot_unblocks_head() {
        let mut queue = AppendQueue::new();
        let first = queue.reserve(1);
        let second = queue.reserve(1);
        queue.fulfill(second, buffer(1, SegmentKind::Media(2)));

        assert!(queue.abandon(first));
        assert_eq!(drain(&mut queue), vec![SegmentKind::Media(2)]);
        assert!(!queue.abandon(first));
    }

    #[test]
    fn purge_drops_stale_generations() {
        let mut queue = AppendQueue::new();
        queue.enqueue(buffer(1, SegmentKind::Media(7)));
        let stale = queue.reserve(1);
        queue.enqueue(buffer(2, SegmentKind::Init));

        assert_eq!(queue.purge_before(2), 2);
        assert!(!queue.fulfill(stale, buffer(1, SegmentKind::Media(8))));
        assert_eq!(drain(&mut queue), vec![SegmentKind::Init]);
    }

    #[test]
    fn fulfill_rejects_generation_mismatch() {
        let mut queue = AppendQueue::new();
        let ticket = queue.reserve(3);
        assert!(!queue.fulfill(ticket, buffer(2, SegmentKind::Media(1))));
        assert_eq!(queue.pending_count(), 1);
    }
}
