//! Sequencing state for reliable-ordered channels.
//!
//! The sender keeps every unacknowledged frame in a [`RetransmitQueue`] and
//! resends it until the receiver's cumulative ACK passes it. The receiver
//! holds early arrivals in a [`ReorderBuffer`] and releases them in
//! sequence order.
//!
//! Sequence numbers are `u32` and compared in half-space, so they wrap.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use minstant::Instant;

/// True if `a` comes before `b`.
#[inline]
#[must_use]
pub fn seq_before(a: u32, b: u32) -> bool {
    let diff = b.wrapping_sub(a);
    diff != 0 && diff < 0x8000_0000
}

/// A frame awaiting acknowledgment.
#[derive(Debug)]
pub struct Pending {
    pub seq: u32,
    pub datagram: Vec<u8>,
    pub sent_at: Instant,
    pub attempts: u32,
}

#[derive(Debug, Default)]
pub struct RetransmitQueue {
    next_seq: u32,
    unacked: VecDeque<Pending>,
}

impl RetransmitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next pushed frame must carry.
    #[must_use]
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Records `datagram`, already sent once, under [`next_seq`](Self::next_seq).
    pub fn push(&mut self, datagram: Vec<u8>, now: Instant) -> u32 {
        let seq = self.next_seq;
        self.next_seq = seq.wrapping_add(1);
        self.unacked.push_back(Pending {
            seq,
            datagram,
            sent_at: now,
            attempts: 1,
        });
        seq
    }

    /// Drops every frame before `next_expected`. Returns how many were
    /// released.
    pub fn acknowledge(&mut self, next_expected: u32) -> usize {
        let before = self.unacked.len();
        while self
            .unacked
            .front()
            .is_some_and(|p| seq_before(p.seq, next_expected))
        {
            self.unacked.pop_front();
        }
        before - self.unacked.len()
    }

    /// Frames sent at least `timeout` ago.
    pub fn due(&mut self, now: Instant, timeout: Duration) -> impl Iterator<Item = &mut Pending> {
        self.unacked.iter_mut().filter(move |p| {
            now.checked_duration_since(p.sent_at)
                .is_some_and(|age| age >= timeout)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.unacked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unacked.is_empty()
    }
}

/// Outcome of [`ReorderBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Accepted,
    /// Already delivered or already buffered.
    Duplicate,
    /// Beyond the receive window; the sender will retransmit it.
    TooNew,
}

#[derive(Debug)]
pub struct ReorderBuffer {
    next_expected: u32,
    window: u32,
    pending: BTreeMap<u32, Vec<u8>>,
}

impl ReorderBuffer {
    #[must_use]
    pub fn new(window: u32) -> Self {
        Self {
            next_expected: 0,
            window: window.max(1),
            pending: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn insert(&mut self, seq: u32, payload: Vec<u8>) -> InsertResult {
        if seq_before(seq, self.next_expected) {
            return InsertResult::Duplicate;
        }
        if seq.wrapping_sub(self.next_expected) >= self.window {
            return InsertResult::TooNew;
        }
        if self.pending.contains_key(&seq) {
            return InsertResult::Duplicate;
        }
        self.pending.insert(seq, payload);
        InsertResult::Accepted
    }

    /// Next in-order payload, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<Vec<u8>> {
        let payload = self.pending.remove(&self.next_expected)?;
        self.next_expected = self.next_expected.wrapping_add(1);
        Some(payload)
    }

    #[must_use]
    pub fn has_gaps(&self) -> bool {
        !self.pending.is_empty() && !self.pending.contains_key(&self.next_expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_space_comparison_wraps() {
        assert!(seq_before(1, 2));
        assert!(!seq_before(2, 2));
        assert!(seq_before(u32::MAX, 0));
        assert!(!seq_before(0, u32::MAX));
    }

    #[test]
    fn cumulative_ack_releases_prefix() {
        let mut queue = RetransmitQueue::new();
        let now = Instant::now();
        for i in 0..4u8 {
            assert_eq!(queue.push(vec![i], now), u32::from(i));
        }
        assert_eq!(queue.acknowledge(2), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.acknowledge(1), 0);
        assert_eq!(queue.acknowledge(4), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn only_old_frames_are_due() {
        let mut queue = RetransmitQueue::new();
        let start = Instant::now();
        queue.push(vec![0], start);
        queue.push(vec![1], start + Duration::from_millis(30));

        let due: Vec<u32> = queue
            .due(start + Duration::from_millis(40), Duration::from_millis(20))
            .map(|p| p.seq)
            .collect();
        assert_eq!(due, vec![0]);
    }

    #[test]
    fn reorder_releases_in_sequence() {
        let mut buffer = ReorderBuffer::new(8);
        assert_eq!(buffer.insert(1, vec![1]), InsertResult::Accepted);
        assert!(buffer.has_gaps());
        assert!(buffer.pop_ready().is_none());

        assert_eq!(buffer.insert(0, vec![0]), InsertResult::Accepted);
        assert_eq!(buffer.pop_ready(), Some(vec![0]));
        assert_eq!(buffer.pop_ready(), Some(vec![1]));
        assert_eq!(buffer.next_expected(), 2);

        assert_eq!(buffer.insert(0, vec![0]), InsertResult::Duplicate);
        assert_eq!(buffer.insert(10, vec![10]), InsertResult::TooNew);
        assert_eq!(buffer.insert(3, vec![3]), InsertResult::Accepted);
        assert_eq!(buffer.insert(3, vec![3]), InsertResult::Duplicate);
    }
}
