//! Dispatch and record events.
//!
//! Receive workers publish `RxEvent`s onto one bounded lock-free MPMC
//! queue; the dispatcher drains it in small bulks and forwards each
//! capture to the owning recorder's input queue as a `RecordEvent`.

use crossbeam::queue::ArrayQueue;

/// One captured symbol sitting in a ring slot.
///
/// `offset` is global across workers: `worker * ring_slots + slot`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxEvent {
    pub ant_id: usize,
    pub offset: usize,
}

/// Work item for a recorder worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEvent {
    Record { offset: usize },
    Stop,
}

/// Bounded MPMC event queue between receive workers and the dispatcher.
/// Producers never block: a push onto a full queue fails and the caller
/// drops the capture.
pub struct DispatchQueue {
    q: ArrayQueue<RxEvent>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            q: ArrayQueue::new(capacity),
        }
    }

    pub fn push(&self, ev: RxEvent) -> Result<(), RxEvent> {
        self.q.push(ev)
    }

    /// Drain up to `out.len()` events; returns how many were taken.
    pub fn pop_bulk(&self, out: &mut [RxEvent]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.q.pop() {
                Some(ev) => {
                    out[n] = ev;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn capacity(&self) -> usize {
        self.q.capacity()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_push() {
        let q = DispatchQueue::new(2);
        assert!(q.push(RxEvent { ant_id: 0, offset: 0 }).is_ok());
        assert!(q.push(RxEvent { ant_id: 1, offset: 1 }).is_ok());
        // full queue rejects without blocking
        let ev = RxEvent { ant_id: 2, offset: 2 };
        assert_eq!(q.push(ev), Err(ev));
    }

    #[test]
    fn test_pop_bulk_fifo() {
        let q = DispatchQueue::new(8);
        for i in 0..6 {
            q.push(RxEvent { ant_id: i, offset: i }).unwrap();
        }
        let mut out = [RxEvent::default(); 5];
        assert_eq!(q.pop_bulk(&mut out), 5);
        for (i, ev) in out.iter().enumerate() {
            assert_eq!(ev.ant_id, i);
        }
        assert_eq!(q.pop_bulk(&mut out), 1);
        assert_eq!(out[0].ant_id, 5);
        assert!(q.is_empty());
    }
}
