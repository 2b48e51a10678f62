//! Bounded relay queue between the capture and output cadences.
//!
//! The producer side runs inside a real-time capture callback, so it never
//! waits: when the queue is at capacity the arriving unit is discarded
//! (drop-newest) and counted. The consumer side pulls at most one unit per
//! call and returns `None` immediately when nothing is pending.
//!
//! At every quiescent observation point
//! `enqueued - dequeued - dropped_on_full == len` and `len <= capacity`.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::{RelayError, Result};

/// Outcome of offering a unit to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The unit is queued
    Accepted,
    /// The queue was full; the unit was discarded
    DroppedFull,
    /// The consumer is gone; the unit was discarded
    Closed,
}

#[derive(Debug)]
struct QueueStats {
    capacity: usize,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped_on_full: AtomicU64,
}

impl QueueStats {
    fn counters(&self) -> QueueCounters {
        let enqueued = self.enqueued.load(Ordering::Acquire);
        let dequeued = self.dequeued.load(Ordering::Acquire);
        let dropped_on_full = self.dropped_on_full.load(Ordering::Acquire);
        QueueCounters {
            capacity: self.capacity,
            enqueued,
            dequeued,
            dropped_on_full,
            len: enqueued.saturating_sub(dequeued).saturating_sub(dropped_on_full),
        }
    }
}

/// Counter snapshot for a relay queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueCounters {
    pub capacity: usize,
    /// Units offered while the queue was open, accepted or not
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped_on_full: u64,
    pub len: u64,
}

/// Create a queue holding at most `capacity` units.
pub fn relay_queue<T>(capacity: usize) -> Result<(QueueProducer<T>, QueueConsumer<T>)> {
    if capacity == 0 {
        return Err(RelayError::configuration_rejected(
            "relay queue",
            "capacity must be at least one unit",
        ));
    }

    let (tx, rx) = mpsc::channel(capacity);
    let stats = Arc::new(QueueStats {
        capacity,
        enqueued: AtomicU64::new(0),
        dequeued: AtomicU64::new(0),
        dropped_on_full: AtomicU64::new(0),
    });

    Ok((QueueProducer { tx, stats: Arc::clone(&stats) }, QueueConsumer { rx, stats }))
}

/// Capture-side handle.
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::Sender<T>,
    stats: Arc<QueueStats>,
}

impl<T> QueueProducer<T> {
    /// Offer a unit without waiting.
    pub fn offer(&self, unit: T) -> Enqueue {
        match self.tx.try_send(unit) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::AcqRel);
                Enqueue::Accepted
            }
            Err(TrySendError::Full(unit)) => {
                self.stats.enqueued.fetch_add(1, Ordering::AcqRel);
                self.stats.dropped_on_full.fetch_add(1, Ordering::AcqRel);
                drop(unit);
                Enqueue::DroppedFull
            }
            Err(TrySendError::Closed(unit)) => {
                drop(unit);
                Enqueue::Closed
            }
        }
    }

    pub fn counters(&self) -> QueueCounters {
        self.stats.counters()
    }
}

/// Output-side handle.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::Receiver<T>,
    stats: Arc<QueueStats>,
}

impl<T> QueueConsumer<T> {
    /// Take the oldest pending unit, if any.
    pub fn try_pop(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(unit) => {
                self.stats.dequeued.fetch_add(1, Ordering::AcqRel);
                Some(unit)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Refuse further offers and hand back everything still queued.
    pub fn close_and_drain(&mut self) -> Vec<T> {
        self.rx.close();
        let mut pending = Vec::new();
        while let Some(unit) = self.try_pop() {
            pending.push(unit);
        }
        pending
    }

    pub fn len(&self) -> usize {
        self.stats.counters().len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counters(&self) -> QueueCounters {
        self.stats.counters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Offer,
        Pop,
    }

    fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
        prop::collection::vec(prop_oneof![3 => Just(Op::Offer), 2 => Just(Op::Pop)], 0..400)
    }

    proptest! {
        #[test]
        fn length_stays_within_capacity_and_balances(capacity in 1usize..40, ops in arb_ops()) {
            let (producer, mut consumer) = relay_queue::<u64>(capacity).unwrap();
            let mut next = 0u64;
            let mut expected_front = 0u64;

            for op in ops {
                match op {
                    Op::Offer => {
                        producer.offer(next);
                        next += 1;
                    }
                    Op::Pop => {
                        if let Some(unit) = consumer.try_pop() {
                            // FIFO among survivors: strictly increasing
                            prop_assert!(unit >= expected_front);
                            expected_front = unit + 1;
                        }
                    }
                }

                let c = consumer.counters();
                prop_assert!(c.len <= capacity as u64);
                prop_assert_eq!(c.enqueued - c.dequeued - c.dropped_on_full, c.len);
            }
        }
    }

    #[test]
    fn full_queue_drops_the_newest_unit() {
        let (producer, mut consumer) = relay_queue(2).unwrap();
        assert_eq!(producer.offer(1), Enqueue::Accepted);
        assert_eq!(producer.offer(2), Enqueue::Accepted);
        assert_eq!(producer.offer(3), Enqueue::DroppedFull);

        assert_eq!(consumer.try_pop(), Some(1));
        assert_eq!(consumer.try_pop(), Some(2));
        assert_eq!(consumer.try_pop(), None);
        assert_eq!(consumer.counters().dropped_on_full, 1);
    }

    #[test]
    fn matched_rates_never_drop() {
        let (producer, mut consumer) = relay_queue(30).unwrap();
        let mut max_len = 0;

        for frame in 0..100u32 {
            assert_eq!(producer.offer(frame), Enqueue::Accepted);
            max_len = max_len.max(consumer.len());
            // Output pulls one unit per production opportunity, lagging by a
            // few frames at the start.
            if frame >= 3 {
                assert!(consumer.try_pop().is_some());
            }
        }

        let counters = consumer.counters();
        assert_eq!(counters.dropped_on_full, 0);
        assert_eq!(counters.enqueued, 100);
        assert!(max_len <= 30);
    }

    #[test]
    fn empty_queue_is_a_wait_state() {
        let (_producer, mut consumer) = relay_queue::<u8>(4).unwrap();
        assert_eq!(consumer.try_pop(), None);
        assert_eq!(consumer.counters().dropped_on_full, 0);
    }

    #[test]
    fn closed_queue_rejects_offers() {
        let (producer, mut consumer) = relay_queue(4).unwrap();
        producer.offer(1);
        producer.offer(2);

        assert_eq!(consumer.close_and_drain(), vec![1, 2]);
        assert_eq!(producer.offer(3), Enqueue::Closed);
        assert!(consumer.is_empty());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(relay_queue::<u8>(0).is_err());
    }
}
