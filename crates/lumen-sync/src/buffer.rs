//! Experience Buffer
//!
//! Ordered queue of Experiences the server has not yet received. Items leave the
//! buffer only after a successful delivery (or an explicit acknowledgment), and
//! draining is strictly FIFO with one item in flight at a time.
//!
//! The buffer is bounded. Pushing past capacity drops the oldest item and logs it
//! as a lossy condition; the relative order of the retained items is unchanged.

use async_trait::async_trait;
use lumen_core::{Experience, ExperienceId, LumenError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default capacity while offline
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

/// Destination for drained Experiences
#[async_trait]
pub trait ExperienceSink: Send {
    /// Deliver one Experience; `Ok` means the item may leave the buffer
    async fn deliver(&mut self, experience: &Experience) -> Result<()>;
}

/// Result of one drain pass
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Items delivered and removed
    pub delivered: usize,
    /// Items still buffered when the pass ended
    pub remaining: usize,
    /// Delivery error that stopped the pass, if any
    pub error: Option<LumenError>,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Bounded FIFO of not-yet-delivered Experiences
#[derive(Debug)]
pub struct ExperienceBuffer {
    entries: Mutex<VecDeque<Experience>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl ExperienceBuffer {
    /// Create a buffer holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an Experience, returning the oldest one if it had to be dropped
    pub fn push(&self, experience: Experience) -> Option<Experience> {
        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(experience);
        drop(entries);

        if let Some(evicted) = &evicted {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                dropped = %evicted.id(),
                capacity = self.capacity,
                total_dropped = total,
                "Experience buffer full, dropping oldest item"
            );
        }
        evicted
    }

    /// Remove an item by id (acknowledgment path); returns whether it was present
    pub fn remove(&self, id: ExperienceId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.id() == id) {
            Some(idx) => {
                entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Oldest buffered item
    pub fn front(&self) -> Option<Experience> {
        self.entries.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items dropped by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy of the buffered items, oldest first
    pub fn snapshot(&self) -> Vec<Experience> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Deliver the oldest item; `Ok(None)` when there is nothing to deliver
    ///
    /// The item is removed only after `sink` accepted it. On error it stays at
    /// the front.
    pub async fn deliver_next<S>(&self, sink: &mut S) -> Result<Option<ExperienceId>>
    where
        S: ExperienceSink + ?Sized,
    {
        let Some(next) = self.front() else {
            return Ok(None);
        };
        if let Err(error) = sink.deliver(&next).await {
            debug!(id = %next.id(), error = %error, "Delivery failed, keeping item");
            return Err(error);
        }
        self.remove(next.id());
        Ok(Some(next.id()))
    }

    /// Deliver buffered items in insertion order, one at a time
    ///
    /// The pass stops at the first delivery error, leaving that item at the
    /// front. Items pushed while the pass is running are delivered by the same
    /// pass. `pacing` is slept between consecutive deliveries.
    pub async fn drain<S>(&self, sink: &mut S, pacing: Duration) -> DrainReport
    where
        S: ExperienceSink + ?Sized,
    {
        let mut report = DrainReport::default();

        loop {
            match self.deliver_next(sink).await {
                Ok(Some(_)) => report.delivered += 1,
                Ok(None) => break,
                Err(error) => {
                    report.error = Some(error);
                    break;
                }
            }
            if !pacing.is_zero() && !self.is_empty() {
                tokio::time::sleep(pacing).await;
            }
        }

        report.remaining = self.len();
        report
    }
}

impl Default for ExperienceBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{EvolutionEngine, ExperienceInput};

    fn experiences(n: usize) -> Vec<Experience> {
        let engine = EvolutionEngine::default();
        let mut state = engine.initial_state("web-1", 0.5, 0);
        (0..n)
            .map(|i| {
                let exp = engine.record(&state, ExperienceInput::new(format!("e{i}")), i as u64);
                state = exp.state_after().clone();
                exp
            })
            .collect()
    }

    struct Collect {
        delivered: Vec<ExperienceId>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl ExperienceSink for Collect {
        async fn deliver(&mut self, experience: &Experience) -> Result<()> {
            if self.fail_after == Some(self.delivered.len()) {
                return Err(LumenError::transport("connection reset"));
            }
            self.delivered.push(experience.id());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drain_is_fifo() {
        let buffer = ExperienceBuffer::new(10);
        let items = experiences(3);
        for item in &items {
            buffer.push(item.clone());
        }

        let mut sink = Collect {
            delivered: Vec::new(),
            fail_after: None,
        };
        let report = buffer.drain(&mut sink, Duration::ZERO).await;

        assert!(report.is_complete());
        assert_eq!(report.delivered, 3);
        assert_eq!(
            sink.delivered,
            items.iter().map(Experience::id).collect::<Vec<_>>()
        );
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_item() {
        let buffer = ExperienceBuffer::new(10);
        let items = experiences(3);
        for item in &items {
            buffer.push(item.clone());
        }

        let mut sink = Collect {
            delivered: Vec::new(),
            fail_after: Some(1),
        };
        let report = buffer.drain(&mut sink, Duration::ZERO).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 2);
        assert!(report.error.is_some());
        assert_eq!(buffer.front().map(|e| e.id()), Some(items[1].id()));
    }

    #[tokio::test]
    async fn test_deliver_next_takes_one_item() {
        let buffer = ExperienceBuffer::new(10);
        let items = experiences(2);
        for item in &items {
            buffer.push(item.clone());
        }

        let mut failing = Collect {
            delivered: Vec::new(),
            fail_after: Some(0),
        };
        assert!(buffer.deliver_next(&mut failing).await.is_err());
        assert_eq!(buffer.len(), 2);

        let mut sink = Collect {
            delivered: Vec::new(),
            fail_after: None,
        };
        assert_eq!(buffer.deliver_next(&mut sink).await.unwrap(), Some(items[0].id()));
        assert_eq!(buffer.front().map(|e| e.id()), Some(items[1].id()));
        assert_eq!(buffer.deliver_next(&mut sink).await.unwrap(), Some(items[1].id()));
        assert_eq!(buffer.deliver_next(&mut sink).await.unwrap(), None);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = ExperienceBuffer::new(2);
        let items = experiences(3);
        assert!(buffer.push(items[0].clone()).is_none());
        assert!(buffer.push(items[1].clone()).is_none());
        let evicted = buffer.push(items[2].clone()).unwrap();

        assert_eq!(evicted.id(), items[0].id());
        assert_eq!(buffer.dropped(), 1);
        let ids: Vec<_> = buffer.snapshot().iter().map(Experience::id).collect();
        assert_eq!(ids, vec![items[1].id(), items[2].id()]);
    }

    #[test]
    fn test_remove_by_ack() {
        let buffer = ExperienceBuffer::default();
        let items = experiences(2);
        buffer.push(items[0].clone());
        buffer.push(items[1].clone());

        assert!(buffer.remove(items[1].id()));
        assert!(!buffer.remove(items[1].id()));
        assert_eq!(buffer.len(), 1);
    }
}
