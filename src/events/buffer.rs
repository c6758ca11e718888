//! Producer-side batching of activity events.
//!
//! Events are queued in a bounded channel and delivered in batches when
//! either the size threshold or the flush interval is reached. Delivery is
//! best-effort: a full queue drops the new event, and a failed delivery
//! drops the whole batch. Both are counted, never retried.

use crate::events::validate::IncomingEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Buffer thresholds.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum number of queued events
    pub capacity: usize,
    /// Flush as soon as this many events are queued
    pub flush_size: usize,
    /// Flush queued events at least this often
    pub flush_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            flush_size: 50,
            flush_interval: Duration::from_millis(1500),
        }
    }
}

/// Cloneable handle for pushing events from any thread.
#[derive(Clone)]
pub struct BufferProducer {
    sender: Sender<IncomingEvent>,
    dropped_full: Arc<AtomicU64>,
}

impl BufferProducer {
    /// Queue an event. Returns `false` if it was dropped.
    pub fn push(&self, event: IncomingEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped_full.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// What happened to a flushed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Empty,
    Delivered(usize),
    Dropped(usize),
}

/// Counters for buffered delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub delivered: u64,
    pub dropped_full: u64,
    pub dropped_failed: u64,
}

/// Bounded event queue with an explicit flush trigger.
pub struct EventBuffer {
    config: BufferConfig,
    producer: BufferProducer,
    receiver: Receiver<IncomingEvent>,
    last_flush: Instant,
    delivered: u64,
    dropped_failed: u64,
}

impl EventBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let (sender, receiver) = bounded(config.capacity.max(1));
        Self {
            config,
            producer: BufferProducer {
                sender,
                dropped_full: Arc::new(AtomicU64::new(0)),
            },
            receiver,
            last_flush: Instant::now(),
            delivered: 0,
            dropped_failed: 0,
        }
    }

    /// Handle for producers on other threads.
    pub fn producer(&self) -> BufferProducer {
        self.producer.clone()
    }

    pub fn push(&self, event: IncomingEvent) -> bool {
        self.producer.push(event)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Whether the size or time threshold has been reached.
    pub fn should_flush(&self) -> bool {
        let queued = self.len();
        queued >= self.config.flush_size
            || (queued > 0 && self.last_flush.elapsed() >= self.config.flush_interval)
    }

    /// Drain the queue and hand the batch to `deliver`.
    pub fn flush<F, E>(&mut self, deliver: F) -> FlushOutcome
    where
        F: FnOnce(Vec<IncomingEvent>) -> Result<(), E>,
        E: Display,
    {
        self.last_flush = Instant::now();

        let batch: Vec<IncomingEvent> = self.receiver.try_iter().collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        match deliver(batch) {
            Ok(()) => {
                self.delivered += count as u64;
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                tracing::warn!(dropped = count, "event batch delivery failed: {}", e);
                self.dropped_failed += count as u64;
                FlushOutcome::Dropped(count)
            }
        }
    }

    /// Flush only if a threshold has been reached.
    pub fn flush_if_due<F, E>(&mut self, deliver: F) -> FlushOutcome
    where
        F: FnOnce(Vec<IncomingEvent>) -> Result<(), E>,
        E: Display,
    {
        if self.should_flush() {
            self.flush(deliver)
        } else {
            FlushOutcome::Empty
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            delivered: self.delivered,
            dropped_full: self.producer.dropped_full.load(Ordering::Relaxed),
            dropped_failed: self.dropped_failed,
        }
    }
}
