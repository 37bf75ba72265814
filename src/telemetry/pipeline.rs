//! Bounded single-consumer task queue
//!
//! Uses an mpsc channel so producers never contend on a lock: `submit` is a
//! `try_send`, and the one consumer task drains events in FIFO order.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::sink::Sink;

/// Pluggable enrichment step run on the consumer task
pub trait Enrich<E>: Send + Sync + 'static {
    type Output: Send + 'static;

    fn enrich(&self, event: E) -> Self::Output;
}

/// Enrichment that forwards events unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl<E: Send + 'static> Enrich<E> for Passthrough {
    type Output = E;

    fn enrich(&self, event: E) -> E {
        event
    }
}

/// Point-in-time counters for one pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// Holds the receiver for one consumer and hands it back on drop, so a
/// cancelled or aborted `run` leaves the queue open for the next consumer.
struct ReceiverGuard<'a, E> {
    slot: &'a Mutex<Option<mpsc::Receiver<E>>>,
    receiver: Option<mpsc::Receiver<E>>,
}

impl<'a, E> ReceiverGuard<'a, E> {
    fn take(slot: &'a Mutex<Option<mpsc::Receiver<E>>>) -> Option<Self> {
        let receiver = slot.lock().take()?;
        Some(Self {
            slot,
            receiver: Some(receiver),
        })
    }
}

impl<E> Drop for ReceiverGuard<'_, E> {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *self.slot.lock() = Some(receiver);
        }
    }
}

pub struct TelemetryPipeline<E, X: Enrich<E>> {
    name: &'static str,
    capacity: usize,
    sender: mpsc::Sender<E>,
    /// Taken by the consumer while it runs
    receiver: Mutex<Option<mpsc::Receiver<E>>>,
    enricher: X,
    sink: Arc<dyn Sink<X::Output>>,
    counters: Counters,
}

impl<E, X> TelemetryPipeline<E, X>
where
    E: Send + 'static,
    X: Enrich<E>,
{
    pub fn new(
        name: &'static str,
        capacity: usize,
        enricher: X,
        sink: Arc<dyn Sink<X::Output>>,
    ) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            name,
            capacity,
            sender,
            receiver: Mutex::new(Some(receiver)),
            enricher,
            sink,
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events currently waiting for the consumer
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Enqueue without waiting. Returns `false` if the event was dropped.
    pub fn submit(&self, event: E) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(pipeline = self.name, "Telemetry queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(pipeline = self.name, "Telemetry queue closed, dropping event");
                false
            }
        }
    }

    /// Consume events until `shutdown` flips to `true`.
    ///
    /// The item in progress when shutdown arrives is finished; anything still
    /// queued stays queued and is not flushed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut guard) = ReceiverGuard::take(&self.receiver) else {
            warn!(pipeline = self.name, "Telemetry consumer already running");
            return;
        };
        let Some(receiver) = guard.receiver.as_mut() else {
            return;
        };

        info!(pipeline = self.name, "Telemetry worker starting");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let event = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            self.process(event).await;
        }

        info!(pipeline = self.name, "Telemetry worker stopping");
    }

    /// Spawn [`run`](Self::run) as the pipeline's consumer task
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run(shutdown).await })
    }

    async fn process(&self, event: E) {
        let record = self.enricher.enrich(event);

        match self.sink.persist(record).await {
            Ok(()) => {
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                debug!(pipeline = self.name, "Telemetry event persisted");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(pipeline = self.name, error = %e, "Failed to persist telemetry event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl Sink<u32> for RecordingSink {
        async fn persist(&self, record: u32) -> anyhow::Result<()> {
            if record == u32::MAX {
                anyhow::bail!("rejected");
            }
            self.records.lock().push(record);
            Ok(())
        }
    }

    struct Doubler;

    impl Enrich<u32> for Doubler {
        type Output = u32;

        fn enrich(&self, event: u32) -> u32 {
            event * 2
        }
    }

    async fn wait_for(pipeline: &TelemetryPipeline<u32, impl Enrich<u32>>, handled: u64) {
        for _ in 0..100 {
            let stats = pipeline.stats();
            if stats.persisted + stats.failed >= handled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline did not handle {handled} events");
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_consumer() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(TelemetryPipeline::<u32, _>::new("test", 1, Passthrough, sink.clone()));

        assert!(pipeline.submit(1));
        assert!(!pipeline.submit(2));
        assert_eq!(pipeline.queued(), 1);

        let (tx, rx) = watch::channel(false);
        let handle = pipeline.start(rx);
        wait_for(&*pipeline, 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*sink.records.lock(), vec![1]);
        assert_eq!(
            pipeline.stats(),
            PipelineStats {
                submitted: 1,
                dropped: 1,
                persisted: 1,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_fifo_order_and_enrichment() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(TelemetryPipeline::<u32, _>::new("test", 16, Doubler, sink.clone()));

        let (tx, rx) = watch::channel(false);
        let handle = pipeline.start(rx);

        for i in 1..=5 {
            assert!(pipeline.submit(i));
        }
        wait_for(&*pipeline, 5).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*sink.records.lock(), vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn test_persist_failure_is_counted_and_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(TelemetryPipeline::<u32, _>::new("test", 8, Passthrough, sink.clone()));

        let (tx, rx) = watch::channel(false);
        let handle = pipeline.start(rx);

        pipeline.submit(u32::MAX);
        pipeline.submit(7);
        wait_for(&*pipeline, 2).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*sink.records.lock(), vec![7]);
        assert_eq!(pipeline.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = TelemetryPipeline::<u32, _>::new("test", 4, Passthrough, sink.clone());
        pipeline.submit(1);

        let (_tx, rx) = watch::channel(true);
        tokio::time::timeout(Duration::from_secs(1), pipeline.run(rx))
            .await
            .expect("consumer should return promptly");

        assert!(sink.records.lock().is_empty());
        assert_eq!(pipeline.queued(), 1);
    }

    #[tokio::test]
    async fn test_second_consumer_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(TelemetryPipeline::<u32, _>::new("test", 4, Passthrough, sink));

        let (tx, rx) = watch::channel(false);
        let first = pipeline.start(rx.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), pipeline.run(rx))
            .await
            .expect("second consumer should return immediately");

        tx.send(true).unwrap();
        first.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_consumer_hands_queue_back() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(TelemetryPipeline::<u32, _>::new("test", 4, Passthrough, sink.clone()));

        // Dropped mid-wait, as an abandoned consumer would be
        let (tx, rx) = watch::channel(false);
        let abandoned = tokio::time::timeout(Duration::from_millis(20), pipeline.run(rx.clone())).await;
        assert!(abandoned.is_err());

        assert!(pipeline.submit(3));
        assert_eq!(pipeline.queued(), 1);

        let handle = pipeline.start(rx);
        wait_for(&*pipeline, 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*sink.records.lock(), vec![3]);
        assert_eq!(pipeline.stats().dropped, 0);
    }

    #[tokio::test]
    async fn test_aborted_consumer_task_hands_queue_back() {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(TelemetryPipeline::<u32, _>::new("test", 4, Passthrough, sink.clone()));

        let (tx, rx) = watch::channel(false);
        let first = pipeline.start(rx.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        assert!(pipeline.submit(5));

        let second = pipeline.start(rx);
        wait_for(&*pipeline, 1).await;
        tx.send(true).unwrap();
        second.await.unwrap();

        assert_eq!(*sink.records.lock(), vec![5]);
    }
}
