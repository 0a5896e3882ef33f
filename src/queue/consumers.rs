use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::metrics::{DeliveryMetrics, RegistryMetrics};

use super::events::{DeliveryError, EventSink, QueueEvent};
use super::{Consumer, Message};

/// Per-consumer counters
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Messages placed on the conduit
    pub delivered: AtomicU64,
    /// Messages the handler returned from
    pub processed: AtomicU64,
    /// Messages that never made it onto the conduit
    pub dropped: AtomicU64,
    /// Handler invocations that panicked
    pub panicked: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub delivered: u64,
    pub processed: u64,
    pub dropped: u64,
    pub panicked: u64,
}

/// Sending side of one consumer's conduit, as captured in a fan-out snapshot.
#[derive(Clone)]
pub struct ConduitHandle {
    pub name: Arc<str>,
    pub sender: mpsc::Sender<Arc<Message>>,
    pub stats: Arc<ConsumerStats>,
}

struct ConsumerEntry {
    conduit: ConduitHandle,
    worker: JoinHandle<()>,
}

/// Consumer name -> conduit + dispatch worker.
///
/// One mutex guards the map. It is held only to insert, remove or copy out
/// the conduit senders, never across a send.
pub struct ConsumerRegistry {
    entries: Mutex<HashMap<String, ConsumerEntry>>,
    capacity: usize,
    events: EventSink,
}

impl ConsumerRegistry {
    pub fn new(capacity: usize, events: EventSink) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            events,
        }
    }

    /// Create the conduit and spawn the worker. Returns `false` if the name is taken.
    pub async fn register(&self, name: &str, consumer: Arc<dyn Consumer>) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(name) {
            return false;
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let stats = Arc::new(ConsumerStats::default());
        let conduit = ConduitHandle {
            name: Arc::from(name),
            sender: tx,
            stats: stats.clone(),
        };

        let worker = tokio::spawn(run_worker(
            conduit.name.clone(),
            consumer,
            rx,
            stats,
            self.events.clone(),
        ));

        entries.insert(name.to_string(), ConsumerEntry { conduit, worker });
        RegistryMetrics::consumer_added();

        tracing::info!(consumer = %name, capacity = self.capacity, "Consumer registered");
        true
    }

    /// Remove a consumer and close its conduit.
    ///
    /// The worker finishes whatever is already buffered and then exits; the
    /// returned handle resolves when it has.
    pub async fn unregister(&self, name: &str) -> Option<JoinHandle<()>> {
        let entry = self.entries.lock().await.remove(name)?;
        RegistryMetrics::consumer_removed();
        DeliveryMetrics::forget_consumer(name);

        tracing::info!(
            consumer = %name,
            buffered = self.capacity - entry.conduit.sender.capacity(),
            "Consumer unregistered, draining conduit"
        );

        // Dropping the registry's sender closes the conduit once in-flight
        // fan-out snapshots let go of their clones
        Some(entry.worker)
    }

    /// Remove every consumer. Returns the names and worker handles.
    pub async fn unregister_all(&self) -> Vec<(String, JoinHandle<()>)> {
        let drained: Vec<(String, ConsumerEntry)> = self.entries.lock().await.drain().collect();

        drained
            .into_iter()
            .map(|(name, entry)| {
                RegistryMetrics::consumer_removed();
                DeliveryMetrics::forget_consumer(&name);
                (name, entry.worker)
            })
            .collect()
    }

    /// Stable copy of every conduit sender for one fan-out.
    pub async fn snapshot(&self) -> Vec<ConduitHandle> {
        self.entries
            .lock()
            .await
            .values()
            .map(|e| e.conduit.clone())
            .collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.lock().await.contains_key(name)
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn stats(&self, name: &str) -> Option<ConsumerStatsSnapshot> {
        self.entries
            .lock()
            .await
            .get(name)
            .map(|e| e.conduit.stats.snapshot())
    }
}

/// Dispatch worker: hand each message from the conduit to the handler, in order.
async fn run_worker(
    name: Arc<str>,
    consumer: Arc<dyn Consumer>,
    mut conduit: mpsc::Receiver<Arc<Message>>,
    stats: Arc<ConsumerStats>,
    events: EventSink,
) {
    tracing::debug!(consumer = %name, "Consumer worker started");

    while let Some(message) = conduit.recv().await {
        let outcome = AssertUnwindSafe(consumer.handle(message.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(()) => {
                stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(panic) => {
                stats.panicked.fetch_add(1, Ordering::Relaxed);
                let reason = panic_message(panic.as_ref());
                DeliveryMetrics::record_handler_panic(&name);

                tracing::error!(
                    consumer = %name,
                    channel = %message.channel(),
                    message_id = %message.id(),
                    reason = %reason,
                    "Consumer handler panicked"
                );

                events.emit(QueueEvent::DeliveryFailed {
                    consumer: name.to_string(),
                    channel: message.channel().to_string(),
                    message_id: message.id(),
                    error: DeliveryError::HandlerPanicked(reason),
                });
            }
        }
    }

    let processed = stats.processed.load(Ordering::Relaxed);
    tracing::debug!(consumer = %name, processed = processed, "Consumer worker stopped");
    events.emit(QueueEvent::ConsumerStopped {
        consumer: name.to_string(),
        processed,
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
