//! Message queue over a Redis list store.
//!
//! Producers push payloads onto named channels. A background dispatch engine
//! pops from every registered channel and fans each message out to all
//! registered consumers, each of which drains its own bounded conduit on a
//! dedicated worker task.
//!
//! ```text
//! publish ──► MessageStore::push
//! DispatchEngine ──► MessageStore::pop_and_requeue ──► conduit ──► worker ──► Consumer::handle
//! ```

mod channels;
mod consumer;
mod consumers;
mod engine;
mod events;
mod health;
mod message;

pub use channels::ChannelRegistry;
pub use consumer::Consumer;
pub use consumers::{ConsumerRegistry, ConsumerStatsSnapshot};
pub use engine::{CycleReport, DispatchEngine, EngineHandle};
pub use events::{DeliveryError, EventSink, QueueEvent};
pub use health::{EngineHealth, EngineHealthStats, EngineStatus};
pub use message::Message;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::config::{DuplicatePolicy, QueueConfig};
use crate::error::{QueueError, Result};
use crate::metrics::PublishMetrics;
use crate::redis::RedisHealthStats;
use crate::store::{create_store, MessageStore};

use health::EngineClaim;

/// Result of [`Queue::shutdown`]
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    /// Whether the dispatch engine was running and has now stopped
    pub engine_stopped: bool,
    /// Consumers whose worker finished draining in time
    pub drained: Vec<String>,
    /// Consumers whose worker was still busy when the timeout elapsed
    pub timed_out: Vec<String>,
}

/// Public entry point: one store connection, one channel list, one consumer map.
pub struct Queue {
    name: String,
    duplicates: DuplicatePolicy,
    store: Arc<dyn MessageStore>,
    channels: Arc<ChannelRegistry>,
    consumers: Arc<ConsumerRegistry>,
    engine: Arc<DispatchEngine>,
    health: Arc<EngineHealth>,
    events: EventSink,
    /// Stop signal of the engine run started by this queue, if any
    running: Mutex<Option<broadcast::Sender<()>>>,
}

impl Queue {
    /// Build the store from `config` and check that it is reachable.
    pub async fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let store = create_store(&config)?;
        Self::build(config, store).await
    }

    /// Use an already constructed store, e.g. a shared `MemoryStore` in tests.
    pub async fn with_store(config: QueueConfig, store: Arc<dyn MessageStore>) -> Result<Self> {
        config.validate()?;
        Self::build(config, store).await
    }

    async fn build(config: QueueConfig, store: Arc<dyn MessageStore>) -> Result<Self> {
        if let Err(e) = store.ping().await {
            tracing::error!(
                queue = %config.name,
                backend = store.backend_type(),
                error = %e,
                "Backing store unreachable"
            );
            return Err(QueueError::Connectivity(e));
        }

        let dispatch = config.dispatch.clone();
        let events = EventSink::new(dispatch.event_buffer);
        let channels = Arc::new(ChannelRegistry::new(dispatch.duplicates));
        let consumers = Arc::new(ConsumerRegistry::new(
            dispatch.conduit_capacity,
            events.clone(),
        ));
        let health = Arc::new(EngineHealth::new());

        for channel in config.initial_channels() {
            validate_name(&channel)?;
            if !channels.contains(&channel).await {
                channels.add(&channel).await?;
            }
        }

        let engine = Arc::new(DispatchEngine::new(
            config.name.clone(),
            store.clone(),
            channels.clone(),
            consumers.clone(),
            dispatch.clone(),
            health.clone(),
            events.clone(),
        ));

        tracing::info!(
            queue = %config.name,
            backend = store.backend_type(),
            channels = ?*channels.snapshot().await,
            "Queue created"
        );

        Ok(Self {
            name: config.name,
            duplicates: dispatch.duplicates,
            store,
            channels,
            consumers,
            engine,
            health,
            events,
            running: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push a payload onto the head of `channel`.
    ///
    /// The channel does not need to be registered; the message waits in the
    /// store until some queue polls that channel.
    pub async fn publish(&self, channel: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        validate_name(channel)?;

        match self.store.push(channel, payload.as_ref()).await {
            Ok(()) => {
                PublishMetrics::record_published(channel);
                tracing::debug!(channel = %channel, bytes = payload.as_ref().len(), "Message published");
                Ok(())
            }
            Err(e) => {
                PublishMetrics::record_error(channel);
                tracing::warn!(channel = %channel, error = %e, "Failed to publish message");
                Err(e.into())
            }
        }
    }

    /// Start polling `name`. New channels go to the end of the polling order.
    pub async fn add_channel(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.channels.add(name).await? {
            tracing::info!(queue = %self.name, channel = %name, "Channel added");
        } else {
            tracing::debug!(queue = %self.name, channel = %name, "Channel already registered");
        }
        Ok(())
    }

    /// Stop polling `name`. Messages still pending in the store stay there.
    pub async fn remove_channel(&self, name: &str) -> Result<()> {
        self.channels.remove(name).await?;
        tracing::info!(queue = %self.name, channel = %name, "Channel removed");
        Ok(())
    }

    /// Channels in polling order
    pub async fn channels(&self) -> Vec<String> {
        self.channels.snapshot().await.as_ref().clone()
    }

    /// Register a consumer.
    ///
    /// The membership marker is written to the store first; the consumer
    /// starts receiving from the next message the engine pops.
    pub async fn add_consumer<C: Consumer>(&self, name: &str, consumer: C) -> Result<()> {
        validate_name(name)?;

        if self.consumers.contains(name).await {
            return self.duplicate_consumer(name);
        }

        self.store.add_member(name, name).await?;

        if !self.consumers.register(name, Arc::new(consumer)).await {
            // Lost a race with a concurrent add of the same name
            return self.duplicate_consumer(name);
        }

        tracing::info!(queue = %self.name, consumer = %name, "Consumer added");
        Ok(())
    }

    fn duplicate_consumer(&self, name: &str) -> Result<()> {
        match self.duplicates {
            DuplicatePolicy::Reject => Err(QueueError::ConsumerExists(name.to_string())),
            DuplicatePolicy::Ignore => {
                tracing::debug!(queue = %self.name, consumer = %name, "Consumer already registered");
                Ok(())
            }
        }
    }

    /// Unregister a consumer.
    ///
    /// It receives nothing popped after this returns. Messages already in its
    /// conduit are still handled before its worker exits.
    pub async fn remove_consumer(&self, name: &str) -> Result<()> {
        if self.consumers.unregister(name).await.is_none() {
            return Err(QueueError::ConsumerNotFound(name.to_string()));
        }

        self.remove_marker(name).await;

        tracing::info!(queue = %self.name, consumer = %name, "Consumer removed");
        Ok(())
    }

    /// Best effort: a failure is logged and published as an event, the
    /// consumer stays removed locally.
    async fn remove_marker(&self, name: &str) {
        if let Err(e) = self.store.remove_member(name, name).await {
            tracing::warn!(
                queue = %self.name,
                consumer = %name,
                error = %e,
                "Failed to remove consumer membership marker"
            );
            self.events.emit(QueueEvent::MarkerRemovalFailed {
                consumer: name.to_string(),
                error: e.to_string(),
            });
        }
    }

    /// Registered consumer names, sorted
    pub async fn consumers(&self) -> Vec<String> {
        self.consumers.names().await
    }

    pub async fn consumer_stats(&self, name: &str) -> Option<ConsumerStatsSnapshot> {
        self.consumers.stats(name).await
    }

    /// Receive poll failures, delivery failures and worker exits.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn health(&self) -> EngineHealthStats {
        self.health.stats()
    }

    /// Connection health of the backing store, for backends that track it.
    pub fn store_health(&self) -> Option<RedisHealthStats> {
        self.store.health()
    }

    /// Run exactly one dispatch cycle on the caller's task.
    ///
    /// The engine is claimed for the length of the cycle: it fails while the
    /// background engine runs, and `start` fails while the cycle runs, since
    /// two concurrent fan-outs would interleave a channel's messages.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        let _claim = self
            .health
            .try_claim(None)
            .ok_or(QueueError::AlreadyRunning)?;
        Ok(self.engine.poll_cycle().await)
    }

    /// Spawn the dispatch engine and return a handle to stop and observe it.
    pub async fn start(&self) -> Result<EngineHandle> {
        let (claim, shutdown_tx, shutdown_rx) = self.begin().await?;
        let task = tokio::spawn(self.engine.clone().run(shutdown_rx, claim));

        Ok(EngineHandle::new(
            shutdown_tx,
            task,
            self.health.clone(),
            self.events.clone(),
        ))
    }

    /// Run the dispatch engine on the caller's task until `shutdown` resolves
    /// or [`Queue::shutdown`] is called.
    ///
    /// Dropping the returned future stops the engine where it is and leaves
    /// the queue free to be started again.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (claim, stop_tx, shutdown_rx) = self.begin().await?;

        let engine = self.engine.clone().run(shutdown_rx, claim);
        tokio::pin!(engine);

        tokio::select! {
            _ = &mut engine => {}
            _ = shutdown => {
                let _ = stop_tx.send(());
                // Let the current cycle finish
                (&mut engine).await;
            }
        }

        Ok(())
    }

    async fn begin(
        &self,
    ) -> Result<(EngineClaim, broadcast::Sender<()>, broadcast::Receiver<()>)> {
        let claim = self
            .health
            .try_claim(Some(EngineStatus::Stopped))
            .ok_or(QueueError::AlreadyRunning)?;
        let (tx, rx) = broadcast::channel(1);
        *self.running.lock().await = Some(tx.clone());
        Ok((claim, tx, rx))
    }

    /// Stop the engine if running, unregister every consumer and wait up to
    /// `timeout` for their workers to drain.
    ///
    /// Membership markers are removed on a best-effort basis.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut result = ShutdownResult::default();

        let stop = self.running.lock().await.take();
        if let Some(tx) = stop.filter(|_| self.health.is_running()) {
            let _ = tx.send(());
            while self.health.is_running() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            result.engine_stopped = !self.health.is_running();
            if !result.engine_stopped {
                tracing::warn!(queue = %self.name, "Dispatch engine still running at shutdown deadline");
            }
        }

        for (name, worker) in self.consumers.unregister_all().await {
            self.remove_marker(&name).await;

            match tokio::time::timeout_at(deadline, worker).await {
                Ok(_) => result.drained.push(name),
                Err(_) => result.timed_out.push(name),
            }
        }

        result.drained.sort();
        result.timed_out.sort();

        tracing::info!(
            queue = %self.name,
            engine_stopped = result.engine_stopped,
            drained = result.drained.len(),
            timed_out = result.timed_out.len(),
            "Queue shut down"
        );
        result
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue: {}", self.name)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(QueueError::InvalidName(format!("{:?}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn memory_queue(config: QueueConfig) -> (Queue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Queue::with_store(config, store.clone()).await.unwrap();
        (queue, store)
    }

    #[tokio::test]
    async fn test_display_and_initial_channels() {
        let mut config = QueueConfig::named("orders-queue");
        config.channel = Some("legacy".to_string());
        config.channels = vec!["orders".to_string(), "legacy".to_string()];

        let (queue, _) = memory_queue(config).await;
        assert_eq!(queue.to_string(), "queue: orders-queue");
        assert_eq!(queue.channels().await, vec!["legacy", "orders"]);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_construction() {
        let store = Arc::new(MemoryStore::new());
        store.set_reachable(false);

        let result = Queue::with_store(QueueConfig::default(), store).await;
        assert!(matches!(result, Err(QueueError::Connectivity(_))));
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let (queue, _) = memory_queue(QueueConfig::default()).await;

        assert!(matches!(queue.add_channel("").await, Err(QueueError::InvalidName(_))));
        assert!(matches!(queue.publish("  ", b"x").await, Err(QueueError::InvalidName(_))));
        assert!(matches!(
            queue.add_consumer("", |_m: Arc<Message>| async {}).await,
            Err(QueueError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_consumer_marker_written_and_removed() {
        let (queue, store) = memory_queue(QueueConfig::default()).await;

        queue.add_consumer("c1", |_m: Arc<Message>| async {}).await.unwrap();
        assert!(store.is_member("c1", "c1"));
        assert_eq!(queue.consumers().await, vec!["c1"]);

        queue.remove_consumer("c1").await.unwrap();
        assert!(!store.is_member("c1", "c1"));

        let err = queue.remove_consumer("c1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_consumer_policies() {
        let (queue, _) = memory_queue(QueueConfig::default()).await;
        queue.add_consumer("c1", |_m: Arc<Message>| async {}).await.unwrap();
        assert!(matches!(
            queue.add_consumer("c1", |_m: Arc<Message>| async {}).await,
            Err(QueueError::ConsumerExists(_))
        ));

        let mut config = QueueConfig::default();
        config.dispatch.duplicates = DuplicatePolicy::Ignore;
        let (queue, _) = memory_queue(config).await;
        queue.add_consumer("c1", |_m: Arc<Message>| async {}).await.unwrap();
        queue.add_consumer("c1", |_m: Arc<Message>| async {}).await.unwrap();
        queue.add_channel("orders").await.unwrap();
        queue.add_channel("orders").await.unwrap();
        assert_eq!(queue.consumers().await.len(), 1);
        assert_eq!(queue.channels().await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_surfaces() {
        let (queue, store) = memory_queue(QueueConfig::default()).await;
        store.fail_channel("orders", "boom");

        let result = queue.publish("orders", b"p1").await;
        assert!(matches!(result, Err(QueueError::Store(_))));
    }

    #[tokio::test]
    async fn test_poll_once_refused_while_running() {
        let (queue, _) = memory_queue(QueueConfig::default()).await;
        let handle = queue.start().await.unwrap();

        assert!(matches!(queue.poll_once().await, Err(QueueError::AlreadyRunning)));
        assert!(matches!(queue.start().await, Err(QueueError::AlreadyRunning)));

        handle.stop().await;
        assert!(queue.poll_once().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_after_engine_already_stopped() {
        let (queue, _) = memory_queue(QueueConfig::default()).await;
        let handle = queue.start().await.unwrap();
        handle.stop().await;

        let result = queue.shutdown(Duration::from_secs(1)).await;
        assert!(!result.engine_stopped);
        assert_eq!(queue.health().status, EngineStatus::Stopped);
    }

    #[tokio::test]
    async fn test_marker_removal_failure_is_published() {
        let (queue, store) = memory_queue(QueueConfig::default()).await;
        let mut events = queue.subscribe();
        queue.add_consumer("c1", |_m: Arc<Message>| async {}).await.unwrap();

        store.set_reachable(false);
        queue.remove_consumer("c1").await.unwrap();
        assert!(queue.consumers().await.is_empty());

        loop {
            match events.recv().await.unwrap() {
                QueueEvent::MarkerRemovalFailed { consumer, error } => {
                    assert_eq!(consumer, "c1");
                    assert!(error.contains("unreachable"));
                    break;
                }
                QueueEvent::ConsumerStopped { .. } => continue,
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_memory_store_reports_no_connection_health() {
        let (queue, _) = memory_queue(QueueConfig::default()).await;
        assert!(queue.store_health().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_without_engine() {
        let (queue, store) = memory_queue(QueueConfig::default()).await;
        queue.add_consumer("c1", |_m: Arc<Message>| async {}).await.unwrap();

        let result = queue.shutdown(Duration::from_secs(1)).await;
        assert!(!result.engine_stopped);
        assert_eq!(result.drained, vec!["c1"]);
        assert!(result.timed_out.is_empty());
        assert!(!store.is_member("c1", "c1"));
        assert!(queue.consumers().await.is_empty());
    }
}
