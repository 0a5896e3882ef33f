//! Dispatch engine: the polling loop and the fan-out.
//!
//! Each cycle walks a snapshot of the channel list, pops at most one message
//! per channel and hands it to every registered consumer's conduit. A cycle
//! that delivered something is followed immediately by the next one; an idle
//! cycle sleeps the poll interval; a cycle in which every pop failed sleeps
//! an exponential backoff instead.
//!
//! Within a channel messages reach each consumer in push order because the
//! engine finishes one fan-out before it pops the next message. There is no
//! ordering across channels beyond the round-robin of the snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{DispatchConfig, OverflowPolicy};
use crate::metrics::{DeliveryMetrics, PollMetrics};
use crate::redis::{BackoffConfig, ExponentialBackoff};
use crate::store::MessageStore;

use super::channels::ChannelRegistry;
use super::consumers::{ConduitHandle, ConsumerRegistry};
use super::events::{DeliveryError, EventSink, QueueEvent};
use super::health::{EngineClaim, EngineHealth, EngineHealthStats};
use super::Message;

/// Outcome of one pass over the channel list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Channels a pop was attempted on
    pub polled: usize,
    /// Messages popped
    pub received: usize,
    /// Conduit deliveries (one message to three consumers counts three)
    pub delivered: usize,
    /// Channels that had nothing pending
    pub empty: usize,
    /// Pops that failed
    pub failed: usize,
}

impl CycleReport {
    pub fn all_failed(&self) -> bool {
        self.polled > 0 && self.failed == self.polled
    }
}

pub struct DispatchEngine {
    store: Arc<dyn MessageStore>,
    channels: Arc<ChannelRegistry>,
    consumers: Arc<ConsumerRegistry>,
    config: DispatchConfig,
    health: Arc<EngineHealth>,
    events: EventSink,
    queue_name: String,
}

impl DispatchEngine {
    pub fn new(
        queue_name: String,
        store: Arc<dyn MessageStore>,
        channels: Arc<ChannelRegistry>,
        consumers: Arc<ConsumerRegistry>,
        config: DispatchConfig,
        health: Arc<EngineHealth>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            channels,
            consumers,
            config,
            health,
            events,
            queue_name,
        }
    }

    /// Run one cycle.
    ///
    /// With no consumers registered nothing is popped, so pending messages
    /// stay in the store until someone can receive them.
    #[tracing::instrument(name = "engine.poll_cycle", skip(self), fields(queue = %self.queue_name))]
    pub async fn poll_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        if self.consumers.is_empty().await {
            return report;
        }

        let channels = self.channels.snapshot().await;
        let destination = self.config.requeue_list.as_deref();

        for channel in channels.iter() {
            report.polled += 1;

            match self.store.pop_and_requeue(channel, destination).await {
                Ok(Some(payload)) => {
                    report.received += 1;
                    PollMetrics::record_polled(channel);
                    let message = Arc::new(Message::new(channel.as_str(), payload));
                    report.delivered += self.fan_out(message).await;
                }
                Ok(None) => {
                    report.empty += 1;
                }
                Err(e) => {
                    // Keep polling the remaining channels
                    report.failed += 1;
                    PollMetrics::record_error(channel);
                    tracing::warn!(
                        channel = %channel,
                        error = %e,
                        transient = e.is_transient(),
                        "Failed to pop from channel"
                    );
                    self.events.emit(QueueEvent::PollFailed {
                        channel: channel.clone(),
                        error: e.to_string(),
                        transient: e.is_transient(),
                    });
                }
            }
        }

        self.health.record_cycle(&report);
        PollMetrics::observe_cycle(started.elapsed());
        report
    }

    /// Send one message to every consumer registered right now.
    ///
    /// The registry lock is released before any send, and the sends run
    /// concurrently, so one slow consumer delays the loop by at most the
    /// delivery timeout and never blocks the others.
    async fn fan_out(&self, message: Arc<Message>) -> usize {
        let conduits = self.consumers.snapshot().await;

        if conduits.is_empty() {
            // The last consumer left between the emptiness check and the pop
            PollMetrics::record_unrouted(message.channel());
            tracing::warn!(
                channel = %message.channel(),
                message_id = %message.id(),
                "No consumers registered, message discarded"
            );
            return 0;
        }

        let sends = conduits
            .iter()
            .map(|conduit| self.deliver(conduit, message.clone()));

        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }

    async fn deliver(&self, conduit: &ConduitHandle, message: Arc<Message>) -> bool {
        let channel = message.channel().to_string();
        let message_id = message.id();

        let result = match self.config.overflow {
            OverflowPolicy::DropNewest => conduit.sender.try_send(message).map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::ConduitFull,
                TrySendError::Closed(_) => DeliveryError::ConduitClosed,
            }),
            OverflowPolicy::BlockWithTimeout => {
                let limit = self.config.delivery_timeout();
                match timeout(limit, conduit.sender.send(message)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(DeliveryError::ConduitClosed),
                    Err(_) => Err(DeliveryError::Timeout(limit.as_millis() as u64)),
                }
            }
        };

        match result {
            Ok(()) => {
                conduit
                    .stats
                    .delivered
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                DeliveryMetrics::record_delivered(&conduit.name);
                true
            }
            Err(error) => {
                conduit
                    .stats
                    .dropped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                DeliveryMetrics::record_failed(&conduit.name, error.as_str());
                tracing::warn!(
                    consumer = %conduit.name,
                    channel = %channel,
                    message_id = %message_id,
                    error = %error,
                    "Message dropped for consumer"
                );
                self.events.emit(QueueEvent::DeliveryFailed {
                    consumer: conduit.name.to_string(),
                    channel,
                    message_id,
                    error,
                });
                false
            }
        }
    }

    /// Poll until `shutdown` fires or its sender is dropped.
    ///
    /// `claim` is held for the lifetime of the loop. The engine reads as
    /// stopped once the loop exits, its future is dropped, or it panics.
    /// A signal never interrupts a cycle halfway, so a popped message is
    /// always fanned out before the loop exits.
    pub(crate) async fn run(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
        claim: EngineClaim,
    ) {
        let mut backoff = ExponentialBackoff::new(BackoffConfig::from(&self.config));
        let poll_interval = self.config.poll_interval();

        tracing::info!(
            queue = %self.queue_name,
            backend = self.store.backend_type(),
            poll_interval_ms = self.config.poll_interval_ms,
            requeue_list = ?self.config.requeue_list,
            "Dispatch engine started"
        );

        loop {
            if stop_requested(&mut shutdown) {
                break;
            }

            let report = self.poll_cycle().await;

            let pause = if report.all_failed() {
                let delay = backoff.next_delay();
                tracing::warn!(
                    queue = %self.queue_name,
                    failed = report.failed,
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Every channel failed to poll, backing off"
                );
                Some(delay)
            } else {
                backoff.reset();
                if report.received > 0 {
                    None
                } else {
                    Some(poll_interval)
                }
            };

            match pause {
                Some(pause) => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }

        drop(claim);
        tracing::info!(queue = %self.queue_name, "Dispatch engine stopped");
    }
}

fn stop_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Handle to a dispatch engine running in the background.
pub struct EngineHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
    health: Arc<EngineHealth>,
    events: EventSink,
}

impl EngineHandle {
    pub(crate) fn new(
        shutdown: broadcast::Sender<()>,
        task: JoinHandle<()>,
        health: Arc<EngineHealth>,
        events: EventSink,
    ) -> Self {
        Self {
            shutdown,
            task,
            health,
            events,
        }
    }

    pub fn health(&self) -> EngineHealthStats {
        self.health.stats()
    }

    /// Receive poll and delivery failures as they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop and wait for the current cycle to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Dispatch engine task failed");
        }
    }

    /// Like `stop`, but give up waiting after `limit`. Returns whether the loop exited.
    pub async fn stop_timeout(self, limit: Duration) -> bool {
        let _ = self.shutdown.send(());
        match timeout(limit, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Dispatch engine task failed");
                true
            }
            Err(_) => {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "Dispatch engine did not stop in time");
                false
            }
        }
    }
}
