use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::Message;

/// A message handler registered with the queue.
///
/// `handle` runs on the consumer's own worker task, once per delivered
/// message and never concurrently with itself. It has no return value;
/// a panic is caught by the worker, reported as a
/// [`super::DeliveryError::HandlerPanicked`] event, and the worker moves on
/// to the next message.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn handle(&self, message: Arc<Message>);
}

/// Any `Fn(Arc<Message>) -> impl Future<Output = ()>` closure is a consumer.
#[async_trait]
impl<F, Fut> Consumer for F
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: Arc<Message>) {
        (self)(message).await
    }
}
