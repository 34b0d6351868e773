//! Hand-off of assigned messages to the outbound channel.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use {async_trait::async_trait, switchboard_common::Delivery, tokio::sync::mpsc, tracing::info};

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Publish interface towards the customer-facing channel.
///
/// A successful return means the local publish call succeeded; retries and
/// acknowledgements downstream are the sink's own concern.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn publish(&self, delivery: &Delivery) -> Result<(), SinkError>;
}

/// Logs each delivery and drops it.
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn publish(&self, delivery: &Delivery) -> Result<(), SinkError> {
        info!(
            fingerprint = %delivery.fingerprint,
            customer_id = %delivery.customer_id,
            agent_id = %delivery.agent_id,
            "message delivered"
        );
        Ok(())
    }
}

/// Forwards deliveries into a bounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl DeliverySink for ChannelSink {
    async fn publish(&self, delivery: &Delivery) -> Result<(), SinkError> {
        self.tx
            .send(delivery.clone())
            .await
            .map_err(|_| "delivery channel closed".into())
    }
}

/// Keeps every delivery in memory. Can be switched to refuse publishes.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Delivery>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn publish(&self, delivery: &Delivery) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("recording sink set to fail".into());
        }
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delivery.clone());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> Delivery {
        Delivery {
            fingerprint: "c1:x".into(),
            customer_id: "c1".into(),
            agent_id: "a".into(),
            content: "hello".into(),
        }
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.publish(&delivery()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), delivery());
    }

    #[tokio::test]
    async fn channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        assert!(sink.publish(&delivery()).await.is_err());
    }

    #[tokio::test]
    async fn recording_sink_can_fail() {
        let sink = RecordingSink::new();
        sink.publish(&delivery()).await.unwrap();
        sink.set_failing(true);
        assert!(sink.publish(&delivery()).await.is_err());
        assert_eq!(sink.deliveries().len(), 1);
    }
}
