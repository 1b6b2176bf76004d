use crate::STATS_STREAM;
use stargate_core::queue::Result;
use stargate_core::{QueueBroker, StatsEvent, StatsSubmitter};
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Appends click events to the stats stream.
#[derive(Clone)]
pub struct StatsProducer {
    broker: Arc<dyn QueueBroker>,
    stream: String,
}

impl StatsProducer {
    pub fn new(broker: Arc<dyn QueueBroker>) -> Self {
        Self::with_stream(broker, STATS_STREAM)
    }

    pub fn with_stream(broker: Arc<dyn QueueBroker>, stream: impl Into<String>) -> Self {
        Self {
            broker,
            stream: stream.into(),
        }
    }

    /// Appends one event and waits for the broker to assign it an id.
    pub async fn publish(&self, event: &StatsEvent) -> Result<String> {
        let id = self.broker.append(&self.stream, &event.to_fields()).await?;
        trace!(%id, full_short_url = %event.full_short_url, "stats event queued");
        Ok(id)
    }
}

impl StatsSubmitter for StatsProducer {
    fn submit(&self, event: StatsEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(full_short_url = %event.full_short_url, "no runtime to queue stats event, dropping it");
            return;
        };

        let producer = self.clone();
        handle.spawn(async move {
            if let Err(err) = producer.publish(&event).await {
                error!(error = %err, full_short_url = %event.full_short_url, "failed to queue stats event");
            }
        });
    }
}
