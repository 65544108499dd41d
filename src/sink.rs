//! Telemetry sink.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, EventLoop, MqttOptions, QoS};
use thiserror::Error;
use tokio::time::{sleep, timeout};

use crate::prelude::*;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publishing timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool)
    -> Result<(), PublishError>;
}

/// Substitute the device identifier, the command name and the parallel unit number
/// into the topic template.
#[must_use]
pub fn render_topic(
    template: &str,
    device_id: &str,
    command: &str,
    unit: Option<u8>,
) -> String {
    let topic = template.replace("{sn}", device_id).replace("{command}", command);
    match unit {
        Some(unit) => topic.replace("{unit}", &unit.to_string()),
        None => topic,
    }
}

/// MQTT broker connection.
///
/// The event loop runs in a background task and reconnects on its own,
/// publishing never waits longer than the timeout.
pub struct Mqtt {
    client: AsyncClient,
    publish_timeout: Duration,
}

impl Mqtt {
    const CAPACITY: usize = 64;
    const RECONNECT_DELAY: Duration = Duration::from_secs(5);

    pub fn connect(options: MqttOptions, publish_timeout: Duration) -> Self {
        let (host, port) = options.broker_address();
        info!(%host, port, "connecting to the MQTT broker…");
        let (client, event_loop) = AsyncClient::new(options, Self::CAPACITY);
        tokio::spawn(Self::drive(event_loop));
        Self::new(client, publish_timeout)
    }

    /// Wrap a client whose event loop is driven elsewhere.
    pub const fn new(client: AsyncClient, publish_timeout: Duration) -> Self {
        Self { client, publish_timeout }
    }

    async fn drive(mut event_loop: EventLoop) {
        loop {
            match event_loop.poll().await {
                Ok(event) => trace!(?event, "event"),
                Err(error) => {
                    warn!("MQTT connection error: {error:#}");
                    sleep(Self::RECONNECT_DELAY).await;
                }
            }
        }
    }
}

#[async_trait]
impl Sink for Mqtt {
    #[instrument(skip_all, fields(topic = topic))]
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> Result<(), PublishError> {
        timeout(self.publish_timeout, self.client.publish(topic, QoS::AtMostOnce, retain, payload))
            .await
            .map_err(|_| PublishError::Timeout(self.publish_timeout))??;
        debug!("published");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[tokio::test]
    async fn publish_times_out_on_full_queue() {
        // Nobody polls the event loop, so the single slot is never freed.
        let options = MqttOptions::new("axpert-monitor", "localhost", 1883);
        let (client, _event_loop) = AsyncClient::new(options, 1);
        let sink = Mqtt::new(client, Duration::from_millis(50));

        sink.publish("axpert/SN", "{}".to_owned(), true).await.unwrap();

        let start = Instant::now();
        let result = sink.publish("axpert/SN", "{}".to_owned(), true).await;
        assert!(matches!(
            result,
            Err(PublishError::Timeout(timeout)) if timeout == Duration::from_millis(50),
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn render_device_topic() {
        assert_eq!(
            render_topic("axpert/{sn}_100", "92932004102443", "QPIGS2", None),
            "axpert/92932004102443_100",
        );
    }

    #[test]
    fn render_parallel_topic() {
        assert_eq!(
            render_topic("axpert/{sn}/parallel/{unit}", "SN", "QPGS1", Some(1)),
            "axpert/SN/parallel/1",
        );
    }

    #[test]
    fn render_command_topic() {
        assert_eq!(
            render_topic("axpert/{sn}/health/{command}", "SN", "QVFW", None),
            "axpert/SN/health/QVFW",
        );
    }
}
