use std::future::Future;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};

use crate::config::Config;

/// Capacity of the request channel between `AsyncClient` and `EventLoop`.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long a clean disconnect may take to flush before it is abandoned.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection; subscriptions must be (re)issued.
    Connected,
    /// The broker granted the subscription; the link is carrying traffic.
    Subscribed,
    Message { topic: String, payload: Vec<u8> },
    /// Protocol traffic with nothing for the application.
    Idle,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("connection lost: {0}")]
    Connection(String),

    #[error("client request failed: {0}")]
    Client(String),
}

/// One pub/sub session. Polling after an error reconnects.
pub trait Transport: Send {
    fn poll(&mut self) -> impl Future<Output = Result<TransportEvent, TransportError>> + Send;

    fn subscribe(&mut self, filter: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// rumqttc-backed transport.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttTransport {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_broker.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_seconds.max(1)));
        options.set_clean_session(true);
        if let Some((user, password)) = config.mqtt_credentials() {
            options.set_credentials(user, password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        Self { client, eventloop }
    }
}

impl Transport for MqttTransport {
    fn poll(&mut self) -> impl Future<Output = Result<TransportEvent, TransportError>> + Send {
        async move {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        Ok(TransportEvent::Connected)
                    } else {
                        Err(TransportError::Refused(format!("{:?}", ack.code)))
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
                    {
                        Ok(TransportEvent::Subscribed)
                    } else {
                        tracing::warn!(codes = ?ack.return_codes, "Broker rejected the subscription");
                        Ok(TransportEvent::Idle)
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => Ok(TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }),
                Ok(_) => Ok(TransportEvent::Idle),
                Err(e) => Err(TransportError::Connection(e.to_string())),
            }
        }
    }

    fn subscribe(&mut self, filter: &str) -> impl Future<Output = Result<(), TransportError>> + Send {
        let filter = filter.to_string();
        async move {
            self.client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| TransportError::Client(e.to_string()))
        }
    }

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(e) = self.client.disconnect().await {
                tracing::debug!(error = %e, "MQTT disconnect request failed");
                return;
            }

            // The DISCONNECT packet only leaves once the event loop is driven
            let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
                loop {
                    match self.eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;

            if flushed.is_err() {
                tracing::debug!("Timed out flushing MQTT disconnect");
            }
        }
    }
}
