//! Impure rumqttc session and its event pump
//!
//! One [`RumqttcSession`] wraps one `AsyncClient`/`EventLoop` pair. The event
//! loop is polled by a dedicated task that forwards connection and message
//! events to the client and resolves acknowledgement waiters. rumqttc's own
//! reconnect-on-poll is never used: the pump stops at the first connection
//! error and reconnection is decided by the client.

use super::acks::{AckTracker, RequestKind};
use super::connection::{configure_mqtt_options, to_rumqttc_qos, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::ConnectionConfig;
use crate::transport::{
    BrokerConnector, BrokerSession, OpenedSession, QosLevel, SessionEvent, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, ClientError, EventLoop};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Opens sessions against a real broker
#[derive(Debug, Default, Clone)]
pub struct RumqttcConnector;

impl RumqttcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for RumqttcConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<OpenedSession, TransportError> {
        let options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let acks = Arc::new(Mutex::new(AckTracker::new()));

        debug!(
            broker = %config.broker_url(),
            client_id = %config.client_id,
            tls = config.scheme.is_encrypted(),
            "Opening MQTT session"
        );
        let pump = tokio::spawn(pump_events(event_loop, acks.clone(), events_tx));

        let session = RumqttcSession {
            client: AsyncMutex::new(client),
            acks,
            pump: Mutex::new(Some(pump)),
        };

        Ok(OpenedSession {
            session: Arc::new(session),
            events: events_rx,
        })
    }
}

pub struct RumqttcSession {
    // Held across enqueue + send so packet ids pair with requests in order
    client: AsyncMutex<AsyncClient>,
    acks: Arc<Mutex<AckTracker>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RumqttcSession {
    fn check_sent(&self, sent: Result<(), ClientError>) -> Result<(), TransportError> {
        if let Err(e) = sent {
            lock(&self.acks).discard_newest();
            return Err(TransportError::request(e));
        }
        Ok(())
    }

    async fn await_ack(
        waiter: oneshot::Receiver<Result<(), TransportError>>,
    ) -> Result<(), TransportError> {
        waiter.await.map_err(|_| TransportError::SessionClosed)?
    }
}

#[async_trait]
impl BrokerSession for RumqttcSession {
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let client = self.client.lock().await;
            lock(&self.acks).enqueue(RequestKind::Subscribe, tx);
            let sent = client.subscribe(topic, to_rumqttc_qos(qos)).await;
            self.check_sent(sent)?;
        }
        Self::await_ack(rx).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let client = self.client.lock().await;
            lock(&self.acks).enqueue(RequestKind::Unsubscribe, tx);
            let sent = client.unsubscribe(topic).await;
            self.check_sent(sent)?;
        }
        Self::await_ack(rx).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let client = self.client.lock().await;
            lock(&self.acks).enqueue(RequestKind::Publish(qos), tx);
            let sent = client
                .publish(topic, to_rumqttc_qos(qos), retain, payload)
                .await;
            self.check_sent(sent)?;
        }
        Self::await_ack(rx).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let result = {
            let client = self.client.lock().await;
            client.disconnect().await.map_err(TransportError::request)
        };

        let handle = lock(&self.pump).take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("MQTT event loop stopped"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("MQTT event loop ended with error: {}", e)
                }
                Err(_) => {
                    warn!("MQTT event loop did not stop in time, aborting");
                    handle.abort();
                }
                _ => {}
            }
        }

        lock(&self.acks).fail_all();
        result
    }
}

impl Drop for RumqttcSession {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
    }
}

/// Poll the event loop until the session ends
async fn pump_events(
    mut event_loop: EventLoop,
    acks: Arc<Mutex<AckTracker>>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        let event = match event_loop.poll().await {
            Ok(event) => event,
            Err(e) => {
                lock(&acks).fail_all();
                let _ = events.send(SessionEvent::ConnectionLost {
                    reason: e.to_string(),
                });
                break;
            }
        };

        match MessageHandler::route_event(&event) {
            EventRoute::ConnectionAcknowledged => {
                info!("MQTT session acknowledged by broker");
                let _ = events.send(SessionEvent::Connected);
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                qos,
                retain,
            } => {
                let _ = events.send(SessionEvent::Message {
                    topic,
                    payload,
                    qos,
                    retain,
                });
            }
            EventRoute::Disconnected(reason) => {
                lock(&acks).fail_all();
                let _ = events.send(SessionEvent::ConnectionLost { reason });
                break;
            }
            EventRoute::ClosedLocally => {
                debug!("DISCONNECT sent, stopping event loop");
                break;
            }
            EventRoute::RequestSent(sent) => lock(&acks).on_sent(sent),
            EventRoute::Acknowledged(ack) => lock(&acks).on_ack(ack),
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
            }
        }
    }
}
