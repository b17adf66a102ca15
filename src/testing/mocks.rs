//! Mock broker for testing
//!
//! [`MockBroker`] stands in for a real MQTT server. Each connect attempt asks
//! it for an outcome, either scripted in advance or the default. Live sessions
//! record their subscriptions; publishes are recorded and, when loopback is
//! on, delivered back to every live session with a matching filter.

use crate::config::ConnectionConfig;
use crate::protocol::topics::topic_matches;
use crate::transport::{
    BrokerConnector, BrokerSession, OpenedSession, QosLevel, SessionEvent, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// What the broker does with the next connect attempt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectOutcome {
    /// Acknowledge the session
    #[default]
    Accept,
    /// Open the session, then refuse it on the event stream
    Refuse(String),
    /// Fail before a session exists
    Unreachable(String),
    /// Open the session and never answer
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct SessionRecord {
    id: usize,
    client_id: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    filters: Vec<(String, QosLevel)>,
    closed: bool,
}

impl SessionRecord {
    fn subscribed_to(&self, topic: &str) -> Option<QosLevel> {
        self.filters
            .iter()
            .find(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, qos)| *qos)
    }
}

/// In-memory broker shared by every session it hands out
#[derive(Default)]
pub struct MockBroker {
    open_attempts: AtomicUsize,
    loopback_disabled: AtomicBool,
    default_outcome: Mutex<ConnectOutcome>,
    script: Mutex<VecDeque<ConnectOutcome>>,
    sessions: Mutex<Vec<SessionRecord>>,
    published: Mutex<Vec<PublishedMessage>>,
    failing_filters: Mutex<HashSet<String>>,
    failing_publishes: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Broker that refuses every connect attempt
    pub fn with_failure() -> Arc<Self> {
        Arc::new(Self {
            default_outcome: Mutex::new(ConnectOutcome::Refuse("Connection refused".to_string())),
            ..Default::default()
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            broker: self.clone(),
        })
    }

    /// Queue outcomes for the next connect attempts, in order
    pub async fn script<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = ConnectOutcome>,
    {
        self.script.lock().await.extend(outcomes);
    }

    /// Outcome for attempts once the script is exhausted
    pub async fn set_default_outcome(&self, outcome: ConnectOutcome) {
        *self.default_outcome.lock().await = outcome;
    }

    pub fn set_loopback(&self, enabled: bool) {
        self.loopback_disabled.store(!enabled, Ordering::SeqCst);
    }

    /// Reject subscribes to exactly this filter
    pub async fn fail_subscriptions_to(&self, filter: &str) {
        self.failing_filters.lock().await.insert(filter.to_string());
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.failing_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.lock().await.iter().filter(|s| !s.closed).count()
    }

    /// Client ids of every session ever opened, oldest first
    pub async fn client_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|s| s.client_id.clone())
            .collect()
    }

    /// Filters held by the newest live session
    pub async fn active_filters(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .iter()
            .rev()
            .find(|s| !s.closed)
            .map(|s| s.filters.iter().map(|(f, _)| f.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Deliver a message to every live session subscribed to `topic`.
    /// Returns the number of sessions reached.
    pub async fn push_message(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let sessions = self.sessions.lock().await;
        let mut delivered = 0;
        for session in sessions.iter().filter(|s| !s.closed) {
            if let Some(qos) = session.subscribed_to(topic) {
                let event = SessionEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    qos,
                    retain: false,
                };
                if session.events.send(event).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Drop every live session as if the network went away
    pub async fn drop_connections(&self, reason: &str) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.iter_mut().filter(|s| !s.closed) {
            session.closed = true;
            let _ = session.events.send(SessionEvent::ConnectionLost {
                reason: reason.to_string(),
            });
        }
    }

    async fn next_outcome(&self) -> ConnectOutcome {
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => self.default_outcome.lock().await.clone(),
        }
    }

    async fn open_session(
        self: &Arc<Self>,
        config: &ConnectionConfig,
    ) -> Result<OpenedSession, TransportError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = match self.next_outcome().await {
            ConnectOutcome::Unreachable(reason) => {
                return Err(TransportError::ConnectionFailed(reason));
            }
            ConnectOutcome::Accept => {
                let _ = tx.send(SessionEvent::Connected);
                false
            }
            ConnectOutcome::Refuse(reason) => {
                let _ = tx.send(SessionEvent::ConnectionLost { reason });
                true
            }
            ConnectOutcome::Hang => false,
        };

        let mut sessions = self.sessions.lock().await;
        let id = sessions.len();
        sessions.push(SessionRecord {
            id,
            client_id: config.client_id.clone(),
            events: tx,
            filters: Vec::new(),
            closed,
        });

        Ok(OpenedSession {
            session: Arc::new(MockSession {
                broker: self.clone(),
                id,
            }),
            events: rx,
        })
    }
}

/// Connector handing out sessions on a [`MockBroker`]
pub struct MockConnector {
    broker: Arc<MockBroker>,
}

impl MockConnector {
    pub fn broker(&self) -> &Arc<MockBroker> {
        &self.broker
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn open(&self, config: &ConnectionConfig) -> Result<OpenedSession, TransportError> {
        self.broker.open_session(config).await
    }
}

/// One session on a [`MockBroker`]
pub struct MockSession {
    broker: Arc<MockBroker>,
    id: usize,
}

impl MockSession {
    async fn with_live_record<R>(
        &self,
        f: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Result<R, TransportError> {
        let mut sessions = self.broker.sessions.lock().await;
        match sessions.iter_mut().find(|s| s.id == self.id) {
            Some(record) if !record.closed => Ok(f(record)),
            _ => Err(TransportError::SessionClosed),
        }
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError> {
        if self.broker.failing_filters.lock().await.contains(topic) {
            return Err(TransportError::Rejected(format!(
                "Subscription to {topic} not authorized"
            )));
        }
        self.with_live_record(|record| {
            match record.filters.iter_mut().find(|(f, _)| f == topic) {
                Some(existing) => existing.1 = qos,
                None => record.filters.push((topic.to_string(), qos)),
            }
        })
        .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.with_live_record(|record| record.filters.retain(|(f, _)| f != topic))
            .await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.with_live_record(|_| ()).await?;
        if self.broker.failing_publishes.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("Quota exceeded".to_string()));
        }

        self.broker.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
            retain,
        });

        if !self.broker.loopback_disabled.load(Ordering::SeqCst) {
            self.broker.push_message(topic, payload).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sessions = self.broker.sessions.lock().await;
        if let Some(record) = sessions.iter_mut().find(|s| s.id == self.id) {
            record.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_outcomes_then_default() {
        let broker = MockBroker::new();
        broker
            .script([ConnectOutcome::Unreachable("no route".to_string())])
            .await;
        let connector = broker.connector();
        let config = ConnectionConfig::default();

        assert!(connector.open(&config).await.is_err());
        let mut opened = connector.open(&config).await.unwrap();
        assert_eq!(opened.events.recv().await, Some(SessionEvent::Connected));
        assert_eq!(broker.open_attempts(), 2);
    }

    #[tokio::test]
    async fn test_loopback_respects_filters() {
        let broker = MockBroker::new();
        let mut opened = broker
            .connector()
            .open(&ConnectionConfig::default())
            .await
            .unwrap();
        let _ = opened.events.recv().await;

        opened
            .session
            .subscribe("devices/+/status", QosLevel::AtLeastOnce)
            .await
            .unwrap();
        opened
            .session
            .publish("devices/7/status", Bytes::from_static(b"up"), QosLevel::AtMostOnce, false)
            .await
            .unwrap();
        opened
            .session
            .publish("other/topic", Bytes::from_static(b"x"), QosLevel::AtMostOnce, false)
            .await
            .unwrap();

        match opened.events.recv().await {
            Some(SessionEvent::Message { topic, qos, .. }) => {
                assert_eq!(topic, "devices/7/status");
                assert_eq!(qos, QosLevel::AtLeastOnce);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(opened.events.try_recv().is_err());
        assert_eq!(broker.get_published_messages().await.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_requests() {
        let broker = MockBroker::new();
        let opened = broker
            .connector()
            .open(&ConnectionConfig::default())
            .await
            .unwrap();
        opened.session.close().await.unwrap();

        let result = opened.session.subscribe("a/b", QosLevel::AtMostOnce).await;
        assert!(matches!(result, Err(TransportError::SessionClosed)));
        assert_eq!(broker.live_sessions().await, 0);
    }
}
