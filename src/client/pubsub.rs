//! The resilient pub/sub client
//!
//! All mutable state sits behind one mutex that is never held across an
//! await or while listeners run. Mutations queue their listener
//! notifications; whichever caller finds the queue idle drains it, so
//! notifications are delivered in mutation order even when a listener calls
//! back into the client.
//!
//! Every connect attempt gets a new generation number. Session events,
//! acknowledgements and timers carry the generation they were started under
//! and are ignored once `disconnect()` or a newer attempt has moved on.

use super::history::{BoundedHistory, LOG_HISTORY_CAPACITY, MESSAGE_HISTORY_CAPACITY};
use super::listeners::{ListenerFailure, ListenerHandle, ListenerRegistry};
use super::log::{LogEntry, LogLevel};
use super::message::InboundMessage;
use super::reconnect::{ReconnectPolicy, ReconnectionDecision};
use super::state::{
    remove_subscription, upsert_subscription, ConnectionPhase, ConnectionState, Subscription,
};
use crate::config::{ConfigError, ConnectionConfig};
use crate::error::ClientError;
use crate::protocol::status::ProxyStatus;
use crate::protocol::topics::{is_status_topic, validate_topic_filter, validate_topic_name};
use crate::transport::mqtt::RumqttcConnector;
use crate::transport::{BrokerConnector, BrokerSession, OpenedSession, QosLevel, SessionEvent};
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};

enum Effect {
    State(ConnectionState),
    Message(InboundMessage),
    Log(LogEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectOrigin {
    Manual,
    Reconnect,
}

struct ActiveSession {
    generation: u64,
    session: Arc<dyn BrokerSession>,
    events_task: JoinHandle<()>,
}

struct PendingConnect {
    generation: u64,
    waiter: oneshot::Sender<Result<(), ClientError>>,
}

struct ReconnectTimer {
    id: u64,
    handle: JoinHandle<()>,
}

struct ClientState {
    connection: ConnectionState,
    generation: u64,
    timer_seq: u64,
    session: Option<ActiveSession>,
    pending_connect: Option<PendingConnect>,
    reconnect_timer: Option<ReconnectTimer>,
    subscriptions: Vec<Subscription>,
    messages: BoundedHistory<InboundMessage>,
    logs: BoundedHistory<LogEntry>,
    effects: VecDeque<Effect>,
    draining: bool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::default(),
            generation: 0,
            timer_seq: 0,
            session: None,
            pending_connect: None,
            reconnect_timer: None,
            subscriptions: Vec::new(),
            messages: BoundedHistory::new(MESSAGE_HISTORY_CAPACITY),
            logs: BoundedHistory::new(LOG_HISTORY_CAPACITY),
            effects: VecDeque::new(),
            draining: false,
        }
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>, details: Option<Value>) {
        let entry = LogEntry::new(level, message, details);
        self.logs.push(entry.clone());
        self.effects.push_back(Effect::Log(entry));
    }

    fn notify_state(&mut self) {
        self.effects
            .push_back(Effect::State(self.connection.clone()));
    }

    fn cancel_reconnect_timer(&mut self) -> bool {
        match self.reconnect_timer.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    fn resolve_pending(&mut self, generation: u64, result: Result<(), ClientError>) {
        if self
            .pending_connect
            .as_ref()
            .is_some_and(|pending| pending.generation == generation)
        {
            if let Some(pending) = self.pending_connect.take() {
                let _ = pending.waiter.send(result);
            }
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn BrokerConnector>,
    state: Mutex<ClientState>,
    state_listeners: Arc<ListenerRegistry<ConnectionState>>,
    message_listeners: Arc<ListenerRegistry<InboundMessage>>,
    log_listeners: Arc<ListenerRegistry<LogEntry>>,
}

/// Resilient client for one logical broker connection
///
/// Cloning is cheap; clones share the same connection, histories and
/// listener registries.
#[derive(Clone)]
pub struct PubSubClient {
    inner: Arc<Inner>,
}

impl PubSubClient {
    /// Build a client over `connector`; an invalid configuration is refused here
    /// rather than surfacing on the first connect.
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = ReconnectPolicy::from_config(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                policy,
                connector,
                state: Mutex::new(ClientState::new()),
                state_listeners: ListenerRegistry::new(),
                message_listeners: ListenerRegistry::new(),
                log_listeners: ListenerRegistry::new(),
            }),
        })
    }

    /// Client backed by rumqttc
    pub fn with_rumqttc(config: ConnectionConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(RumqttcConnector::new()))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakPubSubClient {
        WeakPubSubClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Open a session and wait for the broker to acknowledge it.
    ///
    /// Resolves after the default topics (plus any subscriptions carried over
    /// from an earlier session) have been requested; failures there are logged
    /// and do not fail the connect. A no-op while connected or connecting.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connect(ConnectOrigin::Manual).await
    }

    /// Tear the connection down.
    ///
    /// The state change happens when this is called, before the returned
    /// future is polled: any pending reconnect timer is cancelled and the
    /// client is already `Disconnected`. The future resolves once the broker
    /// session is closed. Idempotent, and safe to call from a listener.
    pub fn disconnect(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let closing = self.inner.teardown().and_then(|active| {
            active.events_task.abort();
            let session = active.session;
            tokio::runtime::Handle::try_current()
                .ok()
                .map(|runtime| runtime.spawn(async move { session.close().await }))
        });

        async move {
            if let Some(task) = closing {
                match task.await {
                    Ok(Ok(())) => debug!("MQTT session closed"),
                    Ok(Err(e)) => warn!("Error while closing MQTT session: {}", e),
                    Err(e) => warn!("MQTT session close task failed: {}", e),
                }
            }
            Ok(())
        }
    }

    pub async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), ClientError> {
        if let Err(e) = validate_topic_filter(topic) {
            return Err(self.inner.reject("subscribe", ClientError::invalid_topic(topic, e)));
        }
        let (generation, session) = self.inner.active_session("subscribe", topic)?;

        match session
            .subscribe(topic, qos)
            .instrument(crate::mqtt_span!(operation = "subscribe", topic = %topic))
            .await
        {
            Ok(()) => {
                self.inner.update(|state| {
                    if state.generation == generation {
                        upsert_subscription(&mut state.subscriptions, topic, qos);
                    }
                    state.log(
                        LogLevel::Info,
                        format!("Subscribed to {topic}"),
                        Some(json!({ "qos": qos.as_u8() })),
                    );
                });
                Ok(())
            }
            Err(source) => {
                self.inner.update(|state| {
                    state.log(
                        LogLevel::Error,
                        format!("Failed to subscribe to {topic}: {source}"),
                        None,
                    )
                });
                Err(ClientError::Subscribe {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        if let Err(e) = validate_topic_filter(topic) {
            return Err(self.inner.reject("unsubscribe", ClientError::invalid_topic(topic, e)));
        }
        let (generation, session) = self.inner.active_session("unsubscribe", topic)?;

        match session
            .unsubscribe(topic)
            .instrument(crate::mqtt_span!(operation = "unsubscribe", topic = %topic))
            .await
        {
            Ok(()) => {
                self.inner.update(|state| {
                    if state.generation == generation {
                        remove_subscription(&mut state.subscriptions, topic);
                    }
                    state.log(LogLevel::Info, format!("Unsubscribed from {topic}"), None);
                });
                Ok(())
            }
            Err(source) => {
                self.inner.update(|state| {
                    state.log(
                        LogLevel::Error,
                        format!("Failed to unsubscribe from {topic}: {source}"),
                        None,
                    )
                });
                Err(ClientError::Unsubscribe {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    /// Publish once; completes on broker acknowledgement. Never retried.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), ClientError> {
        if let Err(e) = validate_topic_name(topic) {
            return Err(self.inner.reject("publish", ClientError::invalid_topic(topic, e)));
        }
        let (_, session) = self.inner.active_session("publish", topic)?;
        let payload = payload.into();
        let size = payload.len();

        match session
            .publish(topic, payload, qos, retain)
            .instrument(crate::mqtt_span!(operation = "publish", topic = %topic, bytes = size))
            .await
        {
            Ok(()) => {
                self.inner.update(|state| {
                    state.log(
                        LogLevel::Info,
                        format!("Published to {topic}"),
                        Some(json!({ "bytes": size, "qos": qos.as_u8(), "retain": retain })),
                    )
                });
                Ok(())
            }
            Err(source) => {
                self.inner.update(|state| {
                    state.log(
                        LogLevel::Error,
                        format!("Failed to publish to {topic}: {source}"),
                        None,
                    )
                });
                Err(ClientError::Publish {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock_state().connection.clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.lock_state().connection.phase()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connection.is_connected
    }

    /// Message history, newest first
    pub fn messages(&self) -> Vec<InboundMessage> {
        self.inner.lock_state().messages.snapshot()
    }

    /// Log history, newest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.lock_state().logs.snapshot()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.lock_state().subscriptions.clone()
    }

    pub fn clear_messages(&self) {
        self.inner.lock_state().messages.clear();
    }

    pub fn clear_logs(&self) {
        self.inner.lock_state().logs.clear();
    }

    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_listeners.register(listener)
    }

    pub fn add_message_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.message_listeners.register(listener)
    }

    pub fn add_log_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.inner.log_listeners.register(listener)
    }
}

/// Non-owning reference to a [`PubSubClient`]
///
/// Listeners that need to call back into the client hold one of these so the
/// client's registries do not keep the client alive.
#[derive(Clone)]
pub struct WeakPubSubClient {
    inner: Weak<Inner>,
}

impl WeakPubSubClient {
    pub fn upgrade(&self) -> Option<PubSubClient> {
        self.inner.upgrade().map(|inner| PubSubClient { inner })
    }
}

impl std::fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubClient")
            .field("client_id", &self.inner.config.client_id)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate state, then deliver whatever notifications the mutation queued
    fn update<R>(&self, mutate: impl FnOnce(&mut ClientState) -> R) -> R {
        let result = {
            let mut state = self.lock_state();
            mutate(&mut state)
        };
        self.drain_effects();
        result
    }

    fn drain_effects(&self) {
        {
            let mut state = self.lock_state();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            let effect = {
                let mut state = self.lock_state();
                match state.effects.pop_front() {
                    Some(effect) => effect,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            self.deliver(effect);
        }
    }

    fn deliver(&self, effect: Effect) {
        match effect {
            Effect::State(snapshot) => {
                let failures = self.state_listeners.dispatch(&snapshot);
                self.report_failures("Connection state listener failed", failures);
            }
            Effect::Message(message) => {
                let failures = self.message_listeners.dispatch(&message);
                self.report_failures("Message listener failed", failures);
            }
            Effect::Log(entry) => {
                if self.config.logging_enabled {
                    entry.mirror();
                }
                for failure in self.log_listeners.dispatch(&entry) {
                    error!(listener = failure.listener_id, "Log listener failed: {}", failure.message);
                }
            }
        }
    }

    fn report_failures(&self, context: &str, failures: Vec<ListenerFailure>) {
        if failures.is_empty() {
            return;
        }
        let mut state = self.lock_state();
        for failure in failures {
            state.log(
                LogLevel::Error,
                format!("{context}: {}", failure.message),
                Some(json!({ "listenerId": failure.listener_id })),
            );
        }
    }

    fn reject(&self, operation: &str, error: ClientError) -> ClientError {
        self.update(|state| {
            state.log(LogLevel::Warn, format!("Rejected {operation}: {error}"), None)
        });
        error
    }

    fn active_session(
        &self,
        operation: &str,
        topic: &str,
    ) -> Result<(u64, Arc<dyn BrokerSession>), ClientError> {
        self.update(|state| {
            if state.connection.is_connected {
                if let Some(active) = &state.session {
                    return Ok((active.generation, active.session.clone()));
                }
            }
            state.log(
                LogLevel::Warn,
                format!("Cannot {operation} '{topic}': not connected"),
                None,
            );
            Err(ClientError::NotConnected)
        })
    }

    async fn connect(self: &Arc<Self>, origin: ConnectOrigin) -> Result<(), ClientError> {
        let started = self.update(|state| self.begin_connect(state, origin));
        let Some((generation, waiter)) = started else {
            return Ok(());
        };

        match self.connector.open(&self.config).await {
            Ok(opened) => self.install_session(generation, opened),
            Err(e) => self.session_lost(generation, e.to_string()),
        }

        match tokio::time::timeout(self.config.connect_timeout, waiter).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => self.connect_timed_out(generation),
        }
    }

    fn begin_connect(
        &self,
        state: &mut ClientState,
        origin: ConnectOrigin,
    ) -> Option<(u64, oneshot::Receiver<Result<(), ClientError>>)> {
        if state.connection.is_connected || state.connection.is_connecting {
            state.log(
                LogLevel::Info,
                "Connect skipped: already connected or connecting",
                None,
            );
            return None;
        }

        if origin == ConnectOrigin::Manual {
            state.cancel_reconnect_timer();
            state.connection.is_reconnecting = false;
        }

        state.generation += 1;
        let generation = state.generation;
        let (waiter_tx, waiter_rx) = oneshot::channel();
        state.pending_connect = Some(PendingConnect {
            generation,
            waiter: waiter_tx,
        });
        state.connection.is_connecting = true;
        state.notify_state();
        state.log(
            LogLevel::Info,
            format!("Connecting to MQTT broker at {}", self.config.broker_url()),
            Some(json!({ "clientId": self.config.client_id })),
        );

        Some((generation, waiter_rx))
    }

    fn install_session(self: &Arc<Self>, generation: u64, opened: OpenedSession) {
        let OpenedSession { session, events } = opened;
        let mut state = self.lock_state();

        if state.generation != generation || !state.connection.is_connecting {
            drop(state);
            debug!("Discarding session opened for a superseded connect attempt");
            tokio::spawn(async move {
                let _ = session.close().await;
            });
            return;
        }

        let events_task = tokio::spawn(forward_session_events(
            Arc::downgrade(self),
            generation,
            events,
        ));
        state.session = Some(ActiveSession {
            generation,
            session,
            events_task,
        });
    }

    async fn on_connected(self: &Arc<Self>, generation: u64) {
        let restore = self.update(|state| {
            if state.generation != generation || !state.connection.is_connecting {
                return None;
            }
            let session = state.session.as_ref()?.session.clone();

            let connection = &mut state.connection;
            connection.is_connected = true;
            connection.is_connecting = false;
            connection.is_reconnecting = false;
            connection.reconnect_attempts = 0;
            connection.connection_error = None;
            connection.last_connected = Some(Utc::now());
            state.notify_state();
            state.log(
                LogLevel::Info,
                "Connected to MQTT broker",
                Some(json!({
                    "url": self.config.broker_url(),
                    "clientId": self.config.client_id,
                })),
            );

            let mut topics: Vec<Subscription> = self
                .config
                .default_topics
                .iter()
                .map(|topic| Subscription {
                    topic: topic.clone(),
                    qos: QosLevel::AtMostOnce,
                })
                .collect();
            for existing in &state.subscriptions {
                if !topics.iter().any(|t| t.topic == existing.topic) {
                    topics.push(existing.clone());
                }
            }
            Some((session, topics))
        });

        let Some((session, topics)) = restore else {
            return;
        };

        for Subscription { topic, qos } in topics {
            let result = session.subscribe(&topic, qos).await;
            self.update(|state| {
                if state.generation != generation {
                    return;
                }
                match result {
                    Ok(()) => {
                        upsert_subscription(&mut state.subscriptions, &topic, qos);
                        state.log(
                            LogLevel::Info,
                            format!("Subscribed to {topic}"),
                            Some(json!({ "qos": qos.as_u8() })),
                        );
                    }
                    Err(e) => state.log(
                        LogLevel::Error,
                        format!("Failed to subscribe to default topic {topic}: {e}"),
                        None,
                    ),
                }
            });
        }

        self.update(|state| state.resolve_pending(generation, Ok(())));
    }

    fn on_message(
        &self,
        generation: u64,
        topic: String,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) {
        self.update(|state| {
            if state.generation != generation {
                return;
            }

            let mut message = InboundMessage::new(topic, &payload, qos, retain);
            if is_status_topic(&message.topic) {
                match ProxyStatus::decode(&message.topic, &message.payload) {
                    Ok(status) => message.status = Some(status),
                    Err(e) => state.log(
                        LogLevel::Error,
                        format!("Failed to decode status update on {}: {e}", message.topic),
                        Some(json!({ "payload": message.payload })),
                    ),
                }
            }

            let topic = message.topic.clone();
            state.messages.push(message.clone());
            state.effects.push_back(Effect::Message(message));
            state.log(LogLevel::Info, format!("Message received on {topic}"), None);
        });
    }

    /// The session for `generation` ended without `disconnect()` asking for it
    fn session_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let closed = self.update(|state| {
            let live = state.connection.is_connected || state.connection.is_connecting;
            if state.generation != generation || !live {
                return None;
            }

            let was_connected = state.connection.is_connected;
            let active = state.session.take();
            state.connection.is_connected = false;
            state.connection.is_connecting = false;
            state.connection.is_reconnecting = false;
            state.connection.connection_error = Some(reason.clone());
            state.connection.last_error_at = Some(Utc::now());
            state.resolve_pending(generation, Err(ClientError::ConnectionFailed(reason.clone())));

            if was_connected {
                state.log(
                    LogLevel::Warn,
                    format!("Connection to MQTT broker lost: {reason}"),
                    None,
                );
            } else {
                state.log(
                    LogLevel::Error,
                    format!("Connection to MQTT broker failed: {reason}"),
                    None,
                );
            }
            state.notify_state();

            match self.policy.decide(state.connection.reconnect_attempts) {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    state.connection.is_reconnecting = true;
                    self.schedule_reconnect(state, delay);
                    state.log(
                        LogLevel::Info,
                        format!(
                            "Reconnecting in {} ms (attempt {}/{})",
                            delay.as_millis(),
                            attempt,
                            self.policy.max_attempts
                        ),
                        None,
                    );
                    state.notify_state();
                }
                ReconnectionDecision::AbortDisabled => {}
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    state.log(
                        LogLevel::Error,
                        format!(
                            "Giving up after {} reconnect attempts",
                            state.connection.reconnect_attempts
                        ),
                        None,
                    );
                }
            }

            Some(active)
        });

        if let Some(Some(active)) = closed {
            active.events_task.abort();
            tokio::spawn(async move {
                let _ = active.session.close().await;
            });
        }
    }

    fn connect_timed_out(self: &Arc<Self>, generation: u64) -> Result<(), ClientError> {
        let (connected, connecting) = {
            let state = self.lock_state();
            let current = state.generation == generation;
            (
                current && state.connection.is_connected,
                current && state.connection.is_connecting,
            )
        };

        // Acknowledged; only the default subscriptions were slow
        if connected {
            return Ok(());
        }
        if connecting {
            self.session_lost(
                generation,
                format!(
                    "No broker acknowledgement within {} ms",
                    self.config.connect_timeout.as_millis()
                ),
            );
        }
        Err(ClientError::ConnectTimeout(self.config.connect_timeout))
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ClientState, delay: Duration) {
        state.cancel_reconnect_timer();
        state.timer_seq += 1;
        let id = state.timer_seq;
        let client = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = client.upgrade() {
                inner.reconnect_timer_fired(id).await;
            }
        });
        state.reconnect_timer = Some(ReconnectTimer { id, handle });
    }

    async fn reconnect_timer_fired(self: &Arc<Self>, id: u64) {
        let due = self.update(|state| {
            if state.reconnect_timer.as_ref().map(|timer| timer.id) != Some(id) {
                return false;
            }
            // Our own handle; dropping it detaches
            state.reconnect_timer = None;
            state.connection.reconnect_attempts += 1;
            state.log(
                LogLevel::Info,
                format!(
                    "Reconnect attempt {}/{}",
                    state.connection.reconnect_attempts, self.policy.max_attempts
                ),
                None,
            );
            true
        });

        if due {
            if let Err(e) = self.connect(ConnectOrigin::Reconnect).await {
                debug!("Reconnect attempt failed: {}", e);
            }
        }
    }

    fn teardown(&self) -> Option<ActiveSession> {
        self.update(|state| {
            state.generation += 1;
            let timer_cancelled = state.cancel_reconnect_timer();
            let active = state.session.take();
            if let Some(pending) = state.pending_connect.take() {
                let _ = pending.waiter.send(Err(ClientError::Cancelled));
            }

            let previous = state.connection.phase();
            state.connection = ConnectionState {
                last_connected: state.connection.last_connected,
                ..ConnectionState::default()
            };
            state.subscriptions.clear();
            state.notify_state();
            state.log(
                LogLevel::Info,
                "Disconnected from MQTT broker",
                Some(json!({
                    "previousState": previous.to_string(),
                    "reconnectCancelled": timer_cancelled,
                })),
            );
            active
        })
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.cancel_reconnect_timer();
        if let Some(active) = state.session.take() {
            active.events_task.abort();
        }
    }
}

/// Feed one session's events into the client until the session ends
async fn forward_session_events(
    client: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = client.upgrade() else {
            return;
        };
        match event {
            SessionEvent::Connected => inner.on_connected(generation).await,
            SessionEvent::Message {
                topic,
                payload,
                qos,
                retain,
            } => inner.on_message(generation, topic, payload, qos, retain),
            SessionEvent::ConnectionLost { reason } => {
                inner.session_lost(generation, reason);
                return;
            }
        }
    }

    if let Some(inner) = client.upgrade() {
        inner.session_lost(generation, "Session event stream closed".to_string());
    }
}
