//! Explicitly constructed state container mirroring a client
//!
//! A [`FeedStore`] only ever learns about the client through its listeners.
//! Several stores may watch one client, and one store may be re-attached to a
//! different client after [`StoreBinding::detach`] and [`FeedStore::reset`].

use crate::client::{
    BoundedHistory, ConnectionState, InboundMessage, ListenerHandle, LogEntry, PubSubClient,
    Subscription, LOG_HISTORY_CAPACITY, MESSAGE_HISTORY_CAPACITY,
};
use crate::protocol::status::{
    DecodeError, ProxyStatus, ProxyStatusRecord, StatusFilter, StatusKind, StatusSort,
    StatusSummary,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Latest known status per device, keyed by device id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatusBoard {
    records: BTreeMap<i64, ProxyStatusRecord>,
    updated_at: Option<DateTime<Utc>>,
}

impl DeviceStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the board with a full snapshot
    pub fn seed(&mut self, records: impl IntoIterator<Item = ProxyStatusRecord>) {
        self.records = records
            .into_iter()
            .map(|record| (record.proxyid, record))
            .collect();
        self.updated_at = Some(Utc::now());
    }

    /// Seed from the JSON array returned by the device list endpoint
    pub fn seed_from_json(&mut self, json: &str) -> Result<usize, DecodeError> {
        let records: Vec<ProxyStatusRecord> = serde_json::from_str(json)?;
        self.seed(records);
        Ok(self.records.len())
    }

    /// Merge a pushed update. Updates without a device id are ignored.
    pub fn apply(&mut self, update: &ProxyStatus) -> Option<StatusKind> {
        let id = update.proxyid?;
        let record = self
            .records
            .entry(id)
            .or_insert_with(|| ProxyStatusRecord::new(id));
        record.apply(update);
        self.updated_at = Some(Utc::now());
        Some(record.kind())
    }

    pub fn get(&self, id: i64) -> Option<&ProxyStatusRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Records in device id order
    pub fn records(&self) -> impl Iterator<Item = &ProxyStatusRecord> {
        self.records.values()
    }

    pub fn summary(&self) -> StatusSummary {
        StatusSummary::from_records(self.records.values())
    }

    /// Records matching `filter`, ordered by `sort`
    pub fn view(&self, filter: &StatusFilter, sort: StatusSort) -> Vec<ProxyStatusRecord> {
        let mut rows: Vec<ProxyStatusRecord> = self
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        rows.sort_by(|a, b| sort.compare(a, b));
        rows
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.updated_at = None;
    }
}

struct StoreState {
    connection: ConnectionState,
    messages: BoundedHistory<InboundMessage>,
    logs: BoundedHistory<LogEntry>,
    subscriptions: Vec<Subscription>,
    board: DeviceStatusBoard,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::default(),
            messages: BoundedHistory::new(MESSAGE_HISTORY_CAPACITY),
            logs: BoundedHistory::new(LOG_HISTORY_CAPACITY),
            subscriptions: Vec::new(),
            board: DeviceStatusBoard::default(),
        }
    }
}

/// Mirrors connection state, histories, subscriptions and a device board
#[derive(Clone, Default)]
pub struct FeedStore {
    state: Arc<Mutex<StoreState>>,
}

/// Listener registrations tying a store to a client
#[must_use = "dropping the binding keeps the store attached; call detach() to stop mirroring"]
#[derive(Debug)]
pub struct StoreBinding {
    handles: Vec<ListenerHandle>,
}

impl StoreBinding {
    /// Remove all three listeners
    pub fn detach(self) {
        for handle in self.handles {
            handle.remove();
        }
    }
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy the client's current snapshots and start mirroring its listeners
    pub fn attach(&self, client: &PubSubClient) -> StoreBinding {
        {
            let mut state = self.lock();
            state.connection = client.connection_state();
            state.subscriptions = client.subscriptions();
            state.messages.clear();
            // Snapshots are newest first; replay oldest first
            for message in client.messages().into_iter().rev() {
                if let Some(status) = &message.status {
                    state.board.apply(status);
                }
                state.messages.push(message);
            }
            state.logs.clear();
            for entry in client.logs().into_iter().rev() {
                state.logs.push(entry);
            }
        }

        let weak = client.downgrade();
        let store = self.clone();
        let on_state = client.add_connection_listener(move |snapshot| {
            let subscriptions = weak.upgrade().map(|client| client.subscriptions());
            let mut state = store.lock();
            state.connection = snapshot.clone();
            if let Some(subscriptions) = subscriptions {
                state.subscriptions = subscriptions;
            }
        });

        let store = self.clone();
        let on_message = client.add_message_listener(move |message| {
            let mut state = store.lock();
            if let Some(status) = &message.status {
                if let Some(kind) = state.board.apply(status) {
                    debug!(proxyid = ?status.proxyid, status = %kind, "Device status updated");
                }
            }
            state.messages.push(message.clone());
        });

        // Subscription changes only surface as log entries
        let weak = client.downgrade();
        let store = self.clone();
        let on_log = client.add_log_listener(move |entry| {
            let subscriptions = weak.upgrade().map(|client| client.subscriptions());
            let mut state = store.lock();
            state.logs.push(entry.clone());
            if let Some(subscriptions) = subscriptions {
                state.subscriptions = subscriptions;
            }
        });

        StoreBinding {
            handles: vec![on_state, on_message, on_log],
        }
    }

    /// Back to the initial state; a seeded board is cleared too
    pub fn reset(&self) {
        *self.lock() = StoreState::default();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection.clone()
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        self.lock().messages.snapshot()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().logs.snapshot()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock().subscriptions.clone()
    }

    pub fn seed_devices(&self, records: impl IntoIterator<Item = ProxyStatusRecord>) {
        self.lock().board.seed(records);
    }

    pub fn seed_devices_from_json(&self, json: &str) -> Result<usize, DecodeError> {
        self.lock().board.seed_from_json(json)
    }

    pub fn device(&self, id: i64) -> Option<ProxyStatusRecord> {
        self.lock().board.get(id).cloned()
    }

    pub fn board(&self) -> DeviceStatusBoard {
        self.lock().board.clone()
    }

    pub fn summary(&self) -> StatusSummary {
        self.lock().board.summary()
    }

    pub fn device_view(&self, filter: &StatusFilter, sort: StatusSort) -> Vec<ProxyStatusRecord> {
        self.lock().board.view(filter, sort)
    }
}

impl std::fmt::Debug for FeedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FeedStore")
            .field("phase", &state.connection.phase())
            .field("messages", &state.messages.len())
            .field("logs", &state.logs.len())
            .field("devices", &state.board.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::status::{SortField, SortOrder};

    fn status(id: i64, message: &str, alive: &str) -> ProxyStatus {
        ProxyStatus {
            proxyid: Some(id),
            message: message.to_string(),
            proxy_service_alive: Some(alive.to_string()),
            proxy_service_start: Some("1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_push_updates_overwrite_only_carried_fields() {
        let mut board = DeviceStatusBoard::new();
        board.seed([ProxyStatusRecord {
            proxyid: 4,
            message: "NG_Timeout".to_string(),
            controller_type: "ACS".to_string(),
            proxy_ip: "10.0.0.4".to_string(),
            ..Default::default()
        }]);

        assert_eq!(board.apply(&status(4, "OK", "1")), Some(StatusKind::Running));
        let record = board.get(4).unwrap();
        assert_eq!(record.message, "OK");
        assert_eq!(record.controller_type, "ACS");
        assert_eq!(record.proxy_ip, "10.0.0.4");
    }

    #[test]
    fn test_unknown_device_is_added_and_anonymous_ignored() {
        let mut board = DeviceStatusBoard::new();
        assert_eq!(board.apply(&status(9, "HTTP 502", "1")), Some(StatusKind::Error));
        assert_eq!(board.len(), 1);

        let anonymous = ProxyStatus {
            message: "OK".to_string(),
            ..Default::default()
        };
        assert_eq!(board.apply(&anonymous), None);
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn test_seed_from_json_with_missing_fields() {
        let mut board = DeviceStatusBoard::new();
        let json = r#"[
            {"proxyid": 2, "message": "OK", "proxyServiceAlive": "1", "proxyServiceStart": "1"},
            {"proxyid": 1, "message": "OK", "proxyServiceAlive": "0", "proxyServiceStart": "1", "remark": "lobby"}
        ]"#;

        assert_eq!(board.seed_from_json(json).unwrap(), 2);
        let ids: Vec<i64> = board.records().map(|r| r.proxyid).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(board.seed_from_json("{").is_err());
    }

    #[test]
    fn test_summary_and_view() {
        let mut board = DeviceStatusBoard::new();
        board.apply(&status(1, "OK", "1"));
        board.apply(&status(2, "OK", "0"));
        board.apply(&status(3, "OK", "1"));

        let summary = board.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.running, 2);
        assert_eq!(summary.stopped, 1);

        let filter = StatusFilter {
            status: Some(StatusKind::Running),
            ..Default::default()
        };
        let sort = StatusSort {
            field: SortField::ProxyId,
            order: SortOrder::Desc,
        };
        let ids: Vec<i64> = board.view(&filter, sort).iter().map(|r| r.proxyid).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let store = FeedStore::new();
        store.seed_devices([ProxyStatusRecord::new(1)]);
        assert_eq!(store.board().len(), 1);

        store.reset();
        assert!(store.board().is_empty());
        assert!(store.messages().is_empty());
        assert_eq!(store.connection_state(), ConnectionState::default());
    }
}
