use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use anyhow::anyhow;
use async_trait::async_trait;
use sea_orm::DbErr;

use crate::{
    connectivity::{ConnectionProvider, Connector},
    diff::StatusChange,
    error::{MailerError, MailerResult},
    model::{area_state::AreaState, monitored_area::MonitoredArea},
    notify::Notifier,
    store::AreaStateStore,
    tunnel::{Tunnel, TunnelOpener},
};

pub fn area(code: i64, status: &str, reason: Option<&str>) -> MonitoredArea {
    MonitoredArea {
        area_code: code,
        area_name: format!("Area {code}"),
        current_status: status.to_string(),
        status_reason: reason.map(str::to_string),
    }
}

#[derive(Default)]
struct MemoryState {
    schema_ready: bool,
    areas: Vec<MonitoredArea>,
    states: BTreeMap<i64, String>,
    writes: usize,
    failing_update: Option<i64>,
}

/// In-memory stand-in for the state table. Clones share the same rows.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStateStore {
    pub fn with_areas(areas: Vec<MonitoredArea>) -> Self {
        let store = Self::default();
        store.set_areas(areas);
        store
    }

    pub fn set_areas(&self, areas: Vec<MonitoredArea>) {
        self.inner.lock().unwrap().areas = areas;
    }

    pub fn seed_state(&self, area_code: i64, status: &str) {
        self.inner
            .lock()
            .unwrap()
            .states
            .insert(area_code, status.to_string());
    }

    pub fn fail_updates_for(&self, area_code: i64) {
        self.inner.lock().unwrap().failing_update = Some(area_code);
    }

    pub fn state_of(&self, area_code: i64) -> Option<String> {
        self.inner.lock().unwrap().states.get(&area_code).cloned()
    }

    pub fn rows(&self) -> Vec<(i64, String)> {
        self.inner
            .lock()
            .unwrap()
            .states
            .iter()
            .map(|(code, status)| (*code, status.clone()))
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    pub fn schema_ready(&self) -> bool {
        self.inner.lock().unwrap().schema_ready
    }
}

#[async_trait]
impl AreaStateStore for MemoryStateStore {
    async fn ensure_schema(&self) -> MailerResult<()> {
        self.inner.lock().unwrap().schema_ready = true;
        Ok(())
    }

    async fn read_monitored_areas(&self) -> MailerResult<Vec<MonitoredArea>> {
        Ok(self.inner.lock().unwrap().areas.clone())
    }

    async fn read_last_state(&self, area_code: i64) -> MailerResult<Option<AreaState>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.states.get(&area_code).map(|status| AreaState {
            area_code,
            last_status: status.clone(),
        }))
    }

    async fn insert_initial_state(&self, area_code: i64, status: &str) -> MailerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        assert!(
            !inner.states.contains_key(&area_code),
            "area {area_code} inserted twice"
        );
        inner.states.insert(area_code, status.to_string());
        inner.writes += 1;
        Ok(())
    }

    async fn update_state(&self, area_code: i64, new_status: &str) -> MailerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_update == Some(area_code) {
            return Err(MailerError::Query(DbErr::Custom(format!(
                "update of area {area_code} failed"
            ))));
        }
        match inner.states.get_mut(&area_code) {
            Some(status) => *status = new_status.to_string(),
            None => return Err(MailerError::Query(DbErr::RecordNotUpdated)),
        }
        inner.writes += 1;
        Ok(())
    }
}

/// Hands out a [`MemoryStateStore`] as its connection and counts how often it
/// is acquired and released.
pub struct CountingProvider {
    pub store: MemoryStateStore,
    pub acquired: usize,
    pub released: usize,
    pub refuse: bool,
}

impl CountingProvider {
    pub fn new(store: MemoryStateStore) -> Self {
        Self {
            store,
            acquired: 0,
            released: 0,
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(MemoryStateStore::default())
        }
    }
}

#[async_trait]
impl ConnectionProvider for CountingProvider {
    type Connection = MemoryStateStore;

    async fn acquire(&mut self) -> MailerResult<MemoryStateStore> {
        if self.refuse {
            return Err(MailerError::Connectivity(anyhow!("connection refused")));
        }
        self.acquired += 1;
        Ok(self.store.clone())
    }

    async fn release(&mut self, _conn: MemoryStateStore) {
        self.released += 1;
    }
}

/// Ordered record of connects, disconnects and tunnel opens and closes.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Database reachable at `10.0.0.5:5432` that hands out empty in-memory stores.
pub struct FakeConnector {
    pub events: EventLog,
    pub refuse: bool,
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = MemoryStateStore;

    fn target(&self) -> (&str, u16) {
        ("10.0.0.5", 5432)
    }

    async fn connect(&self, host: &str, port: u16) -> MailerResult<MemoryStateStore> {
        self.events.push(format!("db_connect {host}:{port}"));
        if self.refuse {
            return Err(MailerError::Connectivity(anyhow!(
                "password authentication failed"
            )));
        }
        Ok(MemoryStateStore::default())
    }

    async fn disconnect(&self, _conn: MemoryStateStore) {
        self.events.push("db_close");
    }
}

/// Opens [`FakeTunnel`]s listening on `127.0.0.1:15432`.
pub struct FakeTunnels {
    pub events: EventLog,
    pub refuse: bool,
}

pub struct FakeTunnel {
    events: EventLog,
}

#[async_trait]
impl TunnelOpener for FakeTunnels {
    type Tunnel = FakeTunnel;

    async fn open(&self, remote_host: &str, remote_port: u16) -> anyhow::Result<FakeTunnel> {
        self.events
            .push(format!("tunnel_open {remote_host}:{remote_port}"));
        if self.refuse {
            return Err(anyhow!("bastion refused the connection"));
        }
        Ok(FakeTunnel {
            events: self.events.clone(),
        })
    }
}

#[async_trait]
impl Tunnel for FakeTunnel {
    fn local_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 15432))
    }

    async fn close(self) {
        self.events.push("tunnel_close");
    }
}

/// Keeps every batch it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    pub deliveries: Mutex<Vec<Vec<StatusChange>>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn deliveries(&self) -> Vec<Vec<StatusChange>> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, changes: &[StatusChange]) -> MailerResult<()> {
        self.deliveries.lock().unwrap().push(changes.to_vec());
        if self.fail {
            return Err(MailerError::Notification(anyhow!("535 authentication failed")));
        }
        Ok(())
    }
}
