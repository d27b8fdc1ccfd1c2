use async_trait::async_trait;
use sea_orm::DatabaseConnection;

use crate::{
    error::MailerResult,
    model::{
        area_state::{AreaState, AreaStateCtrl},
        monitored_area::{MonitoredArea, MonitoredAreaCtrl},
    },
};

/// Reads the area snapshot and reads/writes the last status recorded per area.
///
/// Writes must be durable when the call returns: the diff relies on every
/// area being committed on its own, so a failure halfway through a run keeps
/// the areas already processed.
#[async_trait]
pub trait AreaStateStore: Send + Sync {
    /// Creates the state schema and table when missing. Safe to call every run.
    async fn ensure_schema(&self) -> MailerResult<()>;

    async fn read_monitored_areas(&self) -> MailerResult<Vec<MonitoredArea>>;

    async fn read_last_state(&self, area_code: i64) -> MailerResult<Option<AreaState>>;

    /// Records the status of an area seen for the first time.
    async fn insert_initial_state(&self, area_code: i64, status: &str) -> MailerResult<()>;

    async fn update_state(&self, area_code: i64, new_status: &str) -> MailerResult<()>;
}

pub struct DbStateStore {
    conn: DatabaseConnection,
}

impl DbStateStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn into_inner(self) -> DatabaseConnection {
        self.conn
    }
}

#[async_trait]
impl AreaStateStore for DbStateStore {
    async fn ensure_schema(&self) -> MailerResult<()> {
        tracing::info!("Creating schema 'notificaciones' and table 'estados' if they do not exist");
        AreaStateCtrl::ensure_schema(&self.conn).await?;
        Ok(())
    }

    async fn read_monitored_areas(&self) -> MailerResult<Vec<MonitoredArea>> {
        let areas = MonitoredAreaCtrl::all(&self.conn).await?;
        tracing::info!("Read {} monitored areas", areas.len());
        Ok(areas)
    }

    async fn read_last_state(&self, area_code: i64) -> MailerResult<Option<AreaState>> {
        Ok(AreaStateCtrl::find_by_area_code(&self.conn, area_code).await?)
    }

    async fn insert_initial_state(&self, area_code: i64, status: &str) -> MailerResult<()> {
        AreaStateCtrl::insert(&self.conn, area_code, status).await?;
        Ok(())
    }

    async fn update_state(&self, area_code: i64, new_status: &str) -> MailerResult<()> {
        AreaStateCtrl::update_status(&self.conn, area_code, new_status).await?;
        Ok(())
    }
}
