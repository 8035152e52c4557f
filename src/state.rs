use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;
use tokio::sync::watch;

use crate::{
    config::Config,
    handlers::catalog::published_exams,
    models::schedule::ExamSchedule,
    utils::clock::{Clock, PortalTime},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub catalog: CatalogHub,
}

impl AppState {
    pub fn portal_time(&self) -> PortalTime {
        PortalTime::new(self.config.utc_offset)
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for CatalogHub {
    fn from_ref(state: &AppState) -> Self {
        state.catalog.clone()
    }
}

/// Latest published catalog, fanned out to every feed subscriber.
#[derive(Clone)]
pub struct CatalogHub {
    tx: Arc<watch::Sender<Vec<ExamSchedule>>>,
}

impl Default for CatalogHub {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogHub {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ExamSchedule>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Vec<ExamSchedule> {
        self.tx.borrow().clone()
    }

    /// Reloads the catalog from the database and pushes it to subscribers.
    pub async fn refresh(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let exams = published_exams(pool).await?;
        tracing::debug!(exams = exams.len(), "exam catalog refreshed");
        self.tx.send_replace(exams);
        Ok(())
    }
}
