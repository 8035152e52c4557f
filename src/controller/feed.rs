// src/controller/feed.rs

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, future, stream::BoxStream};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{config::FEED_RETRY_DELAY, models::schedule::ExamSchedule};

const FEED_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("could not connect to exam feed: {0}")]
    Connect(String),
    #[error("exam feed closed")]
    Closed,
    #[error("malformed exam feed message: {0}")]
    Malformed(String),
}

/// Full catalog snapshots, one per push.
pub type CatalogStream = BoxStream<'static, Result<Vec<ExamSchedule>, FeedError>>;

/// Something that can open a live catalog stream.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn connect(&self) -> Result<CatalogStream, FeedError>;
}

/// Fixed-delay reconnect schedule; retries never give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: FEED_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Snapshot(Vec<ExamSchedule>),
    /// Connection lost or refused; a retry is already scheduled.
    Disconnected(FeedError),
}

/// Restartable catalog subscription.
///
/// A background task keeps one connection open, forwards every snapshot and
/// reconnects after `policy.delay` whenever the connection drops.
pub struct FeedSubscription {
    receiver: mpsc::Receiver<FeedEvent>,
    handle: JoinHandle<()>,
}

impl FeedSubscription {
    pub fn start(source: Arc<dyn CatalogSource>, policy: ReconnectPolicy) -> Self {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let handle = tokio::spawn(run(source, policy, tx));
        Self {
            receiver: rx,
            handle,
        }
    }

    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        self.handle.abort();
        self.receiver.close();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(source: Arc<dyn CatalogSource>, policy: ReconnectPolicy, tx: mpsc::Sender<FeedEvent>) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let reason = match source.connect().await {
            Ok(mut stream) => {
                info!(attempt, "exam feed connected");
                attempt = 0;
                loop {
                    match stream.next().await {
                        Some(Ok(catalog)) => {
                            debug!(exams = catalog.len(), "exam feed snapshot");
                            if tx.send(FeedEvent::Snapshot(catalog)).await.is_err() {
                                return;
                            }
                        }
                        // A bad frame is skipped; the next push carries the full catalog.
                        Some(Err(FeedError::Malformed(msg))) => {
                            warn!(error = %msg, "ignoring malformed exam feed message");
                        }
                        Some(Err(e)) => break e,
                        None => break FeedError::Closed,
                    }
                }
            }
            Err(e) => e,
        };

        warn!(error = %reason, retry_in = ?policy.delay, "exam feed disconnected");
        if tx.send(FeedEvent::Disconnected(reason)).await.is_err() {
            return;
        }
        tokio::time::sleep(policy.delay).await;
    }
}

/// Catalog pushed by the portal over `GET /api/exams/feed`.
#[derive(Debug, Clone)]
pub struct WsCatalogSource {
    url: String,
}

impl WsCatalogSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl CatalogSource for WsCatalogSource {
    async fn connect(&self) -> Result<CatalogStream, FeedError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        let stream = ws
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(
                        serde_json::from_str::<Vec<ExamSchedule>>(&text)
                            .map_err(|e| FeedError::Malformed(e.to_string())),
                    ),
                    Ok(_) => None,
                    Err(e) => Some(Err(FeedError::Connect(e.to_string()))),
                })
            });
        Ok(stream.boxed())
    }
}
