use crate::persist::TabFileStore;
use crate::tabs::{TabMetadataPatch, TabSet, TabSetSnapshot};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum TabBackendError {
    #[error("tab backend unavailable: {0}")]
    Unavailable(String),
    #[error("tab backend returned an inconsistent snapshot (current {current:?} not in tab list)")]
    Inconsistent { current: Option<String> },
}

/// The service that owns the tab set. Every call answers with a complete
/// snapshot that replaces whatever the caller held before.
#[async_trait]
pub trait TabBackend: Send + Sync {
    async fn list_tabs(&self) -> Result<TabSetSnapshot, TabBackendError>;
    async fn select_tab(&self, id: &str) -> Result<TabSetSnapshot, TabBackendError>;
    async fn new_tab(&self) -> Result<TabSetSnapshot, TabBackendError>;
    async fn close_tab(&self, id: &str) -> Result<TabSetSnapshot, TabBackendError>;
    async fn prev_tab(&self) -> Result<TabSetSnapshot, TabBackendError>;
    async fn next_tab(&self) -> Result<TabSetSnapshot, TabBackendError>;
    async fn update_tab(
        &self,
        id: &str,
        patch: &TabMetadataPatch,
    ) -> Result<TabSetSnapshot, TabBackendError>;
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TabRequest {
    List,
    Select(String),
    New,
    Close(String),
    Prev,
    Next,
    Update { id: String, patch: TabMetadataPatch },
}

impl TabRequest {
    pub fn label(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Select(_) => "select",
            Self::New => "new",
            Self::Close(_) => "close",
            Self::Prev => "prev",
            Self::Next => "next",
            Self::Update { .. } => "update",
        }
    }

    pub async fn send(&self, backend: &dyn TabBackend) -> Result<TabSetSnapshot, TabBackendError> {
        match self {
            Self::List => backend.list_tabs().await,
            Self::Select(id) => backend.select_tab(id).await,
            Self::New => backend.new_tab().await,
            Self::Close(id) => backend.close_tab(id).await,
            Self::Prev => backend.prev_tab().await,
            Self::Next => backend.next_tab().await,
            Self::Update { id, patch } => backend.update_tab(id, patch).await,
        }
    }
}

/// In-process backend holding the tab set, optionally saved to disk after
/// each mutation.
pub struct LocalTabBackend {
    tabs: Mutex<TabSet>,
    store: Option<TabFileStore>,
}

impl LocalTabBackend {
    pub fn new(tabs: TabSet, store: Option<TabFileStore>) -> Self {
        Self {
            tabs: Mutex::new(tabs),
            store,
        }
    }

    /// Restore saved tabs, or start with a single fresh tab.
    pub fn open(store: Option<TabFileStore>) -> Self {
        let restored = match store.as_ref().map(TabFileStore::read) {
            Some(Ok(Some(snapshot))) => Some(TabSet::from_snapshot(snapshot)),
            Some(Ok(None)) | None => None,
            Some(Err(error)) => {
                warn!("ignoring saved tabs: {error:#}");
                None
            }
        };

        let tabs = match restored {
            Some(tabs) if !tabs.is_empty() => tabs,
            _ => {
                let mut tabs = TabSet::new();
                tabs.new_tab();
                tabs
            }
        };
        Self::new(tabs, store)
    }

    /// The lock is held until the save finishes so the file always holds
    /// the latest snapshot.
    async fn mutate(&self, change: impl FnOnce(&mut TabSet)) -> TabSetSnapshot {
        let mut tabs = self.tabs.lock().await;
        change(&mut *tabs);
        let snapshot = tabs.snapshot();
        if let Some(store) = self.store.clone() {
            let saved = snapshot.clone();
            match tokio::task::spawn_blocking(move || store.write(&saved)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!("failed to save tabs: {error:#}"),
                Err(error) => warn!("tab save task failed: {error}"),
            }
        }
        snapshot
    }
}

#[async_trait]
impl TabBackend for LocalTabBackend {
    async fn list_tabs(&self) -> Result<TabSetSnapshot, TabBackendError> {
        Ok(self.tabs.lock().await.snapshot())
    }

    async fn select_tab(&self, id: &str) -> Result<TabSetSnapshot, TabBackendError> {
        Ok(self.mutate(|tabs| tabs.select_tab(id)).await)
    }

    async fn new_tab(&self) -> Result<TabSetSnapshot, TabBackendError> {
        Ok(self
            .mutate(|tabs| {
                tabs.new_tab();
            })
            .await)
    }

    async fn close_tab(&self, id: &str) -> Result<TabSetSnapshot, TabBackendError> {
        Ok(self.mutate(|tabs| tabs.close_tab(id)).await)
    }

    async fn prev_tab(&self) -> Result<TabSetSnapshot, TabBackendError> {
        Ok(self.mutate(TabSet::prev_tab).await)
    }

    async fn next_tab(&self) -> Result<TabSetSnapshot, TabBackendError> {
        Ok(self.mutate(TabSet::next_tab).await)
    }

    async fn update_tab(
        &self,
        id: &str,
        patch: &TabMetadataPatch,
    ) -> Result<TabSetSnapshot, TabBackendError> {
        Ok(self.mutate(|tabs| tabs.update_tab(id, patch)).await)
    }
}

#[derive(Debug, Clone)]
pub struct TabResponse {
    pub seq: u64,
    pub request: TabRequest,
    pub result: Result<TabSetSnapshot, TabBackendError>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StoreUpdate {
    /// The snapshot was replaced and differs from the previous one.
    Applied,
    /// The response was current but carried the same snapshot.
    Unchanged,
    /// A newer response was already applied.
    Stale,
    Failed(TabBackendError),
}

/// Client-side view of the tab set. Requests are fire-and-forget; each
/// response carries a sequence number and only responses newer than the
/// last applied one may replace the snapshot.
///
/// Requests reach the backend one at a time, in sequence order, through a
/// single worker task started with the first request.
pub struct TabStore {
    snapshot: TabSetSnapshot,
    next_seq: u64,
    last_applied: u64,
    backend: Arc<dyn TabBackend>,
    responses: mpsc::UnboundedSender<TabResponse>,
    queue: Option<mpsc::UnboundedSender<(u64, TabRequest)>>,
}

impl TabStore {
    pub fn new(backend: Arc<dyn TabBackend>, responses: mpsc::UnboundedSender<TabResponse>) -> Self {
        Self {
            snapshot: TabSetSnapshot::default(),
            next_seq: 1,
            last_applied: 0,
            backend,
            responses,
            queue: None,
        }
    }

    pub fn snapshot(&self) -> &TabSetSnapshot {
        &self.snapshot
    }

    pub fn current_id(&self) -> Option<&str> {
        self.snapshot.current.as_deref()
    }

    pub fn list(&mut self) -> u64 {
        self.request(TabRequest::List)
    }

    /// Selecting the current tab sends nothing.
    pub fn select(&mut self, id: &str) -> Option<u64> {
        if self.current_id() == Some(id) {
            return None;
        }
        Some(self.request(TabRequest::Select(id.to_string())))
    }

    pub fn new_tab(&mut self) -> u64 {
        self.request(TabRequest::New)
    }

    pub fn close(&mut self, id: &str) -> u64 {
        self.request(TabRequest::Close(id.to_string()))
    }

    pub fn close_current(&mut self) -> Option<u64> {
        let id = self.current_id()?.to_string();
        Some(self.close(&id))
    }

    pub fn prev(&mut self) -> Option<u64> {
        if self.snapshot.is_empty() {
            return None;
        }
        Some(self.request(TabRequest::Prev))
    }

    pub fn next(&mut self) -> Option<u64> {
        if self.snapshot.is_empty() {
            return None;
        }
        Some(self.request(TabRequest::Next))
    }

    /// Sends nothing when the tab is unknown or no supplied field differs
    /// from what the store already holds.
    pub fn update_metadata(&mut self, id: &str, patch: TabMetadataPatch) -> Option<u64> {
        let tab = self.snapshot.tab(id)?;
        if !patch.differs_from(tab) {
            debug!(tab_id = id, "metadata unchanged, skipping update");
            return None;
        }
        Some(self.request(TabRequest::Update {
            id: id.to_string(),
            patch,
        }))
    }

    pub fn request(&mut self, request: TabRequest) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(seq, request = request.label(), "tab request");

        let queue = match &self.queue {
            Some(queue) if !queue.is_closed() => queue.clone(),
            _ => {
                let queue = self.spawn_worker();
                self.queue = Some(queue.clone());
                queue
            }
        };
        if queue.send((seq, request)).is_err() {
            warn!(seq, "tab worker stopped, request dropped");
        }
        seq
    }

    fn spawn_worker(&self) -> mpsc::UnboundedSender<(u64, TabRequest)> {
        let (queue, mut requests) = mpsc::unbounded_channel::<(u64, TabRequest)>();
        let backend = Arc::clone(&self.backend);
        let responses = self.responses.clone();
        tokio::spawn(async move {
            while let Some((seq, request)) = requests.recv().await {
                let result = request.send(backend.as_ref()).await;
                if responses
                    .send(TabResponse {
                        seq,
                        request,
                        result,
                    })
                    .is_err()
                {
                    debug!("tab response receiver closed, stopping worker");
                    break;
                }
            }
        });
        queue
    }

    pub fn apply(&mut self, response: TabResponse) -> StoreUpdate {
        let TabResponse {
            seq,
            request,
            result,
        } = response;

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(error) => {
                error!(seq, request = request.label(), "tab request failed: {error}");
                return StoreUpdate::Failed(error);
            }
        };

        if seq <= self.last_applied {
            warn!(
                seq,
                last_applied = self.last_applied,
                request = request.label(),
                "dropping stale tab snapshot"
            );
            return StoreUpdate::Stale;
        }

        if !snapshot.is_consistent() {
            let error = TabBackendError::Inconsistent {
                current: snapshot.current.clone(),
            };
            error!(seq, "{error}");
            return StoreUpdate::Failed(error);
        }

        self.last_applied = seq;
        if snapshot == self.snapshot {
            return StoreUpdate::Unchanged;
        }
        self.snapshot = snapshot;
        StoreUpdate::Applied
    }
}
