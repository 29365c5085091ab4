//! Multi-target poll service.
//!
//! [`PollService`] owns one [`Poller`] per target, the latest snapshot of
//! each, and a broadcast channel of [`PollEvent`]s.
//!
//! ```rust,ignore
//! let service = PollService::with_reqwest()?;
//! service.add_target(target).await?;
//! let snapshot = service.snapshot("weather").await;
//! service.shutdown().await;
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::{FetchTarget, PollsenseConfig};
use crate::error::{PollError, Result};
use crate::runner::{publish, FetchCycle, Poller, SnapshotStore};
use crate::state::{PollEvent, TargetSnapshot};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

struct TargetEntry {
    target: FetchTarget,
    store: SnapshotStore,
    poller: Poller,
}

/// Polls any number of targets, each on its own task.
pub struct PollService {
    transport: Arc<dyn HttpTransport>,
    targets: RwLock<HashMap<String, TargetEntry>>,
    event_tx: broadcast::Sender<PollEvent>,
    stopped: RwLock<bool>,
}

impl PollService {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            targets: RwLock::new(HashMap::new()),
            event_tx,
            stopped: RwLock::new(false),
        }
    }

    /// Service backed by [`ReqwestTransport`].
    pub fn with_reqwest() -> Result<Self> {
        let transport =
            ReqwestTransport::new().map_err(|e| PollError::Other(anyhow::Error::new(e)))?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Start a service polling every target of `config`.
    pub async fn from_config(
        config: &PollsenseConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let service = Self::new(transport);
        for target in &config.targets {
            service.add_target(target.clone()).await?;
        }
        Ok(service)
    }

    async fn ensure_running(&self) -> Result<()> {
        if *self.stopped.read().await {
            return Err(PollError::Stopped);
        }
        Ok(())
    }

    /// Refresh once, then start polling in the background.
    async fn launch(&self, target: &FetchTarget, store: SnapshotStore) -> Poller {
        let sequence = store.sequence().await;
        let mut cycle =
            FetchCycle::new(target.clone(), self.transport.clone()).resume_from(sequence);

        let outcome = cycle.tick().await;
        publish(&store, &self.event_tx, outcome).await;

        Poller::start(cycle, store, self.event_tx.clone())
    }

    /// Insert a launched poller, stopping it instead when the name was taken
    /// meanwhile or the service shut down during its first refresh.
    async fn register(
        &self,
        name: &str,
        target: FetchTarget,
        store: SnapshotStore,
        mut poller: Poller,
    ) -> Result<()> {
        let mut targets = self.targets.write().await;
        let rejected = if *self.stopped.read().await {
            Some(PollError::Stopped)
        } else if targets.contains_key(name) {
            Some(PollError::DuplicateTarget(name.to_string()))
        } else {
            None
        };

        if let Some(error) = rejected {
            drop(targets);
            poller.stop().await;
            debug!(target_name = %name, "discarding launched poller: {}", error);
            return Err(error);
        }

        targets.insert(
            name.to_string(),
            TargetEntry {
                target,
                store,
                poller,
            },
        );
        Ok(())
    }

    /// Validate and start polling a new target.
    ///
    /// The first refresh completes before this returns, so the returned
    /// snapshot already reflects one tick.
    pub async fn add_target(&self, target: FetchTarget) -> Result<TargetSnapshot> {
        self.ensure_running().await?;
        target.validate()?;
        let name = target.name().to_string();

        if self.targets.read().await.contains_key(&name) {
            return Err(PollError::DuplicateTarget(name));
        }

        let store = SnapshotStore::new(name.clone());
        let poller = self.launch(&target, store.clone()).await;

        self.register(&name, target, store.clone(), poller).await?;

        info!(target_name = %name, "target added");
        let _ = self.event_tx.send(PollEvent::TargetAdded {
            target: name,
            timestamp: Utc::now().timestamp(),
        });
        Ok(store.snapshot().await)
    }

    /// Swap a target's configuration wholesale.
    ///
    /// The old poller is stopped first; retention state starts over while
    /// tick numbering continues. The target is unlisted until the first
    /// refresh of the new configuration completes.
    pub async fn replace_target(&self, target: FetchTarget) -> Result<TargetSnapshot> {
        self.ensure_running().await?;
        target.validate()?;
        let name = target.name().to_string();

        let entry = self.targets.write().await.remove(&name);
        let Some(mut entry) = entry else {
            return Err(PollError::TargetNotFound(name));
        };
        entry.poller.stop().await;

        let store = entry.store;
        let poller = self.launch(&target, store.clone()).await;
        self.register(&name, target, store.clone(), poller).await?;

        info!(target_name = %name, "target replaced");
        Ok(store.snapshot().await)
    }

    /// Stop polling a target and forget it.
    pub async fn remove_target(&self, name: &str) -> Result<()> {
        let entry = self.targets.write().await.remove(name);
        let Some(mut entry) = entry else {
            return Err(PollError::TargetNotFound(name.to_string()));
        };
        entry.poller.stop().await;

        info!(target_name = %name, "target removed");
        let _ = self.event_tx.send(PollEvent::TargetRemoved {
            target: name.to_string(),
            timestamp: Utc::now().timestamp(),
        });
        Ok(())
    }

    pub async fn snapshot(&self, name: &str) -> Option<TargetSnapshot> {
        let store = self.targets.read().await.get(name).map(|e| e.store.clone())?;
        Some(store.snapshot().await)
    }

    /// Snapshots of every target, ordered by name.
    pub async fn snapshots(&self) -> Vec<TargetSnapshot> {
        let stores: Vec<SnapshotStore> = self
            .targets
            .read()
            .await
            .values()
            .map(|e| e.store.clone())
            .collect();

        let mut snapshots = Vec::with_capacity(stores.len());
        for store in stores {
            snapshots.push(store.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }

    /// Configuration a target is currently polled with.
    pub async fn target(&self, name: &str) -> Option<FetchTarget> {
        self.targets.read().await.get(name).map(|e| e.target.clone())
    }

    pub async fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_polling(&self, name: &str) -> bool {
        self.targets
            .read()
            .await
            .get(name)
            .is_some_and(|e| e.poller.is_running())
    }

    /// Stream of events from now on.
    pub fn subscribe(&self) -> Pin<Box<dyn Stream<Item = PollEvent> + Send + '_>> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("event subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop every poller. Later calls to add or replace targets fail.
    pub async fn shutdown(&self) {
        *self.stopped.write().await = true;

        let entries: Vec<(String, TargetEntry)> = self.targets.write().await.drain().collect();
        for (name, mut entry) in entries {
            entry.poller.stop().await;
            if entry.poller.is_running() {
                warn!(target_name = %name, "poller still running after stop");
            }
        }
        info!("poll service stopped");
    }
}
