use crate::prelude::*;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub enum ChannelData {
    Snapshot(Arc<ControllerSnapshot>),
    Shutdown,
}

struct Inner {
    snapshot: Arc<ControllerSnapshot>,
    created_at: Instant,
    last_success: Option<Instant>,
    consecutive_failures: u32,
}

/// Last known controller state. Publication swaps the whole snapshot, so
/// readers always see one complete poll.
#[derive(Clone)]
pub struct StateStore {
    channels: Channels,
    scan_interval: Duration,
    inner: Arc<RwLock<Inner>>,
}

impl StateStore {
    pub fn new(channels: Channels, map: &RegisterMap, scan_interval: Duration) -> Self {
        let inner = Inner {
            snapshot: Arc::new(ControllerSnapshot::empty(map)),
            created_at: Instant::now(),
            last_success: None,
            consecutive_failures: 0,
        };

        Self {
            channels,
            scan_interval,
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    // a panicking writer can only have left a complete Arc behind
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current snapshot. Never blocks on polling or commands.
    pub fn get(&self) -> Arc<ControllerSnapshot> {
        self.read().snapshot.clone()
    }

    pub fn publish(&self, snapshot: ControllerSnapshot) -> Arc<ControllerSnapshot> {
        let snapshot = Arc::new(snapshot);

        {
            let mut inner = self.write();
            inner.snapshot = snapshot.clone();
            inner.last_success = Some(Instant::now());
            inner.consecutive_failures = 0;
        }

        // no subscribers is fine
        let _ = self
            .channels
            .from_store
            .send(ChannelData::Snapshot(snapshot.clone()));

        snapshot
    }

    /// Notes a failed cycle. The published snapshot is left alone.
    pub fn record_failure(&self) -> u32 {
        let mut inner = self.write();
        inner.consecutive_failures += 1;
        inner.consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.read().consecutive_failures
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.read().last_success
    }

    /// True once nothing has been published for two scan intervals.
    pub fn is_stale(&self) -> bool {
        let inner = self.read();
        let since = inner.last_success.unwrap_or(inner.created_at);
        since.elapsed() > self.scan_interval * 2
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelData> {
        self.channels.from_store.subscribe()
    }

    /// Calls `callback` with every published snapshot until shutdown.
    pub fn subscribe_with<F>(&self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<ControllerSnapshot>) + Send + 'static,
    {
        let mut receiver = self.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(ChannelData::Snapshot(snapshot)) => callback(snapshot),
                    Ok(ChannelData::Shutdown) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("state subscriber lagged, skipped {} snapshots", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.channels.from_store.send(ChannelData::Shutdown);
    }
}
