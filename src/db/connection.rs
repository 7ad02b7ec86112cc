// src/db/connection.rs

//! One shared, lazily opened connection to the backing store.
//!
//! The store may be an external process that is not running yet. The first
//! caller checks its health, starts it if needed and waits until it is
//! healthy; concurrent callers wait on that same attempt. Each operation
//! holds a [`ConnectionGuard`]. When the last guard is dropped an idle timer starts,
//! and if nothing acquires the connection before it fires, the client is
//! closed and the process stopped.

use crate::db::process::ProcessManager;
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens a client once the backing process is healthy.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Client, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    Closing,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// How long the connection stays open with no guard held.
    pub idle_timeout: Duration,
    /// Interval between health checks after a start command.
    pub poll_interval: Duration,
    /// Start commands issued before giving up with `ConnectionUnavailable`.
    pub start_attempts: u32,
    pub start_backoff: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_millis(500),
            start_attempts: 3,
            start_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct Lease {
    active: usize,
    /// Bumped on every acquire; an idle timer only closes the connection if
    /// the generation it was armed with is still current.
    generation: u64,
    idle_timer: Option<JoinHandle<()>>,
}

struct Inner<C: Connector> {
    connector: C,
    process: Arc<dyn ProcessManager>,
    settings: ConnectionSettings,
    cancel: CancellationToken,
    /// Held for the whole connect sequence, which makes it single-flight.
    client: tokio::sync::Mutex<Option<Arc<C::Client>>>,
    lease: Mutex<Lease>,
    state: Mutex<ConnectionState>,
}

pub struct StorageConnection<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for StorageConnection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Keeps the connection open while held. Dropping it releases the lease.
pub struct ConnectionGuard<C: Connector> {
    client: Arc<C::Client>,
    _lease: LeaseToken<C>,
}

impl<C: Connector> Deref for ConnectionGuard<C> {
    type Target = C::Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

struct LeaseToken<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Drop for LeaseToken<C> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Puts the state back to `Idle` if a connect attempt is abandoned midway.
struct ConnectingPhase<'a> {
    state: &'a Mutex<ConnectionState>,
    finished: bool,
}

impl Drop for ConnectingPhase<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state.lock() = ConnectionState::Idle;
        }
    }
}

impl<C: Connector> StorageConnection<C> {
    pub fn new(
        connector: C,
        process: Arc<dyn ProcessManager>,
        settings: ConnectionSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                process,
                settings,
                cancel,
                client: tokio::sync::Mutex::new(None),
                lease: Mutex::new(Lease::default()),
                state: Mutex::new(ConnectionState::Idle),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Returns the shared client, connecting first if necessary.
    pub async fn acquire(&self) -> Result<ConnectionGuard<C>, StoreError> {
        let lease = self.inner.begin_lease();
        let client = self.inner.ensure_connected().await?;
        Ok(ConnectionGuard {
            client,
            _lease: lease,
        })
    }

    /// Closes the client and stops the process now, regardless of the idle
    /// timer. Outstanding guards keep their client alive until dropped.
    pub async fn close(&self) {
        if let Some(timer) = self.inner.lease.lock().idle_timer.take() {
            timer.abort();
        }
        let mut slot = self.inner.client.lock().await;
        self.inner.shutdown(&mut slot).await;
    }
}

impl<C: Connector> Inner<C> {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn begin_lease(self: &Arc<Self>) -> LeaseToken<C> {
        let mut lease = self.lease.lock();
        lease.active += 1;
        lease.generation += 1;
        if let Some(timer) = lease.idle_timer.take() {
            timer.abort();
        }
        LeaseToken {
            inner: Arc::clone(self),
        }
    }

    fn release(self: &Arc<Self>) {
        let mut lease = self.lease.lock();
        lease.active = lease.active.saturating_sub(1);
        if lease.active > 0 {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let generation = lease.generation;
        let inner = Arc::clone(self);
        if let Some(timer) = lease.idle_timer.take() {
            timer.abort();
        }
        lease.idle_timer = Some(runtime.spawn(async move {
            inner.close_when_idle(generation).await;
        }));
    }

    async fn close_when_idle(self: Arc<Self>, generation: u64) {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.idle_timeout) => {}
            _ = self.cancel.cancelled() => {}
        }

        let mut slot = self.client.lock().await;
        {
            let mut lease = self.lease.lock();
            if lease.generation != generation || lease.active > 0 {
                return;
            }
            // Detached: once stopping, a new acquire waits on the client
            // lock rather than aborting the stop.
            lease.idle_timer.take();
        }
        debug!("storage connection idle, closing");
        self.shutdown(&mut slot).await;
    }

    async fn shutdown(&self, slot: &mut Option<Arc<C::Client>>) {
        self.set_state(ConnectionState::Closing);
        let had_client = slot.take().is_some();
        if let Err(e) = self.process.stop().await {
            warn!(error = %e, "failed to stop storage process");
        }
        self.set_state(ConnectionState::Idle);
        if had_client {
            info!("storage connection closed");
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<C::Client>, StoreError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }

        self.set_state(ConnectionState::Connecting);
        let mut phase = ConnectingPhase {
            state: &self.state,
            finished: false,
        };

        let client = Arc::new(self.connect().await?);
        *slot = Some(Arc::clone(&client));
        phase.finished = true;
        self.set_state(ConnectionState::Ready);
        info!("storage connection ready");
        Ok(client)
    }

    async fn connect(&self) -> Result<C::Client, StoreError> {
        if !self.process.is_healthy().await {
            self.start_process().await?;
            self.wait_until_healthy().await?;
        }
        self.connector.connect().await
    }

    /// Start commands are bounded; a store that cannot even be started is
    /// reported instead of retried forever.
    async fn start_process(&self) -> Result<(), StoreError> {
        let attempts = self.settings.start_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.process.start().await {
                Ok(()) => {
                    info!(attempt, "storage process started");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "storage process failed to start");
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(StoreError::Cancelled),
                    _ = tokio::time::sleep(self.settings.start_backoff) => {}
                }
            }
        }

        Err(StoreError::ConnectionUnavailable {
            attempts,
            reason: last_error,
        })
    }

    /// Polls until healthy. Unbounded, but aborts on cancellation.
    async fn wait_until_healthy(&self) -> Result<(), StoreError> {
        let mut polls: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
            polls += 1;
            if self.process.is_healthy().await {
                debug!(polls, "storage process healthy");
                return Ok(());
            }
            if polls % 20 == 0 {
                info!(polls, "still waiting for storage process");
            }
        }
    }
}
