//! Periodic poller that owns the device status snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::tuya::{ApiError, CloudApi, DpMap};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Device id → DPs, as read in one poll cycle.
pub type Snapshot = HashMap<String, DpMap>;

#[derive(Debug, Error)]
#[error("Error fetching thermostat data: {0}")]
pub struct UpdateFailed(#[from] pub ApiError);

/// What consumers see. `data` is the last successfully polled snapshot; a
/// failed cycle only flips `last_update_success` and records the error.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    pub data: Arc<Snapshot>,
    pub last_update_success: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<Instant>,
    pub updates: u64,
}

/// Cloneable read side of the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    state_rx: watch::Receiver<CoordinatorState>,
    refresh_tx: mpsc::Sender<()>,
}

impl CoordinatorHandle {
    pub fn current(&self) -> CoordinatorState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state_rx.clone()
    }

    /// Ask for a poll outside the regular cadence. Requests made while one is
    /// already pending are folded into it.
    pub fn request_refresh(&self) {
        if self.refresh_tx.try_send(()).is_err() {
            debug!("Refresh already pending");
        }
    }
}

pub struct Coordinator {
    api: Arc<dyn CloudApi>,
    device_ids: Vec<String>,
    interval: Duration,
    state_tx: watch::Sender<CoordinatorState>,
    refresh_rx: mpsc::Receiver<()>,
}

impl Coordinator {
    pub fn new(
        api: Arc<dyn CloudApi>,
        device_ids: Vec<String>,
        interval: Duration,
    ) -> (Self, CoordinatorHandle) {
        let (state_tx, state_rx) = watch::channel(CoordinatorState::default());
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let coordinator = Self {
            api,
            device_ids,
            interval,
            state_tx,
            refresh_rx,
        };
        let handle = CoordinatorHandle {
            state_rx,
            refresh_tx,
        };
        (coordinator, handle)
    }

    /// Fetch every configured device in order. The first error aborts the
    /// rest of the cycle.
    async fn poll(&self) -> Result<Snapshot, UpdateFailed> {
        let mut results = Snapshot::with_capacity(self.device_ids.len());
        for device_id in &self.device_ids {
            let status = self.api.get_device_status_map(device_id).await?;
            results.insert(device_id.clone(), status);
        }
        Ok(results)
    }

    /// Run one cycle and publish the outcome.
    pub async fn refresh(&self) -> Result<(), UpdateFailed> {
        match self.poll().await {
            Ok(snapshot) => {
                self.state_tx.send_modify(|state| {
                    if !state.last_update_success && state.updates > 0 {
                        info!("Fetching thermostat data recovered");
                    }
                    state.data = Arc::new(snapshot);
                    state.last_update_success = true;
                    state.last_error = None;
                    state.last_success_at = Some(Instant::now());
                    state.updates += 1;
                });
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.state_tx.send_modify(|state| {
                    if state.last_update_success || state.updates == 0 {
                        error!("{}", message);
                    } else {
                        debug!("{}", message);
                    }
                    state.last_update_success = false;
                    state.last_error = Some(message.clone());
                    state.updates += 1;
                });
                Err(err)
            }
        }
    }

    /// First cycle at startup. Failure here aborts setup.
    pub async fn first_refresh(&self) -> Result<(), UpdateFailed> {
        self.refresh().await
    }

    #[cfg(test)]
    pub(crate) fn take_refresh_request(&mut self) -> bool {
        self.refresh_rx.try_recv().is_ok()
    }

    /// Poll on the fixed interval until the task is aborted. An explicit
    /// refresh request polls immediately and restarts the interval.
    pub async fn run(mut self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(()) = self.refresh_rx.recv() => {
                    debug!("Refresh requested");
                    ticker.reset();
                }
            }
            // Failures are already published on the state channel.
            let _ = self.refresh().await;
        }
    }
}
