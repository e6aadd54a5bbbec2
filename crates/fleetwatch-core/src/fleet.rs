use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::{FleetClient, FleetError};
use crate::model::{CommandAck, FleetStatus, MoveAck, MoveDirection, Position};

/// What happened to the result of a refresh once it came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// A newer request was already applied; this completion was dropped.
    Stale,
    /// Nothing selected, state cleared without a fetch.
    Cleared,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct FleetState {
    pub snapshot: Option<Arc<FleetStatus>>,
    pub loading: bool,
    pub error: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
    in_flight: u32,
    applied_seq: u64,
    failed_seq: u64,
}

/// Latest fleet snapshot plus the commands that act on fleet robots.
///
/// Snapshots are replaced whole. Every refresh carries a sequence number and
/// a completion older than the last applied one is discarded, so overlapping
/// refreshes can never roll the snapshot back. `error` reflects the newest
/// completed request: an older success never clears a newer failure.
#[derive(Clone)]
pub struct FleetStore {
    inner: Arc<FleetInner>,
}

struct FleetInner {
    client: FleetClient,
    next_seq: AtomicU64,
    state: watch::Sender<FleetState>,
}

impl FleetStore {
    pub fn new(client: FleetClient) -> Self {
        let (state, _) = watch::channel(FleetState::default());
        Self {
            inner: Arc::new(FleetInner {
                client,
                next_seq: AtomicU64::new(0),
                state,
            }),
        }
    }

    pub fn client(&self) -> &FleetClient {
        &self.inner.client
    }

    pub fn state(&self) -> FleetState {
        self.inner.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Arc<FleetStatus>> {
        self.inner.state.borrow().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetState> {
        self.inner.state.subscribe()
    }

    pub async fn refresh_fleet_status(&self) -> RefreshOutcome {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight::begin(&self.inner.state);

        let result = self.inner.client.fleet_status().await;

        let mut outcome = RefreshOutcome::Stale;
        self.inner.state.send_modify(|state| {
            if seq <= state.applied_seq {
                return;
            }
            match result {
                Ok(status) => {
                    state.applied_seq = seq;
                    state.snapshot = Some(Arc::new(status));
                    // a newer request already failed; its error stays up
                    if state.failed_seq < seq {
                        state.error = None;
                    }
                    state.refreshed_at = Some(Utc::now());
                    outcome = RefreshOutcome::Applied;
                }
                Err(err) => {
                    let message = format!("failed to fetch fleet status: {err}");
                    if seq > state.failed_seq {
                        state.failed_seq = seq;
                        state.error = Some(message.clone());
                    }
                    outcome = RefreshOutcome::Failed(message);
                }
            }
        });

        match &outcome {
            RefreshOutcome::Applied => {
                if let Some(snapshot) = self.snapshot() {
                    info!(
                        seq,
                        robots = snapshot.robots.len(),
                        active = snapshot.active_robots,
                        "fleet snapshot applied"
                    );
                }
            }
            RefreshOutcome::Stale => warn!(seq, "discarding stale fleet status response"),
            RefreshOutcome::Failed(message) => warn!(seq, error = %message, "fleet refresh failed"),
            RefreshOutcome::Cleared => {}
        }
        outcome
    }

    /// Assign a task, then re-fetch so task fields reflect the backend.
    pub async fn assign_task(&self, robot_id: &str, task: &str) -> Result<CommandAck, FleetError> {
        let ack = self
            .inner
            .client
            .assign_task(robot_id, task)
            .await
            .inspect_err(|err| warn!(robot = robot_id, error = %err, "task assignment failed"))?;
        info!(robot = robot_id, success = ack.success, message = %ack.message, "task assigned");

        self.refresh_fleet_status().await;
        Ok(ack)
    }

    pub async fn move_robot(
        &self,
        robot_id: &str,
        direction: MoveDirection,
    ) -> Result<MoveAck, FleetError> {
        let ack = self
            .inner
            .client
            .move_robot(robot_id, direction)
            .await
            .inspect_err(|err| warn!(robot = robot_id, %direction, error = %err, "move failed"))?;
        info!(robot = robot_id, %direction, success = ack.success, "move command sent");
        Ok(ack)
    }

    pub async fn battery(&self, robot_id: &str) -> Result<u8, FleetError> {
        self.inner.client.battery(robot_id).await
    }

    pub async fn coordinates(&self, robot_id: &str) -> Result<Position, FleetError> {
        self.inner.client.coordinates(robot_id).await
    }
}

/// Keeps `loading` accurate even when a refresh future is dropped midway.
struct InFlight<'a> {
    state: &'a watch::Sender<FleetState>,
}

impl<'a> InFlight<'a> {
    fn begin(state: &'a watch::Sender<FleetState>) -> Self {
        state.send_modify(|s| {
            s.in_flight += 1;
            s.loading = true;
        });
        Self { state }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            s.loading = s.in_flight > 0;
        });
    }
}
