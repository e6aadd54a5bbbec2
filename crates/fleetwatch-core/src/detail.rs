use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::FleetError;
use crate::fleet::{FleetStore, RefreshOutcome};
use crate::model::{MoveAck, MoveDirection, RobotDetails};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailPhase {
    #[default]
    Empty,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct DetailState {
    pub selected: Option<String>,
    pub phase: DetailPhase,
    /// Always for `selected`; cleared the moment the selection changes.
    pub details: Option<Arc<RobotDetails>>,
    pub error: Option<String>,
    generation: u64,
    applied_fetch: u64,
}

/// Detail record of the one selected robot.
#[derive(Clone)]
pub struct RobotDetailStore {
    inner: Arc<DetailInner>,
}

struct DetailInner {
    fleet: FleetStore,
    next_fetch: AtomicU64,
    state: watch::Sender<DetailState>,
}

impl RobotDetailStore {
    pub fn new(fleet: FleetStore) -> Self {
        let (state, _) = watch::channel(DetailState::default());
        Self {
            inner: Arc::new(DetailInner {
                fleet,
                next_fetch: AtomicU64::new(0),
                state,
            }),
        }
    }

    pub fn state(&self) -> DetailState {
        self.inner.state.borrow().clone()
    }

    pub fn selected(&self) -> Option<String> {
        self.inner.state.borrow().selected.clone()
    }

    pub fn details(&self) -> Option<Arc<RobotDetails>> {
        self.inner.state.borrow().details.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetailState> {
        self.inner.state.subscribe()
    }

    /// Change the selection. The previous record is dropped before anything
    /// is fetched so a pending fetch never shows the wrong robot.
    pub async fn select_robot(&self, robot_id: Option<&str>) -> RefreshOutcome {
        let mut generation = 0;
        self.inner.state.send_modify(|state| {
            state.generation += 1;
            generation = state.generation;
            state.selected = robot_id.map(str::to_string);
            state.details = None;
            state.error = None;
            state.phase = if robot_id.is_some() {
                DetailPhase::Loading
            } else {
                DetailPhase::Empty
            };
        });
        debug!(robot = ?robot_id, generation, "selection changed");

        match robot_id {
            Some(id) => self.fetch(generation, id).await,
            None => RefreshOutcome::Cleared,
        }
    }

    pub async fn refresh_robot_details(&self) -> RefreshOutcome {
        let mut target = None;
        self.inner.state.send_modify(|state| match &state.selected {
            Some(id) => {
                state.phase = DetailPhase::Loading;
                state.error = None;
                target = Some((state.generation, id.clone()));
            }
            None => {
                state.details = None;
                state.error = None;
                state.phase = DetailPhase::Empty;
            }
        });

        match target {
            Some((generation, id)) => self.fetch(generation, &id).await,
            None => RefreshOutcome::Cleared,
        }
    }

    /// Move the selected robot, then refresh its details.
    pub async fn move_robot(&self, direction: MoveDirection) -> Result<MoveAck, FleetError> {
        let Some(robot_id) = self.selected() else {
            warn!(%direction, "move requested with no robot selected");
            return Err(FleetError::NoRobotSelected);
        };

        let ack = self.inner.fleet.move_robot(&robot_id, direction).await?;
        self.refresh_robot_details().await;
        Ok(ack)
    }

    async fn fetch(&self, generation: u64, robot_id: &str) -> RefreshOutcome {
        let seq = self.inner.next_fetch.fetch_add(1, Ordering::SeqCst) + 1;

        let result = self
            .inner
            .fleet
            .client()
            .robot_details(robot_id)
            .await
            .map_err(|err| format!("failed to fetch robot details: {err}"))
            .map(|mut details| {
                if !details.robot.id.is_empty() && details.robot.id != robot_id {
                    warn!(
                        robot = robot_id,
                        reported = %details.robot.id,
                        "rover_id differs from requested robot, keeping requested id"
                    );
                }
                details.robot.id = robot_id.to_string();
                details
            });

        let mut outcome = RefreshOutcome::Stale;
        self.inner.state.send_modify(|state| {
            let current = state.generation == generation
                && state.selected.as_deref() == Some(robot_id)
                && seq > state.applied_fetch;
            if !current {
                return;
            }
            match result {
                Ok(details) => {
                    state.applied_fetch = seq;
                    state.details = Some(Arc::new(details));
                    state.error = None;
                    state.phase = DetailPhase::Loaded;
                    outcome = RefreshOutcome::Applied;
                }
                Err(message) => {
                    state.error = Some(message.clone());
                    state.phase = DetailPhase::Error;
                    outcome = RefreshOutcome::Failed(message);
                }
            }
        });

        match &outcome {
            RefreshOutcome::Applied => info!(robot = robot_id, seq, "robot details applied"),
            RefreshOutcome::Stale => {
                warn!(robot = robot_id, seq, "discarding stale robot details response")
            }
            RefreshOutcome::Failed(message) => {
                warn!(robot = robot_id, seq, error = %message, "robot details refresh failed")
            }
            RefreshOutcome::Cleared => {}
        }
        outcome
    }
}
