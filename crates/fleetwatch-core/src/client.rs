use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::adapter;
use crate::backend::{BackendError, FleetBackend};
use crate::model::{CommandAck, FleetStatus, MoveAck, MoveDirection, Position, RobotDetails};
use crate::session::{SessionId, SessionManager, SessionStorageError};

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("could not establish a backend session: {0}")]
    Session(#[source] BackendError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Storage(#[from] SessionStorageError),
    #[error("no robot selected")]
    NoRobotSelected,
    #[error("task description must not be empty")]
    EmptyTask,
}

/// Session-aware access to the fleet backend returning canonical types.
///
/// Every call makes sure a session exists first. The adapter is the only
/// place raw payloads are interpreted.
#[derive(Clone)]
pub struct FleetClient {
    backend: Arc<dyn FleetBackend>,
    sessions: Arc<SessionManager>,
}

impl FleetClient {
    pub fn new(backend: Arc<dyn FleetBackend>, sessions: Arc<SessionManager>) -> Self {
        Self { backend, sessions }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn ensure_session(&self) -> Result<SessionId, FleetError> {
        self.sessions
            .ensure_session(self.backend.as_ref())
            .await
            .map_err(FleetError::Session)
    }

    /// Drop the current session and start a new one right away.
    pub async fn renew_session(&self) -> Result<SessionId, FleetError> {
        self.sessions.reset().await?;
        self.ensure_session().await
    }

    pub async fn fleet_status(&self) -> Result<FleetStatus, FleetError> {
        let session = self.ensure_session().await?;
        let raw = self.backend.fleet_status(&session).await?;
        Ok(adapter::adapt_fleet_status(&raw))
    }

    pub async fn robot_details(&self, robot_id: &str) -> Result<RobotDetails, FleetError> {
        let session = self.ensure_session().await?;
        let (status, sensors) = tokio::try_join!(
            self.backend.rover_status(&session, robot_id),
            self.backend.rover_sensor_data(&session, robot_id),
        )?;
        debug!(robot = robot_id, "fetched rover status and sensor data");
        Ok(adapter::adapt_robot_details(&adapter::merge_payloads(
            status, sensors,
        )))
    }

    pub async fn battery(&self, robot_id: &str) -> Result<u8, FleetError> {
        let session = self.ensure_session().await?;
        let raw = self.backend.rover_battery(&session, robot_id).await?;
        Ok(adapter::adapt_battery(&raw))
    }

    pub async fn coordinates(&self, robot_id: &str) -> Result<Position, FleetError> {
        let session = self.ensure_session().await?;
        let raw = self.backend.rover_coordinates(&session, robot_id).await?;
        Ok(adapter::adapt_coordinates(&raw))
    }

    pub async fn assign_task(&self, robot_id: &str, task: &str) -> Result<CommandAck, FleetError> {
        if task.trim().is_empty() {
            return Err(FleetError::EmptyTask);
        }
        let session = self.ensure_session().await?;
        let raw = self.backend.assign_task(&session, robot_id, task).await?;
        Ok(adapter::adapt_command_ack(&raw))
    }

    pub async fn move_robot(
        &self,
        robot_id: &str,
        direction: MoveDirection,
    ) -> Result<MoveAck, FleetError> {
        let session = self.ensure_session().await?;
        let raw = self.backend.move_rover(&session, robot_id, direction).await?;
        Ok(adapter::adapt_move_ack(&raw))
    }
}
