pub mod adapter;
pub mod backend;
pub mod client;
pub mod config;
pub mod detail;
pub mod fleet;
pub mod model;
pub mod retry;
pub mod session;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod session_tests;
#[cfg(test)]
mod retry_tests;

pub use backend::{BackendError, FleetBackend, HttpBackend};
pub use client::{FleetClient, FleetError};
pub use config::{ClientConfig, RetryPolicy};
pub use detail::{DetailPhase, DetailState, RobotDetailStore};
pub use fleet::{FleetState, FleetStore, RefreshOutcome};
pub use model::{
    CommandAck, FleetStatus, MaintenanceRecord, MoveAck, MoveDirection, Position, Robot,
    RobotDetails, RobotStatus, SensorReadings, SensorSample, TaskQueue,
};
pub use session::{
    FileSessionStorage, MemorySessionStorage, SessionId, SessionManager, SessionStorage,
};
