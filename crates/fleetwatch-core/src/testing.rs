use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::backend::{BackendError, FleetBackend};
use crate::client::FleetClient;
use crate::detail::RobotDetailStore;
use crate::fleet::FleetStore;
use crate::model::MoveDirection;
use crate::session::{MemorySessionStorage, SessionId, SessionManager};

struct Scripted {
    gate: Option<Arc<Notify>>,
    response: Result<Value, BackendError>,
}

/// In-memory backend with scripted fleet responses and per-rover gates for
/// holding a response back until the test releases it.
#[derive(Default)]
pub(crate) struct FakeBackend {
    sessions_started: AtomicUsize,
    session_failure: Mutex<Option<BackendError>>,
    fleet_script: Mutex<VecDeque<Scripted>>,
    default_fleet: Mutex<Value>,
    rovers: Mutex<HashMap<String, (Value, Value)>>,
    rover_gates: Mutex<HashMap<String, Arc<Notify>>>,
    command_failure: Mutex<Option<BackendError>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn sessions_started(&self) -> usize {
        self.sessions_started.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_sessions(&self, err: BackendError) {
        *self.session_failure.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_commands(&self, err: BackendError) {
        *self.command_failure.lock().unwrap() = Some(err);
    }

    pub(crate) fn set_fleet(&self, payload: Value) {
        *self.default_fleet.lock().unwrap() = payload;
    }

    pub(crate) fn script_fleet(&self, response: Result<Value, BackendError>) {
        self.fleet_script.lock().unwrap().push_back(Scripted {
            gate: None,
            response,
        });
    }

    pub(crate) fn script_gated_fleet(&self, response: Result<Value, BackendError>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.fleet_script.lock().unwrap().push_back(Scripted {
            gate: Some(gate.clone()),
            response,
        });
        gate
    }

    pub(crate) fn set_rover(&self, rover_id: &str, status: Value, sensor: Value) {
        self.rovers
            .lock()
            .unwrap()
            .insert(rover_id.to_string(), (status, sensor));
    }

    pub(crate) fn gate_rover(&self, rover_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.rover_gates
            .lock()
            .unwrap()
            .insert(rover_id.to_string(), gate.clone());
        gate
    }

    /// Yield until `call` shows up in the call log.
    pub(crate) async fn wait_for_call(&self, call: &str) {
        while !self.calls().iter().any(|c| c == call) {
            tokio::task::yield_now().await;
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn rover(&self, rover_id: &str) -> Result<(Value, Value), BackendError> {
        self.rovers
            .lock()
            .unwrap()
            .get(rover_id)
            .cloned()
            .ok_or(BackendError::Status {
                operation: "rover status",
                status: 404,
            })
    }

    fn command_result(&self) -> Result<(), BackendError> {
        match self.command_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FleetBackend for FakeBackend {
    async fn start_session(&self) -> Result<SessionId, BackendError> {
        self.record("start_session".to_string());
        let failure = self.session_failure.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }
        let n = self.sessions_started.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionId::new(format!("session-{n}")))
    }

    async fn fleet_status(&self, _session: &SessionId) -> Result<Value, BackendError> {
        self.record("fleet_status".to_string());
        let scripted = self.fleet_script.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted { gate, response }) => {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                response
            }
            None => Ok(self.default_fleet.lock().unwrap().clone()),
        }
    }

    async fn rover_status(&self, _session: &SessionId, rover_id: &str) -> Result<Value, BackendError> {
        self.record(format!("rover_status:{rover_id}"));
        let gate = self.rover_gates.lock().unwrap().get(rover_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.rover(rover_id).map(|(status, _)| status)
    }

    async fn rover_sensor_data(
        &self,
        _session: &SessionId,
        rover_id: &str,
    ) -> Result<Value, BackendError> {
        self.record(format!("rover_sensor_data:{rover_id}"));
        self.rover(rover_id).map(|(_, sensor)| sensor)
    }

    async fn rover_battery(&self, _session: &SessionId, rover_id: &str) -> Result<Value, BackendError> {
        self.record(format!("rover_battery:{rover_id}"));
        self.rover(rover_id)
            .map(|(status, _)| json!({ "battery_level": status["battery_level"] }))
    }

    async fn rover_coordinates(
        &self,
        _session: &SessionId,
        rover_id: &str,
    ) -> Result<Value, BackendError> {
        self.record(format!("rover_coordinates:{rover_id}"));
        self.rover(rover_id)
            .map(|(status, _)| json!({ "coordinates": status["coordinates"] }))
    }

    async fn assign_task(
        &self,
        _session: &SessionId,
        rover_id: &str,
        task: &str,
    ) -> Result<Value, BackendError> {
        self.record(format!("assign_task:{rover_id}:{task}"));
        self.command_result()?;
        Ok(json!({ "success": true, "message": format!("Task '{task}' assigned") }))
    }

    async fn move_rover(
        &self,
        _session: &SessionId,
        rover_id: &str,
        direction: MoveDirection,
    ) -> Result<Value, BackendError> {
        self.record(format!("move_rover:{rover_id}:{direction}"));
        self.command_result()?;
        Ok(json!({ "success": true, "message": format!("Moving {direction}") }))
    }
}

pub(crate) fn stores(backend: Arc<FakeBackend>) -> (FleetStore, RobotDetailStore) {
    let sessions = Arc::new(SessionManager::new(MemorySessionStorage::default()));
    let fleet = FleetStore::new(FleetClient::new(backend, sessions));
    let detail = RobotDetailStore::new(fleet.clone());
    (fleet, detail)
}

pub(crate) fn rover_status(rover_id: &str, coordinates: [f64; 2]) -> Value {
    json!({
        "rover_id": rover_id,
        "name": rover_id,
        "status": "active",
        "battery_level": 77,
        "coordinates": coordinates,
        "task": "Soil Analysis",
        "timestamp": "2025-03-01T10:00:00Z",
    })
}

pub(crate) fn sensor_data() -> Value {
    json!({
        "soil_moisture": 31.5,
        "temperature": 22.0,
        "soil_pH": 6.4,
        "sensor_history": [],
    })
}
