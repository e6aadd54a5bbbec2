use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RobotStatus {
    Active,
    Inactive,
    Charging,
    Maintenance,
    Other(String),
    /// The fleet summary endpoint omitted the status entirely.
    Unreported,
}

impl RobotStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "charging" => Self::Charging,
            "maintenance" => Self::Maintenance,
            "" => Self::Unreported,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Charging => "charging",
            Self::Maintenance => "maintenance",
            Self::Other(raw) => raw,
            Self::Unreported => "",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl From<String> for RobotStatus {
    fn from(raw: String) -> Self {
        Self::from_wire(&raw)
    }
}

impl From<RobotStatus> for String {
    fn from(status: RobotStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RobotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreported => f.write_str("unreported"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    /// Percent.
    pub soil_moisture: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    pub soil_ph: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskQueue {
    pub current: String,
    pub queue: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub id: String,
    pub name: String,
    pub status: RobotStatus,
    pub battery: u8,
    pub position: Position,
    /// Zeroed placeholders on the fleet summary path.
    pub sensors: SensorReadings,
    pub tasks: TaskQueue,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub date: String,
    pub issue: String,
    pub resolution: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub readings: SensorReadings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotDetails {
    #[serde(flatten)]
    pub robot: Robot,
    pub coverage_area: f64,
    pub uptime: f64,
    pub maintenance_history: Vec<MaintenanceRecord>,
    pub sensor_history: Vec<SensorSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_logs: Vec<String>,
}

impl RobotDetails {
    pub fn id(&self) -> &str {
        &self.robot.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub active_robots: usize,
    pub inactive_robots: usize,
    pub battery_levels: BTreeMap<String, u8>,
    pub robots: Vec<Robot>,
    pub constraints: Vec<String>,
    pub total_area_covered: Option<f64>,
}

impl FleetStatus {
    pub fn robot(&self, id: &str) -> Option<&Robot> {
        self.robots.iter().find(|robot| robot.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl MoveDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stop => "stop",
        }
    }

    /// Path segment of the rover command endpoint; stopping resets the rover.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Stop => "reset",
            _ => "move",
        }
    }
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoveDirection {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveAck {
    pub success: bool,
    pub message: String,
    pub new_position: Option<Position>,
}
