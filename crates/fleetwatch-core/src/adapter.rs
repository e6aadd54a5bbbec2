//! Translation from raw backend JSON to the canonical fleet model.
//!
//! Adapters never fail. Missing or mistyped fields fall back to zero, empty
//! string or empty list, and every such fix-up is reported through
//! `tracing::warn!` so contract drift on the backend stays visible.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::model::{
    CommandAck, FleetStatus, MaintenanceRecord, MoveAck, Position, Robot, RobotDetails,
    RobotStatus, SensorReadings, SensorSample, TaskQueue,
};

const DEFAULT_MOVE_MESSAGE: &str = "Move command processed";

/// Adapt the `/fleet/status` payload, a map of robot name to summary entry.
pub fn adapt_fleet_status(raw: &Value) -> FleetStatus {
    let Some(entries) = raw.as_object() else {
        warn!(kind = json_kind(raw), "fleet payload is not an object, using empty fleet");
        return FleetStatus::default();
    };

    let robots: Vec<Robot> = entries
        .iter()
        .map(|(name, entry)| adapt_fleet_entry(name, entry))
        .collect();

    let active_robots = robots.iter().filter(|r| r.status.is_active()).count();
    let battery_levels: BTreeMap<String, u8> = robots
        .iter()
        .map(|r| (r.id.clone(), r.battery))
        .collect();

    FleetStatus {
        active_robots,
        inactive_robots: robots.len() - active_robots,
        battery_levels,
        robots,
        constraints: Vec::new(),
        total_area_covered: None,
    }
}

fn adapt_fleet_entry(name: &str, entry: &Value) -> Robot {
    let mut fixups = FixUps::new(name);

    let status = match entry.get("status").and_then(Value::as_str) {
        Some(raw) => RobotStatus::from_wire(raw),
        None => {
            fixups.note("status");
            RobotStatus::Unreported
        }
    };

    let current = match entry.get("task") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(task)) => task.clone(),
        Some(_) => {
            fixups.note("task");
            String::new()
        }
    };

    let robot = Robot {
        id: name.to_string(),
        name: name.to_string(),
        status,
        battery: battery_percent(number(entry, "battery", &mut fixups)),
        position: coordinates(entry, &mut fixups),
        sensors: SensorReadings::default(),
        tasks: TaskQueue {
            current,
            queue: Vec::new(),
        },
        last_update: None,
    };

    fixups.report();
    robot
}

/// Shallow-merge the rover status and sensor-data payloads. Keys from the
/// sensor payload win, and a non-object on either side contributes nothing.
pub fn merge_payloads(status: Value, sensor: Value) -> Value {
    let mut merged = match status {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Value::Object(extra) = sensor {
        merged.extend(extra);
    }
    Value::Object(merged)
}

/// Adapt a merged rover status + sensor-data payload, stamping a missing
/// timestamp with the current wall clock.
pub fn adapt_robot_details(raw: &Value) -> RobotDetails {
    adapt_robot_details_at(raw, Utc::now())
}

pub fn adapt_robot_details_at(raw: &Value, now: DateTime<Utc>) -> RobotDetails {
    let id = string_field(raw, "rover_id").unwrap_or_default();
    let mut fixups = FixUps::new(&id);
    if id.is_empty() {
        fixups.note("rover_id");
    }

    let status = match raw.get("status").and_then(Value::as_str) {
        Some(raw) => RobotStatus::from_wire(raw),
        None => {
            fixups.note("status");
            RobotStatus::Inactive
        }
    };

    let last_update = match raw.get("timestamp") {
        None | Some(Value::Null) => now,
        Some(value) => parse_timestamp(value).unwrap_or_else(|| {
            fixups.note("timestamp");
            now
        }),
    };

    let robot = Robot {
        name: string_field(raw, "name").unwrap_or_default(),
        status,
        battery: battery_percent(number(raw, "battery_level", &mut fixups)),
        position: coordinates(raw, &mut fixups),
        sensors: sensor_readings(raw, &mut fixups),
        tasks: TaskQueue {
            current: raw
                .get("task")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            queue: string_list(raw.get("task_queue")),
        },
        last_update: Some(last_update),
        id,
    };

    let details = RobotDetails {
        coverage_area: optional_number(raw, "coverage_area", &mut fixups),
        uptime: optional_number(raw, "uptime", &mut fixups),
        maintenance_history: maintenance_history(raw.get("maintenance_history"), &mut fixups),
        sensor_history: sensor_history(raw.get("sensor_history"), &mut fixups),
        error_logs: string_list(raw.get("error_logs")),
        robot,
    };

    fixups.report();
    details
}

pub fn adapt_command_ack(raw: &Value) -> CommandAck {
    CommandAck {
        success: raw.get("success").and_then(Value::as_bool).unwrap_or(false),
        message: raw
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

pub fn adapt_move_ack(raw: &Value) -> MoveAck {
    let new_position = raw.get("new_position").and_then(position_value);

    MoveAck {
        success: raw.get("success").and_then(Value::as_bool).unwrap_or(false),
        message: raw
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MOVE_MESSAGE)
            .to_string(),
        new_position,
    }
}

pub fn adapt_battery(raw: &Value) -> u8 {
    let value = raw
        .get("battery_level")
        .or_else(|| raw.get("battery"))
        .and_then(Value::as_f64)
        .unwrap_or_default();
    battery_percent(value)
}

pub fn adapt_coordinates(raw: &Value) -> Position {
    raw.get("coordinates")
        .and_then(position_value)
        .unwrap_or_default()
}

/// Parse RFC 3339, naive ISO 8601 (taken as UTC) or Unix seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n
            .as_f64()
            .filter(|secs| secs.is_finite())
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64)),
        _ => None,
    }
}

fn sensor_readings(raw: &Value, fixups: &mut FixUps) -> SensorReadings {
    SensorReadings {
        soil_moisture: number(raw, "soil_moisture", fixups),
        temperature: number(raw, "temperature", fixups),
        soil_ph: match raw.get("soil_pH").or_else(|| raw.get("soil_ph")) {
            Some(value) => value.as_f64().unwrap_or_else(|| {
                fixups.note("soil_pH");
                0.0
            }),
            None => {
                fixups.note("soil_pH");
                0.0
            }
        },
    }
}

fn sensor_history(value: Option<&Value>, fixups: &mut FixUps) -> Vec<SensorSample> {
    let Some(items) = value.and_then(Value::as_array) else {
        if value.is_some_and(|v| !v.is_null()) {
            fixups.note("sensor_history");
        }
        return Vec::new();
    };

    let mut samples: Vec<SensorSample> = items
        .iter()
        .filter_map(|item| {
            let timestamp = item.get("timestamp").and_then(parse_timestamp);
            if timestamp.is_none() {
                fixups.note("sensor_history.timestamp");
            }
            let mut quiet = FixUps::silent();
            Some(SensorSample {
                timestamp: timestamp?,
                readings: sensor_readings(item, &mut quiet),
            })
        })
        .collect();

    samples.sort_by_key(|sample| sample.timestamp);
    samples
}

fn maintenance_history(value: Option<&Value>, fixups: &mut FixUps) -> Vec<MaintenanceRecord> {
    let Some(items) = value.and_then(Value::as_array) else {
        if value.is_some_and(|v| !v.is_null()) {
            fixups.note("maintenance_history");
        }
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| MaintenanceRecord {
            date: string_field(item, "date").unwrap_or_default(),
            issue: string_field(item, "issue").unwrap_or_default(),
            resolution: string_field(item, "resolution").unwrap_or_default(),
        })
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn coordinates(entry: &Value, fixups: &mut FixUps) -> Position {
    match entry.get("coordinates").and_then(position_value) {
        Some(position) => position,
        None => {
            fixups.note("coordinates");
            Position::default()
        }
    }
}

fn position_value(value: &Value) -> Option<Position> {
    match value {
        Value::Array(items) => Some(Position {
            x: items.first()?.as_f64()?,
            y: items.get(1)?.as_f64()?,
        }),
        Value::Object(map) => Some(Position {
            x: map.get("x")?.as_f64()?,
            y: map.get("y")?.as_f64()?,
        }),
        _ => None,
    }
}

fn string_field(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(entry: &Value, key: &'static str, fixups: &mut FixUps) -> f64 {
    entry.get(key).and_then(Value::as_f64).unwrap_or_else(|| {
        fixups.note(key);
        0.0
    })
}

/// Like [`number`] but an absent key is expected and not worth reporting.
fn optional_number(entry: &Value, key: &'static str, fixups: &mut FixUps) -> f64 {
    match entry.get(key) {
        None | Some(Value::Null) => 0.0,
        Some(value) => value.as_f64().unwrap_or_else(|| {
            fixups.note(key);
            0.0
        }),
    }
}

fn battery_percent(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct FixUps {
    robot: Option<String>,
    fields: Vec<&'static str>,
}

impl FixUps {
    fn new(robot: &str) -> Self {
        Self {
            robot: Some(robot.to_string()),
            fields: Vec::new(),
        }
    }

    fn silent() -> Self {
        Self {
            robot: None,
            fields: Vec::new(),
        }
    }

    fn note(&mut self, field: &'static str) {
        if !self.fields.contains(&field) {
            self.fields.push(field);
        }
    }

    fn report(self) {
        if let Some(robot) = self.robot {
            if !self.fields.is_empty() {
                warn!(robot = %robot, fields = ?self.fields, "payload fields defaulted");
            }
        }
    }
}
