use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fleetwatch_core::config::DEFAULT_BASE_URL;
use fleetwatch_core::{
    ClientConfig, FileSessionStorage, FleetClient, FleetStatus, FleetStore, HttpBackend, MoveAck,
    MoveDirection, RefreshOutcome, RetryPolicy, RobotDetailStore, RobotDetails, SessionManager,
};
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod recorder;

#[derive(Debug, Parser)]
#[command(name = "fleetwatch")]
#[command(about = "Rover fleet telemetry monitor")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "FLEETWATCH_API_URL", default_value = DEFAULT_BASE_URL)]
    api_url: String,

    #[arg(long, env = "FLEETWATCH_SESSION_FILE", default_value = "./data/session.json")]
    session_file: PathBuf,

    #[arg(long, default_value_t = 5000)]
    request_timeout_ms: u64,

    #[arg(long, default_value_t = 3)]
    read_attempts: u32,

    #[arg(long, default_value_t = 200)]
    backoff_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    Session {
        /// Discard the stored session and start a new one.
        #[arg(long)]
        new: bool,
    },
    Status {
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Robot {
        id: String,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Assign {
        id: String,
        task: String,
    },
    Move {
        id: String,
        #[arg(value_enum)]
        direction: DirectionArg,
    },
    Battery {
        id: String,
    },
    Coordinates {
        id: String,
    },
    Watch {
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
        /// Also follow this robot's details.
        #[arg(long)]
        robot: Option<String>,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    Record {
        #[arg(long, default_value = "./data/fleet")]
        output_dir: String,
        #[arg(long, default_value_t = 30)]
        retention_days: u64,
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl From<DirectionArg> for MoveDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Forward => MoveDirection::Forward,
            DirectionArg::Backward => MoveDirection::Backward,
            DirectionArg::Left => MoveDirection::Left,
            DirectionArg::Right => MoveDirection::Right,
            DirectionArg::Stop => MoveDirection::Stop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = ClientConfig {
        base_url: cli.api_url.clone(),
        request_timeout: Duration::from_millis(cli.request_timeout_ms),
        read_retry: RetryPolicy {
            max_attempts: cli.read_attempts,
            initial_backoff: Duration::from_millis(cli.backoff_ms),
            ..RetryPolicy::default()
        },
        command_retry: RetryPolicy::once(),
        session_file: cli.session_file.clone(),
    };

    let backend = Arc::new(HttpBackend::new(&config)?);
    let sessions = Arc::new(SessionManager::new(FileSessionStorage::new(
        &config.session_file,
    )));
    let client = FleetClient::new(backend, sessions);
    let fleet = FleetStore::new(client.clone());
    let detail = RobotDetailStore::new(fleet.clone());

    match cli.command {
        Command::Session { new } => {
            let session = if new {
                client.renew_session().await?
            } else {
                client.ensure_session().await?
            };
            println!("{session}");
        }
        Command::Status { format } => {
            if let RefreshOutcome::Failed(message) = fleet.refresh_fleet_status().await {
                bail!(message);
            }
            if let Some(snapshot) = fleet.snapshot() {
                print_fleet(&snapshot, format)?;
            }
        }
        Command::Robot { id, format } => {
            if let RefreshOutcome::Failed(message) = detail.select_robot(Some(id.as_str())).await {
                bail!(message);
            }
            if let Some(details) = detail.details() {
                print_details(&details, format)?;
            }
        }
        Command::Assign { id, task } => {
            let ack = fleet.assign_task(&id, &task).await?;
            println!("{} (success={})", ack.message, ack.success);
            if let Some(snapshot) = fleet.snapshot() {
                print_fleet(&snapshot, OutputFormat::Human)?;
            }
        }
        Command::Move { id, direction } => {
            let ack = move_selected(&detail, &id, direction.into()).await?;
            println!("{} (success={})", ack.message, ack.success);
            if let Some(details) = detail.details() {
                print_details(&details, OutputFormat::Human)?;
            }
        }
        Command::Battery { id } => {
            println!("{id}: {}%", fleet.battery(&id).await?);
        }
        Command::Coordinates { id } => {
            let position = fleet.coordinates(&id).await?;
            println!("{id}: ({:.2}, {:.2})", position.x, position.y);
        }
        Command::Watch {
            interval_ms,
            robot,
            format,
        } => {
            if let Some(id) = robot.as_deref() {
                detail.select_robot(Some(id)).await;
            }
            stream_loop(&fleet, &detail, Duration::from_millis(interval_ms), format).await?;
        }
        Command::Record {
            output_dir,
            retention_days,
            interval_ms,
        } => {
            recorder::run_recorder(
                &fleet,
                &output_dir,
                retention_days,
                Duration::from_millis(interval_ms),
            )
            .await?;
        }
    }

    Ok(())
}

/// Select `id`, then move it. A failed detail fetch stops before the move is
/// sent.
async fn move_selected(
    detail: &RobotDetailStore,
    id: &str,
    direction: MoveDirection,
) -> Result<MoveAck> {
    if let RefreshOutcome::Failed(message) = detail.select_robot(Some(id)).await {
        bail!(message);
    }
    Ok(detail.move_robot(direction).await?)
}

async fn stream_loop(
    fleet: &FleetStore,
    detail: &RobotDetailStore,
    every: Duration,
    format: OutputFormat,
) -> Result<()> {
    let start = Instant::now() + Duration::from_millis(50);
    let mut ticker = interval_at(start, every);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("received ctrl-c, stopping");
                break;
            }
            _ = ticker.tick() => {
                let outcome = fleet.refresh_fleet_status().await;
                let state = fleet.state();
                if let Some(snapshot) = &state.snapshot {
                    print_fleet(snapshot, format)?;
                }
                if let Some(error) = &state.error {
                    eprintln!("error: {error}");
                }

                if detail.selected().is_some() {
                    detail.refresh_robot_details().await;
                    if let Some(details) = detail.details() {
                        print_details(&details, format)?;
                    }
                }
                info!(?outcome, failed = state.error.is_some(), "tick");
            }
        }
    }

    Ok(())
}

fn print_fleet(snapshot: &FleetStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(snapshot)?);
        }
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(snapshot)?);
        }
        OutputFormat::Human => {
            println!("=== Fleet Status ===");
            println!(
                "Robots:     {} (active={} inactive={})",
                snapshot.robots.len(),
                snapshot.active_robots,
                snapshot.inactive_robots
            );
            if let Some(area) = snapshot.total_area_covered {
                println!("Coverage:   {area:.1}");
            }
            for robot in &snapshot.robots {
                println!(
                    "  {:<12} {:<12} {:>3}%  ({:>7.2}, {:>7.2})  {}",
                    robot.id,
                    robot.status.to_string(),
                    robot.battery,
                    robot.position.x,
                    robot.position.y,
                    if robot.tasks.current.is_empty() {
                        "-"
                    } else {
                        robot.tasks.current.as_str()
                    }
                );
            }
            if !snapshot.constraints.is_empty() {
                println!("Constraints: {}", snapshot.constraints.join(", "));
            }
        }
    }

    Ok(())
}

fn print_details(details: &RobotDetails, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(details)?);
        }
        OutputFormat::Ndjson => {
            println!("{}", serde_json::to_string(details)?);
        }
        OutputFormat::Human => {
            let robot = &details.robot;
            println!("=== Robot {} ===", robot.id);
            if !robot.name.is_empty() && robot.name != robot.id {
                println!("Name:       {}", robot.name);
            }
            println!("Status:     {}", robot.status);
            println!("Battery:    {}%", robot.battery);
            println!("Position:   ({:.2}, {:.2})", robot.position.x, robot.position.y);
            if let Some(ts) = robot.last_update {
                println!("Updated:    {}", ts.to_rfc3339());
            }
            println!(
                "Sensors:    moisture={:.1}% temperature={:.1}C pH={:.2}",
                robot.sensors.soil_moisture, robot.sensors.temperature, robot.sensors.soil_ph
            );
            if !robot.tasks.current.is_empty() {
                println!("Task:       {}", robot.tasks.current);
            }
            if !robot.tasks.queue.is_empty() {
                println!("Queue:      {}", robot.tasks.queue.join(" -> "));
            }
            println!("Coverage:   {:.1}  Uptime: {:.0}", details.coverage_area, details.uptime);
            if let Some(last) = details.sensor_history.last() {
                println!(
                    "History:    {} samples, latest {}",
                    details.sensor_history.len(),
                    last.timestamp.to_rfc3339()
                );
            }
            for record in &details.maintenance_history {
                println!("Maint:      {} {} ({})", record.date, record.issue, record.resolution);
            }
            if !details.error_logs.is_empty() {
                println!("Errors:     {}", details.error_logs.join(", "));
            }
        }
    }

    Ok(())
}
