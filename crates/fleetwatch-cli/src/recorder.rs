//! `fleetwatch record`: one JSON line per fleet refresh, one file per UTC day.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use fleetwatch_core::{FleetState, FleetStore};
use serde_json::{json, Value};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const RECORDING_PREFIX: &str = "fleet-";
const RECORDING_EXT: &str = ".jsonl";
const LATEST: &str = "latest.json";
const PRUNE_EVERY: Duration = Duration::from_secs(30 * 60);

pub async fn run_recorder(
    fleet: &FleetStore,
    output_dir: &str,
    retention_days: u64,
    every: Duration,
) -> Result<()> {
    let dir = PathBuf::from(output_dir);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut log = DailyLog::new(dir.clone());
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut prune_ticker = interval(PRUNE_EVERY);
    info!(dir = %dir.display(), retention_days, "recording fleet snapshots");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let outcome = fleet.refresh_fleet_status().await;
                let now = Utc::now();
                log.append(&fleet_record(&fleet.state(), now), now)?;
                debug!(?outcome, "recorded fleet state");
            }
            _ = prune_ticker.tick() => {
                let removed = prune_recordings(&dir, retention_days, Utc::now().date_naive())?;
                if !removed.is_empty() {
                    info!(count = removed.len(), "pruned expired recordings");
                }
            }
        }
    }

    log.close()
}

/// Appends to `fleet-YYYY-MM-DD.jsonl` for the day of each record, switching
/// files when the UTC date changes.
struct DailyLog {
    dir: PathBuf,
    open: Option<(NaiveDate, BufWriter<fs::File>)>,
}

impl DailyLog {
    fn new(dir: PathBuf) -> Self {
        Self { dir, open: None }
    }

    fn writer_for(&mut self, day: NaiveDate) -> Result<&mut BufWriter<fs::File>> {
        if let Some((open_day, mut writer)) = self.open.take() {
            if open_day == day {
                return Ok(&mut self.open.insert((open_day, writer)).1);
            }
            writer.flush()?;
            debug!(from = %open_day, to = %day, "rotating recording file");
        }

        let path = recording_path(&self.dir, day);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(&mut self.open.insert((day, BufWriter::new(file))).1)
    }

    fn append(&mut self, record: &Value, at: DateTime<Utc>) -> Result<()> {
        let writer = self.writer_for(at.date_naive())?;
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        write_latest(&self.dir, record)?;
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        if let Some((_, mut writer)) = self.open.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn recording_path(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(format!("{RECORDING_PREFIX}{}{RECORDING_EXT}", day.format("%Y-%m-%d")))
}

fn recording_day(file_name: &str) -> Option<NaiveDate> {
    let day = file_name
        .strip_prefix(RECORDING_PREFIX)?
        .strip_suffix(RECORDING_EXT)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Replace `latest.json` through a temp file so readers never see half a record.
fn write_latest(dir: &Path, record: &Value) -> io::Result<()> {
    let tmp = dir.join(format!("{LATEST}.tmp"));
    fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
    fs::rename(tmp, dir.join(LATEST))
}

/// One line of the recording. A failed refresh still produces a line with
/// the error and the last good snapshot.
pub(crate) fn fleet_record(state: &FleetState, at: DateTime<Utc>) -> Value {
    let snapshot = state.snapshot.as_deref();

    json!({
        "ts": at,
        "unix_ms": at.timestamp_millis(),
        "refreshed_at": state.refreshed_at,
        "error": state.error,
        "active_robots": snapshot.map(|s| s.active_robots),
        "inactive_robots": snapshot.map(|s| s.inactive_robots),
        "battery_levels": snapshot.map(|s| &s.battery_levels),
        "robots": snapshot.map(|s| {
            s.robots
                .iter()
                .map(|r| json!({
                    "id": r.id,
                    "status": r.status,
                    "battery": r.battery,
                    "position": r.position,
                    "task": r.tasks.current,
                }))
                .collect::<Vec<_>>()
        }),
    })
}

/// Delete recordings dated before `today - retention_days`. Other files in
/// the directory are left alone. Returns the removed paths.
pub(crate) fn prune_recordings(
    dir: &Path,
    retention_days: u64,
    today: NaiveDate,
) -> Result<Vec<PathBuf>> {
    let oldest_kept = today
        .checked_sub_days(Days::new(retention_days))
        .unwrap_or(NaiveDate::MIN);

    let mut removed = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let expired = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(recording_day)
            .is_some_and(|day| day < oldest_kept);
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(err) => warn!(path = %path.display(), error = %err, "could not prune recording"),
        }
    }

    Ok(removed)
}
