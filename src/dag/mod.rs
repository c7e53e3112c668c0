// src/dag/mod.rs
//! start → socrata_to_gcs → gcs_to_bigquery → end, with task retries and a run lock.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::{
    fmt,
    fs::{self, OpenOptions},
    future::Future,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::PipelineError;
use crate::export::ExportSummary;
use crate::pipeline::{LoadOutcome, Pipeline};

pub mod schedule;

pub use schedule::MonthlySchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    Start,
    SocrataToGcs,
    GcsToBigQuery,
    End,
}

impl TaskId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskId::Start => "start",
            TaskId::SocrataToGcs => "socrata_to_gcs",
            TaskId::GcsToBigQuery => "gcs_to_bigquery",
            TaskId::End => "end",
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The graph, in execution order.
pub const TASKS: [TaskId; 4] = [
    TaskId::Start,
    TaskId::SocrataToGcs,
    TaskId::GcsToBigQuery,
    TaskId::End,
];

/// Task-level retries: the whole task is re-run after a fixed delay.
#[derive(Debug, Clone)]
pub struct TaskRetry {
    pub retries: u32,
    pub delay: Duration,
    /// Named in the failure log line once retries are exhausted.
    pub alert_email: Option<String>,
}

/// Run `task` until it succeeds or `policy.retries` extra tries are used up.
pub async fn run_task<T, F, Fut>(task: TaskId, policy: &TaskRetry, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut try_number = 1;
    loop {
        info!(task = %task, try_number, "starting task");
        match f().await {
            Ok(value) => {
                info!(task = %task, try_number, "task succeeded");
                return Ok(value);
            }
            Err(e) if try_number <= policy.retries => {
                warn!(task = %task, try_number, error = %format!("{e:#}"), "task failed; retrying in {:?}", policy.delay);
                sleep(policy.delay).await;
                try_number += 1;
            }
            Err(e) => {
                error!(
                    task = %task,
                    try_number,
                    alert_email = policy.alert_email.as_deref().unwrap_or(""),
                    error = %format!("{e:#}"),
                    "task failed with no retries left"
                );
                return Err(e.context(format!("task {task} failed after {try_number} tries")));
            }
        }
    }
}

/// Exclusive marker file for one DAG holding the owner's pid; removed on drop.
///
/// A marker whose pid no longer names a live process was left behind by a
/// killed run and is taken over.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(dir: &Path, dag_id: &str) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!("{dag_id}.lock"));
        let locked = || PipelineError::RunLocked {
            path: path.display().to_string(),
        };

        match create_marker(&path) {
            Ok(()) => return Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e).with_context(|| format!("creating lock {}", path.display())),
        }

        match lock_holder(&path) {
            Some(pid) if process_alive(pid) => return Err(locked().into()),
            holder => warn!(path = %path.display(), ?holder, "taking over stale run lock"),
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("removing stale lock {}", path.display())),
        }
        match create_marker(&path) {
            Ok(()) => Ok(Self { path }),
            // someone else won the takeover
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(locked().into()),
            Err(e) => Err(e).with_context(|| format!("creating lock {}", path.display())),
        }
    }
}

/// Publish a marker carrying our pid; fails with `AlreadyExists` if one is there.
///
/// The pid is written to a private file first and hard-linked into place, so
/// the marker never exists without its content.
fn create_marker(path: &Path) -> io::Result<()> {
    let pid = std::process::id();
    let tmp = path.with_extension(format!("lock.{pid}"));
    {
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
        writeln!(file, "{pid}")?;
    }
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    linked
}

fn lock_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove run lock");
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub logical_date: NaiveDateTime,
    pub export: ExportSummary,
    pub load: LoadOutcome,
}

/// Execute the whole graph once for `logical_date`.
pub async fn run_dag(
    pipeline: &Pipeline<'_>,
    logical_date: NaiveDateTime,
    retry: &TaskRetry,
) -> Result<RunReport> {
    let cfg = pipeline.config;
    let span = info_span!("dag_run", dag = %cfg.dag_id, logical_date = %logical_date);

    async move {
        let _lock = RunLock::acquire(&cfg.state_dir, &cfg.dag_id)?;

        info!(task = %TaskId::Start, "run started");
        let export = run_task(TaskId::SocrataToGcs, retry, move || pipeline.socrata_to_gcs()).await?;
        let export_ref = &export;
        let load = run_task(TaskId::GcsToBigQuery, retry, move || {
            pipeline.gcs_to_bigquery(export_ref)
        })
        .await?;
        info!(task = %TaskId::End, rows = export.rows, load = ?load, "run finished");

        Ok(RunReport {
            logical_date,
            export,
            load,
        })
    }
    .instrument(span)
    .await
}

/// Run every logical date in order, one at a time; stops at the first failed run.
pub async fn backfill(
    pipeline: &Pipeline<'_>,
    logical_dates: &[NaiveDateTime],
    retry: &TaskRetry,
) -> Result<Vec<RunReport>> {
    let mut reports = Vec::with_capacity(logical_dates.len());
    for (i, &logical_date) in logical_dates.iter().enumerate() {
        info!(run = i + 1, of = logical_dates.len(), %logical_date, "backfill run");
        reports.push(run_dag(pipeline, logical_date, retry).await?);
    }
    Ok(reports)
}
