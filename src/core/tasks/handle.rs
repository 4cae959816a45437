// src/core/tasks/handle.rs

//! Shared plumbing every worker loop is built around: a `watch` control
//! channel (rather than a one-shot broadcast shutdown, since workers here
//! are independently startable/stoppable at runtime via the API, not only
//! at process shutdown) and a status block the API's "query worker status"
//! operation reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};

use crate::core::tasks::generation::Generation;

/// A command sent down a worker's control channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerCommand {
    Start,
    Stop,
    RunNow,
}

/// The point-in-time status the API's "query worker status" operation
/// surfaces: `running`, `currentRepo|currentSync`, `nextRunAt`, `lastRun`.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct WorkerSnapshot {
    pub running: bool,
    pub current: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    running: AtomicBool,
    current: Mutex<Option<String>>,
    next_run_at: Mutex<Option<DateTime<Utc>>>,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Clone, Default)]
pub struct WorkerStatus(Arc<Inner>);

impl WorkerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.0.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::SeqCst)
    }

    pub async fn set_current(&self, current: Option<String>) {
        *self.0.current.lock().await = current;
    }

    pub async fn set_next_run_at(&self, at: Option<DateTime<Utc>>) {
        *self.0.next_run_at.lock().await = at;
    }

    pub async fn record_run(&self) {
        *self.0.last_run.lock().await = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            running: self.is_running(),
            current: self.0.current.lock().await.clone(),
            next_run_at: *self.0.next_run_at.lock().await,
            last_run: *self.0.last_run.lock().await,
        }
    }
}

/// The handle an API layer holds to control one worker: send commands, read
/// status, and (indirectly, via `generation`) invalidate stale scheduled
/// continuations left over from a previous start/stop cycle.
pub struct WorkerHandle {
    commands: watch::Sender<WorkerCommand>,
    pub status: WorkerStatus,
    pub generation: Arc<Generation>,
}

impl WorkerHandle {
    pub fn new(commands: watch::Sender<WorkerCommand>, status: WorkerStatus, generation: Arc<Generation>) -> Self {
        Self {
            commands,
            status,
            generation,
        }
    }

    pub fn start(&self) {
        self.generation.bump();
        let _ = self.commands.send(WorkerCommand::Start);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(WorkerCommand::Stop);
    }

    /// Runs an immediate iteration without perturbing the regular scheduler.
    pub fn run_now(&self) {
        let _ = self.commands.send(WorkerCommand::RunNow);
    }

    pub async fn snapshot(&self) -> WorkerSnapshot {
        self.status.snapshot().await
    }
}
