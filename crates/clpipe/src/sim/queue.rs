//! In-order command queue executed by one worker thread.
//!
//! Commands run strictly in submission order. Each carries a [`SimEvent`]
//! that moves `Queued -> Submitted -> Running -> Complete | Error` and wakes
//! waiters through a condition variable. A device's completion latency is
//! spent before the command's effects become visible, so a host that peeks
//! at device memory without waiting sees the old contents.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use super::SimDeviceSpec;
use crate::backend::{CompletionEvent, EventStatus};
use crate::error::{status, status_name, Result, RuntimeError};

/// Work performed by one command. `Err` carries a status code and message.
pub(crate) type Job = Box<dyn FnOnce() -> std::result::Result<(), (i32, String)> + Send>;

// ── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Record {
    status: EventStatus,
    message: String,
    started: Option<Instant>,
    ended: Option<Instant>,
}

#[derive(Debug)]
struct EventState {
    record: Mutex<Record>,
    changed: Condvar,
}

/// Completion handle for a simulated command.
#[derive(Debug, Clone)]
pub struct SimEvent {
    state: Arc<EventState>,
    command: &'static str,
    profiling: bool,
}

impl SimEvent {
    fn new(command: &'static str, profiling: bool) -> Self {
        let record = Record { status: EventStatus::Queued, message: String::new(), started: None, ended: None };
        Self {
            state: Arc::new(EventState { record: Mutex::new(record), changed: Condvar::new() }),
            command,
            profiling,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.state.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark(&self, status: EventStatus) {
        let mut record = self.lock();
        record.status = status;
        if status == EventStatus::Running {
            record.started = Some(Instant::now());
        }
        drop(record);
        self.state.changed.notify_all();
    }

    fn finish(&self, outcome: std::result::Result<(), (i32, String)>) {
        let mut record = self.lock();
        record.ended = Some(Instant::now());
        match outcome {
            Ok(()) => record.status = EventStatus::Complete,
            Err((code, message)) => {
                record.status = EventStatus::Error(code);
                record.message = message;
            }
        }
        drop(record);
        self.state.changed.notify_all();
    }

    /// The runtime call that produced this event.
    pub fn command(&self) -> &'static str {
        self.command
    }
}

impl CompletionEvent for SimEvent {
    fn wait(&self) -> Result<()> {
        let mut record = self.lock();
        while !record.status.is_terminal() {
            record = self.state.changed.wait(record).unwrap_or_else(PoisonError::into_inner);
        }
        match record.status {
            EventStatus::Error(code) => Err(RuntimeError::new(
                "clWaitForEvents",
                status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
                format!("{} failed with {} ({code}): {}", self.command, status_name(code), record.message),
            )
            .into()),
            _ => Ok(()),
        }
    }

    fn status(&self) -> Result<EventStatus> {
        Ok(self.lock().status)
    }

    fn profiled_duration(&self) -> Option<Duration> {
        if !self.profiling {
            return None;
        }
        let record = self.lock();
        match (record.status, record.started, record.ended) {
            (EventStatus::Complete, Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }
}

// ── Queue ───────────────────────────────────────────────────────────────────

struct Command {
    event: SimEvent,
    wait_for: Vec<SimEvent>,
    latency: Duration,
    job: Job,
}

/// A simulated in-order command queue.
pub struct SimQueue {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    device: Arc<SimDeviceSpec>,
    profiling: bool,
}

impl SimQueue {
    pub(crate) fn spawn(device: Arc<SimDeviceSpec>, profiling: bool) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(format!("sim-queue:{}", device.name))
            .spawn(move || run_worker(&receiver))
            .map_err(|e| {
                RuntimeError::new("clCreateCommandQueue", status::CL_OUT_OF_HOST_MEMORY, e.to_string())
            })?;
        Ok(Self { sender: Some(sender), worker: Some(worker), device, profiling })
    }

    pub(crate) fn device(&self) -> &Arc<SimDeviceSpec> {
        &self.device
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }

    /// Append a command. It starts once every event in `wait_for` and every
    /// earlier command on this queue has completed.
    pub(crate) fn submit(
        &self,
        command: &'static str,
        latency: Duration,
        wait_for: &[&SimEvent],
        job: Job,
    ) -> Result<SimEvent> {
        let event = SimEvent::new(command, self.profiling);
        let sender = self.sender.as_ref().ok_or_else(|| {
            RuntimeError::new(command, status::CL_INVALID_COMMAND_QUEUE, "queue has been released")
        })?;
        sender
            .send(Command {
                event: event.clone(),
                wait_for: wait_for.iter().map(|e| (*e).clone()).collect(),
                latency,
                job,
            })
            .map_err(|_| {
                RuntimeError::new(command, status::CL_INVALID_COMMAND_QUEUE, "queue worker has stopped")
            })?;
        trace!("Queued {}", command);
        Ok(event)
    }

    /// Block until every submitted command has completed.
    pub(crate) fn finish(&self) -> Result<()> {
        let marker = self.submit("clFinish", Duration::ZERO, &[], Box::new(|| Ok(())))?;
        marker.wait()
    }
}

fn run_worker(receiver: &Receiver<Command>) {
    for command in receiver {
        command.event.mark(EventStatus::Submitted);

        if command.wait_for.iter().any(|dep| dep.wait().is_err()) {
            command.event.finish(Err((
                status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
                "a command in the wait list failed".into(),
            )));
            continue;
        }

        command.event.mark(EventStatus::Running);
        if !command.latency.is_zero() {
            thread::sleep(command.latency);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(command.job)).unwrap_or_else(|_| {
            Err((status::CL_OUT_OF_RESOURCES, "command aborted: host implementation panicked".into()))
        });
        command.event.finish(outcome);
    }
}

impl Drop for SimQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Simulated queue worker for '{}' panicked", self.device.name);
            }
        }
    }
}

impl std::fmt::Debug for SimQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimQueue")
            .field("device", &self.device.name)
            .field("profiling", &self.profiling)
            .finish_non_exhaustive()
    }
}
