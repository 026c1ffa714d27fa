//! Cancellable background work running on dedicated threads.
//!
//! A [`Worker`] is moved to its own thread by [`spawn_worker`]. While it runs
//! the editor observes it only through the shared [`WorkerState`]. When the
//! work is done the state is marked completed and exactly one
//! [`FromWorkers`] completion message is posted to the editor.

mod state;

#[cfg(test)]
mod tests;

use std::{
    io,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use scrivo_core::UniMode;

use crate::{EditorHandle, ToEditor, WorkerId};

pub use state::WorkerState;

/// Minimum time between two progress messages of one worker
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(400);

/// How a piece of background work ended. Exactly one of these is reported.
#[derive(Debug)]
pub enum WorkOutcome {
    Completed,
    Failed(io::Error),
    Cancelled,
}

impl WorkOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkOutcome::Completed)
    }
}

#[derive(Debug)]
pub struct ReadReport {
    pub outcome: WorkOutcome,
    /// Encoding detected while reading
    pub unicode_mode: UniMode,
}

#[derive(Debug)]
pub struct WriteReport {
    pub outcome: WorkOutcome,
}

#[derive(Debug)]
pub enum WorkerReport {
    Read(ReadReport),
    Written(WriteReport),
}

#[derive(Debug)]
pub enum FromWorkers {
    Progress(WorkerId),
    Read(WorkerId, ReadReport),
    Written(WorkerId, WriteReport),
}

impl FromWorkers {
    pub fn id(&self) -> WorkerId {
        match self {
            FromWorkers::Progress(id) | FromWorkers::Read(id, _) | FromWorkers::Written(id, _) => {
                *id
            }
        }
    }
}

/// Background work that is run on its own thread.
pub trait Worker: Send + 'static {
    /// Run the work to completion, cancellation or failure. Must not touch
    /// editor state, results are returned and posted to the editor.
    fn execute(&mut self, ctx: &mut WorkerContext) -> WorkerReport;
}

/// Given to a running worker to update its progress.
pub struct WorkerContext {
    id: WorkerId,
    state: Arc<WorkerState>,
    editor: EditorHandle,
    last_post: Instant,
}

impl WorkerContext {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_cancelling(&self) -> bool {
        self.state.is_cancelling()
    }

    pub fn set_size(&self, size: u64) {
        self.state.set_size(size);
    }

    /// Add to progress, posting a progress message if enough time has passed
    /// since the last one
    pub fn increment_progress(&mut self, amount: u64) {
        self.state.increment_progress(amount);

        let now = Instant::now();
        if now.duration_since(self.last_post) >= PROGRESS_INTERVAL {
            self.last_post = now;
            self.editor
                .send(ToEditor::Workers(FromWorkers::Progress(self.id)));
        }
    }
}

/// Editor side handle to a spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    state: Arc<WorkerState>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    /// Request cancellation and block until the worker has completed.
    /// Returns quickly for workers that check for cancellation between
    /// blocks but may stall for the duration of one block of I/O.
    pub fn cancel(&self) {
        log::debug!("Cancelling worker {}", self.id);
        self.state.cancel();
    }

    /// Block until the worker has completed without cancelling it
    pub fn wait(&self) {
        self.state.wait();
    }
}

/// Marks the state completed even if the worker panics so that cancel never
/// blocks forever.
struct CompleteOnDrop(Arc<WorkerState>);

impl Drop for CompleteOnDrop {
    fn drop(&mut self) {
        self.0.set_completed();
    }
}

/// Run a worker on a new thread. The completion message is posted after the
/// state has been marked completed.
pub fn spawn_worker<W: Worker>(mut worker: W, editor: EditorHandle) -> io::Result<WorkerHandle> {
    let id = WorkerId::next();
    let state = Arc::new(WorkerState::new());
    let handle = WorkerHandle {
        id,
        state: state.clone(),
    };

    let mut ctx = WorkerContext {
        id,
        state: state.clone(),
        editor: editor.clone(),
        last_post: Instant::now(),
    };

    thread::Builder::new()
        .name(format!("worker-{id}"))
        .spawn(move || {
            let report = {
                let _complete = CompleteOnDrop(state);
                worker.execute(&mut ctx)
            };

            let msg = match report {
                WorkerReport::Read(report) => FromWorkers::Read(id, report),
                WorkerReport::Written(report) => FromWorkers::Written(id, report),
            };
            log::debug!("Worker {id} done: {msg:?}");
            editor.send(ToEditor::Workers(msg));
        })?;

    log::debug!("Spawned worker {id}");
    Ok(handle)
}
