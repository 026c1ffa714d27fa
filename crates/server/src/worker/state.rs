use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

#[derive(Debug)]
struct Counters {
    size: u64,
    progress: u64,
    completed: bool,
    cancelling: bool,
}

/// Progress counters and flags of a worker, shared between the worker thread
/// and the editor. Every accessor holds the lock for the whole read or write.
#[derive(Debug)]
pub struct WorkerState {
    counters: Mutex<Counters>,
    done: Condvar,
}

impl Default for WorkerState {
    fn default() -> Self {
        WorkerState {
            counters: Mutex::new(Counters {
                size: 1,
                progress: 0,
                completed: false,
                cancelling: false,
            }),
            done: Condvar::new(),
        }
    }
}

impl WorkerState {
    pub fn new() -> WorkerState {
        WorkerState::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_size(&self, size: u64) {
        self.lock().size = size;
    }

    pub fn size(&self) -> u64 {
        self.lock().size
    }

    pub fn increment_progress(&self, amount: u64) {
        self.lock().progress += amount;
    }

    pub fn progress(&self) -> u64 {
        self.lock().progress
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub fn is_cancelling(&self) -> bool {
        self.lock().cancelling
    }

    /// Called once by the worker thread when it has finished
    pub fn set_completed(&self) {
        let mut counters = self.lock();
        if !counters.completed {
            counters.completed = true;
            self.done.notify_all();
        }
    }

    /// Set the cancelling flag and block until the worker has completed.
    pub fn cancel(&self) {
        let mut counters = self.lock();
        counters.cancelling = true;
        while !counters.completed {
            counters = self
                .done
                .wait(counters)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the worker has completed
    pub fn wait(&self) {
        let mut counters = self.lock();
        while !counters.completed {
            counters = self
                .done
                .wait(counters)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the worker has completed or the timeout elapses. Returns
    /// whether the worker completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let counters = self.lock();
        let (counters, _) = self
            .done
            .wait_timeout_while(counters, timeout, |c| !c.completed)
            .unwrap_or_else(PoisonError::into_inner);
        counters.completed
    }
}
