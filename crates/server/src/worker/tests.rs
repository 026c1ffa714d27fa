use std::sync::atomic::{AtomicBool, Ordering};

use super::*;

/// Counts blocks until cancelled or done, sleeping a little per block
struct Counter {
    blocks: u64,
    pause: Duration,
    cancel_seen: Arc<AtomicBool>,
}

impl Worker for Counter {
    fn execute(&mut self, ctx: &mut WorkerContext) -> WorkerReport {
        ctx.set_size(self.blocks);
        for _ in 0..self.blocks {
            if ctx.is_cancelling() {
                // Linger so that a cancel returning early would be observed
                thread::sleep(Duration::from_millis(50));
                self.cancel_seen.store(true, Ordering::SeqCst);
                return WorkerReport::Written(WriteReport {
                    outcome: WorkOutcome::Cancelled,
                });
            }
            thread::sleep(self.pause);
            ctx.increment_progress(1);
        }

        WorkerReport::Written(WriteReport {
            outcome: WorkOutcome::Completed,
        })
    }
}

struct Panics;

impl Worker for Panics {
    fn execute(&mut self, _ctx: &mut WorkerContext) -> WorkerReport {
        panic!("worker failure")
    }
}

fn counter(blocks: u64, pause: Duration) -> (Counter, Arc<AtomicBool>) {
    let seen = Arc::new(AtomicBool::new(false));
    let worker = Counter {
        blocks,
        pause,
        cancel_seen: seen.clone(),
    };
    (worker, seen)
}

#[test]
fn cancel_blocks_until_completed() {
    let (editor, recv) = EditorHandle::channel();
    let (worker, seen) = counter(10_000, Duration::from_millis(1));
    let handle = spawn_worker(worker, editor).unwrap();

    thread::sleep(Duration::from_millis(20));
    handle.cancel();

    assert!(handle.is_completed());
    assert!(seen.load(Ordering::SeqCst));
    assert!(handle.state().is_cancelling());

    let msg = loop {
        match recv.recv_timeout(Duration::from_secs(5)).unwrap() {
            ToEditor::Workers(FromWorkers::Progress(_)) => continue,
            msg => break msg,
        }
    };
    match msg {
        ToEditor::Workers(FromWorkers::Written(id, report)) => {
            assert_eq!(id, handle.id());
            assert!(matches!(report.outcome, WorkOutcome::Cancelled));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn completion_is_posted_once_with_progress() {
    let (editor, recv) = EditorHandle::channel();
    let (worker, _) = counter(12, Duration::from_millis(50));
    let handle = spawn_worker(worker, editor).unwrap();

    let mut progress = 0;
    let mut completions = 0;
    while let Ok(msg) = recv.recv_timeout(Duration::from_secs(2)) {
        match msg {
            ToEditor::Workers(FromWorkers::Progress(id)) => {
                assert_eq!(id, handle.id());
                progress += 1;
            }
            ToEditor::Workers(FromWorkers::Written(_, report)) => {
                assert!(report.outcome.is_completed());
                assert!(handle.is_completed());
                completions += 1;
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    assert_eq!(completions, 1);
    assert!(progress >= 1);
    assert_eq!(handle.state().size(), 12);
    assert_eq!(handle.state().progress(), 12);
}

#[test]
fn panicking_worker_still_completes() {
    let (editor, _recv) = EditorHandle::channel();
    let handle = spawn_worker(Panics, editor).unwrap();
    handle.cancel();
    assert!(handle.is_completed());
}

#[test]
fn state_defaults_and_wait_timeout() {
    let state = WorkerState::new();
    assert_eq!(state.size(), 1);
    assert_eq!(state.progress(), 0);
    assert!(!state.wait_timeout(Duration::from_millis(10)));

    state.set_completed();
    state.set_completed();
    assert!(state.wait_timeout(Duration::from_millis(10)));
    state.wait();
    state.cancel();
    assert!(state.is_cancelling());
}
