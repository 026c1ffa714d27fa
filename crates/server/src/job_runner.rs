mod context;
mod events;
mod kill;

pub use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{self, channel};
use tokio::task::JoinHandle;

use crate::events::ToEditor;
use crate::{EditorHandle, JobId, CHANNEL_SIZE};

pub use context::*;
pub use events::*;
pub use kill::Kill;

/// Used to communicate with jobs runner
pub type JobsHandle = mpsc::Sender<ToJobs>;
/// A job that can be sent to other threads
pub type BoxedJob = Box<dyn Job + Send + Sync>;
pub type JobResult = BoxFuture<'static, anyhow::Result<()>>;

/// Jobs that can be ran on async runner
pub trait Job {
    /// Run the job.
    /// This should return the async future to run the job.
    /// This should not block for a long time
    fn run(&self, ctx: JobContext) -> JobResult;
}

/// Spawn a job runner
pub async fn spawn_job_runner(editor: EditorHandle) -> JobsHandle {
    let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
    tokio::spawn(jobs_loop(rx, editor));
    tx
}

#[derive(Debug, Default)]
struct Jobs(FxHashMap<JobId, (Kill, JoinHandle<()>)>);

impl std::ops::Deref for Jobs {
    type Target = FxHashMap<JobId, (Kill, JoinHandle<()>)>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Jobs {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Drop for Jobs {
    fn drop(&mut self) {
        for (_id, (kill, join)) in &self.0 {
            kill.stop();
            join.abort();
        }
    }
}

// Runs jobs in tokio runtime.
async fn jobs_loop(mut recv: mpsc::Receiver<ToJobs>, editor: EditorHandle) {
    let (tx, mut rx) = channel(CHANNEL_SIZE);
    let context = JobResponseSender {
        editor,
        outcomes: tx,
    };
    let mut jobs = Jobs::default();

    loop {
        tokio::select!(
            Some(outcome) = rx.recv() => {
                jobs.remove(&outcome.id());
                context.editor.send(ToEditor::Jobs(outcome));
            },
            Some(msg) = recv.recv() => {
                use ToJobs::*;
                match msg {
                    Request(id, job) => {
                        log::debug!("Job {id} requested");
                        let reporter = context.clone();
                        let ctx = reporter.context(id);
                        let kill = ctx.kill.clone();
                        let task_kill = kill.clone();
                        let task = async move {
                            let result = job.run(ctx).await;
                            let outcome = match result {
                                _ if task_kill.should_stop() => FromJobs::Stopped(id),
                                Ok(_) => FromJobs::Successful(id),
                                Err(reason) => FromJobs::Failed(id, reason.to_string()),
                            };
                            reporter.report(outcome).await;
                        };

                        let join = tokio::spawn(task);
                        jobs.insert(id, (kill, join));
                    }
                    Stop(id) => {
                        // The job cleans up and reports back through the
                        // internal channel
                        if let Some((kill, _)) = jobs.get(&id) {
                            log::debug!("Job {id} stop requested");
                            kill.stop();
                        }
                    }
                }
            },
            else => break,
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct Sleeper(Duration);

    impl Job for Sleeper {
        fn run(&self, ctx: JobContext) -> JobResult {
            let dur = self.0;
            Box::pin(async move {
                tokio::select! {
                    _ = tokio::time::sleep(dur) => Ok(()),
                    _ = ctx.kill.stopped() => Ok(()),
                }
            })
        }
    }

    struct Failing;

    impl Job for Failing {
        fn run(&self, mut ctx: JobContext) -> JobResult {
            Box::pin(async move {
                ctx.send(7usize);
                anyhow::bail!("broken")
            })
        }
    }

    fn recv_jobs(recv: &crossbeam::channel::Receiver<ToEditor>) -> FromJobs {
        match recv.recv_timeout(Duration::from_secs(5)) {
            Ok(ToEditor::Jobs(msg)) => msg,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_failure_and_stop() {
        let (editor, recv) = EditorHandle::channel();
        let jobs = spawn_job_runner(editor).await;

        let ok = JobId::next();
        jobs.send(ToJobs::Request(ok, Box::new(Sleeper(Duration::ZERO))))
            .await
            .unwrap();
        let msg = tokio::task::block_in_place(|| recv_jobs(&recv));
        assert!(matches!(msg, FromJobs::Successful(id) if id == ok));

        let fail = JobId::next();
        jobs.send(ToJobs::Request(fail, Box::new(Failing))).await.unwrap();
        let msg = tokio::task::block_in_place(|| recv_jobs(&recv));
        match msg {
            FromJobs::Message(id, any) => {
                assert_eq!(id, fail);
                assert_eq!(any.downcast_ref::<usize>(), Some(&7));
            }
            other => panic!("unexpected {other:?}"),
        }
        let msg = tokio::task::block_in_place(|| recv_jobs(&recv));
        assert!(matches!(msg, FromJobs::Failed(id, ref reason) if id == fail && reason == "broken"));

        let long = JobId::next();
        jobs.send(ToJobs::Request(long, Box::new(Sleeper(Duration::from_secs(60)))))
            .await
            .unwrap();
        jobs.send(ToJobs::Stop(long)).await.unwrap();
        let msg = tokio::task::block_in_place(|| recv_jobs(&recv));
        assert!(matches!(msg, FromJobs::Stopped(id) if id == long));
    }
}
