mod events;
mod id;
mod job_runner;
mod worker;

pub use events::{EditorHandle, ToEditor};
pub use id::{JobId, WorkerId};
pub use job_runner::{
    spawn_job_runner, BoxFuture, BoxedJob, FromJobs, Job, JobContext, JobResponseSender, JobResult,
    JobsHandle, Kill, ToJobs,
};
pub use worker::{
    spawn_worker, FromWorkers, ReadReport, WorkOutcome, Worker, WorkerContext, WorkerHandle,
    WorkerReport, WorkerState, WriteReport, PROGRESS_INTERVAL,
};

pub(crate) const CHANNEL_SIZE: usize = 256;
