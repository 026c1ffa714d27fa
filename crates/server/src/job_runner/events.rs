use std::any::Any;

use super::BoxedJob;
use crate::JobId;

pub enum ToJobs {
    /// Request a new job to ran
    Request(JobId, BoxedJob),
    /// Request to stop a job. The job is told to stop and reported as
    /// stopped once it has actually finished.
    Stop(JobId),
}

#[derive(Debug)]
pub enum FromJobs {
    /// Message from a job. Could be anything.
    Message(JobId, Box<dyn Any + Send>),

    /// Sent when a job succeeds.
    Successful(JobId),

    /// Sent when a job fails with a reason why it failed.
    Failed(JobId, String),

    /// Sent when a job that was asked to stop has finished.
    Stopped(JobId),
}

impl FromJobs {
    pub fn id(&self) -> JobId {
        match self {
            FromJobs::Message(id, _)
            | FromJobs::Successful(id)
            | FromJobs::Failed(id, _)
            | FromJobs::Stopped(id) => *id,
        }
    }
}
