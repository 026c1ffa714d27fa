use scrivo_server::{Job, JobId, JobsHandle, ToJobs};

use super::{job_queue::RunToken, Map};

/// Keeps track of the jobs sent to the job runner and the queue run each
/// belongs to
#[derive(Debug)]
pub(crate) struct JobBroker {
    handle: JobsHandle,
    jobs: Map<JobId, RunToken>,
}

impl JobBroker {
    pub fn new(handle: JobsHandle) -> JobBroker {
        JobBroker {
            handle,
            jobs: Map::default(),
        }
    }

    /// Request a job to be ran. Fails if the job runner has stopped, the
    /// job is not tracked then.
    pub fn request<T>(&mut self, task: T, token: RunToken) -> anyhow::Result<JobId>
    where
        T: Job + Send + Sync + 'static,
    {
        let id = JobId::next();
        if self
            .handle
            .blocking_send(ToJobs::Request(id, Box::new(task)))
            .is_err()
        {
            anyhow::bail!("job runner is not running");
        }
        self.jobs.insert(id, token);
        Ok(id)
    }

    /// Forget a finished job, returns the run it belonged to
    pub fn done(&mut self, id: JobId) -> Option<RunToken> {
        self.jobs.remove(&id)
    }

    /// Ask a job to stop, it is reported as stopped once it has exited
    pub fn stop(&mut self, id: JobId) {
        if self.jobs.contains_key(&id) {
            log::debug!("Stopping job {id}");
            let _ = self.handle.blocking_send(ToJobs::Stop(id));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::editor::{jobs::ShellCommand, JobQueue};

    #[test]
    fn request_to_stopped_runner_fails() {
        let (handle, recv) = mpsc::channel(1);
        drop(recv);
        let mut broker = JobBroker::new(handle);
        let token = JobQueue::new(2).begin_run();

        let job = ShellCommand::new(&["/bin/sh".to_string()], "true", ".".into());
        assert!(broker.request(job, token).is_err());
        assert!(broker.is_empty());
    }

    #[test]
    fn finished_job_returns_its_run() {
        let (handle, mut recv) = mpsc::channel(1);
        let mut broker = JobBroker::new(handle);
        let token = JobQueue::new(2).begin_run();

        let job = ShellCommand::new(&["/bin/sh".to_string()], "true", ".".into());
        let id = broker.request(job, token).unwrap();
        assert!(matches!(recv.try_recv(), Ok(ToJobs::Request(sent, _)) if sent == id));
        assert!(!broker.is_empty());
        assert_eq!(broker.done(id), Some(token));
        assert!(broker.is_empty());
    }
}
