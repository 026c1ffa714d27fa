use std::any::Any;

use tokio::sync::mpsc::Sender;

use super::{FromJobs, Kill};
use crate::{events::ToEditor, EditorHandle, JobId};

/// Handed to a running job. Output goes straight to the editor, the runner
/// reports the final outcome itself.
pub struct JobContext {
    pub id: JobId,
    pub kill: Kill,
    pub sender: JobResponseSender,
}

impl JobContext {
    pub fn send<A: Any + Send>(&mut self, any: A) {
        self.sender.send(self.id, any)
    }
}

/// Route from a job back to the editor. Can be split off the context when
/// output is produced on another task.
#[derive(Clone, Debug)]
pub struct JobResponseSender {
    pub(super) editor: EditorHandle,
    /// Outcomes go through the runner so it can forget the job first
    pub(super) outcomes: Sender<FromJobs>,
}

impl JobResponseSender {
    pub(super) fn context(&self, id: JobId) -> JobContext {
        JobContext {
            id,
            kill: Kill::default(),
            sender: self.clone(),
        }
    }

    /// Report how the job ended, `Message` is not an outcome
    pub(super) async fn report(&self, outcome: FromJobs) {
        debug_assert!(!matches!(outcome, FromJobs::Message(..)));
        if self.outcomes.send(outcome).await.is_err() {
            log::debug!("Job runner gone before outcome was reported");
        }
    }

    pub fn send<A: Any + Send>(&mut self, id: JobId, any: A) {
        self.editor
            .send(ToEditor::Jobs(FromJobs::Message(id, Box::new(any))));
    }
}

impl From<JobContext> for JobResponseSender {
    fn from(ctx: JobContext) -> Self {
        ctx.sender
    }
}
