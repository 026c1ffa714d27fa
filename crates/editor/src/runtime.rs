use std::future::Future;

use tokio::runtime::{Builder, Runtime};

use scrivo_server::{spawn_job_runner, EditorHandle, JobsHandle};

#[derive(Debug)]
pub(crate) struct TokioRuntime {
    /// Tokio runtime
    tokio: Runtime,

    /// Handle to send messages to editor
    /// Spawned tasks need to communicate somehow
    handle: EditorHandle,
}

impl TokioRuntime {
    pub fn new(handle: EditorHandle) -> std::io::Result<TokioRuntime> {
        let tokio = Builder::new_multi_thread()
            .thread_name("scrivo-jobs")
            .enable_all()
            .build()?;
        Ok(TokioRuntime { tokio, handle })
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.tokio.block_on(fut)
    }

    /// Start the job runner on this runtime
    pub fn spawn_job_runner(&self) -> JobsHandle {
        let handle = self.editor_handle();
        self.block_on(spawn_job_runner(handle))
    }

    pub fn editor_handle(&self) -> EditorHandle {
        self.handle.clone()
    }
}
