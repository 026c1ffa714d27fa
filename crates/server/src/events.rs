// Events sent to the editor from background threads

use crossbeam::channel::{self, Receiver, Sender};

use crate::{job_runner::FromJobs, worker::FromWorkers};

#[derive(Debug)]
pub enum ToEditor {
    Workers(FromWorkers),
    Jobs(FromJobs),
}

/// Editor handle allows us to communicate with the editor. Posting to it is
/// the only way background work hands results to the editor thread.
#[derive(Clone, Debug)]
pub struct EditorHandle {
    sender: Sender<ToEditor>,
}

impl EditorHandle {
    pub fn new(sender: Sender<ToEditor>) -> EditorHandle {
        EditorHandle { sender }
    }

    /// Create a handle and the receiving end the editor loop reads
    pub fn channel() -> (EditorHandle, Receiver<ToEditor>) {
        let (send, recv) = channel::unbounded();
        (EditorHandle::new(send), recv)
    }

    /// Post a message to the editor. Returns false if the editor has shut
    /// down, in which case the message is dropped.
    pub fn send(&self, msg: ToEditor) -> bool {
        match self.sender.send(msg) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Editor has shut down, dropping {:?}", e.0);
                false
            }
        }
    }
}
