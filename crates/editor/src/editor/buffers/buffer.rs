use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime},
};

use bitflags::bitflags;
use scrivo_core::{modified_time, EndOfLine, Indent, UniMode};
use scrivo_server::{WorkerHandle, WorkerId};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use crate::{document::DocumentRef, frontend::ViewState};

scrivo_utils::key_type!(
    /// Stable identity of a buffer. Stays valid while the buffer lives
    /// regardless of how the slots around it are reordered.
    pub BufferId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, AsRefStr)]
pub enum LifeState {
    /// Slot cleared, no usable content
    #[default]
    Empty,
    /// Load in flight
    Reading,
    /// Content loaded but view state not yet restored
    ReadAll,
    Open,
}

bitflags! {
    /// Work postponed until a buffer is shown
    #[derive(Default)]
    pub struct FutureDo: u8 {
        const FINISH_SAVE = 0b1;
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("a load or save is already in progress")]
    WorkerAttached,
}

#[derive(Debug)]
pub(crate) enum WorkerKind {
    /// Document the loader is filling in
    Loading(DocumentRef),
    Storing { path: PathBuf, visible_progress: bool },
}

/// Worker attached to a buffer while it loads or saves
#[derive(Debug)]
pub(crate) struct FileWorker {
    pub(crate) handle: WorkerHandle,
    pub(crate) kind: WorkerKind,
}

#[derive(Debug)]
pub struct Buffer {
    pub(crate) id: BufferId,
    path: Option<PathBuf>,
    doc: Option<DocumentRef>,
    life_state: LifeState,
    worker: Option<FileWorker>,
    future_do: FutureDo,

    pub is_dirty: bool,
    pub is_read_only: bool,
    /// Last save failed, autosave skips the buffer until the user saves
    pub failed_save: bool,
    pub unicode_mode: UniMode,

    /// Modification time of the file when it was last read or written
    pub file_mod_time: Option<SystemTime>,
    /// Modification time the user was last asked about
    pub file_mod_last_ask: Option<SystemTime>,
    /// Last edit, used by autosave
    pub document_mod_time: Option<Instant>,

    pub view: ViewState,

    pub eol: Option<EndOfLine>,
    pub indent: Option<Indent>,
    pub language: Option<String>,
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer {
            id: BufferId::default(),
            path: None,
            doc: None,
            life_state: LifeState::Empty,
            worker: None,
            future_do: FutureDo::empty(),
            is_dirty: false,
            is_read_only: false,
            failed_save: false,
            unicode_mode: UniMode::default(),
            file_mod_time: None,
            file_mod_last_ask: None,
            document_mod_time: None,
            view: ViewState::default(),
            eol: None,
            indent: None,
            language: None,
        }
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Reset everything except the document
    pub(crate) fn reinit(&mut self) {
        let doc = self.doc.take();
        let id = self.id;
        if let Some(worker) = &self.worker {
            log::warn!(
                "Buffer {id} reinitialised with worker {} attached",
                worker.handle.id()
            );
        }
        *self = Buffer {
            id,
            doc,
            ..Buffer::default()
        };
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.path = path;
    }

    pub fn is_untitled(&self) -> bool {
        self.path.is_none()
    }

    pub fn name(&self) -> String {
        match &self.path {
            Some(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            None => "untitled".into(),
        }
    }

    pub fn life_state(&self) -> LifeState {
        self.life_state
    }

    pub(crate) fn set_life_state(&mut self, state: LifeState) {
        log::debug!("Buffer {} {} -> {}", self.id, self.life_state, state);
        self.life_state = state;
    }

    /// Saving a buffer that is not fully loaded would truncate the file
    pub fn should_not_save(&self) -> bool {
        self.life_state != LifeState::Open
    }

    pub fn document(&self) -> Option<&DocumentRef> {
        self.doc.as_ref()
    }

    /// Replace the document, the previous one is released
    pub(crate) fn set_document(&mut self, doc: DocumentRef) -> Option<DocumentRef> {
        self.doc.replace(doc)
    }

    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref().map(|w| &w.handle)
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker().map(WorkerHandle::id)
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self.worker,
            Some(FileWorker {
                kind: WorkerKind::Loading(_),
                ..
            })
        )
    }

    pub fn is_storing(&self) -> bool {
        matches!(
            self.worker,
            Some(FileWorker {
                kind: WorkerKind::Storing { .. },
                ..
            })
        )
    }

    pub(crate) fn file_worker(&self) -> Option<&FileWorker> {
        self.worker.as_ref()
    }

    fn attach(&mut self, worker: FileWorker) -> Result<(), BufferError> {
        if let Some(current) = &self.worker {
            log::warn!(
                "Buffer {} already has worker {}, refused {}",
                self.id,
                current.handle.id(),
                worker.handle.id()
            );
            return Err(BufferError::WorkerAttached);
        }

        log::debug!("Buffer {} attached worker {}", self.id, worker.handle.id());
        self.worker = Some(worker);
        Ok(())
    }

    pub(crate) fn attach_loader(
        &mut self,
        handle: WorkerHandle,
        doc: DocumentRef,
    ) -> Result<(), BufferError> {
        self.attach(FileWorker {
            handle,
            kind: WorkerKind::Loading(doc),
        })
    }

    pub(crate) fn attach_storer(
        &mut self,
        handle: WorkerHandle,
        path: PathBuf,
        visible_progress: bool,
    ) -> Result<(), BufferError> {
        self.attach(FileWorker {
            handle,
            kind: WorkerKind::Storing {
                path,
                visible_progress,
            },
        })
    }

    /// Detach a loader returning the document it filled
    pub(crate) fn take_loaded_document(&mut self) -> Option<DocumentRef> {
        match self.worker.take() {
            Some(FileWorker {
                kind: WorkerKind::Loading(doc),
                ..
            }) => Some(doc),
            other => {
                self.worker = other;
                None
            }
        }
    }

    /// Finish loading. The buffer is open from now on.
    pub(crate) fn complete_loading(&mut self) {
        self.set_life_state(LifeState::Open);
        if self.is_loading() {
            self.worker = None;
        }
    }

    /// Detach a finished storer returning the path it wrote
    pub(crate) fn complete_storing(&mut self) -> Option<PathBuf> {
        let path = match self.worker.take() {
            Some(FileWorker {
                kind: WorkerKind::Storing { path, .. },
                ..
            }) => Some(path),
            other => {
                self.worker = other;
                None
            }
        };
        self.set_time_from_file();
        path
    }

    /// Cancel an in flight load, blocks until the loader has stopped. The
    /// partially filled document is discarded.
    pub(crate) fn cancel_load(&mut self) {
        if let Some(worker) = &self.worker {
            if let WorkerKind::Loading(_) = worker.kind {
                worker.handle.cancel();
                self.worker = None;
                self.set_life_state(LifeState::Empty);
            }
        }
    }

    /// Cancel a silent background save, blocks until the storer has stopped.
    /// The storer still posts its completion which then finds the buffer.
    pub(crate) fn abandon_automatic_save(&mut self) {
        if let Some(FileWorker {
            handle,
            kind:
                WorkerKind::Storing {
                    visible_progress: false,
                    ..
                },
        }) = &self.worker
        {
            log::info!("Abandoning automatic save of {}", self.name());
            handle.cancel();
        }
    }

    pub fn document_modified(&mut self, now: Instant) {
        self.document_mod_time = Some(now);
    }

    /// Whether autosave should write this buffer
    pub fn needs_save(&self, delay: Duration, now: Instant) -> bool {
        let idle = match self.document_mod_time {
            Some(modified) => now.saturating_duration_since(modified) > delay,
            None => false,
        };

        idle && self.is_dirty && self.worker.is_none() && !self.is_untitled() && !self.failed_save
    }

    /// Remember the current modification time of the file
    pub(crate) fn set_time_from_file(&mut self) {
        self.file_mod_time = self.path.as_deref().and_then(modified_time);
        self.file_mod_last_ask = self.file_mod_time;
        self.document_mod_time = None;
        self.failed_save = false;
    }

    pub fn has_future(&self, fd: FutureDo) -> bool {
        self.future_do.contains(fd)
    }

    pub(crate) fn add_future(&mut self, fd: FutureDo) {
        self.future_do.insert(fd);
    }

    pub(crate) fn finished_future(&mut self, fd: FutureDo) {
        self.future_do.remove(fd);
    }
}
