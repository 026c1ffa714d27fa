mod buffers;
mod config;
mod file_worker;
mod job_broker;
mod job_queue;
mod jobs;


use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use bitflags::bitflags;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use rustc_hash::FxHashMap;
use scrivo_core::{
    discover_eol, discover_indent, discover_language, modified_time,
    session::{BufferState, Session, SessionError},
    FileDescription,
};
use scrivo_server::{
    spawn_worker, FromJobs, FromWorkers, JobId, ReadReport, ToEditor, WorkOutcome, WorkerId,
    WriteReport,
};
use thiserror::Error;

use crate::{
    document::{DocumentRef, TextSurface},
    frontend::{BackgroundActivities, Frontend, Notice, ViewState},
    runtime::TokioRuntime,
};

use self::{
    file_worker::{FileLoader, FileStorer},
    job_broker::JobBroker,
    jobs::{ProcessOutput, ShellCommand},
};

pub use self::buffers::{Buffer, BufferError, BufferId, BufferList, FutureDo, LifeState};
pub use self::config::EditorConfig;
pub use self::job_queue::{
    Job, JobFlags, JobMode, JobQueue, JobQueueError, JobSubsystem, RunToken, SaveBefore,
};

pub(crate) type Map<K, V> = FxHashMap<K, V>;

/// Number of recently closed files remembered
const RECENT_MAX: usize = 10;

/// Bytes looked at when discovering line endings, indentation and language
const DISCOVERY_LIMIT: usize = 1_000_000;

bitflags! {
    #[derive(Default)]
    pub struct OpenFlags: u8 {
        /// Reload a file that is already open
        const FORCE_LOAD = 0b0001;
        /// Load on the calling thread regardless of size
        const SYNCHRONOUS = 0b0010;
        /// Do not show errors
        const QUIET = 0b0100;
        /// Do not offer to save a dirty buffer that would be replaced
        const NO_SAVE_IF_DIRTY = 0b1000;
    }
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("no free buffer")]
    NoFreeBuffer,
    #[error("{0:?} is a directory")]
    IsDirectory(PathBuf),
    #[error("{path:?} is too large ({size} bytes)")]
    TooLarge { path: PathBuf, size: u64 },
    #[error("buffer has no file name")]
    Untitled,
    #[error("file is not yet loaded")]
    NotLoaded,
    #[error("{0:?} is already open")]
    AlreadyOpen(PathBuf),
    #[error("cancelled by user")]
    Cancelled,
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Jobs(#[from] JobQueueError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How a job dispatched to the job runner ended
#[derive(Debug)]
enum JobEnd {
    Finished,
    Failed(String),
    Stopped,
}

#[derive(Debug)]
struct RunningJob {
    id: JobId,
    job: Job,
    stdout: String,
    exit: Option<i32>,
}

/// State of one execution of the job queue
#[derive(Debug)]
struct ActiveRun {
    token: RunToken,
    running: Option<RunningJob>,
    /// Every finished job exited with 0
    all_ok: bool,
}

/// Owns the buffers and the job queue. All state is changed on the thread
/// that owns the editor, workers and jobs report back through messages.
pub struct Editor {
    config: EditorConfig,
    working_dir: PathBuf,
    surface: Arc<dyn TextSurface>,
    frontend: Box<dyn Frontend>,
    buffers: BufferList,
    /// Recently closed files, most recent first
    recent: Vec<PathBuf>,
    job_queue: JobQueue,
    job_broker: JobBroker,
    run: Option<ActiveRun>,
    receiver: Receiver<ToEditor>,
    runtime: TokioRuntime,
}

impl Editor {
    pub fn new(
        config: EditorConfig,
        surface: Arc<dyn TextSurface>,
        frontend: Box<dyn Frontend>,
        working_dir: PathBuf,
    ) -> anyhow::Result<Editor> {
        let config = config.sanitized();
        let (handle, receiver) = scrivo_server::EditorHandle::channel();
        let runtime = TokioRuntime::new(handle)?;
        let jobs = runtime.spawn_job_runner();

        let mut editor = Editor {
            buffers: BufferList::new(config.buffers),
            job_queue: JobQueue::new(config.job_queue_size),
            job_broker: JobBroker::new(jobs),
            config,
            working_dir,
            surface,
            frontend,
            recent: vec![],
            run: None,
            receiver,
            runtime,
        };

        editor.current_document();
        editor
            .buffers
            .current_buffer_mut()
            .set_life_state(LifeState::Open);
        log::info!(
            "Editor started with {} buffers in {:?}",
            editor.buffers.capacity(),
            editor.working_dir
        );
        Ok(editor)
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn buffers(&self) -> &BufferList {
        &self.buffers
    }

    pub fn current_buffer(&self) -> &Buffer {
        self.buffers.current_buffer()
    }

    /// Document of the current buffer
    pub fn document(&self) -> Option<&DocumentRef> {
        self.buffers.current_buffer().document()
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.job_queue
    }

    pub fn recent_files(&self) -> &[PathBuf] {
        &self.recent
    }

    pub fn frontend_mut(&mut self) -> &mut dyn Frontend {
        self.frontend.as_mut()
    }

    pub fn saving_in_background(&self) -> bool {
        self.buffers.saving_in_background()
    }

    pub fn background_activities(&self) -> BackgroundActivities {
        self.buffers.count_background_activities()
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    fn block_pause(&self) -> Duration {
        Duration::from_millis(self.config.asynchronous_sleep_ms)
    }

    /// Document of the current buffer, created if the buffer has none
    fn current_document(&mut self) -> DocumentRef {
        let buf = self.buffers.current_buffer_mut();
        match buf.document() {
            Some(doc) => doc.clone(),
            None => {
                let doc = DocumentRef::new(self.surface.clone());
                buf.set_document(doc.clone());
                doc
            }
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.frontend.notify(notice);
    }

    fn update_progress(&mut self) {
        let acts = self.buffers.count_background_activities();
        self.frontend.progress(&acts);
    }

    fn add_recent(&mut self, path: PathBuf) {
        self.recent.retain(|p| *p != path);
        self.recent.insert(0, path);
        self.recent.truncate(RECENT_MAX);
    }

    fn remove_recent(&mut self, path: &Path) {
        self.recent.retain(|p| p != path);
    }

    // ------------------------------------------------------------------
    // Messages

    /// Handle one message from a worker or the job runner
    pub fn handle(&mut self, msg: ToEditor) {
        match msg {
            ToEditor::Workers(FromWorkers::Progress(_)) => self.update_progress(),
            ToEditor::Workers(FromWorkers::Read(id, report)) => self.text_read(id, report),
            ToEditor::Workers(FromWorkers::Written(id, report)) => self.text_written(id, report),
            ToEditor::Jobs(msg) => self.handle_job_message(msg),
        }
    }

    /// Handle all pending messages without blocking. Returns the number of
    /// messages handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.receiver.try_recv() {
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    /// Wait for one message and handle it. Returns false on timeout.
    pub fn handle_next(&mut self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => {
                self.handle(msg);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// No loads, saves or commands in progress
    pub fn is_idle(&self) -> bool {
        !self.buffers.has_workers()
            && self.run.is_none()
            && !self.job_queue.is_executing()
            && self.job_broker.is_empty()
    }

    /// Handle messages until nothing is running. Returns whether that
    /// happened before the timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if self.is_idle() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline || !self.handle_next(deadline - now) {
                return self.is_idle();
            }
        }
    }

    // ------------------------------------------------------------------
    // Opening

    /// Open a file into a buffer. A file that is already open is switched
    /// to and only reloaded with [`OpenFlags::FORCE_LOAD`].
    pub fn open(&mut self, path: impl AsRef<Path>, flags: OpenFlags) -> Result<(), EditorError> {
        let path = self.absolute(path.as_ref());
        let quiet = flags.contains(OpenFlags::QUIET);

        let size = match FileDescription::new(&path, &self.working_dir) {
            Ok(desc) if desc.is_dir() => {
                if !quiet {
                    self.notify(Notice::Error(format!("{path:?} is a directory")));
                }
                return Err(EditorError::IsDirectory(path));
            }
            Ok(desc) => Some(desc.size()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(EditorError::Io { path, source: e }),
        };

        let existing = self.buffers.find_by_path(&path, false);
        if let Some(index) = existing {
            self.buffers.set_visible(index, true);
            if let Some(index) = self.buffers.find_by_path(&path, false) {
                self.set_document_at(index, true);
            }
            self.remove_recent(&path);
            if !flags.contains(OpenFlags::FORCE_LOAD) || self.current_buffer().has_worker() {
                return Ok(());
            }
        }

        if !self.can_make_room(!flags.contains(OpenFlags::NO_SAVE_IF_DIRTY)) {
            return Err(EditorError::NoFreeBuffer);
        }

        let file_size = size.unwrap_or(0);
        if self.config.max_file_size > 0 && file_size > self.config.max_file_size {
            let question = format!(
                "{path:?} is {file_size} bytes, larger than the limit of {}. Open anyway?",
                self.config.max_file_size
            );
            if !self.frontend.confirm(&question) {
                return Err(EditorError::TooLarge {
                    path,
                    size: file_size,
                });
            }
        }

        if self.buffers.len() == self.buffers.capacity() {
            // Reuse the current buffer
            let previous = self.current_buffer().path().map(Path::to_path_buf);
            if previous.as_deref() != Some(path.as_path()) {
                if let Some(previous) = previous {
                    self.add_recent(previous);
                }
                self.buffers.current_buffer_mut().reinit();
            }
            self.current_document().clear();
            self.buffers
                .current_buffer_mut()
                .set_life_state(LifeState::Open);
        } else if existing.is_none() || !flags.contains(OpenFlags::FORCE_LOAD) {
            self.new_buffer()?;
        }

        let read_only = self.config.read_only;
        let buf = self.buffers.current_buffer_mut();
        buf.set_path(Some(path.clone()));
        buf.is_read_only = read_only;
        self.remove_recent(&path);

        if size.is_none() {
            log::info!("Opened new file {path:?}");
            self.buffers.current_buffer_mut().set_time_from_file();
            if !quiet {
                self.notify(Notice::Info(format!("New file {path:?}")));
            }
            return Ok(());
        }

        let asynchronous = !flags.contains(OpenFlags::SYNCHRONOUS)
            && file_size > self.config.background_open_size.unwrap_or(0);
        self.open_current_file(file_size, quiet, asynchronous)
    }

    /// Whether a buffer can be used for another file, possibly after saving
    /// the current one
    fn can_make_room(&mut self, may_save_if_dirty: bool) -> bool {
        if self.buffers.is_buffer_available() {
            return true;
        }

        let buf = self.buffers.current_buffer();
        if buf.has_worker() {
            return false;
        }

        if !buf.is_dirty || !may_save_if_dirty {
            return true;
        }

        let question = format!("Save changes to {}?", buf.name());
        if !self.frontend.confirm(&question) {
            return false;
        }
        self.save_current(true, true).is_ok()
    }

    fn open_current_file(
        &mut self,
        size: u64,
        quiet: bool,
        asynchronous: bool,
    ) -> Result<(), EditorError> {
        let buf = self.buffers.current_buffer();
        let Some(path) = buf.path().map(Path::to_path_buf) else {
            return Err(EditorError::Untitled);
        };

        if buf.has_worker() {
            if !quiet {
                let msg = format!("{} is already being loaded or saved", buf.name());
                self.notify(Notice::Warning(msg));
            }
            return Err(BufferError::WorkerAttached.into());
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                if !quiet {
                    self.notify(Notice::Error(format!("Could not open file {path:?}: {e}")));
                }
                return Err(EditorError::Io { path, source: e });
            }
        };

        let buf = self.buffers.current_buffer_mut();
        buf.set_time_from_file();
        buf.set_life_state(LifeState::Reading);
        buf.is_dirty = false;

        let doc = DocumentRef::new(self.surface.clone());
        let loader = FileLoader::new(
            &path,
            Box::new(file),
            size,
            doc.clone(),
            self.config.block_size,
        )
        .with_pause(self.block_pause());

        if !asynchronous {
            let mut loader = loader;
            let report = loader.load_now();
            let index = self.buffers.current();
            self.finish_read(index, doc, report);
            return Ok(());
        }

        log::info!("Loading {:?} in the background", loader.path());
        let current = self.current_document();
        current.set_read_only(true);

        let handle = match spawn_worker(loader, self.runtime.editor_handle()) {
            Ok(handle) => handle,
            Err(e) => {
                current.set_read_only(false);
                self.buffers
                    .current_buffer_mut()
                    .set_life_state(LifeState::Empty);
                self.notify(Notice::Error(format!("Could not start loading {path:?}: {e}")));
                return Err(EditorError::Io { path, source: e });
            }
        };

        self.buffers
            .current_buffer_mut()
            .attach_loader(handle, doc)?;
        self.update_progress();
        Ok(())
    }

    /// Loader finished
    fn text_read(&mut self, id: WorkerId, report: ReadReport) {
        let Some(index) = self.buffers.find_by_worker(id) else {
            log::debug!("Discarding read result of worker {id}, buffer is gone");
            return;
        };

        let doc = self
            .buffers
            .get_mut(index)
            .and_then(Buffer::take_loaded_document);
        if let Some(doc) = doc {
            self.finish_read(index, doc, report);
        }
        self.update_progress();
    }

    fn finish_read(&mut self, index: usize, doc: DocumentRef, report: ReadReport) {
        let is_current = index == self.buffers.current();
        let Some(buf) = self.buffers.get_mut(index) else {
            return;
        };
        buf.unicode_mode = report.unicode_mode;

        match report.outcome {
            WorkOutcome::Completed => {
                buf.set_document(doc);
                buf.set_life_state(LifeState::ReadAll);
                buf.is_dirty = false;
                if is_current {
                    self.complete_open();
                }
            }
            WorkOutcome::Failed(e) => {
                if let Some(current) = buf.document() {
                    current.set_read_only(false);
                }
                buf.set_life_state(LifeState::Empty);
                let msg = format!("Could not open file {}: {e}", buf.name());
                self.notify(Notice::Error(msg));
            }
            WorkOutcome::Cancelled => {
                if let Some(current) = buf.document() {
                    current.set_read_only(false);
                }
                buf.set_life_state(LifeState::Empty);
            }
        }
    }

    /// Finish opening the current buffer once its content is loaded
    fn complete_open(&mut self) {
        let doc = self.current_document();
        let text = doc.text(0..doc.len().min(DISCOVERY_LIMIT));

        let language = discover_language(&text, &self.config.shbang);
        let eol = if self.config.eol_auto {
            discover_eol(&text)
        } else {
            None
        };
        let indent = if self.config.indent_auto {
            discover_indent(&text)
        } else {
            None
        };

        let buf = self.buffers.current_buffer_mut();
        doc.set_read_only(buf.is_read_only);
        buf.language = language;
        buf.eol = eol;
        buf.indent = indent;
        buf.is_dirty = false;
        buf.complete_loading();
        log::info!(
            "Opened {} ({}, eol {:?}, indent {:?}, language {:?})",
            buf.name(),
            buf.unicode_mode,
            buf.eol,
            buf.indent,
            buf.language
        );

        let view = buf.view.clone();
        self.frontend.restore_view(&doc, &view);
    }

    /// Reload the current buffer from disk
    pub fn revert(&mut self) -> Result<(), EditorError> {
        let Some(path) = self.current_buffer().path().map(Path::to_path_buf) else {
            self.current_document().clear();
            self.buffers.current_buffer_mut().is_dirty = false;
            return Ok(());
        };

        let size = FileDescription::new(&path, &self.working_dir)
            .map(|desc| desc.size())
            .map_err(|e| EditorError::Io { path, source: e })?;
        self.open_current_file(size, false, false)
    }

    /// Reload the current buffer if its file changed on disk, asking first
    /// when changes would be lost
    pub fn check_reload(&mut self) {
        if !self.config.load_on_activate {
            return;
        }

        let buf = self.buffers.current_buffer();
        let Some(path) = buf.path().map(Path::to_path_buf) else {
            return;
        };
        if buf.has_worker() {
            return;
        }

        let name = buf.name();
        match modified_time(&path) {
            Some(time) if Some(time) != buf.file_mod_time => {
                if buf.is_dirty || self.config.are_you_sure_on_reload {
                    if buf.file_mod_last_ask == Some(time) {
                        return;
                    }

                    let question = if buf.is_dirty {
                        format!("{name} has been modified outside. Reload and lose your changes?")
                    } else {
                        format!("{name} has been modified outside. Reload it?")
                    };
                    self.buffers.current_buffer_mut().file_mod_last_ask = Some(time);
                    if self.frontend.confirm(&question) {
                        self.reload(&path);
                    }
                } else {
                    self.reload(&path);
                }
            }
            None if buf.file_mod_time.is_some() => {
                let buf = self.buffers.current_buffer_mut();
                buf.file_mod_time = None;
                buf.file_mod_last_ask = None;
                buf.is_dirty = true;
                self.notify(Notice::Warning(format!("{name} has been deleted")));
            }
            _ => {}
        }
    }

    fn reload(&mut self, path: &Path) {
        let flags = OpenFlags::FORCE_LOAD | OpenFlags::NO_SAVE_IF_DIRTY;
        if let Err(e) = self.open(path, flags) {
            log::warn!("Reloading {path:?} failed: {e}");
        }
    }

    // ------------------------------------------------------------------
    // Buffers

    /// Make the current buffer a new untitled one, adding a buffer unless
    /// the current one is an unused untitled buffer. A full list whose
    /// current buffer is still loading or saving has no room.
    pub fn new_buffer(&mut self) -> Result<(), EditorError> {
        if self.buffers.is_single_buffer() {
            if let Some(path) = self.current_buffer().path().map(Path::to_path_buf) {
                self.add_recent(path);
            }
        }

        let buf = self.buffers.current_buffer();
        let unused = self.buffers.len() == 1
            && self.buffers.current() == 0
            && !buf.is_dirty
            && buf.is_untitled()
            && !buf.has_worker();

        if !unused {
            if self.buffers.len() == self.buffers.capacity() && !self.buffers.is_single_buffer() {
                if self.current_buffer().has_worker() {
                    return Err(EditorError::NoFreeBuffer);
                }
                self.close_current(true);
            }
            let index = self.buffers.add().ok_or(EditorError::NoFreeBuffer)?;
            self.buffers.set_current(index);
        }

        let doc = self.current_document();
        doc.clear();
        doc.set_read_only(false);

        let buf = self.buffers.current_buffer_mut();
        buf.set_path(None);
        buf.is_dirty = false;
        buf.failed_save = false;
        buf.is_read_only = false;
        buf.set_life_state(LifeState::Open);
        self.job_queue.is_building = false;
        self.job_queue.is_built = false;
        Ok(())
    }

    /// Close the current buffer. A buffer that is still being saved is
    /// hidden and removed once the save completes.
    pub fn close(&mut self) {
        self.close_current(false);
    }

    fn close_current(&mut self, making_room: bool) {
        self.buffers.current_buffer_mut().cancel_load();
        if let Some(path) = self.current_buffer().path().map(Path::to_path_buf) {
            self.add_recent(path);
        }

        let closing_last = self.buffers.length_visible() == 1
            && !self.buffers.get(0).map_or(false, Buffer::has_worker);

        if self.buffers.is_single_buffer() || closing_last {
            let doc = self.current_document();
            doc.clear();
            doc.set_read_only(false);
            let buf = self.buffers.current_buffer_mut();
            buf.reinit();
            buf.set_life_state(LifeState::Open);
        } else if self.current_buffer().has_worker() {
            if self.buffers.length_visible() == 1 && !self.buffers.is_buffer_available() {
                // Nothing could be shown in its place
                log::info!(
                    "Keeping {} visible until its save completes",
                    self.current_buffer().name()
                );
            } else {
                log::info!(
                    "Hiding {} until its save completes",
                    self.current_buffer().name()
                );
                let current = self.buffers.current();
                self.buffers.set_visible(current, false);
                if self.buffers.length_visible() == 0 {
                    if let Err(e) = self.new_buffer() {
                        log::error!("No buffer to show after hiding: {e}");
                    }
                }
            }
        } else {
            self.buffers.remove_current();
        }

        if !making_room {
            self.show_current();
            self.check_reload();
        }
        self.update_progress();
    }

    /// Close every buffer. Dirty buffers are not saved.
    pub fn close_all(&mut self) {
        while self.buffers.length_visible() > 1 {
            self.close();
        }
        self.close();
    }

    /// Prepare the current buffer for being shown
    fn show_current(&mut self) {
        let doc = self.current_document();
        self.perform_deferred_tasks();

        if self.current_buffer().life_state() == LifeState::ReadAll {
            self.complete_open();
        } else {
            let view = self.current_buffer().view.clone();
            self.frontend.restore_view(&doc, &view);
        }
    }

    fn perform_deferred_tasks(&mut self) {
        let buf = self.buffers.current_buffer_mut();
        if buf.has_future(FutureDo::FINISH_SAVE) {
            if let Some(doc) = buf.document() {
                doc.set_read_only(buf.is_read_only);
            }
            buf.is_dirty = false;
            buf.finished_future(FutureDo::FINISH_SAVE);
        }
    }

    fn set_document_at(&mut self, index: usize, update_stack: bool) {
        if index >= self.buffers.length_visible() || index == self.buffers.current() {
            return;
        }

        self.buffers.set_current(index);
        if update_stack {
            let id = self.buffers.current_id();
            self.buffers.move_to_stack_top(id);
        }
        self.show_current();
    }

    /// Make a visible buffer current
    pub fn switch_to(&mut self, index: usize) {
        self.set_document_at(index, true);
        self.check_reload();
    }

    pub fn next(&mut self) {
        let len = self.buffers.length_visible();
        let next = (self.buffers.current() + 1) % len;
        self.switch_to(next);
    }

    pub fn prev(&mut self) {
        let len = self.buffers.length_visible();
        let prev = (self.buffers.current() + len - 1) % len;
        self.switch_to(prev);
    }

    /// Cycle through buffers in most recently used order. The order is
    /// updated by [`Editor::end_stacked_tabbing`].
    pub fn stack_next(&mut self) {
        let index = self.buffers.stack_next();
        self.set_document_at(index, false);
        self.check_reload();
    }

    pub fn stack_prev(&mut self) {
        let index = self.buffers.stack_prev();
        self.set_document_at(index, false);
        self.check_reload();
    }

    pub fn end_stacked_tabbing(&mut self) {
        self.buffers.commit_stack_selection();
    }

    pub fn move_tab_left(&mut self) {
        let len = self.buffers.length_visible();
        if len < 2 {
            return;
        }
        let current = self.buffers.current();
        let to = (current + len - 1) % len;
        self.buffers.shift_to(current, to);
        self.buffers.set_current(to);
    }

    pub fn move_tab_right(&mut self) {
        let len = self.buffers.length_visible();
        if len < 2 {
            return;
        }
        let current = self.buffers.current();
        let to = (current + 1) % len;
        self.buffers.shift_to(current, to);
        self.buffers.set_current(to);
    }

    // ------------------------------------------------------------------
    // Editing

    /// Called before the user changes the current document
    pub fn document_modified(&mut self) {
        let buf = self.buffers.current_buffer_mut();
        if buf.is_storing() {
            buf.abandon_automatic_save();
            if let Some(doc) = buf.document() {
                if buf.worker().map_or(false, |w| w.is_completed()) {
                    doc.set_read_only(buf.is_read_only);
                }
            }
        }
        buf.is_dirty = true;
        buf.document_modified(Instant::now());
        self.job_queue.is_built = false;
    }

    /// Append text to the current document. Returns false if the document
    /// is read only.
    pub fn append_text(&mut self, text: &str) -> bool {
        if self.current_document().is_read_only() {
            return false;
        }
        self.document_modified();
        self.current_document().append(text.as_bytes());
        true
    }

    // ------------------------------------------------------------------
    // Saving

    /// Save the current buffer. Large documents are saved in the
    /// background, the buffer is marked clean once the save completes.
    pub fn save(&mut self) -> Result<(), EditorError> {
        self.save_current(true, false)
    }

    /// Save the current buffer under a new name
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<(), EditorError> {
        let path = self.absolute(path.as_ref());
        if self.buffers.find_by_path(&path, true).is_some() {
            self.notify(Notice::Error(format!("{path:?} is already open")));
            return Err(EditorError::AlreadyOpen(path));
        }

        let buf = self.buffers.current_buffer_mut();
        buf.set_path(Some(path));
        buf.file_mod_time = None;
        self.save()
    }

    /// Save every visible dirty buffer with a name
    pub fn save_all(&mut self) -> Result<(), EditorError> {
        let current = self.buffers.current();
        let mut result = Ok(());

        for index in 0..self.buffers.length_visible() {
            let needs = self
                .buffers
                .get(index)
                .map_or(false, |buf| buf.is_dirty && !buf.is_untitled());
            if !needs {
                continue;
            }

            self.buffers.set_current(index);
            if let Err(e) = self.save() {
                result = Err(e);
                break;
            }
        }

        let current = current.min(self.buffers.length_visible() - 1);
        self.buffers.set_current(current);
        result
    }

    /// Save buffers that have been idle long enough. Saves are silent.
    pub fn autosave(&mut self, now: Instant) {
        if self.config.autosave_delay_secs == 0 {
            return;
        }

        let delay = Duration::from_secs(self.config.autosave_delay_secs);
        let current = self.buffers.current();
        for index in 0..self.buffers.length_visible() {
            let needs = self
                .buffers
                .get(index)
                .map_or(false, |buf| buf.needs_save(delay, now));
            if !needs {
                continue;
            }

            self.buffers.set_current(index);
            if let Err(e) = self.save_current(false, false) {
                log::warn!("Autosave failed: {e}");
            }
        }
        self.buffers.set_current(current);
    }

    fn save_current(
        &mut self,
        visible_progress: bool,
        force_synchronous: bool,
    ) -> Result<(), EditorError> {
        let buf = self.buffers.current_buffer();
        let name = buf.name();
        let Some(path) = buf.path().map(Path::to_path_buf) else {
            return Err(EditorError::Untitled);
        };

        if buf.should_not_save() {
            self.notify(Notice::Warning(format!("{name} is not yet loaded")));
            return Err(EditorError::NotLoaded);
        }

        if buf.has_worker() {
            self.notify(Notice::Warning(format!("{name} is already being saved")));
            return Err(BufferError::WorkerAttached.into());
        }

        if self.config.save_check_modified_time {
            let disk = modified_time(&path);
            if disk.is_some() && buf.file_mod_time.is_some() && disk != buf.file_mod_time {
                let question = format!("{name} has been modified outside. Overwrite it?");
                if !self.frontend.confirm(&question) {
                    return Err(EditorError::Cancelled);
                }
            }
        }

        let len = self.current_document().len() as u64;
        let synchronous = force_synchronous
            || self.buffers.is_single_buffer()
            || self
                .config
                .background_save_size
                .map_or(false, |max| len <= max);

        let result = self.write_current(&path, synchronous, visible_progress);
        let buf = self.buffers.current_buffer_mut();
        match result {
            Ok(()) => {
                buf.set_time_from_file();
                if synchronous {
                    buf.is_dirty = false;
                }
                Ok(())
            }
            Err(e) => {
                if !buf.failed_save {
                    buf.failed_save = true;
                    self.notify(Notice::Error(format!("Could not save file {path:?}: {e}")));
                }
                Err(EditorError::Io { path, source: e })
            }
        }
    }

    fn write_current(
        &mut self,
        path: &Path,
        synchronous: bool,
        visible_progress: bool,
    ) -> io::Result<()> {
        let doc = self.current_document();
        let file = File::create(path)?;
        let storer = FileStorer::new(
            path,
            Box::new(file),
            doc.snapshot(),
            self.current_buffer().unicode_mode,
            self.config.block_size,
            visible_progress,
        )
        .with_pause(self.block_pause());

        if synchronous {
            let mut storer = storer;
            return match storer.store_now().outcome {
                WorkOutcome::Completed => Ok(()),
                WorkOutcome::Failed(e) => Err(e),
                WorkOutcome::Cancelled => Err(io::ErrorKind::Interrupted.into()),
            };
        }

        log::info!(
            "Saving {:?} in the background, visible: {}",
            storer.path(),
            storer.visible_progress()
        );
        doc.set_read_only(true);
        let handle = match spawn_worker(storer, self.runtime.editor_handle()) {
            Ok(handle) => handle,
            Err(e) => {
                doc.set_read_only(self.current_buffer().is_read_only);
                return Err(e);
            }
        };

        self.buffers
            .current_buffer_mut()
            .attach_storer(handle, path.to_path_buf(), visible_progress)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.update_progress();
        Ok(())
    }

    /// Storer finished
    fn text_written(&mut self, id: WorkerId, report: WriteReport) {
        let Some(index) = self.buffers.find_by_worker(id) else {
            log::warn!("Discarding save result of worker {id}, buffer is gone");
            return;
        };

        let is_current = index == self.buffers.current();
        let visible = self.buffers.is_visible(index);
        let Some(buf) = self.buffers.get_mut(index) else {
            return;
        };
        let saved_path = buf.complete_storing();
        let name = buf.name();
        let read_only = buf.is_read_only;

        match report.outcome {
            WorkOutcome::Completed if !visible => {
                log::info!("Background save of closed {name} completed");
                self.buffers.remove_invisible(index);
            }
            WorkOutcome::Completed => {
                if is_current {
                    if let Some(doc) = buf.document() {
                        doc.set_read_only(read_only);
                    }
                    if saved_path.as_deref() == buf.path() {
                        buf.is_dirty = false;
                    }
                } else {
                    buf.is_dirty = false;
                    buf.failed_save = false;
                    buf.add_future(FutureDo::FINISH_SAVE);
                }
            }
            outcome => {
                if let Some(doc) = buf.document() {
                    doc.set_read_only(read_only);
                }
                if let WorkOutcome::Failed(e) = outcome {
                    buf.failed_save = true;
                    self.notify(Notice::Error(format!("Could not save file {name}: {e}")));
                }
                // A closed buffer comes back so it can be saved elsewhere
                self.buffers.set_visible(index, true);
            }
        }

        self.update_progress();

        if !self.job_queue.is_executing() && self.job_queue.has_command_to_run() {
            self.execute();
        }
    }

    // ------------------------------------------------------------------
    // Sessions

    /// Open buffers and recently closed files
    pub fn session(&self) -> Session {
        let current = self.buffers.current();
        let buffers = self
            .buffers
            .iter_visible()
            .filter_map(|(index, buf)| {
                let path = buf.path()?;
                let mut state = BufferState::new(path);
                state.position = buf.view.position;
                state.scroll = buf.view.scroll;
                state.current = index == current;
                if self.config.session_bookmarks {
                    state.bookmarks = buf.view.bookmarks.clone();
                }
                if self.config.session_folds {
                    state.folds = buf.view.folds.clone();
                }
                Some(state)
            })
            .collect();

        Session {
            buffers,
            recent: self.recent.clone(),
        }
    }

    pub fn save_session(&self, path: impl AsRef<Path>) -> Result<(), EditorError> {
        self.session().save(path.as_ref())?;
        Ok(())
    }

    pub fn load_session(&mut self, path: impl AsRef<Path>) -> Result<(), EditorError> {
        let session = Session::load(path.as_ref())?;
        self.restore_session(session);
        Ok(())
    }

    /// Replace all buffers with the ones of a session
    pub fn restore_session(&mut self, session: Session) {
        self.close_all();

        let mut active = None;
        for state in session.buffers {
            if let Err(e) = self.open(&state.path, OpenFlags::QUIET) {
                log::warn!("Could not restore {:?}: {e}", state.path);
                continue;
            }

            let buf = self.buffers.current_buffer_mut();
            buf.view = ViewState {
                position: state.position,
                scroll: state.scroll,
                bookmarks: state.bookmarks,
                folds: state.folds,
            };
            if state.current {
                active = Some(buf.id());
            }
        }

        self.recent = session.recent;
        self.recent.truncate(RECENT_MAX);

        if let Some(index) = active.and_then(|id| self.buffers.index_of(id)) {
            self.switch_to(index);
        }
    }

    // ------------------------------------------------------------------
    // Jobs

    pub fn add_command(&mut self, job: Job) -> Result<(), EditorError> {
        self.job_queue.add_command(job)?;
        Ok(())
    }

    /// Start running queued commands. Nothing happens while commands are
    /// already running or a file is being saved in the background, the
    /// queue is executed once the save completes.
    pub fn execute(&mut self) {
        if self.run.is_some() || self.job_queue.is_executing() {
            return;
        }

        if !self.job_queue.has_command_to_run() {
            return;
        }

        if self.buffers.saving_in_background() {
            log::debug!("Commands wait for background saves");
            return;
        }

        let token = self.job_queue.begin_run();
        self.run = Some(ActiveRun {
            token,
            running: None,
            all_ok: true,
        });
        self.run_next_job();
    }

    /// Stop the running command. Commands queued after it are not run.
    pub fn stop_execute(&mut self) {
        self.job_queue.cancel();

        let running = self
            .run
            .as_ref()
            .and_then(|run| run.running.as_ref())
            .map(|job| job.id);
        match running {
            // Executing until the process has exited
            Some(id) => self.job_broker.stop(id),
            None => self.finish_run(),
        }
    }

    /// Run a build command, a successful run marks the project built
    pub fn build(&mut self, job: Job) -> Result<(), EditorError> {
        self.job_queue.add_command(job)?;
        self.job_queue.is_building = true;
        self.execute();
        Ok(())
    }

    /// Run a command, building first if the project has not been built
    pub fn go(&mut self, build: Option<Job>, run: Job) -> Result<(), EditorError> {
        if let Some(mut build) = build {
            if !self.job_queue.is_built {
                build.flags |= JobFlags::FORCE_QUEUE;
                self.job_queue.add_command(build)?;
                self.job_queue.is_building = true;
            }
        }
        self.job_queue.add_command(run)?;
        self.execute();
        Ok(())
    }

    /// Run a tool command with a mode string like `subsystem:console,savebefore:no`
    pub fn tool(&mut self, command: &str, mode: &str) -> Result<(), EditorError> {
        let mode = JobMode::parse(mode);

        if mode.subsystem != JobSubsystem::Immediate && self.job_queue.is_executing() {
            self.notify(Notice::Warning(
                "Wait for the running command to finish".into(),
            ));
            return Err(JobQueueError::Busy.into());
        }

        let buf = self.current_buffer();
        if buf.is_dirty && !buf.is_untitled() {
            let save = match mode.save_before {
                SaveBefore::Yes => true,
                SaveBefore::No => false,
                SaveBefore::Prompt => {
                    let question = format!("Save changes to {}?", buf.name());
                    self.frontend.confirm(&question)
                }
            };
            if save {
                self.save()?;
            }
        }

        if mode.is_filter {
            // The command rewrites the file, make sure it is reloaded
            let buf = self.buffers.current_buffer_mut();
            buf.file_mod_time = buf
                .file_mod_time
                .and_then(|t| t.checked_sub(Duration::from_secs(1)));
        }

        if mode.subsystem == JobSubsystem::Immediate {
            if let Some(output) = self.frontend.on_execute(command) {
                self.frontend.output(&output);
            }
            return Ok(());
        }

        let directory = self
            .current_buffer()
            .path()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.working_dir.clone());
        let job = Job::new(command, directory)
            .with_subsystem(mode.subsystem)
            .with_flags(mode.flags);
        self.job_queue.add_command(job)?;
        self.execute();
        Ok(())
    }

    fn run_next_job(&mut self) {
        let Some(token) = self.run.as_ref().map(|run| run.token) else {
            return;
        };

        loop {
            let Some(job) = self.job_queue.next_job(token) else {
                self.finish_run();
                return;
            };

            if !job.flags.contains(JobFlags::QUIET) {
                self.frontend.output(&format!("> {}\n", job.command));
            }

            if job.subsystem.is_frontend() {
                if let Some(output) = self.frontend.on_execute(&job.command) {
                    self.frontend.output(&output);
                }
                continue;
            }

            let input = job
                .flags
                .contains(JobFlags::HAS_INPUT)
                .then(|| job.input.clone());
            let command = ShellCommand::new(&self.config.shell, &job.command, job.directory.clone())
                .input(input)
                .detach(!job.subsystem.is_captured());

            let id = match self.job_broker.request(command, token) {
                Ok(id) => id,
                Err(e) => {
                    log::error!("Failed to start job {:?}: {e}", job.command);
                    self.frontend
                        .output(&format!(">Failed to run {:?}: {e}\n", job.command));
                    if let Some(run) = self.run.as_mut() {
                        run.all_ok = false;
                    }
                    continue;
                }
            };
            log::info!("Running job {id}: {:?}", job.command);
            if let Some(run) = self.run.as_mut() {
                run.running = Some(RunningJob {
                    id,
                    job,
                    stdout: String::new(),
                    exit: None,
                });
            }
            self.job_queue.set_executing(true);
            return;
        }
    }

    fn finish_run(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };

        let cancelled = self.job_queue.is_cancelled(run.token);
        if cancelled {
            self.job_queue.clear_jobs();
        }

        if self.job_queue.is_building {
            self.job_queue.is_building = false;
            self.job_queue.is_built = !cancelled && run.all_ok;
        }

        self.job_queue.set_executing(false);
        log::info!("Job run finished, cancelled: {cancelled}, ok: {}", run.all_ok);
    }

    fn handle_job_message(&mut self, msg: FromJobs) {
        let id = msg.id();
        match msg {
            FromJobs::Message(_, any) => {
                let Ok(output) = any.downcast::<ProcessOutput>() else {
                    return;
                };
                let running = self
                    .run
                    .as_mut()
                    .and_then(|run| run.running.as_mut())
                    .filter(|job| job.id == id);
                let Some(running) = running else {
                    log::debug!("Discarding output of job {id}");
                    return;
                };

                match *output {
                    ProcessOutput::Stdout(text) => {
                        running.stdout.push_str(&text);
                        self.frontend.output(&text);
                    }
                    ProcessOutput::Stderr(text) => self.frontend.output(&text),
                    ProcessOutput::Exit(code) => running.exit = code,
                }
            }
            FromJobs::Successful(_) => self.job_done(id, JobEnd::Finished),
            FromJobs::Failed(_, reason) => self.job_done(id, JobEnd::Failed(reason)),
            FromJobs::Stopped(_) => self.job_done(id, JobEnd::Stopped),
        }
    }

    fn job_done(&mut self, id: JobId, end: JobEnd) {
        let token = self.job_broker.done(id);
        let Some(run) = self.run.as_mut() else {
            log::debug!("Job {id} ended outside of a run: {end:?}");
            return;
        };
        if token != Some(run.token) || run.running.as_ref().map(|job| job.id) != Some(id) {
            log::debug!("Job {id} of an earlier run ended: {end:?}");
            return;
        }
        let Some(running) = run.running.take() else {
            return;
        };

        let captured = running.job.subsystem.is_captured();
        let ok = match end {
            JobEnd::Finished => !captured || running.exit == Some(0),
            _ => false,
        };
        run.all_ok &= ok;
        let token = run.token;

        let quiet = running.job.flags.contains(JobFlags::QUIET);
        match &end {
            JobEnd::Failed(reason) => self
                .frontend
                .output(&format!(">Failed to run {:?}: {reason}\n", running.job.command)),
            JobEnd::Stopped => self.frontend.output(">Stopped\n"),
            JobEnd::Finished if captured && !quiet => match running.exit {
                Some(code) => self.frontend.output(&format!(">Exit code: {code}\n")),
                None => self.frontend.output(">Killed by a signal\n"),
            },
            JobEnd::Finished => {}
        }
        log::info!("Job {id} {:?} ended: {end:?}, exit {:?}", running.job.command, running.exit);

        let replace = running.job.flags & JobFlags::REP_SEL_MASK;
        if replace == JobFlags::REP_SEL_YES
            || (replace == JobFlags::REP_SEL_AUTO && running.exit == Some(0))
        {
            self.frontend.replace_selection(&running.stdout);
        }

        if self.job_queue.is_cancelled(token) {
            self.finish_run();
        } else {
            self.run_next_job();
        }
    }
}
