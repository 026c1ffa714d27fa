pub(crate) mod document;
pub(crate) mod editor;
pub(crate) mod frontend;
pub(crate) mod runtime;

pub use document::{DocumentHandle, DocumentRef, MemorySurface, TextSurface};
pub use editor::{
    Buffer, BufferError, BufferId, BufferList, Editor, EditorConfig, EditorError, FutureDo, Job,
    JobFlags, JobMode, JobQueue, JobQueueError, JobSubsystem, LifeState, OpenFlags, RunToken,
    SaveBefore,
};
pub use frontend::{BackgroundActivities, Frontend, LogFrontend, Notice, ViewState};
