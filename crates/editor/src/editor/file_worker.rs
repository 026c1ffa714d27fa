//! Loading and saving files in blocks.
//!
//! Both workers can run on a worker thread or inline on the editor thread,
//! the block loop is the same.

use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use scrivo_core::{coding_cookie_value, split_point, Decoder, Encoder, UniMode};
use scrivo_server::{ReadReport, WorkOutcome, Worker, WorkerContext, WorkerReport, WriteReport};

use crate::document::DocumentRef;

/// Progress sink for the block loops
trait Progress {
    fn is_cancelling(&self) -> bool;
    fn set_size(&mut self, size: u64);
    fn increment(&mut self, amount: u64);
}

impl Progress for WorkerContext {
    fn is_cancelling(&self) -> bool {
        WorkerContext::is_cancelling(self)
    }

    fn set_size(&mut self, size: u64) {
        WorkerContext::set_size(self, size)
    }

    fn increment(&mut self, amount: u64) {
        self.increment_progress(amount)
    }
}

/// Used when running on the editor thread, never cancelled
struct Inline;

impl Progress for Inline {
    fn is_cancelling(&self) -> bool {
        false
    }

    fn set_size(&mut self, _size: u64) {}

    fn increment(&mut self, _amount: u64) {}
}

/// Fill `buf` as far as possible, returns less only at end of input
fn read_block(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decodes a file into a document
pub(crate) struct FileLoader {
    path: PathBuf,
    source: Box<dyn Read + Send>,
    size: u64,
    doc: DocumentRef,
    block_size: usize,
    pause: Duration,
}

impl FileLoader {
    pub fn new(
        path: impl Into<PathBuf>,
        source: Box<dyn Read + Send>,
        size: u64,
        doc: DocumentRef,
        block_size: usize,
    ) -> FileLoader {
        FileLoader {
            path: path.into(),
            source,
            size,
            doc,
            block_size: block_size.max(1),
            pause: Duration::ZERO,
        }
    }

    /// Sleep after each block
    pub fn with_pause(mut self, pause: Duration) -> FileLoader {
        self.pause = pause;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load on the calling thread
    pub fn load_now(&mut self) -> ReadReport {
        self.load(&mut Inline)
    }

    fn load(&mut self, progress: &mut dyn Progress) -> ReadReport {
        progress.set_size(self.size);

        let mut decoder = Decoder::new();
        let mut block = vec![0u8; self.block_size];
        let mut out = Vec::with_capacity(self.block_size);
        let mut cookie = None;

        let outcome = loop {
            if progress.is_cancelling() {
                break WorkOutcome::Cancelled;
            }

            let n = match read_block(&mut self.source, &mut block) {
                Ok(n) => n,
                Err(e) => break WorkOutcome::Failed(e),
            };

            out.clear();
            if n == 0 {
                decoder.finish(&mut out);
                self.doc.append(&out);
                break WorkOutcome::Completed;
            }

            if cookie.is_none() {
                cookie = Some(coding_cookie_value(&block[..n]));
            }

            decoder.decode(&block[..n], &mut out);
            self.doc.append(&out);
            progress.increment(n as u64);

            if !self.pause.is_zero() {
                thread::sleep(self.pause);
            }
        };

        let mut unicode_mode = decoder.mode();
        if unicode_mode == UniMode::Raw8Bit {
            unicode_mode = cookie.unwrap_or_default();
        }

        log::debug!(
            "Loaded {:?} as {unicode_mode}: {outcome:?}",
            self.path
        );
        ReadReport {
            outcome,
            unicode_mode,
        }
    }
}

impl Worker for FileLoader {
    fn execute(&mut self, ctx: &mut WorkerContext) -> WorkerReport {
        WorkerReport::Read(self.load(ctx))
    }
}

/// Writes a snapshot of a document to a file
pub(crate) struct FileStorer {
    path: PathBuf,
    sink: Box<dyn Write + Send>,
    text: Arc<[u8]>,
    encoder: Encoder,
    block_size: usize,
    pause: Duration,
    visible_progress: bool,
}

impl FileStorer {
    pub fn new(
        path: impl Into<PathBuf>,
        sink: Box<dyn Write + Send>,
        text: Arc<[u8]>,
        mode: UniMode,
        block_size: usize,
        visible_progress: bool,
    ) -> FileStorer {
        FileStorer {
            path: path.into(),
            sink,
            text,
            encoder: Encoder::new(mode),
            block_size: block_size.max(1),
            pause: Duration::ZERO,
            visible_progress,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> FileStorer {
        self.pause = pause;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the save is shown in the progress aggregate
    pub fn visible_progress(&self) -> bool {
        self.visible_progress
    }

    pub fn store_now(&mut self) -> WriteReport {
        self.store(&mut Inline)
    }

    fn store(&mut self, progress: &mut dyn Progress) -> WriteReport {
        let len = self.text.len();
        progress.set_size(len as u64);

        let mut out = Vec::with_capacity(self.block_size * 2);
        let mut pos = 0;

        let outcome = loop {
            if progress.is_cancelling() {
                break WorkOutcome::Cancelled;
            }

            if pos >= len {
                // Byte order mark of an empty document
                out.clear();
                self.encoder.encode(&[], &mut out);
                if let Err(e) = self.sink.write_all(&out).and_then(|_| self.sink.flush()) {
                    break WorkOutcome::Failed(e);
                }
                break WorkOutcome::Completed;
            }

            let end = pos + split_point(&self.text[pos..], self.block_size);
            out.clear();
            self.encoder.encode(&self.text[pos..end], &mut out);
            if let Err(e) = self.sink.write_all(&out) {
                break WorkOutcome::Failed(e);
            }

            progress.increment((end - pos) as u64);
            pos = end;

            if !self.pause.is_zero() {
                thread::sleep(self.pause);
            }
        };

        log::debug!("Stored {:?}: {outcome:?}", self.path);
        WriteReport { outcome }
    }
}

impl Worker for FileStorer {
    fn execute(&mut self, ctx: &mut WorkerContext) -> WorkerReport {
        WorkerReport::Written(self.store(ctx))
    }
}
