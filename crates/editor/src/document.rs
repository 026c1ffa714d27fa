//! Documents are owned by a text surface and shared through counted
//! references. A loading worker and the buffer that will receive its result
//! each hold their own [`DocumentRef`], so a document is never freed while a
//! background thread still appends to it.

use std::{
    fmt,
    ops::Range,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rustc_hash::FxHashMap;

/// Handle to a document inside a [`TextSurface`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentHandle(u64);

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc{}", self.0)
    }
}

/// The text editing component documents live in. Implementations must be
/// usable from worker threads.
pub trait TextSurface: Send + Sync + fmt::Debug {
    /// Create a new empty document with one reference
    fn create_document(&self) -> DocumentHandle;
    fn add_ref(&self, doc: DocumentHandle);
    /// Drop one reference, the document is destroyed when none remain
    fn release_document(&self, doc: DocumentHandle);

    fn append(&self, doc: DocumentHandle, bytes: &[u8]);
    fn clear(&self, doc: DocumentHandle);
    fn len(&self, doc: DocumentHandle) -> usize;
    fn text_range(&self, doc: DocumentHandle, range: Range<usize>) -> Vec<u8>;
    /// Immutable copy of the whole document
    fn snapshot(&self, doc: DocumentHandle) -> Arc<[u8]>;

    fn set_read_only(&self, doc: DocumentHandle, read_only: bool);
    fn is_read_only(&self, doc: DocumentHandle) -> bool;
}

/// Counted reference to a document. Cloning adds a reference and dropping
/// releases it.
pub struct DocumentRef {
    surface: Arc<dyn TextSurface>,
    handle: DocumentHandle,
}

impl DocumentRef {
    pub fn new(surface: Arc<dyn TextSurface>) -> DocumentRef {
        let handle = surface.create_document();
        DocumentRef { surface, handle }
    }

    pub fn handle(&self) -> DocumentHandle {
        self.handle
    }

    pub fn append(&self, bytes: &[u8]) {
        self.surface.append(self.handle, bytes);
    }

    pub fn clear(&self) {
        self.surface.clear(self.handle);
    }

    pub fn len(&self) -> usize {
        self.surface.len(self.handle)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn text(&self, range: Range<usize>) -> Vec<u8> {
        self.surface.text_range(self.handle, range)
    }

    pub fn snapshot(&self) -> Arc<[u8]> {
        self.surface.snapshot(self.handle)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.surface.set_read_only(self.handle, read_only);
    }

    pub fn is_read_only(&self) -> bool {
        self.surface.is_read_only(self.handle)
    }
}

impl Clone for DocumentRef {
    fn clone(&self) -> Self {
        self.surface.add_ref(self.handle);
        DocumentRef {
            surface: self.surface.clone(),
            handle: self.handle,
        }
    }
}

impl Drop for DocumentRef {
    fn drop(&mut self) {
        self.surface.release_document(self.handle);
    }
}

impl PartialEq for DocumentRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentRef").field(&self.handle).finish()
    }
}

#[derive(Debug, Default)]
struct Doc {
    text: Vec<u8>,
    refs: usize,
    read_only: bool,
}

#[derive(Debug, Default)]
struct Docs {
    next: u64,
    docs: FxHashMap<DocumentHandle, Doc>,
}

/// Text surface keeping documents in memory
#[derive(Debug, Default)]
pub struct MemorySurface {
    inner: Mutex<Docs>,
}

impl MemorySurface {
    pub fn new() -> MemorySurface {
        MemorySurface::default()
    }

    fn lock(&self) -> MutexGuard<'_, Docs> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live documents
    pub fn document_count(&self) -> usize {
        self.lock().docs.len()
    }

    fn with_doc<T: Default>(&self, doc: DocumentHandle, f: impl FnOnce(&mut Doc) -> T) -> T {
        let mut inner = self.lock();
        match inner.docs.get_mut(&doc) {
            Some(d) => f(d),
            None => {
                log::warn!("Access to released document {doc}");
                T::default()
            }
        }
    }
}

impl TextSurface for MemorySurface {
    fn create_document(&self) -> DocumentHandle {
        let mut inner = self.lock();
        let handle = DocumentHandle(inner.next);
        inner.next += 1;
        inner.docs.insert(
            handle,
            Doc {
                refs: 1,
                ..Doc::default()
            },
        );
        handle
    }

    fn add_ref(&self, doc: DocumentHandle) {
        self.with_doc(doc, |d| d.refs += 1);
    }

    fn release_document(&self, doc: DocumentHandle) {
        let mut inner = self.lock();
        let remove = match inner.docs.get_mut(&doc) {
            Some(d) => {
                d.refs = d.refs.saturating_sub(1);
                d.refs == 0
            }
            None => false,
        };

        if remove {
            inner.docs.remove(&doc);
        }
    }

    fn append(&self, doc: DocumentHandle, bytes: &[u8]) {
        self.with_doc(doc, |d| d.text.extend_from_slice(bytes));
    }

    fn clear(&self, doc: DocumentHandle) {
        self.with_doc(doc, |d| d.text.clear());
    }

    fn len(&self, doc: DocumentHandle) -> usize {
        self.with_doc(doc, |d| d.text.len())
    }

    fn text_range(&self, doc: DocumentHandle, range: Range<usize>) -> Vec<u8> {
        self.with_doc(doc, |d| {
            let end = range.end.min(d.text.len());
            let start = range.start.min(end);
            d.text[start..end].to_vec()
        })
    }

    fn snapshot(&self, doc: DocumentHandle) -> Arc<[u8]> {
        let inner = self.lock();
        match inner.docs.get(&doc) {
            Some(d) => Arc::from(d.text.as_slice()),
            None => Arc::from(&[][..]),
        }
    }

    fn set_read_only(&self, doc: DocumentHandle, read_only: bool) {
        self.with_doc(doc, |d| d.read_only = read_only);
    }

    fn is_read_only(&self, doc: DocumentHandle) -> bool {
        self.with_doc(doc, |d| d.read_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_reference_frees_document() {
        let surface = Arc::new(MemorySurface::new());
        let doc = DocumentRef::new(surface.clone());
        let worker_copy = doc.clone();
        assert_eq!(surface.document_count(), 1);

        drop(doc);
        worker_copy.append(b"still alive");
        assert_eq!(worker_copy.len(), 11);
        assert_eq!(surface.document_count(), 1);

        drop(worker_copy);
        assert_eq!(surface.document_count(), 0);
    }

    #[test]
    fn text_range_is_clamped() {
        let surface = Arc::new(MemorySurface::new());
        let doc = DocumentRef::new(surface);
        doc.append(b"hello");
        assert_eq!(doc.text(1..3), b"el");
        assert_eq!(doc.text(3..100), b"lo");
        assert_eq!(doc.text(10..20), b"");
        assert_eq!(&*doc.snapshot(), b"hello");

        doc.clear();
        assert!(doc.is_empty());
    }

    #[test]
    fn read_only_flag() {
        let surface = Arc::new(MemorySurface::new());
        let doc = DocumentRef::new(surface);
        assert!(!doc.is_read_only());
        doc.set_read_only(true);
        assert!(doc.is_read_only());
    }
}
