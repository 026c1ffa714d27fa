//! Fixed capacity list of buffers.
//!
//! Slots `[0, length_visible)` are shown to the user, slots after that are
//! invisible buffers that are kept alive until their background save
//! completes. The most recently used stack refers to buffers by id so slot
//! compaction never invalidates it.

mod buffer;

#[cfg(test)]
mod tests;

use std::path::Path;

use scrivo_server::WorkerId;
use scrivo_utils::idmap::IdMap;

use crate::frontend::BackgroundActivities;

pub use self::buffer::{Buffer, BufferError, BufferId, FutureDo, LifeState};
pub(crate) use self::buffer::WorkerKind;

#[derive(Debug)]
pub struct BufferList {
    buffers: IdMap<BufferId, Buffer>,
    /// Slot order
    slots: Vec<BufferId>,
    length_visible: usize,
    current: usize,
    /// Most recently used first
    stack: Vec<BufferId>,
    /// Position in the stack while cycling
    stack_current: usize,
    capacity: usize,
}

impl BufferList {
    /// Create a list with one empty visible buffer
    pub fn new(capacity: usize) -> BufferList {
        let mut list = BufferList {
            buffers: IdMap::default(),
            slots: Vec::with_capacity(capacity),
            length_visible: 0,
            current: 0,
            stack: Vec::with_capacity(capacity),
            stack_current: 0,
            capacity: capacity.max(1),
        };
        let id = list.insert(Buffer::new());
        list.slots.push(id);
        list.stack.push(id);
        list.length_visible = 1;
        list
    }

    fn insert(&mut self, buf: Buffer) -> BufferId {
        let id = self.buffers.insert(buf);
        self.buffers[id].id = id;
        id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of used slots, visible or not
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn length_visible(&self) -> usize {
        self.length_visible
    }

    pub fn is_single_buffer(&self) -> bool {
        self.capacity == 1
    }

    /// Whether a new buffer can be added without reusing one
    pub fn is_buffer_available(&self) -> bool {
        self.capacity > 1 && self.len() < self.capacity
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_id(&self) -> BufferId {
        self.slots[self.current]
    }

    pub fn current_buffer(&self) -> &Buffer {
        &self.buffers[self.slots[self.current]]
    }

    pub fn current_buffer_mut(&mut self) -> &mut Buffer {
        let id = self.slots[self.current];
        &mut self.buffers[id]
    }

    /// Make a visible slot current
    pub fn set_current(&mut self, index: usize) -> bool {
        if index >= self.length_visible {
            log::warn!(
                "Tried to make slot {index} current, only {} visible",
                self.length_visible
            );
            return false;
        }
        self.current = index;
        true
    }

    pub fn id_at(&self, index: usize) -> Option<BufferId> {
        self.slots.get(index).copied()
    }

    pub fn index_of(&self, id: BufferId) -> Option<usize> {
        self.slots.iter().position(|slot| *slot == id)
    }

    pub fn get(&self, index: usize) -> Option<&Buffer> {
        let id = self.slots.get(index)?;
        self.buffers.get(id)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Buffer> {
        let id = self.slots.get(index)?;
        self.buffers.get_mut(id)
    }

    pub fn by_id(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(&id)
    }

    pub fn by_id_mut(&mut self, id: BufferId) -> Option<&mut Buffer> {
        self.buffers.get_mut(&id)
    }

    /// Buffers in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Buffer)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, id)| (i, &self.buffers[*id]))
    }

    pub fn iter_visible(&self) -> impl Iterator<Item = (usize, &Buffer)> {
        self.iter().take(self.length_visible)
    }

    pub fn is_visible(&self, index: usize) -> bool {
        index < self.length_visible
    }

    /// Add a new visible buffer and return its slot. When the list is full
    /// the highest slot without a worker is reinitialised and reused, a list
    /// where every buffer has a worker has no room.
    pub fn add(&mut self) -> Option<usize> {
        let index = if self.len() < self.capacity {
            let id = self.insert(Buffer::new());
            self.slots.push(id);
            self.slots.len() - 1
        } else {
            let index = self
                .slots
                .iter()
                .rposition(|id| !self.buffers[*id].has_worker())?;
            let old = self.slots[index];
            // A new identity so stale references to the old buffer miss
            let mut buf = self.buffers.remove(&old).unwrap_or_default();
            buf.reinit();
            let id = self.insert(buf);
            self.slots[index] = id;
            self.stack.retain(|s| *s != old);
            index
        };

        let id = self.slots[index];
        self.move_to_stack_top(id);
        if self.is_visible(index) {
            return Some(index);
        }
        self.set_visible(index, true);
        Some(self.length_visible - 1)
    }

    /// Remove the current buffer. The last remaining buffer is reinitialised
    /// instead.
    pub fn remove_current(&mut self) {
        self.commit_stack_selection();

        if self.len() == 1 {
            let id = self.slots[0];
            self.buffers[id].reinit();
            self.length_visible = 1;
            self.current = 0;
            return;
        }

        let index = self.current;
        let id = self.slots.remove(index);
        self.stack.retain(|s| *s != id);
        if let Some(buf) = self.buffers.remove(&id) {
            if let Some(worker) = buf.worker() {
                log::warn!("Removed buffer {id} with worker {} attached", worker.id());
            }
        }

        if index < self.length_visible {
            self.length_visible -= 1;
        }

        if self.length_visible == 0 {
            // Only invisible buffers remain, show one rather than none
            self.length_visible = 1;
        }

        if self.current >= self.length_visible {
            self.current = self.length_visible - 1;
        }

        let top = self.slots[self.current];
        self.move_to_stack_top(top);
    }

    /// Remove a buffer that is not shown
    pub fn remove_invisible(&mut self, index: usize) {
        if index >= self.len() {
            return;
        }

        if index == self.current {
            self.remove_current();
            return;
        }

        debug_assert!(!self.is_visible(index));
        let id = self.slots.remove(index);
        self.stack.retain(|s| *s != id);
        self.buffers.remove(&id);
        log::debug!("Removed invisible buffer {id}");
    }

    /// Show or hide a slot by swapping it with the first invisible or last
    /// visible slot
    pub fn set_visible(&mut self, index: usize, visible: bool) {
        if index >= self.len() || visible == self.is_visible(index) {
            return;
        }

        if visible {
            if index > self.length_visible {
                self.swap(index, self.length_visible);
            }
            self.length_visible += 1;
        } else {
            if index < self.length_visible - 1 {
                self.swap(index, self.length_visible - 1);
            }
            self.length_visible -= 1;
            if self.current >= self.length_visible && self.length_visible > 0 {
                self.current = self.length_visible - 1;
            }
        }
    }

    /// Swap two slots
    pub fn swap(&mut self, first: usize, second: usize) {
        if first < self.len() && second < self.len() {
            self.slots.swap(first, second);
        }
    }

    /// Move a slot to another position shifting the slots between
    pub fn shift_to(&mut self, from: usize, to: usize) {
        if from >= self.length_visible || to >= self.length_visible || from == to {
            return;
        }
        let id = self.slots.remove(from);
        self.slots.insert(to, id);
    }

    pub fn move_to_stack_top(&mut self, id: BufferId) {
        self.stack.retain(|s| *s != id);
        self.stack.insert(0, id);
    }

    /// Most recently used first
    pub fn stack(&self) -> &[BufferId] {
        &self.stack
    }

    fn stack_step(&mut self, forward: bool) -> usize {
        let len = self.stack.len();
        for _ in 0..len {
            self.stack_current = if forward {
                (self.stack_current + 1) % len
            } else {
                (self.stack_current + len - 1) % len
            };

            let id = self.stack[self.stack_current];
            if let Some(index) = self.index_of(id) {
                if self.is_visible(index) {
                    return index;
                }
            }
        }
        self.current
    }

    /// Step to the next less recently used visible buffer and return its
    /// slot. The stack itself is not changed until the selection is
    /// committed.
    pub fn stack_next(&mut self) -> usize {
        self.stack_step(true)
    }

    pub fn stack_prev(&mut self) -> usize {
        self.stack_step(false)
    }

    /// Move the buffer selected while cycling to the top of the stack
    pub fn commit_stack_selection(&mut self) {
        if let Some(id) = self.stack.get(self.stack_current).copied() {
            self.move_to_stack_top(id);
        }
        self.stack_current = 0;
    }

    /// Find a slot by file path
    pub fn find_by_path(&self, path: impl AsRef<Path>, exclude_current: bool) -> Option<usize> {
        let path = path.as_ref();
        self.iter()
            .filter(|(i, _)| !exclude_current || *i != self.current)
            .find(|(_, buf)| buf.path() == Some(path))
            .map(|(i, _)| i)
    }

    /// Find the slot whose buffer has the worker attached
    pub fn find_by_worker(&self, worker: WorkerId) -> Option<usize> {
        self.iter()
            .find(|(_, buf)| buf.worker_id() == Some(worker))
            .map(|(i, _)| i)
    }

    /// Sum up the progress of loads and saves. Silent saves are not counted.
    pub fn count_background_activities(&self) -> BackgroundActivities {
        let mut acts = BackgroundActivities::default();

        for (_, buf) in self.iter() {
            let Some(worker) = buf.file_worker() else {
                continue;
            };
            if worker.handle.is_completed() {
                continue;
            }

            match worker.kind {
                WorkerKind::Loading(_) => acts.loaders += 1,
                WorkerKind::Storing {
                    visible_progress, ..
                } => {
                    if !visible_progress {
                        continue;
                    }
                    acts.storers += 1;
                }
            }

            let state = worker.handle.state();
            acts.total_work += state.size();
            acts.total_progress += state.progress();
            acts.file_name = Some(buf.name());
        }

        acts
    }

    pub fn saving_in_background(&self) -> bool {
        self.iter().any(|(_, buf)| {
            buf.file_worker().map_or(false, |worker| {
                matches!(worker.kind, WorkerKind::Storing { .. }) && !worker.handle.is_completed()
            })
        })
    }

    /// Whether some buffer still has a worker attached
    pub fn has_workers(&self) -> bool {
        self.iter().any(|(_, buf)| buf.has_worker())
    }

    pub fn add_future(&mut self, index: usize, fd: FutureDo) {
        if let Some(buf) = self.get_mut(index) {
            buf.add_future(fd);
        }
    }

    pub fn finished_future(&mut self, index: usize, fd: FutureDo) {
        if let Some(buf) = self.get_mut(index) {
            buf.finished_future(fd);
        }
    }
}
