use std::path::PathBuf;

use super::*;

fn named(list: &mut BufferList, name: &str) -> BufferId {
    let index = list.add().unwrap();
    list.set_current(index);
    list.current_buffer_mut()
        .set_path(Some(PathBuf::from(name)));
    list.current_id()
}

fn assert_consistent(list: &BufferList) {
    assert!(list.length_visible() >= 1);
    assert!(list.length_visible() <= list.len());
    assert!(list.len() <= list.capacity());
    assert!(list.current() < list.length_visible());
    assert_eq!(list.stack().len(), list.len());

    for id in list.stack() {
        let index = list.index_of(*id).expect("stack entry without a slot");
        assert_eq!(list.get(index).map(Buffer::id), Some(*id));
    }
}

#[test]
fn starts_with_one_visible_buffer() {
    let list = BufferList::new(4);
    assert_eq!(list.len(), 1);
    assert_eq!(list.length_visible(), 1);
    assert_eq!(list.current(), 0);
    assert!(list.is_buffer_available());
    assert!(!list.is_single_buffer());
    assert_consistent(&list);
}

#[test]
fn single_buffer_list_never_has_room() {
    let list = BufferList::new(1);
    assert!(list.is_single_buffer());
    assert!(!list.is_buffer_available());
}

#[test]
fn add_pushes_stack_top() {
    let mut list = BufferList::new(4);
    let a = named(&mut list, "a");
    let b = named(&mut list, "b");
    assert_eq!(list.stack()[0], b);
    assert_eq!(list.stack()[1], a);
    assert_eq!(list.len(), 3);
    assert_consistent(&list);
}

#[test]
fn add_when_full_reuses_top_slot() {
    let mut list = BufferList::new(2);
    let a = named(&mut list, "a");
    assert!(!list.is_buffer_available());

    let index = list.add().unwrap();
    assert_eq!(index, 1);
    assert_eq!(list.len(), 2);
    assert!(list.by_id(a).is_none());
    assert!(list.get(1).map_or(false, Buffer::is_untitled));
    assert_consistent(&list);
}

#[test]
fn remove_current_keeps_stack_pointing_at_owners() {
    let mut list = BufferList::new(5);
    let a = named(&mut list, "a");
    let b = named(&mut list, "b");
    let c = named(&mut list, "c");

    list.set_current(list.index_of(a).unwrap());
    list.remove_current();

    assert!(list.by_id(a).is_none());
    assert!(!list.stack().contains(&a));
    for (id, name) in [(b, "b"), (c, "c")] {
        let index = list.index_of(id).unwrap();
        assert_eq!(list.get(index).unwrap().path(), Some(PathBuf::from(name).as_path()));
    }
    assert_consistent(&list);
}

#[test]
fn removing_last_buffer_reinitialises_it() {
    let mut list = BufferList::new(3);
    list.current_buffer_mut().set_path(Some(PathBuf::from("x")));
    list.current_buffer_mut().is_dirty = true;
    let id = list.current_id();

    list.remove_current();
    assert_eq!(list.len(), 1);
    assert_eq!(list.current_id(), id);
    assert!(list.current_buffer().is_untitled());
    assert!(!list.current_buffer().is_dirty);
}

#[test]
fn hide_and_show() {
    let mut list = BufferList::new(4);
    let _a = named(&mut list, "a");
    let b = named(&mut list, "b");
    let c = named(&mut list, "c");
    assert_eq!(list.length_visible(), 4);

    let index = list.index_of(b).unwrap();
    list.set_visible(index, false);
    assert_eq!(list.length_visible(), 3);
    let hidden = list.index_of(b).unwrap();
    assert!(!list.is_visible(hidden));
    assert!(list.is_visible(list.index_of(c).unwrap()));
    assert!(list.current() < list.length_visible());

    list.set_visible(hidden, true);
    assert_eq!(list.length_visible(), 4);
    assert!(list.is_visible(list.index_of(b).unwrap()));
    assert_consistent(&list);
}

#[test]
fn add_lands_before_invisible_slots() {
    let mut list = BufferList::new(4);
    let a = named(&mut list, "a");
    let index = list.index_of(a).unwrap();
    list.set_visible(index, false);

    let index = list.add().unwrap();
    assert_eq!(index, 1);
    assert_eq!(list.length_visible(), 2);
    assert!(!list.is_visible(list.index_of(a).unwrap()));
    assert_consistent(&list);
}

#[test]
fn remove_invisible_frees_slot() {
    let mut list = BufferList::new(3);
    let a = named(&mut list, "a");
    let _b = named(&mut list, "b");
    let index = list.index_of(a).unwrap();
    list.set_visible(index, false);
    assert_eq!(list.length_visible(), 2);

    list.remove_invisible(list.index_of(a).unwrap());
    assert_eq!(list.len(), 2);
    assert!(list.by_id(a).is_none());
    assert_consistent(&list);
}

#[test]
fn stack_cycling_and_commit() {
    let mut list = BufferList::new(4);
    let first = list.current_id();
    let a = named(&mut list, "a");
    let b = named(&mut list, "b");

    // b, a, first
    let index = list.stack_next();
    assert_eq!(list.id_at(index), Some(a));
    let index = list.stack_next();
    assert_eq!(list.id_at(index), Some(first));
    let index = list.stack_prev();
    assert_eq!(list.id_at(index), Some(a));

    list.commit_stack_selection();
    assert_eq!(list.stack(), &[a, b, first]);
}

#[test]
fn stack_cycling_skips_invisible() {
    let mut list = BufferList::new(4);
    let first = list.current_id();
    let a = named(&mut list, "a");
    let _b = named(&mut list, "b");
    list.set_visible(list.index_of(a).unwrap(), false);

    let index = list.stack_next();
    assert_eq!(list.id_at(index), Some(first));
}

#[test]
fn shift_and_find() {
    let mut list = BufferList::new(4);
    let a = named(&mut list, "a");
    let b = named(&mut list, "b");

    list.shift_to(list.index_of(b).unwrap(), 0);
    assert_eq!(list.id_at(0), Some(b));
    assert_eq!(list.find_by_path("a", false), list.index_of(a));
    assert_eq!(list.find_by_path("zzz", false), None);

    list.set_current(list.index_of(a).unwrap());
    assert_eq!(list.find_by_path("a", true), None);
}

#[test]
fn futures() {
    let mut list = BufferList::new(2);
    list.add_future(0, FutureDo::FINISH_SAVE);
    assert!(list.current_buffer().has_future(FutureDo::FINISH_SAVE));
    list.finished_future(0, FutureDo::FINISH_SAVE);
    assert!(!list.current_buffer().has_future(FutureDo::FINISH_SAVE));
}

#[test]
fn idle_list_has_no_activity() {
    let list = BufferList::new(2);
    assert!(list.count_background_activities().is_idle());
    assert!(!list.saving_in_background());
    assert!(!list.has_workers());
}

/// Small deterministic generator for operation sequences
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[test]
fn random_add_remove_keeps_stack_valid() {
    for seed in 0..50 {
        let mut rng = Lcg(seed);
        let mut list = BufferList::new(1 + rng.next(8));
        let mut counter = 0;

        for _ in 0..200 {
            match rng.next(5) {
                0 | 1 => {
                    counter += 1;
                    named(&mut list, &format!("f{counter}"));
                }
                2 => {
                    let index = rng.next(list.length_visible());
                    list.set_current(index);
                    list.remove_current();
                }
                3 => {
                    let index = list.stack_next();
                    list.set_current(index);
                }
                _ => list.commit_stack_selection(),
            }
            assert_consistent(&list);
        }
    }
}
