use std::{
    marker::PhantomData,
    ops::{Index, IndexMut},
};

/// Declare a key type usable with [`IdMap`].
#[macro_export]
macro_rules! key_type {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Default, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
        $vis struct $name($crate::idmap::ID);

        impl $crate::idmap::AsID for $name {
            fn id(&self) -> $crate::idmap::ID {
                self.0
            }

            fn to_id(id: $crate::idmap::ID) -> Self {
                $name(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}v{}", self.0.index, self.0.generation)
            }
        }
    };
}

pub trait AsID {
    fn id(&self) -> ID;
    fn to_id(id: ID) -> Self;
}

/// Slot index plus the generation the slot had when the value was inserted.
/// A removed value bumps the generation so old keys never resolve to a newer
/// value that reuses the slot.
#[derive(Default, Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ID {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug)]
struct Entry<V> {
    generation: u32,
    value: Option<V>,
}

/// Arena that stores values and returns their id. Slots are reused, ids are
/// not.
#[derive(Debug)]
pub struct IdMap<K: AsID, V> {
    entries: Vec<Entry<V>>,
    free: Vec<u32>,
    len: usize,
    _phantom: PhantomData<K>,
}

impl<K: AsID, V> IdMap<K, V> {
    pub fn insert(&mut self, value: V) -> K {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            return K::to_id(ID {
                index,
                generation: entry.generation,
            });
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        K::to_id(ID {
            index,
            generation: 0,
        })
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let id = key.id();
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }

        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let id = key.id();
        let entry = self.entries.get(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.value.as_ref()
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = key.id();
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.value.as_mut()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> Iter<K, V> {
        Iter {
            iter: self.entries.iter().enumerate(),
            _phantom: PhantomData,
        }
    }
}

impl<K: AsID, V> Index<K> for IdMap<K, V> {
    type Output = V;

    fn index(&self, index: K) -> &Self::Output {
        match self.get(&index) {
            Some(value) => value,
            None => panic!("stale or unknown id {:?}", index.id()),
        }
    }
}

impl<K: AsID, V> IndexMut<K> for IdMap<K, V> {
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        let id = index.id();
        match self.get_mut(&index) {
            Some(value) => value,
            None => panic!("stale or unknown id {:?}", id),
        }
    }
}

pub struct Iter<'a, K: AsID, V> {
    iter: std::iter::Enumerate<std::slice::Iter<'a, Entry<V>>>,
    _phantom: PhantomData<K>,
}

impl<'a, K: AsID, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for (index, entry) in self.iter.by_ref() {
            if let Some(value) = entry.value.as_ref() {
                let id = ID {
                    index: index as u32,
                    generation: entry.generation,
                };
                return Some((K::to_id(id), value));
            }
        }

        None
    }
}

impl<K: AsID, V> Default for IdMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            _phantom: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::key_type!(Key);

    #[test]
    fn reused_slot_does_not_resolve_old_key() {
        let mut map: IdMap<Key, &str> = IdMap::default();
        let a = map.insert("a");
        assert_eq!(map.remove(&a), Some("a"));

        let b = map.insert("b");
        assert_eq!(a.id().index, b.id().index);
        assert_ne!(a, b);
        assert!(map.get(&a).is_none());
        assert_eq!(map[b], "b");
    }

    #[test]
    fn double_remove() {
        let mut map: IdMap<Key, u32> = IdMap::default();
        let a = map.insert(1);
        let _b = map.insert(2);
        assert_eq!(map.remove(&a), Some(1));
        assert_eq!(map.remove(&a), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut map: IdMap<Key, u32> = IdMap::default();
        let a = map.insert(1);
        let b = map.insert(2);
        let c = map.insert(3);
        map.remove(&b);

        let items: Vec<(Key, u32)> = map.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(items, vec![(a, 1), (c, 3)]);
    }
}
