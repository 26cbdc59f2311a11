//! Generation-checked slot arena
//!
//! Engine objects refer to each other (a channel to its ports, a loop to its
//! sync source) by key instead of by pointer. A key carries the generation of
//! the slot it was issued for, so a key to a removed object never resolves
//! to whatever took its slot later.
//!
//! The control side allocates keys in its topology mirror; the process side
//! stores its state under the same keys with [`Arena::insert_at`].

use std::fmt;
use std::marker::PhantomData;

/// Untyped arena key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Strongly typed wrapper around [`Key`]
pub trait ArenaKey: Copy + Eq + fmt::Debug {
    fn from_key(key: Key) -> Self;
    fn key(self) -> Key;
}

impl ArenaKey for Key {
    fn from_key(key: Key) -> Self {
        key
    }

    fn key(self) -> Key {
        self
    }
}

macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Key);

        impl ArenaKey for $name {
            #[inline]
            fn from_key(key: Key) -> Self {
                Self(key)
            }

            #[inline]
            fn key(self) -> Key {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

arena_key!(
    /// Audio or MIDI port (driver-backed or effect-chain-internal)
    PortKey,
    "port"
);
arena_key!(LoopKey, "loop");
arena_key!(ChannelKey, "channel");
arena_key!(
    /// Effect processing chain
    ChainKey,
    "chain"
);
arena_key!(SessionKey, "session");
arena_key!(DriverKey, "driver");

#[derive(Debug, Clone)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

impl<T> Slot<T> {
    fn generation(&self) -> u32 {
        match self {
            Slot::Occupied { generation, .. } | Slot::Vacant { generation, .. } => *generation,
        }
    }
}

/// Slot storage addressed by generation-checked keys
#[derive(Debug, Clone)]
pub struct Arena<K: ArenaKey, T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
            _key: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value` under a fresh key
    pub fn insert(&mut self, value: T) -> K {
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let (generation, next_free) = match *slot {
                    Slot::Vacant { generation, next_free } => (generation, next_free),
                    Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
                };
                *slot = Slot::Occupied { generation, value };
                self.free_head = next_free;
                self.len += 1;
                K::from_key(Key { index, generation })
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    value,
                });
                self.len += 1;
                K::from_key(Key {
                    index,
                    generation: 0,
                })
            }
        }
    }

    /// Store `value` under a key issued by another arena
    ///
    /// Used to mirror a control-side arena. Any value previously stored at
    /// that slot is returned. Grows the slot vector only when `key` lies
    /// beyond it.
    pub fn insert_at(&mut self, key: K, value: T) -> Option<T> {
        let key = key.key();
        let index = key.index;
        while self.slots.len() <= key.index() {
            let free = self.slots.len() as u32;
            self.slots.push(Slot::Vacant {
                generation: 0,
                next_free: self.free_head,
            });
            self.free_head = Some(free);
        }
        if matches!(self.slots[key.index()], Slot::Vacant { .. }) {
            self.unlink_free(index);
        }
        let previous = std::mem::replace(
            &mut self.slots[key.index()],
            Slot::Occupied {
                generation: key.generation,
                value,
            },
        );
        match previous {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => {
                self.len += 1;
                None
            }
        }
    }

    fn unlink_free(&mut self, index: u32) {
        let mut prev: Option<u32> = None;
        let mut cursor = self.free_head;
        while let Some(current) = cursor {
            let next = match self.slots[current as usize] {
                Slot::Vacant { next_free, .. } => next_free,
                Slot::Occupied { .. } => None,
            };
            if current == index {
                match prev {
                    None => self.free_head = next,
                    Some(p) => {
                        if let Slot::Vacant { next_free, .. } = &mut self.slots[p as usize] {
                            *next_free = next;
                        }
                    }
                }
                return;
            }
            prev = Some(current);
            cursor = next;
        }
    }

    /// Remove and return the value under `key`
    pub fn remove(&mut self, key: K) -> Option<T> {
        let key = key.key();
        let slot = self.slots.get_mut(key.index())?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let next_generation = key.generation.wrapping_add(1);
        let previous = std::mem::replace(
            slot,
            Slot::Vacant {
                generation: next_generation,
                next_free: self.free_head,
            },
        );
        self.free_head = Some(key.index);
        self.len -= 1;
        match previous {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let key = key.key();
        match self.slots.get(key.index())? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let key = key.key();
        match self.slots.get_mut(key.index())? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable access to two distinct entries at once
    pub fn get2_mut(&mut self, a: K, b: K) -> (Option<&mut T>, Option<&mut T>) {
        let (ka, kb) = (a.key(), b.key());
        if ka.index == kb.index {
            return (self.get_mut(a), None);
        }
        let (lo, hi, swapped) = if ka.index < kb.index {
            (ka, kb, false)
        } else {
            (kb, ka, true)
        };
        if hi.index() >= self.slots.len() {
            let lo_ref = self.get_mut(K::from_key(lo));
            return if swapped { (None, lo_ref) } else { (lo_ref, None) };
        }
        let (left, right) = self.slots.split_at_mut(hi.index());
        let lo_ref = occupied_mut(&mut left[lo.index()], lo);
        let hi_ref = occupied_mut(&mut right[0], hi);
        if swapped {
            (hi_ref, lo_ref)
        } else {
            (lo_ref, hi_ref)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { generation, value } => Some((
                K::from_key(Key {
                    index: i as u32,
                    generation: *generation,
                }),
                value,
            )),
            Slot::Vacant { .. } => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| {
                let generation = slot.generation();
                match slot {
                    Slot::Occupied { value, .. } => Some((
                        K::from_key(Key {
                            index: i as u32,
                            generation,
                        }),
                        value,
                    )),
                    Slot::Vacant { .. } => None,
                }
            })
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(k, _)| k)
    }
}

fn occupied_mut<T>(slot: &mut Slot<T>, key: Key) -> Option<&mut T> {
    match slot {
        Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_key_does_not_resolve() {
        let mut arena: Arena<LoopKey, &str> = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");
        assert_eq!(a.key().index(), b.key().index());
        assert_ne!(a, b);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_mirror_with_insert_at() {
        let mut control: Arena<PortKey, u32> = Arena::new();
        let k0 = control.insert(0);
        let k1 = control.insert(1);
        control.remove(k0);
        let k2 = control.insert(2);

        let mut mirror: Arena<PortKey, u32> = Arena::with_capacity(4);
        assert_eq!(mirror.insert_at(k2, 20), None);
        assert_eq!(mirror.insert_at(k1, 10), None);
        assert_eq!(mirror.get(k2), Some(&20));
        assert_eq!(mirror.get(k0), None);
        assert_eq!(mirror.len(), 2);

        assert_eq!(mirror.insert_at(k1, 11), Some(10));
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror.remove(k1), Some(11));
        let mut keys: Vec<PortKey> = mirror.keys().collect();
        keys.sort();
        assert_eq!(keys, vec![k2]);
    }

    #[test]
    fn test_insert_at_sparse_then_insert_reuses_gap() {
        let mut arena: Arena<Key, char> = Arena::new();
        let probe = {
            let mut other: Arena<Key, char> = Arena::new();
            other.insert('x');
            other.insert('y');
            other.insert('z')
        };
        arena.insert_at(probe, 'z');
        assert_eq!(arena.len(), 1);
        // The two gap slots below index 2 are reusable
        let a = arena.insert('a');
        let b = arena.insert('b');
        assert!(a.index() < 2 && b.index() < 2);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn test_get2_mut() {
        let mut arena: Arena<ChannelKey, Vec<u8>> = Arena::new();
        let a = arena.insert(vec![1]);
        let b = arena.insert(vec![2]);
        let (ra, rb) = arena.get2_mut(b, a);
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        ra.push(20);
        rb.push(10);
        assert_eq!(arena.get(a), Some(&vec![1, 10]));
        assert_eq!(arena.get(b), Some(&vec![2, 20]));
    }
}
