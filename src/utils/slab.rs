//! Slot arena with a free list and generation-tagged keys.
//!
//! Freed slots go back on the free list and are handed out again by the
//! next insert; the slot's generation is bumped on every removal so a key
//! kept past its removal never aliases the new occupant.

use std::fmt;

/// Stable reference to a slab entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    /// Packs the key into one word for public id types.
    pub(crate) fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        Key {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new(size: usize) -> Self {
        let slots = (0..size)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        // Reversed so the lowest index is handed out first.
        let free = (0..size).rev().collect();

        Self {
            slots,
            free,
            len: 0,
        }
    }

    pub(crate) fn insert(&mut self, item: T) -> Key {
        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            let len = self.slots.len();
            let new_len = if len == 0 { 1 } else { 2 * len };

            self.slots.extend((len..new_len).map(|_| Slot {
                generation: 0,
                value: None,
            }));
            self.free.extend(((len + 1)..new_len).rev());

            len
        };

        let slot = &mut self.slots[index];
        slot.value = Some(item);
        self.len += 1;

        Key {
            index: index as u32,
            generation: slot.generation,
        }
    }

    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }

        let item = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.len -= 1;

        Some(item)
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Number of slots, live or free.
    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}
