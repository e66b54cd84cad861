//! Sparse ID-keyed resource tables

use std::fmt;

/// Integer handle stored in a [`SlotTable`]
pub trait SlotId: Copy + Eq + fmt::Debug {
    fn from_index(index: u32) -> Self;
    fn index(self) -> u32;
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: Self = Self(u32::MAX);

            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}", self.0)
                } else {
                    write!(f, "invalid")
                }
            }
        }

        impl SlotId for $name {
            fn from_index(index: u32) -> Self {
                Self(index)
            }

            fn index(self) -> u32 {
                self.0
            }
        }
    };
}

define_id!(
    /// Index into the shader table
    ShaderID
);
define_id!(
    /// Index into the material table
    MaterialID
);
define_id!(
    /// Index into the render object table
    RenderID
);
define_id!(
    /// Index into the texture table
    TextureID
);

/// Owning table whose IDs are the lowest free slot at insertion time.
///
/// Removing an entry nulls its slot without moving any other entry, so IDs
/// stay stable for the lifetime of the entry they name. Trailing empty slots
/// are trimmed so a create/destroy pair leaves the table as it found it.
#[derive(Debug, Clone)]
pub struct SlotTable<K: SlotId, T> {
    slots: Vec<Option<T>>,
    len: usize,
    _key: std::marker::PhantomData<K>,
}

impl<K: SlotId, T> Default for SlotTable<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SlotId, T> SlotTable<K, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            _key: std::marker::PhantomData,
        }
    }

    /// The ID the next insertion will receive
    pub fn next_available_id(&self) -> K {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .unwrap_or(self.slots.len());
        K::from_index(index as u32)
    }

    pub fn insert_at_lowest_free(&mut self, value: T) -> K {
        let id = self.next_available_id();
        let index = id.index() as usize;
        if index == self.slots.len() {
            self.slots.push(Some(value));
        } else {
            self.slots[index] = Some(value);
        }
        self.len += 1;
        id
    }

    /// Replace the entry at `id`, growing the table if needed. Returns the
    /// previous occupant.
    pub fn insert_at(&mut self, id: K, value: T) -> Option<T> {
        let index = id.index() as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        let previous = self.slots[index].replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    pub fn get(&self, id: K) -> Option<&T> {
        self.slots.get(id.index() as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: K) -> Option<&mut T> {
        self.slots
            .get_mut(id.index() as usize)
            .and_then(|s| s.as_mut())
    }

    pub fn contains(&self, id: K) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: K) -> Option<T> {
        let removed = self
            .slots
            .get_mut(id.index() as usize)
            .and_then(|s| s.take());
        if removed.is_some() {
            self.len -= 1;
            while matches!(self.slots.last(), Some(None)) {
                self.slots.pop();
            }
        }
        removed
    }

    /// Occupied entries in ascending ID order
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (K::from_index(i as u32), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (K::from_index(i as u32), v)))
    }

    pub fn ids(&self) -> Vec<K> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, occupied or not
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Remove every entry matching `predicate`, returning them in ID order
    pub fn drain_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Vec<(K, T)> {
        let ids: Vec<K> = self
            .iter()
            .filter(|(_, v)| predicate(v))
            .map(|(id, _)| id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|v| (id, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_free_slot_is_reused() {
        let mut table: SlotTable<RenderID, &str> = SlotTable::new();
        let a = table.insert_at_lowest_free("a");
        let b = table.insert_at_lowest_free("b");
        let c = table.insert_at_lowest_free("c");
        assert_eq!((a, b, c), (RenderID(0), RenderID(1), RenderID(2)));

        table.remove(a);
        assert_eq!(table.next_available_id(), RenderID(0));
        assert_eq!(table.get(c), Some(&"c"));
        assert_eq!(table.insert_at_lowest_free("d"), RenderID(0));
    }

    #[test]
    fn test_remove_trims_trailing_slots() {
        let mut table: SlotTable<MaterialID, u32> = SlotTable::new();
        table.insert_at_lowest_free(1);
        let before = (table.slot_count(), table.next_available_id());
        let id = table.insert_at_lowest_free(2);
        table.remove(id);
        assert_eq!((table.slot_count(), table.next_available_id()), before);
    }

    #[test]
    fn test_unknown_id_is_none() {
        let table: SlotTable<ShaderID, u32> = SlotTable::new();
        assert!(table.get(ShaderID(4)).is_none());
        assert!(table.get(ShaderID::INVALID).is_none());
    }

    #[test]
    fn test_drain_where_keeps_others_in_place() {
        let mut table: SlotTable<MaterialID, (bool, &str)> = SlotTable::new();
        table.insert_at_lowest_free((true, "engine"));
        table.insert_at_lowest_free((false, "user"));
        table.insert_at_lowest_free((true, "engine2"));

        let removed = table.drain_where(|(engine, _)| !engine);
        assert_eq!(removed.len(), 1);
        assert_eq!(table.ids(), vec![MaterialID(0), MaterialID(2)]);
    }

    #[test]
    fn test_invalid_display() {
        assert_eq!(RenderID::INVALID.to_string(), "invalid");
        assert_eq!(RenderID(3).to_string(), "3");
    }
}
