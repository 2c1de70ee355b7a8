use rustc_hash::FxHashMap;
use slotmap::{Key, SlotMap};

struct Slot<V> {
    key: Option<String>,
    value: V,
}

/// Generational arena with an optional string key per entry.
///
/// Ids carry a generation, so an id kept past `remove` never resolves to
/// whatever later lands in the same slot. Keys are unique: inserting a key that
/// is already indexed moves the index entry to the new value and leaves the
/// previous holder keyless.
pub struct HandleTable<K: Key, V> {
    slots: SlotMap<K, Slot<V>>,
    index: FxHashMap<String, K>,
}

impl<K: Key, V> Default for HandleTable<K, V> {
    fn default() -> Self {
        Self {
            slots: SlotMap::with_key(),
            index: FxHashMap::default(),
        }
    }
}

impl<K: Key, V> HandleTable<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Option<String>, value: V) -> K {
        let id = self.slots.insert(Slot {
            key: key.clone(),
            value,
        });
        if let Some(key) = key
            && let Some(previous) = self.index.insert(key, id)
            && let Some(slot) = self.slots.get_mut(previous)
        {
            slot.key = None;
        }
        id
    }

    #[inline(always)]
    pub fn lookup_by_key(&self, key: &str) -> Option<K> {
        self.index.get(key).copied()
    }

    #[inline(always)]
    pub fn get(&self, id: K) -> Option<&V> {
        self.slots.get(id).map(|slot| &slot.value)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: K) -> Option<&mut V> {
        self.slots.get_mut(id).map(|slot| &mut slot.value)
    }

    #[inline(always)]
    pub fn contains(&self, id: K) -> bool {
        self.slots.contains_key(id)
    }

    /// The key recorded for `id`, whether or not it is currently indexed.
    pub fn key_of(&self, id: K) -> Option<&str> {
        self.slots.get(id).and_then(|slot| slot.key.as_deref())
    }

    pub fn remove(&mut self, id: K) -> Option<V> {
        let slot = self.slots.remove(id)?;
        if let Some(key) = slot.key.as_deref()
            && self.index.get(key) == Some(&id)
        {
            self.index.remove(key);
        }
        Some(slot.value)
    }

    /// Drops the key index. Entries keep their recorded keys so they can be
    /// re-indexed with [`HandleTable::register_key`].
    pub fn clear_keys(&mut self) {
        self.index.clear();
    }

    /// Re-indexes `id` under its recorded key. Returns `false` when the entry has
    /// no key or another entry already owns it.
    pub fn register_key(&mut self, id: K) -> bool {
        let Some(key) = self.key_of(id).map(str::to_owned) else {
            return false;
        };
        match self.index.get(&key) {
            Some(owner) if *owner != id => false,
            _ => {
                self.index.insert(key, id);
                true
            }
        }
    }

    pub fn is_indexed(&self, id: K) -> bool {
        self.key_of(id)
            .is_some_and(|key| self.index.get(key) == Some(&id))
    }

    pub fn ids(&self) -> Vec<K> {
        self.slots.keys().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.slots.iter().map(|(id, slot)| (id, &slot.value))
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.index.clear();
        self.slots.drain().map(|(id, slot)| (id, slot.value))
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline(always)]
    pub fn indexed_len(&self) -> usize {
        self.index.len()
    }
}
