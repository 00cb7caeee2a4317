//! Fixed-capacity open-addressed dictionaries.
//!
//! Every aggregate record (symbols, stacks, call-graph edges) lives in one
//! of these tables for the life of the process. The tables never rehash,
//! so a slot index handed out once stays valid forever - that is what lets
//! records point at each other with plain `u32` indices instead of any
//! reference counting.
//!
//! The flip side of the fixed capacity is an explicit failure mode: when a
//! probe sequence exhausts the table, `upsert` reports [`DictionaryFull`]
//! and the caller drops whatever it was recording. With the `strict`
//! feature this traps instead.

/// Keys know how to derive their starting slot.
pub(crate) trait DictKey: Copy + PartialEq {
    fn probe_base(&self) -> u64;
}

impl DictKey for u64 {
    #[inline]
    fn probe_base(&self) -> u64 {
        *self
    }
}

/// The table cannot take another distinct key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DictionaryFull;

/// Result of an upsert: where the entry lives and whether it is new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Upsert {
    pub index: u32,
    pub inserted: bool,
}

struct Slot<K, V> {
    occupied: bool,
    key: K,
    value: V,
}

/// Bounded open-addressed table with linear probing.
pub(crate) struct Dictionary<K, V> {
    slots: Box<[Slot<K, V>]>,
    len: usize,
    lookups: u64,
    probes: u64,
}

impl<K: DictKey + Default, V: Default> Dictionary<K, V> {
    /// Preallocate all slots. Capacity is fixed from here on.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "dictionary capacity must be nonzero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            occupied: false,
            key: K::default(),
            value: V::default(),
        });
        Self {
            slots: slots.into_boxed_slice(),
            len: 0,
            lookups: 0,
            probes: 0,
        }
    }

    /// Find or insert the entry for `key`.
    ///
    /// The returned index is stable for the process lifetime. On a full
    /// table nothing is inserted and the table is left untouched.
    pub fn upsert(&mut self, key: K) -> Result<Upsert, DictionaryFull> {
        let capacity = self.slots.len();
        let base = key.probe_base();
        self.lookups += 1;
        for i in 0..capacity {
            self.probes += 1;
            let index = (base.wrapping_add(i as u64) % capacity as u64) as usize;
            let slot = &mut self.slots[index];
            if !slot.occupied {
                slot.occupied = true;
                slot.key = key;
                self.len += 1;
                return Ok(Upsert {
                    index: index as u32,
                    inserted: true,
                });
            }
            if slot.key == key {
                return Ok(Upsert {
                    index: index as u32,
                    inserted: false,
                });
            }
        }
        #[cfg(feature = "strict")]
        panic!("livealloc: dictionary full ({} slots)", capacity);
        #[cfg(not(feature = "strict"))]
        Err(DictionaryFull)
    }

    /// Look up `key` without inserting.
    pub fn get(&self, key: K) -> Option<u32> {
        let capacity = self.slots.len();
        let base = key.probe_base();
        for i in 0..capacity {
            let index = (base.wrapping_add(i as u64) % capacity as u64) as usize;
            let slot = &self.slots[index];
            if !slot.occupied {
                return None;
            }
            if slot.key == key {
                return Some(index as u32);
            }
        }
        None
    }

    pub fn value(&self, index: u32) -> &V {
        &self.slots[index as usize].value
    }

    pub fn value_mut(&mut self, index: u32) -> &mut V {
        &mut self.slots[index as usize].value
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Mean probe length per lookup since construction.
    pub fn mean_probe_length(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.probes as f64 / self.lookups as f64
    }

    /// Approximate heap footprint of the slot array.
    pub fn footprint(&self) -> usize {
        self.slots.len() * std::mem::size_of::<Slot<K, V>>()
    }
}
