use crate::profiling::profile_function;
use std::num::NonZeroU64;

/// A generational index into a [`SparseSet`].
///
/// The low 32 bits hold `index + 1` so the whole value is never zero, which
/// keeps `Option<IndexSlot>` the same size as `IndexSlot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexSlot(NonZeroU64);

impl IndexSlot {
    pub fn new(generation: u32, idx: u32) -> Self {
        assert!(idx < u32::MAX, "IndexSlot index out of range: {idx}");
        let bits = ((generation as u64) << 32) | (idx as u64 + 1);
        // The low half is at least 1.
        Self(NonZeroU64::new(bits).unwrap_or(NonZeroU64::MIN))
    }

    pub fn generation(&self) -> u32 {
        (self.0.get() >> 32) as u32
    }

    pub fn index(&self) -> u32 {
        (self.0.get() & u32::MAX as u64) as u32 - 1
    }

    /// Raw encoding, suitable for storing in an atomic.
    pub fn to_bits(self) -> u64 {
        self.0.get()
    }

    /// Inverse of [`IndexSlot::to_bits`]. Returns `None` for zero.
    pub fn from_bits(bits: u64) -> Option<Self> {
        NonZeroU64::new(bits).map(Self)
    }
}

struct Entry<T> {
    generation: u32,
    data: Option<T>,
}

/// Slab storage with generational handles.
///
/// Removing an element bumps the generation of its slot, so stale
/// [`IndexSlot`]s are detected instead of aliasing a newer element.
pub struct SparseSet<T> {
    vec: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseSet<T> {
    pub const fn new() -> Self {
        Self {
            vec: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn push(&mut self, data: T) -> IndexSlot {
        profile_function!();
        self.len += 1;
        if let Some(idx) = self.free.pop() {
            let entry = &mut self.vec[idx as usize];
            entry.data = Some(data);
            IndexSlot::new(entry.generation, idx)
        } else {
            let idx = self.vec.len() as u32;
            self.vec.push(Entry {
                generation: 0,
                data: Some(data),
            });
            IndexSlot::new(0, idx)
        }
    }

    pub fn try_get(&self, idx: IndexSlot) -> Option<&T> {
        self.vec
            .get(idx.index() as usize)
            .filter(|entry| entry.generation == idx.generation())
            .and_then(|entry| entry.data.as_ref())
    }

    pub fn try_remove(&mut self, idx: IndexSlot) -> Option<T> {
        profile_function!();
        let index = idx.index();
        let entry = self.vec.get_mut(index as usize)?;
        if entry.generation != idx.generation() {
            return None;
        }
        let data = entry.data.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(data)
    }

    pub fn remove(&mut self, idx: IndexSlot) -> T {
        match self.try_remove(idx) {
            Some(data) => data,
            None => panic!("invalid generation, use after free!"),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live elements in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.vec.iter().filter_map(|entry| entry.data.as_ref())
    }
}

static_assertions::assert_eq_size!(IndexSlot, Option<IndexSlot>);
