/*! Bit-packed lists with a reserved "absent" value.

A [`BitsNullList`] is a [`BitsList`] that sets one raw value aside as the
null sentinel: reading the sentinel surfaces `None`, writing `None`
stores the sentinel. [`BoolNullList`] is the two-bit specialization used
for optional booleans.
 */

use crate::bits_list::BitsList;

/// A [`BitsList`] where the raw value `null_val` encodes "absent".
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitsNullList {
    list: BitsList,
    null_val: u32,
}

impl BitsNullList {
    /// Create an empty list of `bits`-wide items with `null_val` reserved
    /// as the absent marker.
    ///
    /// New positions produced by extending writes read as absent.
    ///
    /// # Panics
    /// Panics when `null_val` does not fit in `bits` bits.
    #[must_use]
    pub fn new(bits: u32, null_val: u32) -> Self {
        Self::with_capacity(bits, null_val, 0)
    }

    /// Like [`BitsNullList::new`] with storage preallocated for `items`.
    #[must_use]
    pub fn with_capacity(bits: u32, null_val: u32, items: usize) -> Self {
        // Sentinel doubles as the default so extension reads as absent.
        let list = BitsList::with_default(bits, null_val, items);
        assert!(
            null_val <= list.mask(),
            "null sentinel {null_val} does not fit {bits} bits"
        );
        Self { list, null_val }
    }

    /// The reserved raw value.
    #[must_use]
    pub fn null_val(&self) -> u32 {
        self.null_val
    }

    /// Number of items, absent ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True when the list holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Item at `i`, `None` when it holds the sentinel.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<u32> {
        let raw = self.list.get(i);
        (raw != self.null_val).then_some(raw)
    }

    /// Raw item at `i`, sentinel included.
    #[must_use]
    pub fn raw(&self, i: usize) -> u32 {
        self.list.get(i)
    }

    /// True when the item at `i` holds an actual value.
    #[must_use]
    pub fn has_value(&self, i: usize) -> bool {
        self.list.get(i) != self.null_val
    }

    /// Store `v` at `i`; `None` stores the sentinel. Extends like
    /// [`BitsList::set`], filling skipped positions with the sentinel.
    pub fn set(&mut self, i: usize, v: Option<u32>) {
        self.list.set(i, v.unwrap_or(self.null_val));
    }

    /// Append `v`.
    pub fn add(&mut self, v: Option<u32>) {
        self.set(self.len(), v);
    }

    /// Insert `v` at `i`, shifting the tail up.
    pub fn insert(&mut self, i: usize, v: Option<u32>) {
        self.list.insert(i, v.unwrap_or(self.null_val));
    }

    /// Remove the item at `i`, shifting the tail down.
    pub fn remove_at(&mut self, i: usize) {
        self.list.remove_at(i);
    }

    /// Index of the first item equal to `v` (absent items match `None`).
    #[must_use]
    pub fn index_of(&self, v: Option<u32>) -> Option<usize> {
        self.list.index_of(v.unwrap_or(self.null_val))
    }

    /// Index of the last item equal to `v`.
    #[must_use]
    pub fn last_index_of(&self, v: Option<u32>) -> Option<usize> {
        self.list.last_index_of(v.unwrap_or(self.null_val))
    }

    /// True when some item equals `v`.
    #[must_use]
    pub fn contains(&self, v: Option<u32>) -> bool {
        self.index_of(v).is_some()
    }

    /// Iterate items front to back.
    pub fn iter(&self) -> impl Iterator<Item = Option<u32>> + '_ {
        let null = self.null_val;
        self.list.iter().map(move |raw| (raw != null).then_some(raw))
    }

    /// Drop all items.
    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Shrink storage to exactly `len()` items.
    pub fn fit(&mut self) {
        self.list.fit();
    }
}

impl std::fmt::Debug for BitsNullList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Tri-state boolean list: two bits per item, raw values
/// `0 = false, 1 = true, 2 = absent`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BoolNullList {
    inner: BitsNullList,
}

impl BoolNullList {
    const NULL: u32 = 2;

    /// Create an empty tri-state boolean list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: BitsNullList::new(2, Self::NULL),
        }
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when the list holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Item at `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<bool> {
        self.inner.get(i).map(|raw| raw == 1)
    }

    /// True when the item at `i` is not absent.
    #[must_use]
    pub fn has_value(&self, i: usize) -> bool {
        self.inner.has_value(i)
    }

    /// Store `v` at `i`. Extends the list, filling gaps with absent.
    pub fn set(&mut self, i: usize, v: Option<bool>) {
        self.inner.set(i, v.map(u32::from));
    }

    /// Append `v`.
    pub fn add(&mut self, v: Option<bool>) {
        self.inner.add(v.map(u32::from));
    }

    /// Remove the item at `i`.
    pub fn remove_at(&mut self, i: usize) {
        self.inner.remove_at(i);
    }

    /// Drop all items.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl Default for BoolNullList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BoolNullList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries((0..self.len()).map(|i| self.get(i)))
            .finish()
    }
}
