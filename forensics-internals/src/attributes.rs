//! Packed key/value attribute storage.
//!
//! All keys and values live back to back in one byte region, in insertion
//! order, each followed by a NUL byte:
//!
//! ```text
//! | key0 \0 value0 \0 | key1 \0 value1 \0 | ... | unused |
//! ```
//!
//! A separate index array records where each key and value starts. Removing
//! an entry shifts every later byte left over the hole and rebases the
//! later index entries, so the occupied prefix is always contiguous.

use core::fmt;

use crate::{
    buffer::{AllocError, Allocator, FixedBuffer},
    util,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Span {
    start: usize,
    len: usize,
}

impl Span {
    #[inline]
    fn end(self) -> usize {
        self.start + self.len
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Entry {
    key: Span,
    value: Span,
}

impl Entry {
    /// Bytes this entry occupies in the region, terminators included.
    #[inline]
    fn footprint(&self) -> usize {
        self.key.len + 1 + self.value.len + 1
    }
}

/// Bytes an attribute needs in the region, or `usize::MAX` on overflow.
#[inline]
fn packed_size(key: &str, value: &str) -> usize {
    key.len()
        .saturating_add(value.len())
        .saturating_add(2)
}

/// Error returned when an attribute does not fit the configured capacity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttributeError {
    /// Every index slot is taken and the key is not already present.
    TooManyAttributes {
        /// The configured maximum number of attributes.
        capacity: usize,
    },
    /// The byte region cannot hold the new key and value.
    OutOfSpace {
        /// Bytes the entry needs, terminators included.
        needed: usize,
        /// Bytes that would be free after removing any entry being replaced.
        available: usize,
    },
}

impl fmt::Display for AttributeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyAttributes { capacity } => {
                write!(f, "attribute key array is full ({capacity} entries)")
            }
            Self::OutOfSpace { needed, available } => write!(
                f,
                "attribute buffer is full (needed {needed} bytes, {available} available)"
            ),
        }
    }
}

impl core::error::Error for AttributeError {}

/// A fixed-capacity table of unique string keys and values.
pub struct AttributeStore {
    entries: FixedBuffer<Entry>,
    bytes: FixedBuffer<u8>,
    len: usize,
    used: usize,
}

impl AttributeStore {
    /// Allocates an index of `max_count` entries and a region of `max_bytes`
    /// bytes. A zero for either makes the store permanently empty.
    pub fn new(
        allocator: Allocator,
        max_count: usize,
        max_bytes: usize,
    ) -> Result<Self, AllocError> {
        Ok(Self {
            entries: FixedBuffer::new(allocator, max_count, Entry::default())?,
            bytes: FixedBuffer::new(allocator, max_bytes, 0)?,
            len: 0,
            used: 0,
        })
    }

    /// Whether both capacities are non-zero.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.entries.capacity() != 0 && self.bytes.capacity() != 0
    }

    /// The number of stored attributes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no attributes are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The maximum number of attributes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// The size of the byte region.
    #[inline]
    pub fn byte_capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Bytes currently occupied in the region.
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.used
    }

    /// Returns the insertion index of `key`, if present.
    pub fn find(&self, key: &str) -> Option<usize> {
        (0..self.len).find(|&index| self.key_at(index) == key)
    }

    /// Returns the value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.find(key).map(|index| self.value_at(index))
    }

    /// Stores `value` under `key`, or removes `key` when `value` is `None`.
    ///
    /// Capacity is checked before anything is touched: on error the store is
    /// unchanged. Replacing a key counts the bytes of the old entry as free.
    /// A disabled store accepts every call and stores nothing.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> Result<(), AttributeError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let existing = self.find(key);
        let Some(value) = value else {
            if let Some(index) = existing {
                self.remove_at(index);
            }
            return Ok(());
        };

        if existing.is_none() && self.len == self.entries.capacity() {
            return Err(AttributeError::TooManyAttributes {
                capacity: self.entries.capacity(),
            });
        }

        let needed = packed_size(key, value);
        let freed = existing.map_or(0, |index| self.entries[index].footprint());
        let available = self.bytes.capacity() - (self.used - freed);
        if needed > available {
            return Err(AttributeError::OutOfSpace { needed, available });
        }

        if let Some(index) = existing {
            self.remove_at(index);
        }
        self.append(key, value);

        debug_assert!(self.validate());
        Ok(())
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.find(key) {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    /// Removes every attribute.
    pub fn clear(&mut self) {
        self.len = 0;
        self.used = 0;
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            store: self,
            index: 0,
        }
    }

    /// Checks the packing invariants: entries are contiguous from offset 0,
    /// every string is NUL-terminated and valid UTF-8, keys are unique and
    /// usage never exceeds either capacity.
    pub fn validate(&self) -> bool {
        if self.len > self.entries.capacity() || self.used > self.bytes.capacity() {
            return false;
        }

        let mut offset = 0;
        for (index, entry) in self.entries[..self.len].iter().enumerate() {
            if entry.key.start != offset || entry.value.start != entry.key.end() + 1 {
                return false;
            }
            let terminated = |span: Span| self.bytes.get(span.end()) == Some(&0);
            let decodes = |span: Span| {
                self.bytes
                    .get(span.start..span.end())
                    .is_some_and(|bytes| core::str::from_utf8(bytes).is_ok())
            };
            if !terminated(entry.key)
                || !terminated(entry.value)
                || !decodes(entry.key)
                || !decodes(entry.value)
            {
                return false;
            }
            if (0..index).any(|other| self.key_at(other) == self.key_at(index)) {
                return false;
            }
            offset += entry.footprint();
        }
        offset == self.used
    }

    fn key_at(&self, index: usize) -> &str {
        let span = self.entries[index].key;
        util::text(&self.bytes[span.start..span.end()])
    }

    fn value_at(&self, index: usize) -> &str {
        let span = self.entries[index].value;
        util::text(&self.bytes[span.start..span.end()])
    }

    fn append(&mut self, key: &str, value: &str) {
        let start = self.used;
        let written = util::write_nul_terminated(&mut self.bytes[start..], key);
        let value_start = start + written;
        let written = util::write_nul_terminated(&mut self.bytes[value_start..], value);

        self.entries[self.len] = Entry {
            key: Span {
                start,
                len: key.len(),
            },
            value: Span {
                start: value_start,
                len: value.len(),
            },
        };
        self.len += 1;
        self.used = value_start + written;
    }

    fn remove_at(&mut self, index: usize) {
        let removed = self.entries[index];
        let start = removed.key.start;
        let footprint = removed.footprint();

        self.bytes.copy_within(start + footprint..self.used, start);
        self.entries.copy_within(index + 1..self.len, index);
        self.len -= 1;
        self.used -= footprint;

        for entry in &mut self.entries[index..self.len] {
            entry.key.start -= footprint;
            entry.value.start -= footprint;
        }

        debug_assert!(self.validate());
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a AttributeStore {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Iterator over the attributes of an [`AttributeStore`].
#[derive(Clone)]
pub struct Iter<'a> {
    store: &'a AttributeStore,
    index: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.store.len {
            return None;
        }
        let index = self.index;
        self.index += 1;
        Some((self.store.key_at(index), self.store.value_at(index)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.store.len - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl fmt::Debug for Iter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
