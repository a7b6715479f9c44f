//! Breadcrumb ring buffer.
//!
//! Two fixed regions cooperate here. A ring of [`Slot`]s records, oldest to
//! newest, where each breadcrumb's payload lives; the payloads themselves are
//! packed into a circular byte region managed with a read and a write
//! cursor.
//!
//! Payload layout for a breadcrumb with `n` metadata pairs:
//!
//! ```text
//! | n * (key_len: u32 LE, value_len: u32 LE) | name \0 | key0 \0 value0 \0 | ... |
//! ```
//!
//! A payload is always contiguous. When it does not fit before the end of
//! the region the allocator wraps to offset 0, leaving the tail unused until
//! the read cursor passes it. The read cursor is always the offset of the
//! oldest live payload, and an empty ring always has both cursors at 0.

use core::fmt;

use crate::{
    buffer::{AllocError, Allocator, FixedBuffer},
    util,
};

const HEADER_LEN: usize = 8;

/// Location of one breadcrumb's payload inside the byte region.
///
/// Slots are plain data so that a report can copy them out of the ring in
/// chronological order and resolve them afterwards with
/// [`BreadcrumbRing::resolve`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    offset: usize,
    size: usize,
    name_len: usize,
    meta_count: usize,
    repeat: u32,
}

impl Slot {
    /// How many consecutive identical breadcrumbs this slot stands for.
    #[inline]
    pub fn repeat_count(&self) -> u32 {
        self.repeat
    }

    #[inline]
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// What [`BreadcrumbRing::add`] did with a breadcrumb.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored as a new entry, possibly after evicting older ones.
    Recorded,
    /// Matched the newest entry, whose repeat count was incremented.
    Coalesced,
    /// Larger than the whole byte region; nothing was changed.
    Dropped,
    /// The ring has no slot or byte capacity.
    Disabled,
}

/// Bytes a breadcrumb needs in the region, or `None` if that does not fit
/// in `usize` or a length does not fit the `u32` header.
fn packed_size(name: &str, metadata: &[(&str, &str)]) -> Option<usize> {
    let mut size = name.len().checked_add(1)?;
    for (key, value) in metadata {
        u32::try_from(key.len()).ok()?;
        u32::try_from(value.len()).ok()?;
        size = size
            .checked_add(HEADER_LEN)?
            .checked_add(key.len())?
            .checked_add(value.len())?
            .checked_add(2)?;
    }
    Some(size)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<usize> {
    let raw: [u8; 4] = bytes.get(at..at.checked_add(4)?)?.try_into().ok()?;
    usize::try_from(u32::from_le_bytes(raw)).ok()
}

/// A fixed-count, fixed-size ring of recent events.
pub struct BreadcrumbRing {
    slots: FixedBuffer<Slot>,
    bytes: FixedBuffer<u8>,
    /// Slot index the next breadcrumb is written to.
    next: usize,
    count: usize,
    read: usize,
    write: usize,
    /// Sum of live payload sizes. Excludes any unused tail before a wrap.
    used: usize,
}

impl BreadcrumbRing {
    /// Allocates `max_count` slots and a `max_bytes` payload region. A zero
    /// for either disables the ring.
    pub fn new(
        allocator: Allocator,
        max_count: usize,
        max_bytes: usize,
    ) -> Result<Self, AllocError> {
        Ok(Self {
            slots: FixedBuffer::new(allocator, max_count, Slot::default())?,
            bytes: FixedBuffer::new(allocator, max_bytes, 0)?,
            next: 0,
            count: 0,
            read: 0,
            write: 0,
            used: 0,
        })
    }

    /// Whether both capacities are non-zero.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.slots.capacity() != 0 && self.bytes.capacity() != 0
    }

    /// The number of live breadcrumbs.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no breadcrumbs are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The maximum number of breadcrumbs.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// The size of the payload region.
    #[inline]
    pub fn byte_capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Bytes held by live payloads.
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.used
    }

    /// The packed size a breadcrumb would occupy, if representable.
    pub fn packed_size(name: &str, metadata: &[(&str, &str)]) -> Option<usize> {
        packed_size(name, metadata)
    }

    /// Records a breadcrumb.
    ///
    /// A breadcrumb equal to the newest one (same name, same metadata pairs
    /// in the same order) only bumps that entry's repeat count. Otherwise the
    /// oldest entries are evicted until both a slot and enough contiguous
    /// bytes are free. A breadcrumb larger than the whole region is dropped
    /// without evicting anything.
    pub fn add(&mut self, name: &str, metadata: &[(&str, &str)]) -> AddOutcome {
        if !self.is_enabled() {
            return AddOutcome::Disabled;
        }

        if let Some(newest) = self.newest_index()
            && self.matches(&self.slots[newest], name, metadata)
        {
            let slot = &mut self.slots[newest];
            slot.repeat = slot.repeat.saturating_add(1);
            return AddOutcome::Coalesced;
        }

        let Some(size) = packed_size(name, metadata).filter(|&size| size <= self.bytes.capacity())
        else {
            return AddOutcome::Dropped;
        };

        if self.count == self.slots.capacity() {
            self.evict_oldest();
        }
        let offset = loop {
            if let Some(offset) = self.allocate(size) {
                break offset;
            }
            // An empty region always has room for `size`, so this only
            // stops once something was allocated.
            if !self.evict_oldest() {
                return AddOutcome::Dropped;
            }
        };

        self.encode(offset, name, metadata);
        self.slots[self.next] = Slot {
            offset,
            size,
            name_len: name.len(),
            meta_count: metadata.len(),
            repeat: 1,
        };
        self.next = (self.next + 1) % self.slots.capacity();
        self.count += 1;

        debug_assert!(self.validate());
        AddOutcome::Recorded
    }

    /// Removes every breadcrumb.
    pub fn clear(&mut self) {
        self.slots.fill(Slot::default());
        self.next = 0;
        self.count = 0;
        self.read = 0;
        self.write = 0;
        self.used = 0;
    }

    /// Copies the live slots, oldest first, into `out`.
    ///
    /// If `out` is shorter than [`len`](Self::len), the newest entries are
    /// kept. Returns the number of slots written.
    pub fn copy_chronological(&self, out: &mut [Slot]) -> usize {
        let copied = self.count.min(out.len());
        let skipped = self.count - copied;
        for (position, target) in out[..copied].iter_mut().enumerate() {
            *target = self.slots[self.chronological_index(skipped + position)];
        }
        copied
    }

    /// Reads the breadcrumb a slot points at.
    ///
    /// The result is only meaningful until the ring is next mutated.
    pub fn resolve(&self, slot: &Slot) -> Breadcrumb<'_> {
        let record = self
            .bytes
            .get(slot.offset..slot.end())
            .unwrap_or_default();
        let headers = slot.meta_count.saturating_mul(HEADER_LEN);
        let name = record
            .get(headers..headers.saturating_add(slot.name_len))
            .map(util::text)
            .unwrap_or_default();
        Breadcrumb {
            name,
            metadata: Metadata {
                record,
                index: 0,
                count: slot.meta_count,
                cursor: headers + slot.name_len + 1,
            },
            repeat_count: slot.repeat,
        }
    }

    /// Iterates over the live breadcrumbs, oldest first.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            ring: self,
            position: 0,
        }
    }

    /// Checks the ring invariants: usage within capacity, cursors agree with
    /// the oldest and newest payloads, payloads never overlap, and every
    /// payload decodes to exactly its recorded size.
    pub fn validate(&self) -> bool {
        if self.count > self.slots.capacity() || self.used > self.bytes.capacity() {
            return false;
        }
        if self.count == 0 {
            return self.read == 0 && self.write == 0 && self.used == 0;
        }

        let live = |position: usize| &self.slots[self.chronological_index(position)];
        if live(0).offset != self.read || live(self.count - 1).end() != self.write {
            return false;
        }

        let mut total = 0;
        for position in 0..self.count {
            let slot = live(position);
            if slot.repeat == 0 || slot.end() > self.bytes.capacity() {
                return false;
            }
            if (0..position).any(|other| {
                let other = live(other);
                slot.offset < other.end() && other.offset < slot.end()
            }) {
                return false;
            }
            if !self.decodes_exactly(slot) {
                return false;
            }
            total += slot.size;
        }
        total == self.used
    }

    fn decodes_exactly(&self, slot: &Slot) -> bool {
        let Some(record) = self.bytes.get(slot.offset..slot.end()) else {
            return false;
        };
        let headers = slot.meta_count * HEADER_LEN;
        let mut expected = headers + slot.name_len + 1;
        for index in 0..slot.meta_count {
            let (Some(key_len), Some(value_len)) = (
                read_u32(record, index * HEADER_LEN),
                read_u32(record, index * HEADER_LEN + 4),
            ) else {
                return false;
            };
            expected += key_len + 1 + value_len + 1;
        }
        if expected != slot.size || record.get(headers + slot.name_len) != Some(&0) {
            return false;
        }
        let breadcrumb = self.resolve(slot);
        breadcrumb.name.len() == slot.name_len && breadcrumb.metadata().count() == slot.meta_count
    }

    fn chronological_index(&self, position: usize) -> usize {
        let capacity = self.slots.capacity();
        (self.next + capacity - self.count + position) % capacity
    }

    fn newest_index(&self) -> Option<usize> {
        (self.count != 0).then(|| self.chronological_index(self.count - 1))
    }

    fn matches(&self, slot: &Slot, name: &str, metadata: &[(&str, &str)]) -> bool {
        if slot.name_len != name.len() || slot.meta_count != metadata.len() {
            return false;
        }
        let existing = self.resolve(slot);
        existing.name == name && existing.metadata().eq(metadata.iter().copied())
    }

    /// Reserves `size` contiguous bytes, or returns `None` if the free space
    /// on the reachable side of the read cursor is too small.
    fn allocate(&mut self, size: usize) -> Option<usize> {
        if self.used == 0 {
            self.read = 0;
            self.write = 0;
        }
        let capacity = self.bytes.capacity();

        let offset = if self.used == 0 || self.write > self.read {
            // Live bytes are `read..write`; free space is after `write` and
            // before `read`.
            if size <= capacity - self.write {
                self.write
            } else if size <= self.read {
                0
            } else {
                return None;
            }
        } else if size <= self.read - self.write {
            // Wrapped: free space is only `write..read`.
            self.write
        } else {
            return None;
        };

        self.write = offset + size;
        self.used += size;
        Some(offset)
    }

    fn evict_oldest(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        let oldest = self.chronological_index(0);
        let slot = core::mem::take(&mut self.slots[oldest]);
        self.count -= 1;
        self.used -= slot.size;

        if self.count == 0 {
            self.read = 0;
            self.write = 0;
        } else {
            self.read = self.slots[self.chronological_index(0)].offset;
        }
        true
    }

    fn encode(&mut self, offset: usize, name: &str, metadata: &[(&str, &str)]) {
        let headers = metadata.len() * HEADER_LEN;
        let (header_bytes, payload) = self.bytes[offset..].split_at_mut(headers);

        for ((key, value), header) in metadata.iter().zip(header_bytes.chunks_exact_mut(HEADER_LEN)) {
            // Lengths were checked against `u32` in `packed_size`.
            header[..4].copy_from_slice(&(key.len() as u32).to_le_bytes());
            header[4..].copy_from_slice(&(value.len() as u32).to_le_bytes());
        }

        let mut cursor = util::write_nul_terminated(payload, name);
        for (key, value) in metadata {
            cursor += util::write_nul_terminated(&mut payload[cursor..], key);
            cursor += util::write_nul_terminated(&mut payload[cursor..], value);
        }
    }
}

impl fmt::Debug for BreadcrumbRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a BreadcrumbRing {
    type Item = Breadcrumb<'a>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// A breadcrumb read back from the ring.
#[derive(Clone)]
pub struct Breadcrumb<'a> {
    name: &'a str,
    metadata: Metadata<'a>,
    repeat_count: u32,
}

impl<'a> Breadcrumb<'a> {
    /// The breadcrumb name.
    #[inline]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// The metadata pairs, in the order they were recorded.
    #[inline]
    pub fn metadata(&self) -> Metadata<'a> {
        self.metadata.clone()
    }

    /// How many consecutive times this breadcrumb was added.
    #[inline]
    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }
}

impl fmt::Debug for Breadcrumb<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breadcrumb")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("repeat_count", &self.repeat_count)
            .finish()
    }
}

/// Iterator over the metadata pairs of a [`Breadcrumb`].
#[derive(Clone)]
pub struct Metadata<'a> {
    record: &'a [u8],
    index: usize,
    count: usize,
    cursor: usize,
}

impl<'a> Iterator for Metadata<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let header = self.index * HEADER_LEN;
        let key_len = read_u32(self.record, header)?;
        let value_len = read_u32(self.record, header + 4)?;

        let key_start = self.cursor;
        let value_start = key_start.checked_add(key_len)?.checked_add(1)?;
        let key = self.record.get(key_start..key_start + key_len)?;
        let value = self.record.get(value_start..value_start.checked_add(value_len)?)?;

        self.index += 1;
        self.cursor = value_start + value_len + 1;
        Some((util::text(key), util::text(value)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.count - self.index))
    }
}

impl fmt::Debug for Metadata<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.clone()).finish()
    }
}

/// Iterator over the breadcrumbs of a [`BreadcrumbRing`], oldest first.
#[derive(Clone)]
pub struct Iter<'a> {
    ring: &'a BreadcrumbRing,
    position: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Breadcrumb<'a>;

    fn next(&mut self) -> Option<Breadcrumb<'a>> {
        if self.position >= self.ring.count {
            return None;
        }
        let slot = &self.ring.slots[self.ring.chronological_index(self.position)];
        self.position += 1;
        Some(self.ring.resolve(slot))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ring.count - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl fmt::Debug for Iter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
