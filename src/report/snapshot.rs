use core::fmt;

use forensics_internals::{AttributeStore, Breadcrumb, BreadcrumbRing, Slot};

/// The attributes captured in a report.
#[derive(Copy, Clone)]
pub struct Attributes<'a> {
    store: Option<&'a AttributeStore>,
}

impl<'a> Attributes<'a> {
    pub(crate) fn new(store: Option<&'a AttributeStore>) -> Self {
        Self { store }
    }

    /// The number of attributes.
    pub fn len(&self) -> usize {
        self.store.map_or(0, AttributeStore::len)
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the value of `key`.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.store.and_then(|store| store.get(key))
    }

    /// Iterates over `(key, value)` pairs in the order they were set.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + use<'a> {
        self.store.into_iter().flat_map(AttributeStore::iter)
    }
}

impl fmt::Debug for Attributes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// The breadcrumbs captured in a report, oldest first.
#[derive(Copy, Clone)]
pub struct Breadcrumbs<'a> {
    ring: Option<&'a BreadcrumbRing>,
    slots: &'a [Slot],
}

impl<'a> Breadcrumbs<'a> {
    pub(crate) fn new(ring: Option<&'a BreadcrumbRing>, slots: &'a [Slot]) -> Self {
        let slots = if ring.is_some() { slots } else { &[] };
        Self { ring, slots }
    }

    /// The number of breadcrumbs.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no breadcrumbs.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The breadcrumb at `index`, counting from the oldest.
    pub fn get(&self, index: usize) -> Option<Breadcrumb<'a>> {
        let ring = self.ring?;
        self.slots.get(index).map(|slot| ring.resolve(slot))
    }

    /// Iterates over the breadcrumbs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = Breadcrumb<'a>> + use<'a> {
        let ring = self.ring;
        self.slots
            .iter()
            .filter_map(move |slot| ring.map(|ring| ring.resolve(slot)))
    }
}

impl fmt::Debug for Breadcrumbs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
