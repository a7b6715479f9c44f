#![no_std]
#![forbid(
    missing_docs,
    clippy::alloc_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    unused_doc_comments
)]
//! Internal implementation crate for [`forensics`].
//!
//! # Overview
//!
//! This crate contains the fixed-capacity, allocate-once data structures that
//! back the [`forensics`] diagnostics engine. Nothing in here allocates after
//! construction, and every structure tolerates a capacity of zero.
//!
//! **This crate is an implementation detail.** No semantic versioning
//! guarantees are provided. Users should depend on the [`forensics`] crate,
//! not this one.
//!
//! # Architecture
//!
//! - **[`buffer`]**: [`FixedBuffer`], a slice of `Copy` values allocated once
//!   from a caller-supplied [`GlobalAlloc`] and freed on drop.
//! - **[`attributes`]**: [`AttributeStore`], a key/value table packed into a
//!   single byte region that is compacted in place on removal.
//! - **[`breadcrumbs`]**: [`BreadcrumbRing`], a fixed-count ring of
//!   breadcrumb slots whose variable-length payloads live in a circular byte
//!   region.
//!
//! # Layout Strategy
//!
//! Packed records are addressed by integer offsets into their region, never
//! by pointers. Moving bytes during compaction or wraparound therefore only
//! requires rewriting offsets, and a record can be resolved against the
//! region at any time without chasing stale addresses.
//!
//! [`forensics`]: https://docs.rs/forensics/latest/forensics/
//! [`GlobalAlloc`]: core::alloc::GlobalAlloc

pub mod attributes;
pub mod breadcrumbs;
pub mod buffer;
mod util;

pub use attributes::{AttributeError, AttributeStore};
pub use breadcrumbs::{AddOutcome, Breadcrumb, BreadcrumbRing, Metadata, Slot};
pub use buffer::{AllocError, Allocator, FixedBuffer};
