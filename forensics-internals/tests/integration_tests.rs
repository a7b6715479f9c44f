//! Randomized tests for the packed stores.
//!
//! Each test drives a store with generated operations and checks it against
//! a simple model built from std collections, validating the layout
//! invariants after every step:
//!
//! - `attribute_store_matches_model`: set/clear sequences agree with an
//!   ordered map and never overflow either capacity.
//! - `breadcrumb_ring_is_suffix_of_history`: the live breadcrumbs are
//!   always the newest entries of the coalesced history, with the same
//!   repeat counts.
//! - `breadcrumb_snapshot_is_chronological`: copied slots resolve to the
//!   same sequence the iterator yields.

use std::alloc::System;

use forensics_internals::{AddOutcome, AttributeError, AttributeStore, BreadcrumbRing, Slot};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum AttributeOp {
    Set(String, String),
    Clear(String),
}

fn attribute_op() -> impl Strategy<Value = AttributeOp> {
    let key = prop::sample::select(vec!["user", "version", "region", "build", "k", ""]);
    prop_oneof![
        3 => (key.clone(), "[a-z0-9é]{0,12}")
            .prop_map(|(key, value)| AttributeOp::Set(key.to_owned(), value)),
        1 => key.prop_map(|key| AttributeOp::Clear(key.to_owned())),
    ]
}

type Record = (String, Vec<(String, String)>);

fn breadcrumb() -> impl Strategy<Value = Record> {
    (
        prop::sample::select(vec!["boot", "tick", "request", "a", "", "ünïcode"]),
        prop::collection::vec(("[a-c]{0,3}", "[x-z]{0,6}"), 0..3),
    )
        .prop_map(|(name, metadata)| (name.to_owned(), metadata))
}

fn add(ring: &mut BreadcrumbRing, (name, metadata): &Record) -> AddOutcome {
    let pairs: Vec<(&str, &str)> = metadata
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    ring.add(name, &pairs)
}

fn packed_size((name, metadata): &Record) -> usize {
    let pairs: Vec<(&str, &str)> = metadata
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    BreadcrumbRing::packed_size(name, &pairs).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn attribute_store_matches_model(
        max_count in 0usize..6,
        max_bytes in 0usize..64,
        ops in prop::collection::vec(attribute_op(), 0..60),
    ) {
        let mut store = AttributeStore::new(&System, max_count, max_bytes).unwrap();
        let mut model: Vec<(String, String)> = Vec::new();

        for op in ops {
            match op {
                AttributeOp::Set(key, value) => {
                    let result = store.set(&key, Some(&value));
                    if !store.is_enabled() {
                        prop_assert_eq!(result, Ok(()));
                        continue;
                    }
                    match result {
                        Ok(()) => {
                            model.retain(|(existing, _)| *existing != key);
                            model.push((key, value));
                        }
                        Err(AttributeError::TooManyAttributes { capacity }) => {
                            prop_assert_eq!(capacity, max_count);
                            prop_assert_eq!(model.len(), max_count);
                            prop_assert!(model.iter().all(|(existing, _)| *existing != key));
                        }
                        Err(AttributeError::OutOfSpace { needed, available }) => {
                            prop_assert_eq!(needed, key.len() + value.len() + 2);
                            prop_assert!(needed > available);
                        }
                    }
                }
                AttributeOp::Clear(key) => {
                    prop_assert_eq!(store.set(&key, None), Ok(()));
                    model.retain(|(existing, _)| *existing != key);
                }
            }

            prop_assert!(store.validate());
            prop_assert!(store.bytes_used() <= max_bytes);
            prop_assert!(store.len() <= max_count);
            let stored: Vec<(String, String)> = store
                .iter()
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect();
            prop_assert_eq!(&stored, &model);
        }
    }

    #[test]
    fn breadcrumb_ring_is_suffix_of_history(
        max_count in 0usize..6,
        max_bytes in 0usize..96,
        records in prop::collection::vec(breadcrumb(), 0..80),
    ) {
        let mut ring = BreadcrumbRing::new(&System, max_count, max_bytes).unwrap();
        let mut history: Vec<(Record, u32)> = Vec::new();

        for record in &records {
            let outcome = add(&mut ring, record);

            let expected = if max_count == 0 || max_bytes == 0 {
                AddOutcome::Disabled
            } else if history.last().is_some_and(|(last, _)| last == record) {
                AddOutcome::Coalesced
            } else if packed_size(record) > max_bytes {
                AddOutcome::Dropped
            } else {
                AddOutcome::Recorded
            };
            prop_assert_eq!(outcome, expected);

            match outcome {
                AddOutcome::Recorded => history.push((record.clone(), 1)),
                AddOutcome::Coalesced => {
                    if let Some((_, repeat)) = history.last_mut() {
                        *repeat += 1;
                    }
                }
                AddOutcome::Dropped | AddOutcome::Disabled => {}
            }

            prop_assert!(ring.validate());
            prop_assert!(ring.len() <= max_count);
            prop_assert!(ring.bytes_used() <= max_bytes);

            let live: Vec<(Record, u32)> = ring
                .iter()
                .map(|breadcrumb| {
                    let metadata = breadcrumb
                        .metadata()
                        .map(|(key, value)| (key.to_owned(), value.to_owned()))
                        .collect();
                    ((breadcrumb.name().to_owned(), metadata), breadcrumb.repeat_count())
                })
                .collect();
            prop_assert!(live.len() <= history.len());
            prop_assert_eq!(&live[..], &history[history.len() - live.len()..]);
            if outcome == AddOutcome::Recorded {
                prop_assert_eq!(live.last().map(|(record, _)| record), Some(record));
            }
        }
    }

    #[test]
    fn breadcrumb_snapshot_is_chronological(
        max_count in 1usize..8,
        records in prop::collection::vec(breadcrumb(), 1..40),
    ) {
        let mut ring = BreadcrumbRing::new(&System, max_count, 128).unwrap();
        for record in &records {
            add(&mut ring, record);
        }

        let mut slots = vec![Slot::default(); max_count];
        let copied = ring.copy_chronological(&mut slots);
        prop_assert_eq!(copied, ring.len());

        let from_slots: Vec<(&str, u32)> = slots[..copied]
            .iter()
            .map(|slot| {
                let breadcrumb = ring.resolve(slot);
                (breadcrumb.name(), breadcrumb.repeat_count())
            })
            .collect();
        let from_iter: Vec<(&str, u32)> = ring
            .iter()
            .map(|breadcrumb| (breadcrumb.name(), breadcrumb.repeat_count()))
            .collect();
        prop_assert_eq!(from_slots, from_iter);
    }
}
