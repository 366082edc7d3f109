//! Integration tests for the key table and control message codec.
//!
//! These exercise the public API the broker relies on: a control message is
//! parsed, its pairs are inserted into a table, and later lookups resolve the
//! device named by a peer address.

use std::sync::{Arc, Mutex};
use std::thread;

use unlock_core::{
    derive_control_path, parse_control_message, parse_peer_device, CapacityExceeded, KeyTable,
};

/// Inserts every complete pair of a control message, as the control listener does.
fn apply(table: &mut KeyTable, raw: &[u8]) -> Vec<Result<(), CapacityExceeded>> {
    parse_control_message(raw)
        .pairs
        .into_iter()
        .map(|entry| table.insert(entry.device(), entry.key()))
        .collect()
}

#[test]
fn test_control_message_then_peer_lookup_resolves_key() {
    // Arrange
    let mut table = KeyTable::default();
    apply(&mut table, b"devA,keyA,devB,keyB");

    // Act: a peer bound to an abstract address ending in /devB
    let device = parse_peer_device(b"\x00f00dcafe/cryptsetup/devB");

    // Assert
    assert_eq!(table.lookup(&device), Some(&b"keyB"[..]));
}

#[test]
fn test_later_control_message_supersedes_earlier_key() {
    let mut table = KeyTable::default();
    apply(&mut table, b"devA,old");
    apply(&mut table, b"devA,new");

    assert_eq!(table.lookup("devA"), Some(&b"new"[..]));
}

#[test]
fn test_malformed_message_still_inserts_complete_pairs() {
    let mut table = KeyTable::default();
    let results = apply(&mut table, b"devA,keyA,devB");

    assert_eq!(results.len(), 1);
    assert_eq!(table.lookup("devA"), Some(&b"keyA"[..]));
    assert_eq!(table.lookup("devB"), None);
}

#[test]
fn test_overflowing_message_keeps_earlier_pairs() {
    // Arrange: room for two of three pairs
    let mut table = KeyTable::with_capacity(2);

    // Act
    let results = apply(&mut table, b"a,1,b,2,c,3");

    // Assert
    assert_eq!(results[0], Ok(()));
    assert_eq!(results[1], Ok(()));
    assert_eq!(results[2], Err(CapacityExceeded { capacity: 2 }));
    assert_eq!(table.lookup("a"), Some(&b"1"[..]));
    assert_eq!(table.lookup("b"), Some(&b"2"[..]));
    assert_eq!(table.lookup("c"), None);
}

#[test]
fn test_never_inserted_device_is_absent_after_many_inserts() {
    let mut table = KeyTable::default();
    for i in 0..100 {
        table.insert(format!("dev-{i}"), format!("key-{i}").into_bytes()).unwrap();
    }
    assert_eq!(table.lookup("dev-100"), None);
    assert_eq!(table.lookup("dev-99"), Some(&b"key-99"[..]));
}

#[test]
fn test_concurrent_inserts_and_lookups_never_observe_torn_pairs() {
    // Every key is derived from its device, so a lookup that returns a key
    // for the wrong device would reveal a partially written pair.
    let table = Arc::new(Mutex::new(KeyTable::with_capacity(4 * 250)));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..250 {
                    let device = format!("w{w}-d{i}");
                    let key = format!("key-for-{device}");
                    table.lock().unwrap().insert(device, key.into_bytes()).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for round in 0..2000 {
                let device = format!("w{}-d{}", round % 4, round % 250);
                if let Some(key) = table.lock().unwrap().lookup(&device) {
                    assert_eq!(key, format!("key-for-{device}").as_bytes());
                }
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    let table = table.lock().unwrap();
    assert_eq!(table.len(), 1000);
    assert!(table.is_full());
}

#[test]
fn test_control_path_is_derived_next_to_primary_socket() {
    let control = derive_control_path(std::path::Path::new("/run/systemd/unlock.sock"));
    assert_eq!(control.to_str(), Some("/run/systemd/unlock.control.sock"));
}
