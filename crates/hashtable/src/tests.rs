use super::*;

// -------------------- Helpers --------------------

fn region(slots: usize) -> Vec<u8> {
    vec![0u8; slots * SLOT_LEN]
}

/// Finds `n` distinct keys whose home slot in a table of `capacity` is
/// `index`.
fn colliding_keys(capacity: u64, index: u64, n: usize) -> Vec<String> {
    let shape = HeadlessTable::new(capacity, DEFAULT_PROBE_WINDOW).unwrap();
    let mut out = Vec::new();
    let mut i = 0u64;
    while out.len() < n {
        let k = format!("key-{i}");
        if shape.slot_index(slot::key_fingerprint(&k)) == index {
            out.push(k);
        }
        i += 1;
    }
    out
}

// -------------------- Arithmetic --------------------

#[test]
fn slot_index_is_modulo() {
    let t = HeadlessTable::new(16, 5).unwrap();
    for fp in [0u32, 1, 15, 16, 17, u32::MAX] {
        assert_eq!(t.slot_index(fp), u64::from(fp) % 16);
    }
}

#[test]
fn probe_window_wraps_at_capacity() {
    let t = HeadlessTable::new(8, 5).unwrap();
    // fp = 6 -> home 6, window 6 7 0 1 2
    let w: Vec<u64> = t.probe_window(6).collect();
    assert_eq!(w, vec![6, 7, 0, 1, 2]);
}

#[test]
fn window_is_clamped_to_capacity() {
    let t = HeadlessTable::new(3, 5).unwrap();
    assert_eq!(t.window(), 3);
    let w: Vec<u64> = t.probe_window(1).collect();
    assert_eq!(w, vec![1, 2, 0]);
}

#[test]
fn probe_index_matches_window() {
    let t = HeadlessTable::new(8, 5).unwrap();
    let w: Vec<u64> = t.probe_window(6).collect();
    for (off, &i) in w.iter().enumerate() {
        assert_eq!(t.probe_index(6, off), i);
    }
}

#[test]
fn slot_addr_scales_by_slot_len() {
    let t = HeadlessTable::new(8, 5).unwrap();
    assert_eq!(t.slot_addr(0x1000, 0), 0x1000);
    assert_eq!(t.slot_addr(0x1000, 3), 0x1000 + 3 * SLOT_LEN as u64);
}

#[test]
fn zero_capacity_rejected() {
    assert!(matches!(
        HeadlessTable::new(0, 5),
        Err(TableError::ZeroCapacity)
    ));
    assert!(matches!(HeadlessTable::new(8, 0), Err(TableError::ZeroWindow)));
}

// -------------------- LocalTable --------------------

#[test]
fn unaligned_region_rejected() {
    let mut mem = vec![0u8; SLOT_LEN + 1];
    assert!(matches!(
        LocalTable::new(&mut mem, 5),
        Err(TableError::UnalignedRegion(_))
    ));
}

#[test]
fn insert_then_lookup() {
    let mut mem = region(16);
    let mut t = LocalTable::new(&mut mem, 5).unwrap();

    let i = t.insert("alpha", b"one").unwrap();
    assert_eq!(t.lookup("alpha"), Some(i));
    assert_eq!(slot::decode(t.slot(i)).unwrap().key, "alpha");
    assert_eq!(t.lookup("beta"), None);
}

#[test]
fn insert_overwrites_in_place() {
    let mut mem = region(16);
    let mut t = LocalTable::new(&mut mem, 5).unwrap();

    let i = t.insert("k", b"v1").unwrap();
    let j = t.insert("k", b"v2").unwrap();
    assert_eq!(i, j);
    let d = slot::decode(t.slot(i)).unwrap();
    assert_eq!(&d.payload[..2], b"v2");
}

#[test]
fn colliding_inserts_fill_the_window_then_no_space() {
    let mut mem = region(8);
    let mut t = LocalTable::new(&mut mem, 5).unwrap();

    let keys = colliding_keys(8, 3, 6);
    for (off, k) in keys[..5].iter().enumerate() {
        let i = t.insert(k, b"v").unwrap();
        assert_eq!(i, (3 + off as u64) % 8);
        assert_eq!(t.access_distance(k), Some(off));
    }
    assert!(matches!(t.insert(&keys[5], b"v"), Err(TableError::NoSpace)));
}

#[test]
fn lookup_tolerates_locked_and_corrupt_slots() {
    let mut mem = region(8);
    let mut t = LocalTable::new(&mut mem, 5).unwrap();
    let i = t.insert("k", b"v").unwrap();

    // Lock the slot: still that key's slot.
    let w = slot::read_word(t.slot(i));
    slot::write_word(t.slot_mut(i), w | slot::WORD_LOCK);
    assert_eq!(t.lookup("k"), Some(i));

    // Corrupt the payload: still that key's slot.
    slot::write_word(t.slot_mut(i), w);
    t.slot_mut(i)[0] ^= 0xFF;
    assert_eq!(t.lookup("k"), Some(i));
}

#[test]
fn clear_empties_everything() {
    let mut mem = region(8);
    let mut t = LocalTable::new(&mut mem, 5).unwrap();
    t.insert("a", b"1").unwrap();
    t.insert("b", b"2").unwrap();
    assert!(t.load_factor() > 0.0);

    t.clear();
    assert_eq!(t.load_factor(), 0.0);
    assert_eq!(t.lookup("a"), None);
}

#[test]
fn load_factor_counts_valid_slots() {
    let mut mem = region(10);
    let mut t = LocalTable::new(&mut mem, 5).unwrap();
    t.insert("a", b"1").unwrap();
    t.insert("b", b"2").unwrap();
    t.insert("c", b"3").unwrap();
    assert!((t.load_factor() - 0.3).abs() < 1e-9);
}

#[test]
fn access_distance_of_missing_key() {
    let mut mem = region(8);
    let t = LocalTable::new(&mut mem, 5).unwrap();
    assert_eq!(t.access_distance("nope"), None);
}
