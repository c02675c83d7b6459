use super::helpers::*;
use crate::KvError;
use ops::LockOp;
use rmem::MappedRegion;
use session::Target;

// -------------------- Misses --------------------

#[test]
fn empty_store_get_is_not_found_after_one_probe_read() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);

    // A home slot away from the array end keeps the window contiguous, so
    // the probe is a single read.
    let missing = (0..)
        .map(|i| format!("missing-{i}"))
        .find(|k| cluster.home_index(k) < 59)
        .unwrap();

    assert_eq!(client.get(&missing).unwrap(), None);
    let s = client.stats();
    assert_eq!(s.reads, 1);
    assert_eq!(s.writes, 0);
    assert_eq!(s.cas, 0);
}

#[test]
fn absent_key_stays_absent_across_probes() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);
    client.put("present", b"here").unwrap();
    assert_eq!(client.get("missing").unwrap(), None);
    assert_eq!(client.get("missing").unwrap(), None);
}

// -------------------- Hits --------------------

#[test]
fn put_then_get_round_trip() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);

    client.put("k1", b"v1").unwrap();
    assert_eq!(client.get("k1").unwrap().as_deref(), Some(&b"v1"[..]));
}

#[test]
fn cached_get_issues_exactly_one_read() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);

    client.put("k", b"v").unwrap();
    assert!(client.cache_stats().normal >= 1);

    let before = client.stats().reads;
    assert_eq!(client.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    // No probe: the locator cache pinpointed the slot.
    assert_eq!(client.stats().reads, before + 1);

    let before = client.stats().reads;
    assert_eq!(client.get("k").unwrap().as_deref(), Some(&b"v"[..]));
    assert_eq!(client.stats().reads, before + 1);
}

// -------------------- Writer interference --------------------

#[test]
fn get_of_locked_slot_is_busy_and_returns_nothing_stale() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);
    client.put("k", b"committed").unwrap();

    // A foreign writer takes the lock and never releases it.
    let d = cluster.servers[0].region().descriptor().clone();
    let m = MappedRegion::attach(&d).unwrap();
    let addr = d.base + cluster.home_index("k") * slot::SLOT_LEN as u64;
    let t = Target {
        region: &m,
        rkey: d.rkey,
        addr,
    };
    assert_eq!(
        LockOp.perform(&t, slot::key_fingerprint("k")).unwrap(),
        ops::LockOutcome::Acquired
    );

    assert!(matches!(client.get("k"), Err(KvError::Busy)));
}

#[test]
fn corrupted_payload_reads_as_busy() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);
    client.put("k", b"value bytes").unwrap();

    // Flip one payload bit, as a torn concurrent overwrite would.
    let d = cluster.servers[0].region().descriptor().clone();
    let m = MappedRegion::attach(&d).unwrap();
    let addr = d.base + cluster.home_index("k") * slot::SLOT_LEN as u64;
    let mut b = [0u8; 1];
    m.read(d.rkey, addr, &mut b).unwrap();
    m.write(d.rkey, addr, &[b[0] ^ 0x01]).unwrap();

    assert!(matches!(client.get("k"), Err(KvError::Busy)));
}

// -------------------- Stale hints --------------------

#[test]
fn stale_locator_hint_falls_back_to_probe() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);
    client.put("mine", b"v").unwrap();
    assert!(client.get("mine").unwrap().is_some());

    // Another key's slot image lands where the hint points.
    let d = cluster.servers[0].region().descriptor().clone();
    let m = MappedRegion::attach(&d).unwrap();
    let addr = d.base + cluster.home_index("mine") * slot::SLOT_LEN as u64;
    let mut foreign = vec![0u8; slot::SLOT_LEN];
    slot::encode_into(&mut foreign, "intruder", b"x").unwrap();
    m.write(d.rkey, addr, &foreign).unwrap();

    // The hint mismatches; the engine re-probes instead of trusting it.
    let before = client.stats().reads;
    assert_eq!(client.get("mine").unwrap(), None);
    assert!(client.stats().reads > before + 1);
}

// -------------------- Spanning values --------------------

#[test]
fn spanning_value_on_medium_reads_as_too_large() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);

    // Plant a two-slot value directly on the medium; single-slot reads must
    // reject it cleanly rather than return a truncated payload. Pick a key
    // whose home leaves room for the continuation slot.
    let key = &(0..)
        .map(|i| format!("wide-{i}"))
        .find(|k| u64::from(slot::key_fingerprint(k)) % 64 < 62)
        .unwrap();
    let d = cluster.servers[0].region().descriptor().clone();
    let m = MappedRegion::attach(&d).unwrap();
    let mut w = ops::PersistedWriteOp::new(4);
    w.buf
        .set(key, &vec![9u8; slot::PAYLOAD_LEN + 100])
        .unwrap();
    let t = Target {
        region: &m,
        rkey: d.rkey,
        addr: d.base + cluster.home_index(key) * slot::SLOT_LEN as u64,
    };
    assert!(w.perform(&[t], false).into_iter().all(|r| r.is_ok()));

    assert!(matches!(client.get(key), Err(KvError::TooLarge)));
}

// -------------------- Argument checks --------------------

#[test]
fn bad_keys_fail_synchronously() {
    let cluster = TestCluster::start(1, 64);
    let mut client = cluster.client(1, 1);

    assert!(matches!(client.get(""), Err(KvError::Configuration(_))));
    let long = "k".repeat(slot::MAX_KEY_LEN + 1);
    assert!(matches!(client.get(&long), Err(KvError::KeyTooLong(_))));
    assert_eq!(client.stats().reads, 0);
}
