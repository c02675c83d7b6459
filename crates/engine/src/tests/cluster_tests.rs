use super::helpers::*;

// -------------------- Replicated writes --------------------

#[test]
fn three_replica_put_writes_identical_slots() {
    let cluster = TestCluster::start(3, 64);
    let mut client = cluster.client(1, 3);

    let value = vec![0x5Au8; 4080];
    client.put("k", &value).unwrap();
    assert_eq!(client.get("k").unwrap().unwrap(), value);

    let ids = cluster.replica_ids("k", 3);
    assert_eq!(ids.len(), 3);
    let home = cluster.home_index("k");

    let crcs: Vec<u32> = ids
        .iter()
        .map(|&id| {
            let s = cluster.slot_of(id, home);
            assert_eq!(slot::validate(s, "k"), slot::Validity::Ok);
            slot::data_crc_of(s)
        })
        .collect();
    assert!(crcs.windows(2).all(|w| w[0] == w[1]));

    client.close().unwrap();
}

#[test]
fn replica_set_shrinks_to_available_servers() {
    let cluster = TestCluster::start(2, 64);
    let mut client = cluster.client(1, 3);

    client.put("k", b"v").unwrap();
    let home = cluster.home_index("k");
    for id in cluster.replica_ids("k", 3) {
        assert_eq!(
            slot::validate(cluster.slot_of(id, home), "k"),
            slot::Validity::Ok
        );
    }
}

// -------------------- Failure tolerance --------------------

#[test]
fn put_survives_losing_a_secondary() {
    let cluster = TestCluster::start(3, 64);
    let mut client = cluster.client(1, 3);

    client.put("k", b"old value").unwrap();

    // The last secondary's connection dies; the next put fans out to the
    // two survivors only.
    let ids = cluster.replica_ids("k", 3);
    let lost = ids[2];
    client.disconnect_server(lost);

    client.put("k", b"new value").unwrap();
    assert_eq!(client.get("k").unwrap().as_deref(), Some(&b"new value"[..]));

    let home = cluster.home_index("k");
    let survivor_crcs: Vec<u32> = ids[..2]
        .iter()
        .map(|&id| {
            let s = cluster.slot_of(id, home);
            assert_eq!(slot::validate(s, "k"), slot::Validity::Ok);
            slot::data_crc_of(s)
        })
        .collect();
    assert_eq!(survivor_crcs[0], survivor_crcs[1]);

    // The lost replica still holds the previous committed value — stale,
    // never torn.
    let stale = cluster.slot_of(lost, home);
    assert_eq!(slot::validate(stale, "k"), slot::Validity::Ok);
    assert_ne!(slot::data_crc_of(stale), survivor_crcs[0]);
}

#[test]
fn primary_loss_fails_over_to_next_replica() {
    let cluster = TestCluster::start(3, 64);
    let mut client = cluster.client(1, 3);

    let ids = cluster.replica_ids("k", 3);
    client.disconnect_server(ids[0]);

    // Placement now starts at the next live rank.
    client.put("k", b"v").unwrap();
    assert_eq!(client.get("k").unwrap().as_deref(), Some(&b"v"[..]));

    let home = cluster.home_index("k");
    assert_eq!(
        slot::validate(cluster.slot_of(ids[1], home), "k"),
        slot::Validity::Ok
    );
    // The lost server never saw the write.
    assert_eq!(
        slot::state_of(cluster.slot_of(ids[0], home)),
        slot::SlotState::Empty
    );
}

// -------------------- Cross-client visibility --------------------

#[test]
fn a_second_client_reads_what_the_first_wrote() {
    let cluster = TestCluster::start(3, 64);
    let mut writer = cluster.client(1, 3);
    let mut reader = cluster.client(2, 3);

    writer.put("shared", b"payload").unwrap();
    assert_eq!(
        reader.get("shared").unwrap().as_deref(),
        Some(&b"payload"[..])
    );

    writer.close().unwrap();
    reader.close().unwrap();
}

#[test]
fn clients_shut_down_cleanly() {
    let cluster = TestCluster::start(2, 16);
    let client = cluster.client(5, 2);
    client.close().unwrap();

    // The id is reusable after a clean close.
    let again = cluster.client(5, 2);
    again.close().unwrap();
}
