use super::*;

// -------------------- Helpers --------------------

fn listing(ids: &[ServerId]) -> Vec<(ServerId, String)> {
    ids.iter()
        .map(|&id| (id, format!("10.0.0.{id}:9200")))
        .collect()
}

fn mapper(ids: &[ServerId]) -> Mapper {
    Mapper::new(listing(ids)).unwrap()
}

// -------------------- Mapper construction --------------------

#[test]
fn empty_listing_rejected() {
    assert!(matches!(Mapper::new(vec![]), Err(PlacementError::NoServers)));
}

#[test]
fn duplicate_id_rejected() {
    assert!(matches!(
        Mapper::new(listing(&[1, 2, 1])),
        Err(PlacementError::DuplicateServer(1))
    ));
}

#[test]
fn listing_is_sorted_by_id() {
    let m = mapper(&[3, 1, 2]);
    let ids: Vec<ServerId> = m.servers().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

// -------------------- map --------------------

#[test]
fn map_is_deterministic() {
    let m = mapper(&[1, 2, 3, 4]);
    for fp in [0u32, 1, 17, 123_456_789, u32::MAX] {
        assert_eq!(m.map(fp, 3), m.map(fp, 3));
    }
}

#[test]
fn map_starts_at_rank_and_walks_upward() {
    let m = mapper(&[1, 2, 3, 4]);
    // fp = 6 -> rank 6 % 4 = 2 -> ids [3, 4, 1]
    assert_eq!(m.map(6, 3), vec![3, 4, 1]);
    // fp = 3 -> rank 3 -> ids [4, 1, 2]
    assert_eq!(m.map(3, 3), vec![4, 1, 2]);
}

#[test]
fn map_returns_distinct_live_servers() {
    let m = mapper(&[1, 2, 3, 4, 5]);
    for fp in 0..100u32 {
        let set = m.map(fp, 3);
        assert_eq!(set.len(), 3);
        let mut dedup = set.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), 3);
    }
}

#[test]
fn map_skips_down_servers() {
    let mut m = mapper(&[1, 2, 3, 4]);
    m.mark_down(3);
    // fp = 6 -> rank 2 would be id 3; it is down, so the set shifts.
    assert_eq!(m.map(6, 3), vec![4, 1, 2]);
    assert!(!m.map(6, 4).contains(&3));
}

#[test]
fn map_shrinks_when_too_few_up() {
    let mut m = mapper(&[1, 2, 3]);
    m.mark_down(1);
    m.mark_down(2);
    assert_eq!(m.map(0, 3), vec![3]);
    m.mark_down(3);
    assert!(m.map(0, 3).is_empty());
}

#[test]
fn map_with_r_larger_than_cluster() {
    let m = mapper(&[1, 2]);
    assert_eq!(m.map(0, 5).len(), 2);
}

#[test]
fn mark_down_is_sticky_and_idempotent() {
    let mut m = mapper(&[1, 2]);
    assert!(m.is_up(2));
    m.mark_down(2);
    m.mark_down(2);
    assert!(!m.is_up(2));
    assert_eq!(m.up_count(), 1);
    // Unknown ids are ignored.
    m.mark_down(99);
    assert_eq!(m.up_count(), 1);
}

// -------------------- LocatorCaches --------------------

fn small_caches() -> LocatorCaches {
    LocatorCaches::new(4, 4, 4).unwrap()
}

#[test]
fn zero_capacity_rejected() {
    assert!(matches!(
        LocatorCaches::new(0, 1, 1),
        Err(PlacementError::ZeroCacheSize)
    ));
}

#[test]
fn miss_then_normal_hit() {
    let mut c = small_caches();
    assert_eq!(c.lookup("k"), PlacementHit::Miss);
    c.note_normal("k");
    assert_eq!(c.lookup("k"), PlacementHit::Normal);
}

#[test]
fn abnormal_hit_returns_stored_slots() {
    let mut c = small_caches();
    let slots = vec![
        ReplicaSlot { server: 1, addr: 0x2400 },
        ReplicaSlot { server: 2, addr: 0x4800 },
    ];
    c.note_abnormal("k", slots.clone());
    assert_eq!(c.lookup("k"), PlacementHit::Abnormal(slots));
}

#[test]
fn normal_and_abnormal_are_exclusive() {
    let mut c = small_caches();
    c.note_normal("k");
    c.note_abnormal("k", vec![ReplicaSlot { server: 1, addr: 0 }]);
    assert!(matches!(c.lookup("k"), PlacementHit::Abnormal(_)));
    assert_eq!(c.stats().normal, 0);

    c.note_normal("k");
    assert_eq!(c.lookup("k"), PlacementHit::Normal);
    assert_eq!(c.stats().abnormal, 0);
}

#[test]
fn invalidate_clears_both_placements_but_not_collisions() {
    let mut c = small_caches();
    c.note_normal("k");
    c.mark_collision("k");
    c.invalidate("k");
    assert_eq!(c.lookup("k"), PlacementHit::Miss);
    assert!(c.is_collision("k"));
}

#[test]
fn collision_set_is_lru_bounded() {
    let mut c = LocatorCaches::new(4, 4, 2).unwrap();
    c.mark_collision("a");
    c.mark_collision("b");
    c.mark_collision("c");
    assert!(!c.is_collision("a"));
    assert!(c.is_collision("b"));
    assert!(c.is_collision("c"));
}

#[test]
fn locator_cache_evicts_least_recent() {
    let mut c = LocatorCaches::new(2, 2, 2).unwrap();
    c.note_normal("a");
    c.note_normal("b");
    assert_eq!(c.lookup("a"), PlacementHit::Normal); // touch a
    c.note_normal("d"); // evicts b
    assert_eq!(c.lookup("b"), PlacementHit::Miss);
    assert_eq!(c.lookup("a"), PlacementHit::Normal);
}
