use super::*;
use proto::RpcErrorKind;

// -------------------- ClusterMap --------------------

#[test]
fn add_server_assigns_ids_from_one() {
    let mut m = ClusterMap::new();
    assert_eq!(m.add_server(0, "127.0.0.1:9201").unwrap(), 1);
    assert_eq!(m.add_server(0, "127.0.0.1:9202").unwrap(), 2);
    assert_eq!(m.len(), 2);
}

#[test]
fn forced_id_is_honored_and_assignment_continues_past_it() {
    let mut m = ClusterMap::new();
    assert_eq!(m.add_server(10, "127.0.0.1:9210").unwrap(), 10);
    assert_eq!(m.add_server(0, "127.0.0.1:9211").unwrap(), 11);
}

#[test]
fn duplicate_id_is_already_exists() {
    let mut m = ClusterMap::new();
    m.add_server(3, "127.0.0.1:9203").unwrap();
    let err = m.add_server(3, "127.0.0.1:9204").unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::AlreadyExists);
    assert_eq!(m.len(), 1);
}

#[test]
fn malformed_address_is_invalid_argument() {
    let mut m = ClusterMap::new();
    let err = m.add_server(0, "not-an-address").unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::InvalidArgument);
    assert!(m.is_empty());
}

#[test]
fn listing_is_sorted_by_id() {
    let mut m = ClusterMap::new();
    m.add_server(5, "127.0.0.1:9205").unwrap();
    m.add_server(2, "127.0.0.1:9202").unwrap();
    m.add_server(9, "127.0.0.1:9209").unwrap();
    let ids: Vec<u32> = m.servers().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![2, 5, 9]);
}

// -------------------- Service round trip --------------------

fn start_monitor() -> (std::sync::Arc<Monitor>, MonitorClient) {
    let mon = Monitor::bind("127.0.0.1:0").unwrap();
    let runner = std::sync::Arc::clone(&mon);
    std::thread::spawn(move || runner.run());
    let client = MonitorClient::new(
        mon.local_addr().to_string(),
        std::time::Duration::from_secs(2),
    );
    (mon, client)
}

#[test]
fn register_then_list_over_the_wire() {
    let (mon, client) = start_monitor();

    let a = client.add_server(0, "127.0.0.1:9301").unwrap();
    let b = client.add_server(0, "127.0.0.1:9302").unwrap();
    assert_eq!((a, b), (1, 2));

    let list = client.get_servers().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, 1);
    assert_eq!(list[0].addr, "127.0.0.1:9301");

    mon.stop();
}

#[test]
fn wire_errors_carry_kind() {
    let (mon, client) = start_monitor();

    client.add_server(4, "127.0.0.1:9304").unwrap();
    match client.add_server(4, "127.0.0.1:9305") {
        Err(MonitorError::Rpc(e)) => assert_eq!(e.kind, RpcErrorKind::AlreadyExists),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }
    match client.add_server(0, "bogus") {
        Err(MonitorError::Rpc(e)) => assert_eq!(e.kind, RpcErrorKind::InvalidArgument),
        other => panic!("expected InvalidArgument, got {other:?}"),
    }

    mon.stop();
}

#[test]
fn connect_to_dead_monitor_is_io_error() {
    let client = MonitorClient::new("127.0.0.1:1", std::time::Duration::from_millis(200));
    assert!(matches!(client.get_servers(), Err(MonitorError::Io(_))));
}
