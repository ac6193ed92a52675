use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use pnet::util::MacAddr;
use tower::ServiceExt; // for `oneshot`
use crate::analyzer::{rpc, RpcState, Server};
use crate::config::Config;
use crate::flow::{Addr, Direction, Ethernet, Flow, FlowTable, Protocol};
use crate::storage::{MemStorage, Storage};

fn flow(protocol: Protocol, src: &str, dst: &str, bytes: u64, ts: u64) -> Flow {
    let src: Vec<&str> = src.rsplitn(2, ':').collect();
    let dst: Vec<&str> = dst.rsplitn(2, ':').collect();
    Flow {
        ts:        ts,
        ethernet:  Ethernet {
            src:  MacAddr::new(0, 1, 2, 3, 4, 5),
            dst:  MacAddr::new(6, 7, 8, 9, 10, 11),
            vlan: None,
        },
        protocol:  protocol,
        src:       Addr { addr: src[1].parse().unwrap(), port: src[0].parse().unwrap() },
        dst:       Addr { addr: dst[1].parse().unwrap(), port: dst[0].parse().unwrap() },
        bytes:     bytes,
        packets:   1,
        direction: Direction::Unknown,
        src_node:  None,
        dst_node:  None,
    }
}

fn free_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn rpc_state(storage: Option<Arc<dyn Storage>>) -> RpcState {
    RpcState {
        table:   Arc::new(FlowTable::new()),
        storage: Arc::new(Mutex::new(storage)),
    }
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let resp = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn flow_search_without_backend_is_404() {
    let app = rpc::routes(rpc_state(None));
    let (status, _) = get(app, "/rpc/flows?protocol=tcp").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn flow_search_empty_result_is_404_when_strict() {
    // scenario B: empty table, strict search maps no matches to a failure
    let app = rpc::routes(rpc_state(Some(Arc::new(MemStorage::strict()))));
    let (status, _) = get(app, "/rpc/flows?protocol=tcp").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn flow_search_returns_stored_flows() {
    let storage = Arc::new(MemStorage::new());
    storage.store_flows(&[
        flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 100, 1),
        flow(Protocol::UDP, "10.0.0.1:5353", "10.0.0.3:53", 40, 1),
    ]).unwrap();

    let app = rpc::routes(rpc_state(Some(storage)));
    let (status, body) = get(app, "/rpc/flows?protocol=tcp").await;
    assert_eq!(status, StatusCode::OK);

    let flows: Vec<Flow> = serde_json::from_slice(&body).unwrap();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].bytes, 100);
}

#[tokio::test]
async fn conversation_unknown_layer_falls_back_to_ethernet() {
    let state = rpc_state(None);
    let mut batch = vec![flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 100, 1)];
    state.table.update(&mut batch);

    let app = rpc::routes(state);
    let (status, body) = get(app, "/rpc/conversation/bogus").await;
    assert_eq!(status, StatusCode::OK);

    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(doc["links"][0]["value"], 100);
}

#[tokio::test]
async fn conversation_empty_table_is_well_formed() {
    let app = rpc::routes(rpc_state(None));
    let (status, body) = get(app, "/rpc/conversation/ipv4").await;
    assert_eq!(status, StatusCode::OK);

    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(doc["nodes"].as_array().unwrap().is_empty());
    assert!(doc["links"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn discovery_unknown_type_falls_back_to_bytes() {
    let state = rpc_state(None);
    let mut batch = vec![flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 100, 1)];
    state.table.update(&mut batch);

    let app = rpc::routes(state);
    let (status, body) = get(app, "/rpc/discovery/bogus").await;
    assert_eq!(status, StatusCode::OK);

    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["children"][0]["name"], "TCP");
    assert_eq!(doc["children"][0]["size"], 100);
}

#[test]
fn analysis_enriches_post_merge_state() {
    let server = Server::new(Config::new("127.0.0.1", free_port(), 10), None).unwrap();

    server.graph().add_node(crate::graph::Node {
        id:       "n1".to_string(),
        name:     "host-n1".to_string(),
        addrs:    vec!["10.0.0.1".parse().unwrap()],
        macs:     Vec::new(),
        metadata: HashMap::new(),
    });

    server.analyze_flows(vec![flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 100, 1)]);
    server.analyze_flows(vec![flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 150, 2)]);

    let storage = Arc::new(MemStorage::new());
    server.set_storage(storage.clone());
    server.flush();

    assert_eq!(storage.len(), 1);
    let stored = storage.search_flows(&Default::default()).unwrap();
    assert_eq!(stored[0].bytes, 250);
    assert_eq!(stored[0].src_node.as_deref(), Some("n1"));
}

#[test]
fn scenario_merge_over_udp_reaches_the_sink() {
    // scenario A: two datagrams with the same key, 100 + 150 bytes,
    // arrive at the sink as one flow of 250 after the forced sweep
    let port    = free_port();
    let storage = Arc::new(MemStorage::new());
    let server  = Arc::new(Server::new(
        Config::new("127.0.0.1", port, 10),
        Some(storage.clone() as Arc<dyn Storage>),
    ).unwrap());

    let srv  = server.clone();
    let task = thread::spawn(move || srv.run());

    let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr  = format!("127.0.0.1:{}", port);

    // primer with its own key: retried until the ingestion loop is up,
    // so the two measured datagrams below are sent exactly once
    let primer = serde_json::to_vec(&flow(Protocol::UDP, "10.0.0.9:5353", "10.0.0.8:53", 1, 1)).unwrap();
    let a = serde_json::to_vec(&flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 100, 1)).unwrap();
    let b = serde_json::to_vec(&flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 150, 2)).unwrap();
    let key = flow(Protocol::TCP, "10.0.0.1:1234", "10.0.0.2:80", 0, 0).key();

    let table = server.table();
    assert!(wait_for(|| {
        let _ = probe.send_to(&primer, &addr);
        table.len() > 0
    }));

    probe.send_to(&a, &addr).unwrap();
    assert!(wait_for(|| table.get(&key).map(|f| f.bytes) == Some(100)));

    probe.send_to(&b, &addr).unwrap();
    assert!(wait_for(|| table.get(&key).map(|f| f.bytes) == Some(250)));

    // a malformed datagram is dropped, not forwarded into analysis
    probe.send_to(b"not a flow", &addr).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(table.len(), 2);

    server.flush();
    let mut filters = HashMap::new();
    filters.insert("protocol".to_string(), "tcp".to_string());
    let stored = storage.search_flows(&filters).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].bytes, 250);

    server.stop();
    task.join().unwrap().unwrap();
}

#[test]
fn scenario_stop_releases_the_socket() {
    // scenario C: stop terminates every loop and the port can be rebound
    let port   = free_port();
    let server = Arc::new(Server::new(Config::new("127.0.0.1", port, 10), None).unwrap());

    let srv  = server.clone();
    let task = thread::spawn(move || srv.run());

    thread::sleep(Duration::from_millis(300));
    server.stop();
    task.join().unwrap().unwrap();

    assert!(UdpSocket::bind(("127.0.0.1", port)).is_ok());
}

#[test]
fn run_is_not_reentrant() {
    let port   = free_port();
    let server = Arc::new(Server::new(Config::new("127.0.0.1", port, 10), None).unwrap());

    let srv  = server.clone();
    let task = thread::spawn(move || srv.run());

    thread::sleep(Duration::from_millis(300));
    assert!(server.run().is_err());

    server.stop();
    task.join().unwrap().unwrap();
}

#[test]
fn bind_failure_aborts_startup() {
    let holder = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port   = holder.local_addr().unwrap().port();

    let server = Server::new(Config::new("127.0.0.1", port, 10), None).unwrap();
    assert!(server.run().is_err());

    // the failed start leaves the server stoppable and restartable-safe
    server.stop();
}
