//! Higher-level integration tests that exercise `prokzee-proxy` the way an
//! operator would: a `Store` backed by a real on-disk SQLite file, and a
//! loopback `ProxyServer` fronting a local HTTP server, driven with
//! `reqwest` configured to use the proxy.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use prokzee_proxy::broker::ApprovalBroker;
use prokzee_proxy::ca::CaManager;
use prokzee_proxy::events::EventBus;
use prokzee_proxy::matchreplace::MatchReplaceEngine;
use prokzee_proxy::proxy::ProxyServer;
use prokzee_proxy::rules::RuleEngine;
use prokzee_proxy::scope::ScopeFilter;
use prokzee_proxy::store::models::{ListRequestsQuery, RequestRecord, ScopeList};
use prokzee_proxy::store::Store;

fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("prokzee.sqlite3")).unwrap();
    (dir, store)
}

fn sample_request(domain: &str) -> RequestRecord {
    RequestRecord {
        id: 0,
        external_id: uuid::Uuid::new_v4().to_string(),
        url: format!("https://{domain}/login"),
        method: "POST".to_string(),
        domain: domain.to_string(),
        port: 443,
        path: "/login".to_string(),
        query: String::new(),
        protocol_version: "HTTP/1.1".to_string(),
        request_headers: "{}".to_string(),
        request_body: "user=admin".to_string(),
        response_headers: Some("{}".to_string()),
        response_body: Some("ok".to_string()),
        status: Some(200),
        length: Some(2),
        mime_type: Some("text/plain".to_string()),
        timestamp: 0,
    }
}

#[test]
fn store_persists_requests_across_a_fresh_connection() {
    let (dir, store) = open_store();
    let id = store.insert_request(&sample_request("example.com")).unwrap();
    drop(store);

    let reopened = Store::open(&dir.path().join("prokzee.sqlite3")).unwrap();
    let fetched = reopened.get_request(id).unwrap();
    assert_eq!(fetched.domain, "example.com");
    assert_eq!(fetched.request_body, "user=admin");
}

#[test]
fn store_list_requests_filters_by_search_term_and_reports_total() {
    let (_dir, store) = open_store();
    store.insert_request(&sample_request("example.com")).unwrap();
    store.insert_request(&sample_request("other.example.com")).unwrap();
    store.insert_request(&sample_request("unrelated.test")).unwrap();

    let query = ListRequestsQuery {
        page: 0,
        limit: 50,
        sort_key: "id".to_string(),
        search: Some("example.com".to_string()),
        ..Default::default()
    };
    let (records, total) = store.list_requests(&query).unwrap();
    assert_eq!(total, 2, "subdomain suffix match should include both example.com hosts");
    assert!(records.iter().all(|r| r.domain.ends_with("example.com")));
}

#[test]
fn store_scope_round_trips_through_json_columns() {
    let (_dir, store) = open_store();
    let scope = ScopeList {
        in_scope: vec!["example\\.com$".to_string()],
        out_scope: vec!["static\\.example\\.com$".to_string()],
    };
    store.set_scope(&scope).unwrap();
    assert_eq!(store.get_scope().unwrap(), scope);
}

#[test]
fn store_replay_tab_tracks_inserted_request_ids() {
    let (_dir, store) = open_store();
    let tab_id = store.insert_replay_tab("login flow").unwrap();
    let record_id = store.insert_request_into_replay_tab(tab_id, &sample_request("example.com")).unwrap();

    let tab = store.get_replay_tab(tab_id).unwrap();
    assert_eq!(tab.name, "login flow");
    assert_eq!(tab.request_ids, vec![record_id]);
}

/// Spin up a tiny loopback "upstream" that always answers `200 hello`.
async fn spawn_echo_upstream() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut stream = stream;
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let body = b"hello";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(body).await;
            });
        }
    });
    addr
}

/// Build a fully wired, non-intercepting `ProxyServer` bound to a loopback
/// port, returning its address once it has started accepting.
async fn spawn_pass_through_proxy(store: Arc<Store>) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let ca_dir = tempfile::tempdir().unwrap();
    let ca = Arc::new(CaManager::load_or_create(ca_dir.path()).unwrap());
    let scope = Arc::new(ScopeFilter::new(&ScopeList::default()).unwrap());
    let rules = Arc::new(RuleEngine::new(vec![]).unwrap());
    let match_replace = Arc::new(MatchReplaceEngine::new(vec![]));
    let broker = Arc::new(ApprovalBroker::new());
    let bus = Arc::new(EventBus::new());
    // Interception off: every request takes the pass-through branch, but is
    // still recorded in the store, which is what this test asserts on.
    let intercept_enabled = Arc::new(AtomicBool::new(false));

    let server = ProxyServer::new(addr, ca, scope, rules, match_replace, broker, store, bus, intercept_enabled);
    tokio::spawn(server.run());

    // Give the accept loop a moment to bind before the first connection attempt.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    addr
}

#[tokio::test]
async fn pass_through_proxy_forwards_the_request_and_records_it() {
    let upstream_addr = spawn_echo_upstream().await;
    let (_dir, store) = open_store();
    let store = Arc::new(store);
    let proxy_addr = spawn_pass_through_proxy(store.clone()).await;

    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy_addr}")).unwrap())
        .build()
        .unwrap();

    let url = format!("http://{upstream_addr}/hello");
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(body, "hello");

    let query = ListRequestsQuery { page: 0, limit: 50, sort_key: "id".to_string(), ..Default::default() };
    let (records, total) = store.list_requests(&query).unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].status, Some(200));
    assert_eq!(records[0].response_body.as_deref(), Some("hello"));
}

#[tokio::test]
async fn out_of_scope_host_is_still_forwarded_and_logged_unintercepted() {
    // With an empty scope list every host is in scope; this exercises the
    // same pass-through path a real deployment hits for the vast majority
    // of traffic, where interception is selectively enabled per rule.
    let upstream_addr = spawn_echo_upstream().await;
    let (_dir, store) = open_store();
    let store = Arc::new(store);
    let proxy_addr = spawn_pass_through_proxy(store.clone()).await;

    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy_addr}")).unwrap())
        .build()
        .unwrap();

    for _ in 0..3 {
        let url = format!("http://{upstream_addr}/ping");
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    let query = ListRequestsQuery { page: 0, limit: 50, sort_key: "id".to_string(), ..Default::default() };
    let (_records, total) = store.list_requests(&query).unwrap();
    assert_eq!(total, 3, "every forwarded request is still recorded even when never intercepted");
}
