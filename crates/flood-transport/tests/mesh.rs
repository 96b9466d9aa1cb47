//! End-to-end mesh tests over loopback TCP

use flood_core::{Event, EventKind, Session, SharedDocument, SiteId};
use flood_transport::{Node, NodeConfig, NodeHandle};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

struct TestPeer {
    handle: NodeHandle,
    session: Arc<Session>,
    inserted: Arc<Mutex<Vec<Value>>>,
    deleted: Arc<Mutex<Vec<Value>>>,
}

impl TestPeer {
    async fn start(alias: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let site = SiteId::new(listener.local_addr().unwrap().to_string()).unwrap();
        let session = Arc::new(Session::new(alias, format!("{}'s doc", alias)));

        let mut node = Node::new(site, session.clone(), NodeConfig::default());

        let inserted = Arc::new(Mutex::new(Vec::new()));
        let sink = inserted.clone();
        node.subscribe(EventKind::RemoteInsertion, move |event| {
            // the join snapshot of an empty document arrives as []
            if let Event::RemoteInsertion(payload) = event {
                if payload != &json!([]) {
                    sink.lock().push(payload.clone());
                }
            }
        });

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = deleted.clone();
        node.subscribe(EventKind::RemoteDeletion, move |event| {
            if let Event::RemoteDeletion(payload) = event {
                sink.lock().push(payload.clone());
            }
        });

        let handle = node.spawn(listener);
        Self {
            handle,
            session,
            inserted,
            deleted,
        }
    }

    fn site(&self) -> &SiteId {
        self.handle.local_site()
    }

    fn knows(&self, other: &TestPeer) -> bool {
        self.session
            .participants()
            .iter()
            .any(|p| &p.site == other.site())
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_join_then_edit() {
    let a = TestPeer::start("alice").await;
    let b = TestPeer::start("bob").await;

    let joined = b.handle.join(a.site()).await.unwrap();
    assert_eq!(&joined, a.site());

    eventually("b to finish joining", || a.knows(&b) && b.knows(&a)).await;
    assert_eq!(b.session.document_title(), "alice's doc");

    a.handle.insert(json!("hello")).unwrap();
    b.handle.insert(json!("world")).unwrap();

    eventually("a to see b's insertion", || a.inserted.lock().len() == 1).await;
    eventually("b to see a's insertion", || b.inserted.lock().len() == 1).await;
    assert_eq!(*a.inserted.lock(), vec![json!("world")]);
    assert_eq!(*b.inserted.lock(), vec![json!("hello")]);

    a.handle.delete(json!("hello")).unwrap();
    eventually("b to see the deletion", || b.deleted.lock().len() == 1).await;

    let status = a.handle.status().await.unwrap();
    assert_eq!(status.clock.local_counter(), 2);
    assert_eq!(status.clock.get(b.site()), 1);
    assert_eq!(status.pending, 0);
    assert!(status.relay.is_empty());
    assert_eq!(status.neighbours, vec![b.site().clone()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_third_peer_builds_full_mesh() {
    let a = TestPeer::start("alice").await;
    let b = TestPeer::start("bob").await;
    let c = TestPeer::start("carol").await;

    b.handle.join(a.site()).await.unwrap();
    eventually("b to join", || a.knows(&b)).await;

    a.handle.insert(json!("before c")).unwrap();
    eventually("b to see the first insertion", || b.inserted.lock().len() == 1).await;

    c.handle.join(a.site()).await.unwrap();
    eventually("c to connect to both", || a.knows(&c) && b.knows(&c)).await;

    let status = c.handle.status().await.unwrap();
    assert_eq!(status.clock.get(a.site()), 1);
    assert_eq!(status.neighbours.len(), 2);

    b.handle.insert(json!("from b")).unwrap();
    eventually("a and c to see b's insertion", || {
        a.inserted.lock().contains(&json!("from b")) && c.inserted.lock().contains(&json!("from b"))
    })
    .await;

    // c reaches b directly and through a, but delivers once
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*c.inserted.lock(), vec![json!("from b")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_announces_disconnect() {
    let a = TestPeer::start("alice").await;
    let b = TestPeer::start("bob").await;

    b.handle.join(a.site()).await.unwrap();
    eventually("b to join", || a.knows(&b)).await;

    b.handle.shutdown().await.unwrap();
    eventually("a to forget b", || !a.knows(&b)).await;

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = a.handle.status().await.unwrap();
        if status.neighbours.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "a still lists b as a neighbour");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(b.handle.insert(json!("late")).is_err());
}
