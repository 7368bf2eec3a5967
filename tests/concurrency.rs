//! Concurrency behavior: parallel sync handlers, index rebuilds under
//! concurrent searches, and session-death supervision.

use std::sync::{Arc, Barrier};
use std::time::Duration;

use serde_json::json;

use mcp_fabric::component::Component;
use mcp_fabric::provider::RegistryProvider;
use mcp_fabric::server::Server;
use mcp_fabric::tasks::CallOutcome;
use mcp_fabric::transform::search::{Bm25Search, SearchStrategy};
use mcp_fabric::Error;

/// Three synchronous handlers rendezvous on one barrier. The calls only
/// finish if they run in parallel; serialized execution would deadlock
/// and trip the outer timeout.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_handlers_run_in_parallel() {
    let barrier = Arc::new(Barrier::new(3));
    let registry = RegistryProvider::new("r");
    for name in ["first", "second", "third"] {
        let barrier = Arc::clone(&barrier);
        registry
            .add(Component::blocking_tool(name, move |_args| {
                barrier.wait();
                Ok(json!("released"))
            }))
            .unwrap();
    }

    let server = Arc::new(Server::builder("t", "0.0.0").provider(Arc::new(registry)).build());
    let session = server.connect();

    let call = |name: &'static str| {
        let server = Arc::clone(&server);
        let session = Arc::clone(&session);
        async move { server.call_tool(&session, name, json!({}), None).await }
    };

    let joined = tokio::time::timeout(
        Duration::from_secs(5),
        futures::future::try_join3(call("first"), call("second"), call("third")),
    )
    .await
    .expect("handlers serialized behind one another")
    .unwrap();

    for outcome in [joined.0, joined.1, joined.2] {
        assert!(matches!(outcome, CallOutcome::Completed(v) if v == json!("released")));
    }
}

fn described_tool(name: &str, description: &str) -> Component {
    Component::tool(name, |_a, _c| async { Ok(json!(null)) }).with_description(description)
}

/// Concurrent searches while the candidate set flips between two catalogs.
/// Every search must see a coherent index: results always come from the
/// candidate set that was passed in, never a torn mixture.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bm25_index_swaps_are_atomic_under_concurrent_searches() {
    let strategy = Arc::new(Bm25Search::new());

    let set_a: Vec<Component> = vec![
        described_tool("alpha_fetch", "Fetch a web page over HTTP"),
        described_tool("alpha_add", "Add two numbers together"),
    ];
    let set_b: Vec<Component> = vec![
        described_tool("beta_fetch", "Fetch a web page over HTTP"),
        described_tool("beta_grep", "Search file contents for a pattern"),
    ];

    let mut handles = Vec::new();
    for i in 0..64 {
        let strategy = Arc::clone(&strategy);
        let candidates = if i % 2 == 0 { set_a.clone() } else { set_b.clone() };
        let expected_prefix = if i % 2 == 0 { "alpha_" } else { "beta_" };
        handles.push(tokio::spawn(async move {
            let hits = strategy
                .search("fetch web page", &candidates, 10)
                .expect("search failed");
            assert!(!hits.is_empty());
            for hit in hits {
                assert!(
                    hit.name.starts_with(expected_prefix),
                    "torn index: got {} from the other candidate set",
                    hit.name
                );
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

/// A call supervised against session liveness unblocks with
/// `SessionClosed` when the session dies, even though the handler itself
/// never yields a result.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_death_unblocks_inflight_calls() {
    let registry = RegistryProvider::new("r");
    registry
        .add(Component::tool("stuck", |_a, _c| async {
            std::future::pending::<()>().await;
            unreachable!()
        }))
        .unwrap();

    let server = Arc::new(Server::builder("t", "0.0.0").provider(Arc::new(registry)).build());
    let session = server.connect();
    let session_id = session.id().to_string();

    let inflight = {
        let server = Arc::clone(&server);
        let session = Arc::clone(&session);
        tokio::spawn(async move { server.call_tool(&session, "stuck", json!({}), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(server.disconnect(&session_id));

    let outcome = tokio::time::timeout(Duration::from_secs(2), inflight)
        .await
        .expect("call stayed blocked past session death")
        .unwrap();
    match outcome {
        Err(Error::SessionClosed { session_id: dead }) => assert_eq!(dead, session_id),
        other => panic!("expected SessionClosed, got {other:?}"),
    }
}

/// Session state is cleared on disconnect; a new session starts clean.
#[tokio::test]
async fn disconnect_clears_session_state() {
    let registry = RegistryProvider::new("r");
    registry
        .add(Component::tool("remember", |args, cx| async move {
            cx.set_state("value", args["value"].clone());
            Ok(json!(null))
        }))
        .unwrap();
    let server = Server::builder("t", "0.0.0").provider(Arc::new(registry)).build();

    let session = server.connect();
    server
        .call_tool(&session, "remember", json!({"value": 42}), None)
        .await
        .unwrap();
    assert_eq!(session.get_state("value"), Some(json!(42)));

    let id = session.id().to_string();
    server.disconnect(&id);
    assert_eq!(session.get_state("value"), None);
}
