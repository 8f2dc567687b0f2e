//! Basic and user-list authentication against live mock nodes.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio_util::sync::CancellationToken;

use eventstore_proxy::auth::{AuthError, Authenticator, BasicAuthBridge, UserListAuthenticator};
use eventstore_proxy::config::NodeConfig;
use eventstore_proxy::forward::NodeTable;

mod common;
use common::{CapturedRequest, MockReply};

const ADMIN: &str = "admin:changeit";

fn basic(raw: &str) -> String {
    format!("Basic {}", STANDARD.encode(raw))
}

/// A node accepting only `admin:changeit` on `/info` and serving
/// everything else.
async fn cluster_node() -> (std::net::SocketAddr, tokio::sync::mpsc::UnboundedReceiver<CapturedRequest>) {
    common::start_programmable_backend(|request: CapturedRequest| async move {
        if request.path == "/info" {
            if request.header("authorization") == Some(basic(ADMIN).as_str()) {
                MockReply::new(200, "{\"esVersion\":\"23.10\"}")
            } else {
                MockReply::new(401, "")
            }
        } else {
            MockReply::new(200, "node-data")
        }
    })
    .await
}

fn basic_bridge(nodes: &[NodeConfig]) -> Arc<dyn Authenticator> {
    Arc::new(
        BasicAuthBridge::new(common::client(), Arc::new(NodeTable::from_config(nodes)), "http")
            .with_timeout(Duration::from_secs(2)),
    )
}

#[tokio::test]
async fn basic_probe_fails_over_to_the_next_node() {
    let dead = common::closed_addr().await;
    let (live, mut requests) = cluster_node().await;
    let nodes = vec![common::node("a.esdb.local", dead), common::node("b.esdb.local", live)];
    let (proxy, shutdown) =
        common::start_proxy(common::config(nodes.clone()), Some(basic_bridge(&nodes)), None).await;

    let res = common::client()
        .get(format!("http://{proxy}/gossip"))
        .header("host", "b.esdb.local")
        .header("authorization", basic(ADMIN))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "node-data");

    let probe = requests.recv().await.unwrap();
    assert_eq!(probe.path, "/info");
    let forwarded = requests.recv().await.unwrap();
    assert_eq!(forwarded.path, "/gossip");
    assert_eq!(forwarded.header("authorization"), None);

    shutdown.trigger();
}

#[tokio::test]
async fn probe_walks_nodes_in_order() {
    let first = common::closed_addr().await;
    let second = common::closed_addr().await;
    let (third, _requests) = cluster_node().await;
    let nodes = vec![
        common::node("a.esdb.local", first),
        common::node("b.esdb.local", second),
        common::node("c.esdb.local", third),
    ];
    let bridge = BasicAuthBridge::new(common::client(), Arc::new(NodeTable::from_config(&nodes)), "http");

    let report = bridge.probe(&basic(ADMIN), &CancellationToken::new()).await.unwrap();
    assert_eq!(report.status, StatusCode::OK);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.node, third.to_string());

    let down = vec![
        common::node("a.esdb.local", first),
        common::node("b.esdb.local", second),
        common::node("c.esdb.local", common::closed_addr().await),
    ];
    let bridge = BasicAuthBridge::new(common::client(), Arc::new(NodeTable::from_config(&down)), "http");
    let err = bridge.probe(&basic(ADMIN), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AuthError::AllNodesUnreachable { attempts: 3 }));
}

#[tokio::test]
async fn wrong_password_is_rejected_without_fallback() {
    let (first, mut first_requests) = cluster_node().await;
    let (second, mut second_requests) = cluster_node().await;
    let nodes = vec![common::node("a.esdb.local", first), common::node("b.esdb.local", second)];
    let (proxy, shutdown) =
        common::start_proxy(common::config(nodes.clone()), Some(basic_bridge(&nodes)), None).await;

    let res = common::client()
        .get(format!("http://{proxy}/streams/orders"))
        .header("host", "a.esdb.local")
        .header("authorization", basic("admin:wrong"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.text().await.unwrap(), "Invalid username/password");
    assert_eq!(first_requests.recv().await.unwrap().path, "/info");
    assert!(first_requests.try_recv().is_err());
    assert!(second_requests.try_recv().is_err());

    shutdown.trigger();
}

#[tokio::test]
async fn all_nodes_unreachable_is_service_unavailable() {
    let nodes = vec![
        common::node("a.esdb.local", common::closed_addr().await),
        common::node("b.esdb.local", common::closed_addr().await),
    ];
    let (proxy, shutdown) =
        common::start_proxy(common::config(nodes.clone()), Some(basic_bridge(&nodes)), None).await;

    let res = common::client()
        .get(format!("http://{proxy}/streams/orders"))
        .header("host", "a.esdb.local")
        .header("authorization", basic(ADMIN))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    shutdown.trigger();
}

#[tokio::test]
async fn anonymous_requests_reach_open_routes_only() {
    let (live, _requests) = cluster_node().await;
    let nodes = vec![common::node("a.esdb.local", live)];
    let (proxy, shutdown) =
        common::start_proxy(common::config(nodes.clone()), Some(basic_bridge(&nodes)), None).await;
    let client = common::client();

    let open = client
        .get(format!("http://{proxy}/streams/orders"))
        .header("host", "a.esdb.local")
        .send()
        .await
        .unwrap();
    assert_eq!(open.status(), StatusCode::OK);
    assert_eq!(open.text().await.unwrap(), "node-data");

    for path in ["/gossip", "/ping", "/stats", "/elections"] {
        let res = client
            .get(format!("http://{proxy}{path}"))
            .header("host", "a.esdb.local")
            .header("authorization", "Basic !!!")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{path}");
    }

    let me = client
        .get(format!("http://{proxy}/Me"))
        .header("host", "a.esdb.local")
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::FORBIDDEN);

    shutdown.trigger();
}

#[tokio::test]
async fn user_listing_supplies_role_and_groups() {
    let listing = r#"{"data":[
        {"loginName":"admin","groups":["$admins","$ops"],"disabled":false},
        {"loginName":"old","groups":[],"disabled":true}
    ]}"#;
    let (node, mut requests) = common::start_programmable_backend(move |request: CapturedRequest| async move {
        match request.path.as_str() {
            "/users" if request.header("authorization").is_some() => MockReply::new(200, listing),
            "/users" => MockReply::new(401, ""),
            _ => MockReply::new(200, "node-data"),
        }
    })
    .await;
    let nodes = vec![common::node("a.esdb.local", node)];
    let users: Arc<dyn Authenticator> = Arc::new(UserListAuthenticator::new(
        common::client(),
        Arc::new(NodeTable::from_config(&nodes)),
        "http",
    ));
    let (proxy, shutdown) = common::start_proxy(common::config(nodes), Some(users), None).await;
    let client = common::client();

    let res = client
        .get(format!("http://{proxy}/streams/orders"))
        .header("host", "a.esdb.local")
        .header("authorization", basic(ADMIN))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert_eq!(requests.recv().await.unwrap().path, "/users");
    let forwarded = requests.recv().await.unwrap();
    assert_eq!(forwarded.header("es-trustedauth"), Some("admin; $admins,$ops"));

    let me: serde_json::Value = client
        .get(format!("http://{proxy}/Me"))
        .header("host", "a.esdb.local")
        .header("authorization", basic(ADMIN))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["username"], "admin");
    assert_eq!(me["groups"], serde_json::json!(["$admins", "$ops"]));

    let disabled = client
        .get(format!("http://{proxy}/streams/orders"))
        .header("host", "a.esdb.local")
        .header("authorization", basic("old:pw"))
        .send()
        .await
        .unwrap();
    assert_eq!(disabled.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(disabled.text().await.unwrap(), "User disabled");

    shutdown.trigger();
}
