//! Certificate registry management and certificate authentication through
//! the router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use eventstore_proxy::auth::registry::thumbprint;
use eventstore_proxy::auth::{
    AuthOutcome, Authenticator, CertificateAuthenticator, CertificateRegistry, CredentialStore,
    Credentials, MemoryStore, RegistryError,
};
use eventstore_proxy::config::CertificateStoreConfig;
use eventstore_proxy::forward::NodeTable;
use eventstore_proxy::lifecycle::assemble;
use eventstore_proxy::net::PeerCertificate;

mod common;

fn certificate(cn: &str) -> Vec<u8> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(cn.to_string()));
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate().unwrap();
    params.self_signed(&key_pair).unwrap().der().to_vec()
}

fn registry() -> (Arc<MemoryStore>, Arc<CertificateRegistry>) {
    let store = Arc::new(MemoryStore::default());
    let registry = Arc::new(CertificateRegistry::new(
        store.clone() as Arc<dyn CredentialStore>,
        &CertificateStoreConfig::default(),
    ));
    (store, registry)
}

fn with_certificate(der: &[u8]) -> Credentials {
    Credentials {
        authorization: None,
        host: Some("a.esdb.local".to_string()),
        client_certificate: Some(Bytes::copy_from_slice(der)),
    }
}

#[tokio::test]
async fn register_list_and_remove() {
    let (_store, registry) = registry();
    let ops = vec!["$ops".to_string()];

    registry.register(certificate("zeta-client"), "zeta", &[]).await.unwrap();
    registry.register(certificate("alpha-client"), "alpha", &ops).await.unwrap();

    let names: Vec<String> = registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.record.display_name)
        .collect();
    assert_eq!(names, ["alpha-client", "zeta-client"]);

    let duplicate = registry.register(certificate("alpha-client"), "other", &[]).await;
    assert!(matches!(duplicate, Err(RegistryError::Duplicate(name)) if name == "alpha-client"));

    registry.remove("zeta-client").await.unwrap();
    assert_eq!(registry.list().await.unwrap().len(), 1);
    assert!(matches!(
        registry.remove("zeta-client").await,
        Err(RegistryError::NotRegistered(_))
    ));
}

#[tokio::test]
async fn registered_certificate_is_accepted() {
    let (_store, registry) = registry();
    let der = certificate("reporting");
    registry
        .register(der.clone(), "reporter", &["$readers".to_string()])
        .await
        .unwrap();
    let authenticator = CertificateAuthenticator::new(registry);

    let outcome = authenticator
        .authenticate(&with_certificate(&der), &CancellationToken::new())
        .await
        .unwrap();

    let AuthOutcome::Accept(claims) = outcome else {
        panic!("expected accept, got {outcome:?}");
    };
    assert_eq!(claims.identity, "reporting");
    assert_eq!(claims.role.as_deref(), Some("reporter; $readers"));
    assert_eq!(claims.groups, ["$readers"]);
    assert_eq!(claims.certificate.as_deref(), Some("reporting"));
}

#[tokio::test]
async fn unknown_certificate_is_rejected_with_its_thumbprint() {
    let (_store, registry) = registry();
    registry.register(certificate("known"), "known", &[]).await.unwrap();
    let stranger = certificate("stranger");
    let authenticator = CertificateAuthenticator::new(registry);

    let outcome = authenticator
        .authenticate(&with_certificate(&stranger), &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        AuthOutcome::Reject(reason) => assert!(reason.contains(&thumbprint(&stranger))),
        other => panic!("expected reject, got {other:?}"),
    }
}

#[tokio::test]
async fn no_certificate_has_no_opinion() {
    let (_store, registry) = registry();
    let authenticator = CertificateAuthenticator::new(registry);

    let credentials = Credentials {
        authorization: Some("Basic YTpi".to_string()),
        host: None,
        client_certificate: None,
    };
    let outcome = authenticator
        .authenticate(&credentials, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, AuthOutcome::NoResult));
}

#[tokio::test]
async fn me_reports_the_certificate_identity() {
    let (_store, registry) = registry();
    let der = certificate("ops-console");
    registry
        .register(der.clone(), "ops", &["$admins".to_string()])
        .await
        .unwrap();
    let authenticator: Arc<dyn Authenticator> = Arc::new(CertificateAuthenticator::new(registry));

    let config = common::config(vec![common::node("a.esdb.local", common::closed_addr().await)]);
    let nodes = Arc::new(NodeTable::from_config(&config.cluster.nodes));
    let router = assemble(config, common::client(), nodes, Some(authenticator), None)
        .unwrap()
        .router();

    let mut request = Request::builder()
        .uri("/Me")
        .header("host", "a.esdb.local")
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(PeerCertificate(Some(Bytes::from(der))));

    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let me: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(me["certificate"], "ops-console");
    assert_eq!(me["username"], "ops");
    assert_eq!(me["groups"], serde_json::json!(["$admins"]));

    let stranger = Request::builder()
        .uri("/Me")
        .header("host", "a.esdb.local")
        .extension(PeerCertificate(Some(Bytes::from(certificate("stranger")))))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(stranger).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
