//! Client certificate authentication.
//!
//! The TLS layer has already verified the certificate chain (or accepted
//! any certificate when no client CA is configured); this step only maps
//! the certificate to a registered identity.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::auth::registry::{simple_name, thumbprint, CertificateRegistry};
use crate::auth::{AuthError, AuthOutcome, AuthScheme, Authenticator, ClaimSet, Credentials};

/// Thumbprint lookup in the certificate registry.
pub struct CertificateAuthenticator {
    registry: Arc<CertificateRegistry>,
}

impl CertificateAuthenticator {
    pub fn new(registry: Arc<CertificateRegistry>) -> Self {
        Self { registry }
    }

    /// Map a DER certificate to an outcome.
    pub async fn validate(&self, der: &[u8]) -> Result<AuthOutcome, AuthError> {
        let fingerprint = thumbprint(der);
        let snapshot = self.registry.current().await?;

        let Some(record) = snapshot.lookup(&fingerprint) else {
            let subject = simple_name(der).unwrap_or_else(|_| "<unparseable>".to_string());
            tracing::warn!(
                subject = %subject,
                thumbprint = %fingerprint,
                "Client certificate not registered"
            );
            return Ok(AuthOutcome::Reject(format!(
                "Certificate with thumbprint {fingerprint} not found"
            )));
        };

        let info = record.user_info();
        tracing::info!(
            name = %record.display_name,
            thumbprint = %fingerprint,
            user = %info.username,
            "Client certificate authenticated"
        );

        Ok(AuthOutcome::Accept(ClaimSet {
            identity: record.display_name.clone(),
            role: Some(record.auth_payload.clone()),
            groups: info.groups,
            scheme: AuthScheme::Certificate,
            certificate: Some(record.display_name.clone()),
        }))
    }
}

#[async_trait]
impl Authenticator for CertificateAuthenticator {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::Certificate
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<AuthOutcome, AuthError> {
        let Some(der) = &credentials.client_certificate else {
            return Ok(AuthOutcome::NoResult);
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            outcome = self.validate(der) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::registry::tests::test_certificate;
    use crate::auth::registry::ClientCertificate;
    use crate::auth::store::MemoryStore;
    use crate::config::CertificateStoreConfig;
    use bytes::Bytes;

    async fn authenticator() -> (CertificateAuthenticator, Vec<u8>) {
        let registry = Arc::new(CertificateRegistry::new(
            Arc::new(MemoryStore::default()),
            &CertificateStoreConfig::default(),
        ));
        let (der, _) = test_certificate("ops-client");
        let certificate =
            ClientCertificate::new(der.clone(), "ops", &["$admins".to_string()]).unwrap();
        registry.save(&[certificate]).await.unwrap();
        (CertificateAuthenticator::new(registry), der)
    }

    #[tokio::test]
    async fn no_certificate_is_no_result() {
        let (auth, _) = authenticator().await;
        let outcome = auth
            .authenticate(&Credentials::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, AuthOutcome::NoResult);
    }

    #[tokio::test]
    async fn registered_certificate_is_accepted() {
        let (auth, der) = authenticator().await;
        let credentials = Credentials {
            client_certificate: Some(Bytes::from(der)),
            ..Default::default()
        };

        let outcome = auth
            .authenticate(&credentials, &CancellationToken::new())
            .await
            .unwrap();
        let claims = match outcome {
            AuthOutcome::Accept(claims) => claims,
            other => panic!("expected accept, got {other:?}"),
        };
        assert_eq!(claims.identity, "ops-client");
        assert_eq!(claims.role.as_deref(), Some("ops; $admins"));
        assert!(claims.in_group("$admins"));
        assert_eq!(claims.certificate.as_deref(), Some("ops-client"));
    }

    #[tokio::test]
    async fn unknown_certificate_is_rejected_with_thumbprint() {
        let (auth, _) = authenticator().await;
        let (other, _) = test_certificate("stranger");
        let tp = thumbprint(&other);

        let outcome = auth.validate(&other).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Reject(format!("Certificate with thumbprint {tp} not found"))
        );
    }
}
