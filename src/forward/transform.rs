//! Header rewriting between clients and cluster nodes.
//!
//! # Responsibilities
//! - Replace any client-supplied trust header with the role claim
//! - Strip credentials (`Authorization`, `Cookie`) before forwarding
//! - Strip hop-by-hop headers in both directions
//! - Add `X-Forwarded-For`, `X-Forwarded-Proto`, `X-Forwarded-Host`
//! - Strip `Access-Control-*` from responses; the proxy owns CORS
//!
//! # Design Decisions
//! - Never trust a trust header from the client, even when anonymous
//! - Existing `X-Forwarded-For` is extended, not replaced

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Connection facts the backend cannot see itself.
#[derive(Debug, Clone, Default)]
pub struct ForwardedInfo {
    pub client_ip: Option<IpAddr>,
    pub tls: bool,
    pub host: Option<String>,
}

/// Request and response header rewriting.
#[derive(Debug, Clone)]
pub struct ForwardingTransform {
    trust_header: HeaderName,
}

impl ForwardingTransform {
    pub fn new(trust_header: HeaderName) -> Self {
        Self { trust_header }
    }

    pub fn trust_header(&self) -> &HeaderName {
        &self.trust_header
    }

    /// Headers to send to the node.
    pub fn request_headers(
        &self,
        incoming: &HeaderMap,
        role: Option<&str>,
        info: &ForwardedInfo,
    ) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = incoming.clone();
        strip_hop_by_hop(&mut headers);

        headers.remove(header::HOST);
        headers.remove(header::AUTHORIZATION);
        headers.remove(header::COOKIE);
        headers.remove(&self.trust_header);

        if let Some(role) = role {
            headers.insert(self.trust_header.clone(), HeaderValue::from_str(role)?);
        }

        if let Some(ip) = info.client_ip {
            let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{existing}, {ip}"),
                None => ip.to_string(),
            };
            headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&value)?);
        }
        headers.insert(
            X_FORWARDED_PROTO,
            HeaderValue::from_static(if info.tls { "https" } else { "http" }),
        );
        if let Some(host) = &info.host {
            headers.insert(X_FORWARDED_HOST, HeaderValue::from_str(host)?);
        }

        Ok(headers)
    }

    /// Headers to send back to the client.
    pub fn response_headers(&self, upstream: &HeaderMap) -> HeaderMap {
        let mut headers = upstream.clone();
        strip_hop_by_hop(&mut headers);

        let cors: Vec<HeaderName> = headers
            .keys()
            .filter(|name| name.as_str().starts_with("access-control-"))
            .cloned()
            .collect();
        for name in cors {
            headers.remove(name);
        }
        headers
    }
}

/// Remove hop-by-hop headers, including those named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> ForwardingTransform {
        ForwardingTransform::new(HeaderName::from_static("es-trustedauth"))
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::from_bytes(name.as_bytes()).unwrap();
            map.append(name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn replaces_client_trust_header_with_role() {
        let incoming = headers(&[
            ("ES-TrustedAuth", "admin; $admins"),
            ("authorization", "Basic b3BzOnNlY3JldA=="),
            ("cookie", "session=1"),
            ("host", "a.esdb.local"),
            ("accept", "application/json"),
        ]);

        let out = transform()
            .request_headers(&incoming, Some("ops; $ops"), &ForwardedInfo::default())
            .unwrap();

        assert_eq!(out.get_all("es-trustedauth").iter().count(), 1);
        assert_eq!(out["es-trustedauth"], "ops; $ops");
        assert!(out.get(header::AUTHORIZATION).is_none());
        assert!(out.get(header::COOKIE).is_none());
        assert!(out.get(header::HOST).is_none());
        assert_eq!(out["accept"], "application/json");
    }

    #[test]
    fn anonymous_requests_lose_trust_header() {
        let incoming = headers(&[("es-trustedauth", "admin")]);
        let out = transform()
            .request_headers(&incoming, None, &ForwardedInfo::default())
            .unwrap();
        assert!(out.get("es-trustedauth").is_none());
    }

    #[test]
    fn appends_forwarded_headers() {
        let incoming = headers(&[("x-forwarded-for", "192.0.2.1")]);
        let info = ForwardedInfo {
            client_ip: Some("198.51.100.7".parse().unwrap()),
            tls: true,
            host: Some("a.esdb.local".into()),
        };

        let out = transform().request_headers(&incoming, None, &info).unwrap();
        assert_eq!(out["x-forwarded-for"], "192.0.2.1, 198.51.100.7");
        assert_eq!(out["x-forwarded-proto"], "https");
        assert_eq!(out["x-forwarded-host"], "a.esdb.local");
    }

    #[test]
    fn strips_connection_named_headers() {
        let incoming = headers(&[
            ("connection", "keep-alive, x-private"),
            ("x-private", "1"),
            ("keep-alive", "timeout=5"),
            ("te", "trailers"),
        ]);
        let out = transform()
            .request_headers(&incoming, None, &ForwardedInfo::default())
            .unwrap();
        assert!(out.get("x-private").is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("te").is_none());
        assert!(out.get("connection").is_none());
    }

    #[test]
    fn response_drops_cors_headers_in_any_case() {
        let upstream = headers(&[
            ("Access-Control-Allow-Origin", "*"),
            ("ACCESS-CONTROL-ALLOW-CREDENTIALS", "true"),
            ("access-control-expose-headers", "Location"),
            ("transfer-encoding", "chunked"),
            ("es-position", "0"),
        ]);

        let out = transform().response_headers(&upstream);
        assert_eq!(out.len(), 1);
        assert_eq!(out["es-position"], "0");
    }
}
