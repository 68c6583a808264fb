//! Relay to the upstream git host.
//!
//! The forwarder replays an approved request to `{upstream}{original
//! path}` and streams the upstream response back verbatim. Bodies are
//! never re-framed: an inspected push replays the exact buffered bytes,
//! and everything else streams through without touching the payload.

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use http::{HeaderMap, Method, Response};
use http_body_util::{BodyExt, BodyStream, StreamBody};
use tracing::info;

use crate::error::GatewayError;
use crate::proxy::ProxyBody;

/// Headers that describe one hop, never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client for the upstream host.
pub struct Forwarder {
    client: reqwest::Client,
    upstream: String,
}

impl Forwarder {
    /// Build a forwarder for the given upstream origin.
    ///
    /// Redirects are not followed: a 3xx from the host is part of the
    /// conversation and belongs to the client.
    pub fn new(upstream: impl Into<String>) -> Result<Forwarder, GatewayError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Config {
                details: format!("failed to build upstream client: {e}"),
            })?;
        Ok(Forwarder {
            client,
            upstream: upstream.into().trim_end_matches('/').to_string(),
        })
    }

    /// Replay a fully buffered request body upstream, exactly once.
    pub async fn relay(
        &self,
        parts: &http::request::Parts,
        body: Bytes,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        // Real git never sends a GET body; drop anything a client smuggled.
        let body = if parts.method == Method::GET {
            Bytes::new()
        } else {
            body
        };
        self.send(parts, reqwest::Body::from(body)).await
    }

    /// Relay a request without buffering, streaming the body through.
    pub async fn relay_streaming(
        &self,
        parts: &http::request::Parts,
        body: hyper::body::Incoming,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let stream = BodyStream::new(body).filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(std::io::Error::other(e))),
            }
        });
        self.send(parts, reqwest::Body::wrap_stream(stream)).await
    }

    async fn send(
        &self,
        parts: &http::request::Parts,
        body: reqwest::Body,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let target = self.target_url(parts);
        info!("Sending request to {target}");

        let upstream_response = self
            .client
            .request(parts.method.clone(), &target)
            .headers(outbound_headers(&parts.headers))
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream {
                details: e.to_string(),
            })?;

        let mut builder = Response::builder().status(upstream_response.status());
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in upstream_response.headers() {
                if !HOP_BY_HOP.contains(&name.as_str()) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
        let stream = upstream_response
            .bytes_stream()
            .map_ok(http_body::Frame::data)
            .map_err(std::io::Error::other);
        builder
            .body(BodyExt::boxed(StreamBody::new(stream)))
            .map_err(|e| GatewayError::Upstream {
                details: e.to_string(),
            })
    }

    fn target_url(&self, parts: &http::request::Parts) -> String {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path());
        format!("{}{}", self.upstream, path)
    }
}

/// Request headers forwarded upstream: everything except the host, the
/// body length (recomputed for the replayed body), and hop-by-hop fields.
fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let name_str = name.as_str();
        if name_str == "host" || name_str == "content-length" || HOP_BY_HOP.contains(&name_str) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

// =====================================================================
// Tests
// =====================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_for(uri: &str) -> http::request::Parts {
        let (parts, _) = http::Request::builder()
            .method("POST")
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let forwarder = Forwarder::new("https://github.com").unwrap();
        let parts = parts_for("/finos/git-proxy.git/info/refs?service=git-receive-pack");
        assert_eq!(
            forwarder.target_url(&parts),
            "https://github.com/finos/git-proxy.git/info/refs?service=git-receive-pack"
        );
    }

    #[test]
    fn test_target_url_trims_trailing_slash_of_upstream() {
        let forwarder = Forwarder::new("https://github.com/").unwrap();
        let parts = parts_for("/repo.git/git-upload-pack");
        assert_eq!(
            forwarder.target_url(&parts),
            "https://github.com/repo.git/git-upload-pack"
        );
    }

    #[test]
    fn test_outbound_headers_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "proxy.internal".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("content-length", "42".parse().unwrap());
        headers.insert("authorization", "Basic Zm9vOmJhcg==".parse().unwrap());
        headers.insert("user-agent", "git/2.46.0".parse().unwrap());
        headers.insert(
            "content-type",
            "application/x-git-receive-pack-request".parse().unwrap(),
        );

        let out = outbound_headers(&headers);
        assert!(out.get("host").is_none());
        assert!(out.get("connection").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("content-length").is_none());
        assert_eq!(out.get("authorization").unwrap(), "Basic Zm9vOmJhcg==");
        assert_eq!(out.get("user-agent").unwrap(), "git/2.46.0");
        assert_eq!(
            out.get("content-type").unwrap(),
            "application/x-git-receive-pack-request"
        );
    }
}
