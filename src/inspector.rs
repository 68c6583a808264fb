//! The seam every policy stage implements.

use async_trait::async_trait;
use bytes::Bytes;

use crate::action::Action;
use crate::error::InspectorError;
use crate::store::Identity;

/// Read-only view of the intercepted request handed to every inspector.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// HTTP method, uppercased.
    pub method: String,
    /// Path plus query string, as the client sent it.
    pub path: String,
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
    pub accept: Option<String>,
    /// The client's Authorization header, forwarded verbatim to clones.
    pub authorization: Option<String>,
    /// The fully buffered request body.
    pub body: Bytes,
    /// Pre-verified identity installed by the host, when one exists.
    pub identity: Option<Identity>,
}

impl RequestContext {
    /// Capture the fields of interest from a decomposed hyper request.
    pub fn from_parts(parts: &http::request::Parts, body: Bytes) -> RequestContext {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path())
            .to_string();
        RequestContext {
            method: parts.method.as_str().to_string(),
            path,
            content_type: header("content-type"),
            user_agent: header("user-agent"),
            accept: header("accept"),
            authorization: header("authorization"),
            body,
            identity: parts.extensions.get::<Identity>().cloned(),
        }
    }
}

/// One stage of a policy chain.
///
/// An inspector appends a Step recording its outcome and resolves every
/// recoverable failure into that Step's `error`/`blocked` flags. Returning
/// [`InspectorError::Failed`] is equivalent: the executor converts it to an
/// error Step under the inspector's name. Only
/// [`InspectorError::Precondition`] escapes the chain.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Stable name, used for step attribution and logging.
    fn name(&self) -> &'static str;

    /// Inspect the request and record the verdict on `action`.
    async fn exec(&self, req: &RequestContext, action: &mut Action)
        -> Result<(), InspectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_captures_headers_and_query() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/finos/git-proxy.git/git-receive-pack?foo=1")
            .header("content-type", "application/x-git-receive-pack-request")
            .header("user-agent", "git/2.46.0")
            .header("authorization", "Basic Zm9vOmJhcg==")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        let ctx = RequestContext::from_parts(&parts, Bytes::from_static(b"0000"));
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.path, "/finos/git-proxy.git/git-receive-pack?foo=1");
        assert_eq!(
            ctx.content_type.as_deref(),
            Some("application/x-git-receive-pack-request")
        );
        assert_eq!(ctx.user_agent.as_deref(), Some("git/2.46.0"));
        assert_eq!(ctx.body.as_ref(), b"0000");
        assert!(ctx.identity.is_none());
    }
}
