//! Request classification and verdict rendering.
//!
//! Every request is classified before the forwarder sees it. Pack POSTs
//! are buffered in full and run through the policy chains; reference
//! advertisements are validated and passed through untouched; anything
//! else is relayed as-is. A blocking verdict never reaches the forwarder:
//! it becomes an HTTP 200 whose body carries the reason inside the wire
//! protocol's own error framing, so the client renders the message instead
//! of reporting a transport failure.

use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Limited};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

use crate::action::Action;
use crate::error::GatewayError;
use crate::pack::error_packet;
use crate::proxy::{full_body, ProxyBody};

/// `/<org…>/<repo>.git/git-(upload|receive)-pack`, any number of org
/// segments including none.
static PACK_POST_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/.+\.git/git-(upload|receive)-pack$").expect("pack path pattern compiles")
});

/// The smart-protocol reference advertisement for the same repo grammar.
static INFO_REFS_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/.+\.git/info/refs\?service=git-(upload|receive)-pack$")
        .expect("info/refs path pattern compiles")
});

/// True iff this request carries a pack payload that must be buffered and
/// inspected before any byte reaches the upstream host.
pub fn is_pack_post(method: &str, path: &str) -> bool {
    method == "POST" && PACK_POST_PATH.is_match(path)
}

/// True iff the path belongs to the git smart HTTP surface at all.
pub fn is_git_path(path: &str) -> bool {
    PACK_POST_PATH.is_match(path) || INFO_REFS_PATH.is_match(path)
}

/// Whether a git-surface request has the headers a real git client sends.
///
/// Reference discovery carries no Accept header, so only the agent can be
/// checked there. Pack uploads always declare an `application/x-git-`
/// accept type.
pub fn valid_git_request(path: &str, user_agent: Option<&str>, accept: Option<&str>) -> bool {
    let Some(agent) = user_agent else {
        return false;
    };
    if INFO_REFS_PATH.is_match(path) {
        return agent.starts_with("git/");
    }
    if PACK_POST_PATH.is_match(path) {
        let Some(accept) = accept else {
            return false;
        };
        return agent.starts_with("git/") && accept.starts_with("application/x-git-");
    }
    false
}

/// Buffer a request body completely, bounded by `limit`.
pub async fn buffer_body<B>(body: B, limit: usize) -> Result<Bytes, GatewayError>
where
    B: http_body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                Err(GatewayError::BodyTooLarge { limit })
            } else {
                Err(GatewayError::BodyRead {
                    details: e.to_string(),
                })
            }
        }
    }
}

/// The synthesized response for a rejected or parked push.
///
/// HTTP 200 on purpose: wire errors travel in-band, and a non-2xx status
/// would make the client retry or report a proxy failure instead of
/// showing the reason.
pub fn block_response(action: &Action) -> Response<ProxyBody> {
    let mut message = String::new();
    if action.error {
        message = action.error_message.clone().unwrap_or_default();
        error!("{message}");
    }
    if action.blocked {
        message = action.blocked_message.clone().unwrap_or_default();
    }

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-git-receive-pack-result")
        .header("expires", "Fri, 01 Jan 1980 00:00:00 GMT")
        .header("pragma", "no-cache")
        .header("cache-control", "no-cache, max-age=0, must-revalidate")
        .header("vary", "Accept-Encoding")
        .header("x-frame-options", "DENY")
        .header("connection", "close");
    match builder.body(full_body(Bytes::from(error_packet(&message)))) {
        Ok(response) => response,
        Err(_) => plain_response(StatusCode::OK, error_packet(&message)),
    }
}

/// An in-band wire error for faults that happen before a verdict exists,
/// for example an oversized body.
pub fn in_band_error(message: &str) -> Response<ProxyBody> {
    let mut response = plain_response(StatusCode::OK, error_packet(message));
    response.headers_mut().insert(
        "content-type",
        http::HeaderValue::from_static("application/x-git-receive-pack-result"),
    );
    response
}

/// A plain-text response with the given status.
pub fn plain_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(body.into()));
    *response.status_mut() = status;
    response
}

// =====================================================================
// Tests
// =====================================================================
