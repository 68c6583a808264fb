//! The gateway's HTTP surface.
//!
//! One service fronts the upstream host. Pack POSTs are buffered, run
//! through the policy chains, and either replayed upstream or answered
//! with a synthesized in-band rejection. Everything else streams through
//! untouched. The chain registry is swapped wholesale on reload and never
//! mutated in place, so an in-flight request keeps the chains it started
//! with.

pub mod forwarder;
pub mod middleware;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::Chains;
use crate::error::GatewayError;
use crate::inspector::RequestContext;
use crate::proxy::forwarder::Forwarder;

/// Response body used everywhere in the service: either a synthesized
/// buffer or a verbatim upstream stream.
pub type ProxyBody = BoxBody<Bytes, std::io::Error>;

/// A complete in-memory response body.
pub fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(std::io::Error::other).boxed()
}

/// The intercepting service: chains in front, forwarder behind.
pub struct ProxyService {
    chains: ArcSwap<Chains>,
    forwarder: Forwarder,
    max_body_bytes: usize,
}

impl ProxyService {
    pub fn new(chains: Chains, forwarder: Forwarder, max_body_bytes: usize) -> ProxyService {
        ProxyService {
            chains: ArcSwap::from_pointee(chains),
            forwarder,
            max_body_bytes,
        }
    }

    /// Swap in freshly built chains. Requests already running keep the
    /// chains they started with.
    pub fn install_chains(&self, chains: Chains) {
        self.chains.store(Arc::new(chains));
    }

    /// Serve connections on `addr` until `shutdown` fires.
    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), GatewayError> {
        let listener = bind_listener(addr)?;
        info!("HTTP Proxy Listening on {addr}");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    let service = self.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let handler = service_fn(move |req| {
                            let service = service.clone();
                            async move { Ok::<_, Infallible>(service.handle(req).await) }
                        });
                        if let Err(e) = auto::Builder::new(TokioExecutor::new())
                            .serve_connection(io, handler)
                            .await
                        {
                            debug!("connection from {remote} ended: {e}");
                        }
                    });
                }
            }
        }

        info!("Proxy shut down");
        Ok(())
    }

    /// Classify, inspect, and answer one request.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let (parts, body) = req.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
        debug!(
            url = %path,
            host = ?header("host"),
            user_agent = ?header("user-agent"),
            "inbound request"
        );

        if middleware::is_git_path(&path)
            && !middleware::valid_git_request(&path, header("user-agent"), header("accept"))
        {
            return middleware::plain_response(StatusCode::BAD_REQUEST, "Invalid request received");
        }

        if !middleware::is_pack_post(parts.method.as_str(), &path) {
            // Not protocol-relevant: relay without buffering or inspection.
            return match self.forwarder.relay_streaming(&parts, body).await {
                Ok(response) => response,
                Err(e) => {
                    error!("{e}");
                    middleware::plain_response(StatusCode::BAD_GATEWAY, "upstream unavailable")
                }
            };
        }

        let buffered = match middleware::buffer_body(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e @ GatewayError::BodyTooLarge { .. }) => {
                warn!("{e}");
                return middleware::in_band_error(&e.to_string());
            }
            Err(e) => {
                warn!("{e}");
                return middleware::plain_response(
                    StatusCode::BAD_REQUEST,
                    "Invalid request received",
                );
            }
        };

        let ctx = RequestContext::from_parts(&parts, buffered.clone());
        let action = match self.chains.load().execute(&ctx).await {
            Ok(action) => action,
            Err(e) => {
                error!("{e}");
                return middleware::plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal proxy error",
                );
            }
        };
        debug!("action processed");

        if action.is_allowed() {
            match self.forwarder.relay(&parts, buffered).await {
                Ok(response) => response,
                Err(e) => {
                    error!("{e}");
                    middleware::plain_response(StatusCode::BAD_GATEWAY, "upstream unavailable")
                }
            }
        } else {
            middleware::block_response(&action)
        }
    }
}

/// Bind the listen socket with address reuse, ready for accept.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener, GatewayError> {
    let bind_err = |source: std::io::Error| GatewayError::Bind {
        addr: addr.to_string(),
        source,
    };
    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1024).map_err(bind_err)?;
    TcpListener::from_std(socket.into()).map_err(bind_err)
}

// =====================================================================
// Tests
// =====================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_listener_on_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let bound = listener.local_addr().unwrap();
        assert_eq!(bound.ip().to_string(), "127.0.0.1");
        assert_ne!(bound.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_listener_rejects_taken_port() {
        let first = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        // SO_REUSEADDR does not allow two live listeners on one port.
        let err = bind_listener(addr).unwrap_err();
        assert!(matches!(err, GatewayError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_full_body_collects_back() {
        let body = full_body(Bytes::from_static(b"0000"));
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected.as_ref(), b"0000");
    }
}
