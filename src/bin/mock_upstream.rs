//! Mock git upstream for local gateway testing.
//!
//! Serves just enough of the smart HTTP protocol to sit behind the gateway:
//! a canned ref advertisement, an all-ok report-status for pushes, and an
//! empty pack for fetches.

use axum::extract::{Path, Query};
use axum::http::header;
use axum::routing::{get, post};
use axum::Router;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::net::SocketAddr;

const HEAD_SHA: &str = "95dcfa3633004da0049d3d0fa03f80589cbcaf31";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .route("/{owner}/{repo}/info/refs", get(advertise))
        .route("/{owner}/{repo}/git-receive-pack", post(receive_pack))
        .route("/{owner}/{repo}/git-upload-pack", post(upload_pack));

    let addr = SocketAddr::from(([127, 0, 0, 1], 8001));
    tracing::info!("📦 Packgate mock upstream listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        e
    })?;

    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        e
    })?;

    Ok(())
}

fn pkt(line: &str) -> String {
    format!("{:04x}{}", line.len() + 4, line)
}

async fn advertise(
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ([(header::HeaderName, String); 1], Vec<u8>) {
    let service = params
        .get("service")
        .cloned()
        .unwrap_or_else(|| "git-upload-pack".to_string());
    tracing::info!("Advertising {} for {}/{}", service, owner, repo);

    let caps = if service == "git-receive-pack" {
        "report-status delete-refs ofs-delta agent=packgate-mock"
    } else {
        "multi_ack side-band-64k ofs-delta agent=packgate-mock"
    };

    let mut body = Vec::new();
    body.extend_from_slice(pkt(&format!("# service={}\n", service)).as_bytes());
    body.extend_from_slice(b"0000");
    body.extend_from_slice(pkt(&format!("{} refs/heads/main\0{}\n", HEAD_SHA, caps)).as_bytes());
    body.extend_from_slice(b"0000");

    (
        [(
            header::CONTENT_TYPE,
            format!("application/x-{}-advertisement", service),
        )],
        body,
    )
}

async fn receive_pack(
    Path((owner, repo)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> ([(header::HeaderName, &'static str); 1], Vec<u8>) {
    tracing::info!("Accepting {} byte push to {}/{}", body.len(), owner, repo);

    let mut report = Vec::new();
    report.extend_from_slice(pkt("unpack ok\n").as_bytes());
    report.extend_from_slice(pkt("ok refs/heads/main\n").as_bytes());
    report.extend_from_slice(b"0000");

    (
        [(header::CONTENT_TYPE, "application/x-git-receive-pack-result")],
        report,
    )
}

async fn upload_pack(
    Path((owner, repo)): Path<(String, String)>,
) -> ([(header::HeaderName, &'static str); 1], Vec<u8>) {
    tracing::info!("Serving empty pack to {}/{}", owner, repo);

    let mut body = Vec::from(&b"0008NAK\n"[..]);
    body.extend_from_slice(&empty_pack());

    (
        [(header::CONTENT_TYPE, "application/x-git-upload-pack-result")],
        body,
    )
}

/// A syntactically complete pack with zero objects.
fn empty_pack() -> Vec<u8> {
    let mut pack = Vec::from(*b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&0u32.to_be_bytes());
    let mut hasher = Sha1::new();
    hasher.update(&pack);
    let digest = hasher.finalize();
    pack.extend_from_slice(&digest);
    pack
}
