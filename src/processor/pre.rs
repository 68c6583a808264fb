//! Pre-processing of inbound pack requests.
//!
//! Classifies the request as a push or a pull from its content type and
//! resolves which upstream repository the path addresses, producing the
//! [`Action`] that the processor chain then carries.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::action::{Action, ActionType};
use crate::inspector::RequestContext;
use crate::repo::Repo;
use crate::store::RepoStore;

/// Content type of a `git fetch` pack negotiation body.
pub const UPLOAD_PACK_REQUEST: &str = "application/x-git-upload-pack-request";
/// Content type of a `git push` pack delivery body.
pub const RECEIVE_PACK_REQUEST: &str = "application/x-git-receive-pack-request";

/// Builds the [`Action`] for a pack POST.
///
/// Paths come in two shapes: `/{project}/{name}.git/git-receive-pack`
/// against the configured upstream, or `/{host}/{project}/{name}.git/...`
/// with the upstream host embedded in the path. The embedded form is
/// honoured only when the resulting URL names a repository we know about,
/// otherwise the configured proxy URL wins.
pub struct ParseAction {
    repo_store: Arc<dyn RepoStore>,
    proxy_url: String,
}

impl ParseAction {
    pub fn new(repo_store: Arc<dyn RepoStore>, proxy_url: impl Into<String>) -> Self {
        ParseAction {
            repo_store,
            proxy_url: proxy_url.into(),
        }
    }

    /// Classify the request and resolve its repository URL.
    pub async fn parse(&self, req: &RequestContext) -> Action {
        let timestamp = Utc::now().timestamp_millis();
        let id = timestamp.to_string();

        let action_type = match req.content_type.as_deref() {
            Some(UPLOAD_PACK_REQUEST) => ActionType::Pull,
            Some(RECEIVE_PACK_REQUEST) => ActionType::Push,
            _ => ActionType::PassThrough,
        };

        let path = req.path.split('?').next().unwrap_or(req.path.as_str());
        let repo_path = path
            .strip_suffix("/git-receive-pack")
            .or_else(|| path.strip_suffix("/git-upload-pack"))
            .unwrap_or(path);

        // First try the path itself as a URL with the host inlined.
        let mut url = format!("https:/{repo_path}");
        info!(
            "Parse action calculated repo URL: {url} for inbound URL path: {}",
            req.path
        );
        let known = match Repo::parse(&url) {
            Ok(repo) => self.repo_store.get(&repo.key()).await.is_some(),
            Err(_) => false,
        };
        if !known {
            url = format!("{}{repo_path}", self.proxy_url);
            info!(
                "Parse action fallback calculated repo URL: {url} for inbound URL path: {}",
                req.path
            );
        }

        let segments: Vec<&str> = repo_path.split('/').filter(|s| !s.is_empty()).collect();
        let repo = match segments.as_slice() {
            [] => String::new(),
            [name] => (*name).to_string(),
            [.., project, name] => format!("{project}/{name}"),
        };

        Action::new(id, action_type, req.method.clone(), timestamp, repo, url)
    }
}

// =====================================================================
// Tests
// =====================================================================
