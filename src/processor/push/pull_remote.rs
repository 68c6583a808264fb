//! Scratch clone of the target repository.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use crate::action::{Action, Step};
use crate::error::{GitError, InspectorError};
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};

/// Clones the target repository into a per-push scratch directory. The
/// client's Authorization header is forwarded so private upstreams clone
/// with the pusher's own credentials.
pub struct PullRemote {
    git: GitRunner,
    scratch_dir: PathBuf,
}

impl PullRemote {
    pub fn new(git: GitRunner, scratch_dir: impl Into<PathBuf>) -> Self {
        PullRemote {
            git,
            scratch_dir: scratch_dir.into(),
        }
    }

    async fn pull(
        &self,
        req: &RequestContext,
        action: &mut Action,
        step: &mut Step,
    ) -> Result<(), GitError> {
        let dir = self.scratch_dir.join(action.timestamp.to_string());
        step.log(format!("Creating folder {}", dir.display()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GitError::Io {
                path: dir.clone(),
                source: e,
            })?;
        action.proxy_git_path = Some(dir.clone());

        step.log(format!("Executing git clone {}", action.url));
        self.git
            .clone_repo(&dir, &action.url, &action.repo_name, req.authorization.as_deref())
            .await?;

        let completed = format!("Completed git clone {}", action.url);
        step.log(&completed);
        step.set_content(json!(completed));
        Ok(())
    }
}

#[async_trait]
impl Inspector for PullRemote {
    fn name(&self) -> &'static str {
        "pullRemote"
    }

    async fn exec(
        &self,
        req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());
        if let Err(e) = self.pull(req, action, &mut step).await {
            step.set_error(e.to_string());
        }
        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
