//! Detection of pushes that carry no commit data.

use std::path::Path;

use async_trait::async_trait;
use tracing::warn;

use crate::action::{require_clone_path, Action, Step, ZERO_SHA};
use crate::error::InspectorError;
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};

/// Handles pushes whose pack produced no commit data. A branch created
/// without any commit is rejected with a dedicated message; anything
/// else without commit data is rejected as unparseable. Pushes that did
/// parse pass through without recording a step.
pub struct CheckEmptyBranch {
    git: GitRunner,
}

impl CheckEmptyBranch {
    pub fn new(git: GitRunner) -> Self {
        CheckEmptyBranch { git }
    }

    /// A zero `commit_from` whose new tip resolves to a commit object in
    /// the scratch clone is a new branch pointing at existing history.
    async fn is_empty_branch(&self, clone: &Path, action: &Action) -> bool {
        if action.commit_from.as_deref() != Some(ZERO_SHA) {
            return false;
        }
        let tip = action.commit_to.as_deref().unwrap_or("");
        match self.git.cat_file_type(clone, tip).await {
            Ok(kind) => kind == "commit",
            Err(err) => {
                warn!("Commit {tip} not found: {err}");
                false
            }
        }
    }
}

#[async_trait]
impl Inspector for CheckEmptyBranch {
    fn name(&self) -> &'static str {
        "checkEmptyBranch"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        if !action.commit_data.is_empty() {
            return Ok(());
        }

        let clone = require_clone_path(action)?;
        let mut step = Step::new(self.name());
        if self.is_empty_branch(&clone, action).await {
            step.set_error(
                "Push blocked: Empty branch. Please make a commit before pushing a new branch.",
            );
        } else {
            step.set_error(
                "Push blocked: Commit data not found. Please contact an administrator for support.",
            );
        }
        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::action::{ActionType, CommitData};
    use crate::config::SubprocessConfig;

    fn request() -> RequestContext {
        RequestContext {
            method: "POST".to_string(),
            path: "/finos/git-proxy.git/git-receive-pack".to_string(),
            content_type: Some("application/x-git-receive-pack-request".to_string()),
            user_agent: Some("git/2.46.0".to_string()),
            accept: Some("application/x-git-receive-pack-result".to_string()),
            authorization: None,
            body: Bytes::new(),
            identity: None,
        }
    }

    fn action() -> Action {
        Action::new(
            "1",
            ActionType::Push,
            "POST",
            1,
            "finos/git-proxy.git",
            "https://github.com/finos/git-proxy.git",
        )
    }

    #[tokio::test]
    async fn test_push_with_commit_data_passes_without_a_step() {
        let inspector = CheckEmptyBranch::new(GitRunner::new(&SubprocessConfig::default()));
        let mut action = action();
        action.commit_data = vec![CommitData {
            tree: "t".repeat(40),
            parent: "p".repeat(40),
            author: "Alice Dev".to_string(),
            committer: "Alice Dev".to_string(),
            author_email: "alice@example.com".to_string(),
            committer_email: "alice@example.com".to_string(),
            commit_timestamp: 1_700_000_000,
            message: "Fix typo".to_string(),
        }];
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(!action.error);
        assert!(action.steps.is_empty());
    }

    #[tokio::test]
    async fn test_missing_commit_data_blocks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("git-proxy.git")).unwrap();

        let inspector = CheckEmptyBranch::new(GitRunner::new(&SubprocessConfig::default()));
        let mut action = action();
        action.proxy_git_path = Some(dir.path().to_path_buf());
        action.set_commit(&"a".repeat(40), &"b".repeat(40));
        inspector.exec(&request(), &mut action).await.unwrap();

        assert!(action.error);
        assert_eq!(
            action.error_message.as_deref(),
            Some("Push blocked: Commit data not found. Please contact an administrator for support.")
        );
    }

    #[tokio::test]
    async fn test_zero_base_with_unresolvable_tip_blocks_as_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("git-proxy.git")).unwrap();

        let inspector = CheckEmptyBranch::new(GitRunner::new(&SubprocessConfig::default()));
        let mut action = action();
        action.proxy_git_path = Some(dir.path().to_path_buf());
        // The probe fails in a directory that is not a repository, so the
        // push is treated as missing commit data rather than empty-branch.
        action.set_commit(ZERO_SHA, &"b".repeat(40));
        inspector.exec(&request(), &mut action).await.unwrap();

        assert!(action.error);
        assert_eq!(
            action.error_message.as_deref(),
            Some("Push blocked: Commit data not found. Please contact an administrator for support.")
        );
    }
}
