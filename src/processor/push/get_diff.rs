//! Diff capture for the scanning stage.

use async_trait::async_trait;
use serde_json::json;

use crate::action::{require_clone_path, Action, Step};
use crate::error::InspectorError;
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};

/// Records the unified diff of the pushed range as step content, where
/// the scanning stage picks it up. The base resolves through
/// [`Action::diff_base`] so new-branch and empty-history pushes diff
/// against something sensible.
pub struct GetDiff {
    git: GitRunner,
}

impl GetDiff {
    pub fn new(git: GitRunner) -> Self {
        GetDiff { git }
    }
}

#[async_trait]
impl Inspector for GetDiff {
    fn name(&self) -> &'static str {
        "diff"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let clone = require_clone_path(action)?;
        let mut step = Step::new(self.name());

        let base = action.diff_base();
        let tip = action.commit_to.clone().unwrap_or_default();
        match self.git.diff(&clone, &base, &tip).await {
            Ok(diff) => {
                step.log(format!("diff is: {diff}"));
                step.set_content(json!(diff));
            }
            Err(e) => step.set_error(e.to_string()),
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
    use crate::action::ActionType;
    use crate::config::SubprocessConfig;
    use crate::error::InspectorError;

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
        let mut action = Action::new(
            "1",
            ActionType::Push,
            "POST",
            1,
            "finos/git-proxy.git",
            "https://github.com/finos/git-proxy.git",
        );
        action.set_commit(&"a".repeat(40), &"b".repeat(40));
        action
    }

    #[tokio::test]
    async fn test_missing_clone_fails_the_inspector() {
        let inspector = GetDiff::new(GitRunner::new(&SubprocessConfig::default()));
        let mut action = action();
        let err = inspector.exec(&request(), &mut action).await.unwrap_err();
        assert!(matches!(err, InspectorError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_diff_failure_records_error_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("git-proxy.git")).unwrap();

        let inspector = GetDiff::new(GitRunner::new(&SubprocessConfig::default()));
        let mut action = action();
        action.proxy_git_path = Some(dir.path().to_path_buf());
        inspector.exec(&request(), &mut action).await.unwrap();

        assert!(action.error);
        assert_eq!(action.last_step().unwrap().step_name, "diff");
    }
}
