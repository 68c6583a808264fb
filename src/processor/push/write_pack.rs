//! Delivery of the buffered pack into the scratch clone.

use std::path::Path;

use async_trait::async_trait;

use crate::action::{require_clone_path, Action, Step};
use crate::error::{GitError, InspectorError};
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};

/// Replays the raw request body through `git receive-pack` against the
/// scratch clone, then records which pack index files the delivery
/// produced. `receive.unpackLimit 0` forces every delivery to land as a
/// pack so there is always an index to verify later.
pub struct WritePack {
    git: GitRunner,
}

impl WritePack {
    pub fn new(git: GitRunner) -> Self {
        WritePack { git }
    }

    async fn write(
        &self,
        req: &RequestContext,
        action: &mut Action,
        clone: &Path,
        step: &mut Step,
    ) -> Result<(), GitError> {
        self.git
            .config_set(clone, "receive.unpackLimit", "0")
            .await?;

        let before = idx_files(clone);
        let parent = clone.parent().unwrap_or(clone).to_path_buf();
        self.git
            .receive_pack(&parent, &action.repo_name, &req.body)
            .await?;
        let after = idx_files(clone);

        let new: Vec<String> = after
            .into_iter()
            .filter(|name| !before.contains(name))
            .collect();
        step.log(format!("new idx files: {}", new.join(",")));
        action.new_idx_files = new;
        Ok(())
    }
}

#[async_trait]
impl Inspector for WritePack {
    fn name(&self) -> &'static str {
        "writePack"
    }

    async fn exec(
        &self,
        req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let clone = require_clone_path(action)?;
        let mut step = Step::new(self.name());
        if let Err(e) = self.write(req, action, &clone, &mut step).await {
            step.set_error(e.to_string());
        }
        action.add_step(step);
        Ok(())
    }
}

/// Names of the pack index files currently present in the clone. A clone
/// that has no pack directory yet simply has none.
fn idx_files(clone: &Path) -> Vec<String> {
    let pattern = clone.join(".git/objects/pack/*.idx");
    let pattern = pattern.to_string_lossy();
    match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .filter_map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect(),
        Err(_) => Vec::new(),
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
            body: Bytes::from_static(b"0000"),
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

    #[test]
    fn test_idx_files_empty_for_missing_pack_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(idx_files(dir.path()).is_empty());
    }

    #[test]
    fn test_idx_files_lists_only_idx_names() {
        let dir = tempfile::tempdir().unwrap();
        let pack_dir = dir.path().join(".git/objects/pack");
        std::fs::create_dir_all(&pack_dir).unwrap();
        std::fs::write(pack_dir.join("pack-1234.idx"), b"").unwrap();
        std::fs::write(pack_dir.join("pack-1234.pack"), b"").unwrap();
        assert_eq!(idx_files(dir.path()), vec!["pack-1234.idx".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_clone_fails_the_inspector() {
        let inspector = WritePack::new(GitRunner::new(&SubprocessConfig::default()));
        let mut action = action();
        action.proxy_git_path = None;
        let err = inspector.exec(&request(), &mut action).await.unwrap_err();
        assert!(matches!(err, InspectorError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_delivery_failure_records_error_step() {
        let dir = tempfile::tempdir().unwrap();
        let clone = dir.path().join("git-proxy.git");
        std::fs::create_dir_all(&clone).unwrap();

        let inspector = WritePack::new(GitRunner::new(&SubprocessConfig::default()));
        let mut action = action();
        action.proxy_git_path = Some(dir.path().to_path_buf());
        inspector.exec(&request(), &mut action).await.unwrap();

        // The directory is not a git repository, so delivery fails and the
        // failure is recorded on the step rather than escalated.
        assert!(action.error);
        assert_eq!(action.last_step().unwrap().step_name, "writePack");
    }
}
