//! Verification that every pack commit belongs to the declared range.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::action::{require_clone_path, Action, Step, ZERO_SHA};
use crate::error::{GitError, InspectorError};
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};

/// Compares the commits delivered in the pack against the commits the
/// declared range actually introduces. A pack smuggling extra commits,
/// for example from an unapproved branch the new one was forked off,
/// is rejected with the full list of offenders.
pub struct CheckHiddenCommits {
    git: GitRunner,
}

impl CheckHiddenCommits {
    pub fn new(git: GitRunner) -> Self {
        CheckHiddenCommits { git }
    }

    async fn verify(
        &self,
        clone: &Path,
        from: &str,
        to: &str,
        action: &Action,
        step: &mut Step,
    ) -> Result<(), GitError> {
        let introduced = if from == ZERO_SHA {
            self.git.rev_list(clone, to).await?
        } else {
            self.git.rev_list_range(clone, from, to).await?
        };
        step.log(format!("Total introduced commits: {}", introduced.len()));

        let mut pack_commits: Vec<String> = Vec::new();
        for idx_file in &action.new_idx_files {
            let idx_path = format!(".git/objects/pack/{idx_file}");
            for id in self.git.verify_pack_commits(clone, &idx_path).await? {
                if !pack_commits.contains(&id) {
                    pack_commits.push(id);
                }
            }
        }
        step.log(format!("Total commits in the pack: {}", pack_commits.len()));

        compare_pack_commits(&introduced, &pack_commits, step);
        Ok(())
    }
}

/// Verdict over the two sets: every pack commit must appear in the
/// introduced set.
fn compare_pack_commits(introduced: &[String], pack_commits: &[String], step: &mut Step) {
    let (referenced, unreferenced): (Vec<&String>, Vec<&String>) = pack_commits
        .iter()
        .partition(|id| introduced.contains(*id));

    if unreferenced.is_empty() {
        step.log("All pack commits are referenced in the introduced range.");
        step.set_content(json!(format!(
            "All {} pack commits are within introduced commits.",
            pack_commits.len()
        )));
    } else {
        step.log(format!("Referenced commits: {}", referenced.len()));
        step.log(format!("Unreferenced commits: {}", unreferenced.len()));
        let offenders = unreferenced
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        step.set_error(format!(
            "Unreferenced commits in pack ({}): {offenders}.\nThis usually happens when a branch was made from a commit that hasn't been approved and pushed to the remote.\nPlease get approval on the commits, push them and try again.",
            unreferenced.len()
        ));
        step.set_content(json!(format!(
            "Referenced: {}, Unreferenced: {}",
            referenced.len(),
            unreferenced.len()
        )));
    }
}

#[async_trait]
impl Inspector for CheckHiddenCommits {
    fn name(&self) -> &'static str {
        "checkHiddenCommits"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());

        let range = (action.commit_from.clone(), action.commit_to.clone());
        let (Some(from), Some(to)) = range else {
            let message = "Both action.commitFrom and action.commitTo must be defined";
            step.set_error(message);
            action.add_step(step);
            return Err(InspectorError::Precondition {
                inspector: self.name(),
                message: message.to_string(),
            });
        };

        let clone = require_clone_path(action)?;
        if let Err(e) = self.verify(&clone, &from, &to, action, &mut step).await {
            step.set_error(e.to_string());
        }
        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
