//! External pre-receive hook execution.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::action::{require_clone_path, Action, Step};
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};
use crate::error::InspectorError;

/// Runs a pre-receive hook script against the scratch clone, feeding it
/// the ref update on stdin exactly as git would. The exit status picks
/// the outcome: 0 approves the push automatically, 1 rejects it
/// automatically, 2 defers to manual approval, and anything else is an
/// error.
pub struct PreReceive {
    git: GitRunner,
    hook_path: PathBuf,
}

impl PreReceive {
    pub fn new(git: GitRunner, hook_path: impl Into<PathBuf>) -> Self {
        PreReceive {
            git,
            hook_path: hook_path.into(),
        }
    }
}

#[async_trait]
impl Inspector for PreReceive {
    fn name(&self) -> &'static str {
        "executeExternalPreReceiveHook"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());

        let resolved = match std::path::absolute(&self.hook_path) {
            Ok(path) => path,
            Err(e) => {
                step.log("Push failed, pre-receive hook returned an error.");
                step.set_error(format!("Hook execution error: {e}"));
                action.add_step(step);
                return Ok(());
            }
        };
        if !resolved.is_file() {
            step.log("Pre-receive hook not found, skipping execution.");
            action.add_step(step);
            return Ok(());
        }

        let clone = require_clone_path(action)?;
        step.log(format!("Executing pre-receive hook from: {}", resolved.display()));

        let stdin = format!(
            "{} {} {} \n",
            action.commit_from.as_deref().unwrap_or(""),
            action.commit_to.as_deref().unwrap_or(""),
            action.branch.as_deref().unwrap_or("")
        );
        let hook = resolved.to_string_lossy().into_owned();
        let run = self
            .git
            .run_with_status(&hook, &[], Some(&clone), Some(stdin.as_bytes()))
            .await;

        match run {
            Ok((output, status)) => {
                step.log(format!("Hook exited with status {status}"));
                match status {
                    0 => {
                        step.log("Push automatically approved by pre-receive hook.");
                        action.add_step(step);
                        action.set_auto_approval();
                    }
                    1 => {
                        step.log("Push automatically rejected by pre-receive hook.");
                        action.add_step(step);
                        action.set_auto_rejection();
                    }
                    2 => {
                        step.log("Push requires manual approval.");
                        action.add_step(step);
                    }
                    other => {
                        step.log(format!("Unexpected hook status: {other}"));
                        let stdout = output.stdout.trim();
                        if stdout.is_empty() {
                            step.set_error("Unknown pre-receive hook error.");
                        } else {
                            step.set_error(stdout);
                        }
                        action.add_step(step);
                    }
                }
            }
            Err(e) => {
                step.log("Push failed, pre-receive hook returned an error.");
                step.set_error(format!("Hook execution error: {e}"));
                action.add_step(step);
            }
        }
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
