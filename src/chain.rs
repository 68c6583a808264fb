//! Chain assembly and execution.
//!
//! A chain is an ordered list of [`Inspector`]s run against one action.
//! Execution stops at the first inspector that errors or blocks, or as
//! soon as the push is explicitly allowed. Whatever happens, the final
//! action is archived to the push store, and any auto approval or
//! rejection the chain requested is applied to the archived record.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::action::{Action, ActionType, Step};
use crate::config::{CompiledRules, Config};
use crate::error::InspectorError;
use crate::git::GitRunner;
use crate::inspector::{Inspector, RequestContext};
use crate::processor::push::{
    BlockForAuth, CheckAuthorEmails, CheckCommitMessages, CheckEmptyBranch, CheckHiddenCommits,
    CheckIfWaitingAuth, CheckRepoInAuthorisedList, CheckUserPushPermission, ClearBareClone,
    GetDiff, ParsePush, PreReceive, PullRemote, ScanDiff, WritePack,
};
use crate::processor::ParseAction;
use crate::store::{PushStore, RepoStore, UserStore};

/// The push and pull processor chains, plus the pre-processor that
/// routes a request to one of them.
pub struct Chains {
    parse_action: ParseAction,
    push: Vec<Arc<dyn Inspector>>,
    pull: Vec<Arc<dyn Inspector>>,
    push_store: Arc<dyn PushStore>,
}

impl Chains {
    /// Assemble the canonical chains from configuration and stores.
    pub fn build(
        config: &Config,
        rules: Arc<CompiledRules>,
        repo_store: Arc<dyn RepoStore>,
        user_store: Arc<dyn UserStore>,
        push_store: Arc<dyn PushStore>,
    ) -> Chains {
        let git = GitRunner::new(&config.subprocess);

        let push: Vec<Arc<dyn Inspector>> = vec![
            Arc::new(ParsePush),
            Arc::new(CheckRepoInAuthorisedList::new(repo_store.clone())),
            Arc::new(CheckCommitMessages::new(rules.clone())),
            Arc::new(CheckAuthorEmails::new(rules.clone())),
            Arc::new(CheckUserPushPermission::new(
                user_store,
                repo_store.clone(),
            )),
            Arc::new(CheckIfWaitingAuth::new(push_store.clone())),
            Arc::new(PullRemote::new(git.clone(), config.scratch_dir.clone())),
            Arc::new(WritePack::new(git.clone())),
            Arc::new(CheckEmptyBranch::new(git.clone())),
            Arc::new(CheckHiddenCommits::new(git.clone())),
            Arc::new(PreReceive::new(git.clone(), config.pre_receive_hook.clone())),
            Arc::new(GetDiff::new(git.clone())),
            Arc::new(ClearBareClone),
            Arc::new(ScanDiff::new(rules, config.private_organizations.clone())),
            Arc::new(BlockForAuth::new(config.approval_base_url.clone())),
        ];

        let pull: Vec<Arc<dyn Inspector>> =
            vec![Arc::new(CheckRepoInAuthorisedList::new(repo_store.clone()))];

        Chains {
            parse_action: ParseAction::new(repo_store, config.proxy_url.clone()),
            push,
            pull,
            push_store,
        }
    }

    /// Splice loaded plugin inspectors into the chains. Push plugins land
    /// right after the pack parsing stage, pull plugins at the front.
    pub fn insert_plugins(
        &mut self,
        push_plugins: Vec<Arc<dyn Inspector>>,
        pull_plugins: Vec<Arc<dyn Inspector>>,
    ) {
        info!(
            "Inserting loaded plugins ({} push, {} pull) into proxy chains",
            push_plugins.len(),
            pull_plugins.len()
        );
        for plugin in push_plugins {
            info!("Inserting push plugin {} into chain", plugin.name());
            self.push.insert(1, plugin);
        }
        for plugin in pull_plugins {
            info!("Inserting pull plugin {} into chain", plugin.name());
            self.pull.insert(0, plugin);
        }
    }

    /// Run the matching chain for a pack request, archive the outcome,
    /// and apply any auto approval or rejection the chain requested.
    ///
    /// A [`InspectorError::Precondition`] interrupts the chain but the
    /// action is archived before the error propagates.
    pub async fn execute(&self, req: &RequestContext) -> Result<Action, InspectorError> {
        let mut action = self.parse_action.parse(req).await;

        let chain: &[Arc<dyn Inspector>] = match action.action_type {
            ActionType::Push => &self.push,
            ActionType::Pull => &self.pull,
            ActionType::PassThrough => &[],
        };

        let mut escaped: Option<InspectorError> = None;
        for inspector in chain {
            debug!("executing {}", inspector.name());
            match inspector.exec(req, &mut action).await {
                Ok(()) => {}
                Err(InspectorError::Failed { message }) => {
                    let mut step = Step::new(inspector.name());
                    step.set_error(message);
                    action.add_step(step);
                }
                Err(e @ InspectorError::Precondition { .. }) => {
                    escaped = Some(e);
                    break;
                }
            }
            if !action.continue_chain() {
                break;
            }
            if action.allow_push {
                break;
            }
        }

        self.finalize(&action).await;

        match escaped {
            Some(e) => Err(e),
            None => Ok(action),
        }
    }

    async fn finalize(&self, action: &Action) {
        self.push_store.save(action).await;
        if action.auto_approved {
            self.attempt_auto_approval(action).await;
        } else if action.auto_rejected {
            self.attempt_auto_rejection(action).await;
        }
    }

    async fn attempt_auto_approval(&self, action: &Action) {
        match self.push_store.authorise(&action.id).await {
            Ok(()) => info!("Push automatically approved by system."),
            Err(e) => error!("Error during auto-approval: {e}"),
        }
    }

    async fn attempt_auto_rejection(&self, action: &Action) {
        match self.push_store.reject(&action.id).await {
            Ok(()) => info!("Push automatically rejected by system."),
            Err(e) => error!("Error during auto-rejection: {e}"),
        }
    }
}

// =====================================================================
// Tests
// =====================================================================
