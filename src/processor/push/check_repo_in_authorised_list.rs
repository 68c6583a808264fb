//! Gate on the configured repository allow-list.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::action::{Action, Step};
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};
use crate::repo::normalize_repo_key;
use crate::store::RepoStore;

/// Rejects any operation whose repository is not registered.
pub struct CheckRepoInAuthorisedList {
    repo_store: Arc<dyn RepoStore>,
}

impl CheckRepoInAuthorisedList {
    pub fn new(repo_store: Arc<dyn RepoStore>) -> Self {
        CheckRepoInAuthorisedList { repo_store }
    }
}

#[async_trait]
impl Inspector for CheckRepoInAuthorisedList {
    fn name(&self) -> &'static str {
        "checkRepoInAuthorisedList"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());
        let key = normalize_repo_key(&action.repo);
        if self.repo_store.get(&key).await.is_some() {
            info!("repo {} is in the authorisedList", action.repo);
        } else {
            error!("repo {} is not in the authorisedList, ending", action.repo);
            step.set_error(format!(
                "Rejecting repo {} not in the authorisedList",
                action.repo
            ));
        }
        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
