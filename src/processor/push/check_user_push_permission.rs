//! Push permission lookup for the committing user.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::action::{Action, Step};
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};
use crate::repo::normalize_repo_key;
use crate::store::{RepoStore, UserStore};

/// Maps the committer e-mail to a known user and checks that user's push
/// permission on the target repository. An e-mail shared by several users
/// cannot be attributed and is rejected outright.
pub struct CheckUserPushPermission {
    user_store: Arc<dyn UserStore>,
    repo_store: Arc<dyn RepoStore>,
}

impl CheckUserPushPermission {
    pub fn new(user_store: Arc<dyn UserStore>, repo_store: Arc<dyn RepoStore>) -> Self {
        CheckUserPushPermission {
            user_store,
            repo_store,
        }
    }
}

#[async_trait]
impl Inspector for CheckUserPushPermission {
    fn name(&self) -> &'static str {
        "checkUserPushPermission"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());

        let email = match action.user_email.clone() {
            Some(email) => email,
            None => {
                step.set_error(
                    "Push blocked: User not found. Please contact an administrator for support.",
                );
                action.add_step(step);
                return Ok(());
            }
        };

        let users = self.user_store.find_by_email(&email).await;
        if users.len() > 1 {
            error!(
                "Multiple Users have email <{email}> so we cannot uniquely identify the user, ending"
            );
            step.set_error(format!(
                "Your push has been blocked (there are multiple users with email {email})"
            ));
            action.add_step(step);
            return Ok(());
        }

        let mut allowed = false;
        if let Some(user) = users.first() {
            allowed = self
                .repo_store
                .can_push(&normalize_repo_key(&action.repo), &user.username)
                .await;
        }
        info!("User {email} permission on Repo {} : {allowed}", action.url);

        if allowed {
            info!("User {email} is allowed to push on repo {}", action.url);
        } else {
            info!(
                "User {email} is not allowed to push on repo {}, ending",
                action.url
            );
            step.set_error(format!(
                "Your push has been blocked ({email} is not allowed to push on repo {})",
                action.url
            ));
        }

        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
