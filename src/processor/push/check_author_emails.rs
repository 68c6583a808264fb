//! Author e-mail screening.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::action::{Action, Step};
use crate::config::CompiledRules;
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};

const BLOCKED_MESSAGE: &str = "Your push has been blocked. Please verify your Git configured e-mail address is valid (e.g. john.smith@example.com)";

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email pattern compiles")
});

/// Rejects pushes whose commit author e-mails are malformed, outside the
/// allowed domains, or carry a blocked local part.
pub struct CheckAuthorEmails {
    rules: Arc<CompiledRules>,
}

impl CheckAuthorEmails {
    pub fn new(rules: Arc<CompiledRules>) -> Self {
        CheckAuthorEmails { rules }
    }

    fn email_allowed(&self, email: &str) -> bool {
        if email.is_empty() || !EMAIL_PATTERN.is_match(email) {
            return false;
        }
        let (local, domain) = match email.split_once('@') {
            Some(parts) => parts,
            None => return false,
        };
        if let Some(allow) = &self.rules.email_domain_allow {
            if !allow.is_match(domain) {
                return false;
            }
        }
        if let Some(block) = &self.rules.email_local_block {
            if block.is_match(local) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Inspector for CheckAuthorEmails {
    fn name(&self) -> &'static str {
        "checkAuthorEmails"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());

        let mut unique: Vec<&str> = Vec::new();
        for commit in &action.commit_data {
            if !unique.contains(&commit.author_email.as_str()) {
                unique.push(&commit.author_email);
            }
        }
        let illegal: Vec<&str> = unique
            .into_iter()
            .filter(|email| !self.email_allowed(email))
            .collect();

        if !illegal.is_empty() {
            step.log(format!(
                "The following commit author e-mails are illegal: {}",
                illegal.join(",")
            ));
            step.set_error(BLOCKED_MESSAGE);
        }

        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
