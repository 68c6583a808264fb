//! Commit-message screening against the configured block rules.

use std::sync::Arc;

use async_trait::async_trait;

use crate::action::{Action, Step};
use crate::config::CompiledRules;
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};

const BLOCKED_MESSAGE: &str = "\n\n\n\nYour push has been blocked.\nPlease ensure your commit message(s) does not contain sensitive information or URLs.\n\n\n";

/// Rejects pushes whose commit messages match a blocked literal or
/// pattern. Messages are deduplicated first so a reworded merge does not
/// repeat the same finding.
pub struct CheckCommitMessages {
    rules: Arc<CompiledRules>,
}

impl CheckCommitMessages {
    pub fn new(rules: Arc<CompiledRules>) -> Self {
        CheckCommitMessages { rules }
    }

    fn message_allowed(&self, message: &str) -> bool {
        if message.trim().is_empty() {
            return false;
        }
        let lowered = message.to_lowercase();
        if self
            .rules
            .message_literals
            .iter()
            .any(|literal| lowered.contains(literal))
        {
            return false;
        }
        if self
            .rules
            .message_patterns
            .iter()
            .any(|pattern| pattern.is_match(message))
        {
            return false;
        }
        true
    }
}

#[async_trait]
impl Inspector for CheckCommitMessages {
    fn name(&self) -> &'static str {
        "checkCommitMessages"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());

        let mut unique: Vec<&str> = Vec::new();
        for commit in &action.commit_data {
            if !unique.contains(&commit.message.as_str()) {
                unique.push(&commit.message);
            }
        }
        let illegal: Vec<&str> = unique
            .into_iter()
            .filter(|message| !self.message_allowed(message))
            .collect();

        if !illegal.is_empty() {
            step.log(format!(
                "The following commit messages are illegal: {}",
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

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::action::{ActionType, CommitData};
    use crate::config::CommitConfig;

    fn rules(raw: &str) -> Arc<CompiledRules> {
        let config: CommitConfig = serde_json::from_str(raw).unwrap();
        Arc::new(CompiledRules::from_config(&config).unwrap())
    }

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

    fn action_with_messages(messages: &[&str]) -> Action {
        let mut action = Action::new(
            "1",
            ActionType::Push,
            "POST",
            1,
            "finos/git-proxy.git",
            "https://github.com/finos/git-proxy.git",
        );
        action.commit_data = messages
            .iter()
            .map(|message| CommitData {
                tree: "t".repeat(40),
                parent: "p".repeat(40),
                author: "Alice Dev".to_string(),
                committer: "Alice Dev".to_string(),
                author_email: "alice@example.com".to_string(),
                committer_email: "alice@example.com".to_string(),
                commit_timestamp: 1_700_000_000,
                message: (*message).to_string(),
            })
            .collect();
        action
    }

    #[tokio::test]
    async fn test_clean_messages_pass() {
        let inspector =
            CheckCommitMessages::new(rules(r#"{ "message": { "block": { "literals": ["password"] } } }"#));
        let mut action = action_with_messages(&["Fix typo", "Add docs"]);
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(!action.error);
    }

    #[tokio::test]
    async fn test_literal_matches_as_substring_case_insensitively() {
        let inspector =
            CheckCommitMessages::new(rules(r#"{ "message": { "block": { "literals": ["password"] } } }"#));
        let mut action = action_with_messages(&["Commit my PASSWORD file"]);
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(action.error);
        assert!(action
            .error_message
            .as_deref()
            .unwrap()
            .contains("Your push has been blocked."));
    }

    #[tokio::test]
    async fn test_pattern_blocks_urls() {
        let inspector = CheckCommitMessages::new(rules(
            r#"{ "message": { "block": { "patterns": ["https?://"] } } }"#,
        ));
        let mut action = action_with_messages(&["See https://internal.example.com"]);
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(action.error);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let inspector = CheckCommitMessages::new(rules("{}"));
        let mut action = action_with_messages(&["   "]);
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(action.error);
    }

    #[tokio::test]
    async fn test_duplicate_messages_reported_once() {
        let inspector =
            CheckCommitMessages::new(rules(r#"{ "message": { "block": { "literals": ["secret"] } } }"#));
        let mut action = action_with_messages(&["add secret", "add secret"]);
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(action.error);
        let step = action.last_step().unwrap();
        assert_eq!(
            step.logs[0],
            "checkCommitMessages - The following commit messages are illegal: add secret"
        );
    }
}
