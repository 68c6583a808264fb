//! The audit and decision record for one proxied operation.
//!
//! An [`Action`] is created by the pre-processing inspector when a request
//! enters the gateway, mutated in place by every chain stage, and consumed
//! once the HTTP response has been written. Each stage appends a [`Step`]
//! describing its outcome; the Action aggregates those outcomes into the
//! final allow/block verdict.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The all-zero object id git sends for a ref that did not previously exist.
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// The well-known id of git's empty tree, used as a diff base for pushes
/// that create history with no prior parent.
pub const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Operation classification derived from the request content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// `application/x-git-receive-pack-request`: the client is pushing.
    Push,
    /// `application/x-git-upload-pack-request`: the client is fetching.
    Pull,
    /// Anything else: no chain runs and the request is relayed as-is.
    PassThrough,
}

/// One commit object extracted from the transferred pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitData {
    /// Tree id recorded in the commit header.
    pub tree: String,
    /// First parent id, or the all-zero id for a root commit.
    pub parent: String,
    /// Author name (the portion before the e-mail address).
    pub author: String,
    /// Committer name.
    pub committer: String,
    /// Author e-mail address as written between angle brackets.
    pub author_email: String,
    /// Committer e-mail address.
    pub committer_email: String,
    /// Committer timestamp, seconds since the epoch.
    pub commit_timestamp: i64,
    /// Commit message with line breaks collapsed to single spaces.
    pub message: String,
}

/// One inspector's recorded outcome.
///
/// A Step is owned by its inspector while executing and immutable once
/// appended to an Action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique id of this step instance.
    pub id: String,
    /// Identity of the inspector that produced it.
    pub step_name: String,
    /// Arbitrary payload: diff text, parsed metadata, summaries.
    pub content: Option<Value>,
    /// Whether this step failed or decided to block.
    pub error: bool,
    /// Human-readable failure description, shown to the pushing client.
    pub error_message: Option<String>,
    /// Whether this step parked the push for asynchronous authorisation.
    pub blocked: bool,
    /// Message shown to the client while the push awaits authorisation.
    pub blocked_message: Option<String>,
    /// Ordered human-readable log lines, preserved for audit.
    pub logs: Vec<String>,
}

impl Step {
    /// Create a clean step for the named inspector.
    pub fn new(step_name: impl Into<String>) -> Self {
        Step {
            id: Uuid::new_v4().to_string(),
            step_name: step_name.into(),
            content: None,
            error: false,
            error_message: None,
            blocked: false,
            blocked_message: None,
            logs: Vec::new(),
        }
    }

    /// Append a log line, mirrored into the process log.
    pub fn log(&mut self, message: impl AsRef<str>) {
        let line = format!("{} - {}", self.step_name, message.as_ref());
        tracing::info!(target: "packgate::step", "{line}");
        self.logs.push(line);
    }

    /// Mark the step failed with a message shown to the client.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = true;
        self.log(&message);
        self.error_message = Some(message);
    }

    /// Park the push: blocked for authorisation, but not an error.
    pub fn set_async_block(&mut self, message: impl Into<String>) {
        self.log("setting blocked");
        self.blocked = true;
        self.blocked_message = Some(message.into());
    }

    /// Attach a payload to the step.
    pub fn set_content(&mut self, content: Value) {
        self.log("setting content");
        self.content = Some(content);
    }

    /// The step content as a string, when it is one.
    pub fn content_str(&self) -> Option<&str> {
        self.content.as_ref().and_then(Value::as_str)
    }
}

/// The mutable record of one proxied push or pull operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Operation id; rewritten to `{from}__{to}` once the range is known.
    pub id: String,
    /// Push, pull, or pass-through.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// HTTP method of the originating request.
    pub method: String,
    /// Milliseconds since the epoch at request entry.
    pub timestamp: i64,
    /// `<project>/<name>.git` exactly as it appeared in the request path.
    pub repo: String,
    /// Organization segment of the repository path (empty for bare repos).
    pub project: String,
    /// Repository name segment including the `.git` suffix.
    pub repo_name: String,
    /// Fully qualified upstream URL of the repository.
    pub url: String,

    /// Branch ref being updated, e.g. `refs/heads/main`.
    pub branch: Option<String>,
    /// Declared old tip of the ref.
    pub commit_from: Option<String>,
    /// Declared new tip of the ref.
    pub commit_to: Option<String>,
    /// Commits extracted from the pack, in pack order.
    pub commit_data: Vec<CommitData>,

    /// Actor name recorded from the pack's committer line.
    pub user: Option<String>,
    /// Actor e-mail used for permission lookups.
    pub user_email: Option<String>,

    /// Scratch directory holding this push's working clone.
    pub proxy_git_path: Option<PathBuf>,
    /// Pack index files written by receive-pack delivery, names only.
    pub new_idx_files: Vec<String>,

    /// Ordered inspector outcomes; insertion order is execution order.
    pub steps: Vec<Step>,

    /// Latched true once any step errored.
    pub error: bool,
    /// Message of the first error step.
    pub error_message: Option<String>,
    /// Latched true once any step blocked, cleared only by an allow.
    pub blocked: bool,
    /// Message of the blocking step.
    pub blocked_message: Option<String>,
    /// Set when a prior authorisation lets this push through immediately.
    pub allow_push: bool,
    /// Set when this push has been authorised through the approval flow.
    pub authorised: bool,
    /// Set when the pushing user withdrew the push.
    pub canceled: bool,
    /// Set when a reviewer rejected the push.
    pub rejected: bool,
    /// Requested by the pre-receive hook: approve without a reviewer.
    pub auto_approved: bool,
    /// Requested by the pre-receive hook: reject without a reviewer.
    pub auto_rejected: bool,
}

impl Action {
    /// Create a fresh record for a request.
    ///
    /// `repo` is the `<project>/<name>.git` path portion and `url` the fully
    /// qualified upstream URL it resolves to.
    pub fn new(
        id: impl Into<String>,
        action_type: ActionType,
        method: impl Into<String>,
        timestamp: i64,
        repo: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let repo = repo.into();
        let (project, repo_name) = match repo.rsplit_once('/') {
            Some((project, name)) => (project.to_string(), name.to_string()),
            None => (String::new(), repo.clone()),
        };
        Action {
            id: id.into(),
            action_type,
            method: method.into(),
            timestamp,
            repo,
            project,
            repo_name,
            url: url.into(),
            branch: None,
            commit_from: None,
            commit_to: None,
            commit_data: Vec::new(),
            user: None,
            user_email: None,
            proxy_git_path: None,
            new_idx_files: Vec::new(),
            steps: Vec::new(),
            error: false,
            error_message: None,
            blocked: false,
            blocked_message: None,
            allow_push: false,
            authorised: false,
            canceled: false,
            rejected: false,
            auto_approved: false,
            auto_rejected: false,
        }
    }

    /// Append a step and fold its outcome into the aggregate verdict.
    pub fn add_step(&mut self, step: Step) {
        if step.blocked {
            self.blocked = true;
            self.blocked_message = step.blocked_message.clone();
        }
        if step.error {
            self.error = true;
            self.error_message = step.error_message.clone();
        }
        self.steps.push(step);
    }

    /// The most recently appended step.
    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Record the declared range and derive the canonical operation id.
    pub fn set_commit(&mut self, commit_from: &str, commit_to: &str) {
        self.commit_from = Some(commit_from.to_string());
        self.commit_to = Some(commit_to.to_string());
        self.id = format!("{commit_from}__{commit_to}");
    }

    /// Let the push through on the strength of a prior authorisation.
    pub fn set_allow_push(&mut self) {
        self.allow_push = true;
        self.blocked = false;
    }

    /// Ask the terminal stage to approve this push without a reviewer.
    pub fn set_auto_approval(&mut self) {
        self.auto_approved = true;
    }

    /// Ask the terminal stage to reject this push without a reviewer.
    pub fn set_auto_rejection(&mut self) {
        self.auto_rejected = true;
    }

    /// Whether the chain should proceed to the next inspector.
    pub fn continue_chain(&self) -> bool {
        !(self.error || self.blocked)
    }

    /// The final verdict: may the buffered body be replayed upstream.
    pub fn is_allowed(&self) -> bool {
        !(self.error || self.blocked)
    }

    /// Directory of this push's working clone, once `pull_remote` made one.
    pub fn clone_path(&self) -> Option<PathBuf> {
        self.proxy_git_path
            .as_ref()
            .map(|root| root.join(&self.repo_name))
    }

    /// Resolve the comparison base for range queries and diffs.
    ///
    /// The declared `commit_from` is used as-is unless it is the all-zero
    /// id (new-branch push), in which case the first introduced commit's
    /// recorded parent takes its place. When that parent is itself the
    /// all-zero id the push created history from nothing, and the empty
    /// tree id stands in as the base.
    pub fn diff_base(&self) -> String {
        let mut base = self
            .commit_from
            .clone()
            .unwrap_or_else(|| ZERO_SHA.to_string());
        if base == ZERO_SHA {
            if let Some(first_introduced) = self.commit_data.last() {
                base = first_introduced.parent.clone();
            }
        }
        if base == ZERO_SHA {
            base = EMPTY_TREE_SHA.to_string();
        }
        base
    }

    /// A step's string content looked up by inspector name.
    pub fn step_content(&self, step_name: &str) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.step_name == step_name)
            .and_then(Step::content_str)
    }
}

/// Convenience for inspectors that need the clone directory or fail.
pub fn require_clone_path(action: &Action) -> Result<PathBuf, crate::error::InspectorError> {
    action.clone_path().ok_or_else(|| {
        crate::error::InspectorError::failed("No working clone exists for this push")
    })
}
