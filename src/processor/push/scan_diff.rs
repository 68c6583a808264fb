//! Diff scanning against the configured literal, pattern, and provider
//! rules.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::action::{Action, Step};
use crate::config::{CompiledRules, DiffMatcher};
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk pattern compiles")
});

/// Scans every line the push adds for blocked literals, blocked
/// patterns, and provider secret patterns. Provider patterns are skipped
/// when the target organization is marked private. A push with no diff
/// content at all is blocked too, since there is nothing to clear.
pub struct ScanDiff {
    rules: Arc<CompiledRules>,
    private_organizations: Vec<String>,
}

/// One finding, keyed by rule type, matched text, and file so repeats of
/// the same secret collapse into a single entry with all its lines.
struct Violation {
    kind: String,
    matched: String,
    file: String,
    lines: Vec<u64>,
}

/// Added lines of one file in the diff, with new-side line numbers. The
/// leading `+` marker stays part of the line.
struct DiffFile {
    name: String,
    added: Vec<(u64, String)>,
}

impl ScanDiff {
    pub fn new(rules: Arc<CompiledRules>, private_organizations: Vec<String>) -> Self {
        ScanDiff {
            rules,
            private_organizations,
        }
    }

    /// The formatted violation report, or `None` when the diff is clean.
    fn diff_violations(&self, diff: Option<&str>, organization: &str) -> Option<String> {
        let diff = match diff {
            Some(diff) if !diff.is_empty() => diff,
            _ => {
                info!("No commit diff...");
                return Some("No commit diff...".to_string());
            }
        };

        let files = parse_unified_diff(diff);

        let mut matchers: Vec<&DiffMatcher> = self
            .rules
            .diff_literals
            .iter()
            .chain(&self.rules.diff_patterns)
            .collect();
        let private = !organization.is_empty()
            && self
                .private_organizations
                .iter()
                .any(|org| org == organization);
        if !private {
            matchers.extend(self.rules.diff_providers.iter());
        }

        let violations = collect_violations(&files, &matchers);
        if violations.is_empty() {
            return None;
        }
        info!("Diff is blocked via configured literals/patterns/providers...");
        Some(format_violations(&violations))
    }
}

#[async_trait]
impl Inspector for ScanDiff {
    fn name(&self) -> &'static str {
        "scanDiff"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());

        let from = action.commit_from.clone().unwrap_or_default();
        let to = action.commit_to.clone().unwrap_or_default();
        info!("Scanning diff: {from}:{to}");

        let report = self.diff_violations(action.step_content("diff"), &action.project);
        if let Some(report) = report {
            info!("The following diff is illegal: {from}:{to}");
            step.log(format!("The following diff is illegal: {from}:{to}"));
            step.set_error(format!(
                "\n\n\n\nYour push has been blocked.\n\nPlease ensure your code does not contain sensitive information or URLs.\n\n\n{report}\n\n"
            ));
        }

        action.add_step(step);
        Ok(())
    }
}

/// Split a unified diff into its files and their added lines.
///
/// Hunk bodies are walked by the line counts the hunk header declares,
/// so added content that happens to look like a diff marker is still
/// counted as content.
fn parse_unified_diff(diff: &str) -> Vec<DiffFile> {
    let mut files: Vec<DiffFile> = Vec::new();
    let mut current: Option<usize> = None;
    let mut from: Option<String> = None;
    let mut old_left: u64 = 0;
    let mut new_left: u64 = 0;
    let mut line_no: u64 = 0;

    for line in diff.lines() {
        if old_left == 0 && new_left == 0 {
            if let Some(rest) = line.strip_prefix("--- ") {
                from = parse_file_name(rest);
            } else if let Some(rest) = line.strip_prefix("+++ ") {
                // A deleted file diffs to /dev/null; report it under its
                // old name.
                let name = parse_file_name(rest).or_else(|| from.clone());
                current = name.map(|name| {
                    files.push(DiffFile {
                        name,
                        added: Vec::new(),
                    });
                    files.len() - 1
                });
            } else if let Some(caps) = HUNK_HEADER.captures(line) {
                old_left = hunk_count(caps.get(2).map(|m| m.as_str()));
                new_left = hunk_count(caps.get(4).map(|m| m.as_str()));
                line_no = caps
                    .get(3)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
            }
            continue;
        }

        if line.starts_with('+') {
            if let Some(index) = current {
                files[index].added.push((line_no, line.to_string()));
            }
            line_no += 1;
            new_left = new_left.saturating_sub(1);
        } else if line.starts_with('-') {
            old_left = old_left.saturating_sub(1);
        } else if line.starts_with('\\') {
            // "\ No newline at end of file" consumes nothing.
        } else {
            line_no += 1;
            old_left = old_left.saturating_sub(1);
            new_left = new_left.saturating_sub(1);
        }
    }
    files
}

fn parse_file_name(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let name = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(name.to_string())
}

fn hunk_count(raw: Option<&str>) -> u64 {
    match raw {
        Some(count) => count.parse().unwrap_or(0),
        None => 1,
    }
}

fn collect_violations(files: &[DiffFile], matchers: &[&DiffMatcher]) -> Vec<Violation> {
    let mut order: Vec<String> = Vec::new();
    let mut found: HashMap<String, Violation> = HashMap::new();

    for file in files {
        for (line_no, content) in &file.added {
            for matcher in matchers {
                for hit in matcher.pattern.find_iter(content) {
                    let key = format!("{}_{}_{}", matcher.kind, hit.as_str(), file.name);
                    let entry = found.entry(key.clone()).or_insert_with(|| {
                        order.push(key);
                        Violation {
                            kind: matcher.kind.clone(),
                            matched: hit.as_str().to_string(),
                            file: file.name.clone(),
                            lines: Vec::new(),
                        }
                    });
                    entry.lines.push(*line_no);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| found.remove(&key))
        .collect()
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .enumerate()
        .map(|(index, violation)| {
            let lines = violation
                .lines
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "---------------------------------- #{} {} ------------------------------\n    Policy Exception Type: {}\n    DETECTED: {} \n    FILE(S) LOCATED: {}\n    Line(s) of code: {}",
                index + 1,
                violation.kind,
                violation.kind,
                violation.matched,
                violation.file,
                lines
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// =====================================================================
// Tests
// =====================================================================

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::action::ActionType;
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

    fn action_with_diff(diff: Option<&str>) -> Action {
        let mut action = Action::new(
            "1",
            ActionType::Push,
            "POST",
            1,
            "finos/git-proxy.git",
            "https://github.com/finos/git-proxy.git",
        );
        action.set_commit(&"a".repeat(40), &"b".repeat(40));
        if let Some(diff) = diff {
            let mut step = Step::new("diff");
            step.set_content(json!(diff));
            action.add_step(step);
        }
        action
    }

    const SAMPLE_DIFF: &str = "diff --git a/config.js b/config.js\nindex 1111111..2222222 100644\n--- a/config.js\n+++ b/config.js\n@@ -1,2 +1,4 @@\n const a = 1;\n+const apiKey = \"SECRET_TOKEN\";\n const b = 2;\n+// see secret docs\n";

    #[tokio::test]
    async fn test_clean_diff_passes() {
        let inspector = ScanDiff::new(
            rules(r#"{ "diff": { "block": { "literals": ["password"] } } }"#),
            Vec::new(),
        );
        let mut action = action_with_diff(Some(SAMPLE_DIFF));
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(!action.error);
        assert_eq!(action.last_step().unwrap().step_name, "scanDiff");
    }

    #[tokio::test]
    async fn test_literal_reports_file_and_line() {
        let inspector = ScanDiff::new(
            rules(r#"{ "diff": { "block": { "literals": ["secret"] } } }"#),
            Vec::new(),
        );
        let mut action = action_with_diff(Some(SAMPLE_DIFF));
        inspector.exec(&request(), &mut action).await.unwrap();

        assert!(action.error);
        let message = action.error_message.as_deref().unwrap();
        assert!(message.contains("Your push has been blocked."));
        // Each distinct matched text is its own finding, original case kept.
        assert!(message.contains("#1 Offending Literal"));
        assert!(message.contains("#2 Offending Literal"));
        assert!(message.contains("DETECTED: SECRET \n"));
        assert!(message.contains("DETECTED: secret \n"));
        assert!(message.contains("FILE(S) LOCATED: config.js"));
        assert!(message.contains("Line(s) of code: 2"));
        assert!(message.contains("Line(s) of code: 4"));
    }

    #[tokio::test]
    async fn test_repeated_match_collapses_to_one_finding() {
        let diff = "--- a/notes.txt\n+++ b/notes.txt\n@@ -0,0 +1,3 @@\n+token here\n+nothing\n+token there\n";
        let inspector = ScanDiff::new(
            rules(r#"{ "diff": { "block": { "literals": ["token"] } } }"#),
            Vec::new(),
        );
        let mut action = action_with_diff(Some(diff));
        inspector.exec(&request(), &mut action).await.unwrap();

        assert!(action.error);
        let message = action.error_message.as_deref().unwrap();
        assert!(message.contains("#1 Offending Literal"));
        assert!(!message.contains("#2 "));
        assert!(message.contains("Line(s) of code: 1,3"));
    }

    #[tokio::test]
    async fn test_provider_pattern_skipped_for_private_organization() {
        let raw = r#"{ "diff": { "block": { "providers": { "GitHub Token": "ghp_[A-Za-z0-9]{36}" } } } }"#;
        let diff = format!(
            "--- a/app.js\n+++ b/app.js\n@@ -0,0 +1 @@\n+const token = \"ghp_{}\";\n",
            "A".repeat(36)
        );

        let open = ScanDiff::new(rules(raw), Vec::new());
        let mut blocked = action_with_diff(Some(&diff));
        open.exec(&request(), &mut blocked).await.unwrap();
        assert!(blocked.error);
        assert!(blocked
            .error_message
            .as_deref()
            .unwrap()
            .contains("Policy Exception Type: GitHub Token"));

        let private = ScanDiff::new(rules(raw), vec!["finos".to_string()]);
        let mut allowed = action_with_diff(Some(&diff));
        private.exec(&request(), &mut allowed).await.unwrap();
        assert!(!allowed.error);
    }

    #[tokio::test]
    async fn test_missing_diff_blocks() {
        let inspector = ScanDiff::new(rules("{}"), Vec::new());
        let mut action = action_with_diff(None);
        inspector.exec(&request(), &mut action).await.unwrap();

        assert!(action.error);
        assert!(action
            .error_message
            .as_deref()
            .unwrap()
            .contains("No commit diff..."));
    }

    #[tokio::test]
    async fn test_empty_diff_blocks() {
        let inspector = ScanDiff::new(rules("{}"), Vec::new());
        let mut action = action_with_diff(Some(""));
        inspector.exec(&request(), &mut action).await.unwrap();
        assert!(action.error);
    }

    #[test]
    fn test_parse_unified_diff_tracks_line_numbers() {
        let files = parse_unified_diff(SAMPLE_DIFF);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "config.js");
        assert_eq!(files[0].added.len(), 2);
        assert_eq!(files[0].added[0].0, 2);
        assert_eq!(files[0].added[0].1, "+const apiKey = \"SECRET_TOKEN\";");
        assert_eq!(files[0].added[1].0, 4);
    }

    #[test]
    fn test_parse_unified_diff_deleted_file_uses_old_name() {
        let diff = "--- a/gone.txt\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-one\n-two\n";
        let files = parse_unified_diff(diff);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "gone.txt");
        assert!(files[0].added.is_empty());
    }
}
