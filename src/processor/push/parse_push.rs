//! Extraction of the push contents from the raw request body.

use async_trait::async_trait;
use serde_json::json;

use crate::action::{Action, Step, ZERO_SHA};
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};
use crate::pack::{commit_data, parse_pack, split_receive_body};
use crate::processor::pre::RECEIVE_PACK_REQUEST;

/// Parses the pkt-line command section and the pack payload, filling in
/// the action's branch, commit range, commit data, and pushing user.
///
/// Any parse failure lands in the step as an error so the push is
/// rejected with a message rather than dropped.
pub struct ParsePush;

#[async_trait]
impl Inspector for ParsePush {
    fn name(&self) -> &'static str {
        "parsePackFile"
    }

    async fn exec(
        &self,
        req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());
        if let Err(e) = parse(req, action, &mut step) {
            step.set_error(format!(
                "Unable to parse push. Please contact an administrator for support: {e}"
            ));
        }
        action.add_step(step);
        Ok(())
    }
}

fn parse(req: &RequestContext, action: &mut Action, step: &mut Step) -> Result<(), String> {
    match req.content_type.as_deref() {
        Some(RECEIVE_PACK_REQUEST) => {}
        other => {
            return Err(format!(
                "content-type must be {RECEIVE_PACK_REQUEST}, received {}",
                other.unwrap_or("none")
            ));
        }
    }
    if req.body.is_empty() {
        return Err("invalid push request body".to_string());
    }

    let (updates, pack) = split_receive_body(&req.body).map_err(|e| e.to_string())?;
    let first = &updates[0];
    action.branch = Some(first.ref_name.clone());
    action.set_commit(&first.old_id, &first.new_id);

    let (meta, objects) = parse_pack(pack).map_err(|e| e.to_string())?;
    let commits = commit_data(&objects).map_err(|e| e.to_string())?;

    // A branch creation declares the zero id as its old tip; the true
    // base is the parent of the oldest pushed commit. The action id
    // keeps the range exactly as the client declared it.
    if action.commit_from.as_deref() == Some(ZERO_SHA) {
        if let Some(last) = commits.last() {
            action.commit_from = Some(last.parent.clone());
        }
    }

    if let Some(last) = commits.last() {
        action.user = Some(last.committer.clone());
        action.user_email = Some(last.committer_email.clone());
        step.log(format!("Push Request received from user {}", last.committer));
    }
    action.commit_data = commits;

    step.set_content(json!({ "meta": meta }));
    Ok(())
}

// =====================================================================
// Tests
// =====================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::*;
    use crate::action::ActionType;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn object_header(kind: u8, mut size: u64) -> Vec<u8> {
        let mut byte = ((kind & 0x07) << 4) | (size & 0x0f) as u8;
        size >>= 4;
        let mut out = Vec::new();
        while size > 0 {
            out.push(byte | 0x80);
            byte = (size & 0x7f) as u8;
            size >>= 7;
        }
        out.push(byte);
        out
    }

    fn pkt(payload: &str) -> Vec<u8> {
        let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
        out.extend_from_slice(payload.as_bytes());
        out
    }

    fn commit_text(parent: Option<&str>) -> String {
        let mut text = String::from("tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n");
        if let Some(parent) = parent {
            text.push_str(&format!("parent {parent}\n"));
        }
        text.push_str("author Alice Dev <alice@example.com> 1700000000 +0000\n");
        text.push_str("committer Alice Dev <alice@example.com> 1700000000 +0000\n");
        text.push('\n');
        text.push_str("Initial commit\n");
        text
    }

    fn receive_body(old: &str, new: &str, commits: &[String]) -> Bytes {
        let mut body = pkt(&format!(
            "{old} {new} refs/heads/main\0report-status side-band-64k"
        ));
        body.extend_from_slice(b"0000");
        body.extend_from_slice(b"PACK");
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&(commits.len() as u32).to_be_bytes());
        for commit in commits {
            body.extend_from_slice(&object_header(1, commit.len() as u64));
            body.extend_from_slice(&deflate(commit.as_bytes()));
        }
        body.extend_from_slice(&[0u8; 20]);
        Bytes::from(body)
    }

    fn request(body: Bytes, content_type: &str) -> RequestContext {
        RequestContext {
            method: "POST".to_string(),
            path: "/finos/git-proxy.git/git-receive-pack".to_string(),
            content_type: Some(content_type.to_string()),
            user_agent: Some("git/2.46.0".to_string()),
            accept: Some("application/x-git-receive-pack-result".to_string()),
            authorization: None,
            body,
            identity: None,
        }
    }

    fn action() -> Action {
        Action::new(
            "1700000000000",
            ActionType::Push,
            "POST",
            1_700_000_000_000,
            "finos/git-proxy.git",
            "https://github.com/finos/git-proxy.git",
        )
    }

    #[tokio::test]
    async fn test_parse_push_extracts_range_and_commits() {
        let old = "a".repeat(40);
        let new = "b".repeat(40);
        let body = receive_body(&old, &new, &[commit_text(Some(&old))]);
        let mut action = action();

        ParsePush
            .exec(&request(body, RECEIVE_PACK_REQUEST), &mut action)
            .await
            .unwrap();

        assert!(!action.error);
        assert_eq!(action.branch.as_deref(), Some("refs/heads/main"));
        assert_eq!(action.commit_from.as_deref(), Some(old.as_str()));
        assert_eq!(action.commit_to.as_deref(), Some(new.as_str()));
        assert_eq!(action.id, format!("{old}__{new}"));
        assert_eq!(action.commit_data.len(), 1);
        assert_eq!(action.user.as_deref(), Some("Alice Dev"));
        assert_eq!(action.user_email.as_deref(), Some("alice@example.com"));
        let step = action.last_step().unwrap();
        assert!(step.content_str().is_none());
        assert!(step.content.as_ref().unwrap().get("meta").is_some());
    }

    #[tokio::test]
    async fn test_parse_push_zero_old_uses_last_parent() {
        let new = "b".repeat(40);
        let parent = "c".repeat(40);
        let body = receive_body(ZERO_SHA, &new, &[commit_text(Some(&parent))]);
        let mut action = action();

        ParsePush
            .exec(&request(body, RECEIVE_PACK_REQUEST), &mut action)
            .await
            .unwrap();

        assert!(!action.error);
        assert_eq!(action.commit_from.as_deref(), Some(parent.as_str()));
        // The id records the range as pushed, zero id included.
        assert_eq!(action.id, format!("{ZERO_SHA}__{new}"));
    }

    #[tokio::test]
    async fn test_parse_push_rejects_wrong_content_type() {
        let mut action = action();
        ParsePush
            .exec(&request(Bytes::from_static(b"0000"), "text/plain"), &mut action)
            .await
            .unwrap();

        assert!(action.error);
        let message = action.error_message.as_deref().unwrap();
        assert!(message.starts_with("Unable to parse push"));
    }

    #[tokio::test]
    async fn test_parse_push_rejects_empty_body() {
        let mut action = action();
        ParsePush
            .exec(&request(Bytes::new(), RECEIVE_PACK_REQUEST), &mut action)
            .await
            .unwrap();

        assert!(action.error);
        assert_eq!(action.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_parse_push_rejects_garbage_body() {
        let mut action = action();
        ParsePush
            .exec(
                &request(Bytes::from_static(b"not a pack at all"), RECEIVE_PACK_REQUEST),
                &mut action,
            )
            .await
            .unwrap();

        assert!(action.error);
        assert!(action
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Unable to parse push. Please contact an administrator for support:"));
    }
}
