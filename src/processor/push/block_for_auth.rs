//! Parking of a clean push for reviewer approval.

use async_trait::async_trait;

use crate::action::{Action, Step};
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};

/// Ends a clean chain run by parking the push and sending the pusher a
/// shareable approval link. The block is an async block, not an error:
/// the same range passes straight through once a reviewer approves it.
pub struct BlockForAuth {
    approval_base_url: String,
}

impl BlockForAuth {
    pub fn new(approval_base_url: impl Into<String>) -> Self {
        BlockForAuth {
            approval_base_url: approval_base_url.into(),
        }
    }
}

#[async_trait]
impl Inspector for BlockForAuth {
    fn name(&self) -> &'static str {
        "authBlock"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let url = format!("{}/dashboard/push/{}", self.approval_base_url, action.id);
        let message = format!(
            "\n\n\n\x1B[32mPackgate has received your push ✅\x1B[0m\n\n🔗 Shareable Link\n\n\x1B[34m{url}\x1B[0m\n\n\n"
        );

        let mut step = Step::new(self.name());
        step.set_async_block(message);
        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
