//! Re-push of an already authorised range.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::action::{Action, Step};
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};
use crate::store::PushStore;

/// Lets a push straight through when the identical commit range was
/// already authorised through the approval flow. The action id encodes
/// the range, so a lookup by id is a lookup by range.
pub struct CheckIfWaitingAuth {
    push_store: Arc<dyn PushStore>,
}

impl CheckIfWaitingAuth {
    pub fn new(push_store: Arc<dyn PushStore>) -> Self {
        CheckIfWaitingAuth { push_store }
    }
}

#[async_trait]
impl Inspector for CheckIfWaitingAuth {
    fn name(&self) -> &'static str {
        "checkIfWaitingAuth"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let step = Step::new(self.name());
        if let Some(parked) = self.push_store.get(&action.id).await {
            if parked.authorised && !action.error {
                info!("Push {} has been authorised, allowing", action.id);
                action.set_allow_push();
            }
        }
        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
