//! Scratch clone removal.

use std::io::ErrorKind;

use async_trait::async_trait;

use crate::action::{Action, Step};
use crate::error::InspectorError;
use crate::inspector::{Inspector, RequestContext};

/// Deletes the per-push scratch directory once the scanning stages are
/// done with it. A directory that is already gone counts as removed.
pub struct ClearBareClone;

#[async_trait]
impl Inspector for ClearBareClone {
    fn name(&self) -> &'static str {
        "clearBareClone"
    }

    async fn exec(
        &self,
        _req: &RequestContext,
        action: &mut Action,
    ) -> Result<(), InspectorError> {
        let mut step = Step::new(self.name());
        if let Some(dir) = action.proxy_git_path.clone() {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    step.set_error(format!("Failed to remove {}: {e}", dir.display()));
                }
            }
        }
        action.add_step(step);
        Ok(())
    }
}

// =====================================================================
// Tests
// =====================================================================
