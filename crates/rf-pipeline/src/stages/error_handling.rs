use async_trait::async_trait;
use rf_core::StageId;

use crate::context::GenerationContext;
use crate::middleware::{Middleware, StageError};

/// Refuses to start from a context that is already failed, and clears any
/// stray error flag left on a reused context.
#[derive(Debug, Default)]
pub struct ErrorHandlingStage;

#[async_trait]
impl Middleware for ErrorHandlingStage {
    fn stage(&self) -> StageId {
        StageId::ErrorHandling
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        if ctx.is_failed() || ctx.error.is_some() {
            let cause = ctx.error.clone().unwrap_or_else(|| "unknown error".into());
            return Err(StageError::precondition(
                StageId::ErrorHandling,
                format!("context arrived in a failed state: {cause}"),
            ));
        }
        if ctx.metadata.errors.is_empty() {
            ctx.metadata.has_errors = false;
        }
        Ok(())
    }

    fn weight(&self) -> f32 {
        0.1
    }
}
