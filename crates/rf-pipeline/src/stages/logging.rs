use async_trait::async_trait;
use chrono::Utc;
use rf_core::StageId;

use crate::context::GenerationContext;
use crate::middleware::{Middleware, StageError};

/// Logs the request and stamps the run's start time.
#[derive(Debug, Default)]
pub struct LoggingStage;

#[async_trait]
impl Middleware for LoggingStage {
    fn stage(&self) -> StageId {
        StageId::Logging
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        ctx.metadata.started_at = Some(Utc::now());
        tracing::info!(
            job_id = ?ctx.job_id,
            nft_id = ctx.nft_id.as_deref().unwrap_or("-"),
            wallet = ctx.wallet_address.as_deref().unwrap_or("-"),
            prompt_chars = ctx.user_prompt.as_deref().map_or(0, |p| p.chars().count()),
            "Generation run started"
        );
        Ok(())
    }

    fn weight(&self) -> f32 {
        0.1
    }
}
