//! Prompt enhancement.
//!
//! A failed enhancement degrades to the raw user prompt: the failure is kept
//! as a warning and the run continues.

use std::sync::Arc;

use async_trait::async_trait;
use rf_ai::TextGenerator;
use rf_core::{PromptId, StageId};

use crate::context::GenerationContext;
use crate::middleware::{Middleware, StageError};

/// System instruction for the text model.
pub fn system_instruction(max_words: u32) -> String {
    format!(
        "You write prompts for an image and video generation model. \
         Rewrite the user's idea as a single vivid scene description of at most {max_words} words. \
         Focus on the action, the setting, the camera and the lighting rather than on the \
         character's appearance, which is supplied separately by a reference image. \
         Never include sexual content, graphic violence, hate, self-harm, real people or \
         trademarked characters. Reply with the prompt text only."
    )
}

fn user_message(ctx: &GenerationContext, prompt: &str) -> String {
    let mut out = format!("Idea: {prompt}");
    if let Some(nft) = &ctx.nft {
        out.push_str("\nCharacter: ");
        out.push_str(&nft.summary());
    }
    let lore = ctx
        .options
        .lore
        .as_deref()
        .or(ctx.nft.as_ref().and_then(|n| n.lore.as_deref()));
    if let Some(lore) = lore.filter(|l| !l.trim().is_empty()) {
        out.push_str("\nLore: ");
        out.push_str(lore);
    }
    if let Some(style) = ctx.options.style.as_deref() {
        out.push_str("\nStyle: ");
        out.push_str(style);
    }
    if let Some(extra) = ctx.options.additional_context.as_deref() {
        out.push_str("\nAdditional context: ");
        out.push_str(extra);
    }
    out
}

/// Turns the user's terse prompt into a detailed scene description.
pub struct PromptStage {
    text: Arc<dyn TextGenerator>,
    max_words: u32,
}

impl PromptStage {
    pub fn new(text: Arc<dyn TextGenerator>, max_words: u32) -> Self {
        Self { text, max_words }
    }
}

#[async_trait]
impl Middleware for PromptStage {
    fn stage(&self) -> StageId {
        StageId::Prompt
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        if ctx.restored_from_cache(StageId::Prompt) {
            tracing::debug!("Enhanced prompt restored from cache");
            return Ok(());
        }
        let prompt = ctx
            .user_prompt
            .clone()
            .ok_or_else(|| StageError::precondition(StageId::Prompt, "userPrompt is required"))?;

        let enhanced = match self
            .text
            .complete(&system_instruction(self.max_words), &user_message(ctx, &prompt))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(job_id = ?ctx.job_id, "Prompt enhancement returned nothing, using raw prompt");
                ctx.record_warning(StageId::Prompt, "empty enhancement");
                prompt.clone()
            }
            Err(e) => {
                tracing::warn!(job_id = ?ctx.job_id, "Prompt enhancement failed, using raw prompt: {e}");
                ctx.record_warning(StageId::Prompt, e.to_string());
                prompt.clone()
            }
        };

        ctx.prompt.enhanced_prompt = Some(enhanced);
        ctx.prompt.original_prompt = Some(prompt);
        ctx.prompt.prompt_id = Some(PromptId::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{context, context_with};
    use crate::testing::StubTextGenerator;
    use rf_ai::NftData;
    use serde_json::json;

    #[test]
    fn instruction_mentions_word_limit() {
        let text = system_instruction(120);
        assert!(text.contains("at most 120 words"));
        assert!(text.contains("action"));
    }

    #[test]
    fn user_message_includes_context() {
        let mut ctx = context_with(json!({"style": "noir", "additionalContext": "rain"}));
        ctx.nft = Some(NftData {
            name: "Agent".into(),
            lore: Some("Exiled".into()),
            ..Default::default()
        });
        let msg = user_message(&ctx, "infiltrate the tower");
        assert!(msg.starts_with("Idea: infiltrate the tower"));
        assert!(msg.contains("Character: Agent"));
        assert!(msg.contains("Lore: Exiled"));
        assert!(msg.contains("Style: noir"));
        assert!(msg.contains("Additional context: rain"));
    }

    #[tokio::test]
    async fn enhances_prompt() {
        let text = Arc::new(StubTextGenerator::replying("A figure scales a rain-soaked tower"));
        let stage = PromptStage::new(text.clone(), 200);
        let mut ctx = context();
        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(
            ctx.prompt.enhanced_prompt.as_deref(),
            Some("A figure scales a rain-soaked tower")
        );
        assert_eq!(ctx.prompt.original_prompt.as_deref(), Some("infiltrate the tower"));
        assert!(ctx.prompt.prompt_id.is_some());
        assert!(text.last_system_prompt().unwrap().contains("200 words"));
    }

    #[tokio::test]
    async fn failure_degrades_to_raw_prompt() {
        let stage = PromptStage::new(Arc::new(StubTextGenerator::failing()), 200);
        let mut ctx = context();
        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.prompt.enhanced_prompt.as_deref(), Some("infiltrate the tower"));
        assert!(ctx.metadata.warnings.contains_key(&StageId::Prompt));
        assert!(ctx.first_error().is_none());
    }

    #[tokio::test]
    async fn blank_reply_degrades_to_raw_prompt() {
        let stage = PromptStage::new(Arc::new(StubTextGenerator::replying("  \n")), 200);
        let mut ctx = context();
        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.prompt.enhanced_prompt.as_deref(), Some("infiltrate the tower"));
        assert_eq!(ctx.effective_prompt(), Some("infiltrate the tower"));
        assert!(ctx.metadata.warnings.contains_key(&StageId::Prompt));
    }

    #[tokio::test]
    async fn missing_prompt_is_fatal() {
        let text = Arc::new(StubTextGenerator::echoing());
        let stage = PromptStage::new(text.clone(), 200);
        let mut ctx = context();
        ctx.user_prompt = None;
        assert!(stage.execute(&mut ctx).await.is_err());
        assert_eq!(text.calls(), 0);
    }

    #[tokio::test]
    async fn cached_prompt_is_kept() {
        let text = Arc::new(StubTextGenerator::echoing());
        let stage = PromptStage::new(text.clone(), 200);
        let mut ctx = context();
        ctx.metadata.cache_hit = true;
        ctx.prompt.enhanced_prompt = Some("cached".into());
        stage.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.prompt.enhanced_prompt.as_deref(), Some("cached"));
        assert_eq!(text.calls(), 0);
    }
}
