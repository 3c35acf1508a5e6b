use std::sync::Arc;

use async_trait::async_trait;
use rf_ai::NftProvider;
use rf_core::{Error, StageId};

use crate::context::GenerationContext;
use crate::middleware::{Middleware, StageError};

/// Loads the NFT's metadata; its image becomes the default reference image.
pub struct NftExtractionStage {
    provider: Arc<dyn NftProvider>,
    verify_ownership: bool,
}

impl NftExtractionStage {
    pub fn new(provider: Arc<dyn NftProvider>, verify_ownership: bool) -> Self {
        Self {
            provider,
            verify_ownership,
        }
    }
}

#[async_trait]
impl Middleware for NftExtractionStage {
    fn stage(&self) -> StageId {
        StageId::NftExtraction
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        let stage = StageId::NftExtraction;
        let nft_id = ctx
            .nft_id
            .clone()
            .ok_or_else(|| StageError::precondition(stage, "nftId is required"))?;
        let wallet = ctx
            .wallet_address
            .clone()
            .ok_or_else(|| StageError::precondition(stage, "walletAddress is required"))?;

        let nft = self
            .provider
            .fetch(&nft_id)
            .await
            .map_err(|e| StageError::from_error(stage, e))?;

        if self.verify_ownership {
            if let Some(owner) = nft.owner.as_deref() {
                if !owner.eq_ignore_ascii_case(&wallet) {
                    tracing::warn!(%nft_id, %wallet, %owner, "Wallet does not own NFT");
                    return Err(StageError::from_error(
                        stage,
                        Error::Forbidden(format!("wallet {wallet} does not own NFT {nft_id}")),
                    ));
                }
            }
        }

        tracing::debug!(%nft_id, name = %nft.name, "Loaded NFT metadata");
        ctx.nft_image_url = nft.image_url.clone();
        ctx.nft = Some(nft);
        Ok(())
    }

    fn weight(&self) -> f32 {
        0.5
    }
}
