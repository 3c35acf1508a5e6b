use async_trait::async_trait;
use rf_core::{Error, StageId};

use crate::context::GenerationContext;
use crate::middleware::{Middleware, StageError};

const MAX_WALLET_LEN: usize = 64;

/// Checks that the request carries a plausible wallet address.
///
/// Only the shape is checked (base58 or hex characters, bounded length);
/// signatures are verified upstream of the pipeline.
#[derive(Debug, Default)]
pub struct AuthStage;

fn valid_wallet(wallet: &str) -> bool {
    (1..=MAX_WALLET_LEN).contains(&wallet.len()) && wallet.chars().all(|c| c.is_ascii_alphanumeric())
}

#[async_trait]
impl Middleware for AuthStage {
    fn stage(&self) -> StageId {
        StageId::Auth
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        let Some(wallet) = ctx.wallet_address.as_deref() else {
            return Err(StageError::from_error(
                StageId::Auth,
                Error::Unauthorized("walletAddress is required".into()),
            ));
        };
        if !valid_wallet(wallet) {
            return Err(StageError::from_error(
                StageId::Auth,
                Error::Unauthorized("walletAddress is not a valid wallet address".into()),
            ));
        }
        ctx.metadata.authenticated = true;
        Ok(())
    }

    fn weight(&self) -> f32 {
        0.1
    }
}
