//! The stage catalog.
//!
//! | Stage | Reads | Writes |
//! |---|---|---|
//! | logging | request | `metadata.started_at` |
//! | errorHandling | `error`, `status` | `metadata.has_errors` |
//! | auth | `wallet_address` | `metadata.authenticated` |
//! | caching | `nft_id`, `user_prompt` | `metadata.cache_key`, outputs on a hit |
//! | nftExtraction | `nft_id`, `wallet_address` | `nft`, `nft_image_url` |
//! | prompt | `user_prompt`, `nft`, options | `prompt` |
//! | image | prompt, `wallet_address`, `job_id` | `image` |
//! | video | prompt, image | `video` |
//! | cacheSave | `image`, `metadata.cache_key` | cache entry |

mod auth;
mod caching;
mod error_handling;
mod image;
mod logging;
mod nft;
mod prompt;
mod video;

pub use auth::AuthStage;
pub use caching::{CacheSaveStage, CachingStage};
pub use error_handling::ErrorHandlingStage;
pub use image::ImageStage;
pub use logging::LoggingStage;
pub use nft::NftExtractionStage;
pub use prompt::{system_instruction, PromptStage};
pub use video::VideoStage;
