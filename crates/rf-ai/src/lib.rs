//! rf-ai: clients for the external services a generation run depends on.
//!
//! Each service sits behind a trait ([`TextGenerator`], [`ImageGenerator`],
//! [`VideoGenerator`], [`NftProvider`], [`MediaFetcher`]) so the pipeline can
//! be driven by test doubles. The bundled HTTP implementations share a
//! rate-limited client that classifies upstream failures.

pub mod error;
pub mod fetch;
pub mod http;
pub mod image;
pub mod nft;
pub mod text;
pub mod video;

pub use error::{upstream_error, UpstreamErrorKind};
pub use fetch::{HttpFetcher, MediaFetcher};
pub use image::{GeneratedImage, ImageGenerator, ImageRequest, ImageSize, OpenAiImageClient};
pub use nft::{HttpNftProvider, NftAttribute, NftData, NftProvider};
pub use reqwest::Url;
pub use text::{OpenAiTextClient, TextGenerator};
pub use video::{HttpVideoClient, OperationHandle, OperationState, VideoGenerator, VideoRequest};
