//! Pipeline behaviour through the factory-built configurations.
//!
//! Stages are backed by the stubbed services, so call counters show exactly
//! which stages ran.

mod common;

use std::sync::Arc;

use common::{context_for, request, request_with, TestHarness, NFT_ID, WALLET};
use rf_ai::ImageSize;
use rf_core::{JobStatus, StageId, VideoStatus};
use rf_pipeline::testing::{StubImageGenerator, StubNftProvider, StubVideoGenerator, Stubs};
use rf_pipeline::{PipelineKind, RunStatus, TaskState};
use serde_json::json;

// ---------------------------------------------------------------------------
// Short-circuit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nft_failure_stops_every_later_stage() {
    let stubs = Stubs {
        nft: Arc::new(StubNftProvider::empty()),
        ..Stubs::happy(NFT_ID, WALLET)
    };
    let harness = TestHarness::with_stubs(stubs);
    let pipeline = harness.service.factory().build(&PipelineKind::Standard);

    let ctx = pipeline.execute(&context_for(&request())).await;

    assert_eq!(ctx.status, RunStatus::Error);
    assert!(ctx.metadata.errors.contains_key(&StageId::NftExtraction));
    assert_eq!(harness.stubs.nft.calls(), 1);
    assert_eq!(harness.stubs.text.calls(), 0);
    assert_eq!(harness.stubs.images.calls(), 0);
    assert_eq!(harness.stubs.video.start_calls(), 0);
}

#[tokio::test]
async fn image_failure_never_starts_video() {
    let stubs = Stubs::happy(NFT_ID, WALLET).with_images(StubImageGenerator::failing());
    let harness = TestHarness::with_stubs(stubs);

    for kind in [PipelineKind::Standard, "custom:prompt,image,video".parse().unwrap()] {
        let pipeline = harness.service.factory().build(&kind);
        let ctx = pipeline.execute(&context_for(&request())).await;

        assert!(ctx.is_failed(), "{kind} should fail");
        assert!(ctx.metadata.errors.contains_key(&StageId::Image));
    }
    assert_eq!(harness.stubs.images.calls(), 2);
    assert_eq!(harness.stubs.video.start_calls(), 0);
}

#[tokio::test]
async fn invalid_wallet_fails_before_any_service_call() {
    let harness = TestHarness::new();
    let pipeline = harness.service.factory().build(&PipelineKind::Standard);

    let mut input = context_for(&request());
    input.wallet_address = Some("../etc".into());
    let ctx = pipeline.execute(&input).await;

    assert!(ctx.is_failed());
    assert!(ctx.metadata.errors.contains_key(&StageId::Auth));
    assert_eq!(harness.stubs.nft.calls(), 0);
    assert_eq!(harness.stubs.text.calls(), 0);
    assert_eq!(harness.stubs.images.calls(), 0);
}

// ---------------------------------------------------------------------------
// Reference-image size coercion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reference_image_coerces_unsupported_size() {
    let harness = TestHarness::new();
    let pipeline = harness.service.factory().build(&PipelineKind::ImageOnly);

    let req = request_with(json!({
        "size": "1792x1024",
        "referenceImageUrl": "https://ref.test/agent.png",
        "style": "vivid",
    }));
    let ctx = pipeline.execute(&context_for(&req)).await;

    assert_eq!(ctx.status, RunStatus::Succeeded, "error: {:?}", ctx.error);
    assert_eq!(harness.stubs.images.edit_calls(), 1);
    assert_eq!(harness.stubs.images.generate_calls(), 0);

    let sent = harness.stubs.images.last_request().unwrap();
    assert_eq!(sent.size, ImageSize::Landscape);
    assert_eq!(sent.style, None);
    assert_eq!(ctx.image.size, Some(ImageSize::Landscape));
    assert!(harness
        .stubs
        .fetcher
        .urls()
        .contains(&"https://ref.test/agent.png".to_string()));
}

#[tokio::test]
async fn without_reference_image_size_is_kept() {
    let harness = TestHarness::new();
    let pipeline = harness.service.factory().build(&PipelineKind::ImageOnly);

    let req = request_with(json!({"size": "1792x1024", "useReferenceImage": false}));
    let ctx = pipeline.execute(&context_for(&req)).await;

    assert_eq!(ctx.status, RunStatus::Succeeded, "error: {:?}", ctx.error);
    assert_eq!(harness.stubs.images.generate_calls(), 1);
    assert_eq!(harness.stubs.images.edit_calls(), 0);
    assert_eq!(
        harness.stubs.images.last_request().unwrap().size,
        ImageSize::WideLandscape
    );
}

// ---------------------------------------------------------------------------
// Video decoupling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn standard_pipeline_returns_while_video_is_processing() {
    let stubs = Stubs::happy(NFT_ID, WALLET).with_video(StubVideoGenerator::never_finishing());
    let harness = TestHarness::with_stubs(stubs);
    let job = harness
        .service
        .create_job(&PipelineKind::Standard, &request())
        .unwrap();

    let pipeline = harness.service.factory().build(&PipelineKind::Standard);
    let input = rf_pipeline::GenerationContext::from_request(Some(job.id), &request()).unwrap();
    let ctx = pipeline.execute(&input).await;

    assert_eq!(ctx.status, RunStatus::Succeeded, "error: {:?}", ctx.error);
    assert_eq!(ctx.video.video_status, Some(VideoStatus::Processing));
    assert!(ctx.video.video_operation_name.is_some());
    assert!(ctx.video.video_path.is_none());
    assert_eq!(harness.stubs.video.start_calls(), 1);

    let cancelled = harness.service.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
}

#[tokio::test]
async fn job_completes_out_of_band_after_run_returns() {
    let stubs = Stubs::happy(NFT_ID, WALLET).with_video(StubVideoGenerator::succeeding_after(3));
    let harness = TestHarness::with_stubs(stubs);

    let job = harness
        .service
        .submit(&PipelineKind::Standard, &request())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.video.path.is_none());

    let state = harness.service.supervisor().wait(job.id).await;
    assert_eq!(state, Some(TaskState::Completed));

    let done = harness.job(job.id);
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.video.path.is_some());
    assert!(done.video.url.is_some());
    assert!(harness.stubs.video.poll_calls() >= 4);
    assert_eq!(harness.stubs.video.download_calls(), 1);
}

#[tokio::test]
async fn remote_video_failure_fails_the_job_later() {
    let stubs =
        Stubs::happy(NFT_ID, WALLET).with_video(StubVideoGenerator::failing("content rejected"));
    let harness = TestHarness::with_stubs(stubs);

    let job = harness
        .service
        .submit(&PipelineKind::Standard, &request())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Processing);

    assert_eq!(
        harness.service.supervisor().wait(job.id).await,
        Some(TaskState::Failed)
    );
    let failed = harness.job(job.id);
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("content rejected"));
}

// ---------------------------------------------------------------------------
// Error clearing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_failure_clears_partial_image_outputs() {
    let stubs = Stubs::happy(NFT_ID, WALLET).with_images(StubImageGenerator::failing());
    let harness = TestHarness::with_stubs(stubs);
    let pipeline = harness.service.factory().build(&PipelineKind::ImageOnly);

    let mut input = context_for(&request());
    input.image.image_url = Some("http://localhost/media/stale.png".into());
    input.image.image_path = Some("users/Wallet1/images/stale.png".into());
    input.image.thumbnail_path = Some("users/Wallet1/images/stale.png".into());

    let ctx = pipeline.execute(&input).await;

    assert!(ctx.is_failed());
    assert!(ctx.image.image_url.is_none());
    assert!(ctx.image.image_path.is_none());
    assert!(ctx.image.thumbnail_path.is_none());
    assert!(ctx.error.is_some());
}
