//! Pipeline: runs a sequence of [`Middleware`]s with progress reporting,
//! cancellation, short-circuit on the first failure, and rollback.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use rf_core::StageId;
use tokio_util::sync::CancellationToken;

use crate::context::{GenerationContext, ProgressSender, RunStatus};
use crate::middleware::Middleware;

/// An ordered list of stages.
///
/// Stages run strictly one after another: later stages read what earlier
/// ones wrote, so there is no intra-pipeline parallelism.
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage ids in execution order.
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.stage()).collect()
    }

    pub fn contains(&self, stage: StageId) -> bool {
        self.stages.iter().any(|s| s.stage() == stage)
    }

    fn total_weight(&self) -> f32 {
        self.stages.iter().map(|s| s.weight()).sum()
    }

    /// Run every stage against a copy of `input`.
    pub async fn execute(&self, input: &GenerationContext) -> GenerationContext {
        self.execute_with(input, &ProgressSender::noop(), &CancellationToken::new())
            .await
    }

    /// Run every stage against a copy of `input`, reporting progress and
    /// checking `cancel` between stages.
    ///
    /// The returned context has `status == Error` and a populated `error` if
    /// any stage failed, returned an error, or panicked; the stages after it
    /// never run.
    pub async fn execute_with(
        &self,
        input: &GenerationContext,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> GenerationContext {
        let mut ctx = input.clone();
        let total_weight = self.total_weight();
        let mut completed_weight: f32 = 0.0;
        let mut completed: Vec<usize> = Vec::new();

        for (idx, stage) in self.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(pipeline = %self.name, "Pipeline cancelled");
                ctx.fail(StageId::Global, "cancelled");
                self.rollback_completed(&mut ctx, &completed).await;
                return ctx;
            }

            let id = stage.stage();
            tracing::debug!(pipeline = %self.name, stage = id.name(), "Starting stage");

            let outcome = AssertUnwindSafe(stage.execute(&mut ctx))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => ctx.first_error().map(|message| (id, message)),
                Ok(Err(e)) => Some((e.stage, e.message)),
                Err(panic) => Some((id, panic_message(panic.as_ref()))),
            };

            if let Some((failed_stage, message)) = failure {
                ctx.clear_outputs(id);
                if !ctx.metadata.errors.contains_key(&failed_stage) {
                    ctx.record_error(failed_stage, message.clone());
                }
                ctx.error = ctx.first_error().or(Some(message));
                ctx.status = RunStatus::Error;

                tracing::error!(
                    pipeline = %self.name,
                    stage = id.name(),
                    error = ctx.error.as_deref().unwrap_or_default(),
                    "Stage failed"
                );
                self.rollback_completed(&mut ctx, &completed).await;
                return ctx;
            }

            completed.push(idx);
            completed_weight += stage.weight();
            let pct = if total_weight > 0.0 {
                (completed_weight / total_weight) * 100.0
            } else {
                100.0
            };
            progress.send(pct, id);
            tracing::debug!("[{:.0}%] Completed: {}", pct, id.name());
        }

        ctx.status = RunStatus::Succeeded;
        ctx
    }

    /// Rollback completed stages in reverse order.
    async fn rollback_completed(&self, ctx: &mut GenerationContext, completed: &[usize]) {
        for &idx in completed.iter().rev() {
            let stage = &self.stages[idx];
            tracing::debug!("Rolling back: {}", stage.name());
            if let Err(e) = stage.rollback(ctx).await {
                tracing::warn!("Rollback failed for {}: {e}", stage.name());
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_ids())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("stage panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("stage panicked: {s}")
    } else {
        "stage panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::StageError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dyn_stage<M: Middleware + 'static>(m: Arc<M>) -> Arc<dyn Middleware> {
        m
    }

    // -- Fake stages ----------------------------------------------------------

    struct FakeOk {
        stage: StageId,
        executed: Arc<AtomicUsize>,
        rolled_back: Arc<AtomicUsize>,
    }

    impl FakeOk {
        fn new(stage: StageId) -> (Arc<Self>, Arc<AtomicUsize>) {
            let executed = Arc::new(AtomicUsize::new(0));
            let stub = Arc::new(Self {
                stage,
                executed: executed.clone(),
                rolled_back: Arc::new(AtomicUsize::new(0)),
            });
            (stub, executed)
        }
    }

    #[async_trait]
    impl Middleware for FakeOk {
        fn stage(&self) -> StageId {
            self.stage
        }
        async fn execute(&self, _ctx: &mut GenerationContext) -> Result<(), StageError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn rollback(&self, _ctx: &mut GenerationContext) -> rf_core::Result<()> {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Writes image outputs, then fails.
    struct FakeImageFail;

    #[async_trait]
    impl Middleware for FakeImageFail {
        fn stage(&self) -> StageId {
            StageId::Image
        }
        async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
            ctx.image.image_path = Some("users/w/images/partial.png".into());
            ctx.image.image_url = Some("http://partial".into());
            ctx.image.thumbnail_path = Some("users/w/images/partial.png".into());
            Err(StageError::upstream(StageId::Image, "content policy violation"))
        }
    }

    /// Annotates the context instead of returning an error.
    struct FakeAnnotating;

    #[async_trait]
    impl Middleware for FakeAnnotating {
        fn stage(&self) -> StageId {
            StageId::NftExtraction
        }
        async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
            ctx.record_error(StageId::NftExtraction, "nft not found");
            Ok(())
        }
    }

    struct FakePanic;

    #[async_trait]
    impl Middleware for FakePanic {
        fn stage(&self) -> StageId {
            StageId::Prompt
        }
        async fn execute(&self, _ctx: &mut GenerationContext) -> Result<(), StageError> {
            panic!("unexpected state");
        }
    }

    // -- Tests ----------------------------------------------------------------

    #[tokio::test]
    async fn all_stages_run_in_order() {
        let (a, ca) = FakeOk::new(StageId::Logging);
        let (b, cb) = FakeOk::new(StageId::Auth);
        let pipeline = Pipeline::new("t", vec![dyn_stage(a), dyn_stage(b)]);

        let out = pipeline.execute(&GenerationContext::new()).await;
        assert_eq!(out.status, RunStatus::Succeeded);
        assert!(out.error.is_none());
        assert_eq!(ca.load(Ordering::SeqCst), 1);
        assert_eq!(cb.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stage_ids(), vec![StageId::Logging, StageId::Auth]);
    }

    #[tokio::test]
    async fn failure_short_circuits_later_stages() {
        let (first, c1) = FakeOk::new(StageId::Logging);
        let (after1, c2) = FakeOk::new(StageId::Video);
        let (after2, c3) = FakeOk::new(StageId::CacheSave);
        let pipeline = Pipeline::new(
            "t",
            vec![
                dyn_stage(first),
                dyn_stage(Arc::new(FakeImageFail)),
                dyn_stage(after1),
                dyn_stage(after2),
            ],
        );

        let out = pipeline.execute(&GenerationContext::new()).await;
        assert_eq!(out.status, RunStatus::Error);
        assert_eq!(out.error.as_deref(), Some("content policy violation"));
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 0);
        assert_eq!(c3.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_stage_outputs_are_cleared() {
        let pipeline = Pipeline::new("t", vec![dyn_stage(Arc::new(FakeImageFail))]);

        let mut input = GenerationContext::new();
        input.image.image_url = Some("http://stale".into());
        let out = pipeline.execute(&input).await;

        assert!(out.image.image_url.is_none());
        assert!(out.image.image_path.is_none());
        assert!(out.image.thumbnail_path.is_none());
        assert!(out.metadata.errors.contains_key(&StageId::Image));
    }

    #[tokio::test]
    async fn annotated_error_short_circuits() {
        let (after, count) = FakeOk::new(StageId::Prompt);
        let pipeline = Pipeline::new(
            "t",
            vec![
                dyn_stage(Arc::new(FakeAnnotating)),
                dyn_stage(after),
            ],
        );

        let out = pipeline.execute(&GenerationContext::new()).await;
        assert_eq!(out.status, RunStatus::Error);
        assert_eq!(out.error.as_deref(), Some("nft not found"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panic_is_caught() {
        let (after, count) = FakeOk::new(StageId::Image);
        let pipeline = Pipeline::new("t", vec![dyn_stage(Arc::new(FakePanic)), dyn_stage(after)]);

        let out = pipeline.execute(&GenerationContext::new()).await;
        assert_eq!(out.status, RunStatus::Error);
        assert!(out.error.unwrap().contains("unexpected state"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn input_context_is_not_mutated() {
        let pipeline = Pipeline::new("t", vec![dyn_stage(Arc::new(FakeImageFail))]);
        let input = GenerationContext::new();
        let _ = pipeline.execute(&input).await;
        assert!(input.error.is_none());
        assert_eq!(input.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn failure_triggers_rollback() {
        let (first, _) = FakeOk::new(StageId::Caching);
        let rolled = first.rolled_back.clone();
        let pipeline = Pipeline::new(
            "t",
            vec![
                dyn_stage(first),
                dyn_stage(Arc::new(FakeImageFail)),
            ],
        );

        pipeline.execute(&GenerationContext::new()).await;
        assert_eq!(rolled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_does_not_roll_back() {
        let (first, _) = FakeOk::new(StageId::Caching);
        let rolled = first.rolled_back.clone();
        let pipeline = Pipeline::new("t", vec![dyn_stage(first)]);

        pipeline.execute(&GenerationContext::new()).await;
        assert_eq!(rolled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_pipeline() {
        let (stage, count) = FakeOk::new(StageId::Logging);
        let pipeline = Pipeline::new("t", vec![dyn_stage(stage)]);
        let token = CancellationToken::new();
        token.cancel();

        let out = pipeline
            .execute_with(&GenerationContext::new(), &ProgressSender::noop(), &token)
            .await;
        assert_eq!(out.error.as_deref(), Some("cancelled"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn progress_reporting() {
        let reports = Arc::new(std::sync::Mutex::new(Vec::new()));
        let reports_clone = reports.clone();
        let progress = ProgressSender::new(move |pct, stage| {
            reports_clone.lock().unwrap().push((pct, stage));
        });

        let (a, _) = FakeOk::new(StageId::Logging);
        let (b, _) = FakeOk::new(StageId::Auth);
        let pipeline = Pipeline::new("t", vec![dyn_stage(a), dyn_stage(b)]);
        pipeline
            .execute_with(&GenerationContext::new(), &progress, &CancellationToken::new())
            .await;

        let rpts = reports.lock().unwrap();
        assert_eq!(rpts.len(), 2);
        assert_eq!(rpts[0], (50.0, StageId::Logging));
        assert_eq!(rpts[1], (100.0, StageId::Auth));
    }
}
