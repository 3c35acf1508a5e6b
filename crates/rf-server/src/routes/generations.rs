//! Generation job route handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rf_core::JobId;
use rf_db::models::GenerationJob;
use rf_pipeline::{GenerationRequest, PipelineKind};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::AppError;

/// Request body for submitting a generation.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitGenerationRequest {
    /// `standard`, `image-only`, `prompt-only`, `video-only`, or
    /// `custom:<stage,...>`. Defaults to `standard`.
    pub pipeline: Option<String>,
    pub nft_id: String,
    pub user_prompt: String,
    pub wallet_address: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub options: serde_json::Value,
}

/// Query parameters for listing a wallet's generations.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListGenerationsParams {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Generation job response.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub id: String,
    pub nft_id: String,
    pub created_by: String,
    pub status: String,
    pub pipeline_type: String,
    pub image_url: Option<String>,
    pub image_url_expiry: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_url_expiry: Option<String>,
    pub video_url: Option<String>,
    pub video_url_expiry: Option<String>,
    pub video_operation_name: Option<String>,
    pub enhanced_prompt: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl GenerationResponse {
    pub fn from_model(job: &GenerationJob) -> Self {
        let ts = |t: Option<chrono::DateTime<chrono::Utc>>| t.map(|t| t.to_rfc3339());
        Self {
            id: job.id.to_string(),
            nft_id: job.nft_id.clone(),
            created_by: job.created_by.clone(),
            status: job.status.to_string(),
            pipeline_type: job.pipeline_type.clone(),
            image_url: job.image.url.clone(),
            image_url_expiry: ts(job.image.url_expiry),
            thumbnail_url: job.thumbnail.url.clone(),
            thumbnail_url_expiry: ts(job.thumbnail.url_expiry),
            video_url: job.video.url.clone(),
            video_url_expiry: ts(job.video.url_expiry),
            video_operation_name: job.video_operation.clone(),
            enhanced_prompt: job.enhanced_prompt.clone(),
            error: job.error.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

fn parse_job_id(id: &str) -> Result<JobId, AppError> {
    id.parse()
        .map_err(|_| rf_core::Error::Validation("Invalid job ID".into()).into())
}

/// POST /api/generations
#[utoipa::path(
    post,
    path = "/api/generations",
    request_body = SubmitGenerationRequest,
    responses(
        (status = 202, description = "Generation queued", body = GenerationResponse),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn submit_generation(
    State(ctx): State<AppContext>,
    Json(payload): Json<SubmitGenerationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind: PipelineKind = payload.pipeline.as_deref().unwrap_or("standard").parse()?;
    let req = GenerationRequest {
        nft_id: payload.nft_id,
        user_prompt: payload.user_prompt,
        wallet_address: payload.wallet_address,
        options: payload.options,
    };

    let job = ctx.service.create_job(&kind, &req)?;
    let job_id = job.id;
    let service = ctx.service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.run(job_id, &req).await {
            tracing::error!(%job_id, "Generation run failed: {e}");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(GenerationResponse::from_model(&job))))
}

/// GET /api/generations/{id}
#[utoipa::path(
    get,
    path = "/api/generations/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Generation details", body = GenerationResponse),
        (status = 404, description = "Job not found")
    )
)]
pub async fn get_generation(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<GenerationResponse>, AppError> {
    let job = ctx.service.get_job(parse_job_id(&id)?).await?;
    Ok(Json(GenerationResponse::from_model(&job)))
}

/// GET /api/wallets/{wallet}/generations
#[utoipa::path(
    get,
    path = "/api/wallets/{wallet}/generations",
    params(
        ("wallet" = String, Path, description = "Wallet address"),
        ListGenerationsParams
    ),
    responses(
        (status = 200, description = "Generations by this wallet", body = Vec<GenerationResponse>)
    )
)]
pub async fn list_wallet_generations(
    State(ctx): State<AppContext>,
    Path(wallet): Path<String>,
    Query(params): Query<ListGenerationsParams>,
) -> Result<Json<Vec<GenerationResponse>>, AppError> {
    let limit = params.limit.clamp(1, 200);
    let jobs = ctx
        .service
        .list_for_wallet(&wallet, params.offset.max(0), limit)
        .await?;
    Ok(Json(jobs.iter().map(GenerationResponse::from_model).collect()))
}

/// POST /api/generations/{id}/refresh
#[utoipa::path(
    post,
    path = "/api/generations/{id}/refresh",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "URLs re-minted", body = GenerationResponse),
        (status = 404, description = "Job not found")
    )
)]
pub async fn refresh_generation(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<GenerationResponse>, AppError> {
    let job = ctx.service.refresh(parse_job_id(&id)?).await?;
    Ok(Json(GenerationResponse::from_model(&job)))
}

/// POST /api/generations/{id}/cancel
#[utoipa::path(
    post,
    path = "/api/generations/{id}/cancel",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Generation cancelled", body = GenerationResponse),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already finished")
    )
)]
pub async fn cancel_generation(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<GenerationResponse>, AppError> {
    let job = ctx.service.cancel(parse_job_id(&id)?).await?;
    Ok(Json(GenerationResponse::from_model(&job)))
}
