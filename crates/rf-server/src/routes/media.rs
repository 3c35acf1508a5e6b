//! Signed media delivery.
//!
//! Objects are only served for a URL minted by the store's signer whose
//! expiry has not passed.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::Utc;
use rf_media::{paths, ObjectStore};
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct SignatureParams {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// GET /media/{*path}
#[utoipa::path(
    get,
    path = "/media/{path}",
    params(
        ("path" = String, Path, description = "Object path"),
        SignatureParams
    ),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 403, description = "Missing, invalid, or expired signature"),
        (status = 404, description = "Object not found")
    )
)]
pub async fn serve_media(
    State(ctx): State<AppContext>,
    Path(path): Path<String>,
    Query(params): Query<SignatureParams>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(expires), Some(signature)) = (params.expires, params.signature.as_deref()) else {
        return Err(rf_core::Error::Forbidden("missing signature".into()).into());
    };
    if !ctx.media.signer().verify(&path, expires, signature, Utc::now()) {
        tracing::debug!(%path, expires, "Rejected media request");
        return Err(rf_core::Error::Forbidden("invalid or expired signature".into()).into());
    }

    let data = ctx.media.get(&path).await?;
    Ok(([(header::CONTENT_TYPE, paths::content_type_for(&path))], data))
}
