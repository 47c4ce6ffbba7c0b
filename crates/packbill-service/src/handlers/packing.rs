//! Gated packing calculation.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use packbill_packer::{PackingJob, PackingSummary};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::gate::{check_box_limit, require_access};
use crate::state::AppState;

/// Run a packing calculation for the caller.
///
/// The job is checked against the caller's plan and counted toward this
/// month's usage before the packer is started.
pub async fn calculate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(job): Json<PackingJob>,
) -> Result<Json<PackingSummary>, ApiError> {
    let now = Utc::now();
    let subscription = require_access(state.store.as_ref(), &auth.user_id, now)?;

    job.validate()?;
    let box_count = job.box_count();
    check_box_limit(&subscription, box_count)?;

    let boxes = u64::try_from(box_count).unwrap_or(u64::MAX);
    let updated = state.store.record_usage(&auth.user_id, boxes, now)?;
    tracing::debug!(
        user_id = %auth.user_id,
        boxes,
        calculations = updated.usage.calculations_this_month,
        "Usage recorded"
    );

    let summary = state.packer.run(&job).await?;
    Ok(Json(summary))
}
