//! External tool status.

use axum::extract::State;
use axum::Json;
use lc_av::ToolInfo;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /api/v1/live/tools
#[utoipa::path(
    get,
    path = "/api/v1/live/tools",
    responses(
        (status = 200, description = "Availability of external tools", body = Vec<ToolInfo>)
    )
)]
pub async fn tools(State(ctx): State<AppContext>) -> Result<Json<Vec<ToolInfo>>, AppError> {
    // Version probing runs the tool synchronously.
    let registry = ctx.tools.clone();
    let infos = tokio::task::spawn_blocking(move || registry.check_all())
        .await
        .map_err(|e| lc_core::Error::Internal(format!("tool check failed: {e}")))?;
    Ok(Json(infos))
}
