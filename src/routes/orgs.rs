use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::db::org_queries;
use crate::models::org::OrganizationStat;
use crate::routes::{api_error, ApiError};
use crate::services::weights::{adjusted_weight, success_rate, WeightParams};

/// GET /api/v1/organizations — per-organization outcome counters with the
/// derived success rate and adjusted weight.
pub async fn list_organizations(
    State(state): State<AppState>,
) -> Result<Json<Vec<OrganizationStat>>, (StatusCode, Json<ApiError>)> {
    let rows = org_queries::list_stats(&state.db).await.map_err(|e| {
        tracing::error!(error = %e, "failed to list organization stats");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list stats")
    })?;

    let params = WeightParams::from_config(&state.config);
    let stats = rows
        .into_iter()
        .map(|row| OrganizationStat {
            success_rate: success_rate(row.attempts, row.successes),
            adjusted_weight: adjusted_weight(
                row.attempts,
                row.successes,
                row.fraud_rejects,
                params,
            ),
            name: row.name,
            attempts: row.attempts,
            successes: row.successes,
            failures: row.failures,
            fraud_rejects: row.fraud_rejects,
            updated_at: row.updated_at,
        })
        .collect();

    Ok(Json(stats))
}
