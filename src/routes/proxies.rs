use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::proxy_queries;
use crate::models::proxy::{ProxyIdentity, ProxyRole};
use crate::routes::{api_error, ApiError};
use crate::services::proxy_pool::normalize_proxy_line;

/// GET /api/v1/proxies
pub async fn list_proxies(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProxyIdentity>>, (StatusCode, Json<ApiError>)> {
    let proxies = proxy_queries::list_proxies(&state.db).await.map_err(|e| {
        tracing::error!(error = %e, "failed to list proxies");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list proxies")
    })?;

    Ok(Json(proxies))
}

#[derive(Debug, Deserialize)]
pub struct CreateProxyRequest {
    pub url: String,
    pub label: Option<String>,
    pub role: ProxyRole,
}

/// POST /api/v1/proxies
pub async fn create_proxy(
    State(state): State<AppState>,
    Json(req): Json<CreateProxyRequest>,
) -> Result<(StatusCode, Json<ProxyIdentity>), (StatusCode, Json<ApiError>)> {
    let normalized = normalize_proxy_line(&req.url)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "unrecognized proxy format"))?;

    let inserted = proxy_queries::insert_proxy(&state.db, &normalized, req.label.as_deref(), req.role)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to insert proxy");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to insert proxy")
        })?
        .ok_or_else(|| api_error(StatusCode::CONFLICT, "proxy already exists"))?;

    state.proxies.upsert_local(inserted.clone());
    Ok((StatusCode::CREATED, Json(inserted)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProxyRequest {
    pub label: Option<String>,
    pub role: Option<ProxyRole>,
    pub is_active: Option<bool>,
}

/// PATCH /api/v1/proxies/{id}
pub async fn update_proxy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProxyRequest>,
) -> Result<Json<ProxyIdentity>, (StatusCode, Json<ApiError>)> {
    let updated =
        proxy_queries::update_proxy(&state.db, id, req.label.as_deref(), req.role, req.is_active)
            .await
            .map_err(|e| {
                tracing::error!(proxy_id = %id, error = %e, "failed to update proxy");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to update proxy")
            })?
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "proxy not found"))?;

    state.proxies.upsert_local(updated.clone());
    Ok(Json(updated))
}

/// DELETE /api/v1/proxies/{id}
pub async fn delete_proxy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let deleted = proxy_queries::delete_proxy(&state.db, id).await.map_err(|e| {
        tracing::error!(proxy_id = %id, error = %e, "failed to delete proxy");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete proxy")
    })?;

    if !deleted {
        return Err(api_error(StatusCode::NOT_FOUND, "proxy not found"));
    }

    state.proxies.remove_local(&[id]);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ImportProxiesRequest {
    pub lines: Vec<String>,
    /// Role assigned to every imported identity; defaults to warmup.
    pub role: Option<ProxyRole>,
}

#[derive(Debug, Serialize)]
pub struct ImportProxiesResponse {
    pub added: usize,
}

/// POST /api/v1/proxies/import — heterogeneous formats, duplicates silently
/// skipped, returns the count actually added.
pub async fn import_proxies(
    State(state): State<AppState>,
    Json(req): Json<ImportProxiesRequest>,
) -> Result<Json<ImportProxiesResponse>, (StatusCode, Json<ApiError>)> {
    let role = req.role.unwrap_or(ProxyRole::Warmup);
    let added = state
        .proxies
        .bulk_import(&state.db, &req.lines, role)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "proxy import failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "proxy import failed")
        })?;

    Ok(Json(ImportProxiesResponse { added }))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Activate,
    Deactivate,
    Delete,
}

#[derive(Debug, Deserialize)]
pub struct BulkProxyRequest {
    pub action: BulkAction,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BulkProxyResponse {
    pub affected: u64,
}

/// POST /api/v1/proxies/bulk — activate/deactivate/delete a selection.
pub async fn bulk_proxies(
    State(state): State<AppState>,
    Json(req): Json<BulkProxyRequest>,
) -> Result<Json<BulkProxyResponse>, (StatusCode, Json<ApiError>)> {
    let result = match req.action {
        BulkAction::Activate => proxy_queries::set_active_bulk(&state.db, &req.ids, true).await,
        BulkAction::Deactivate => proxy_queries::set_active_bulk(&state.db, &req.ids, false).await,
        BulkAction::Delete => proxy_queries::delete_bulk(&state.db, &req.ids).await,
    };

    let affected = result.map_err(|e| {
        tracing::error!(error = %e, "bulk proxy operation failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "bulk operation failed")
    })?;

    match req.action {
        BulkAction::Activate => {
            for id in &req.ids {
                state.proxies.set_active_local(*id, true);
            }
        }
        BulkAction::Deactivate => {
            for id in &req.ids {
                state.proxies.set_active_local(*id, false);
            }
        }
        BulkAction::Delete => state.proxies.remove_local(&req.ids),
    }

    Ok(Json(BulkProxyResponse { affected }))
}
