// Automation log endpoints - filtered listing, per-execution view, and
// the stats aggregation.

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use fieldops_shared::EntityKind;

use crate::error::{ApiResult, AppError};
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::workflows::logs::{LogFilter, LogStatus};
use crate::workflows::{ActionType, AutomationLog, AutomationStats};
use crate::AppState;

pub fn automation_log_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_logs))
        .route("/stats", get(get_stats))
        .route("/:execution_id", get(get_execution))
}

#[derive(Debug, Deserialize)]
struct ListLogsQuery {
    workflow_id: Option<Uuid>,
    status: Option<LogStatus>,
    action_type: Option<ActionType>,
    entity_type: Option<EntityKind>,
    entity_id: Option<Uuid>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    page: Option<i64>,
    per_page: Option<i64>,
}

async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLogsQuery>,
) -> ApiResult<Json<PaginatedResponse<AutomationLog>>> {
    let filter = LogFilter {
        workflow_id: query.workflow_id,
        status: query.status,
        action_type: query.action_type,
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        start_date: query.start_date,
        end_date: query.end_date,
    };
    let pagination = PaginationParams {
        page: query.page.unwrap_or(crate::pagination::DEFAULT_PAGE),
        per_page: query.per_page.unwrap_or(crate::pagination::DEFAULT_PAGE_SIZE),
    };

    let (logs, total) = state
        .engine
        .log_store()
        .query(&filter, &pagination)
        .await?;

    Ok(Json(PaginatedResponse::new(logs, total, &pagination)))
}

#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub execution_id: Uuid,
    pub logs: Vec<AutomationLog>,
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<ExecutionResponse>> {
    let logs = state
        .engine
        .log_store()
        .logs_for_execution(execution_id)
        .await?;

    if logs.is_empty() {
        return Err(AppError::NotFound("Execution".to_string()));
    }

    Ok(Json(ExecutionResponse { execution_id, logs }))
}

fn default_days() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    #[serde(default = "default_days")]
    days: i64,
    workflow_id: Option<Uuid>,
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<AutomationStats>> {
    let stats = state
        .engine
        .log_store()
        .stats(query.days, query.workflow_id)
        .await?;

    Ok(Json(stats))
}
