use axum::Json;
use axum::extract;
use axum::http::StatusCode;
use routeserver_service::services::SharedServices;
use routeserver_service::tasks::TaskInfo;
use routeserver_service::types::TaskId;
use serde::{Deserialize, Serialize};

use super::ResponseError;

/// Query parameters of the task listing.
#[derive(Debug, Deserialize)]
pub struct ListTasksQueryParams {
    /// Only list the tasks of this user.
    #[serde(default)]
    pub user: Option<String>,
}

pub async fn list_tasks(
    extract::State(services): extract::State<SharedServices>,
    extract::Query(params): extract::Query<ListTasksQueryParams>,
) -> Json<Vec<TaskInfo>> {
    let tasks = match params.user {
        Some(user) => services.tasks.list_for_user(&user),
        None => services.tasks.list(),
    };
    Json(tasks)
}

pub async fn get_task(
    extract::State(services): extract::State<SharedServices>,
    extract::Path(task_id): extract::Path<TaskId>,
) -> Result<Json<TaskInfo>, ResponseError> {
    match services.tasks.get(task_id) {
        Some(task) => Ok(Json(task.info())),
        None => Err((StatusCode::NOT_FOUND, "task not found").into()),
    }
}

#[derive(Debug, Serialize)]
pub struct ClearTasksResponse {
    pub removed: usize,
}

pub async fn clear_tasks(
    extract::State(services): extract::State<SharedServices>,
) -> Json<ClearTasksResponse> {
    let removed = services.tasks.clear_completed();
    tracing::info!(removed, "Cleared finished tasks");
    Json(ClearTasksResponse { removed })
}
