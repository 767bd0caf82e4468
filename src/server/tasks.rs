//! Task status endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub running: bool,
}

pub async fn tasks_handler(State(app_state): State<AppState>) -> Json<Vec<TaskStatus>> {
    Json(
        app_state
            .tasks()
            .iter()
            .map(|task| TaskStatus {
                name: task.name().to_string(),
                running: !task.should_run(),
            })
            .collect(),
    )
}
