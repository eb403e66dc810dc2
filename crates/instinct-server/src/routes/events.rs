use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

/// POST /event: dispatch one event to every loaded reflex.
///
/// 204 when every reflex finished cleanly, 500 with the failure summary
/// otherwise, 400 when the body is not a JSON object.
pub async fn process_event(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<StatusCode, AppError> {
    let Value::Object(event) = body else {
        return Err(AppError::bad_request("event must be a JSON object"));
    };
    app.instinct.process_event(event).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/events: like `/event`, but reports which reflexes matched.
pub async fn process_event_verbose(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let Value::Object(event) = body else {
        return Err(AppError::bad_request("event must be a JSON object"));
    };
    let outcome = app.instinct.process_event(event).await?;
    Ok(Json(serde_json::to_value(outcome)?))
}
