use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use instinct_core::{InstinctError, Reflex, ReflexConfig};
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/reflexes: loaded reflexes with their rule and actions.
pub async fn list_reflexes(State(app): State<AppState>) -> Json<Value> {
    let list: Vec<Value> = app
        .instinct
        .reflexes()
        .await
        .iter()
        .map(|r| {
            let actions: Vec<Value> = r
                .actions()
                .iter()
                .map(|a| serde_json::json!({ "type": a.action_type(), "name": a.name() }))
                .collect();
            serde_json::json!({
                "name": r.name(),
                "rule_type": r.rule().rule_type(),
                "action_count": actions.len(),
                "actions": actions,
            })
        })
        .collect();
    Json(serde_json::json!(list))
}

/// POST /api/reflexes: build a reflex from configuration and load it.
pub async fn create_reflex(
    State(app): State<AppState>,
    Json(config): Json<ReflexConfig>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let reflex = Reflex::from_config(&config, &app.registry)?;
    let actions = reflex.actions().len();
    app.instinct.add_reflex(reflex).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "name": config.name, "action_count": actions })),
    ))
}

/// POST /api/reflexes/validate: report every problem without loading.
pub async fn validate_reflex(
    State(app): State<AppState>,
    Json(config): Json<ReflexConfig>,
) -> Json<Value> {
    let errors: Vec<String> = match config.validate(&app.registry) {
        Ok(()) => Vec::new(),
        Err(InstinctError::Multiple(errors)) => errors.iter().map(ToString::to_string).collect(),
        Err(e) => vec![e.to_string()],
    };
    Json(serde_json::json!({
        "name": config.name,
        "valid": errors.is_empty(),
        "errors": errors,
    }))
}

/// GET /health
pub async fn health(State(app): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "reflexes": app.instinct.len().await,
    }))
}
