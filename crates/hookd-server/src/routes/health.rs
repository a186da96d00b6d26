use axum::Json;

/// GET /healthz — liveness probe for the reverse proxy. Unauthenticated.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
