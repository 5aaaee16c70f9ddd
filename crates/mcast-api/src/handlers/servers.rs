//! /servers handler. Rendezvous points only.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use mcast_services::ServerSnapshot;

use super::ApiState;

#[derive(Serialize)]
pub struct ServersResponse {
    pub servers: Vec<ServerSnapshot>,
}

pub async fn handle_servers(
    State(state): State<ApiState>,
) -> Result<Json<ServersResponse>, (StatusCode, String)> {
    let Some(registry) = state.node.servers() else {
        return Err((
            StatusCode::NOT_FOUND,
            "not a rendezvous point".to_string(),
        ));
    };
    Ok(Json(ServersResponse {
        servers: registry.snapshot().await,
    }))
}
