//! /relays handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use mcast_services::RelaySnapshot;

use super::ApiState;

#[derive(Serialize)]
pub struct RelaysResponse {
    pub relays: Vec<RelaySnapshot>,
}

pub async fn handle_relays(State(state): State<ApiState>) -> Json<RelaysResponse> {
    let relays = state.node.state().relays.snapshot().await;
    Json(RelaysResponse { relays })
}
