use std::collections::HashMap;
use std::sync::Arc;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::debug;
use crate::flow::{FlowTable, Layer, Metric};
use super::server::SharedStorage;

#[derive(Clone)]
pub struct RpcState {
    pub table:   Arc<FlowTable>,
    pub storage: SharedStorage,
}

/// Read-only query surface over the live table and the flow store.
pub fn routes(state: RpcState) -> Router {
    Router::new()
        .route("/rpc/flows", get(flow_search))
        .route("/rpc/conversation/:layer", get(conversation))
        .route("/rpc/discovery/:type", get(discovery))
        .with_state(state)
}

/// Query-string pairs pass through as opaque storage filters. Any search
/// failure, including a missing backend, is a plain 404.
async fn flow_search(
    State(state): State<RpcState>,
    Query(filters): Query<HashMap<String, String>>,
) -> Response {
    let storage = match state.storage.lock().clone() {
        Some(storage) => storage,
        None          => return StatusCode::NOT_FOUND.into_response(),
    };

    match storage.search_flows(&filters) {
        Ok(flows) => Json(flows).into_response(),
        Err(e)    => {
            debug!("flow search failed: {}", e);
            StatusCode::NOT_FOUND.into_response()
        },
    }
}

async fn conversation(
    State(state): State<RpcState>,
    Path(layer): Path<String>,
) -> Response {
    Json(state.table.conversation(Layer::from_param(&layer))).into_response()
}

async fn discovery(
    State(state): State<RpcState>,
    Path(metric): Path<String>,
) -> Response {
    Json(state.table.discovery(Metric::from_param(&metric))).into_response()
}
