//! The external HTTP surface: PUT/GET over `/objects`, role-gated and
//! translated into coordinator/store calls.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tower_http::trace::TraceLayer;

use crate::config::Role;
use crate::error::KvError;
use crate::replication::coordinator::Coordinator;
use crate::store::Store;

pub struct AppState {
    pub role: Role,
    pub store: Arc<Store>,
    pub coordinator: Option<Arc<Coordinator>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/objects", put(put_object).get(list_objects))
        .route("/objects/:key", get(get_object))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct PutBody {
    key: String,
    value: JsonValue,
}

#[derive(Deserialize, Default)]
struct CollectionQuery {
    #[serde(default)]
    collection: String,
}

#[derive(Deserialize, Default)]
struct ListQuery {
    #[serde(default)]
    collection: String,
    #[serde(default)]
    prefix: String,
}

async fn put_object(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CollectionQuery>,
    body: axum::body::Bytes,
) -> Response {
    if !state.role.is_primary() {
        return (StatusCode::FORBIDDEN, "writes are only accepted by the primary").into_response();
    }

    let parsed: PutBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let outcome = match &state.coordinator {
        Some(coordinator) => coordinator.write(&q.collection, &parsed.key, parsed.value).await,
        None => state
            .store
            .put(&q.collection, &parsed.key, parsed.value)
            .map(|()| crate::replication::coordinator::WriteOutcome { committed_to: 0 }),
    };

    match outcome {
        Ok(result) => {
            Json(serde_json::json!({"status": "ok", "committed_to": result.committed_to}))
                .into_response()
        }
        Err(KvError::PeerDissent(msg)) => (StatusCode::CONFLICT, msg).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_objects(State(state): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> Response {
    let triples = state.store.list(&q.collection, &q.prefix);

    // Mirrors the source's manual bracket/comma assembly rather than
    // collecting into a Vec<Value> and handing it to serde_json::to_string.
    let mut body = String::with_capacity(triples.len() * 32 + 2);
    body.push('[');
    for (i, (collection, key, value)) in triples.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        let item = serde_json::json!({"collection": collection, "key": key, "value": value});
        body.push_str(&item.to_string());
    }
    body.push(']');

    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

async fn get_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<CollectionQuery>,
) -> Response {
    match state.store.get(&q.collection, &key) {
        Some(value) => Json(value).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
