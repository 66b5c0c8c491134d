//! The HTTP ingress (`spec.md` §6): a single GraphQL POST route.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use serde_json_bytes::Map;
use serde_json_bytes::Value as WireValue;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::config::Environment;
use crate::orchestrator::OrchestratorState;

#[derive(Debug, Deserialize)]
struct GraphQlRequest {
    query: String,
    #[serde(default)]
    variables: serde_json::Value,
    #[serde(default, rename = "operationName")]
    #[allow(dead_code)]
    operation_name: Option<String>,
}

pub struct AppState {
    pub orchestrator: OrchestratorState,
    pub environment: Environment,
    pub jwt_public_keys: Vec<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/graphql", post(handle_query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let application_id = match headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(auth::bearer_token)
    {
        Some(token) => match auth::extract_application_id(token, state.environment, &state.jwt_public_keys) {
            Ok(application_id) => application_id,
            Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
        },
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let request: GraphQlRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let trace_id = uuid::Uuid::new_v4().to_string();
    let result = state
        .orchestrator
        .handle(trace_id.clone(), &application_id, &request.query, &request.variables)
        .await;

    let mut envelope = Map::new();
    envelope.insert(
        "data",
        result.data.unwrap_or(WireValue::Null),
    );
    if !result.errors.is_empty() {
        envelope.insert("errors", WireValue::Array(result.errors));
    }

    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&trace_id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_request_defaults_variables_to_an_empty_object() {
        let parsed: GraphQlRequest = serde_json::from_str(r#"{"query": "{ __typename }"}"#).unwrap();
        assert!(parsed.variables.is_object() || parsed.variables.is_null());
        assert_eq!(parsed.query, "{ __typename }");
    }
}
