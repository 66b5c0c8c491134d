//! End-to-end tests driving the GraphQL ingress route with mocked
//! policy, consent, and provider collaborators (`spec.md` §8 seed
//! scenarios).

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use fedquery_federation::SchemaRegistry;
use fedquery_federation::UnifiedSchema;
use fedquery_gateway::audit::AuditEmitter;
use fedquery_gateway::config::Environment;
use fedquery_gateway::consent::ConsentClient;
use fedquery_gateway::dispatcher::ProviderDispatcher;
use fedquery_gateway::orchestrator::OrchestratorState;
use fedquery_gateway::policy::PolicyClient;
use fedquery_gateway::server;
use fedquery_gateway::server::AppState;
use jsonwebtoken::Algorithm;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::method;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

const SDL: &str = r#"
    directive @sourceInfo(providerKey: String!, providerField: String!) on FIELD_DEFINITION

    type PersonInfo {
        fullName: String @sourceInfo(providerKey: "drp", providerField: "person.fullName")
    }

    type Query {
        personInfo: PersonInfo
    }
"#;

fn app_token() -> String {
    let mut claims = std::collections::HashMap::new();
    claims.insert("applicationUUId".to_string(), serde_json::Value::String("app-1".to_string()));
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"unused-in-local-mode"),
    )
    .unwrap()
}

async fn build_app(policy_server: &MockServer, consent_server: &MockServer, provider_server: &MockServer) -> Arc<AppState> {
    let unified_schema = UnifiedSchema::parse("1.0.0", SDL, "test", None).unwrap();
    let schema_registry = Arc::new(SchemaRegistry::new(unified_schema));
    let http = reqwest::Client::new();

    let mut providers = std::collections::HashMap::new();
    providers.insert(
        "drp".to_string(),
        fedquery_gateway::config::ProviderConfig {
            url: Url::parse(&provider_server.uri()).unwrap(),
            timeout: Duration::from_millis(500),
        },
    );

    let orchestrator = OrchestratorState {
        schema_registry,
        policy: PolicyClient::new(http.clone(), Url::parse(&policy_server.uri()).unwrap(), Duration::from_millis(500)),
        consent: ConsentClient::new(http.clone(), Url::parse(&consent_server.uri()).unwrap(), Duration::from_millis(500)),
        dispatcher: ProviderDispatcher::new(http.clone(), providers, 4),
        audit: AuditEmitter::start(
            http.clone(),
            Url::parse(&policy_server.uri()).unwrap(),
            16,
            Duration::from_millis(200),
        ),
        schema_id: "1.0.0".to_string(),
    };

    Arc::new(AppState {
        orchestrator,
        environment: Environment::Local,
        jwt_public_keys: Vec::new(),
    })
}

#[tokio::test]
async fn single_provider_query_returns_merged_data() {
    let policy_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "appAuthorized": true,
            "consentRequired": false
        })))
        .mount(&policy_server)
        .await;

    let consent_server = MockServer::start().await;

    let provider_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "person": { "fullName": "Jane Doe" } }
        })))
        .mount(&provider_server)
        .await;

    let app_state = build_app(&policy_server, &consent_server, &provider_server).await;
    let router = server::router(app_state);

    let request = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header("authorization", format!("Bearer {}", app_token()))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "query": "{ personInfo { fullName } }" }).to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-trace-id"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["data"]["personInfo"]["fullName"], "Jane Doe");
}

#[tokio::test]
async fn missing_jwt_is_unauthorized() {
    let policy_server = MockServer::start().await;
    let consent_server = MockServer::start().await;
    let provider_server = MockServer::start().await;

    let app_state = build_app(&policy_server, &consent_server, &provider_server).await;
    let router = server::router(app_state);

    let request = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "query": "{ personInfo { fullName } }" }).to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn policy_denial_skips_provider_call() {
    let policy_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "appAuthorized": false
        })))
        .mount(&policy_server)
        .await;

    let consent_server = MockServer::start().await;

    let provider_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&provider_server)
        .await;

    let app_state = build_app(&policy_server, &consent_server, &provider_server).await;
    let router = server::router(app_state);

    let request = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header("authorization", format!("Bearer {}", app_token()))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "query": "{ personInfo { fullName } }" }).to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["data"], serde_json::Value::Null);
    assert_eq!(value["errors"][0]["extensions"]["code"], "PDP_NOT_ALLOWED");
}
