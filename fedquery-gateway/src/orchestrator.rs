//! The request orchestrator (`spec.md` §4.8): threads one request
//! through planning, policy, consent, provider fan-out, and
//! accumulation, emitting one audit event per stage.

use std::sync::Arc;

use fedquery_federation::FederationResponse;
use fedquery_federation::SchemaRegistry;
use serde_json_bytes::Value as WireValue;
use tracing::instrument;

use crate::audit::AuditEmitter;
use crate::audit::AuditEvent;
use crate::audit::EventStatus;
use crate::audit::EventType;
use crate::consent;
use crate::consent::ConsentClient;
use crate::dispatcher::ProviderDispatcher;
use crate::error::Error;
use crate::policy::PolicyClient;

/// Everything the orchestrator needs for the lifetime of the process;
/// built once in `main` and shared across requests (`spec.md` §4.0
/// "nothing escapes into process-wide state" — this is the shared
/// *collaborator* set, not per-request state).
pub struct OrchestratorState {
    pub schema_registry: Arc<SchemaRegistry>,
    pub policy: PolicyClient,
    pub consent: ConsentClient,
    pub dispatcher: ProviderDispatcher,
    pub audit: AuditEmitter,
    pub schema_id: String,
}

/// One request's outcome: the GraphQL response envelope plus the trace
/// id it was stamped with.
pub struct OrchestratorResult {
    pub trace_id: String,
    pub data: Option<WireValue>,
    pub errors: Vec<WireValue>,
}

impl OrchestratorState {
    /// Runs the full pipeline for one request (`spec.md` §4.8, steps
    /// 1-9). Aborts at the first policy/consent failure; provider
    /// failures are partial and do not abort accumulation.
    #[instrument(skip(self, query, variables), fields(trace_id = %trace_id))]
    pub async fn handle(
        &self,
        trace_id: String,
        application_id: &str,
        query: &str,
        variables: &serde_json::Value,
    ) -> OrchestratorResult {
        match self.run(&trace_id, application_id, query, variables).await {
            Ok((data, errors)) => {
                self.audit.emit(response_sent_event(&trace_id, EventStatus::Success, &[]));
                OrchestratorResult {
                    trace_id,
                    data: Some(data),
                    errors,
                }
            }
            Err(err) => {
                let code = err.code();
                self.audit.emit(response_sent_event(&trace_id, EventStatus::Failure, &[code]));
                OrchestratorResult {
                    trace_id,
                    data: None,
                    errors: vec![err.to_graphql_error().to_value()],
                }
            }
        }
    }

    async fn run(
        &self,
        trace_id: &str,
        application_id: &str,
        query: &str,
        variables: &serde_json::Value,
    ) -> Result<(WireValue, Vec<WireValue>), Error> {
        let schema = self.schema_registry.load_active()?;

        let plan = fedquery_federation::plan(&schema.parsed, query, variables)?;

        self.audit.emit(AuditEvent {
            trace_id: trace_id.to_string(),
            event_type: EventType::OrchestrationRequestReceived,
            status: EventStatus::Success,
            actor_type: "application".to_string(),
            actor_id: application_id.to_string(),
            target_type: "query".to_string(),
            target_id: trace_id.to_string(),
            timestamp: now(),
            request_metadata: serde_json::json!({ "query": query }),
            response_metadata: serde_json::json!({}),
        });

        // The plan does not retain the client-facing unified field path
        // once it's resolved to a binding, so the required-fields list
        // handed to the policy service is the distinct set of
        // provider-qualified paths the plan would otherwise fetch.
        let required_fields: Vec<String> = plan
            .fields
            .iter()
            .map(|field| format!("{}:{}", field.provider_key, field.provider_field))
            .collect();

        let verdict = self
            .policy
            .evaluate(application_id, &self.schema_id, &required_fields)
            .await;
        self.audit.emit(AuditEvent {
            trace_id: trace_id.to_string(),
            event_type: EventType::PolicyCheck,
            status: if verdict.is_ok() { EventStatus::Success } else { EventStatus::Failure },
            actor_type: "application".to_string(),
            actor_id: application_id.to_string(),
            target_type: "policy".to_string(),
            target_id: self.schema_id.clone(),
            timestamp: now(),
            request_metadata: serde_json::json!({ "requiredFields": required_fields }),
            response_metadata: serde_json::json!({ "ok": verdict.is_ok() }),
        });
        let verdict = verdict?;

        if verdict.consent_required {
            // No owner claim is carried by this engine's JWT contract
            // (`spec.md` §6 only names `applicationId`), so the owner
            // the consent lookup is scoped to comes from an `ownerId`
            // query variable when the caller supplies one, falling back
            // to the application id itself.
            let owner_id = variables
                .get("ownerId")
                .and_then(|v| v.as_str())
                .unwrap_or(application_id)
                .to_string();

            let now_unix = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let decision = self
                .consent
                .find_active(application_id, &owner_id, &verdict.consent_required_fields)
                .await;
            let evaluated = decision
                .and_then(|decision| consent::evaluate_decision(application_id, decision.as_ref(), now_unix));
            self.audit.emit(AuditEvent {
                trace_id: trace_id.to_string(),
                event_type: EventType::ConsentCheck,
                status: if evaluated.is_ok() { EventStatus::Success } else { EventStatus::Failure },
                actor_type: "application".to_string(),
                actor_id: application_id.to_string(),
                target_type: "owner".to_string(),
                target_id: owner_id,
                timestamp: now(),
                request_metadata: serde_json::json!({ "fields": verdict.consent_required_fields }),
                response_metadata: serde_json::json!({ "ok": evaluated.is_ok() }),
            });
            evaluated?;
        }

        let provider_responses = self.dispatcher.dispatch(&plan, trace_id).await;
        let mut federation_response = FederationResponse::default();
        for response in provider_responses {
            self.audit.emit(AuditEvent {
                trace_id: trace_id.to_string(),
                event_type: EventType::ProviderFetch,
                status: if response.errors.is_empty() { EventStatus::Success } else { EventStatus::Failure },
                actor_type: "application".to_string(),
                actor_id: application_id.to_string(),
                target_type: "provider".to_string(),
                target_id: response.provider_key.clone(),
                timestamp: now(),
                request_metadata: serde_json::json!({}),
                response_metadata: serde_json::json!({ "hasErrors": !response.errors.is_empty() }),
            });
            federation_response.insert(response);
        }

        let accumulated = fedquery_federation::accumulate(&schema.parsed, &plan.selection_root, &federation_response)?;
        let errors = accumulated.errors.iter().map(|error| error.to_value()).collect();
        Ok((accumulated.data, errors))
    }
}

fn response_sent_event(trace_id: &str, status: EventStatus, error_codes: &[&str]) -> AuditEvent {
    AuditEvent {
        trace_id: trace_id.to_string(),
        event_type: EventType::OrchestrationResponseSent,
        status,
        actor_type: "system".to_string(),
        actor_id: "orchestrator".to_string(),
        target_type: "response".to_string(),
        target_id: trace_id.to_string(),
        timestamp: now(),
        request_metadata: serde_json::json!({}),
        response_metadata: serde_json::json!({ "errorCodes": error_codes }),
    }
}

fn now() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
