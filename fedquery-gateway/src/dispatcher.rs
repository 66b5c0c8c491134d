//! The provider dispatcher (`spec.md` §4.5).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fedquery_federation::ArgumentBinding;
use fedquery_federation::FieldBinding;
use fedquery_federation::ProviderError as FederationProviderError;
use fedquery_federation::ProviderResponse;
use fedquery_federation::RequestPlan;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::instrument;
use tracing::Instrument;
use url::Url;

use crate::config::ProviderConfig;

/// A node in the merged field tree synthesized from one provider's
/// `providerField` dot-paths. Shared prefixes collapse into one nested
/// field so the provider receives a single selection tree, not one
/// sub-query per leaf (`spec.md` §4.5).
#[derive(Debug, Default)]
struct FieldNode {
    children: BTreeMap<String, FieldNode>,
    arguments: Vec<(String, serde_json::Value)>,
}

impl FieldNode {
    fn insert_path(&mut self, path: &[&str]) {
        let Some((head, rest)) = path.split_first() else {
            return;
        };
        let child = self.children.entry((*head).to_string()).or_default();
        if !rest.is_empty() {
            child.insert_path(rest);
        }
    }

    fn insert_argument(&mut self, path: &[&str], name: &str, value: serde_json::Value) {
        match path.split_first() {
            None => self.arguments.push((name.to_string(), value)),
            Some((head, rest)) => {
                let child = self.children.entry((*head).to_string()).or_default();
                child.insert_argument(rest, name, value);
            }
        }
    }

    fn print(&self, out: &mut String) {
        out.push('{');
        let mut first = true;
        for (name, child) in &self.children {
            if !first {
                out.push(' ');
            }
            first = false;
            out.push_str(name);
            if !child.arguments.is_empty() {
                out.push('(');
                for (idx, (arg_name, value)) in child.arguments.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(arg_name);
                    out.push_str(": ");
                    out.push_str(&print_literal(value));
                }
                out.push(')');
            }
            if !child.children.is_empty() {
                out.push(' ');
                child.print(out);
            }
        }
        out.push('}');
    }
}

fn print_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("{:?}", s),
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(print_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        serde_json::Value::Object(map) => {
            let rendered: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, print_literal(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

/// Builds the GraphQL source for one provider's sub-query from the
/// bindings and argument bindings addressed to it.
fn synthesize_query(fields: &[&FieldBinding], arguments: &[&ArgumentBinding]) -> String {
    let mut root = FieldNode::default();
    for field in fields {
        let path: Vec<&str> = field.provider_field.split('.').collect();
        root.insert_path(&path);
    }
    for argument in arguments {
        let path: Vec<&str> = argument.target_arg_path.split('.').collect();
        root.insert_argument(&path, &argument.target_arg_name, argument.value.clone());
    }
    let mut out = String::from("query ");
    root.print(&mut out);
    out
}

#[derive(Debug, Deserialize)]
struct ProviderEnvelope {
    data: Option<serde_json_bytes::Value>,
    #[serde(default)]
    errors: Vec<ProviderWireError>,
}

#[derive(Debug, Deserialize)]
struct ProviderWireError {
    message: String,
    #[serde(default)]
    extensions: Option<serde_json_bytes::Map<serde_json_bytes::ByteString, serde_json_bytes::Value>>,
}

/// Dispatches a [`RequestPlan`]'s field bindings to their providers
/// concurrently, bounded by `max_concurrent` in-flight calls
/// (`spec.md` §4.5, §5).
pub struct ProviderDispatcher {
    http: reqwest::Client,
    providers: std::collections::HashMap<String, ProviderConfig>,
    semaphore: Arc<Semaphore>,
}

impl ProviderDispatcher {
    pub fn new(
        http: reqwest::Client,
        providers: std::collections::HashMap<String, ProviderConfig>,
        max_concurrent: usize,
    ) -> Self {
        ProviderDispatcher {
            http,
            providers,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Fans the plan's field bindings out to each distinct provider in
    /// parallel and waits for all of them (`spec.md` §4.5 "no
    /// early-return").
    #[instrument(skip(self, plan))]
    pub async fn dispatch(&self, plan: &RequestPlan, trace_id: &str) -> Vec<ProviderResponse> {
        let mut by_provider: BTreeMap<&str, (Vec<&FieldBinding>, Vec<&ArgumentBinding>)> =
            BTreeMap::new();
        for field in &plan.fields {
            by_provider
                .entry(field.provider_key.as_str())
                .or_default()
                .0
                .push(field);
        }
        for argument in &plan.arguments {
            by_provider
                .entry(argument.provider_key.as_str())
                .or_default()
                .1
                .push(argument);
        }

        let calls = by_provider.into_iter().map(|(provider_key, (fields, arguments))| {
            let provider_key = provider_key.to_string();
            let trace_id = trace_id.to_string();
            async move {
                self.call_provider(&provider_key, &fields, &arguments)
                    .instrument(tracing::info_span!("provider_call", provider_key = %provider_key, trace_id = %trace_id))
                    .await
            }
        });

        futures::future::join_all(calls).await
    }

    async fn call_provider(
        &self,
        provider_key: &str,
        fields: &[&FieldBinding],
        arguments: &[&ArgumentBinding],
    ) -> ProviderResponse {
        let Some(config) = self.providers.get(provider_key) else {
            return failed_response(
                provider_key,
                "PROVIDER_ERROR",
                format!("no provider configured for key `{provider_key}`"),
            );
        };

        let _permit = self.semaphore.acquire().await;
        let query = synthesize_query(fields, arguments);

        let result = self.send(&config.url, config.timeout, &query).await;
        match result {
            Ok(envelope) => ProviderResponse {
                provider_key: provider_key.to_string(),
                data: envelope.data,
                errors: envelope
                    .errors
                    .into_iter()
                    .map(|err| FederationProviderError {
                        message: err.message,
                        code: "PROVIDER_ERROR".to_string(),
                        extensions: err.extensions,
                    })
                    .collect(),
            },
            Err(DispatchFailure::Timeout) => {
                failed_response(provider_key, "PROVIDER_TIMEOUT", format!("provider `{provider_key}` timed out"))
            }
            Err(DispatchFailure::Transport(message)) => {
                failed_response(provider_key, "PROVIDER_ERROR", message)
            }
        }
    }

    async fn send(
        &self,
        url: &Url,
        timeout: Duration,
        query: &str,
    ) -> Result<ProviderEnvelope, DispatchFailure> {
        let body = serde_json::json!({ "query": query });
        let response = tokio::time::timeout(timeout, self.http.post(url.clone()).json(&body).send())
            .await
            .map_err(|_| DispatchFailure::Timeout)?
            .map_err(|err| DispatchFailure::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(DispatchFailure::Transport(format!(
                "provider returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| DispatchFailure::Transport(err.to_string()))
    }
}

enum DispatchFailure {
    Timeout,
    Transport(String),
}

fn failed_response(provider_key: &str, code: &str, message: String) -> ProviderResponse {
    ProviderResponse {
        provider_key: provider_key.to_string(),
        data: None,
        errors: vec![FederationProviderError {
            message,
            code: code.to_string(),
            extensions: None,
        }],
    }
}
