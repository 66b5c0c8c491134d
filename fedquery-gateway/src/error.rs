//! Gateway-layer errors: everything the planner/registry/accumulator
//! don't already cover — policy, consent, provider transport, and
//! ingress failures (`spec.md` §7).

use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;
use thiserror::Error;

/// Failures raised by the policy client, consent client, provider
/// dispatcher, or request orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Federation(#[from] fedquery_federation::Error),

    #[error("policy service denied application `{application_id}`")]
    PdpNotAllowed { application_id: String },

    #[error("application `{application_id}`'s access grant has expired")]
    PdpAccessExpired { application_id: String },

    #[error("policy service call failed: {0}")]
    PdpError(String),

    #[error("consent not approved for application `{application_id}`")]
    CeNotApproved {
        application_id: String,
        portal_url: Option<String>,
    },

    #[error("consent grant for application `{application_id}` has expired")]
    CeExpired { application_id: String },

    #[error("consent service call failed: {0}")]
    CeError(String),

    #[error("provider `{provider_key}` timed out")]
    ProviderTimeout { provider_key: String },

    #[error("provider `{provider_key}` call failed: {message}")]
    ProviderError {
        provider_key: String,
        message: String,
    },

    #[error("provider `{provider_key}` response is missing field `{field}`")]
    ProviderFieldMissing { provider_key: String, field: String },

    #[error("no JWT assertion was presented")]
    Unauthenticated,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable `extensions.code` string for this failure (`spec.md`
    /// §7 — "codes are stable, do not refactor into numeric enums").
    pub fn code(&self) -> &'static str {
        match self {
            Error::Federation(err) => err.code(),
            Error::PdpNotAllowed { .. } => "PDP_NOT_ALLOWED",
            Error::PdpAccessExpired { .. } => "PDP_ACCESS_EXPIRED",
            Error::PdpError(_) => "PDP_ERROR",
            Error::CeNotApproved { .. } => "CE_NOT_APPROVED",
            Error::CeExpired { .. } => "CE_EXPIRED",
            Error::CeError(_) => "CE_ERROR",
            Error::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            Error::ProviderError { .. } => "PROVIDER_ERROR",
            Error::ProviderFieldMissing { .. } => "PROVIDER_FIELD_MISSING",
            Error::Unauthenticated => "UNAUTHENTICATED",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Renders this failure as a wire `GraphQLError { message, extensions }`
    /// (`spec.md` §6 "Error extensions").
    pub fn to_graphql_error(&self) -> GraphQlError {
        let mut extensions = Map::new();
        extensions.insert("code", Value::String(self.code().into()));
        if let Error::CeNotApproved {
            portal_url: Some(url),
            ..
        } = self
        {
            extensions.insert("portalUrl", Value::String(url.as_str().into()));
        }
        GraphQlError {
            message: self.to_string(),
            extensions,
        }
    }
}

/// The wire shape of a single GraphQL error.
#[derive(Debug, Clone)]
pub struct GraphQlError {
    pub message: String,
    pub extensions: Map<ByteString, Value>,
}

impl GraphQlError {
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("message", Value::String(self.message.as_str().into()));
        obj.insert("extensions", Value::Object(self.extensions.clone()));
        Value::Object(obj)
    }
}
