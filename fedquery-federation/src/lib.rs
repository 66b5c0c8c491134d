//! Schema registry, query planner, and response accumulator for the
//! federation gateway.
//!
//! This crate owns everything that only needs the unified schema and a
//! request's selection set to do its job: resolving where a field's
//! data comes from, turning a client query into a per-provider fetch
//! plan, and reassembling provider payloads into the shape the client
//! asked for. Policy, consent, provider transport, and audit concerns
//! live one layer up in `fedquery-gateway`, which depends on this
//! crate rather than the other way around.

mod accumulate;
mod error;
mod plan;
mod schema;
mod selection;

pub use accumulate::accumulate;
pub use accumulate::AccumulatedResponse;
pub use accumulate::FederationResponse;
pub use accumulate::GraphQlError;
pub use accumulate::PathSegment;
pub use accumulate::ProviderError;
pub use accumulate::ProviderResponse;
pub use error::Error;
pub use plan::plan;
pub use plan::ArgumentBinding;
pub use plan::RequestPlan;
pub use schema::query_root_type_name;
pub use schema::resolve_field_binding;
pub use schema::resolve_field_shape;
pub use schema::FieldBinding;
pub use schema::SchemaRegistry;
pub use schema::SchemaStatus;
pub use schema::UnifiedSchema;
pub use selection::FieldShape;
