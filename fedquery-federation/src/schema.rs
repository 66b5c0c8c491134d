//! The unified schema registry (`spec.md` §4.1).
//!
//! Holds the currently active unified schema and exposes free functions
//! that resolve per-field source bindings by walking the *declared*
//! schema, never the shape of a runtime value. The planner and the
//! response accumulator both call these functions directly against
//! whichever [`Schema`] the orchestrator fetched via [`SchemaRegistry::load_active`]
//! at the start of the request, so every stage of one request sees the
//! same immutable snapshot even if an admin activates a new version
//! mid-flight.

use std::sync::Arc;

use apollo_compiler::ast::Directive;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use arc_swap::ArcSwap;
use tracing::instrument;

use crate::error::Error;
use crate::selection::FieldShape;

const SOURCE_INFO_DIRECTIVE: &str = "sourceInfo";
const SOURCE_INFO_PROVIDER_KEY_ARG: &str = "providerKey";
const SOURCE_INFO_PROVIDER_FIELD_ARG: &str = "providerField";

/// Lifecycle status of a [`UnifiedSchema`] version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    Active,
    Inactive,
}

/// A named, versioned unified schema document (`spec.md` §3).
///
/// `UnifiedSchema` values are never mutated in place; a status
/// transition produces a fresh value that replaces the registry's
/// active handle.
#[derive(Debug, Clone)]
pub struct UnifiedSchema {
    pub version: String,
    pub sdl: String,
    pub parsed: Arc<Valid<Schema>>,
    pub status: SchemaStatus,
    pub created_at: String,
    pub created_by: String,
    pub notes: Option<String>,
}

impl UnifiedSchema {
    /// Parses `sdl` and wraps it as a (not yet activated) schema
    /// version.
    pub fn parse(
        version: impl Into<String>,
        sdl: impl Into<String>,
        created_by: impl Into<String>,
        notes: Option<String>,
    ) -> Result<Self, Error> {
        let sdl = sdl.into();
        let parsed = Schema::parse_and_validate(&sdl, "unified_schema.graphql")
            .map_err(|err| Error::SchemaParseError(err.to_string()))?;
        Ok(UnifiedSchema {
            version: version.into(),
            sdl,
            parsed: Arc::new(parsed),
            status: SchemaStatus::Inactive,
            created_at: now_as_unix_seconds(),
            created_by: created_by.into(),
            notes,
        })
    }
}

fn now_as_unix_seconds() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

/// A field's source binding (`spec.md` §3 `FieldBinding`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub provider_key: String,
    pub provider_field: String,
    pub schema_id: Option<String>,
}

/// Holds the active [`UnifiedSchema`] behind a lock-free atomic handle.
///
/// Readers never lock: [`SchemaRegistry::load_active`] is a single
/// atomic pointer load, and the returned `Arc` keeps the snapshot alive
/// even if a concurrent activation swaps in a newer version underneath
/// it.
pub struct SchemaRegistry {
    active: ArcSwap<Option<UnifiedSchema>>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        SchemaRegistry {
            active: ArcSwap::from_pointee(None),
        }
    }

    pub fn new(initial: UnifiedSchema) -> Self {
        let mut initial = initial;
        initial.status = SchemaStatus::Active;
        SchemaRegistry {
            active: ArcSwap::from_pointee(Some(initial)),
        }
    }

    /// Atomically deactivates whatever is currently active (if anything)
    /// and activates `next`. This is the only mutation path; the
    /// invariant in `spec.md` §3 ("at most one schema version has
    /// `status = active`") holds because this is a single pointer swap,
    /// never a read-modify-write on the old value.
    pub fn activate(&self, mut next: UnifiedSchema) {
        next.status = SchemaStatus::Active;
        self.active.store(Arc::new(Some(next)));
    }

    /// `loadActive()` (`spec.md` §4.1). Fails with `SCHEMA_UNAVAILABLE`
    /// if no active schema exists.
    #[instrument(skip(self))]
    pub fn load_active(&self) -> Result<Arc<UnifiedSchema>, Error> {
        let snapshot = self.active.load_full();
        match &*snapshot {
            Some(_) => Ok(Arc::new(
                // Safe: we just matched `Some`; clone the inner value out
                // from behind the outer `Arc<Option<_>>` so callers get a
                // plain `Arc<UnifiedSchema>` to hold onto independent of
                // future swaps.
                snapshot.as_ref().clone().expect("checked Some above"),
            )),
            None => Err(Error::SchemaUnavailable),
        }
    }
}

/// Returns the name of the `Query` root type declared in `schema`.
pub fn query_root_type_name(schema: &Schema) -> Option<&str> {
    schema
        .schema_definition
        .query
        .as_ref()
        .map(|name| name.name.as_str())
}

fn string_argument(directive: &Node<Directive>, name: &str) -> Option<String> {
    directive
        .arguments
        .iter()
        .find(|arg| arg.name.as_str() == name)
        .and_then(|arg| arg.value.as_str())
        .map(|s| s.to_string())
}

/// Walks `schema` from the `Query` root along `selection_path`,
/// returning the [`FieldBinding`] attached to (or inherited by) the
/// final field, or `None` if the field carries no binding at all.
///
/// Resolution algorithm (an implementation choice this crate makes
/// explicit, since `spec.md` pins the *result* — every leaf has an
/// own-or-inherited binding — but not the exact inheritance mechanics):
///
/// - The first field along the path that carries `@sourceInfo`
///   establishes an absolute `(providerKey, providerField)` base.
/// - A descendant field that also carries `@sourceInfo` for the *same*
///   `providerKey` contributes a relative suffix, appended with `.` to
///   the inherited prefix.
/// - A descendant field carrying `@sourceInfo` for a *different*
///   `providerKey` starts a fresh absolute base (the data crosses into a
///   different provider's response at that point).
/// - A descendant field with no directive of its own simply contributes
///   its own schema field name as a path segment onto whatever base is
///   already active — this is the "whole object is sourced from one
///   provider" case from `spec.md` §3.
#[instrument(skip(schema), fields(path = %selection_path.join(".")))]
pub fn resolve_field_binding(
    schema: &Schema,
    selection_path: &[String],
) -> Result<Option<FieldBinding>, Error> {
    let Some(query_type_name) = query_root_type_name(schema) else {
        return Err(Error::SchemaFieldNotFound {
            path: selection_path.join("."),
        });
    };

    let mut current_type_name = query_type_name.to_string();
    let mut base: Option<(String, Vec<String>)> = None;

    for (depth, segment) in selection_path.iter().enumerate() {
        let field_def = field_definition(schema, &current_type_name, segment).ok_or_else(|| {
            Error::SchemaFieldNotFound {
                path: selection_path[..=depth].join("."),
            }
        })?;

        if let Some(directive) = field_def.directives.get(SOURCE_INFO_DIRECTIVE) {
            let provider_key = string_argument(directive, SOURCE_INFO_PROVIDER_KEY_ARG);
            let provider_field = string_argument(directive, SOURCE_INFO_PROVIDER_FIELD_ARG);
            if let (Some(provider_key), Some(provider_field)) = (provider_key, provider_field) {
                base = Some(match base {
                    Some((existing_key, mut prefix)) if existing_key == provider_key => {
                        prefix.push(provider_field);
                        (existing_key, prefix)
                    }
                    _ => (provider_key, vec![provider_field]),
                });
            }
        } else if let Some((_, prefix)) = base.as_mut() {
            prefix.push(segment.clone());
        }

        if let Some(next_type) = descend_into(schema, field_def) {
            current_type_name = next_type;
        }
    }

    Ok(base.map(|(provider_key, prefix)| FieldBinding {
        provider_key,
        provider_field: prefix.join("."),
        schema_id: None,
    }))
}

/// Resolves the declared [`FieldShape`] of the field at the end of
/// `selection_path`, walking from the `Query` root the same way
/// [`resolve_field_binding`] does.
#[instrument(skip(schema), fields(path = %selection_path.join(".")))]
pub fn resolve_field_shape(
    schema: &Schema,
    selection_path: &[String],
) -> Result<FieldShape, Error> {
    let query_type_name = query_root_type_name(schema).ok_or_else(|| Error::SchemaFieldNotFound {
        path: selection_path.join("."),
    })?;

    let mut current_type_name = query_type_name.to_string();
    let mut shape = FieldShape::Object;

    for (depth, segment) in selection_path.iter().enumerate() {
        let field_def = field_definition(schema, &current_type_name, segment).ok_or_else(|| {
            Error::SchemaFieldNotFound {
                path: selection_path[..=depth].join("."),
            }
        })?;
        shape = crate::selection::shape_of(schema, &field_def.ty);
        if let Some(next_type) = descend_into(schema, field_def) {
            current_type_name = next_type;
        }
    }

    Ok(shape)
}

pub(crate) fn field_definition<'a>(
    schema: &'a Schema,
    type_name: &str,
    field_name: &str,
) -> Option<&'a Node<apollo_compiler::schema::FieldDefinition>> {
    crate::selection::object_fields(schema, type_name)?.get(field_name)
}

/// If `field_def`'s declared type (or list-element type) is an object
/// type, returns its name so the walker can descend into it for the
/// next path segment.
pub(crate) fn descend_into(schema: &Schema, field_def: &Node<apollo_compiler::schema::FieldDefinition>) -> Option<String> {
    let shape = crate::selection::shape_of(schema, &field_def.ty);
    let is_object_or_object_list = shape.unwrapped().is_object()
        || shape
            .unwrapped()
            .list_element()
            .is_some_and(|elem| elem.unwrapped().is_object());
    is_object_or_object_list.then(|| field_def.ty.inner_named_type().as_str().to_string())
}

/// Returns `true` if `type_name` resolves to a known type in `schema`.
/// Used by validation paths that need to distinguish "unknown type" (a
/// schema authoring bug) from "known scalar" (a legitimate leaf).
pub fn is_known_type(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(
            ExtendedType::Object(_)
                | ExtendedType::Interface(_)
                | ExtendedType::Union(_)
                | ExtendedType::Scalar(_)
                | ExtendedType::Enum(_)
        )
    )
}
