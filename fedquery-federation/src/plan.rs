//! The query planner (`spec.md` §4.2).
//!
//! Turns a parsed client query plus the active unified schema into a
//! [`RequestPlan`]: a de-duplicated set of [`FieldBinding`]s the
//! provider dispatcher will fetch, an [`ArgumentBinding`] set for each
//! provider's arguments, and the retained selection set the response
//! accumulator will re-walk.

use std::collections::HashSet;

use apollo_compiler::ast::Definition;
use apollo_compiler::ast::Document;
use apollo_compiler::ast::OperationType;
use apollo_compiler::ast::Selection;
use apollo_compiler::ast::Type as AstType;
use apollo_compiler::ast::Value as AstValue;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::schema::resolve_field_binding;
use crate::schema::resolve_field_shape;
use crate::schema::FieldBinding;

const ARG_BINDING_DIRECTIVE: &str = "argBinding";
const ARG_BINDING_PROVIDER_KEY_ARG: &str = "providerKey";
const ARG_BINDING_TARGET_ARG_NAME_ARG: &str = "targetArgName";
const ARG_BINDING_TARGET_ARG_PATH_ARG: &str = "targetArgPath";

/// A non-leaf field's argument bound to one provider (`spec.md` §3
/// `ArgumentBinding`).
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentBinding {
    pub provider_key: String,
    pub target_arg_name: String,
    pub source_arg_path: String,
    pub target_arg_path: String,
    pub value: JsonValue,
}

/// The plan produced once per request (`spec.md` §3 `RequestPlan`).
#[derive(Debug, Clone, Default)]
pub struct RequestPlan {
    /// De-duplicated field bindings, keyed by `(providerKey,
    /// providerField)`; insertion order is preserved so sub-query
    /// synthesis is deterministic across identical requests.
    pub fields: Vec<FieldBinding>,
    pub arguments: Vec<ArgumentBinding>,
    /// The original selection set, retained for the response
    /// accumulator's second walk.
    pub selection_root: Vec<Selection>,
}

impl RequestPlan {
    pub fn is_empty(&self) -> bool {
        self.selection_root.is_empty()
    }

    /// The distinct provider keys referenced by this plan, in first-seen
    /// order.
    pub fn provider_keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for field in &self.fields {
            if seen.insert(field.provider_key.as_str()) {
                keys.push(field.provider_key.as_str());
            }
        }
        keys
    }
}

/// `plan(query, variables, schema) -> RequestPlan | PlanError`
/// (`spec.md` §4.2).
pub fn plan(schema: &Schema, query: &str, variables: &JsonValue) -> Result<RequestPlan, Error> {
    let document = Document::parse(query, "request.graphql")
        .map_err(|err| Error::QueryParseError(err.to_string()))?;

    let operations: Vec<_> = document
        .definitions
        .iter()
        .filter_map(|def| match def {
            Definition::OperationDefinition(op) => Some(op),
            _ => None,
        })
        .collect();

    if operations.is_empty() {
        return Ok(RequestPlan::default());
    }
    if operations.len() > 1 {
        return Err(Error::MultipleOperations);
    }

    let operation = operations[0];
    // "exactly one operation of kind query (not mutation, not
    // subscription)" — this engine has no separate wire code for "wrong
    // operation kind", so a non-query root operation is rejected the
    // same way multiple operations are: both are "this request isn't
    // the single query this engine can plan".
    if operation.operation_type != OperationType::Query {
        return Err(Error::MultipleOperations);
    }

    let declared_vars: HashSet<&str> = operation
        .variables
        .iter()
        .map(|v| v.name.as_str())
        .collect();

    let mut fields: IndexMap<(String, String), FieldBinding> = IndexMap::new();
    let mut arguments = Vec::new();
    let mut path = Vec::new();

    walk_selections(
        schema,
        &operation.selection_set,
        &mut path,
        &declared_vars,
        variables,
        &mut fields,
        &mut arguments,
    )?;

    Ok(RequestPlan {
        fields: fields.into_values().collect(),
        arguments,
        selection_root: operation.selection_set.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
fn walk_selections(
    schema: &Schema,
    selections: &[Selection],
    path: &mut Vec<String>,
    declared_vars: &HashSet<&str>,
    variables: &JsonValue,
    fields: &mut IndexMap<(String, String), FieldBinding>,
    arguments: &mut Vec<ArgumentBinding>,
) -> Result<(), Error> {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                if field.name.as_str() == "__typename" {
                    continue;
                }
                path.push(field.name.as_str().to_string());

                let shape = resolve_field_shape(schema, path)?;
                let is_composite = shape.unwrapped().is_object()
                    || shape
                        .unwrapped()
                        .list_element()
                        .is_some_and(|elem| elem.unwrapped().is_object());
                if is_composite {
                    collect_argument_bindings(
                        schema,
                        path,
                        &field.arguments,
                        declared_vars,
                        variables,
                        arguments,
                    )?;
                    walk_selections(
                        schema,
                        &field.selection_set,
                        path,
                        declared_vars,
                        variables,
                        fields,
                        arguments,
                    )?;
                } else {
                    if let Some(binding) = resolve_field_binding(schema, path)? {
                        fields
                            .entry((binding.provider_key.clone(), binding.provider_field.clone()))
                            .or_insert(binding);
                    }
                }

                path.pop();
            }
            // Fragments are flattened directly into the parent's
            // selection at the same schema path: this engine's unified
            // schema has no overlapping-type stitching (spec.md §1
            // Non-goals), so a fragment's selections always apply to
            // exactly the declared type already being walked.
            Selection::FragmentSpread(_) => {
                // Fragment definitions aren't retained separately from
                // the operation in this engine's planning pass; bulk/
                // fragment-heavy queries are out of scope (spec.md §9
                // Open Questions).
            }
            Selection::InlineFragment(inline) => {
                walk_selections(
                    schema,
                    &inline.selection_set,
                    path,
                    declared_vars,
                    variables,
                    fields,
                    arguments,
                )?;
            }
        }
    }
    Ok(())
}

fn collect_argument_bindings(
    schema: &Schema,
    path: &[String],
    query_arguments: &[apollo_compiler::Node<apollo_compiler::ast::Argument>],
    declared_vars: &HashSet<&str>,
    variables: &JsonValue,
    out: &mut Vec<ArgumentBinding>,
) -> Result<(), Error> {
    if query_arguments.is_empty() {
        return Ok(());
    }

    let Some(field_def) = field_definition_at(schema, path) else {
        return Ok(());
    };

    for query_arg in query_arguments {
        let Some(arg_def) = field_def
            .arguments
            .iter()
            .find(|a| a.name.as_str() == query_arg.name.as_str())
        else {
            continue;
        };

        let value = resolve_value(&query_arg.value, declared_vars, variables, Some(&arg_def.ty))?;
        let source_arg_path = format!("{}-{}", path.join("."), query_arg.name.as_str());

        for directive in arg_def.directives.get_all(ARG_BINDING_DIRECTIVE) {
            let provider_key = string_arg(directive, ARG_BINDING_PROVIDER_KEY_ARG);
            let target_arg_name = string_arg(directive, ARG_BINDING_TARGET_ARG_NAME_ARG);
            let target_arg_path = string_arg(directive, ARG_BINDING_TARGET_ARG_PATH_ARG);
            if let (Some(provider_key), Some(target_arg_name), Some(target_arg_path)) =
                (provider_key, target_arg_name, target_arg_path)
            {
                out.push(ArgumentBinding {
                    provider_key,
                    target_arg_name,
                    source_arg_path: source_arg_path.clone(),
                    target_arg_path,
                    value: value.clone(),
                });
            }
        }
    }
    Ok(())
}

fn field_definition_at<'a>(
    schema: &'a Schema,
    path: &[String],
) -> Option<&'a apollo_compiler::Node<apollo_compiler::schema::FieldDefinition>> {
    let mut current_type_name = crate::schema::query_root_type_name(schema)?.to_string();
    let mut field_def = None;
    for segment in path {
        let def = crate::schema::field_definition(schema, &current_type_name, segment)?;
        if let Some(next_type) = crate::schema::descend_into(schema, def) {
            current_type_name = next_type;
        }
        field_def = Some(def);
    }
    field_def
}

fn string_arg(directive: &apollo_compiler::Node<apollo_compiler::ast::Directive>, name: &str) -> Option<String> {
    directive
        .arguments
        .iter()
        .find(|arg| arg.name.as_str() == name)
        .and_then(|arg| arg.value.as_str())
        .map(|s| s.to_string())
}

/// The declared element type of a list type; `None` for a non-list type.
/// A non-null list's inner type is already the element type, matching
/// `apollo_compiler`'s own shape (mirrored by `selection::shape_of`).
fn list_element_type(ty: &AstType) -> Option<&AstType> {
    match ty {
        AstType::List(inner) | AstType::NonNullList(inner) => Some(inner),
        _ => None,
    }
}

fn named_type_name(ty: &AstType) -> Option<&str> {
    match ty {
        AstType::Named(name) | AstType::NonNullNamed(name) => Some(name.as_str()),
        _ => None,
    }
}

/// Whether `value`'s JSON kind is admissible for the built-in scalar
/// `type_name`. Custom scalars, enums, and input object types have no
/// fixed JSON kind in this engine, so they're left unchecked.
fn scalar_kind_matches(type_name: &str, value: &JsonValue) -> bool {
    match type_name {
        "Int" => value.is_i64() || value.is_u64(),
        "Float" => value.is_number(),
        "String" | "ID" => value.is_string(),
        "Boolean" => value.is_boolean(),
        _ => true,
    }
}

/// Whether `value` is a valid JSON encoding of the declared type `ty`.
/// Validates top-level scalars and direct list elements; a list, object,
/// or null value whose declared shape doesn't match this simple check is
/// left to pass, since no general input-object field-type resolver
/// exists in this engine.
fn json_kind_matches(ty: &AstType, value: &JsonValue) -> bool {
    if value.is_null() {
        return true;
    }
    if let Some(element_type) = list_element_type(ty) {
        return match value {
            JsonValue::Array(items) => items.iter().all(|item| json_kind_matches(element_type, item)),
            _ => false,
        };
    }
    match named_type_name(ty) {
        Some(name) => scalar_kind_matches(name, value),
        None => true,
    }
}

fn resolve_value(
    value: &AstValue,
    declared_vars: &HashSet<&str>,
    variables: &JsonValue,
    expected_type: Option<&AstType>,
) -> Result<JsonValue, Error> {
    match value {
        AstValue::Null => Ok(JsonValue::Null),
        AstValue::Boolean(b) => Ok(JsonValue::Bool(*b)),
        AstValue::Int(i) => Ok(i
            .to_string()
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null)),
        AstValue::Float(f) => Ok(f
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)),
        AstValue::String(s) => Ok(JsonValue::String(s.clone())),
        AstValue::Enum(name) => Ok(JsonValue::String(name.to_string())),
        AstValue::List(items) => {
            let element_type = expected_type.and_then(list_element_type);
            items
                .iter()
                .map(|v| resolve_value(v, declared_vars, variables, element_type))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array)
        }
        AstValue::Object(fields) => {
            let mut map = serde_json::Map::new();
            for (key, val) in fields {
                map.insert(key.to_string(), resolve_value(val, declared_vars, variables, None)?);
            }
            Ok(JsonValue::Object(map))
        }
        AstValue::Variable(name) => {
            if !declared_vars.contains(name.as_str()) {
                return Err(Error::UnboundVariable {
                    name: name.to_string(),
                });
            }
            let resolved = variables
                .get(name.as_str())
                .cloned()
                .unwrap_or(JsonValue::Null);
            if let Some(ty) = expected_type {
                if !json_kind_matches(ty, &resolved) {
                    return Err(Error::UnboundVariable {
                        name: name.to_string(),
                    });
                }
            }
            Ok(resolved)
        }
    }
}
