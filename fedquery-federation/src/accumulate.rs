//! The response accumulator (`spec.md` §4.6).
//!
//! Re-walks the planned selection set against the schema a second time,
//! this time alongside the provider data rather than the plan, and
//! rebuilds the response tree shaped exactly as the caller asked for it
//! — never shaped like the providers' own responses.

use std::collections::HashMap;

use apollo_compiler::ast::Selection;
use apollo_compiler::Schema;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;
use tracing::instrument;

use crate::error::Error;
use crate::schema::descend_into;
use crate::schema::field_definition;
use crate::schema::query_root_type_name;
use crate::schema::resolve_field_shape;
use crate::selection::FieldShape;

const SOURCE_INFO_DIRECTIVE: &str = "sourceInfo";
const SOURCE_INFO_PROVIDER_KEY_ARG: &str = "providerKey";
const SOURCE_INFO_PROVIDER_FIELD_ARG: &str = "providerField";

/// One provider's envelope for a request (`spec.md` §3 `ProviderResponse`).
///
/// `data == None` **and** non-empty `errors` means the provider call
/// failed outright; `data.is_some()` with non-empty `errors` is a
/// partial success.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider_key: String,
    pub data: Option<Value>,
    pub errors: Vec<ProviderError>,
}

#[derive(Debug, Clone)]
pub struct ProviderError {
    pub message: String,
    pub code: String,
    pub extensions: Option<Map<ByteString, Value>>,
}

/// The collected set of provider envelopes for one request (`spec.md`
/// §3 `FederationResponse`). Lookup by `providerKey` is O(1); insertion
/// order carries no meaning.
#[derive(Debug, Clone, Default)]
pub struct FederationResponse {
    responses: HashMap<String, ProviderResponse>,
}

impl FederationResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, response: ProviderResponse) {
        self.responses.insert(response.provider_key.clone(), response);
    }

    pub fn get(&self, provider_key: &str) -> Option<&ProviderResponse> {
        self.responses.get(provider_key)
    }
}

/// One segment of a GraphQL error's `path`.
#[derive(Debug, Clone)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl PathSegment {
    fn to_value(&self) -> Value {
        match self {
            PathSegment::Field(name) => Value::String(name.as_str().into()),
            PathSegment::Index(idx) => Value::Number((*idx).into()),
        }
    }
}

/// A GraphQL error surfaced during accumulation (`spec.md` §7).
#[derive(Debug, Clone)]
pub struct GraphQlError {
    pub message: String,
    pub code: &'static str,
    pub path: Vec<PathSegment>,
    pub extensions: Option<Map<ByteString, Value>>,
}

impl GraphQlError {
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("message", Value::String(self.message.as_str().into()));
        obj.insert(
            "path",
            Value::Array(self.path.iter().map(PathSegment::to_value).collect()),
        );
        let mut extensions = self.extensions.clone().unwrap_or_default();
        extensions.insert("code", Value::String(self.code.into()));
        obj.insert("extensions", Value::Object(extensions));
        Value::Object(obj)
    }
}

/// The result of `accumulate` (`spec.md` §4.6 `{data, errors}`).
#[derive(Debug, Clone)]
pub struct AccumulatedResponse {
    pub data: Value,
    pub errors: Vec<GraphQlError>,
}

/// Where a position in the response tree currently draws its provider
/// data from. Mirrors the base/reset/inherit rule documented on
/// [`crate::schema::resolve_field_binding`], but carried incrementally
/// through a live recursive walk instead of flattened into one
/// dot-joined string — accumulation needs to re-anchor at each array
/// element, which a precomputed absolute path cannot express.
enum Anchor {
    /// No `@sourceInfo` has been seen on this path yet.
    Unbound,
    /// This position is inside an object whose owning provider call had
    /// `data == nil`; every leaf under it is omitted, not nulled.
    ProviderFailed,
    /// Anchored to `provider_key`, resolved to `value` (`None` if the
    /// path didn't resolve against the provider's actual payload).
    Bound {
        provider_key: String,
        value: Option<Value>,
    },
}

/// `accumulate(selectionRoot, federationResponse, schema) -> {data, errors}`
/// (`spec.md` §4.6).
#[instrument(skip_all)]
pub fn accumulate(
    schema: &Schema,
    selection_root: &[Selection],
    federation_response: &FederationResponse,
) -> Result<AccumulatedResponse, Error> {
    let mut errors = Vec::new();
    let mut schema_path = Vec::new();
    let mut error_path = Vec::new();

    let root_type = query_root_type_name(schema)
        .ok_or_else(|| Error::SchemaFieldNotFound {
            path: String::new(),
        })?
        .to_string();

    let data = accumulate_selection(
        schema,
        selection_root,
        &mut schema_path,
        &root_type,
        &Anchor::Unbound,
        federation_response,
        &mut error_path,
        &mut errors,
    )?;

    for response in unique_provider_errors(federation_response) {
        for provider_error in &response.errors {
            errors.push(GraphQlError {
                message: provider_error.message.clone(),
                code: provider_failure_code(provider_error),
                path: Vec::new(),
                extensions: provider_error.extensions.clone(),
            });
        }
    }

    Ok(AccumulatedResponse {
        data: Value::Object(data),
        errors,
    })
}

fn provider_failure_code(error: &ProviderError) -> &'static str {
    // Provider errors already carry their own stable code; the
    // taxonomy's two provider-facing buckets are PROVIDER_TIMEOUT
    // (synthesized by the dispatcher on expiry) and PROVIDER_ERROR
    // (everything else a provider call can fail with).
    if error.code == "PROVIDER_TIMEOUT" {
        "PROVIDER_TIMEOUT"
    } else {
        "PROVIDER_ERROR"
    }
}

fn unique_provider_errors(federation_response: &FederationResponse) -> Vec<&ProviderResponse> {
    let mut responses: Vec<&ProviderResponse> = federation_response.responses.values().collect();
    responses.sort_by(|a, b| a.provider_key.cmp(&b.provider_key));
    responses.into_iter().filter(|r| !r.errors.is_empty()).collect()
}

#[allow(clippy::too_many_arguments)]
fn accumulate_selection(
    schema: &Schema,
    selections: &[Selection],
    schema_path: &mut Vec<String>,
    current_type_name: &str,
    anchor: &Anchor,
    federation_response: &FederationResponse,
    error_path: &mut Vec<PathSegment>,
    errors: &mut Vec<GraphQlError>,
) -> Result<Map<ByteString, Value>, Error> {
    let mut out = Map::new();

    for selection in selections {
        match selection {
            Selection::Field(field) => {
                if field.name.as_str() == "__typename" {
                    out.insert(
                        field.alias.as_ref().map(|a| a.as_str()).unwrap_or("__typename"),
                        Value::String(current_type_name.into()),
                    );
                    continue;
                }

                let output_key = field
                    .alias
                    .as_ref()
                    .map(|a| a.as_str())
                    .unwrap_or(field.name.as_str())
                    .to_string();

                schema_path.push(field.name.as_str().to_string());
                error_path.push(PathSegment::Field(output_key.clone()));

                let field_def = field_definition(schema, current_type_name, field.name.as_str())
                    .ok_or_else(|| Error::SchemaFieldNotFound {
                        path: schema_path.join("."),
                    })?;
                let shape = resolve_field_shape(schema, schema_path)?;
                let next_type_name = descend_into(schema, field_def);

                let field_anchor = advance_anchor(field_def, field.name.as_str(), anchor, federation_response);

                accumulate_field(
                    schema,
                    field,
                    schema_path,
                    next_type_name.as_deref().unwrap_or(current_type_name),
                    &shape,
                    &field_anchor,
                    federation_response,
                    error_path,
                    errors,
                    &output_key,
                    &mut out,
                )?;

                error_path.pop();
                schema_path.pop();
            }
            Selection::FragmentSpread(_) => {}
            Selection::InlineFragment(inline) => {
                let nested = accumulate_selection(
                    schema,
                    &inline.selection_set,
                    schema_path,
                    current_type_name,
                    anchor,
                    federation_response,
                    error_path,
                    errors,
                )?;
                out.extend(nested);
            }
        }
    }

    Ok(out)
}

fn advance_anchor(
    field_def: &apollo_compiler::Node<apollo_compiler::schema::FieldDefinition>,
    field_name: &str,
    anchor: &Anchor,
    federation_response: &FederationResponse,
) -> Anchor {
    let directive = field_def.directives.get(SOURCE_INFO_DIRECTIVE);
    match directive {
        Some(directive) => {
            let provider_key = string_argument(directive, SOURCE_INFO_PROVIDER_KEY_ARG);
            let provider_field = string_argument(directive, SOURCE_INFO_PROVIDER_FIELD_ARG);
            let (Some(provider_key), Some(provider_field)) = (provider_key, provider_field) else {
                return inherit(anchor, field_name);
            };

            if let Anchor::Bound {
                provider_key: existing_key,
                value,
            } = anchor
            {
                if *existing_key == provider_key {
                    let value = value.as_ref().and_then(|v| navigate(v, &provider_field));
                    return Anchor::Bound { provider_key, value };
                }
            }

            match federation_response.get(&provider_key) {
                None => Anchor::ProviderFailed,
                Some(response) => match &response.data {
                    None => Anchor::ProviderFailed,
                    Some(root) => Anchor::Bound {
                        provider_key,
                        value: navigate(root, &provider_field),
                    },
                },
            }
        }
        None => inherit(anchor, field_name),
    }
}

fn inherit(anchor: &Anchor, field_name: &str) -> Anchor {
    match anchor {
        Anchor::Unbound => Anchor::Unbound,
        Anchor::ProviderFailed => Anchor::ProviderFailed,
        Anchor::Bound { provider_key, value } => Anchor::Bound {
            provider_key: provider_key.clone(),
            value: value.as_ref().and_then(|v| navigate(v, field_name)),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn accumulate_field(
    schema: &Schema,
    field: &apollo_compiler::Node<apollo_compiler::ast::Field>,
    schema_path: &mut Vec<String>,
    element_type_name: &str,
    shape: &FieldShape,
    anchor: &Anchor,
    federation_response: &FederationResponse,
    error_path: &mut Vec<PathSegment>,
    errors: &mut Vec<GraphQlError>,
    output_key: &str,
    out: &mut Map<ByteString, Value>,
) -> Result<(), Error> {
    let is_object_list = shape
        .unwrapped()
        .list_element()
        .is_some_and(|elem| elem.unwrapped().is_object());

    if shape.unwrapped().is_object() {
        if let Anchor::Bound { provider_key, value } = anchor {
            match value {
                None => {
                    out.insert(output_key, Value::Null);
                    errors.push(missing_field_error(error_path));
                    return Ok(());
                }
                Some(Value::Object(_)) => {}
                Some(_) => {
                    out.insert(output_key, Value::Null);
                    errors.push(type_mismatch_error(schema_path, provider_key, error_path));
                    return Ok(());
                }
            }
        }

        let nested = accumulate_selection(
            schema,
            &field.selection_set,
            schema_path,
            element_type_name,
            anchor,
            federation_response,
            error_path,
            errors,
        )?;
        out.insert(output_key, Value::Object(nested));
        return Ok(());
    }

    if is_object_list {
        match anchor {
            Anchor::ProviderFailed => {}
            Anchor::Unbound => {
                out.insert(output_key, Value::Null);
            }
            Anchor::Bound { provider_key, value } => match value {
                None => {
                    out.insert(output_key, Value::Null);
                    errors.push(missing_field_error(error_path));
                }
                Some(Value::Array(items)) => {
                    let mut list_out = Vec::with_capacity(items.len());
                    for (idx, item) in items.iter().enumerate() {
                        error_path.push(PathSegment::Index(idx));
                        let element_anchor = Anchor::Bound {
                            provider_key: provider_key.clone(),
                            value: Some(item.clone()),
                        };
                        let element = accumulate_selection(
                            schema,
                            &field.selection_set,
                            schema_path,
                            element_type_name,
                            &element_anchor,
                            federation_response,
                            error_path,
                            errors,
                        )?;
                        list_out.push(Value::Object(element));
                        error_path.pop();
                    }
                    out.insert(output_key, Value::Array(list_out));
                }
                Some(_) => {
                    out.insert(output_key, Value::Null);
                    errors.push(type_mismatch_error(schema_path, provider_key, error_path));
                }
            },
        }
        return Ok(());
    }

    // Scalar or list-of-scalar leaf.
    let is_list = shape.unwrapped().is_list();
    match anchor {
        Anchor::ProviderFailed => {}
        Anchor::Unbound => {
            out.insert(output_key, Value::Null);
        }
        Anchor::Bound { provider_key, value } => match value {
            None => {
                out.insert(output_key, Value::Null);
                errors.push(missing_field_error(error_path));
            }
            Some(v) => {
                let shape_matches = is_list == matches!(v, Value::Array(_));
                if shape_matches {
                    out.insert(output_key, v.clone());
                } else {
                    out.insert(output_key, Value::Null);
                    errors.push(type_mismatch_error(schema_path, provider_key, error_path));
                }
            }
        },
    }

    Ok(())
}

fn missing_field_error(error_path: &[PathSegment]) -> GraphQlError {
    GraphQlError {
        message: "field value was not present in the provider response".to_string(),
        code: "PROVIDER_FIELD_MISSING",
        path: clone_path(error_path),
        extensions: None,
    }
}

fn type_mismatch_error(schema_path: &[String], provider_key: &str, error_path: &[PathSegment]) -> GraphQlError {
    GraphQlError {
        message: format!(
            "provider `{}` returned a value whose shape does not match the schema-declared type for `{}`",
            provider_key,
            schema_path.join(".")
        ),
        code: "ACCUMULATION_TYPE_MISMATCH",
        path: clone_path(error_path),
        extensions: None,
    }
}

fn clone_path(path: &[PathSegment]) -> Vec<PathSegment> {
    path.iter()
        .map(|segment| match segment {
            PathSegment::Field(name) => PathSegment::Field(name.clone()),
            PathSegment::Index(idx) => PathSegment::Index(*idx),
        })
        .collect()
}

fn string_argument(directive: &apollo_compiler::Node<apollo_compiler::ast::Directive>, name: &str) -> Option<String> {
    directive
        .arguments
        .iter()
        .find(|arg| arg.name.as_str() == name)
        .and_then(|arg| arg.value.as_str())
        .map(|s| s.to_string())
}

/// Extracts a value from `value` by walking `dotted_path` segment by
/// segment (`spec.md` §4.6). Whenever the walk reaches an array before
/// the path is exhausted, it fans out: the remaining segments are
/// applied to every element, and the results collect back into an
/// array at that position. This is a defensive generalization beyond
/// what this engine's own accumulation flow exercises (array fan-out
/// here always re-anchors per element instead), kept because it is the
/// literal general rule `spec.md` states for any provider path that
/// crosses an intermediate list.
fn navigate(value: &Value, dotted_path: &str) -> Option<Value> {
    let segments: Vec<&str> = dotted_path.split('.').collect();
    navigate_segments(value, &segments)
}

fn navigate_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    if segments.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(navigate_segments(item, segments)?);
            }
            Some(Value::Array(out))
        }
        Value::Object(map) => {
            let (head, rest) = segments.split_first()?;
            map.get(*head).and_then(|v| navigate_segments(v, rest))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan;
    use crate::schema::UnifiedSchema;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use serde_json_bytes::Value as BytesValue;

    const SDL: &str = r#"
        directive @sourceInfo(providerKey: String!, providerField: String!) on FIELD_DEFINITION

        type Vehicle {
            regNo: String @sourceInfo(providerKey: "dmt", providerField: "regNo")
            make: String @sourceInfo(providerKey: "dmt", providerField: "make")
        }

        type Address {
            city: String @sourceInfo(providerKey: "drp", providerField: "person.address.city")
        }

        type PersonInfo {
            fullName: String @sourceInfo(providerKey: "drp", providerField: "person.fullName")
            name: String @sourceInfo(providerKey: "rgd", providerField: "getPersonInfo.name")
            ownedVehicles: [Vehicle] @sourceInfo(providerKey: "dmt", providerField: "vehicle.getVehicleInfos.data")
            homeAddress: Address @sourceInfo(providerKey: "drp", providerField: "person.address")
        }

        type Query {
            personInfo(nic: String!): PersonInfo
        }
    "#;

    fn schema() -> std::sync::Arc<apollo_compiler::validation::Valid<Schema>> {
        UnifiedSchema::parse("1.0.0", SDL, "test", None).unwrap().parsed
    }

    fn json_bytes(value: serde_json::Value) -> BytesValue {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn single_provider_scalar_merges_cleanly() {
        let schema = schema();
        let plan = plan(&schema, "query { personInfo(nic: \"X\") { fullName } }", &json!({})).unwrap();

        let mut responses = FederationResponse::new();
        responses.insert(ProviderResponse {
            provider_key: "drp".to_string(),
            data: Some(json_bytes(json!({"person": {"fullName": "Jane Silva"}}))),
            errors: vec![],
        });

        let result = accumulate(&schema, &plan.selection_root, &responses).unwrap();
        assert!(result.errors.is_empty());
        assert_eq!(
            result.data.as_object().unwrap().get("personInfo").unwrap().as_object().unwrap().get("fullName").unwrap(),
            &BytesValue::String("Jane Silva".into())
        );
    }

    #[test]
    fn cross_provider_fields_merge_into_one_object() {
        let schema = schema();
        let plan = plan(
            &schema,
            "query { personInfo(nic: \"X\") { fullName name } }",
            &json!({}),
        )
        .unwrap();

        let mut responses = FederationResponse::new();
        responses.insert(ProviderResponse {
            provider_key: "drp".to_string(),
            data: Some(json_bytes(json!({"person": {"fullName": "Jane Silva"}}))),
            errors: vec![],
        });
        responses.insert(ProviderResponse {
            provider_key: "rgd".to_string(),
            data: Some(json_bytes(json!({"getPersonInfo": {"name": "J. Silva"}}))),
            errors: vec![],
        });

        let result = accumulate(&schema, &plan.selection_root, &responses).unwrap();
        let person = result.data.as_object().unwrap().get("personInfo").unwrap().as_object().unwrap();
        assert_eq!(person.get("fullName").unwrap(), &BytesValue::String("Jane Silva".into()));
        assert_eq!(person.get("name").unwrap(), &BytesValue::String("J. Silva".into()));
    }

    #[test]
    fn list_fans_out_per_element() {
        let schema = schema();
        let plan = plan(
            &schema,
            "query { personInfo(nic: \"X\") { ownedVehicles { regNo make } } }",
            &json!({}),
        )
        .unwrap();

        let mut responses = FederationResponse::new();
        responses.insert(ProviderResponse {
            provider_key: "dmt".to_string(),
            data: Some(json_bytes(json!({
                "vehicle": {"getVehicleInfos": {"data": [
                    {"regNo": "AB-1234", "make": "Toyota"},
                    {"regNo": "CD-5678", "make": "Honda"}
                ]}}
            }))),
            errors: vec![],
        });

        let result = accumulate(&schema, &plan.selection_root, &responses).unwrap();
        let vehicles = result
            .data
            .as_object()
            .unwrap()
            .get("personInfo")
            .unwrap()
            .as_object()
            .unwrap()
            .get("ownedVehicles")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(vehicles.len(), 2);
        assert_eq!(
            vehicles[1].as_object().unwrap().get("regNo").unwrap(),
            &BytesValue::String("CD-5678".into())
        );
    }

    #[test]
    fn empty_provider_list_is_empty_array_not_null() {
        let schema = schema();
        let plan = plan(
            &schema,
            "query { personInfo(nic: \"X\") { ownedVehicles { regNo } } }",
            &json!({}),
        )
        .unwrap();

        let mut responses = FederationResponse::new();
        responses.insert(ProviderResponse {
            provider_key: "dmt".to_string(),
            data: Some(json_bytes(json!({"vehicle": {"getVehicleInfos": {"data": []}}}))),
            errors: vec![],
        });

        let result = accumulate(&schema, &plan.selection_root, &responses).unwrap();
        let vehicles = result
            .data
            .as_object()
            .unwrap()
            .get("personInfo")
            .unwrap()
            .as_object()
            .unwrap()
            .get("ownedVehicles")
            .unwrap();
        assert_eq!(vehicles, &BytesValue::Array(vec![]));
        assert!(result.errors.is_empty());
    }

    #[test]
    fn provider_failure_omits_its_leaves_and_surfaces_top_level_error() {
        let schema = schema();
        let plan = plan(
            &schema,
            "query { personInfo(nic: \"X\") { fullName name } }",
            &json!({}),
        )
        .unwrap();

        let mut responses = FederationResponse::new();
        responses.insert(ProviderResponse {
            provider_key: "drp".to_string(),
            data: None,
            errors: vec![ProviderError {
                message: "drp unreachable".to_string(),
                code: "PROVIDER_ERROR".to_string(),
                extensions: None,
            }],
        });
        responses.insert(ProviderResponse {
            provider_key: "rgd".to_string(),
            data: Some(json_bytes(json!({"getPersonInfo": {"name": "J. Silva"}}))),
            errors: vec![],
        });

        let result = accumulate(&schema, &plan.selection_root, &responses).unwrap();
        let person = result.data.as_object().unwrap().get("personInfo").unwrap().as_object().unwrap();
        assert!(!person.contains_key("fullName"));
        assert_eq!(person.get("name").unwrap(), &BytesValue::String("J. Silva".into()));
        assert!(result.errors.iter().any(|e| e.code == "PROVIDER_ERROR"));
    }

    #[test]
    fn nested_object_type_mismatch_is_reported_and_nulled() {
        let schema = schema();
        let plan = plan(
            &schema,
            "query { personInfo(nic: \"X\") { homeAddress { city } } }",
            &json!({}),
        )
        .unwrap();

        let mut responses = FederationResponse::new();
        responses.insert(ProviderResponse {
            provider_key: "drp".to_string(),
            // `person.address` is declared as an object (`Address`) but
            // the provider returned a string in its place.
            data: Some(json_bytes(json!({"person": {"address": "123 Galle Road"}}))),
            errors: vec![],
        });

        let result = accumulate(&schema, &plan.selection_root, &responses).unwrap();
        let person = result.data.as_object().unwrap().get("personInfo").unwrap().as_object().unwrap();
        assert_eq!(person.get("homeAddress").unwrap(), &BytesValue::Null);
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "ACCUMULATION_TYPE_MISMATCH"
                && matches!(e.path.last(), Some(PathSegment::Field(name)) if name == "homeAddress")));
    }

    #[test]
    fn missing_leaf_is_null_with_error_not_whole_response_failure() {
        let schema = schema();
        let plan = plan(
            &schema,
            "query { personInfo(nic: \"X\") { fullName } }",
            &json!({}),
        )
        .unwrap();

        let mut responses = FederationResponse::new();
        responses.insert(ProviderResponse {
            provider_key: "drp".to_string(),
            data: Some(json_bytes(json!({"person": {}}))),
            errors: vec![],
        });

        let result = accumulate(&schema, &plan.selection_root, &responses).unwrap();
        let person = result.data.as_object().unwrap().get("personInfo").unwrap().as_object().unwrap();
        assert_eq!(person.get("fullName").unwrap(), &BytesValue::Null);
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == "PROVIDER_FIELD_MISSING"));
    }
}
