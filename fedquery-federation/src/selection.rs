//! A schema-type walker shared by the query planner and the response
//! accumulator.
//!
//! Both the planner (deciding how far to descend into a selection set)
//! and the accumulator (deciding whether a provider value at some
//! position should be treated as a list, an object, or a scalar) need to
//! dispatch on the *declared* shape of a schema position, never on the
//! shape of a runtime value. This module gives both a single tagged
//! variant to match on instead of letting each grow its own ad hoc
//! `is_list`/`is_object` checks.

use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type as SchemaType;
use apollo_compiler::Schema;
use apollo_compiler::Node;

/// The declared shape of a field's type, stripped of its name so callers
/// can match on structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldShape {
    /// A leaf scalar or enum value.
    Scalar,
    /// An object or interface type with its own selection set.
    Object,
    /// A list of the given element shape.
    List(Box<FieldShape>),
    /// A non-null wrapper around the given shape. Nullability does not
    /// change how a value is walked, only whether `null` is a valid leaf
    /// value, so non-null is carried rather than stripped.
    NonNull(Box<FieldShape>),
}

impl FieldShape {
    /// Peels away any `NonNull` wrapper to get at the underlying shape.
    pub fn unwrapped(&self) -> &FieldShape {
        match self {
            FieldShape::NonNull(inner) => inner.unwrapped(),
            other => other,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.unwrapped(), FieldShape::List(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self.unwrapped(), FieldShape::Object)
    }

    /// The element shape of a list; `None` if this shape is not a list.
    pub fn list_element(&self) -> Option<&FieldShape> {
        match self.unwrapped() {
            FieldShape::List(elem) => Some(elem),
            _ => None,
        }
    }
}

/// Resolves the declared [`FieldShape`] of an `apollo_compiler` [`SchemaType`].
pub fn shape_of(schema: &Schema, ty: &SchemaType) -> FieldShape {
    match ty {
        SchemaType::Named(name) => named_type_shape(schema, name.as_str()),
        SchemaType::NonNullNamed(name) => {
            FieldShape::NonNull(Box::new(named_type_shape(schema, name.as_str())))
        }
        SchemaType::List(inner) => FieldShape::List(Box::new(shape_of(schema, inner))),
        SchemaType::NonNullList(inner) => {
            FieldShape::NonNull(Box::new(FieldShape::List(Box::new(shape_of(schema, inner)))))
        }
    }
}

fn named_type_shape(schema: &Schema, name: &str) -> FieldShape {
    match schema.types.get(name) {
        Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
            FieldShape::Object
        }
        // Scalars and enums are leaves; an unknown name is treated as a
        // scalar leaf too — `SchemaRegistry` rejects unresolvable field
        // types before a `FieldShape` is ever built for them.
        _ => FieldShape::Scalar,
    }
}

/// Looks up the object-like type definition (object, interface) fields
/// map for a named type, if it has one.
pub fn object_fields(
    schema: &Schema,
    name: &str,
) -> Option<&indexmap::IndexMap<apollo_compiler::Name, Node<apollo_compiler::schema::FieldDefinition>>> {
    match schema.types.get(name)? {
        ExtendedType::Object(obj) => Some(&obj.fields),
        ExtendedType::Interface(iface) => Some(&iface.fields),
        _ => None,
    }
}
