//! A minimal GraphQL type algebra: just enough structure (named / list / non-null) for the
//! planner and cursor to decide nullability, list-ness, and "underlying object type" without
//! pulling in a full schema representation, which is out of this core's scope (§1).

use mapper_schema::value::{FieldName, TypeName};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Named(TypeName),
    List(Box<Type>),
    NonNull(Box<Type>),
}

impl Type {
    pub fn named(name: impl Into<TypeName>) -> Self {
        Type::Named(name.into())
    }

    pub fn list(self) -> Self {
        Type::List(Box::new(self))
    }

    pub fn non_null(self) -> Self {
        Type::NonNull(Box::new(self))
    }

    pub fn is_nullable(&self) -> bool {
        !matches!(self, Type::NonNull(_))
    }

    pub fn is_list(&self) -> bool {
        match self {
            Type::NonNull(inner) => inner.is_list(),
            Type::List(_) => true,
            Type::Named(_) => false,
        }
    }

    /// The type of a single element, if this is (possibly non-null) a list.
    pub fn item_type(&self) -> Option<&Type> {
        match self {
            Type::NonNull(inner) => inner.item_type(),
            Type::List(inner) => Some(inner),
            Type::Named(_) => None,
        }
    }

    /// Strip every `List`/`NonNull` wrapper to reach the named object/interface/leaf type.
    pub fn underlying_object(&self) -> &TypeName {
        match self {
            Type::NonNull(inner) | Type::List(inner) => inner.underlying_object(),
            Type::Named(name) => name,
        }
    }

    pub fn underlying(&self) -> &Type {
        match self {
            Type::NonNull(inner) | Type::List(inner) => inner.underlying(),
            named @ Type::Named(_) => named,
        }
    }
}

/// The one schema fact the Staging Elaborator needs: whether a field is list-valued, so it
/// can tell "nesting two non-leaf lists" apart from an ordinary singular-to-singular step.
/// Supplied by the schema-aware caller rather than modeled here, since loading the whole
/// GraphQL schema is out of this core's scope (§1).
pub trait FieldTypes: Send + Sync {
    fn is_list_field(&self, type_name: &TypeName, field_name: &FieldName) -> bool;
}
