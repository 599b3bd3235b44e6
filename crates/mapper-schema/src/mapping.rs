//! Declarative mapping metadata: which GraphQL type/field maps to which table, column, join,
//! or codec, plus cursor-computed fields and the lookup API §4.C specifies.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::CodecRef;
use crate::columns::{ColumnRef, Join};
use crate::error::{MapperError, MappingLookupError};
use crate::value::{Cell, FieldName, Path, TypeName};

/// One field of an `ObjectMapping`.
#[derive(Clone)]
pub enum FieldMapping {
    /// A simple scalar/leaf column, optionally a key and/or interface discriminator.
    SqlField {
        name: FieldName,
        column: ColumnRef,
        key: bool,
        discriminator: bool,
    },
    /// A nested object reached via zero or more joins.
    SqlObject {
        name: FieldName,
        joins: Vec<Join>,
        /// The GraphQL type on the far side of the joins — needed so the planner can keep
        /// recursing into the nested selection without a separate schema lookup.
        target_type: TypeName,
    },
    /// A hidden column used for joins/filters but never surfaced as a GraphQL field.
    SqlAttribute {
        name: FieldName,
        column: ColumnRef,
        key: bool,
        nullable: bool,
        discriminator: bool,
    },
    /// An embedded JSON subtree, decoded by the column's own codec.
    SqlJson { name: FieldName, column: ColumnRef },
    /// A field computed after the row is fetched, from one or more sibling fields.
    CursorField {
        name: FieldName,
        compute: CursorFn,
        required_siblings: Vec<FieldName>,
        hidden: bool,
    },
    /// Like `CursorField` but never surfaced as a GraphQL field, only usable internally.
    CursorAttribute {
        name: FieldName,
        compute: CursorFn,
        required_siblings: Vec<FieldName>,
    },
}

/// A post-fetch derivation closure: given the already-decoded values of its declared
/// required siblings (in declaration order), produce the computed cell. Not serializable —
/// supplied by host code at `Mapping::build` time, per §4.C's note on the on-disk form.
pub type CursorFn = Arc<dyn Fn(&[Cell]) -> Result<Cell, MapperError> + Send + Sync>;

impl std::fmt::Debug for FieldMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldMapping::SqlField { name, column, key, discriminator } => f
                .debug_struct("SqlField")
                .field("name", name)
                .field("column", column)
                .field("key", key)
                .field("discriminator", discriminator)
                .finish(),
            FieldMapping::SqlObject { name, joins, target_type } => f
                .debug_struct("SqlObject")
                .field("name", name)
                .field("joins", joins)
                .field("target_type", target_type)
                .finish(),
            FieldMapping::SqlAttribute { name, column, key, nullable, discriminator } => f
                .debug_struct("SqlAttribute")
                .field("name", name)
                .field("column", column)
                .field("key", key)
                .field("nullable", nullable)
                .field("discriminator", discriminator)
                .finish(),
            FieldMapping::SqlJson { name, column } => f
                .debug_struct("SqlJson")
                .field("name", name)
                .field("column", column)
                .finish(),
            FieldMapping::CursorField { name, required_siblings, hidden, .. } => f
                .debug_struct("CursorField")
                .field("name", name)
                .field("required_siblings", required_siblings)
                .field("hidden", hidden)
                .finish(),
            FieldMapping::CursorAttribute { name, required_siblings, .. } => f
                .debug_struct("CursorAttribute")
                .field("name", name)
                .field("required_siblings", required_siblings)
                .finish(),
        }
    }
}

impl FieldMapping {
    pub fn name(&self) -> &FieldName {
        match self {
            FieldMapping::SqlField { name, .. }
            | FieldMapping::SqlObject { name, .. }
            | FieldMapping::SqlAttribute { name, .. }
            | FieldMapping::SqlJson { name, .. }
            | FieldMapping::CursorField { name, .. }
            | FieldMapping::CursorAttribute { name, .. } => name,
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(
            self,
            FieldMapping::SqlField { key: true, .. } | FieldMapping::SqlAttribute { key: true, .. }
        )
    }

    pub fn is_discriminator(&self) -> bool {
        matches!(
            self,
            FieldMapping::SqlField { discriminator: true, .. }
                | FieldMapping::SqlAttribute { discriminator: true, .. }
        )
    }

    /// Hidden fields (attributes, and `CursorField`s explicitly marked hidden) are never
    /// exposed to the GraphQL selection set but still participate in planning.
    pub fn is_hidden(&self) -> bool {
        matches!(
            self,
            FieldMapping::SqlAttribute { .. }
                | FieldMapping::CursorAttribute { .. }
                | FieldMapping::CursorField { hidden: true, .. }
        )
    }

    pub fn column(&self) -> Option<&ColumnRef> {
        match self {
            FieldMapping::SqlField { column, .. }
            | FieldMapping::SqlAttribute { column, .. }
            | FieldMapping::SqlJson { column, .. } => Some(column),
            _ => None,
        }
    }

    pub fn joins(&self) -> &[Join] {
        match self {
            FieldMapping::SqlObject { joins, .. } => joins,
            _ => &[],
        }
    }

    pub fn target_type(&self) -> Option<&TypeName> {
        match self {
            FieldMapping::SqlObject { target_type, .. } => Some(target_type),
            _ => None,
        }
    }

    pub fn required_siblings(&self) -> &[FieldName] {
        match self {
            FieldMapping::CursorField { required_siblings, .. }
            | FieldMapping::CursorAttribute { required_siblings, .. } => required_siblings,
            _ => &[],
        }
    }
}

/// The discriminator function of an interface mapping: given the row's decoded key/
/// discriminator columns (keyed by field name), return the concrete object type.
pub type DiscriminatorFn = Arc<dyn Fn(&HashMap<FieldName, Cell>) -> Option<TypeName> + Send + Sync>;

/// A mapping for one GraphQL object type.
#[derive(Clone)]
pub struct ObjectMapping {
    pub type_name: TypeName,
    pub fields: Vec<FieldMapping>,
}

impl ObjectMapping {
    pub fn new(type_name: impl Into<TypeName>, fields: Vec<FieldMapping>) -> Self {
        ObjectMapping {
            type_name: type_name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &FieldName) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn key_fields(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().filter(|f| f.is_key())
    }

    pub fn discriminator_fields(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().filter(|f| f.is_discriminator())
    }

    /// `(table, column)` pairs of every key field/attribute mapped directly to a column.
    pub fn key_columns(&self) -> Vec<ColumnRef> {
        self.key_fields().filter_map(FieldMapping::column).cloned().collect()
    }

    pub fn discriminator_columns(&self) -> Vec<ColumnRef> {
        self.discriminator_fields().filter_map(FieldMapping::column).cloned().collect()
    }
}

/// An interface type mapping with a runtime discriminator resolved post-fetch.
#[derive(Clone)]
pub struct InterfaceMapping {
    pub type_name: TypeName,
    pub fields: Vec<FieldMapping>,
    pub discriminator: DiscriminatorFn,
}

impl InterfaceMapping {
    pub fn field(&self, name: &FieldName) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn key_columns(&self) -> Vec<ColumnRef> {
        self.fields
            .iter()
            .filter(|f| f.is_key())
            .filter_map(FieldMapping::column)
            .cloned()
            .collect()
    }

    pub fn discriminator_columns(&self) -> Vec<ColumnRef> {
        self.fields
            .iter()
            .filter(|f| f.is_discriminator())
            .filter_map(FieldMapping::column)
            .cloned()
            .collect()
    }
}

/// A scalar/enum encoder used by a `LeafMapping`. Unlike `Codec`, this trait works purely in
/// terms of GraphQL literal values (`serde_json::Value`), independent of any SQL column.
pub trait ScalarEncoder: Send + Sync + std::fmt::Debug {
    fn encode(&self, value: &serde_json::Value) -> Result<Cell, MapperError>;
    fn decode(&self, cell: &Cell) -> Result<serde_json::Value, MapperError>;
}

#[derive(Clone)]
pub struct LeafMapping {
    pub type_name: TypeName,
    pub encoder: Arc<dyn ScalarEncoder>,
}

/// A leaf mapping additionally backed by a SQL column (the common case: a scalar column
/// that also needs bind-encoding for use in predicates).
#[derive(Clone)]
pub struct SqlLeafMapping {
    pub type_name: TypeName,
    pub encoder: Arc<dyn ScalarEncoder>,
    pub codec: CodecRef,
}

#[derive(Clone)]
pub enum TypeMapping {
    Object(ObjectMapping),
    Interface(InterfaceMapping),
    Leaf(LeafMapping),
    SqlLeaf(SqlLeafMapping),
}

impl TypeMapping {
    pub fn type_name(&self) -> &TypeName {
        match self {
            TypeMapping::Object(m) => &m.type_name,
            TypeMapping::Interface(m) => &m.type_name,
            TypeMapping::Leaf(m) => &m.type_name,
            TypeMapping::SqlLeaf(m) => &m.type_name,
        }
    }

    pub fn field(&self, name: &FieldName) -> Option<&FieldMapping> {
        match self {
            TypeMapping::Object(m) => m.field(name),
            TypeMapping::Interface(m) => m.field(name),
            TypeMapping::Leaf(_) | TypeMapping::SqlLeaf(_) => None,
        }
    }

    pub fn key_columns(&self) -> Vec<ColumnRef> {
        match self {
            TypeMapping::Object(m) => m.key_columns(),
            TypeMapping::Interface(m) => m.key_columns(),
            TypeMapping::Leaf(_) | TypeMapping::SqlLeaf(_) => Vec::new(),
        }
    }

    pub fn discriminator_columns(&self) -> Vec<ColumnRef> {
        match self {
            TypeMapping::Object(m) => m.discriminator_columns(),
            TypeMapping::Interface(m) => m.discriminator_columns(),
            TypeMapping::Leaf(_) | TypeMapping::SqlLeaf(_) => Vec::new(),
        }
    }
}

/// A path-scoped override: the wrapped mapping applies only beneath `prefix`.
struct PrefixedMapping {
    prefix: Path,
    mapping: TypeMapping,
    /// Declaration order, used to break ties between equally-specific prefixes.
    ordinal: usize,
}

/// The full registry consulted by the planner, staging elaborator, and cursor: per-type
/// mappings plus any number of path-scoped overrides, resolved by longest-prefix-wins with
/// declaration-order tie-break (§4.C).
#[derive(Default)]
pub struct Mapping {
    by_type: HashMap<TypeName, TypeMapping>,
    prefixed: Vec<PrefixedMapping>,
}

impl Mapping {
    pub fn new() -> Self {
        Mapping::default()
    }

    pub fn add(&mut self, mapping: TypeMapping) -> &mut Self {
        self.by_type.insert(mapping.type_name().clone(), mapping);
        self
    }

    pub fn add_prefixed(&mut self, prefix: Path, mapping: TypeMapping) -> &mut Self {
        let ordinal = self.prefixed.len();
        self.prefixed.push(PrefixedMapping {
            prefix,
            mapping,
            ordinal,
        });
        self
    }

    /// Resolve the `TypeMapping` in effect for `type_name` at `path`: the most specific
    /// matching `PrefixedMapping` prefix, falling back to the unprefixed registration.
    /// Ties between equally long prefixes go to whichever was declared first.
    pub fn object_mapping_at(&self, path: &Path, type_name: &TypeName) -> Option<&TypeMapping> {
        let mut best: Option<&PrefixedMapping> = None;
        for candidate in &self.prefixed {
            if candidate.mapping.type_name() != type_name {
                continue;
            }
            if !candidate.prefix.is_prefix_of(path) {
                continue;
            }
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.prefix.0.len() > current.prefix.0.len()
                        || (candidate.prefix.0.len() == current.prefix.0.len()
                            && candidate.ordinal < current.ordinal)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best.map(|p| &p.mapping).or_else(|| self.by_type.get(type_name))
    }

    /// Resolve the `FieldMapping` for `name` on `type_name` at `path`, per §4.C's lookup API.
    pub fn field_mapping_at(
        &self,
        path: &Path,
        type_name: &TypeName,
        name: &FieldName,
    ) -> Result<&FieldMapping, MapperError> {
        let type_mapping = self.object_mapping_at(path, type_name).ok_or_else(|| {
            MapperError::mapping(
                path.clone(),
                MappingLookupError::UnmappedType(type_name.clone()).to_string(),
            )
        })?;
        type_mapping.field(name).ok_or_else(|| {
            MapperError::mapping(
                path.clone(),
                MappingLookupError::UnmappedField {
                    type_name: type_name.clone(),
                    field: name.to_string(),
                }
                .to_string(),
            )
        })
    }

    pub fn object_mapping(&self, type_name: &TypeName) -> Option<&TypeMapping> {
        self.by_type.get(type_name)
    }

    /// The number of unprefixed type mappings registered (excludes path-scoped overrides).
    pub fn object_mapping_count(&self) -> usize {
        self.by_type.len()
    }

    /// Resolve the concrete type for an interface-mapped row, given its decoded
    /// discriminator/key columns, via the interface's discriminator closure.
    pub fn discriminate(
        &self,
        path: &Path,
        interface: &TypeName,
        fields: &HashMap<FieldName, Cell>,
    ) -> Result<TypeName, MapperError> {
        match self.by_type.get(interface) {
            Some(TypeMapping::Interface(m)) => (m.discriminator)(fields).ok_or_else(|| {
                MapperError::mapping(
                    path.clone(),
                    MappingLookupError::UndiscriminatedInterface(interface.clone(), path.clone())
                        .to_string(),
                )
            }),
            _ => Err(MapperError::mapping(
                path.clone(),
                MappingLookupError::UnmappedType(interface.clone()).to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::int;

    fn movie_mapping() -> ObjectMapping {
        ObjectMapping::new(
            "Movie",
            vec![
                FieldMapping::SqlField {
                    name: "id".into(),
                    column: ColumnRef::new("movies", "id", int()),
                    key: true,
                    discriminator: false,
                },
                FieldMapping::SqlField {
                    name: "title".into(),
                    column: ColumnRef::new("movies", "title", crate::codec::string()),
                    key: false,
                    discriminator: false,
                },
            ],
        )
    }

    #[test]
    fn key_columns_collects_only_keys() {
        let m = movie_mapping();
        let keys = m.key_columns();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].column.as_str(), "id");
    }

    #[test]
    fn prefixed_mapping_overrides_by_longest_prefix() {
        let mut mapping = Mapping::new();
        mapping.add(TypeMapping::Object(movie_mapping()));

        let mut override_fields = movie_mapping();
        override_fields.fields.push(FieldMapping::SqlAttribute {
            name: "internal_rank".into(),
            column: ColumnRef::new("movies", "rank", int()),
            key: false,
            nullable: true,
            discriminator: false,
        });
        mapping.add_prefixed(
            Path::root().push("admin"),
            TypeMapping::Object(override_fields),
        );

        let at_admin = mapping
            .object_mapping_at(&Path::root().push("admin").push("movie"), &"Movie".into())
            .unwrap();
        assert!(at_admin.field(&"internal_rank".into()).is_some());

        let at_root = mapping
            .object_mapping_at(&Path::root().push("public"), &"Movie".into())
            .unwrap();
        assert!(at_root.field(&"internal_rank".into()).is_none());
    }

    #[test]
    fn unmapped_field_is_a_mapping_error() {
        let mut mapping = Mapping::new();
        mapping.add(TypeMapping::Object(movie_mapping()));
        let err = mapping
            .field_mapping_at(&Path::root(), &"Movie".into(), &"nonexistent".into())
            .unwrap_err();
        assert!(matches!(err, MapperError::Mapping { .. }));
    }
}
