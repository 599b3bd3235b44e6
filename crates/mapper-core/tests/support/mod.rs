//! Shared fixtures for the scenario (S1-S6) and invariant (I1-I8) integration suites: a small
//! "movies" mapping plus a self-referential "people" mapping, built the same way the inline
//! unit tests across the crate build theirs, just shared across files instead of duplicated.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mapper_core::fragment::Fragment;
use mapper_core::gql_type::FieldTypes;
use mapper_core::interpreter::QueryDriver;
use mapper_core::planner::ColumnMeta;
use mapper_core::query::Query;
use mapper_core::row::{Row, Table};
use mapper_schema::codec::{self, Codec, CodecRef};
use mapper_schema::columns::{ColumnRef, Join};
use mapper_schema::error::MapperError;
use mapper_schema::mapping::{CursorFn, FieldMapping, Mapping, ObjectMapping, TypeMapping};
use mapper_schema::value::{Cell, FieldName, Path, TypeName};

/// A `FieldTypes` that never reports a list field, for mappings/queries where list-ness
/// doesn't matter to the scenario under test.
pub struct NeverList;

impl FieldTypes for NeverList {
    fn is_list_field(&self, _type_name: &TypeName, _field_name: &FieldName) -> bool {
        false
    }
}

const GENRES: &[&str] = &["ACTION", "COMEDY", "DRAMA", "HORROR", "SCI_FI"];

/// The `Feature.fromString`-style enum decode the spec's open question resolves: a fallible
/// decoder that rejects anything outside the known genre set, rather than panicking or
/// silently passing unknown strings through.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenreCodec;

impl Codec for GenreCodec {
    fn name(&self) -> &str {
        "Genre"
    }

    fn decode(&self, raw: &serde_json::Value) -> Result<Cell, MapperError> {
        let s = raw.as_str().ok_or_else(|| {
            MapperError::type_error(Path::root(), format!("Genre codec: expected a string, got {raw}"))
        })?;
        if GENRES.contains(&s) {
            Ok(Cell::String(s.to_string()))
        } else {
            Err(MapperError::type_error(Path::root(), format!("Genre codec: unknown genre `{s}`")))
        }
    }

    fn encode(&self, cell: &Cell) -> Result<serde_json::Value, MapperError> {
        match cell.as_str() {
            Some(s) if GENRES.contains(&s) => Ok(serde_json::Value::String(s.to_string())),
            Some(s) => Err(MapperError::type_error(Path::root(), format!("Genre codec: unknown genre `{s}`"))),
            None => Err(MapperError::type_error(Path::root(), format!("Genre codec: cannot encode {cell:?}"))),
        }
    }
}

pub fn genre() -> CodecRef {
    CodecRef::new(GenreCodec)
}

/// `isLong`'s compute closure (S4): a movie is "long" once its duration reaches three hours.
fn is_long_compute() -> CursorFn {
    Arc::new(|values: &[Cell]| {
        let minutes = values[0]
            .as_i64()
            .ok_or_else(|| MapperError::type_error(Path::root(), "isLong: duration is not numeric"))?;
        Ok(Cell::Bool(minutes >= 180))
    })
}

/// `Movie` (table `movies`) with a `director` hop to `Person` (table `people`), a hidden
/// `duration` attribute, and the `isLong` cursor field computed from it.
pub fn movies_mapping() -> Mapping {
    let mut mapping = Mapping::new();
    mapping.add(TypeMapping::Object(ObjectMapping::new(
        "Movie",
        vec![
            FieldMapping::SqlField {
                name: "id".into(),
                column: ColumnRef::new("movies", "id", codec::string()),
                key: true,
                discriminator: false,
            },
            FieldMapping::SqlField {
                name: "title".into(),
                column: ColumnRef::new("movies", "title", codec::string()),
                key: false,
                discriminator: false,
            },
            FieldMapping::SqlField {
                name: "genre".into(),
                column: ColumnRef::new("movies", "genre", genre()),
                key: false,
                discriminator: false,
            },
            FieldMapping::SqlField {
                name: "releasedate".into(),
                column: ColumnRef::new("movies", "releasedate", codec::string()),
                key: false,
                discriminator: false,
            },
            FieldMapping::SqlAttribute {
                name: "duration".into(),
                column: ColumnRef::new("movies", "duration", codec::int()),
                key: false,
                nullable: false,
                discriminator: false,
            },
            FieldMapping::CursorField {
                name: "isLong".into(),
                compute: is_long_compute(),
                required_siblings: vec!["duration".into()],
                hidden: true,
            },
            FieldMapping::SqlObject {
                name: "director".into(),
                joins: vec![Join::new(
                    ColumnRef::new("movies", "director_id", codec::string()),
                    ColumnRef::new("people", "id", codec::string()),
                )],
                target_type: "Person".into(),
            },
        ],
    )));
    mapping.add(TypeMapping::Object(ObjectMapping::new(
        "Person",
        vec![
            FieldMapping::SqlField {
                name: "id".into(),
                column: ColumnRef::new("people", "id", codec::string()),
                key: true,
                discriminator: false,
            },
            FieldMapping::SqlField {
                name: "name".into(),
                column: ColumnRef::new("people", "name", codec::string()),
                key: false,
                discriminator: false,
            },
            FieldMapping::SqlObject {
                name: "manager".into(),
                joins: vec![Join::new(
                    ColumnRef::new("people", "manager_id", codec::string()),
                    ColumnRef::new("people", "id", codec::string()),
                )],
                target_type: "Person".into(),
            },
            FieldMapping::SqlObject {
                name: "reports".into(),
                joins: vec![Join::new(
                    ColumnRef::new("people", "id", codec::string()),
                    ColumnRef::new("people", "manager_id", codec::string()),
                )],
                target_type: "Person".into(),
            },
        ],
    )));
    mapping
}

/// Build a `Row` sized to `mapped`'s column list, placing each `(table, column) -> value` pair
/// at its planned index and leaving the rest `Cell::Null`. Insulates fixtures from having to
/// track the accumulator's column discovery order by hand.
pub fn row_from(mapped: &mapper_core::planner::MappedQuery, cells: &[((&str, &str), Cell)]) -> Row {
    let mut values = vec![Cell::Null; mapped.columns().len()];
    for ((table, column), cell) in cells {
        let col = ColumnRef::new(*table, *column, codec::string());
        if let Some(idx) = mapped.column_index(&col) {
            values[idx] = cell.clone();
        }
    }
    Row(values)
}

/// A canned `QueryDriver` that ignores the fragment entirely and always returns the same
/// rows, with a shared, externally-readable fetch counter (for asserting coalescing collapses
/// several logical queries into a single physical fetch).
pub struct FixtureDriver {
    pub rows: Vec<Row>,
    pub fetch_count: Arc<Mutex<usize>>,
}

impl FixtureDriver {
    pub fn new(rows: Vec<Row>) -> Self {
        FixtureDriver { rows, fetch_count: Arc::new(Mutex::new(0)) }
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }
}

#[async_trait]
impl QueryDriver for FixtureDriver {
    async fn fetch(&self, _fragment: &Fragment, _metas: &[ColumnMeta]) -> Result<Table, MapperError> {
        *self.fetch_count.lock().unwrap() += 1;
        Ok(Table::new(self.rows.clone()))
    }
}

/// A structural description of a `Query` tree deep enough to assert staging shapes on,
/// mirroring the `debug_tree` helper the staging unit tests use internally.
pub fn query_shape(q: &Query) -> String {
    match q {
        Query::Select { name, child, .. } => format!("Select({name},{})", query_shape(child)),
        Query::UntypedSelect { name, child, .. } => format!("UntypedSelect({name},{})", query_shape(child)),
        Query::Group(cs) => format!("Group[{}]", cs.iter().map(query_shape).collect::<Vec<_>>().join(",")),
        Query::GroupList(cs) => format!("GroupList[{}]", cs.iter().map(query_shape).collect::<Vec<_>>().join(",")),
        Query::Unique(c) => format!("Unique({})", query_shape(c)),
        Query::Filter(_, c) => format!("Filter(_,{})", query_shape(c)),
        Query::Narrow(t, c) => format!("Narrow({t},{})", query_shape(c)),
        Query::UntypedNarrow(t, c) => format!("UntypedNarrow({t},{})", query_shape(c)),
        Query::Wrap { name, child } => format!("Wrap({name},{})", query_shape(child)),
        Query::Rename { name, child } => format!("Rename({name},{})", query_shape(child)),
        Query::Limit(n, c) => format!("Limit({n},{})", query_shape(c)),
        Query::Offset(n, c) => format!("Offset({n},{})", query_shape(c)),
        Query::OrderBy(_, c) => format!("OrderBy(_,{})", query_shape(c)),
        Query::GroupBy(ks, c) => format!("GroupBy({},{})", ks.len(), query_shape(c)),
        Query::Count(c) => format!("Count({})", query_shape(c)),
        Query::Introspect(_, c) => format!("Introspect({})", query_shape(c)),
        Query::Environment(_, c) => format!("Environment({})", query_shape(c)),
        Query::Component { child, .. } => format!("Component({})", query_shape(child)),
        Query::Defer { parent_type, .. } => format!("Defer({parent_type})"),
        Query::TransformCursor(_, c) => format!("TransformCursor({})", query_shape(c)),
        Query::Context(_, c) => format!("Context({})", query_shape(c)),
        Query::Skip(b, c) => format!("Skip({b},{})", query_shape(c)),
        Query::Empty => "Empty".to_string(),
    }
}
