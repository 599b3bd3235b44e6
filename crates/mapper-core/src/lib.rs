//! Query algebra, planner, and interpreter: turns a `Query`/`Predicate` tree into one or more
//! SQL statements, fetches them through a caller-supplied driver, and exposes the result as a
//! `Cursor` a GraphQL execution layer can walk.

pub mod cursor;
pub mod fragment;
pub mod gql_type;
pub mod interpreter;
pub mod planner;
pub mod predicate;
pub mod query;
pub mod row;
pub mod staging;

pub use cursor::Cursor;
pub use fragment::Fragment;
pub use gql_type::{FieldTypes, Type};
pub use interpreter::{Interpreter, Monitor, NoopMonitor, QueryDriver, RootQuery};
pub use planner::{ColumnMeta, MappedQuery, PlannedPredicate};
pub use predicate::{Predicate, Term};
pub use query::{Query, STAGED_FIELD_NAME};
pub use row::{Row, Table};
