//! The crate-wide error type and the two configuration-loading error enums.
//!
//! `MapperError` spans the five error kinds: mapping errors, type errors, predicate
//! compilation failure, driver errors, and `FailedJoin`-at-a-leaf. Each variant carries
//! enough structured context (a path, a table/column, or the wrapped driver error) to be
//! logged usefully at the point it's raised; callers generally do that with
//! `tracing::error!(error = %err, ...)` rather than matching on variants, except where §7
//! calls for a specific recovery (type errors attach to a cursor path and can be reported
//! per-field rather than aborting the whole response).

use crate::value::{Path, TableName, TypeName};

pub type Result<T> = std::result::Result<T, MapperError>;

#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// No `FieldMapping`/`ObjectMapping` exists for a field or type the query touches, or the
    /// mapping metadata itself is inconsistent (e.g. a join referencing an unmapped table).
    /// Fatal: the mapping is unusable, not just this one request.
    #[error("mapping error at {path}: {message}")]
    Mapping { path: Path, message: String },

    /// A `narrow` to a type the cursor's mapping doesn't represent, a non-leaf field treated
    /// as a leaf, or a leaf field treated as a list. Recoverable: attached to the offending
    /// cursor path so a caller can report a partial response.
    #[error("type error at {path}: {message}")]
    TypeError { path: Path, message: String },

    /// A predicate referencing a path the mapping can't resolve, or whose terms' codecs can't
    /// be unified. Fatal per the resolved design decision: the enclosing query aborts rather
    /// than silently planning without the predicate.
    #[error("predicate at {path} could not be compiled: {message}")]
    PredicateCompilation { path: Path, message: String },

    /// Propagated unchanged from the query driver.
    #[error("driver error: {0}")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A non-nullable scalar's only source row was the sentinel produced by an unmatched
    /// outer join. Always a planning bug, never a data condition a caller can recover from.
    #[error("failed join surfaced at leaf {path} (table {table}): {message}")]
    FailedJoinAtLeaf {
        path: Path,
        table: TableName,
        message: String,
    },
}

impl MapperError {
    pub fn mapping(path: Path, message: impl Into<String>) -> Self {
        MapperError::Mapping {
            path,
            message: message.into(),
        }
    }

    pub fn type_error(path: Path, message: impl Into<String>) -> Self {
        MapperError::TypeError {
            path,
            message: message.into(),
        }
    }

    pub fn predicate_compilation(path: Path, message: impl Into<String>) -> Self {
        MapperError::PredicateCompilation {
            path,
            message: message.into(),
        }
    }

    pub fn driver(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        MapperError::Driver(Box::new(err))
    }

    pub fn failed_join_at_leaf(path: Path, table: TableName, message: impl Into<String>) -> Self {
        MapperError::FailedJoinAtLeaf {
            path,
            table,
            message: message.into(),
        }
    }

    /// The cursor path this error is attached to, if any (driver errors have none).
    pub fn path(&self) -> Option<&Path> {
        match self {
            MapperError::Mapping { path, .. }
            | MapperError::TypeError { path, .. }
            | MapperError::PredicateCompilation { path, .. }
            | MapperError::FailedJoinAtLeaf { path, .. } => Some(path),
            MapperError::Driver(_) => None,
        }
    }
}

/// A single field/type the mapping registry couldn't find, recorded as its own type so
/// callers can build a `MapperError::Mapping` with a consistent message.
#[derive(Debug, thiserror::Error)]
pub enum MappingLookupError {
    #[error("no field mapping for {type_name}.{field}")]
    UnmappedField { type_name: TypeName, field: String },
    #[error("no object mapping for type {0}")]
    UnmappedType(TypeName),
    #[error("no discriminator could be resolved for interface {0} at {1}")]
    UndiscriminatedInterface(TypeName, Path),
}

/// Errors reading a `MappingConfig` from disk, mirroring the host codebase's split between
/// configuration load failures and request-time failures.
#[derive(Debug, thiserror::Error)]
pub enum ParseConfigurationError {
    #[error("could not find configuration in {0}")]
    NotFound(std::path::PathBuf),
    #[error("error parsing configuration at {file}: {error}")]
    ParseError {
        file: std::path::PathBuf,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("io error reading configuration at {file}: {error}")]
    IoError {
        file: std::path::PathBuf,
        #[source]
        error: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WriteConfigurationError {
    #[error("io error writing configuration at {file}: {error}")]
    IoError {
        file: std::path::PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("error serializing configuration: {0}")]
    SerializationError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_error_carries_path() {
        let err = MapperError::mapping(Path::single("title"), "no such column");
        assert_eq!(err.path(), Some(&Path::single("title")));
        assert!(err.to_string().contains("no such column"));
    }

    #[test]
    fn driver_error_has_no_path() {
        let err = MapperError::driver(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.path(), None);
    }
}
