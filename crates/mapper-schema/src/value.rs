//! The shared identifier and value types every other module in the mapping layer builds on.
//!
//! GraphQL type/field names, SQL table/column names, and path segments are all small
//! interned-ish strings; we use `SmolStr` for them so cloning a `Path` while walking the
//! query tree does not allocate in the common case.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

macro_rules! interned_name {
    ($name:ident) => {
        #[derive(
            Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub SmolStr);

        impl $name {
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(SmolStr::new(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(SmolStr::new(s))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

interned_name!(FieldName);
interned_name!(TypeName);
interned_name!(TableName);
interned_name!(ColumnName);

/// A field-path: the stack of field names from some context down to the value in question.
///
/// Stored root-first (unlike a cursor's path, which grows by pushing at the front as we
/// descend); `mkPathQuery` and the planner both want root-first order to share prefixes.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(pub Vec<FieldName>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn single(name: impl Into<FieldName>) -> Self {
        Path(vec![name.into()])
    }

    pub fn push(&self, name: impl Into<FieldName>) -> Self {
        let mut v = self.0.clone();
        v.push(name.into());
        Path(v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` is a prefix of `other` (used by the `PrefixedMapping` resolver).
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.0.len() <= other.0.len() && self.0[..] == other.0[..self.0.len()]
    }
}

/// The tagged cell union the whole row/cursor layer is built from.
///
/// This is the redesign the spec calls for in place of a dynamically-downcast `Any`: leaf
/// encoders pattern-match on a closed set of variants. `Custom` exists only as an escape hatch
/// for a codec that truly needs an opaque payload (e.g. a pre-parsed geometry); the core never
/// matches on it itself.
#[derive(Clone, Debug)]
pub enum Cell {
    Null,
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    /// Sentinel for a cell that came from an unmatched row on the child side of a LEFT JOIN.
    FailedJoin,
    Custom(Arc<dyn std::any::Any + Send + Sync>),
}

impl Cell {
    pub fn is_failed_join(&self) -> bool {
        matches!(self, Cell::FailedJoin)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::I32(v) => Some(i64::from(*v)),
            Cell::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::F64(v) => Some(*v),
            Cell::I32(v) => Some(f64::from(*v)),
            Cell::I64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// A stable string representation used only for deterministic group-key comparison
    /// (§4.G "ordered tie-breaking by stringified key projection"), never for SQL or JSON.
    pub fn stringify_for_grouping(&self) -> String {
        match self {
            Cell::Null => "\u{0}null".to_string(),
            Cell::FailedJoin => "\u{0}failed-join".to_string(),
            Cell::I32(v) => format!("i:{v}"),
            Cell::I64(v) => format!("i:{v}"),
            Cell::F64(v) => format!("f:{v}"),
            Cell::Bool(v) => format!("b:{v}"),
            Cell::String(v) => format!("s:{v}"),
            Cell::Bytes(v) => format!("y:{v:?}"),
            Cell::Json(v) => format!("j:{v}"),
            Cell::Custom(_) => "\u{0}custom".to_string(),
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) | (Cell::FailedJoin, Cell::FailedJoin) => true,
            (Cell::I32(a), Cell::I32(b)) => a == b,
            (Cell::I64(a), Cell::I64(b)) => a == b,
            (Cell::I32(a), Cell::I64(b)) | (Cell::I64(b), Cell::I32(a)) => i64::from(*a) == *b,
            (Cell::F64(a), Cell::F64(b)) => a == b,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            (Cell::String(a), Cell::String(b)) => a == b,
            (Cell::Bytes(a), Cell::Bytes(b)) => a == b,
            (Cell::Json(a), Cell::Json(b)) => a == b,
            (Cell::Custom(a), Cell::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::String(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::String(s)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::I64(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell::I32(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefix() {
        let p = Path::root().push("person").push("manager");
        let q = Path::root().push("person");
        assert!(q.is_prefix_of(&p));
        assert!(!p.is_prefix_of(&q));
    }

    #[test]
    fn cell_equality_ignores_width() {
        assert_eq!(Cell::I32(3), Cell::I64(3));
        assert_ne!(Cell::Null, Cell::FailedJoin);
    }
}
