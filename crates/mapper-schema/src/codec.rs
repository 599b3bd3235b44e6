//! Leaf codecs: the boundary between a `Cell` and the typed GraphQL scalar it represents.
//!
//! A codec is attached to a `ColumnRef` or a `CursorField`/`CursorAttribute` mapping and is
//! consulted in exactly two places: decoding a JDBC-ish result row into a `Cell` for the
//! cursor layer, and encoding a GraphQL argument literal into a bound SQL parameter for the
//! fragment builder. Keeping both directions on one trait means a column's representation
//! can never drift between read and write paths.

use std::fmt;
use std::sync::Arc;

use crate::error::MapperError;
use crate::value::Cell;

/// Decodes a raw driver value into a `Cell`, and encodes a `Cell` back for use as a bind
/// parameter. `name` is used only for error messages and `Debug`/tracing output.
pub trait Codec: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Decode a driver-native JSON representation of a single cell.
    ///
    /// Drivers in this crate speak `serde_json::Value` as their lowest common denominator
    /// (see `mapper_core::interpreter::QueryDriver`); a real driver adapter is expected to
    /// convert its native wire format to JSON before handing rows to the cursor layer.
    fn decode(&self, raw: &serde_json::Value) -> Result<Cell, MapperError>;

    /// Encode a cell for use as a bound parameter in a `Fragment`.
    fn encode(&self, cell: &Cell) -> Result<serde_json::Value, MapperError>;
}

/// A cheaply-cloneable handle to a codec, compared by identity (two `CodecRef`s are equal
/// iff they point at the same codec instance). `ColumnRef`'s `PartialEq` intentionally
/// ignores this field — see `columns::ColumnRef`.
#[derive(Clone, Debug)]
pub struct CodecRef(pub Arc<dyn Codec>);

impl CodecRef {
    pub fn new(codec: impl Codec + 'static) -> Self {
        CodecRef(Arc::new(codec))
    }

    pub fn decode(&self, raw: &serde_json::Value) -> Result<Cell, MapperError> {
        self.0.decode(raw)
    }

    pub fn encode(&self, cell: &Cell) -> Result<serde_json::Value, MapperError> {
        self.0.encode(cell)
    }
}

impl PartialEq for CodecRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for CodecRef {}

macro_rules! scalar_codec {
    ($ty:ident, $name:literal, $decode:expr, $encode:expr) => {
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $ty;

        impl Codec for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn decode(&self, raw: &serde_json::Value) -> Result<Cell, MapperError> {
                ($decode)(raw).ok_or_else(|| MapperError::TypeError {
                    path: crate::value::Path::root(),
                    message: format!("{} codec: cannot decode {raw}", $name),
                })
            }

            fn encode(&self, cell: &Cell) -> Result<serde_json::Value, MapperError> {
                ($encode)(cell).ok_or_else(|| MapperError::TypeError {
                    path: crate::value::Path::root(),
                    message: format!("{} codec: cannot encode {cell:?}", $name),
                })
            }
        }
    };
}

scalar_codec!(
    IntCodec,
    "Int",
    |raw: &serde_json::Value| raw.as_i64().map(|v| Cell::I64(v)),
    |cell: &Cell| cell.as_i64().map(serde_json::Value::from)
);

scalar_codec!(
    FloatCodec,
    "Float",
    |raw: &serde_json::Value| raw.as_f64().map(Cell::F64),
    |cell: &Cell| cell.as_f64().map(|f| {
        serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
    })
);

scalar_codec!(
    BooleanCodec,
    "Boolean",
    |raw: &serde_json::Value| raw.as_bool().map(Cell::Bool),
    |cell: &Cell| cell.as_bool().map(serde_json::Value::from)
);

scalar_codec!(
    StringCodec,
    "String",
    |raw: &serde_json::Value| raw.as_str().map(|s| Cell::String(s.to_string())),
    |cell: &Cell| cell.as_str().map(|s| serde_json::Value::String(s.to_string()))
);

/// Decodes/encodes a JSON scalar (GraphQL's own `JSON`/arbitrary-structure leaf types)
/// without further interpretation.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "Json"
    }

    fn decode(&self, raw: &serde_json::Value) -> Result<Cell, MapperError> {
        if raw.is_null() {
            Ok(Cell::Null)
        } else {
            Ok(Cell::Json(raw.clone()))
        }
    }

    fn encode(&self, cell: &Cell) -> Result<serde_json::Value, MapperError> {
        match cell {
            Cell::Null => Ok(serde_json::Value::Null),
            Cell::Json(v) => Ok(v.clone()),
            other => Err(MapperError::TypeError {
                path: crate::value::Path::root(),
                message: format!("Json codec: cannot encode {other:?}"),
            }),
        }
    }
}

/// Null-safe wrapper: decode/encode `Cell::Null` transparently, delegate everything else.
#[derive(Debug, Clone)]
pub struct Nullable<C>(pub C);

impl<C: Codec> Codec for Nullable<C> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn decode(&self, raw: &serde_json::Value) -> Result<Cell, MapperError> {
        if raw.is_null() {
            Ok(Cell::Null)
        } else {
            self.0.decode(raw)
        }
    }

    fn encode(&self, cell: &Cell) -> Result<serde_json::Value, MapperError> {
        if matches!(cell, Cell::Null) {
            Ok(serde_json::Value::Null)
        } else {
            self.0.encode(cell)
        }
    }
}

pub fn int() -> CodecRef {
    CodecRef::new(Nullable(IntCodec))
}
pub fn float() -> CodecRef {
    CodecRef::new(Nullable(FloatCodec))
}
pub fn boolean() -> CodecRef {
    CodecRef::new(Nullable(BooleanCodec))
}
pub fn string() -> CodecRef {
    CodecRef::new(Nullable(StringCodec))
}
pub fn json() -> CodecRef {
    CodecRef::new(JsonCodec)
}
