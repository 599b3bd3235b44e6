//! Foundation crate: value representation, column/join identity, codecs, declarative mapping
//! metadata and its on-disk configuration form, and the error hierarchy shared by the rest of
//! the mapping layer.

pub mod codec;
pub mod columns;
pub mod config;
pub mod environment;
pub mod error;
pub mod mapping;
pub mod value;

pub use error::{MapperError, Result};
