//! The on-disk, declarative form of the mapping metadata: a `MappingConfig` that
//! deserializes from YAML/JSON, round-trips losslessly, and has a generated JSON-Schema
//! counterpart, mirroring the host codebase's `ParsedConfiguration`/`version5` pattern.
//!
//! Only the *static* shape of a mapping is serializable here — table/column names, join
//! endpoints, key/discriminator flags, codec names. `CursorField`/`CursorAttribute` closures
//! and interface discriminator functions are supplied by host code at `Mapping::build` time
//! and have no on-disk representation (§4.C).

use std::collections::BTreeMap;
use std::path::Path as FsPath;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecRef};
use crate::columns::{ColumnRef, Join};
use crate::environment::{resolve, Environment};
use crate::error::{ParseConfigurationError, WriteConfigurationError};
use crate::mapping::{FieldMapping, Mapping, ObjectMapping, TypeMapping};
use crate::value::{ColumnName, TableName};

/// A column reference as it appears on disk: plain strings plus a named codec, with the
/// table/column themselves allowed to be `$VAR` environment references.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ColumnConfig {
    pub table: String,
    pub column: String,
    #[serde(default = "default_codec_name")]
    pub codec: String,
}

fn default_codec_name() -> String {
    "String".to_string()
}

impl ColumnConfig {
    fn resolve(&self, env: &dyn Environment) -> Result<ColumnRef, ParseConfigurationError> {
        let table = resolve(&self.table, env).ok_or_else(|| {
            ParseConfigurationError::ParseError {
                file: FsPath::new("<in-memory>").to_path_buf(),
                error: format!("could not resolve table name `{}`", self.table).into(),
            }
        })?;
        let column = resolve(&self.column, env).ok_or_else(|| {
            ParseConfigurationError::ParseError {
                file: FsPath::new("<in-memory>").to_path_buf(),
                error: format!("could not resolve column name `{}`", self.column).into(),
            }
        })?;
        let codec = codec_by_name(&self.codec).ok_or_else(|| ParseConfigurationError::ParseError {
            file: FsPath::new("<in-memory>").to_path_buf(),
            error: format!("unknown codec `{}`", self.codec).into(),
        })?;
        Ok(ColumnRef::new(
            TableName::from(table),
            ColumnName::from(column),
            codec,
        ))
    }
}

fn codec_by_name(name: &str) -> Option<CodecRef> {
    match name {
        "Int" => Some(codec::int()),
        "Float" => Some(codec::float()),
        "Boolean" => Some(codec::boolean()),
        "String" => Some(codec::string()),
        "Json" => Some(codec::json()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JoinConfig {
    pub parent: ColumnConfig,
    pub child: ColumnConfig,
}

/// The on-disk counterpart of `FieldMapping`. `CursorField`/`CursorAttribute` are
/// intentionally absent: they have no serializable representation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind")]
pub enum FieldMappingConfig {
    SqlField {
        name: String,
        column: ColumnConfig,
        #[serde(default)]
        key: bool,
        #[serde(default)]
        discriminator: bool,
    },
    SqlObject {
        name: String,
        joins: Vec<JoinConfig>,
        target_type: String,
    },
    SqlAttribute {
        name: String,
        column: ColumnConfig,
        #[serde(default)]
        key: bool,
        #[serde(default)]
        nullable: bool,
        #[serde(default)]
        discriminator: bool,
    },
    SqlJson {
        name: String,
        column: ColumnConfig,
    },
}

impl FieldMappingConfig {
    fn resolve(&self, env: &dyn Environment) -> Result<FieldMapping, ParseConfigurationError> {
        Ok(match self {
            FieldMappingConfig::SqlField { name, column, key, discriminator } => {
                FieldMapping::SqlField {
                    name: name.as_str().into(),
                    column: column.resolve(env)?,
                    key: *key,
                    discriminator: *discriminator,
                }
            }
            FieldMappingConfig::SqlObject { name, joins, target_type } => FieldMapping::SqlObject {
                name: name.as_str().into(),
                joins: joins
                    .iter()
                    .map(|j| Ok(Join::new(j.parent.resolve(env)?, j.child.resolve(env)?)))
                    .collect::<Result<Vec<_>, ParseConfigurationError>>()?,
                target_type: target_type.as_str().into(),
            },
            FieldMappingConfig::SqlAttribute { name, column, key, nullable, discriminator } => {
                FieldMapping::SqlAttribute {
                    name: name.as_str().into(),
                    column: column.resolve(env)?,
                    key: *key,
                    nullable: *nullable,
                    discriminator: *discriminator,
                }
            }
            FieldMappingConfig::SqlJson { name, column } => FieldMapping::SqlJson {
                name: name.as_str().into(),
                column: column.resolve(env)?,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObjectMappingConfig {
    pub type_name: String,
    pub fields: Vec<FieldMappingConfig>,
    /// Path, dot-separated, this mapping is scoped under; absent means the unprefixed,
    /// type-wide mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
}

impl ObjectMappingConfig {
    fn resolve(&self, env: &dyn Environment) -> Result<ObjectMapping, ParseConfigurationError> {
        let fields = self
            .fields
            .iter()
            .map(|f| f.resolve(env))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ObjectMapping::new(self.type_name.as_str(), fields))
    }
}

/// The top-level on-disk configuration: a named, versioned list of object mappings, mirroring
/// `ParsedConfiguration`'s `$schema`/`version`/`metadata` shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MappingConfig {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub version: u32,
    pub object_mappings: BTreeMap<String, ObjectMappingConfig>,
}

impl MappingConfig {
    pub fn empty() -> Self {
        MappingConfig {
            schema: None,
            version: 1,
            object_mappings: BTreeMap::new(),
        }
    }

    /// Build a runtime `Mapping` registry from this configuration, resolving every `$VAR`
    /// string against `env` and rejecting the configuration outright if any reference or
    /// codec name cannot be resolved (a malformed configuration is a startup-time failure,
    /// not a per-request one).
    pub fn build(&self, env: &dyn Environment) -> Result<Mapping, ParseConfigurationError> {
        let mut mapping = Mapping::new();
        for config in self.object_mappings.values() {
            if config.path_prefix.is_some() {
                continue;
            }
            mapping.add(TypeMapping::Object(config.resolve(env)?));
        }
        for config in self.object_mappings.values() {
            if let Some(prefix) = &config.path_prefix {
                let path = crate::value::Path(
                    prefix
                        .split('.')
                        .filter(|s| !s.is_empty())
                        .map(crate::value::FieldName::from)
                        .collect(),
                );
                mapping.add_prefixed(path, TypeMapping::Object(config.resolve(env)?));
            }
        }
        Ok(mapping)
    }
}

/// Read and parse a `MappingConfig` from `path` (YAML or JSON, sniffed by extension).
pub async fn parse_configuration(
    path: impl AsRef<FsPath>,
) -> Result<MappingConfig, ParseConfigurationError> {
    let path = path.as_ref();
    let contents =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|error| ParseConfigurationError::IoError {
                file: path.to_path_buf(),
                error,
            })?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&contents).map_err(|error| ParseConfigurationError::ParseError {
            file: path.to_path_buf(),
            error: Box::new(error),
        })
    } else {
        serde_yaml::from_str(&contents).map_err(|error| ParseConfigurationError::ParseError {
            file: path.to_path_buf(),
            error: Box::new(error),
        })
    }
}

/// Write `config` back out as YAML, plus a sibling `<name>.schema.json` JSON-Schema file.
pub async fn write_parsed_configuration(
    config: &MappingConfig,
    path: impl AsRef<FsPath>,
) -> Result<(), WriteConfigurationError> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(config)
        .map_err(|error| WriteConfigurationError::SerializationError(Box::new(error)))?;
    tokio::fs::write(path, yaml)
        .await
        .map_err(|error| WriteConfigurationError::IoError {
            file: path.to_path_buf(),
            error,
        })?;

    let schema = schemars::schema_for!(MappingConfig);
    let schema_json = serde_json::to_string_pretty(&schema)
        .map_err(|error| WriteConfigurationError::SerializationError(Box::new(error)))?;
    let schema_path = path.with_extension("schema.json");
    tokio::fs::write(&schema_path, schema_json)
        .await
        .map_err(|error| WriteConfigurationError::IoError {
            file: schema_path,
            error,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::FixedEnvironment;

    fn sample() -> MappingConfig {
        let mut object_mappings = BTreeMap::new();
        object_mappings.insert(
            "Movie".to_string(),
            ObjectMappingConfig {
                type_name: "Movie".to_string(),
                path_prefix: None,
                fields: vec![
                    FieldMappingConfig::SqlField {
                        name: "id".to_string(),
                        column: ColumnConfig {
                            table: "movies".to_string(),
                            column: "id".to_string(),
                            codec: "Int".to_string(),
                        },
                        key: true,
                        discriminator: false,
                    },
                    FieldMappingConfig::SqlField {
                        name: "title".to_string(),
                        column: ColumnConfig {
                            table: "$MOVIES_TABLE".to_string(),
                            column: "title".to_string(),
                            codec: "String".to_string(),
                        },
                        key: false,
                        discriminator: false,
                    },
                ],
            },
        );
        MappingConfig {
            schema: None,
            version: 1,
            object_mappings,
        }
    }

    #[test]
    fn builds_runtime_mapping_resolving_env_vars() {
        let env = FixedEnvironment::new().with("MOVIES_TABLE", "movies");
        let config = sample();
        let mapping = config.build(&env).unwrap();
        let resolved = mapping
            .object_mapping(&"Movie".into())
            .unwrap()
            .field(&"title".into())
            .unwrap();
        assert_eq!(resolved.column().unwrap().table.as_str(), "movies");
    }

    #[test]
    fn build_fails_fast_on_unresolved_env_var() {
        let env = FixedEnvironment::new();
        let config = sample();
        assert!(config.build(&env).is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = sample();
        let env = FixedEnvironment::new().with("MOVIES_TABLE", "movies");
        let yaml = serde_yaml::to_string(&config).unwrap();
        let reparsed: MappingConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed.version, config.version);
        assert!(reparsed.build(&env).is_ok());
    }
}
