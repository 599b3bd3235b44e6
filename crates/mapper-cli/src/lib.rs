//! The interpretation of the commands that the CLI can handle.
//!
//! The CLI can do a few things with a declarative mapping configuration: validate it, emit
//! its JSON-Schema, or plan a SQL projection for an ad hoc field selection against it. Keeping
//! the routing here (rather than in `main`) makes it possible to test each command
//! deterministically without going through `std::env`/`clap::Parser`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;

use mapper_core::planner::MappedQuery;
use mapper_core::query::Query;
use mapper_schema::config::{parse_configuration, write_parsed_configuration, MappingConfig};
use mapper_schema::environment::Environment;
use mapper_schema::value::{Path, TypeName};

/// The various contextual bits and bobs we need to run.
pub struct Context<Env: Environment> {
    pub config_path: PathBuf,
    pub environment: Env,
}

/// The command invoked by the user.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Parse the mapping configuration and resolve it against the environment, reporting the
    /// number of object mappings found. Fails with a `MapperError`-flavoured message if the
    /// configuration is malformed or references an unresolvable `$VAR`.
    Check,
    /// Write the mapping configuration's JSON-Schema alongside a fresh copy of the
    /// configuration itself, to `out` (defaults to the input path).
    Schema {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Plan the SQL projection for a dotted-path field selection against a type in the
    /// mapping, and print the resulting `SELECT` fragment and its bind count.
    Plan {
        /// The GraphQL type the selection starts from.
        #[arg(long = "type")]
        type_name: String,
        /// Dotted field paths to select, e.g. `title` or `director.name`. Repeatable.
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
    },
}

/// The set of errors that can go wrong _in addition to_ generic I/O or parsing errors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("mapping has no object mapping for type `{0}`")]
    UnknownType(String),
}

/// Run a command against a loaded configuration context.
#[tracing::instrument(skip(context))]
pub async fn run(command: Command, context: Context<impl Environment>) -> anyhow::Result<()> {
    match command {
        Command::Check => check(&context).await?,
        Command::Schema { out } => schema(&context, out).await?,
        Command::Plan { type_name, fields } => plan(&context, type_name, fields).await?,
    }
    Ok(())
}

#[tracing::instrument(skip(context))]
async fn check(context: &Context<impl Environment>) -> anyhow::Result<()> {
    let config = parse_configuration(&context.config_path).await?;
    let mapping = config.build(&context.environment)?;
    tracing::info!(
        object_mappings = config.object_mappings.len(),
        "mapping configuration resolved",
    );
    println!(
        "{} resolved, {} object mapping(s)",
        context.config_path.display(),
        mapping.object_mapping_count(),
    );
    Ok(())
}

#[tracing::instrument(skip(context))]
async fn schema(context: &Context<impl Environment>, out: Option<PathBuf>) -> anyhow::Result<()> {
    let config = parse_configuration(&context.config_path).await?;
    let out_path = out.unwrap_or_else(|| context.config_path.clone());
    write_parsed_configuration(&config, &out_path).await?;
    eprintln!("wrote {} and {}", out_path.display(), out_path.with_extension("schema.json").display());
    Ok(())
}

#[tracing::instrument(skip(context, fields))]
async fn plan(
    context: &Context<impl Environment>,
    type_name: String,
    fields: Vec<String>,
) -> anyhow::Result<()> {
    let config: MappingConfig = parse_configuration(&context.config_path).await?;
    let mapping = Arc::new(config.build(&context.environment)?);
    let type_name = TypeName::from(type_name);
    if mapping.object_mapping_at(&Path::root(), &type_name).is_none() {
        Err(Error::UnknownType(type_name.as_str().to_string()))?;
    }

    let paths: Vec<Path> = fields
        .iter()
        .map(|f| Path(f.split('.').map(Into::into).collect()))
        .collect();
    let query: Query = Query::mk_path_query(&paths);

    let planned = MappedQuery::build(mapping, &query, Path::root(), type_name)?;
    let fragment = planned.fragment()?;
    println!("{}", fragment.sql());
    eprintln!(
        "{} column(s), {} bind(s), {} join(s)",
        planned.columns().len(),
        fragment.binds().len(),
        planned.joins().len(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_schema::environment::FixedEnvironment;
    use std::collections::BTreeMap;
    use mapper_schema::config::{ColumnConfig, FieldMappingConfig, ObjectMappingConfig};

    fn write_movies_config(dir: &tempfile::TempDir) -> PathBuf {
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
                            table: "movies".to_string(),
                            column: "title".to_string(),
                            codec: "String".to_string(),
                        },
                        key: false,
                        discriminator: false,
                    },
                ],
            },
        );
        let config = MappingConfig {
            schema: None,
            version: 1,
            object_mappings,
        };
        let path = dir.path().join("mapping.yaml");
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn check_reports_the_resolved_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let context = Context {
            config_path: write_movies_config(&dir),
            environment: FixedEnvironment::new(),
        };
        check(&context).await.unwrap();
    }

    #[tokio::test]
    async fn plan_rejects_an_unmapped_type() {
        let dir = tempfile::tempdir().unwrap();
        let context = Context {
            config_path: write_movies_config(&dir),
            environment: FixedEnvironment::new(),
        };
        let err = plan(&context, "Nonexistent".to_string(), vec!["title".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Nonexistent"));
    }

    #[tokio::test]
    async fn plan_builds_a_select_fragment_for_a_known_type() {
        let dir = tempfile::tempdir().unwrap();
        let context = Context {
            config_path: write_movies_config(&dir),
            environment: FixedEnvironment::new(),
        };
        plan(&context, "Movie".to_string(), vec!["title".to_string()])
            .await
            .unwrap();
    }
}
