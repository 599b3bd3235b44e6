//! The Staging Elaborator (§4.F): rewrites a `Query` tree so that no single SQL statement
//! needs to join through a cycle, or nest two non-leaf lists (a shape most SQL engines can't
//! express as one flat join set without row-count blowup). Offending subtrees are cut out and
//! replaced with a `Defer`, to be re-issued as their own top-level query at fetch time.

use std::collections::HashSet;
use std::sync::Arc;

use mapper_schema::error::MapperError;
use mapper_schema::mapping::{FieldMapping, Mapping};
use mapper_schema::value::{Cell, FieldName, Path, TypeName};

use crate::gql_type::FieldTypes;
use crate::predicate::{Predicate, Term};
use crate::query::{Query, StagingJoin, STAGED_FIELD_NAME};

/// The set of object types already visited on the current root-to-here walk, plus whether a
/// list has already been entered — `Seen[T]` in §4.F's notation.
#[derive(Clone)]
struct SeenState {
    types: HashSet<TypeName>,
    in_list: bool,
}

impl SeenState {
    fn fresh() -> Self {
        SeenState { types: HashSet::new(), in_list: false }
    }

    fn enter(&self, t: TypeName, is_list: bool) -> Self {
        let mut types = self.types.clone();
        types.insert(t);
        SeenState { types, in_list: self.in_list || is_list }
    }
}

/// Elaborate `query`, rooted at `root_type`, against `mapping`. `field_types` supplies the
/// one schema fact (list-ness) this pass needs but can't derive from the mapping alone.
pub fn elaborate(
    query: &Query,
    mapping: &Mapping,
    field_types: &dyn FieldTypes,
    root_type: TypeName,
) -> Result<Query, MapperError> {
    let seen = SeenState::fresh();
    elaborate_rec(query, &Path::root(), &root_type, &seen, mapping, field_types)
}

fn elaborate_rec(
    query: &Query,
    path: &Path,
    type_name: &TypeName,
    seen: &SeenState,
    mapping: &Mapping,
    field_types: &dyn FieldTypes,
) -> Result<Query, MapperError> {
    match query {
        Query::Select { name, alias, child } => {
            elaborate_select(name, alias.clone(), child, path, type_name, seen, mapping, field_types)
        }
        Query::UntypedSelect { name, alias, directives, child } => {
            let elaborated =
                elaborate_select(name, alias.clone(), child, path, type_name, seen, mapping, field_types)?;
            // `elaborate_select` always produces a typed `Select`; restore the directives it
            // had no way to carry through.
            Ok(match elaborated {
                Query::Select { name, alias, child } => {
                    Query::UntypedSelect { name, alias, directives: directives.clone(), child }
                }
                other => other,
            })
        }
        Query::Group(cs) => Ok(Query::Group(
            cs.iter()
                .map(|c| elaborate_rec(c, path, type_name, seen, mapping, field_types))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Query::GroupList(cs) => Ok(Query::GroupList(
            cs.iter()
                .map(|c| elaborate_rec(c, path, type_name, seen, mapping, field_types))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Query::Unique(c) => Ok(Query::Unique(Box::new(elaborate_rec(
            c, path, type_name, seen, mapping, field_types,
        )?))),
        Query::Filter(pred, c) => Ok(Query::Filter(
            pred.clone(),
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::Narrow(t, c) => {
            let narrowed_seen = seen.enter(t.clone(), false);
            Ok(Query::Narrow(
                t.clone(),
                Box::new(elaborate_rec(c, path, t, &narrowed_seen, mapping, field_types)?),
            ))
        }
        Query::UntypedNarrow(t, c) => Ok(Query::UntypedNarrow(
            t.clone(),
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::Wrap { name, child } => Ok(Query::Wrap {
            name: name.clone(),
            child: Box::new(elaborate_rec(child, path, type_name, seen, mapping, field_types)?),
        }),
        Query::Rename { name, child } => Ok(Query::Rename {
            name: name.clone(),
            child: Box::new(elaborate_rec(child, path, type_name, seen, mapping, field_types)?),
        }),
        Query::Limit(n, c) => Ok(Query::Limit(
            *n,
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::Offset(n, c) => Ok(Query::Offset(
            *n,
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::OrderBy(sels, c) => Ok(Query::OrderBy(
            sels.clone(),
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::GroupBy(keys, c) => Ok(Query::GroupBy(
            keys.clone(),
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::Count(c) => Ok(Query::Count(Box::new(elaborate_rec(
            c, path, type_name, seen, mapping, field_types,
        )?))),
        Query::Environment(env, c) => Ok(Query::Environment(
            env.clone(),
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::TransformCursor(f, c) => Ok(Query::TransformCursor(
            f.clone(),
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        Query::Context(p, c) => Ok(Query::Context(
            p.clone(),
            Box::new(elaborate_rec(c, p, type_name, seen, mapping, field_types)?),
        )),
        Query::Skip(sense, c) => Ok(Query::Skip(
            *sense,
            Box::new(elaborate_rec(c, path, type_name, seen, mapping, field_types)?),
        )),
        // Already-staged or schema-introspection subtrees are left untouched: a `Defer` was
        // built fully elaborated on the way out, and re-running this pass over it (I7) must
        // reproduce the same tree, which "don't re-enter it" trivially guarantees.
        Query::Empty | Query::Component { .. } | Query::Defer { .. } | Query::Introspect(..) => {
            Ok(query.clone())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn elaborate_select(
    name: &FieldName,
    alias: Option<FieldName>,
    child: &Query,
    path: &Path,
    type_name: &TypeName,
    seen: &SeenState,
    mapping: &Mapping,
    field_types: &dyn FieldTypes,
) -> Result<Query, MapperError> {
    let fm = mapping.field_mapping_at(path, type_name, name)?.clone();
    let child_path = path.push(name.clone());

    let FieldMapping::SqlObject { joins, target_type, .. } = &fm else {
        // Terminal field: nothing to stage, the type context doesn't change.
        let elaborated_child = elaborate_rec(child, &child_path, type_name, seen, mapping, field_types)?;
        return Ok(select_node(name.clone(), alias, elaborated_child));
    };

    let is_list = field_types.is_list_field(type_name, name);
    let would_nest_list = is_list && seen.in_list;
    let cycle = seen.types.contains(target_type);

    if would_nest_list || cycle {
        let fresh_seen = SeenState::fresh().enter(target_type.clone(), is_list);
        let elaborated_child = elaborate_rec(child, &Path::root(), target_type, &fresh_seen, mapping, field_types)?;
        let staging_join = make_staging_join(
            mapping_join_field_names(mapping, path, type_name, joins)?,
            target_type.clone(),
            elaborated_child,
        );
        let deferred = Query::Wrap {
            name: STAGED_FIELD_NAME.into(),
            child: Box::new(Query::Defer {
                staging_join,
                child: Box::new(Query::Empty),
                parent_type: type_name.clone(),
            }),
        };
        Ok(select_node(name.clone(), alias, deferred))
    } else {
        let next_seen = seen.enter(target_type.clone(), is_list);
        let elaborated_child = elaborate_rec(child, &child_path, target_type, &next_seen, mapping, field_types)?;
        Ok(select_node(name.clone(), alias, elaborated_child))
    }
}

/// `elaborate_rec`'s `UntypedSelect` arm patches directives back in after this returns; a
/// plain `Select` is all `elaborate_select` itself needs to produce.
fn select_node(name: FieldName, alias: Option<FieldName>, child: Query) -> Query {
    Query::Select { name, alias, child: Box::new(child) }
}

/// For each join, the field name on the parent side and on the child side that back its
/// columns — what `make_staging_join`'s closure actually needs, since it only has field
/// values (not raw columns) to work with at invocation time.
fn mapping_join_field_names(
    mapping: &Mapping,
    parent_path: &Path,
    parent_type: &TypeName,
    joins: &[mapper_schema::columns::Join],
) -> Result<Vec<(FieldName, FieldName)>, MapperError> {
    let parent_tm = mapping.object_mapping_at(parent_path, parent_type).ok_or_else(|| {
        MapperError::mapping(parent_path.clone(), format!("no object mapping for type {parent_type}"))
    })?;
    let parent_fields: &[FieldMapping] = match parent_tm {
        mapper_schema::mapping::TypeMapping::Object(om) => &om.fields,
        mapper_schema::mapping::TypeMapping::Interface(im) => &im.fields,
        mapper_schema::mapping::TypeMapping::Leaf(_) | mapper_schema::mapping::TypeMapping::SqlLeaf(_) => &[],
    };
    joins
        .iter()
        .map(|j| {
            let parent_field = parent_fields
                .iter()
                .find(|f| f.column() == Some(j.parent()))
                .map(|f| f.name().clone())
                .ok_or_else(|| {
                    MapperError::mapping(
                        parent_path.clone(),
                        format!("no field on {parent_type} backs join column {}", j.parent()),
                    )
                })?;
            Ok((parent_field, j.child().column.as_str().into()))
        })
        .collect()
}

/// Build the closure a `Defer` node carries: given the parent cursor's path and a way to read
/// its already-resolved field values, produce the absolute sub-query that re-fetches the
/// deferred subtree, filtered down to the rows whose join keys match the parent (§4.F).
///
/// The parent-side value is looked up by field name rather than raw column, since that's all
/// a `Cursor` exposes across the staging boundary; if a required value is missing (an
/// unmatched outer join upstream), the sub-query is given an unsatisfiable predicate so it
/// fetches nothing rather than guessing.
fn make_staging_join(join_fields: Vec<(FieldName, FieldName)>, child_type: TypeName, elaborated_child: Query) -> StagingJoin {
    Arc::new(move |_parent_path: &Path, get_parent_field: &dyn Fn(&FieldName) -> Option<Cell>| {
        let mut predicate: Option<Predicate> = None;
        for (parent_field, child_field) in &join_fields {
            let key_pred = match get_parent_field(parent_field) {
                Some(value) => Predicate::Eql(Term::path(Path::single(child_field.clone())), Term::const_(value)),
                None => Predicate::Eql(Term::const_(0i64), Term::const_(1i64)),
            };
            predicate = Some(match predicate {
                Some(existing) => existing.and(key_pred),
                None => key_pred,
            });
        }
        let narrowed = Query::Narrow(child_type.clone(), Box::new(elaborated_child.clone()));
        let filtered = match predicate {
            Some(p) => Query::Filter(p, Box::new(narrowed)),
            None => narrowed,
        };
        Query::Context(Path::root(), Box::new(filtered))
    })
}
