//! The Query algebra: a tagged tree of structural operators describing a GraphQL selection,
//! and the purely structural transformations over it (merge, path construction, ordering).
//! No node here evaluates anything — that's the planner's and cursor's job.

use std::sync::Arc;

use mapper_schema::mapping::Mapping;
use mapper_schema::value::{Cell, FieldName, Path, TypeName};

use crate::predicate::Predicate;

/// The closure a staging `Defer` node carries: given the parent cursor's resolved path and
/// field values, produce the absolute-path sub-query to re-issue (§4.F).
pub type StagingJoin = Arc<dyn Fn(&Path, &dyn Fn(&FieldName) -> Option<Cell>) -> Query + Send + Sync>;

/// The closure a `TransformCursor` node carries: a post-fetch, pre-assembly rewrite of a
/// cursor (used by cursor-computed fields that need to see the whole subtree, not just their
/// declared siblings).
pub type CursorTransform = Arc<dyn Fn(crate::cursor::Cursor) -> Result<crate::cursor::Cursor, mapper_schema::error::MapperError> + Send + Sync>;

/// Sentinel field name used by the staging elaborator: tells the root planner to reuse the
/// stored path and parent type verbatim rather than re-deriving them from the schema (§4.F).
pub const STAGED_FIELD_NAME: &str = "__staged";

#[derive(Clone)]
pub enum Query {
    Select {
        name: FieldName,
        alias: Option<FieldName>,
        child: Box<Query>,
    },
    UntypedSelect {
        name: FieldName,
        alias: Option<FieldName>,
        directives: Vec<String>,
        child: Box<Query>,
    },
    Group(Vec<Query>),
    GroupList(Vec<Query>),
    Unique(Box<Query>),
    Filter(Predicate, Box<Query>),
    Narrow(TypeName, Box<Query>),
    UntypedNarrow(TypeName, Box<Query>),
    Wrap {
        name: FieldName,
        child: Box<Query>,
    },
    Rename {
        name: FieldName,
        child: Box<Query>,
    },
    Limit(usize, Box<Query>),
    Offset(usize, Box<Query>),
    OrderBy(Vec<OrderSelection>, Box<Query>),
    GroupBy(Vec<FieldName>, Box<Query>),
    Count(Box<Query>),
    Introspect(Arc<str>, Box<Query>),
    Environment(Vec<(String, String)>, Box<Query>),
    Component {
        mapping: Arc<Mapping>,
        join: bool,
        child: Box<Query>,
    },
    Defer {
        staging_join: StagingJoin,
        child: Box<Query>,
        parent_type: TypeName,
    },
    TransformCursor(CursorTransform, Box<Query>),
    /// Jump evaluation to an absolute path, used by staged deferred sub-queries.
    Context(Path, Box<Query>),
    /// A conditionally-elided node left over from directive evaluation. Planning-transparent:
    /// contributes nothing (§4.E step 5).
    Skip(bool, Box<Query>),
    Empty,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // A structural, non-exhaustive Debug: enough to assert shapes in tests without every
        // variant's payload needing its own Debug impl (closures don't have one).
        let tag = match self {
            Query::Select { name, .. } => format!("Select({name})"),
            Query::UntypedSelect { name, .. } => format!("UntypedSelect({name})"),
            Query::Group(cs) => format!("Group(#{})", cs.len()),
            Query::GroupList(cs) => format!("GroupList(#{})", cs.len()),
            Query::Unique(_) => "Unique".to_string(),
            Query::Filter(..) => "Filter".to_string(),
            Query::Narrow(t, _) => format!("Narrow({t})"),
            Query::UntypedNarrow(t, _) => format!("UntypedNarrow({t})"),
            Query::Wrap { name, .. } => format!("Wrap({name})"),
            Query::Rename { name, .. } => format!("Rename({name})"),
            Query::Limit(n, _) => format!("Limit({n})"),
            Query::Offset(n, _) => format!("Offset({n})"),
            Query::OrderBy(sels, _) => format!("OrderBy(#{})", sels.len()),
            Query::GroupBy(keys, _) => format!("GroupBy(#{})", keys.len()),
            Query::Count(_) => "Count".to_string(),
            Query::Introspect(..) => "Introspect".to_string(),
            Query::Environment(..) => "Environment".to_string(),
            Query::Component { .. } => "Component".to_string(),
            Query::Defer { parent_type, .. } => format!("Defer(parent={parent_type})"),
            Query::TransformCursor(..) => "TransformCursor".to_string(),
            Query::Context(p, _) => format!("Context({p:?})"),
            Query::Skip(sense, _) => format!("Skip({sense})"),
            Query::Empty => "Empty".to_string(),
        };
        f.write_str(&tag)
    }
}

#[derive(Clone, Debug)]
pub struct OrderSelection {
    pub path: Path,
    pub ascending: bool,
    pub nulls_last: bool,
}

impl Query {
    pub fn select(name: impl Into<FieldName>, child: Query) -> Self {
        Query::Select {
            name: name.into(),
            alias: None,
            child: Box::new(child),
        }
    }

    pub fn group(mut children: Vec<Query>) -> Self {
        // Group of Group is flattened; Empty children are dropped, per §4.A.
        let mut flattened = Vec::with_capacity(children.len());
        for child in children.drain(..) {
            match child {
                Query::Group(inner) => flattened.extend(inner),
                Query::Empty => {}
                other => flattened.push(other),
            }
        }
        if flattened.len() == 1 {
            flattened.into_iter().next().unwrap()
        } else {
            Query::Group(flattened)
        }
    }

    /// Fold sibling selections with the same `(name, alias)` into one, recursively merging
    /// children; `Narrow` siblings on the same target type are coalesced the same way. Stable:
    /// order of first occurrence is preserved.
    pub fn merge_queries(queries: Vec<Query>) -> Vec<Query> {
        let mut merged: Vec<Query> = Vec::new();
        for query in queries {
            if matches!(query, Query::Empty) {
                continue;
            }
            let mut absorbed = false;
            for existing in &mut merged {
                if let Some(combined) = try_merge_one(existing, &query) {
                    *existing = combined;
                    absorbed = true;
                    break;
                }
            }
            if !absorbed {
                merged.push(query);
            }
        }
        merged
    }

    /// Build the minimal `Select` tree covering every path in `paths`, sharing common
    /// prefixes (`mkPathQuery`). The innermost leaf of each path is given `Query::Empty` as
    /// its child; callers that need a different leaf shape substitute it via `subst_child`.
    pub fn mk_path_query(paths: &[Path]) -> Query {
        fn build(paths: &[&[FieldName]]) -> Query {
            let mut by_head: Vec<(FieldName, Vec<Vec<FieldName>>)> = Vec::new();
            for path in paths {
                if path.is_empty() {
                    continue;
                }
                let head = path[0].clone();
                let tail = path[1..].to_vec();
                if let Some(entry) = by_head.iter_mut().find(|(h, _)| *h == head) {
                    entry.1.push(tail);
                } else {
                    by_head.push((head, vec![tail]));
                }
            }
            let selects = by_head
                .into_iter()
                .map(|(head, tails)| {
                    let tail_refs: Vec<&[FieldName]> = tails.iter().map(Vec::as_slice).collect();
                    let child = if tail_refs.iter().all(|t| t.is_empty()) {
                        Query::Empty
                    } else {
                        build(&tail_refs)
                    };
                    Query::select(head, child)
                })
                .collect();
            Query::group(selects)
        }

        let slices: Vec<&[FieldName]> = paths.iter().map(|p| p.0.as_slice()).collect();
        build(&slices)
    }

    /// Peer through `Environment`/`TransformCursor`/`Rename`/`Wrap` wrappers to reach the
    /// first `Select`'s field name, if any.
    pub fn root_name(&self) -> Option<&FieldName> {
        match self.peer() {
            Query::Select { name, .. } | Query::UntypedSelect { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The effective result name: the alias if present, otherwise the field name.
    pub fn result_name(&self) -> Option<&FieldName> {
        match self.peer() {
            Query::Select { name, alias, .. } | Query::UntypedSelect { name, alias, .. } => {
                Some(alias.as_ref().unwrap_or(name))
            }
            _ => None,
        }
    }

    pub fn has_field(&self, name: &FieldName) -> bool {
        match self {
            Query::Group(cs) | Query::GroupList(cs) => cs.iter().any(|c| c.has_field(name)),
            _ => self.root_name() == Some(name),
        }
    }

    pub fn field_alias(&self) -> Option<&FieldName> {
        match self.peer() {
            Query::Select { alias, .. } | Query::UntypedSelect { alias, .. } => alias.as_ref(),
            _ => None,
        }
    }

    /// Replace the child of the first reachable `Select`/`UntypedSelect`, peering through the
    /// same wrapper set as `root_name`.
    pub fn subst_child(self, new_child: Query) -> Query {
        match self {
            Query::Select { name, alias, .. } => Query::Select {
                name,
                alias,
                child: Box::new(new_child),
            },
            Query::UntypedSelect { name, alias, directives, .. } => Query::UntypedSelect {
                name,
                alias,
                directives,
                child: Box::new(new_child),
            },
            Query::Environment(env, child) => {
                Query::Environment(env, Box::new(child.subst_child(new_child)))
            }
            Query::TransformCursor(f, child) => {
                Query::TransformCursor(f, Box::new(child.subst_child(new_child)))
            }
            Query::Rename { name, child } => Query::Rename {
                name,
                child: Box::new(child.subst_child(new_child)),
            },
            Query::Wrap { name, child } => Query::Wrap {
                name,
                child: Box::new(child.subst_child(new_child)),
            },
            other => other,
        }
    }

    /// Apply `f` to every field-bearing node reachable through `Group`/`GroupList`, returning
    /// the collected results in traversal order (`mapFields[R]`).
    pub fn map_fields<R>(&self, f: &mut dyn FnMut(&Query) -> Option<R>) -> Vec<R> {
        match self {
            Query::Group(cs) | Query::GroupList(cs) => {
                cs.iter().flat_map(|c| c.map_fields(f)).collect()
            }
            other => f(other).into_iter().collect(),
        }
    }

    fn peer(&self) -> &Query {
        match self {
            Query::Environment(_, child)
            | Query::TransformCursor(_, child)
            | Query::Rename { child, .. }
            | Query::Wrap { child, .. } => child.peer(),
            other => other,
        }
    }
}

fn try_merge_one(existing: &Query, incoming: &Query) -> Option<Query> {
    match (existing, incoming) {
        (
            Query::Select { name: n1, alias: a1, child: c1 },
            Query::Select { name: n2, alias: a2, child: c2 },
        ) if n1 == n2 && a1 == a2 => Some(Query::Select {
            name: n1.clone(),
            alias: a1.clone(),
            child: Box::new(Query::group(vec![(**c1).clone(), (**c2).clone()])),
        }),
        (
            Query::UntypedSelect { name: n1, alias: a1, directives: d1, child: c1 },
            Query::UntypedSelect { name: n2, alias: a2, directives: d2, child: c2 },
        ) if n1 == n2 && a1 == a2 => {
            let mut directives = d1.clone();
            directives.extend(d2.iter().cloned());
            Some(Query::UntypedSelect {
                name: n1.clone(),
                alias: a1.clone(),
                directives,
                child: Box::new(Query::group(vec![(**c1).clone(), (**c2).clone()])),
            })
        }
        (Query::Narrow(t1, c1), Query::Narrow(t2, c2)) if t1 == t2 => Some(Query::Narrow(
            t1.clone(),
            Box::new(Query::group(vec![(**c1).clone(), (**c2).clone()])),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_flattens_nested_groups_and_drops_empty() {
        let q = Query::group(vec![
            Query::group(vec![Query::select("a", Query::Empty), Query::Empty]),
            Query::select("b", Query::Empty),
        ]);
        match q {
            Query::Group(cs) => assert_eq!(cs.len(), 2),
            other => panic!("expected Group, got {other:?}"),
        }
    }

    #[test]
    fn merge_queries_combines_same_name_and_alias() {
        let merged = Query::merge_queries(vec![
            Query::select("title", Query::Empty),
            Query::select("title", Query::select("nested", Query::Empty)),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].root_name(), Some(&FieldName::from("title")));
    }

    #[test]
    fn merge_queries_preserves_first_occurrence_order() {
        let merged = Query::merge_queries(vec![
            Query::select("b", Query::Empty),
            Query::select("a", Query::Empty),
        ]);
        assert_eq!(merged[0].root_name(), Some(&FieldName::from("b")));
        assert_eq!(merged[1].root_name(), Some(&FieldName::from("a")));
    }

    #[test]
    fn mk_path_query_shares_common_prefix() {
        let paths = vec![
            Path::root().push("director").push("name"),
            Path::root().push("director").push("id"),
        ];
        let q = Query::mk_path_query(&paths);
        match q {
            Query::Select { name, child, .. } => {
                assert_eq!(name, FieldName::from("director"));
                match *child {
                    Query::Group(cs) => assert_eq!(cs.len(), 2),
                    other => panic!("expected Group under director, got {other:?}"),
                }
            }
            other => panic!("expected Select, got {other:?}"),
        }
    }

    #[test]
    fn root_name_peers_through_wrappers() {
        let q = Query::Rename {
            name: "alias".into(),
            child: Box::new(Query::Environment(
                vec![],
                Box::new(Query::select("title", Query::Empty)),
            )),
        };
        assert_eq!(q.root_name(), Some(&FieldName::from("title")));
    }
}
