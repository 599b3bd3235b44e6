//! The query interpreter shell (§4.H, §5, §6): the thin layer above the planner/cursor that
//! actually runs a batch of root queries against a driver. Everything below this module is
//! pure; this is the one place a `MappedQuery` gets fetched and turned into a `Cursor`.
//!
//! Two external boundaries live here: `QueryDriver` (the SQL I/O boundary — `fetch` is the
//! only thing that may suspend besides the monitor hooks) and `Monitor` (stage-boundary
//! hooks for an external metrics/tracing layer). Both are out of this core's scope to
//! implement, only to define (§1, §6).

use std::sync::Arc;

use async_trait::async_trait;
use mapper_schema::error::MapperError;
use mapper_schema::mapping::Mapping;
use mapper_schema::value::{Cell, FieldName, Path, TypeName};
use tokio::task::JoinSet;

use crate::cursor::Cursor;
use crate::fragment::Fragment;
use crate::gql_type::{FieldTypes, Type};
use crate::planner::{ColumnMeta, MappedQuery};
use crate::predicate::{Predicate, Term};
use crate::query::Query;
use crate::row::Table;
use crate::staging;

/// The SQL driver boundary (§6): given a compiled fragment and its column metadata, fetch the
/// rows it describes. Errors propagate unchanged, wrapped in `MapperError::Driver`.
#[async_trait]
pub trait QueryDriver: Send + Sync {
    async fn fetch(&self, fragment: &Fragment, metas: &[ColumnMeta]) -> Result<Table, MapperError>;
}

/// Stage-boundary hooks (§6). All methods are no-ops by default, so a caller that only cares
/// about one hook doesn't have to stub out the rest.
#[async_trait]
pub trait Monitor: Send + Sync {
    async fn stage_started(&self, _path: &Path) {}
    async fn stage_completed(&self, _path: &Path) {}
    async fn query_mapped(&self, _path: &Path, _fragment: &Fragment, _table: &Table) {}
    async fn result_computed(&self, _path: &Path) {}
}

/// The no-op `Monitor`, used when a caller has no observability layer to plug in.
pub struct NoopMonitor;

#[async_trait]
impl Monitor for NoopMonitor {}

/// One top-level query to run, as the caller sees it: where its result belongs (`path`), the
/// (not-yet-staged) query tree, and the GraphQL type it returns.
#[derive(Clone)]
pub struct RootQuery {
    pub path: Path,
    pub query: Query,
    pub type_name: TypeName,
    pub list: bool,
}

impl RootQuery {
    pub fn result_type(&self) -> Type {
        let named = Type::named(self.type_name.clone());
        if self.list {
            named.list()
        } else {
            named
        }
    }
}

/// Runs batches of root queries: elaborates each for staging, opportunistically coalesces
/// sibling queries that differ only in one compared constant into a single `IN`-list fetch
/// (§4.H), dispatches the rest independently, and hands every fetched table back as a
/// `Cursor` in the caller's original order.
pub struct Interpreter<D, M = NoopMonitor> {
    mapping: Arc<Mapping>,
    field_types: Arc<dyn FieldTypes>,
    driver: Arc<D>,
    monitor: Arc<M>,
}

impl<D, M> Interpreter<D, M>
where
    D: QueryDriver + 'static,
    M: Monitor + 'static,
{
    pub fn new(mapping: Arc<Mapping>, field_types: Arc<dyn FieldTypes>, driver: D, monitor: M) -> Self {
        Interpreter {
            mapping,
            field_types,
            driver: Arc::new(driver),
            monitor: Arc::new(monitor),
        }
    }

    pub async fn run_one(&self, root: RootQuery) -> Result<Cursor, MapperError> {
        let mut results = self.run(vec![root]).await;
        results.pop().expect("run() returns one result per input")
    }

    /// Run every root query, returning one `Result` per input in the same order (§5: as many
    /// independent sub-queries as possible succeed even if some fail).
    pub async fn run(&self, roots: Vec<RootQuery>) -> Vec<Result<Cursor, MapperError>> {
        let mut results: Vec<Option<Result<Cursor, MapperError>>> = roots.iter().map(|_| None).collect();
        let mut runnable: Vec<Elaborated> = Vec::new();
        for (idx, root) in roots.into_iter().enumerate() {
            match staging::elaborate(&root.query, &self.mapping, self.field_types.as_ref(), root.type_name.clone()) {
                Ok(query) => runnable.push(Elaborated {
                    idx,
                    path: root.path,
                    query,
                    type_name: root.type_name,
                    result_type: root.list,
                }),
                Err(err) => results[idx] = Some(Err(err)),
            }
        }

        let units = coalesce(runnable);

        let mut join_set: JoinSet<Vec<(usize, Result<Cursor, MapperError>)>> = JoinSet::new();
        for unit in units {
            let mapping = self.mapping.clone();
            let driver = self.driver.clone();
            let monitor = self.monitor.clone();
            join_set.spawn(async move { unit.run(&mapping, driver.as_ref(), monitor.as_ref()).await });
        }
        while let Some(joined) = join_set.join_next().await {
            let Ok(pairs) = joined else {
                continue;
            };
            for (idx, res) in pairs {
                results[idx] = Some(res);
            }
        }
        results
            .into_iter()
            .map(|r| r.expect("every index is written exactly once"))
            .collect()
    }
}

struct Elaborated {
    idx: usize,
    path: Path,
    query: Query,
    type_name: TypeName,
    result_type: bool,
}

/// The shape §4.H coalesces: a query whose only difference from its siblings is the constant
/// side of a single key-equality filter — `[Context(ctx_path,)] Filter(Eql(Path(key_path),
/// Const(value)), child)`. This is exactly the shape `staging::make_staging_join` produces for
/// a re-issued deferred subtree, and the shape a `movieById(id: ...)`-style root field compiles
/// to, so it's the one worth recognizing here rather than a more general pattern match.
struct CoalescableShape {
    ctx_path: Option<Path>,
    key_path: Path,
    value: Cell,
    child: Query,
}

fn match_shape(query: &Query) -> Option<CoalescableShape> {
    let (ctx_path, inner) = match query {
        Query::Context(p, inner) => (Some(p.clone()), inner.as_ref()),
        other => (None, other),
    };
    let Query::Filter(Predicate::Eql(Term::Path(key_path), Term::Const(value)), child) = inner else {
        return None;
    };
    Some(CoalescableShape {
        ctx_path,
        key_path: key_path.clone(),
        value: value.clone(),
        child: (**child).clone(),
    })
}

/// A unit of work the interpreter dispatches as one fetch: either a single root query, or a
/// group of root queries coalesced into a single `IN`-list fetch that scatters its result
/// table back out by the compared key.
enum Unit {
    Single(Elaborated),
    Group {
        indices: Vec<(usize, Path, Cell)>,
        ctx_path: Option<Path>,
        key_path: Path,
        child: Query,
        type_name: TypeName,
        result_type: bool,
    },
}

impl Unit {
    async fn run<D: QueryDriver, M: Monitor>(
        self,
        mapping: &Arc<Mapping>,
        driver: &D,
        monitor: &M,
    ) -> Vec<(usize, Result<Cursor, MapperError>)> {
        match self {
            Unit::Single(e) => {
                let result = run_single(mapping, driver, monitor, &e.path, &e.query, &e.type_name, e.result_type).await;
                vec![(e.idx, result)]
            }
            Unit::Group { indices, ctx_path, key_path, child, type_name, result_type } => {
                let values: Vec<Cell> = indices.iter().map(|(_, _, v)| v.clone()).collect();
                let filtered = Query::Filter(Predicate::In(Term::Path(key_path.clone()), values), Box::new(child));
                let combined = match &ctx_path {
                    Some(p) => Query::Context(p.clone(), Box::new(filtered)),
                    None => filtered,
                };
                match plan_and_fetch(mapping, driver, monitor, &combined, &type_name).await {
                    Ok((mapped, table)) => {
                        scatter(&mapped, table, ctx_path.as_ref(), &key_path, &type_name, result_type, indices)
                    }
                    Err(err) => indices
                        .into_iter()
                        .map(|(idx, _, _)| (idx, Err(stringify_error(&err))))
                        .collect(),
                }
            }
        }
    }
}

async fn run_single<D: QueryDriver, M: Monitor>(
    mapping: &Arc<Mapping>,
    driver: &D,
    monitor: &M,
    path: &Path,
    query: &Query,
    type_name: &TypeName,
    result_type: bool,
) -> Result<Cursor, MapperError> {
    let (mapped, table) = plan_and_fetch(mapping, driver, monitor, query, type_name).await?;
    let tpe = if result_type { Type::named(type_name.clone()).list() } else { Type::named(type_name.clone()) };
    Ok(Cursor::root(mapped, path.clone(), tpe, table))
}

async fn plan_and_fetch<D: QueryDriver, M: Monitor>(
    mapping: &Arc<Mapping>,
    driver: &D,
    monitor: &M,
    query: &Query,
    type_name: &TypeName,
) -> Result<(Arc<MappedQuery>, Table), MapperError> {
    monitor.stage_started(&Path::root()).await;
    let mapped = Arc::new(MappedQuery::build(mapping.clone(), query, Path::root(), type_name.clone())?);
    let fragment = mapped.fragment()?.clone();
    let table = driver.fetch(&fragment, mapped.metas()).await?;
    monitor.query_mapped(&Path::root(), &fragment, &table).await;
    let table = apply_post_predicates(&mapped, table)?;
    monitor.stage_completed(&Path::root()).await;
    Ok((mapped, table))
}

/// Filter rows by every predicate the planner couldn't push into SQL, because it referenced a
/// cursor-computed field (§4.E). Each row is checked in isolation: a single-row `Cursor`
/// focused at the predicate's own declaration path/type gives `Predicate::eval` everything it
/// needs without re-fetching.
fn apply_post_predicates(mapped: &Arc<MappedQuery>, table: Table) -> Result<Table, MapperError> {
    let predicates: Vec<_> = mapped.post_predicates().cloned().collect();
    if predicates.is_empty() {
        return Ok(table);
    }
    let mut kept = Vec::with_capacity(table.rows.len());
    for row in table.rows {
        let single = Table::new(vec![row.clone()]);
        let mut matches = true;
        for p in &predicates {
            let cursor = Cursor::root(mapped.clone(), p.path.clone(), Type::named(p.type_name.clone()), single.clone());
            if !p.predicate.eval(&cursor)? {
                matches = false;
                break;
            }
        }
        if matches {
            kept.push(row);
        }
    }
    Ok(Table::new(kept))
}

/// Split a coalesced fetch's result table back out per original request, by the value of the
/// column backing `key_path`, preserving each request's own `path` (I8).
fn scatter(
    mapped: &Arc<MappedQuery>,
    table: Table,
    ctx_path: Option<&Path>,
    key_path: &Path,
    type_name: &TypeName,
    result_type: bool,
    indices: Vec<(usize, Path, Cell)>,
) -> Vec<(usize, Result<Cursor, MapperError>)> {
    let base_path = ctx_path.cloned().unwrap_or_else(Path::root);
    let col = match mapped.resolve_path(&base_path, type_name, key_path) {
        Ok(Some(c)) => c,
        Ok(None) => {
            let err = MapperError::mapping(base_path, "coalesced discriminator path resolves to no column");
            return indices.into_iter().map(|(idx, _, _)| (idx, Err(stringify_error(&err)))).collect();
        }
        Err(err) => return indices.into_iter().map(|(idx, _, _)| (idx, Err(stringify_error(&err)))).collect(),
    };
    let Some(col_idx) = mapped.column_index(&col) else {
        let err = MapperError::mapping(base_path, "coalesced discriminator column missing from plan");
        return indices.into_iter().map(|(idx, _, _)| (idx, Err(stringify_error(&err)))).collect();
    };

    indices
        .into_iter()
        .map(|(idx, path, value)| {
            let rows = table
                .rows
                .iter()
                .filter(|row| row.0[col_idx] == value)
                .cloned()
                .collect();
            let tpe = if result_type { Type::named(type_name.clone()).list() } else { Type::named(type_name.clone()) };
            (idx, Ok(Cursor::root(mapped.clone(), path, tpe, Table::new(rows))))
        })
        .collect()
}

/// `MapperError` isn't `Clone` (it carries a boxed driver error), so a failure shared across a
/// whole coalesced group is re-wrapped as a driver error for every member beyond the first.
fn stringify_error(err: &MapperError) -> MapperError {
    MapperError::driver(std::io::Error::other(err.to_string()))
}

/// Group elaborated root queries into dispatch units: queries matching the §4.H shape that
/// share `(ctx_path, field, key_path, child, type)` become one `Unit::Group`; everything else
/// stays a `Unit::Single`. Grouping is keyed by a structural fingerprint since `Query` and
/// `Predicate` carry closures and so can't derive `PartialEq`.
fn coalesce(elaborated: Vec<Elaborated>) -> Vec<Unit> {
    let mut keyed: Vec<(String, CoalescableShape, Elaborated)> = Vec::new();
    let mut singles: Vec<Elaborated> = Vec::new();

    for e in elaborated {
        match match_shape(&e.query) {
            Some(shape) => {
                let key = format!(
                    "{:?}|{:?}|{}|{}",
                    shape.ctx_path,
                    shape.key_path,
                    fp_query(&shape.child),
                    e.type_name,
                );
                keyed.push((key, shape, e));
            }
            None => singles.push(e),
        }
    }

    let mut groups: Vec<(String, Vec<(usize, Path, Cell)>, CoalescableShape, TypeName, bool)> = Vec::new();
    for (key, shape, e) in keyed {
        if let Some((_, members, _, _, _)) = groups.iter_mut().find(|(k, ..)| *k == key) {
            members.push((e.idx, e.path, shape.value));
        } else {
            groups.push((key, vec![(e.idx, e.path, shape.value)], shape, e.type_name, e.result_type));
        }
    }

    let mut units: Vec<Unit> = Vec::new();
    for (_, members, shape, type_name, result_type) in groups {
        if members.len() < 2 {
            let (idx, path, value) = members.into_iter().next().unwrap();
            let filtered = Query::Filter(
                Predicate::Eql(Term::Path(shape.key_path), Term::Const(value)),
                Box::new(shape.child),
            );
            let query = match shape.ctx_path {
                Some(p) => Query::Context(p, Box::new(filtered)),
                None => filtered,
            };
            units.push(Unit::Single(Elaborated { idx, path, query, type_name, result_type }));
        } else {
            units.push(Unit::Group {
                indices: members,
                ctx_path: shape.ctx_path,
                key_path: shape.key_path,
                child: shape.child,
                type_name,
                result_type,
            });
        }
    }
    for e in singles {
        units.push(Unit::Single(e));
    }
    units
}

fn fp_query(q: &Query) -> String {
    match q {
        Query::Select { name, alias, child } => format!("Sel({name},{alias:?},{})", fp_query(child)),
        Query::UntypedSelect { name, alias, directives, child } => {
            format!("USel({name},{alias:?},{directives:?},{})", fp_query(child))
        }
        Query::Group(cs) => format!("Grp[{}]", cs.iter().map(fp_query).collect::<Vec<_>>().join(",")),
        Query::GroupList(cs) => format!("GrpL[{}]", cs.iter().map(fp_query).collect::<Vec<_>>().join(",")),
        Query::Unique(c) => format!("Uniq({})", fp_query(c)),
        Query::Filter(p, c) => format!("Filt({},{})", fp_pred(p), fp_query(c)),
        Query::Narrow(t, c) => format!("Narrow({t},{})", fp_query(c)),
        Query::UntypedNarrow(t, c) => format!("UNarrow({t},{})", fp_query(c)),
        Query::Wrap { name, child } => format!("Wrap({name},{})", fp_query(child)),
        Query::Rename { name, child } => format!("Ren({name},{})", fp_query(child)),
        Query::Limit(n, c) => format!("Lim({n},{})", fp_query(c)),
        Query::Offset(n, c) => format!("Off({n},{})", fp_query(c)),
        Query::OrderBy(sels, c) => format!("Ord({},{})", sels.len(), fp_query(c)),
        Query::GroupBy(keys, c) => format!("GrpBy({keys:?},{})", fp_query(c)),
        Query::Count(c) => format!("Cnt({})", fp_query(c)),
        Query::Introspect(s, c) => format!("Intro({s},{})", fp_query(c)),
        Query::Environment(e, c) => format!("Env({e:?},{})", fp_query(c)),
        Query::Component { join, child, .. } => format!("Comp({join},{})", fp_query(child)),
        Query::Defer { parent_type, child, .. } => format!("Defer({parent_type},{})", fp_query(child)),
        Query::TransformCursor(_, c) => format!("TC({})", fp_query(c)),
        Query::Context(p, c) => format!("Ctx({p:?},{})", fp_query(c)),
        Query::Skip(b, c) => format!("Skip({b},{})", fp_query(c)),
        Query::Empty => "Empty".to_string(),
    }
}

fn fp_pred(p: &Predicate) -> String {
    match p {
        Predicate::And(a, b) => format!("And({},{})", fp_pred(a), fp_pred(b)),
        Predicate::Or(a, b) => format!("Or({},{})", fp_pred(a), fp_pred(b)),
        Predicate::Not(p) => format!("Not({})", fp_pred(p)),
        Predicate::Eql(a, b) => format!("Eq({},{})", fp_term(a), fp_term(b)),
        Predicate::NEql(a, b) => format!("NEq({},{})", fp_term(a), fp_term(b)),
        Predicate::Lt(a, b) => format!("Lt({},{})", fp_term(a), fp_term(b)),
        Predicate::LtEql(a, b) => format!("LtEq({},{})", fp_term(a), fp_term(b)),
        Predicate::Gt(a, b) => format!("Gt({},{})", fp_term(a), fp_term(b)),
        Predicate::GtEql(a, b) => format!("GtEq({},{})", fp_term(a), fp_term(b)),
        Predicate::In(t, vs) => format!("In({},{})", fp_term(t), vs.len()),
        Predicate::Contains(a, b) => format!("Contains({},{})", fp_term(a), fp_term(b)),
        Predicate::Like { term, case_insensitive, .. } => format!("Like({},{case_insensitive})", fp_term(term)),
        Predicate::StartsWith(t, _) => format!("StartsWith({})", fp_term(t)),
        Predicate::Matches(t, _) => format!("Matches({})", fp_term(t)),
        Predicate::AndB(a, b) => format!("AndB({},{})", fp_term(a), fp_term(b)),
        Predicate::OrB(a, b) => format!("OrB({},{})", fp_term(a), fp_term(b)),
        Predicate::XorB(a, b) => format!("XorB({},{})", fp_term(a), fp_term(b)),
        Predicate::NotB(t) => format!("NotB({})", fp_term(t)),
        Predicate::ToUpperCase(t) => format!("Upper({})", fp_term(t)),
        Predicate::ToLowerCase(t) => format!("Lower({})", fp_term(t)),
    }
}

fn fp_term(t: &Term) -> String {
    match t {
        Term::Const(_) => "Const".to_string(),
        Term::Path(p) => format!("Path({p:?})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_schema::codec::int;
    use mapper_schema::columns::ColumnRef;
    use mapper_schema::mapping::{FieldMapping, ObjectMapping, TypeMapping};
    use std::sync::Mutex;

    struct NeverList;
    impl FieldTypes for NeverList {
        fn is_list_field(&self, _type_name: &TypeName, _field_name: &FieldName) -> bool {
            false
        }
    }

    fn movies_mapping() -> Arc<Mapping> {
        let mut mapping = Mapping::new();
        mapping.add(TypeMapping::Object(ObjectMapping::new(
            "Movie",
            vec![
                FieldMapping::SqlField {
                    name: "id".into(),
                    column: ColumnRef::new("movies", "id", int()),
                    key: true,
                    discriminator: false,
                },
                FieldMapping::SqlField {
                    name: "year".into(),
                    column: ColumnRef::new("movies", "year", int()),
                    key: false,
                    discriminator: false,
                },
            ],
        )));
        Arc::new(mapping)
    }

    struct FixtureDriver {
        rows: Vec<crate::row::Row>,
        fetch_count: Mutex<usize>,
    }

    #[async_trait]
    impl QueryDriver for FixtureDriver {
        async fn fetch(&self, _fragment: &Fragment, _metas: &[ColumnMeta]) -> Result<Table, MapperError> {
            *self.fetch_count.lock().unwrap() += 1;
            Ok(Table::new(self.rows.clone()))
        }
    }

    fn movie_row(id: i64, year: i64) -> crate::row::Row {
        crate::row::Row(vec![Cell::I64(id), Cell::I64(year)])
    }

    fn by_id_query(id: i64) -> Query {
        Query::Context(
            Path::root(),
            Box::new(Query::Filter(
                Predicate::Eql(Term::path(Path::single("id")), Term::const_(id)),
                Box::new(Query::select("year", Query::Empty)),
            )),
        )
    }

    #[tokio::test]
    async fn sibling_coalescing_issues_one_fetch_for_matching_shapes() {
        let mapping = movies_mapping();
        let driver = FixtureDriver {
            rows: vec![movie_row(1, 1999), movie_row(2, 2000), movie_row(3, 2001)],
            fetch_count: Mutex::new(0),
        };
        let interpreter = Interpreter::new(mapping, Arc::new(NeverList), driver, NoopMonitor);

        let roots = vec![
            RootQuery { path: Path::single("a"), query: by_id_query(1), type_name: "Movie".into(), list: false },
            RootQuery { path: Path::single("b"), query: by_id_query(2), type_name: "Movie".into(), list: false },
            RootQuery { path: Path::single("c"), query: by_id_query(3), type_name: "Movie".into(), list: false },
        ];
        let results = interpreter.run(roots).await;
        assert_eq!(results.len(), 3);
        assert_eq!(*interpreter.driver.fetch_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn scatter_preserves_original_positional_order() {
        let mapping = movies_mapping();
        let driver = FixtureDriver {
            rows: vec![movie_row(2, 2000), movie_row(1, 1999)],
            fetch_count: Mutex::new(0),
        };
        let interpreter = Interpreter::new(mapping, Arc::new(NeverList), driver, NoopMonitor);

        let roots = vec![
            RootQuery { path: Path::single("first"), query: by_id_query(1), type_name: "Movie".into(), list: false },
            RootQuery { path: Path::single("second"), query: by_id_query(2), type_name: "Movie".into(), list: false },
        ];
        let results = interpreter.run(roots).await;
        let year_of = |c: &Cursor| c.clone().field(&"year".into(), Type::named("Int")).unwrap().as_leaf().unwrap();
        assert_eq!(year_of(results[0].as_ref().unwrap()), Cell::I64(1999));
        assert_eq!(year_of(results[1].as_ref().unwrap()), Cell::I64(2000));
    }

    #[tokio::test]
    async fn single_non_matching_query_runs_independently() {
        let mapping = movies_mapping();
        let driver = FixtureDriver { rows: vec![movie_row(1, 1999)], fetch_count: Mutex::new(0) };
        let interpreter = Interpreter::new(mapping, Arc::new(NeverList), driver, NoopMonitor);

        let query = Query::select("year", Query::Empty);
        let roots = vec![RootQuery { path: Path::root(), query, type_name: "Movie".into(), list: false }];
        let results = interpreter.run(roots).await;
        assert!(results[0].is_ok());
    }
}
