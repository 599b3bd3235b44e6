//! The SQL projection planner: walks a `Query` against a `Mapping` and produces a
//! `MappedQuery` — the one SQL statement (table, columns, joins, predicates) that answers the
//! whole selection in a single round trip (§4.E).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mapper_schema::codec::CodecRef;
use mapper_schema::columns::{ColumnRef, Join};
use mapper_schema::error::MapperError;
use mapper_schema::mapping::{FieldMapping, Mapping, TypeMapping};
use mapper_schema::value::{Cell, FieldName, Path, TableName, TypeName};

use crate::fragment::Fragment;
use crate::predicate::{Predicate, Term};
use crate::query::Query;
use crate::row::{Row, Table};

/// Per-column metadata the cursor needs to decode and to judge nullability (§4.E step 8).
#[derive(Clone, Debug)]
pub struct ColumnMeta {
    pub codec: CodecRef,
    /// This column's table was reached through a `LEFT JOIN` — a `FailedJoin` cell here is
    /// an ordinary "the child row doesn't exist" outcome, not a bug.
    pub is_outer_join: bool,
    /// Whether the field this column backs is itself declared nullable in the mapping (a
    /// `SqlAttribute { nullable: true, .. }`). Schema-declared nullability and interface
    /// variant-field nullability would also contribute here, but both require the GraphQL
    /// schema's "implements" graph, which is outside this core's scope (§1); those two
    /// contributions are always `false` here by construction.
    pub nullable: bool,
}

/// One predicate the planner discovered, plus whether it can be compiled into the SQL
/// fragment (`cursor_only = false`) or must instead be evaluated post-fetch against a
/// `Cursor` because it touches a cursor-computed field (`cursor_only = true`).
#[derive(Clone, Debug)]
pub struct PlannedPredicate {
    pub path: Path,
    pub type_name: TypeName,
    pub predicate: Predicate,
    pub cursor_only: bool,
}

pub struct MappedQuery {
    mapping: Arc<Mapping>,
    table: TableName,
    columns: Vec<ColumnRef>,
    metas: Vec<ColumnMeta>,
    predicates: Vec<PlannedPredicate>,
    joins: Vec<Join>,
    fragment_cache: once_cell::sync::OnceCell<Fragment>,
}

impl MappedQuery {
    /// Run the planner over `query`, rooted at `path`/`type_name` (§4.E steps 1-8).
    #[tracing::instrument(skip(mapping, query), fields(type_name = %type_name))]
    pub fn build(mapping: Arc<Mapping>, query: &Query, path: Path, type_name: TypeName) -> Result<MappedQuery, MapperError> {
        let mut acc = Accumulator {
            mapping: mapping.clone(),
            columns: Vec::new(),
            joins: Vec::new(),
            predicates: Vec::new(),
            visited_types: Vec::new(),
        };
        acc.visit_query(query, &path, &type_name)?;
        let root_table = acc.select_root_table()?;
        let ordered_joins = acc.order_joins(&root_table)?;
        let metas = acc.build_metas(&ordered_joins)?;
        tracing::debug!(table = %root_table, columns = acc.columns.len(), joins = ordered_joins.len(), "plan built");
        Ok(MappedQuery {
            mapping,
            table: root_table,
            columns: acc.columns,
            metas,
            predicates: acc.predicates,
            joins: ordered_joins,
            fragment_cache: once_cell::sync::OnceCell::new(),
        })
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }

    pub fn metas(&self) -> &[ColumnMeta] {
        &self.metas
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn column_index(&self, col: &ColumnRef) -> Option<usize> {
        self.columns.iter().position(|c| c == col)
    }

    /// The predicates that must be evaluated post-fetch against a `Cursor`, because they
    /// reference a cursor-computed field the SQL layer never sees.
    pub fn post_predicates(&self) -> impl Iterator<Item = &PlannedPredicate> {
        self.predicates.iter().filter(|p| p.cursor_only)
    }

    /// Resolve a term path to its backing column without re-running the planner, for callers
    /// (the interpreter's sibling-coalescing scatter step) that already know a path must
    /// resolve to a column already present in this plan.
    pub fn resolve_path(
        &self,
        base_path: &Path,
        base_type: &TypeName,
        term_path: &Path,
    ) -> Result<Option<ColumnRef>, MapperError> {
        resolve_term_path(&self.mapping, base_path, base_type, term_path)
    }

    /// The lazily-built SQL text plus binds: `SELECT ... FROM ... LEFT JOIN ... WHERE ...`.
    pub fn fragment(&self) -> Result<&Fragment, MapperError> {
        self.fragment_cache.get_or_try_init(|| self.build_fragment())
    }

    fn build_fragment(&self) -> Result<Fragment, MapperError> {
        let select_list = Fragment::concat(
            self.columns.iter().map(|c| Fragment::const_(c.to_string())),
            ", ",
        );
        let mut frag = Fragment::const_("SELECT ")
            .append(select_list)
            .append(Fragment::const_(format!(" FROM {}", self.table)));
        for join in &self.joins {
            frag = frag.append(Fragment::const_(format!(" {}", join.render())));
        }
        let compiled = self
            .predicates
            .iter()
            .filter(|p| !p.cursor_only)
            .map(|p| self.compile_predicate(&p.path, &p.type_name, &p.predicate))
            .collect::<Result<Vec<_>, _>>()?;
        frag = frag.append(Fragment::where_and_opt(compiled));
        Ok(frag)
    }

    fn compile_predicate(&self, path: &Path, type_name: &TypeName, pred: &Predicate) -> Result<Fragment, MapperError> {
        match pred {
            Predicate::And(a, b) => Ok(Fragment::and_opt(vec![
                self.compile_predicate(path, type_name, a)?,
                self.compile_predicate(path, type_name, b)?,
            ])),
            Predicate::Or(a, b) => Ok(Fragment::or_opt(vec![
                self.compile_predicate(path, type_name, a)?,
                self.compile_predicate(path, type_name, b)?,
            ])),
            Predicate::Not(p) => Ok(Fragment::const_("NOT (")
                .append(self.compile_predicate(path, type_name, p)?)
                .append(Fragment::const_(")"))),
            Predicate::Eql(a, b) => self.compile_binop(path, type_name, a, b, " = "),
            Predicate::NEql(a, b) => self.compile_binop(path, type_name, a, b, " != "),
            Predicate::Lt(a, b) => self.compile_binop(path, type_name, a, b, " < "),
            Predicate::LtEql(a, b) => self.compile_binop(path, type_name, a, b, " <= "),
            Predicate::Gt(a, b) => self.compile_binop(path, type_name, a, b, " > "),
            Predicate::GtEql(a, b) => self.compile_binop(path, type_name, a, b, " >= "),
            Predicate::Contains(a, b) => self.compile_binop(path, type_name, a, b, " = "),
            Predicate::AndB(a, b) => self.compile_binop(path, type_name, a, b, " & "),
            Predicate::OrB(a, b) => self.compile_binop(path, type_name, a, b, " | "),
            Predicate::XorB(a, b) => self.compile_binop(path, type_name, a, b, " # "),
            Predicate::NotB(t) => {
                let col = self.compile_column_term(path, type_name, t)?;
                Ok(Fragment::const_("~").append(col))
            }
            Predicate::ToUpperCase(t) => {
                let col = self.compile_column_term(path, type_name, t)?;
                Ok(Fragment::const_("upper(").append(col).append(Fragment::const_(")")))
            }
            Predicate::ToLowerCase(t) => {
                let col = self.compile_column_term(path, type_name, t)?;
                Ok(Fragment::const_("lower(").append(col).append(Fragment::const_(")")))
            }
            Predicate::In(term, values) => {
                let col = self.compile_column_term(path, type_name, term)?;
                let codec = self.column_codec_for(path, type_name, term)?;
                Fragment::in_list(col.sql().to_string(), values.iter().cloned(), codec)
                    .ok_or_else(|| MapperError::predicate_compilation(path.clone(), "IN predicate with no values"))
            }
            Predicate::Like { term, pattern, case_insensitive } => {
                let col = self.compile_column_term(path, type_name, term)?;
                let op = if *case_insensitive { " ILIKE " } else { " LIKE " };
                Ok(col
                    .append(Fragment::const_(op))
                    .append(Fragment::bind(Cell::String(pattern.clone()), mapper_schema::codec::string())))
            }
            Predicate::StartsWith(term, prefix) => {
                let col = self.compile_column_term(path, type_name, term)?;
                Ok(col.append(Fragment::const_(" LIKE ")).append(Fragment::bind(
                    Cell::String(format!("{prefix}%")),
                    mapper_schema::codec::string(),
                )))
            }
            Predicate::Matches(term, pattern) => {
                let col = self.compile_column_term(path, type_name, term)?;
                Ok(col.append(Fragment::const_(" LIKE ")).append(Fragment::bind(
                    Cell::String(pattern.clone()),
                    mapper_schema::codec::string(),
                )))
            }
        }
    }

    fn compile_column_term(&self, path: &Path, type_name: &TypeName, term: &Term) -> Result<Fragment, MapperError> {
        match compile_term(&self.mapping, path, type_name, term)? {
            CompiledTerm::Column { sql, .. } => Ok(sql),
            CompiledTerm::Const(_) => Err(MapperError::predicate_compilation(
                path.clone(),
                "expected a column-valued term, found a constant",
            )),
        }
    }

    fn column_codec_for(&self, path: &Path, type_name: &TypeName, term: &Term) -> Result<CodecRef, MapperError> {
        match compile_term(&self.mapping, path, type_name, term)? {
            CompiledTerm::Column { codec, .. } => Ok(codec),
            CompiledTerm::Const(_) => Err(MapperError::predicate_compilation(
                path.clone(),
                "expected a column-valued term, found a constant",
            )),
        }
    }

    fn compile_binop(
        &self,
        path: &Path,
        type_name: &TypeName,
        a: &Term,
        b: &Term,
        op: &str,
    ) -> Result<Fragment, MapperError> {
        let ca = compile_term(&self.mapping, path, type_name, a)?;
        let cb = compile_term(&self.mapping, path, type_name, b)?;
        let codec = unify(path, &ca, &cb)?;
        Ok(render_term(ca, &codec)
            .append(Fragment::const_(op))
            .append(render_term(cb, &codec)))
    }

    /// The key column indices for `item_type` at `path`, or `None` if the type has no keys at
    /// all (grouping then degenerates to treating every row as its own group).
    pub fn key_indices(&self, path: &Path, item_type: &TypeName) -> Result<Option<Vec<usize>>, MapperError> {
        let tm = self.mapping.object_mapping_at(path, item_type).ok_or_else(|| {
            MapperError::mapping(path.clone(), format!("no object mapping for type {item_type}"))
        })?;
        let key_cols = tm.key_columns();
        if key_cols.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            key_cols
                .iter()
                .map(|c| {
                    self.column_index(c).ok_or_else(|| {
                        MapperError::mapping(path.clone(), format!("key column {c} missing from plan"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        ))
    }

    /// Group `table`'s rows by `item_type`'s key columns, dropping rows whose key projection
    /// contains a `FailedJoin`, ordered deterministically by the stringified key (§4.G, I6).
    pub fn group(&self, table: &Table, path: &Path, item_type: &TypeName) -> Result<Vec<Table>, MapperError> {
        let key_idxs = self.key_indices(path, item_type)?.ok_or_else(|| {
            MapperError::mapping(path.clone(), format!("type {item_type} has no key columns to group by"))
        })?;
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
        for row in &table.rows {
            if key_idxs.iter().any(|&i| row.0[i].is_failed_join()) {
                continue;
            }
            let key = key_idxs
                .iter()
                .map(|&i| row.0[i].stringify_for_grouping())
                .collect::<Vec<_>>()
                .join("\u{1}");
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(row.clone());
        }
        order.sort();
        Ok(order
            .into_iter()
            .map(|k| Table::new(groups.remove(&k).unwrap_or_default()))
            .collect())
    }

    #[cfg(test)]
    pub fn for_test(mapping: Arc<Mapping>, table: TableName, columns: Vec<ColumnRef>) -> Self {
        let metas = columns
            .iter()
            .map(|c| ColumnMeta { codec: c.codec.clone(), is_outer_join: false, nullable: false })
            .collect();
        MappedQuery {
            mapping,
            table,
            columns,
            metas,
            predicates: Vec::new(),
            joins: Vec::new(),
            fragment_cache: once_cell::sync::OnceCell::new(),
        }
    }
}

enum CompiledTerm {
    Column { sql: Fragment, codec: CodecRef },
    Const(Cell),
}

fn compile_term(mapping: &Mapping, path: &Path, type_name: &TypeName, term: &Term) -> Result<CompiledTerm, MapperError> {
    match term {
        Term::Const(c) => Ok(CompiledTerm::Const(c.clone())),
        Term::Path(p) => match resolve_term_path(mapping, path, type_name, p)? {
            Some(col) => Ok(CompiledTerm::Column { sql: Fragment::const_(col.to_string()), codec: col.codec.clone() }),
            None => Err(MapperError::predicate_compilation(
                path.clone(),
                "path resolves to a cursor-computed field, not a SQL column",
            )),
        },
    }
}

fn unify(path: &Path, a: &CompiledTerm, b: &CompiledTerm) -> Result<CodecRef, MapperError> {
    match (a, b) {
        (CompiledTerm::Column { codec: ca, .. }, CompiledTerm::Column { codec: cb, .. }) => {
            if ca == cb {
                Ok(ca.clone())
            } else {
                Err(MapperError::predicate_compilation(
                    path.clone(),
                    "both sides of the comparison are columns with different codecs",
                ))
            }
        }
        (CompiledTerm::Column { codec, .. }, CompiledTerm::Const(_))
        | (CompiledTerm::Const(_), CompiledTerm::Column { codec, .. }) => Ok(codec.clone()),
        (CompiledTerm::Const(_), CompiledTerm::Const(_)) => Err(MapperError::predicate_compilation(
            path.clone(),
            "cannot compile a comparison between two constants with no typed side to borrow an encoder from",
        )),
    }
}

fn render_term(term: CompiledTerm, codec: &CodecRef) -> Fragment {
    match term {
        CompiledTerm::Column { sql, .. } => sql,
        CompiledTerm::Const(c) => Fragment::bind(c, codec.clone()),
    }
}

/// Resolve a term path to its backing column, purely by reading the mapping — no
/// accumulation, since by the time predicates are compiled every column they need is already
/// known to be present in the plan (an invariant `Accumulator::process_path` established).
/// Returns `None` if the path's last hop is a cursor-computed field.
fn resolve_term_path(
    mapping: &Mapping,
    base_path: &Path,
    base_type: &TypeName,
    term_path: &Path,
) -> Result<Option<ColumnRef>, MapperError> {
    let hops = &term_path.0;
    if hops.is_empty() {
        return Err(MapperError::predicate_compilation(base_path.clone(), "predicate path is empty"));
    }
    let mut cur_path = base_path.clone();
    let mut cur_type = base_type.clone();
    for (i, hop) in hops.iter().enumerate() {
        let fm = mapping.field_mapping_at(&cur_path, &cur_type, hop)?;
        match fm {
            FieldMapping::SqlObject { target_type, .. } => {
                if i + 1 == hops.len() {
                    return Err(MapperError::predicate_compilation(
                        cur_path.clone(),
                        format!("path ends at object field `{hop}`, not a scalar"),
                    ));
                }
                cur_path = cur_path.push(hop.clone());
                cur_type = target_type.clone();
            }
            FieldMapping::CursorField { .. } | FieldMapping::CursorAttribute { .. } => {
                if i + 1 != hops.len() {
                    return Err(MapperError::predicate_compilation(
                        cur_path.clone(),
                        format!("path continues past cursor-computed field `{hop}`"),
                    ));
                }
                return Ok(None);
            }
            FieldMapping::SqlField { column, .. }
            | FieldMapping::SqlAttribute { column, .. }
            | FieldMapping::SqlJson { column, .. } => {
                if i + 1 != hops.len() {
                    return Err(MapperError::predicate_compilation(
                        cur_path.clone(),
                        format!("path continues past scalar field `{hop}`"),
                    ));
                }
                return Ok(Some(column.clone()));
            }
        }
    }
    unreachable!("hops is non-empty, so the loop always returns")
}

enum FieldStep {
    Object(Path, TypeName),
    Terminal { cursor_computed: bool },
}

/// The mutable walk state built up over one `MappedQuery::build` call.
struct Accumulator {
    mapping: Arc<Mapping>,
    columns: Vec<ColumnRef>,
    joins: Vec<Join>,
    predicates: Vec<PlannedPredicate>,
    visited_types: Vec<(Path, TypeName)>,
}

impl Accumulator {
    fn add_column(&mut self, col: ColumnRef) {
        if !self.columns.contains(&col) {
            self.columns.push(col);
        }
    }

    fn add_join(&mut self, join: Join) {
        if !self.joins.contains(&join) {
            self.joins.push(join);
        }
    }

    /// Step 1: at every visited (path, type) pair, collect key and discriminator columns.
    fn visit_level(&mut self, path: &Path, type_name: &TypeName) -> Result<(), MapperError> {
        if self.visited_types.iter().any(|(p, t)| p == path && t == type_name) {
            return Ok(());
        }
        let tm = self.mapping.object_mapping_at(path, type_name).ok_or_else(|| {
            MapperError::mapping(path.clone(), format!("no object mapping for type {type_name}"))
        })?;
        for col in tm.key_columns() {
            self.add_column(col);
        }
        for col in tm.discriminator_columns() {
            self.add_column(col);
        }
        self.visited_types.push((path.clone(), type_name.clone()));
        Ok(())
    }

    /// Steps 2-3: columns and joins needed to select `name` at `(path, type_name)`.
    fn process_field(&mut self, path: &Path, type_name: &TypeName, name: &FieldName) -> Result<FieldStep, MapperError> {
        self.visit_level(path, type_name)?;
        let fm = self.mapping.field_mapping_at(path, type_name, name)?.clone();
        match &fm {
            FieldMapping::SqlField { column, .. }
            | FieldMapping::SqlAttribute { column, .. }
            | FieldMapping::SqlJson { column, .. } => {
                self.add_column(column.clone());
                Ok(FieldStep::Terminal { cursor_computed: false })
            }
            FieldMapping::SqlObject { joins, target_type, .. } => {
                for join in joins {
                    self.add_join(join.clone());
                    self.add_column(join.parent().clone());
                    self.add_column(join.child().clone());
                }
                let child_path = path.push(name.clone());
                self.visit_level(&child_path, target_type)?;
                Ok(FieldStep::Object(child_path, target_type.clone()))
            }
            FieldMapping::CursorField { required_siblings, .. }
            | FieldMapping::CursorAttribute { required_siblings, .. } => {
                for sibling in required_siblings {
                    self.process_field(path, type_name, sibling)?;
                }
                Ok(FieldStep::Terminal { cursor_computed: true })
            }
        }
    }

    /// Step 4: walk a predicate's term path, accumulating columns/joins for every hop;
    /// returns whether the path ends at a cursor-computed field.
    fn process_path(&mut self, term_path: &Path, base_path: &Path, base_type: &TypeName) -> Result<bool, MapperError> {
        let hops = &term_path.0;
        if hops.is_empty() {
            return Err(MapperError::predicate_compilation(base_path.clone(), "predicate path is empty"));
        }
        let mut cur_path = base_path.clone();
        let mut cur_type = base_type.clone();
        let mut cursor_only = false;
        for (i, hop) in hops.iter().enumerate() {
            match self.process_field(&cur_path, &cur_type, hop)? {
                FieldStep::Object(p, t) => {
                    cur_path = p;
                    cur_type = t;
                }
                FieldStep::Terminal { cursor_computed } => {
                    cursor_only = cursor_computed;
                    if i + 1 != hops.len() {
                        return Err(MapperError::predicate_compilation(
                            cur_path.clone(),
                            format!("path continues past terminal field `{hop}`"),
                        ));
                    }
                }
            }
        }
        Ok(cursor_only)
    }

    fn process_predicate(&mut self, pred: &Predicate, path: &Path, type_name: &TypeName) -> Result<(), MapperError> {
        let mut cursor_only = false;
        for term_path in pred.paths() {
            if self.process_path(&term_path, path, type_name)? {
                cursor_only = true;
            }
        }
        self.predicates.push(PlannedPredicate {
            path: path.clone(),
            type_name: type_name.clone(),
            predicate: pred.clone(),
            cursor_only,
        });
        Ok(())
    }

    /// Step 5: query-node dispatch.
    fn visit_query(&mut self, query: &Query, path: &Path, type_name: &TypeName) -> Result<(), MapperError> {
        self.visit_level(path, type_name)?;
        match query {
            Query::Select { name, child, .. } | Query::UntypedSelect { name, child, .. } => {
                let child_path = path.push(name.clone());
                match self.process_field(path, type_name, name)? {
                    FieldStep::Object(_, child_type) => self.visit_query(child, &child_path, &child_type)?,
                    FieldStep::Terminal { .. } => self.visit_query(child, &child_path, type_name)?,
                }
            }
            Query::Group(cs) | Query::GroupList(cs) => {
                for c in cs {
                    self.visit_query(c, path, type_name)?;
                }
            }
            Query::Unique(c) => self.visit_query(c, path, type_name)?,
            Query::Filter(pred, c) => {
                self.process_predicate(pred, path, type_name)?;
                self.visit_query(c, path, type_name)?;
            }
            Query::Narrow(t, c) => self.visit_query(c, path, t)?,
            Query::UntypedNarrow(..) => {}
            Query::Wrap { child, .. } | Query::Rename { child, .. } => self.visit_query(child, path, type_name)?,
            Query::Limit(_, c) | Query::Offset(_, c) => self.visit_query(c, path, type_name)?,
            Query::OrderBy(_, c) => self.visit_query(c, path, type_name)?,
            Query::GroupBy(_, c) => self.visit_query(c, path, type_name)?,
            Query::Count(c) => self.visit_query(c, path, type_name)?,
            Query::Environment(_, c) => self.visit_query(c, path, type_name)?,
            Query::TransformCursor(_, c) => self.visit_query(c, path, type_name)?,
            Query::Context(p, c) => self.visit_query(c, p, type_name)?,
            Query::Empty
            | Query::Component { .. }
            | Query::Defer { .. }
            | Query::Introspect(..)
            | Query::Skip(..) => {}
        }
        Ok(())
    }

    /// Step 6: exactly one candidate table (touched but never a join's child) is root;
    /// otherwise the table that is parent of the most distinct child tables.
    fn select_root_table(&self) -> Result<TableName, MapperError> {
        let child_tables: HashSet<&TableName> = self.joins.iter().map(|j| &j.child().table).collect();
        let candidates: HashSet<&TableName> = self
            .columns
            .iter()
            .map(|c| &c.table)
            .filter(|t| !child_tables.contains(t))
            .collect();
        if candidates.len() == 1 {
            return Ok((*candidates.into_iter().next().unwrap()).clone());
        }
        let mut counts: HashMap<&TableName, HashSet<&TableName>> = HashMap::new();
        for j in &self.joins {
            counts.entry(&j.parent().table).or_default().insert(&j.child().table);
        }
        counts
            .into_iter()
            .max_by_key(|(_, children)| children.len())
            .map(|(t, _)| t.clone())
            .ok_or_else(|| MapperError::mapping(Path::root(), "cannot determine a root table: no candidates and no joins"))
    }

    /// Step 7: order joins so each appears after the join (or root table) that introduces its
    /// parent table, by repeatedly admitting any join whose parent table is already reachable.
    fn order_joins(&self, root: &TableName) -> Result<Vec<Join>, MapperError> {
        let mut seen: HashSet<TableName> = HashSet::new();
        seen.insert(root.clone());
        let mut remaining: Vec<Join> = self.joins.clone();
        let mut ordered: Vec<Join> = Vec::new();
        while !remaining.is_empty() {
            let mut next_remaining = Vec::new();
            let mut progressed = false;
            for join in remaining {
                if seen.contains(&join.parent().table) {
                    seen.insert(join.child().table.clone());
                    ordered.push(join);
                    progressed = true;
                } else {
                    next_remaining.push(join);
                }
            }
            remaining = next_remaining;
            if !progressed {
                return Err(MapperError::mapping(
                    Path::root(),
                    "join topology is inconsistent: no join extends from the root table",
                ));
            }
        }
        Ok(ordered)
    }

    /// Step 8: per-column metadata, using the already-accumulated `visited_types` to find
    /// each column's backing field mapping.
    fn build_metas(&self, joins: &[Join]) -> Result<Vec<ColumnMeta>, MapperError> {
        let outer_join_tables: HashSet<&TableName> = joins.iter().map(|j| &j.child().table).collect();
        self.columns
            .iter()
            .map(|col| {
                let is_outer_join = outer_join_tables.contains(&col.table);
                let attribute_nullable = self.attribute_nullable(col)?;
                Ok(ColumnMeta { codec: col.codec.clone(), is_outer_join, nullable: is_outer_join || attribute_nullable })
            })
            .collect()
    }

    fn attribute_nullable(&self, col: &ColumnRef) -> Result<bool, MapperError> {
        for (path, type_name) in &self.visited_types {
            let Some(tm) = self.mapping.object_mapping_at(path, type_name) else { continue };
            let fields: &[FieldMapping] = match tm {
                TypeMapping::Object(om) => &om.fields,
                TypeMapping::Interface(im) => &im.fields,
                TypeMapping::Leaf(_) | TypeMapping::SqlLeaf(_) => continue,
            };
            for f in fields {
                if f.column() == Some(col) {
                    return Ok(matches!(f, FieldMapping::SqlAttribute { nullable: true, .. }));
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_schema::codec::int;
    use mapper_schema::mapping::ObjectMapping;

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
                FieldMapping::SqlObject {
                    name: "director".into(),
                    joins: vec![Join::new(
                        ColumnRef::new("movies", "director_id", int()),
                        ColumnRef::new("people", "id", int()),
                    )],
                    target_type: "Person".into(),
                },
            ],
        )));
        mapping.add(TypeMapping::Object(ObjectMapping::new(
            "Person",
            vec![FieldMapping::SqlField {
                name: "id".into(),
                column: ColumnRef::new("people", "id", int()),
                key: true,
                discriminator: false,
            }],
        )));
        Arc::new(mapping)
    }

    #[test]
    fn plans_a_simple_scalar_selection() {
        let mapping = movies_mapping();
        let query = Query::select("year", Query::Empty);
        let plan = MappedQuery::build(mapping, &query, Path::root(), "Movie".into()).unwrap();
        assert_eq!(plan.table().as_str(), "movies");
        assert!(plan.columns().iter().any(|c| c.column.as_str() == "year"));
    }

    #[test]
    fn plans_nested_object_selection_with_join() {
        let mapping = movies_mapping();
        let query = Query::select("director", Query::select("id", Query::Empty));
        let plan = MappedQuery::build(mapping, &query, Path::root(), "Movie".into()).unwrap();
        assert_eq!(plan.table().as_str(), "movies");
        assert_eq!(plan.joins().len(), 1);
        assert!(plan.metas()[plan.column_index(&ColumnRef::new("people", "id", int())).unwrap()].is_outer_join);
    }

    #[test]
    fn to_upper_and_lower_case_render_as_bare_function_calls() {
        let mapping = movies_mapping();
        let query = Query::Filter(
            Predicate::ToUpperCase(Term::path(Path::single("year"))),
            Box::new(Query::select("year", Query::Empty)),
        );
        let plan = MappedQuery::build(mapping.clone(), &query, Path::root(), "Movie".into()).unwrap();
        assert!(plan.fragment().unwrap().sql().contains("upper(movies.year)"));

        let query = Query::Filter(
            Predicate::ToLowerCase(Term::path(Path::single("year"))),
            Box::new(Query::select("year", Query::Empty)),
        );
        let plan = MappedQuery::build(mapping, &query, Path::root(), "Movie".into()).unwrap();
        assert!(plan.fragment().unwrap().sql().contains("lower(movies.year)"));
    }

    #[test]
    fn filter_on_unmapped_path_is_a_predicate_compilation_error() {
        let mapping = movies_mapping();
        let query = Query::Filter(
            Predicate::Eql(Term::path(Path::single("nonexistent")), Term::const_(1i64)),
            Box::new(Query::Empty),
        );
        let err = MappedQuery::build(mapping, &query, Path::root(), "Movie".into()).unwrap_err();
        assert!(matches!(err, MapperError::Mapping { .. }));
    }

    #[test]
    fn fragment_renders_select_from_where() {
        let mapping = movies_mapping();
        let query = Query::Filter(
            Predicate::Eql(Term::path(Path::single("year")), Term::const_(2014i64)),
            Box::new(Query::select("year", Query::Empty)),
        );
        let plan = MappedQuery::build(mapping, &query, Path::root(), "Movie".into()).unwrap();
        let fragment = plan.fragment().unwrap();
        assert!(fragment.sql().starts_with("SELECT "));
        assert!(fragment.sql().contains(" FROM movies"));
        assert!(fragment.sql().contains(" WHERE "));
        assert_eq!(fragment.binds().len(), 1);
    }

    #[test]
    fn mismatched_encoders_fail_predicate_compilation() {
        let mapping = movies_mapping();
        let query = Query::Filter(
            Predicate::Eql(Term::path(Path::single("year")), Term::path(Path::single("id"))),
            Box::new(Query::Empty),
        );
        let plan = MappedQuery::build(mapping.clone(), &query, Path::root(), "Movie".into());
        // `year` and `id` share the int codec here, so this should actually succeed; swap in
        // a genuinely mismatched pair to exercise the failure path.
        assert!(plan.is_ok());

        let mut mismatched = Mapping::new();
        mismatched.add(TypeMapping::Object(ObjectMapping::new(
            "Thing",
            vec![
                FieldMapping::SqlField {
                    name: "a".into(),
                    column: ColumnRef::new("t", "a", int()),
                    key: true,
                    discriminator: false,
                },
                FieldMapping::SqlField {
                    name: "b".into(),
                    column: ColumnRef::new("t", "b", mapper_schema::codec::string()),
                    key: false,
                    discriminator: false,
                },
            ],
        )));
        let query = Query::Filter(
            Predicate::Eql(Term::path(Path::single("a")), Term::path(Path::single("b"))),
            Box::new(Query::Empty),
        );
        let plan = MappedQuery::build(Arc::new(mismatched), &query, Path::root(), "Thing".into()).unwrap();
        assert!(matches!(
            plan.fragment().unwrap_err(),
            MapperError::PredicateCompilation { .. }
        ));
    }
}
