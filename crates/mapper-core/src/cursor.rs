//! The row-table cursor: interprets a fetched `Table` as a GraphQL value tree, one field or
//! list-step at a time, without ever re-running SQL (§4.G). A cursor is either focused on a
//! table (possibly many rows, not yet grouped into a list) or on a single decoded `Cell`;
//! narrowing, list expansion, and field selection all move between the two.

use std::sync::Arc;

use mapper_schema::error::MapperError;
use mapper_schema::mapping::{FieldMapping, TypeMapping};
use mapper_schema::value::{Cell, FieldName, Path, TypeName};

use crate::gql_type::Type;
use crate::planner::MappedQuery;
use crate::row::{Row, Table};

/// What a cursor is currently looking at: a (possibly multi-row, ungrouped) table, or a
/// single already-decoded leaf value.
#[derive(Clone)]
enum Focus {
    Table(Arc<Table>),
    Value(Cell),
}

#[derive(Clone)]
pub struct Cursor {
    path: Path,
    tpe: Type,
    focus: Focus,
    mapped: Arc<MappedQuery>,
}

impl Cursor {
    /// The cursor handed to the JSON assembler by the interpreter once a query has been
    /// fetched: rooted at `path` with the whole result table in focus.
    pub fn root(mapped: Arc<MappedQuery>, path: Path, tpe: Type, table: Table) -> Self {
        Cursor {
            path,
            tpe,
            focus: Focus::Table(Arc::new(table)),
            mapped,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.focus, Focus::Value(_))
    }

    pub fn as_leaf(&self) -> Result<Cell, MapperError> {
        match &self.focus {
            Focus::Value(c) => Ok(c.clone()),
            Focus::Table(_) => Err(MapperError::type_error(
                self.path.clone(),
                "cursor is not positioned on a leaf value",
            )),
        }
    }

    pub fn is_list(&self) -> bool {
        self.tpe.is_list()
    }

    /// Group the focused table by the item type's key columns (§4.G), dropping any row whose
    /// key projection contains a `FailedJoin` cell (an unmatched outer-join row contributes no
    /// list element), and ordering groups deterministically by their stringified key (I6).
    pub fn as_list(&self) -> Result<Vec<Cursor>, MapperError> {
        let item_type = self
            .tpe
            .item_type()
            .ok_or_else(|| MapperError::type_error(self.path.clone(), "cursor is not a list"))?
            .clone();
        let table = self.table()?;
        let item_type_name = item_type.underlying_object();

        if let Some(key_idxs) = self.mapped.key_indices(&self.path, item_type_name)? {
            let all_failed = !key_idxs.is_empty()
                && table
                    .rows
                    .iter()
                    .all(|row| key_idxs.iter().all(|&i| row.0[i].is_failed_join()));
            if all_failed {
                return Ok(Vec::new());
            }
        }

        let groups = self.mapped.group(&table, &self.path, item_type_name)?;
        Ok(groups
            .into_iter()
            .map(|group| Cursor {
                path: self.path.clone(),
                tpe: item_type.clone(),
                focus: Focus::Table(Arc::new(group)),
                mapped: self.mapped.clone(),
            })
            .collect())
    }

    /// `None` iff this is an empty list, or a single value that came from an unmatched outer
    /// join or was decoded as GraphQL null.
    pub fn as_nullable(&self) -> Result<Option<Cursor>, MapperError> {
        if self.tpe.is_list() {
            return Ok(if self.as_list()?.is_empty() {
                None
            } else {
                Some(self.clone())
            });
        }
        match &self.focus {
            Focus::Value(c) if c.is_failed_join() || c.is_null() => Ok(None),
            _ => Ok(Some(self.clone())),
        }
    }

    /// Attempt to narrow this (object-focused) cursor to `subtype`. Returns `None` if the row
    /// is not in fact an instance of `subtype`, per the interface-discriminator or
    /// key-column-presence rule appropriate to the current type's mapping.
    pub fn narrow(&self, subtype: &TypeName) -> Result<Option<Cursor>, MapperError> {
        let table = self.table()?;
        let current = self.tpe.underlying_object();
        let narrowed = |t: Type| Cursor {
            path: self.path.clone(),
            tpe: t,
            focus: Focus::Table(table.clone()),
            mapped: self.mapped.clone(),
        };

        match self.mapped.mapping().object_mapping(current) {
            Some(TypeMapping::Interface(iface)) => {
                let head = table.rows.first().ok_or_else(|| {
                    MapperError::type_error(self.path.clone(), "narrow on an empty table")
                })?;
                let mut fields = std::collections::HashMap::new();
                for fm in &iface.fields {
                    if fm.is_key() || fm.is_discriminator() {
                        if let Some(col) = fm.column() {
                            if let Some(idx) = self.mapped.column_index(col) {
                                fields.insert(fm.name().clone(), head.0[idx].clone());
                            }
                        }
                    }
                }
                let actual = self.mapped.mapping().discriminate(&self.path, current, &fields)?;
                if &actual == subtype {
                    Ok(Some(narrowed(Type::named(subtype.clone()))))
                } else {
                    Ok(None)
                }
            }
            _ => {
                let key_cols = self
                    .mapped
                    .mapping()
                    .object_mapping(subtype)
                    .ok_or_else(|| {
                        MapperError::mapping(
                            self.path.clone(),
                            format!("no object mapping for subtype {subtype}"),
                        )
                    })?
                    .key_columns();
                let idxs: Vec<usize> = key_cols
                    .iter()
                    .filter_map(|c| self.mapped.column_index(c))
                    .collect();
                let ok = !idxs.is_empty()
                    && table
                        .rows
                        .iter()
                        .all(|row| idxs.iter().all(|&i| !row.0[i].is_failed_join()));
                Ok(ok.then(|| narrowed(Type::named(subtype.clone()))))
            }
        }
    }

    /// Select a GraphQL field, with `field_type` supplied by the schema-aware caller (§1: full
    /// schema loading is out of this core's scope, so the assembler is the one who knows the
    /// declared type of the result).
    pub fn field(&self, name: &FieldName, field_type: Type) -> Result<Cursor, MapperError> {
        let type_name = self.tpe.underlying_object().clone();
        let fm = self.mapped.mapping().field_mapping_at(&self.path, &type_name, name)?;
        let child_path = self.path.push(name.clone());
        match fm {
            FieldMapping::SqlObject { .. } => Ok(Cursor {
                path: child_path,
                tpe: field_type,
                focus: self.focus.clone(),
                mapped: self.mapped.clone(),
            }),
            _ => {
                let cell = self.compute_field_cell(&type_name, name)?;
                Ok(Cursor {
                    path: child_path,
                    tpe: field_type,
                    focus: Focus::Value(cell),
                    mapped: self.mapped.clone(),
                })
            }
        }
    }

    pub fn has_attribute(&self, name: &FieldName) -> bool {
        let type_name = self.tpe.underlying_object();
        self.mapped
            .mapping()
            .field_mapping_at(&self.path, type_name, name)
            .map(FieldMapping::is_hidden)
            .unwrap_or(false)
    }

    pub fn attribute(&self, name: &FieldName) -> Result<Cell, MapperError> {
        let type_name = self.tpe.underlying_object().clone();
        self.compute_field_cell(&type_name, name)
    }

    /// Evaluate a predicate path against the current row, walking through nested `SqlObject`
    /// hops on the same (unjoined-further) table and resolving the final hop to a cell. Used
    /// for predicates over cursor-computed fields, which the SQL layer can't see (§4.E).
    pub fn eval_path(&self, path: &Path) -> Result<Cell, MapperError> {
        let mut cur = self.clone();
        for hop in &path.0 {
            cur = cur.step_same_table(hop)?;
        }
        cur.as_leaf()
    }

    fn step_same_table(&self, name: &FieldName) -> Result<Cursor, MapperError> {
        let type_name = self.tpe.underlying_object().clone();
        let fm = self.mapped.mapping().field_mapping_at(&self.path, &type_name, name)?;
        let child_path = self.path.push(name.clone());
        match fm {
            FieldMapping::SqlObject { target_type, .. } => Ok(Cursor {
                path: child_path,
                tpe: Type::named(target_type.clone()),
                focus: self.focus.clone(),
                mapped: self.mapped.clone(),
            }),
            _ => {
                let cell = self.compute_field_cell(&type_name, name)?;
                Ok(Cursor {
                    path: child_path,
                    tpe: Type::named(type_name),
                    focus: Focus::Value(cell),
                    mapped: self.mapped.clone(),
                })
            }
        }
    }

    fn compute_field_cell(&self, type_name: &TypeName, name: &FieldName) -> Result<Cell, MapperError> {
        let fm = self.mapped.mapping().field_mapping_at(&self.path, type_name, name)?;
        match fm {
            FieldMapping::SqlField { column, .. }
            | FieldMapping::SqlAttribute { column, .. }
            | FieldMapping::SqlJson { column, .. } => {
                let idx = self.mapped.column_index(column).ok_or_else(|| {
                    MapperError::mapping(
                        self.path.clone(),
                        format!("column {column} was not part of the plan"),
                    )
                })?;
                Ok(self.head_row()?.0[idx].clone())
            }
            FieldMapping::CursorField { compute, required_siblings, .. }
            | FieldMapping::CursorAttribute { compute, required_siblings, .. } => {
                let values = required_siblings
                    .iter()
                    .map(|sib| self.compute_field_cell(type_name, sib))
                    .collect::<Result<Vec<_>, _>>()?;
                compute(&values)
            }
            FieldMapping::SqlObject { .. } => Err(MapperError::type_error(
                self.path.clone(),
                format!("field `{name}` is an object field, not a scalar cell"),
            )),
        }
    }

    fn table(&self) -> Result<Arc<Table>, MapperError> {
        match &self.focus {
            Focus::Table(t) => Ok(t.clone()),
            Focus::Value(_) => Err(MapperError::type_error(
                self.path.clone(),
                "cursor is positioned on a leaf value, not a table",
            )),
        }
    }

    fn head_row(&self) -> Result<&Row, MapperError> {
        match &self.focus {
            Focus::Table(t) => t
                .rows
                .first()
                .ok_or_else(|| MapperError::type_error(self.path.clone(), "table has no rows")),
            Focus::Value(_) => Err(MapperError::type_error(
                self.path.clone(),
                "cursor is positioned on a leaf value, not a table",
            )),
        }
    }
}
