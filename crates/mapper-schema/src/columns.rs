//! `ColumnRef` and `Join`: the typed vocabulary the planner uses instead of ad hoc
//! `catalog.schema.table` string formatting.

use crate::codec::CodecRef;
use crate::value::{ColumnName, TableName};

/// A reference to a single SQL column, carrying its codec as metadata.
///
/// Equality and hashing are `(table, column)` only — the codec is not part of identity, so
/// two `ColumnRef`s naming the same physical column dedupe correctly even if constructed via
/// different mapping entries. The invariant this relies on (same `(table, column)` always
/// carries the same codec within one mapping) is the mapping registry's job to uphold.
#[derive(Clone, Debug)]
pub struct ColumnRef {
    pub table: TableName,
    pub column: ColumnName,
    pub codec: CodecRef,
}

impl ColumnRef {
    pub fn new(table: impl Into<TableName>, column: impl Into<ColumnName>, codec: CodecRef) -> Self {
        ColumnRef {
            table: table.into(),
            column: column.into(),
            codec,
        }
    }

    fn key(&self) -> (&TableName, &ColumnName) {
        (&self.table, &self.column)
    }
}

impl PartialEq for ColumnRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for ColumnRef {}

impl PartialOrd for ColumnRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ColumnRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::hash::Hash for ColumnRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A `LEFT JOIN child.table ON parent = child` edge between two columns.
///
/// `parent`/`child` keep their direction, for §4.E's join ordering and for `render`. Equality,
/// hashing, and ordering instead go through `normal_form`: the two endpoints sorted
/// lexicographically by `(table, column)`. `Join(a,b)` and `Join(b,a)` compare equal.
#[derive(Clone, Debug)]
pub struct Join {
    parent: ColumnRef,
    child: ColumnRef,
}

impl Join {
    pub fn new(parent: ColumnRef, child: ColumnRef) -> Self {
        Join { parent, child }
    }

    pub fn parent(&self) -> &ColumnRef {
        &self.parent
    }

    pub fn child(&self) -> &ColumnRef {
        &self.child
    }

    fn normal_form(&self) -> [(&TableName, &ColumnName); 2] {
        let mut endpoints = [self.parent.key(), self.child.key()];
        endpoints.sort();
        endpoints
    }

    /// Render as `LEFT JOIN <child.table> ON <parent> = <child>`, per §3's fixed rendering rule.
    pub fn render(&self) -> String {
        format!(
            "LEFT JOIN {} ON {} = {}",
            self.child().table,
            self.parent(),
            self.child()
        )
    }
}

impl PartialEq for Join {
    fn eq(&self, other: &Self) -> bool {
        self.normal_form() == other.normal_form()
    }
}
impl Eq for Join {}

impl PartialOrd for Join {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Join {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.normal_form().cmp(&other.normal_form())
    }
}

impl std::hash::Hash for Join {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normal_form().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::int;

    fn col(table: &str, column: &str) -> ColumnRef {
        ColumnRef::new(table, column, int())
    }

    #[test]
    fn column_ref_equality_ignores_codec() {
        let a = ColumnRef::new("movies", "id", int());
        let b = ColumnRef::new("movies", "id", crate::codec::string());
        assert_eq!(a, b);
    }

    #[test]
    fn join_dedups_when_rediscovered_with_same_direction() {
        let a = col("movies", "id");
        let b = col("credits", "movie_id");
        let j1 = Join::new(a.clone(), b.clone());
        let j2 = Join::new(a, b);
        assert_eq!(j1, j2);
        assert_eq!(j1.parent().table.as_str(), "movies");
        assert_eq!(j1.child().table.as_str(), "credits");
    }

    #[test]
    fn join_dedups_reciprocal_relationships() {
        // `Person.manager` (people.manager_id -> people.id) and `Person.reports`
        // (people.id -> people.manager_id) describe the same physical edge from opposite
        // sides; their normal form must agree regardless of which side is `parent`.
        let manager_join = Join::new(col("people", "manager_id"), col("people", "id"));
        let reports_join = Join::new(col("people", "id"), col("people", "manager_id"));
        assert_eq!(manager_join, reports_join);

        let mut set = std::collections::HashSet::new();
        set.insert(manager_join);
        set.insert(reports_join);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn join_renders_left_join() {
        let j = Join::new(col("movies", "id"), col("credits", "movie_id"));
        assert_eq!(
            j.render(),
            "LEFT JOIN credits ON movies.id = credits.movie_id"
        );
    }
}
