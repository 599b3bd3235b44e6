//! The Fragment builder: an accumulator for parameterised SQL text with typed bind slots.
//!
//! A `Fragment` is opaque outside this module: `(sqlText, binds)`, with an associative `+`
//! and an identity element, so the planner can build up a statement purely by concatenation
//! without ever formatting a value into the SQL string directly. Every `Const` in a predicate
//! ends up as a bind, never as inline text — that's the whole point of the contract.

use mapper_schema::codec::CodecRef;
use mapper_schema::value::Cell;

/// One bound parameter: the cell value plus the codec used to encode it for the driver.
#[derive(Clone, Debug)]
pub struct Bind {
    pub value: Cell,
    pub codec: CodecRef,
}

#[derive(Clone, Debug, Default)]
pub struct Fragment {
    sql: String,
    binds: Vec<Bind>,
}

impl Fragment {
    pub fn empty() -> Self {
        Fragment::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &[Bind] {
        &self.binds
    }

    pub fn into_parts(self) -> (String, Vec<Bind>) {
        (self.sql, self.binds)
    }

    /// Literal SQL text, no binds.
    pub fn const_(sql: impl Into<String>) -> Self {
        Fragment {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    /// One bind slot (`?`), with the value and encoder that will produce its parameter.
    pub fn bind(value: Cell, codec: CodecRef) -> Self {
        Fragment {
            sql: "?".to_string(),
            binds: vec![Bind { value, codec }],
        }
    }

    pub fn append(mut self, other: Fragment) -> Self {
        self.sql.push_str(&other.sql);
        self.binds.extend(other.binds);
        self
    }

    pub fn concat(fragments: impl IntoIterator<Item = Fragment>, sep: &str) -> Fragment {
        let mut out = Fragment::empty();
        let mut first = true;
        for fragment in fragments {
            if !first {
                out = out.append(Fragment::const_(sep));
            }
            first = false;
            out = out.append(fragment);
        }
        out
    }

    /// Join non-empty fragments with `AND`, each wrapped in parentheses; empty input yields
    /// the identity (empty fragment), so callers can always append the result unconditionally.
    pub fn and_opt(fragments: impl IntoIterator<Item = Fragment>) -> Fragment {
        bool_op_opt(fragments, " AND ")
    }

    pub fn or_opt(fragments: impl IntoIterator<Item = Fragment>) -> Fragment {
        bool_op_opt(fragments, " OR ")
    }

    /// Prefix with `WHERE` only if at least one of `fragments` is non-empty.
    pub fn where_and_opt(fragments: impl IntoIterator<Item = Fragment>) -> Fragment {
        let body = Fragment::and_opt(fragments);
        if body.is_empty() {
            Fragment::empty()
        } else {
            Fragment::const_(" WHERE ").append(body)
        }
    }

    /// `col IN (?, ?, …)`. An empty `values` list is the caller's responsibility to avoid —
    /// the planner treats it as a predicate-compilation failure (§4.E's compilation table).
    pub fn in_list(
        column_sql: impl Into<String>,
        values: impl IntoIterator<Item = Cell>,
        codec: CodecRef,
    ) -> Option<Fragment> {
        let binds: Vec<Fragment> = values
            .into_iter()
            .map(|v| Fragment::bind(v, codec.clone()))
            .collect();
        if binds.is_empty() {
            return None;
        }
        Some(
            Fragment::const_(format!("{} IN (", column_sql.into()))
                .append(Fragment::concat(binds, ", "))
                .append(Fragment::const_(")")),
        )
    }
}

fn bool_op_opt(fragments: impl IntoIterator<Item = Fragment>, op: &str) -> Fragment {
    let parenthesised: Vec<Fragment> = fragments
        .into_iter()
        .filter(|f| !f.is_empty())
        .map(|f| Fragment::const_("(").append(f).append(Fragment::const_(")")))
        .collect();
    if parenthesised.is_empty() {
        Fragment::empty()
    } else {
        Fragment::concat(parenthesised, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_schema::codec::int;

    #[test]
    fn where_and_opt_is_empty_when_no_predicates() {
        assert!(Fragment::where_and_opt(Vec::new()).is_empty());
    }

    #[test]
    fn where_and_opt_prefixes_and_parenthesises() {
        let f = Fragment::where_and_opt(vec![
            Fragment::const_("a = 1"),
            Fragment::const_("b = 2"),
        ]);
        assert_eq!(f.sql(), " WHERE (a = 1) AND (b = 2)");
    }

    #[test]
    fn in_list_binds_each_value() {
        let f = Fragment::in_list(
            "movies.id",
            vec![Cell::I64(1), Cell::I64(2)],
            int(),
        )
        .unwrap();
        assert_eq!(f.sql(), "movies.id IN (?, ?)");
        assert_eq!(f.binds().len(), 2);
    }

    #[test]
    fn in_list_with_no_values_fails() {
        assert!(Fragment::in_list("movies.id", Vec::new(), int()).is_none());
    }
}
