//! The Predicate algebra: boolean/arithmetic/string predicates over `Term`s (constants or
//! field paths). Each node exposes `paths()` (used by the planner to discover required
//! columns) and a post-SQL evaluator over a cursor (used for predicates on cursor-computed
//! fields, which can't be pushed into SQL).

use mapper_schema::codec::CodecRef;
use mapper_schema::error::MapperError;
use mapper_schema::value::{Cell, Path};

use crate::cursor::Cursor;

#[derive(Clone, Debug)]
pub enum Term {
    Const(Cell),
    Path(Path),
}

impl Term {
    pub fn path(path: Path) -> Self {
        Term::Path(path)
    }

    pub fn const_(cell: impl Into<Cell>) -> Self {
        Term::Const(cell.into())
    }

    /// A path term is field-valued if every hop names a field rather than a hidden attribute;
    /// the planner resolves that distinction via the mapping, so this just reports whether
    /// the term is a path at all — callers combine it with a mapping lookup.
    pub fn is_path(&self) -> bool {
        matches!(self, Term::Path(_))
    }

    pub fn paths(&self) -> Vec<Path> {
        match self {
            Term::Const(_) => Vec::new(),
            Term::Path(p) => vec![p.clone()],
        }
    }

    fn eval(&self, cursor: &Cursor) -> Result<Cell, MapperError> {
        match self {
            Term::Const(c) => Ok(c.clone()),
            Term::Path(path) => cursor.eval_path(path),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Eql(Term, Term),
    NEql(Term, Term),
    Lt(Term, Term),
    LtEql(Term, Term),
    Gt(Term, Term),
    GtEql(Term, Term),
    In(Term, Vec<Cell>),
    Contains(Term, Term),
    Like {
        term: Term,
        pattern: String,
        case_insensitive: bool,
    },
    StartsWith(Term, String),
    Matches(Term, String),
    AndB(Term, Term),
    OrB(Term, Term),
    XorB(Term, Term),
    NotB(Term),
    ToUpperCase(Term),
    ToLowerCase(Term),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// `And` of a non-empty list of predicates, right-folded; panics only on an empty slice,
    /// which callers never pass (an empty conjunction is represented as `Option::None` by
    /// convention at call sites, not as a `Predicate`).
    pub fn and_all(mut preds: Vec<Predicate>) -> Option<Predicate> {
        if preds.is_empty() {
            return None;
        }
        let mut it = preds.drain(..);
        let first = it.next().unwrap();
        Some(it.fold(first, Predicate::and))
    }

    /// The set of paths this predicate references, recursively, used by the planner to
    /// determine required columns (§4.E step 4).
    pub fn paths(&self) -> Vec<Path> {
        match self {
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                let mut v = a.paths();
                v.extend(b.paths());
                v
            }
            Predicate::Not(p) => p.paths(),
            Predicate::Eql(a, b)
            | Predicate::NEql(a, b)
            | Predicate::Lt(a, b)
            | Predicate::LtEql(a, b)
            | Predicate::Gt(a, b)
            | Predicate::GtEql(a, b)
            | Predicate::Contains(a, b)
            | Predicate::AndB(a, b)
            | Predicate::OrB(a, b)
            | Predicate::XorB(a, b) => {
                let mut v = a.paths();
                v.extend(b.paths());
                v
            }
            Predicate::In(t, _) => t.paths(),
            Predicate::Like { term, .. } => term.paths(),
            Predicate::StartsWith(t, _) | Predicate::Matches(t, _) => t.paths(),
            Predicate::NotB(t) | Predicate::ToUpperCase(t) | Predicate::ToLowerCase(t) => t.paths(),
        }
    }

    /// Evaluate the predicate against a materialised cursor (used for predicates on
    /// cursor-computed fields, which the SQL layer can't see).
    pub fn eval(&self, cursor: &Cursor) -> Result<bool, MapperError> {
        Ok(match self {
            Predicate::And(a, b) => a.eval(cursor)? && b.eval(cursor)?,
            Predicate::Or(a, b) => a.eval(cursor)? || b.eval(cursor)?,
            Predicate::Not(p) => !p.eval(cursor)?,
            Predicate::Eql(a, b) => a.eval(cursor)? == b.eval(cursor)?,
            Predicate::NEql(a, b) => a.eval(cursor)? != b.eval(cursor)?,
            Predicate::Lt(a, b) => compare(&a.eval(cursor)?, &b.eval(cursor)?) == Some(std::cmp::Ordering::Less),
            Predicate::LtEql(a, b) => {
                matches!(
                    compare(&a.eval(cursor)?, &b.eval(cursor)?),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                )
            }
            Predicate::Gt(a, b) => compare(&a.eval(cursor)?, &b.eval(cursor)?) == Some(std::cmp::Ordering::Greater),
            Predicate::GtEql(a, b) => {
                matches!(
                    compare(&a.eval(cursor)?, &b.eval(cursor)?),
                    Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                )
            }
            Predicate::In(t, vs) => {
                let value = t.eval(cursor)?;
                vs.iter().any(|v| *v == value)
            }
            Predicate::Contains(a, b) => a.eval(cursor)? == b.eval(cursor)?,
            Predicate::Like { term, pattern, case_insensitive } => {
                let value = term.eval(cursor)?;
                match value.as_str() {
                    Some(s) => like_match(s, pattern, *case_insensitive),
                    None => false,
                }
            }
            Predicate::StartsWith(t, prefix) => {
                matches!(t.eval(cursor)?.as_str(), Some(s) if s.starts_with(prefix.as_str()))
            }
            Predicate::Matches(t, pattern) => {
                matches!(t.eval(cursor)?.as_str(), Some(s) if like_match(s, pattern, false))
            }
            Predicate::AndB(a, b) => int_op(&a.eval(cursor)?, &b.eval(cursor)?, |x, y| x & y) != 0,
            Predicate::OrB(a, b) => int_op(&a.eval(cursor)?, &b.eval(cursor)?, |x, y| x | y) != 0,
            Predicate::XorB(a, b) => int_op(&a.eval(cursor)?, &b.eval(cursor)?, |x, y| x ^ y) != 0,
            Predicate::NotB(t) => t.eval(cursor)?.as_i64().map(|v| !v).unwrap_or(0) != 0,
            Predicate::ToUpperCase(t) => t
                .eval(cursor)?
                .as_str()
                .map(|s| !s.is_empty() && s == s.to_uppercase())
                .unwrap_or(false),
            Predicate::ToLowerCase(t) => t
                .eval(cursor)?
                .as_str()
                .map(|s| !s.is_empty() && s == s.to_lowercase())
                .unwrap_or(false),
        })
    }
}

fn compare(a: &Cell, b: &Cell) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

fn int_op(a: &Cell, b: &Cell, f: impl Fn(i64, i64) -> i64) -> i64 {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => f(x, y),
        _ => 0,
    }
}

/// A minimal SQL-`LIKE` matcher (`%`/`_` wildcards only) used for post-SQL evaluation of
/// `Like`/`Matches` predicates over cursor-computed fields.
fn like_match(value: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (value, pattern) = if case_insensitive {
        (value.to_lowercase(), pattern.to_lowercase())
    } else {
        (value.to_string(), pattern.to_string())
    };
    like_match_chars(value.as_bytes(), pattern.as_bytes())
}

fn like_match_chars(value: &[u8], pattern: &[u8]) -> bool {
    match pattern.first() {
        None => value.is_empty(),
        Some(b'%') => {
            (0..=value.len()).any(|i| like_match_chars(&value[i..], &pattern[1..]))
        }
        Some(b'_') => !value.is_empty() && like_match_chars(&value[1..], &pattern[1..]),
        Some(c) => value.first() == Some(c) && like_match_chars(&value[1..], &pattern[1..]),
    }
}

/// A term, together with the `CodecRef` the planner decided should encode it, used when
/// compiling a predicate into a bound `Fragment` (§4.E's encoder-unification rule).
#[derive(Clone, Debug)]
pub struct EncodedTerm {
    pub term: Term,
    pub codec: Option<CodecRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_collects_recursively() {
        let p = Predicate::And(
            Box::new(Predicate::Eql(
                Term::path(Path::single("title")),
                Term::const_("Arrival"),
            )),
            Box::new(Predicate::Gt(
                Term::path(Path::single("year")),
                Term::const_(2000i64),
            )),
        );
        let paths = p.paths();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn like_match_supports_percent_wildcard() {
        assert!(like_match("arrival", "arr%", false));
        assert!(!like_match("arrival", "dep%", false));
    }

    #[test]
    fn and_all_folds_left_to_right() {
        let preds = vec![
            Predicate::Eql(Term::const_(1i64), Term::const_(1i64)),
            Predicate::Eql(Term::const_(2i64), Term::const_(2i64)),
        ];
        assert!(Predicate::and_all(preds).is_some());
        assert!(Predicate::and_all(Vec::new()).is_none());
    }
}
