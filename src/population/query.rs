//! Row filters for population views.

use std::cmp::Ordering;

use crate::value::Value;

/// Comparison operator of a query clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    /// Whether `ordering` (cell compared to the clause value) satisfies the operator.
    ///
    /// Unordered pairs (NaN, not-a-time, mismatched kinds) only satisfy `Ne`.
    #[must_use]
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Ne, None) => true,
            (_, None) => false,
            (Self::Eq, Some(o)) => o == Ordering::Equal,
            (Self::Ne, Some(o)) => o != Ordering::Equal,
            (Self::Lt, Some(o)) => o == Ordering::Less,
            (Self::Le, Some(o)) => o != Ordering::Greater,
            (Self::Gt, Some(o)) => o == Ordering::Greater,
            (Self::Ge, Some(o)) => o != Ordering::Less,
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// One `column <op> value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub column: String,
    pub op: Comparison,
    pub value: Value,
}

/// A conjunction of clauses restricting which rows a view returns.
///
/// # Examples
///
/// ```
/// use microsim::population::Query;
///
/// let living_adults = Query::new().eq("alive", true).ge("age", 18.0);
/// assert_eq!(living_adults.to_string(), "alive == true and age >= 18");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn clause(mut self, column: &str, op: Comparison, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.clause(column, Comparison::Eq, value)
    }

    #[must_use]
    pub fn ne(self, column: &str, value: impl Into<Value>) -> Self {
        self.clause(column, Comparison::Ne, value)
    }

    #[must_use]
    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.clause(column, Comparison::Lt, value)
    }

    #[must_use]
    pub fn le(self, column: &str, value: impl Into<Value>) -> Self {
        self.clause(column, Comparison::Le, value)
    }

    #[must_use]
    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.clause(column, Comparison::Gt, value)
    }

    #[must_use]
    pub fn ge(self, column: &str, value: impl Into<Value>) -> Self {
        self.clause(column, Comparison::Ge, value)
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluates the query against one row, reading cells through `cell`.
    pub(crate) fn matches<E>(
        &self,
        mut cell: impl FnMut(&str) -> Result<Value, E>,
    ) -> Result<bool, E> {
        for clause in &self.clauses {
            let value = cell(&clause.column)?;
            if !clause.op.holds(value.compare(&clause.value)) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, c) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" and ")?;
            }
            write!(f, "{} {} {}", c.column, c.op.symbol(), c.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_semantics() {
        assert!(Comparison::Le.holds(Some(Ordering::Equal)));
        assert!(!Comparison::Lt.holds(Some(Ordering::Equal)));
        assert!(Comparison::Ne.holds(None));
        assert!(!Comparison::Eq.holds(None));
    }

    #[test]
    fn conjunction() {
        let q = Query::new().eq("sex", "Female").lt("age", 60.0);
        let row = |col: &str| -> Result<Value, ()> {
            Ok(match col {
                "sex" => Value::from("Female"),
                _ => Value::Float(45.0),
            })
        };
        assert!(q.matches(row).unwrap());

        let q = q.gt("age", 50.0);
        assert!(!q.matches(row).unwrap());
    }
}
