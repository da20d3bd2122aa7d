//! Cell values stored in the population table.
//!
//! A `Value` is a single cell; columns store homogeneous vectors of the
//! same kinds (see [`crate::population::Column`]).

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::fractional_year;

/// The semantic type of a column or cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Continuous numeric values.
    Float,
    /// Integer counts.
    Int,
    /// Boolean flags.
    Bool,
    /// Categorical labels.
    Category,
    /// Optional UTC timestamps.
    Time,
}

impl ColumnKind {
    /// Human readable name of the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Category => "category",
            Self::Time => "time",
        }
    }

    /// Whether values of this kind can be used as interpolation coordinates.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value.
///
/// # Examples
///
/// ```
/// use microsim::{ColumnKind, Value};
///
/// let age = Value::Float(42.5);
/// let sex = Value::Category("Female".to_string());
///
/// assert_eq!(age.kind(), ColumnKind::Float);
/// assert_eq!(sex.as_category(), Some("Female"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Category(String),
    /// `None` is "not a time".
    Time(Option<DateTime<Utc>>),
}

impl Value {
    /// The column kind this value belongs to.
    #[must_use]
    pub const fn kind(&self) -> ColumnKind {
        match self {
            Self::Float(_) => ColumnKind::Float,
            Self::Int(_) => ColumnKind::Int,
            Self::Bool(_) => ColumnKind::Bool,
            Self::Category(_) => ColumnKind::Category,
            Self::Time(_) => ColumnKind::Time,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            Self::Category(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(v) => *v,
            _ => None,
        }
    }

    /// Numeric view of the value, used for interpolation coordinates.
    ///
    /// Times convert to fractional years; not-a-time and categories have
    /// no numeric value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Time(Some(t)) => Some(fractional_year(*t)),
            Self::Time(None) | Self::Category(_) => None,
        }
    }

    /// String form used to match lookup buckets exactly.
    #[must_use]
    pub fn key_string(&self) -> String {
        match self {
            Self::Float(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Category(v) => v.clone(),
            Self::Time(Some(t)) => t.to_rfc3339(),
            Self::Time(None) => "NaT".to_string(),
        }
    }

    /// Ordering between two values of compatible kinds.
    ///
    /// Numeric kinds compare numerically with each other; other kinds only
    /// compare with themselves. Not-a-time is unordered.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Category(a), Self::Category(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Time(Some(a)), Self::Time(Some(b))) => Some(a.cmp(b)),
            (Self::Time(_), Self::Time(_)) => None,
            (a, b) if a.kind().is_numeric() && b.kind().is_numeric() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_string())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Category(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Category(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(Some(v))
    }
}
