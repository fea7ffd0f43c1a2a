//! Multi-key sort specification parsed from `"age desc, price asc"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Sort direction of one order key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    /// Lowercase token.
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One `path [direction]` entry.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OrderByItem {
    /// Dot-separated attribute path.
    pub path: String,
    /// Explicit direction; `None` leaves the backend default (ascending).
    pub direction: Option<SortDirection>,
}

impl OrderByItem {
    /// True when the key sorts descending.
    pub fn is_desc(&self) -> bool {
        self.direction == Some(SortDirection::Desc)
    }
}

/// Ordered list of sort keys: primary first.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OrderByClause {
    items: Vec<OrderByItem>,
}

impl OrderByClause {
    /// Parses a comma-separated order specification.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut items = Vec::new();
        for part in spec.split(',') {
            let mut tokens = part.split_whitespace();
            let Some(path) = tokens.next() else {
                continue;
            };
            let direction = match tokens.next() {
                None => None,
                Some(token) => Some(parse_direction(path, token)?),
            };
            if let Some(extra) = tokens.next() {
                return Err(QueryError::InvalidOrderDirection {
                    path: path.to_owned(),
                    direction: extra.to_owned(),
                });
            }
            items.push(OrderByItem {
                path: path.to_owned(),
                direction,
            });
        }
        if items.is_empty() {
            return Err(QueryError::EmptyOrderBy);
        }
        Ok(Self { items })
    }

    /// Sort keys in significance order.
    pub fn items(&self) -> &[OrderByItem] {
        &self.items
    }

    /// Number of sort keys.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false for a parsed clause; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn parse_direction(path: &str, token: &str) -> Result<SortDirection> {
    match token.to_ascii_lowercase().as_str() {
        "asc" => Ok(SortDirection::Asc),
        "desc" => Ok(SortDirection::Desc),
        _ => Err(QueryError::InvalidOrderDirection {
            path: path.to_owned(),
            direction: token.to_owned(),
        }),
    }
}

impl FromStr for OrderByClause {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OrderByClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, item) in self.items.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&item.path)?;
            if let Some(direction) = item.direction {
                write!(f, " {}", direction.as_str())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_declared_order_and_directions() {
        let clause = OrderByClause::parse("age desc, price asc,name").unwrap();
        let items = clause.items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].path, "age");
        assert_eq!(items[0].direction, Some(SortDirection::Desc));
        assert_eq!(items[1].direction, Some(SortDirection::Asc));
        assert_eq!(items[2].direction, None);
        assert_eq!(clause.to_string(), "age desc, price asc, name");
    }

    #[test]
    fn blank_specs_are_rejected() {
        assert_eq!(OrderByClause::parse("").unwrap_err(), QueryError::EmptyOrderBy);
        assert_eq!(OrderByClause::parse("  , ").unwrap_err(), QueryError::EmptyOrderBy);
    }

    #[test]
    fn unknown_direction_is_rejected() {
        let err = OrderByClause::parse("age sideways").unwrap_err();
        assert_eq!(err.code(), "InvalidOrderDirection");
    }
}
