//! Filter predicate tree.
//!
//! Predicates are immutable values: combinators such as [`Predicate::and`]
//! return new trees. `Complex` and `Detail` are the only recursive nodes, and
//! equality is structural.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};
use crate::query::date::{DateService, Rfc3339Dates};
use crate::query::value::Value;

/// Comparison operator of simple and date predicates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleOp {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Strictly greater.
    Ge,
    /// Greater or equal.
    Geq,
    /// Strictly less.
    Le,
    /// Less or equal.
    Leq,
}

impl SimpleOp {
    /// Tests an ordering `actual.cmp(expected)` against the operator.
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            SimpleOp::Eq => ord == Ordering::Equal,
            SimpleOp::Neq => ord != Ordering::Equal,
            SimpleOp::Ge => ord == Ordering::Greater,
            SimpleOp::Geq => ord != Ordering::Less,
            SimpleOp::Le => ord == Ordering::Less,
            SimpleOp::Leq => ord != Ordering::Greater,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            SimpleOp::Eq => "eq",
            SimpleOp::Neq => "neq",
            SimpleOp::Ge => "ge",
            SimpleOp::Geq => "geq",
            SimpleOp::Le => "le",
            SimpleOp::Leq => "leq",
        }
    }
}

impl FromStr for SimpleOp {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "eq" | "==" | "=" => Ok(SimpleOp::Eq),
            "neq" | "!=" | "<>" => Ok(SimpleOp::Neq),
            "ge" | ">" => Ok(SimpleOp::Ge),
            "geq" | ">=" => Ok(SimpleOp::Geq),
            "le" | "<" => Ok(SimpleOp::Le),
            "leq" | "<=" => Ok(SimpleOp::Leq),
            other => Err(QueryError::invalid(format!("unknown operator '{other}'"))),
        }
    }
}

impl fmt::Display for SimpleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical connective of a complex predicate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Every child must hold.
    And,
    /// At least one child must hold.
    Or,
}

/// One side of a comparison: either an attribute reference or a constant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "param", content = "v", rename_all = "snake_case")]
pub enum Param {
    /// Dot-separated attribute path resolved against the queried type.
    Attribute(String),
    /// Literal value.
    Const(Value),
}

impl Param {
    /// Wraps an attribute path.
    pub fn attribute(path: impl Into<String>) -> Self {
        Param::Attribute(path.into())
    }

    /// Wraps a literal value.
    pub fn constant(value: impl Into<Value>) -> Self {
        Param::Const(value.into())
    }

    /// Returns the attribute path when this is an attribute reference.
    pub fn as_attribute(&self) -> Option<&str> {
        match self {
            Param::Attribute(path) => Some(path),
            Param::Const(_) => None,
        }
    }

    /// Returns the literal when this is a constant.
    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Param::Const(value) => Some(value),
            Param::Attribute(_) => None,
        }
    }
}

/// Bare strings on the left of a comparison name attributes.
impl From<&str> for Param {
    fn from(path: &str) -> Self {
        Param::Attribute(path.to_owned())
    }
}

impl From<String> for Param {
    fn from(path: String) -> Self {
        Param::Attribute(path)
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::Const(value)
    }
}

/// `left op right` comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimplePredicate {
    /// Left operand.
    pub left: Param,
    /// Operator.
    pub op: SimpleOp,
    /// Right operand.
    pub right: Param,
}

impl SimplePredicate {
    /// Attribute path on the left, when the left side is an attribute.
    pub fn attribute_path(&self) -> Option<&str> {
        self.left.as_attribute()
    }

    /// Literal on the right, when the right side is a constant.
    pub fn value(&self) -> Option<&Value> {
        self.right.as_const()
    }
}

/// Comparison whose constant side must be a valid instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatePredicate {
    /// Left operand.
    pub left: Param,
    /// Operator.
    pub op: SimpleOp,
    /// Right operand.
    pub right: Param,
    /// Compare the calendar date only.
    #[serde(default)]
    pub timeless: bool,
}

/// And/Or over two or more children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplexPredicate {
    condition: Condition,
    predicates: Vec<Predicate>,
}

impl ComplexPredicate {
    /// Builds a complex predicate; fewer than two children is rejected.
    pub fn new(condition: Condition, predicates: Vec<Predicate>) -> Result<Self> {
        if predicates.len() < 2 {
            return Err(QueryError::TooFewPredicates {
                count: predicates.len(),
            });
        }
        Ok(Self {
            condition,
            predicates,
        })
    }

    /// Connective joining the children.
    pub fn condition(&self) -> Condition {
        self.condition
    }

    /// Children in declaration order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

/// Case-insensitive substring test on a string attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringPredicate {
    /// Attribute path.
    pub path: String,
    /// Substring to look for.
    pub contains: String,
}

/// Flavor of spatial literal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialKind {
    /// Round-earth coordinates.
    Geography,
    /// Flat-earth coordinates.
    Geometry,
}

/// Spatial test applied to an attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum SpatialOp {
    /// Attribute intersects the literal shape.
    Intersects {
        /// Shape in well-known text.
        value: String,
    },
    /// Distance between the attribute and the literal compared to a number.
    Distance {
        /// Shape in well-known text.
        value: String,
        /// Comparison applied to the distance.
        op: SimpleOp,
        /// Distance to compare against.
        distance: f64,
    },
}

/// Spatial predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialPredicate {
    /// Literal flavor.
    pub kind: SpatialKind,
    /// Attribute path.
    pub path: String,
    /// Spatial test.
    pub op: SpatialOp,
}

/// Quantifier over a detail collection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    /// Every item satisfies the inner predicate.
    All,
    /// At least one item satisfies the inner predicate.
    Any,
}

/// Quantified predicate over a related collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailPredicate {
    /// Path of the hasMany relationship.
    pub path: String,
    /// Quantifier applied to the collection.
    pub quantifier: Quantifier,
    /// Predicate evaluated against each item, relative to the detail type.
    pub predicate: Box<Predicate>,
}

/// Type assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsOfPredicate {
    /// Asserted expression; `None` asserts on the current record.
    pub expression: Option<String>,
    /// Type name to assert.
    pub type_name: String,
}

/// Node in the filter condition tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Predicate {
    /// Scalar comparison.
    Simple(SimplePredicate),
    /// Date comparison.
    Date(DatePredicate),
    /// And/Or group.
    Complex(ComplexPredicate),
    /// Substring test.
    String(StringPredicate),
    /// Spatial test.
    Spatial(SpatialPredicate),
    /// Quantified collection test.
    Detail(DetailPredicate),
    /// Negation.
    Not(Box<Predicate>),
    /// Type assertion.
    IsOf(IsOfPredicate),
    /// Always true.
    True,
    /// Always false.
    False,
}

impl Predicate {
    /// `path op value` sugar: the left side is an attribute, the right a literal.
    pub fn simple(path: impl Into<Param>, op: SimpleOp, value: impl Into<Value>) -> Self {
        Predicate::Simple(SimplePredicate {
            left: path.into(),
            op,
            right: Param::Const(value.into()),
        })
    }

    /// Fully explicit comparison between two parameters.
    pub fn compare(left: Param, op: SimpleOp, right: Param) -> Self {
        Predicate::Simple(SimplePredicate { left, op, right })
    }

    /// Date comparison. Constant operands must parse as instants.
    pub fn date(
        left: impl Into<Param>,
        op: SimpleOp,
        right: impl Into<Param>,
        timeless: bool,
    ) -> Result<Self> {
        let predicate = DatePredicate {
            left: left.into(),
            op,
            right: right.into(),
            timeless,
        };
        check_date_operand(&predicate.left)?;
        check_date_operand(&predicate.right)?;
        Ok(Predicate::Date(predicate))
    }

    /// Complex predicate with the given connective.
    pub fn complex(condition: Condition, predicates: Vec<Predicate>) -> Result<Self> {
        ComplexPredicate::new(condition, predicates).map(Predicate::Complex)
    }

    /// Case-insensitive substring test.
    pub fn contains(path: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::String(StringPredicate {
            path: path.into(),
            contains: value.into(),
        })
    }

    /// Negates a predicate.
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    /// Asserts the current record is of `type_name`.
    pub fn is_of(type_name: impl Into<String>) -> Self {
        Predicate::IsOf(IsOfPredicate {
            expression: None,
            type_name: type_name.into(),
        })
    }

    /// Asserts the value at `expression` is of `type_name`.
    pub fn is_of_expr(expression: impl Into<String>, type_name: impl Into<String>) -> Self {
        Predicate::IsOf(IsOfPredicate {
            expression: Some(expression.into()),
            type_name: type_name.into(),
        })
    }

    /// Combines with `other` using And. An existing And group is extended
    /// instead of nested.
    pub fn and(self, other: Predicate) -> Self {
        self.combine(Condition::And, other)
    }

    /// Combines with `other` using Or. An existing Or group is extended
    /// instead of nested.
    pub fn or(self, other: Predicate) -> Self {
        self.combine(Condition::Or, other)
    }

    fn combine(self, condition: Condition, other: Predicate) -> Self {
        match self {
            Predicate::Complex(mut group) if group.condition == condition => {
                group.predicates.push(other);
                Predicate::Complex(group)
            }
            this => Predicate::Complex(ComplexPredicate {
                condition,
                predicates: vec![this, other],
            }),
        }
    }

    /// Variant name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Predicate::Simple(_) => "simple",
            Predicate::Date(_) => "date",
            Predicate::Complex(_) => "complex",
            Predicate::String(_) => "string",
            Predicate::Spatial(_) => "spatial",
            Predicate::Detail(_) => "detail",
            Predicate::Not(_) => "not",
            Predicate::IsOf(_) => "is_of",
            Predicate::True => "true",
            Predicate::False => "false",
        }
    }

    /// Re-checks construction invariants. Needed for trees that did not go
    /// through the constructors, such as deserialized ones.
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::Simple(simple) => {
                check_param(&simple.left)?;
                check_param(&simple.right)
            }
            Predicate::Date(date) => {
                check_param(&date.left)?;
                check_param(&date.right)?;
                check_date_operand(&date.left)?;
                check_date_operand(&date.right)
            }
            Predicate::Complex(group) => {
                if group.predicates.len() < 2 {
                    return Err(QueryError::TooFewPredicates {
                        count: group.predicates.len(),
                    });
                }
                group.predicates.iter().try_for_each(Predicate::validate)
            }
            Predicate::String(string) => check_path(&string.path),
            Predicate::Spatial(spatial) => check_path(&spatial.path),
            Predicate::Detail(detail) => {
                check_path(&detail.path)?;
                detail.predicate.validate()
            }
            Predicate::Not(inner) => inner.validate(),
            Predicate::IsOf(is_of) => {
                if is_of.type_name.trim().is_empty() {
                    return Err(QueryError::invalid("isOf requires a type name"));
                }
                is_of.expression.as_deref().map_or(Ok(()), check_path)
            }
            Predicate::True | Predicate::False => Ok(()),
        }
    }

    /// Every attribute path the predicate reads, relative to the queried type.
    /// Paths inside a detail predicate are prefixed with the detail path.
    pub fn attribute_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(self, "", &mut out);
        out
    }
}

fn collect_paths(predicate: &Predicate, prefix: &str, out: &mut Vec<String>) {
    match predicate {
        Predicate::Simple(SimplePredicate { left, right, .. })
        | Predicate::Date(DatePredicate { left, right, .. }) => {
            for param in [left, right] {
                if let Some(path) = param.as_attribute() {
                    out.push(join_path(prefix, path));
                }
            }
        }
        Predicate::String(string) => out.push(join_path(prefix, &string.path)),
        Predicate::Spatial(spatial) => out.push(join_path(prefix, &spatial.path)),
        Predicate::IsOf(is_of) => {
            if let Some(expr) = &is_of.expression {
                out.push(join_path(prefix, expr));
            }
        }
        Predicate::Complex(group) => {
            for child in &group.predicates {
                collect_paths(child, prefix, out);
            }
        }
        Predicate::Detail(detail) => {
            let detail_path = join_path(prefix, &detail.path);
            out.push(detail_path.clone());
            collect_paths(&detail.predicate, &detail_path, out);
        }
        Predicate::Not(inner) => collect_paths(inner, prefix, out),
        Predicate::True | Predicate::False => {}
    }
}

fn join_path(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_owned()
    } else {
        format!("{prefix}.{path}")
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(|segment| segment.trim().is_empty()) {
        return Err(QueryError::EmptyPath {
            path: path.to_owned(),
        });
    }
    Ok(())
}

fn check_param(param: &Param) -> Result<()> {
    match param {
        Param::Attribute(path) => check_path(path),
        Param::Const(_) => Ok(()),
    }
}

fn check_date_operand(param: &Param) -> Result<()> {
    match param {
        Param::Const(Value::Null) | Param::Attribute(_) => Ok(()),
        Param::Const(value) => match Rfc3339Dates.parse(value) {
            Some(_) => Ok(()),
            None => Err(QueryError::InvalidDate {
                value: value.to_string(),
            }),
        },
    }
}

/// Entry point for `StringPredicate` construction: `on(path).contains(v)`.
pub struct StringPredicateBuilder {
    path: String,
}

impl StringPredicate {
    /// Starts a substring predicate on `path`.
    pub fn on(path: impl Into<String>) -> StringPredicateBuilder {
        StringPredicateBuilder { path: path.into() }
    }
}

impl StringPredicateBuilder {
    /// Finishes the predicate with the substring to look for.
    pub fn contains(self, value: impl Into<String>) -> Predicate {
        Predicate::contains(self.path, value)
    }
}

/// Entry point for spatial predicates.
pub struct SpatialPredicateBuilder {
    kind: SpatialKind,
    path: String,
}

impl SpatialPredicate {
    /// Starts a geography predicate on `path`.
    pub fn geography(path: impl Into<String>) -> SpatialPredicateBuilder {
        SpatialPredicateBuilder {
            kind: SpatialKind::Geography,
            path: path.into(),
        }
    }

    /// Starts a geometry predicate on `path`.
    pub fn geometry(path: impl Into<String>) -> SpatialPredicateBuilder {
        SpatialPredicateBuilder {
            kind: SpatialKind::Geometry,
            path: path.into(),
        }
    }
}

impl SpatialPredicateBuilder {
    /// Attribute intersects the shape given in well-known text.
    pub fn intersects(self, value: impl Into<String>) -> Predicate {
        Predicate::Spatial(SpatialPredicate {
            kind: self.kind,
            path: self.path,
            op: SpatialOp::Intersects {
                value: value.into(),
            },
        })
    }

    /// Distance between the attribute and the shape compared with `distance`.
    pub fn distance(self, value: impl Into<String>, op: SimpleOp, distance: f64) -> Predicate {
        Predicate::Spatial(SpatialPredicate {
            kind: self.kind,
            path: self.path,
            op: SpatialOp::Distance {
                value: value.into(),
                op,
                distance,
            },
        })
    }
}

/// Entry point for detail predicates. A quantifier must be chosen to obtain a
/// [`Predicate`].
pub struct DetailBuilder {
    path: String,
}

impl DetailPredicate {
    /// Starts a quantified predicate over the collection at `path`.
    pub fn on(path: impl Into<String>) -> DetailBuilder {
        DetailBuilder { path: path.into() }
    }
}

impl DetailBuilder {
    /// Every item must satisfy `inner`.
    pub fn all(self, inner: Predicate) -> Predicate {
        self.quantify(Quantifier::All, inner)
    }

    /// At least one item must satisfy `inner`.
    pub fn any(self, inner: Predicate) -> Predicate {
        self.quantify(Quantifier::Any, inner)
    }

    fn quantify(self, quantifier: Quantifier, inner: Predicate) -> Predicate {
        Predicate::Detail(DetailPredicate {
            path: self.path,
            quantifier,
            predicate: Box::new(inner),
        })
    }
}
