//! CQL2 attribute filters.
//!
//! A [`FilterNode`] is a closed expression tree: comparisons on a single
//! queryable property, combined with `and` / `or` / `not`. Only properties in
//! [`ALLOWED_PROPERTIES`] may appear; anything else is rejected with
//! [`Error::UnsupportedFilter`] at construction time, so an invalid tree can
//! never reach a catalog.
//!
//! Trees serialize to and from CQL2-JSON:
//!
//! ```json
//! {"op": "and", "args": [
//!     {"op": "gte", "args": [{"property": "eo:cloud_cover"}, 10]},
//!     {"op": "lte", "args": [{"property": "eo:cloud_cover"}, 20]}
//! ]}
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::{Error, Result};

/// Properties a filter may reference.
pub const ALLOWED_PROPERTIES: &[&str] = &["eo:cloud_cover"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Neq => "neq",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Gte => "gte",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Lte => "lte",
        }
    }

    fn parse(op: &str) -> Option<Self> {
        match op {
            "eq" => Some(ComparisonOp::Eq),
            "neq" => Some(ComparisonOp::Neq),
            "gt" => Some(ComparisonOp::Gt),
            "gte" => Some(ComparisonOp::Gte),
            "lt" => Some(ComparisonOp::Lt),
            "lte" => Some(ComparisonOp::Lte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Not => "not",
        }
    }

    fn parse(op: &str) -> Option<Self> {
        match op {
            "and" => Some(LogicalOp::And),
            "or" => Some(LogicalOp::Or),
            "not" => Some(LogicalOp::Not),
            _ => None,
        }
    }
}

/// Literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

impl FilterValue {
    fn to_json(&self) -> Value {
        match self {
            // Whole numbers go out as integers so `10` does not become `10.0`.
            FilterValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => json!(*n as i64),
            FilterValue::Number(n) => json!(n),
            FilterValue::Text(s) => json!(s),
        }
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Number(n)
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

/// A validated filter expression.
///
/// The tree is opaque: nodes only come from [`FilterNode::comparison`],
/// [`FilterNode::logical`] and [`FilterNode::from_cql2`], all of which check
/// the property allow-list, value ranges and operator arity.
///
/// ```compile_fail
/// use stac_search::filter::{ComparisonOp, FilterNode, FilterValue};
///
/// let node = FilterNode::Comparison {
///     op: ComparisonOp::Eq,
///     property: "platform".to_string(),
///     value: FilterValue::Text("landsat-9".to_string()),
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode(Node);

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Comparison {
        op: ComparisonOp,
        property: String,
        value: FilterValue,
    },
    Logical {
        op: LogicalOp,
        operands: Vec<FilterNode>,
    },
}

impl FilterNode {
    /// Builds a comparison, rejecting properties outside the allow-list.
    pub fn comparison(
        op: ComparisonOp,
        property: &str,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        let value = value.into();
        validate_property(property, &value)?;
        Ok(FilterNode(Node::Comparison {
            op,
            property: property.to_string(),
            value,
        }))
    }

    /// Builds a boolean combination. `not` takes exactly one operand, `and`
    /// and `or` at least one.
    pub fn logical(op: LogicalOp, operands: Vec<FilterNode>) -> Result<Self> {
        match op {
            LogicalOp::Not if operands.len() != 1 => {
                return Err(Error::UnsupportedFilter(format!(
                    "'not' takes exactly one operand, got {}",
                    operands.len()
                )))
            }
            LogicalOp::And | LogicalOp::Or if operands.is_empty() => {
                return Err(Error::UnsupportedFilter(format!(
                    "'{}' needs at least one operand",
                    op.as_str()
                )))
            }
            _ => {}
        }
        Ok(FilterNode(Node::Logical { op, operands }))
    }

    /// Properties referenced anywhere in the expression, in tree order.
    pub fn properties(&self) -> Vec<&str> {
        match &self.0 {
            Node::Comparison { property, .. } => vec![property.as_str()],
            Node::Logical { operands, .. } => {
                operands.iter().flat_map(FilterNode::properties).collect()
            }
        }
    }

    /// Parses and validates a CQL2-JSON expression.
    pub fn from_cql2(expr: &Value) -> Result<Self> {
        let obj = expr
            .as_object()
            .ok_or_else(|| unsupported("expression must be a JSON object"))?;
        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| unsupported("expression has no 'op'"))?;
        let args = obj
            .get("args")
            .and_then(Value::as_array)
            .ok_or_else(|| unsupported("expression has no 'args' array"))?;

        if let Some(cmp) = ComparisonOp::parse(op) {
            let [lhs, rhs] = args.as_slice() else {
                return Err(unsupported(&format!(
                    "'{}' takes two arguments, got {}",
                    op,
                    args.len()
                )));
            };
            let property = lhs
                .get("property")
                .and_then(Value::as_str)
                .ok_or_else(|| unsupported("first comparison argument must be a property"))?;
            let value = match rhs {
                Value::Number(n) => n
                    .as_f64()
                    .map(FilterValue::Number)
                    .ok_or_else(|| unsupported("number out of range"))?,
                Value::String(s) => FilterValue::Text(s.clone()),
                other => {
                    return Err(unsupported(&format!(
                        "comparison value must be a number or string, got {}",
                        other
                    )))
                }
            };
            return FilterNode::comparison(cmp, property, value);
        }

        if let Some(logical) = LogicalOp::parse(op) {
            let operands = args
                .iter()
                .map(FilterNode::from_cql2)
                .collect::<Result<Vec<_>>>()?;
            return FilterNode::logical(logical, operands);
        }

        Err(Error::UnsupportedFilter(format!("operator '{}'", op)))
    }

    pub fn to_cql2(&self) -> Value {
        match &self.0 {
            Node::Comparison {
                op,
                property,
                value,
            } => json!({
                "op": op.as_str(),
                "args": [{"property": property}, value.to_json()],
            }),
            Node::Logical { op, operands } => json!({
                "op": op.as_str(),
                "args": operands.iter().map(FilterNode::to_cql2).collect::<Vec<_>>(),
            }),
        }
    }
}

fn unsupported(reason: &str) -> Error {
    Error::UnsupportedFilter(reason.to_string())
}

fn validate_property(property: &str, value: &FilterValue) -> Result<()> {
    if !ALLOWED_PROPERTIES.contains(&property) {
        return Err(Error::UnsupportedFilter(format!(
            "property '{}' is not filterable (allowed: {})",
            property,
            ALLOWED_PROPERTIES.join(", ")
        )));
    }
    if property == "eo:cloud_cover" {
        match value {
            FilterValue::Number(n) if (0.0..=100.0).contains(n) => {}
            FilterValue::Number(n) => {
                return Err(Error::UnsupportedFilter(format!(
                    "eo:cloud_cover must be within 0..=100, got {}",
                    n
                )))
            }
            FilterValue::Text(s) => {
                return Err(Error::UnsupportedFilter(format!(
                    "eo:cloud_cover must be numeric, got '{}'",
                    s
                )))
            }
        }
    }
    Ok(())
}

impl Serialize for FilterNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_cql2().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FilterNode::from_cql2(&value).map_err(serde::de::Error::custom)
    }
}
