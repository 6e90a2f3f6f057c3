//! Ratio expression trees and their evaluation over a [`Frame`]
//!
//! Wire format (JSON):
//!
//! ```text
//! {"value": 1.0}
//! {"column": "NetSales", "fillna": <expression | number>}
//! {"operator": "/", "operands": [<expression>, <expression>]}
//! ```
//!
//! Evaluation is total: absent columns read as missing, division by zero
//! follows IEEE semantics and never fails.

use crate::data::Frame;
use crate::error::{RatioError, Result};
use crate::types::{is_missing, MISSING};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Element-wise arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
        }
    }

    #[inline]
    pub fn apply(&self, left: f64, right: f64) -> f64 {
        match self {
            Operator::Add => left + right,
            Operator::Subtract => left - right,
            Operator::Multiply => left * right,
            Operator::Divide => left / right,
        }
    }
}

impl FromStr for Operator {
    type Err = RatioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "+" => Ok(Operator::Add),
            "-" => Ok(Operator::Subtract),
            "*" => Ok(Operator::Multiply),
            "/" => Ok(Operator::Divide),
            other => Err(RatioError::InvalidExpression(format!("Unknown operator: {}", other))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Arithmetic expression over the columns of a dataset
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(f64),
    /// Column value; missing entries are filled from `fallback` when given
    ColumnRef {
        name: String,
        fallback: Option<Box<Expression>>,
    },
    BinaryOp {
        op: Operator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn literal(value: f64) -> Self {
        Expression::Literal(value)
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expression::ColumnRef {
            name: name.into(),
            fallback: None,
        }
    }

    pub fn column_or(name: impl Into<String>, fallback: Expression) -> Self {
        Expression::ColumnRef {
            name: name.into(),
            fallback: Some(Box::new(fallback)),
        }
    }

    pub fn binary(op: Operator, left: Expression, right: Expression) -> Self {
        Expression::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Fallback chain `c0 -> c1 -> ...`: per row, the first candidate holding a value
    pub fn first_of<S: AsRef<str>>(candidates: &[S]) -> Option<Self> {
        candidates.iter().rev().fold(None, |fallback, name| {
            Some(Expression::ColumnRef {
                name: name.as_ref().to_string(),
                fallback: fallback.map(Box::new),
            })
        })
    }

    /// Parse the JSON wire format, rejecting unknown operators and malformed nodes
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(Expression::Literal)
                .ok_or_else(|| RatioError::InvalidExpression(format!("Bad literal: {}", n))),
            Value::Object(map) => {
                if let Some(literal) = map.get("value") {
                    return match literal {
                        Value::Null => Ok(Expression::Literal(MISSING)),
                        Value::Number(_) => Self::from_json(literal),
                        other => Err(RatioError::InvalidExpression(format!(
                            "Literal must be numeric, got {}",
                            other
                        ))),
                    };
                }

                if let Some(column) = map.get("column") {
                    let name = column.as_str().ok_or_else(|| {
                        RatioError::InvalidExpression(format!("Column name must be a string, got {}", column))
                    })?;
                    let fallback = match map.get("fillna") {
                        None | Some(Value::Null) => None,
                        Some(fill) => Some(Box::new(Self::from_json(fill)?)),
                    };
                    return Ok(Expression::ColumnRef {
                        name: name.to_string(),
                        fallback,
                    });
                }

                if let Some(op) = map.get("operator") {
                    let op: Operator = op
                        .as_str()
                        .ok_or_else(|| {
                            RatioError::InvalidExpression(format!("Operator must be a string, got {}", op))
                        })?
                        .parse()?;
                    let operands = match map.get("operands") {
                        Some(Value::Array(items)) if items.len() == 2 => items,
                        Some(Value::Array(items)) => {
                            return Err(RatioError::InvalidExpression(format!(
                                "Operator {} takes 2 operands, got {}",
                                op,
                                items.len()
                            )))
                        }
                        _ => {
                            return Err(RatioError::InvalidExpression(format!(
                                "Operator {} has no operand list",
                                op
                            )))
                        }
                    };
                    return Ok(Expression::binary(
                        op,
                        Self::from_json(&operands[0])?,
                        Self::from_json(&operands[1])?,
                    ));
                }

                Err(RatioError::InvalidExpression(format!("Unrecognised node: {}", value)))
            }
            other => Err(RatioError::InvalidExpression(format!("Unrecognised node: {}", other))),
        }
    }

    /// Serialise back to the wire format
    pub fn to_json(&self) -> Value {
        match self {
            Expression::Literal(v) if is_missing(*v) => json!({ "value": null }),
            Expression::Literal(v) => json!({ "value": v }),
            Expression::ColumnRef { name, fallback } => match fallback {
                Some(fb) => json!({ "column": name, "fillna": fb.to_json() }),
                None => json!({ "column": name }),
            },
            Expression::BinaryOp { op, left, right } => json!({
                "operator": op.symbol(),
                "operands": [left.to_json(), right.to_json()],
            }),
        }
    }

    /// Every column name the expression reads, in first-use order
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Literal(_) => {}
            Expression::ColumnRef { name, fallback } => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
                if let Some(fb) = fallback {
                    fb.collect_columns(out);
                }
            }
            Expression::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    /// Evaluate against `frame`
    pub fn evaluate(&self, frame: &Frame) -> Evaluated {
        evaluate(frame, self)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::ColumnRef { name, fallback: None } => write!(f, "{}", name),
            Expression::ColumnRef {
                name,
                fallback: Some(fb),
            } => write!(f, "coalesce({}, {})", name, fb),
            Expression::BinaryOp { op, left, right } => write!(f, "({} {} {})", left, op, right),
        }
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Expression::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Result of evaluating an expression: a scalar or a full column
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    Scalar(f64),
    Column(Vec<f64>),
}

impl Evaluated {
    /// Value at `row`, broadcasting scalars
    #[inline]
    pub fn at(&self, row: usize) -> f64 {
        match self {
            Evaluated::Scalar(v) => *v,
            Evaluated::Column(values) => values.get(row).copied().unwrap_or(MISSING),
        }
    }

    /// Materialise as a column of `len` rows
    pub fn into_column(self, len: usize) -> Vec<f64> {
        match self {
            Evaluated::Scalar(v) => vec![v; len],
            Evaluated::Column(values) => values,
        }
    }
}

/// Evaluate `expression` over every row of `frame`
pub fn evaluate(frame: &Frame, expression: &Expression) -> Evaluated {
    match expression {
        Expression::Literal(v) => Evaluated::Scalar(*v),
        Expression::ColumnRef { name, fallback } => {
            let mut values = frame
                .numeric_values(name)
                .unwrap_or_else(|| vec![MISSING; frame.len()]);
            if let Some(fb) = fallback {
                if values.iter().any(|v| is_missing(*v)) {
                    let fill = evaluate(frame, fb);
                    for (row, v) in values.iter_mut().enumerate() {
                        if is_missing(*v) {
                            *v = fill.at(row);
                        }
                    }
                }
            }
            Evaluated::Column(values)
        }
        Expression::BinaryOp { op, left, right } => {
            match (evaluate(frame, left), evaluate(frame, right)) {
                (Evaluated::Scalar(a), Evaluated::Scalar(b)) => Evaluated::Scalar(op.apply(a, b)),
                (l, r) => Evaluated::Column(
                    (0..frame.len()).map(|row| op.apply(l.at(row), r.at(row))).collect(),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use approx::assert_relative_eq;

    fn frame() -> Frame {
        Frame::from_columns(vec![
            ("A".to_string(), Column::Numeric(vec![f64::NAN, 2.0, f64::NAN])),
            ("B".to_string(), Column::Numeric(vec![5.0, 7.0, f64::NAN])),
            ("Zero".to_string(), Column::Numeric(vec![0.0, 0.0, 0.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_literal_is_scalar() {
        assert_eq!(evaluate(&frame(), &Expression::literal(3.0)), Evaluated::Scalar(3.0));
    }

    #[test]
    fn test_fallback_first_non_null_wins() {
        let expr = Expression::first_of(&["A", "B"]).unwrap();
        let values = evaluate(&frame(), &expr).into_column(3);
        assert_eq!(values[0], 5.0);
        assert_eq!(values[1], 2.0);
        assert!(values[2].is_nan());
    }

    #[test]
    fn test_scalar_fallback() {
        let expr = Expression::column_or("A", Expression::literal(0.0));
        assert_eq!(evaluate(&frame(), &expr).into_column(3), vec![0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_absent_column_is_missing() {
        let values = evaluate(&frame(), &Expression::column("Nope")).into_column(3);
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_division_by_zero_does_not_fail() {
        let expr = Expression::binary(Operator::Divide, Expression::column("B"), Expression::column("Zero"));
        let values = evaluate(&frame(), &expr).into_column(3);
        assert_eq!(values[0], f64::INFINITY);
        assert!(values[2].is_nan());
    }

    #[test]
    fn test_broadcast_scalar_operand() {
        let expr = Expression::binary(Operator::Multiply, Expression::column("B"), Expression::literal(0.5));
        let values = evaluate(&frame(), &expr).into_column(3);
        assert_relative_eq!(values[0], 2.5);
        assert_relative_eq!(values[1], 3.5);
    }

    #[test]
    fn test_parse_wire_format() {
        let json = serde_json::json!({
            "operator": "/",
            "operands": [
                {"column": "netIncome", "fillna": {"column": "profit", "fillna": 0}},
                {"value": 2}
            ]
        });
        let expr = Expression::from_json(&json).unwrap();
        assert_eq!(expr.referenced_columns(), vec!["netIncome", "profit"]);
        assert_eq!(expr.to_string(), "(coalesce(netIncome, coalesce(profit, 0)) / 2)");

        let back = Expression::from_json(&expr.to_json()).unwrap();
        assert_eq!(back, expr);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let unknown_op = serde_json::json!({"operator": "^", "operands": [{"value": 1}, {"value": 2}]});
        assert!(matches!(
            Expression::from_json(&unknown_op),
            Err(RatioError::InvalidExpression(_))
        ));

        let one_operand = serde_json::json!({"operator": "+", "operands": [{"value": 1}]});
        assert!(Expression::from_json(&one_operand).is_err());

        let unknown_node = serde_json::json!({"function": "log"});
        assert!(Expression::from_json(&unknown_node).is_err());
        assert!(Expression::from_json(&serde_json::json!("NetSales")).is_err());
    }

    #[test]
    fn test_serde_roundtrip_through_deserialize() {
        let expr: Expression = serde_json::from_str(r#"{"column": "x"}"#).unwrap();
        assert_eq!(expr, Expression::column("x"));
        assert!(serde_json::from_str::<Expression>(r#"{"operator": "%"}"#).is_err());
    }
}
