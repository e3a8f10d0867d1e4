use std::fmt;

use serde_json::{Map, Value};

use crate::errors::{CloudError, CloudResult};

/// Comparison operator of a single-dimension test.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn from_key(key: &str) -> Option<CompareOp> {
        match key {
            "$eq" => Some(CompareOp::Eq),
            "$ne" => Some(CompareOp::Ne),
            "$gt" => Some(CompareOp::Gt),
            "$gte" => Some(CompareOp::Gte),
            "$lt" => Some(CompareOp::Lt),
            "$lte" => Some(CompareOp::Lte),
            _ => None,
        }
    }

    #[inline]
    pub fn test(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Gte => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Lte => lhs <= rhs,
        }
    }

    /// Whether some value in `[lo, hi]` could satisfy `value op rhs`.
    pub fn possible(self, lo: f64, hi: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Eq => lo <= rhs && rhs <= hi,
            CompareOp::Ne => !(lo == rhs && hi == rhs),
            CompareOp::Gt => hi > rhs,
            CompareOp::Gte => hi >= rhs,
            CompareOp::Lt => lo < rhs,
            CompareOp::Lte => lo <= rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        };
        write!(f, "{}", s)
    }
}

/// An attribute expression over named point dimensions.
///
/// # Purpose
/// Describes which points a query keeps, independent of any schema. It is
/// resolved against the index's storage schema when a query is built, at
/// which point unknown dimension names are rejected.
///
/// # Construction
/// Predicates come from the fluent builder ([`crate::filter::dim`]) or from
/// JSON in the Mongo-like form indexes have always accepted:
///
/// ```rust
/// use cloudtree::filter::{dim, Predicate};
///
/// let parsed = Predicate::from_json(
///     r#"{"Classification": 2, "Intensity": {"$gte": 10, "$lt": 500}}"#,
/// ).unwrap();
///
/// let built = dim("Classification").eq(2)
///     .and(dim("Intensity").gte(10))
///     .and(dim("Intensity").lt(500));
///
/// assert_eq!(parsed.to_string(), built.to_string());
/// ```
#[derive(Clone, PartialEq, Debug)]
pub enum Predicate {
    Compare {
        dim: String,
        op: CompareOp,
        value: f64,
    },
    In {
        dim: String,
        values: Vec<f64>,
        negate: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Combines with logical AND, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut children) => {
                children.push(other);
                Predicate::And(children)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Combines with logical OR, flattening nested disjunctions.
    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut children) => {
                children.push(other);
                Predicate::Or(children)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Names of every dimension the expression reads.
    pub fn dims(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(p) = stack.pop() {
            match p {
                Predicate::Compare { dim, .. } | Predicate::In { dim, .. } => {
                    if !out.contains(&dim.as_str()) {
                        out.push(dim.as_str());
                    }
                }
                Predicate::And(children) | Predicate::Or(children) => {
                    stack.extend(children.iter().rev())
                }
                Predicate::Not(inner) => stack.push(inner),
            }
        }
        out
    }

    /// Parses the JSON filter form.
    pub fn from_json(json: &str) -> CloudResult<Predicate> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| CloudError::Filter(format!("invalid filter JSON: {}", e)))?;
        Predicate::from_value(&value)
    }

    /// Parses an already-decoded JSON filter.
    pub fn from_value(value: &Value) -> CloudResult<Predicate> {
        match value {
            Value::Object(map) => parse_object(map),
            other => Err(filter_error(format!("filter must be an object, found {}", other))),
        }
    }
}

fn filter_error(msg: String) -> CloudError {
    CloudError::Filter(msg)
}

fn conjunction(mut clauses: Vec<Predicate>) -> CloudResult<Predicate> {
    match clauses.len() {
        0 => Err(filter_error("empty filter expression".to_string())),
        1 => Ok(clauses.remove(0)),
        _ => Ok(Predicate::And(clauses)),
    }
}

fn parse_object(map: &Map<String, Value>) -> CloudResult<Predicate> {
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        let clause = match key.as_str() {
            "$and" => Predicate::And(parse_list(key, value)?),
            "$or" => Predicate::Or(parse_list(key, value)?),
            "$not" => Predicate::Not(Box::new(Predicate::from_value(value)?)),
            op if op.starts_with('$') => {
                return Err(filter_error(format!("unknown logical operator {}", op)))
            }
            dim => {
                clauses.extend(parse_dim(dim, value)?);
                continue;
            }
        };
        clauses.push(clause);
    }
    conjunction(clauses)
}

fn parse_list(key: &str, value: &Value) -> CloudResult<Vec<Predicate>> {
    let items = value
        .as_array()
        .ok_or_else(|| filter_error(format!("{} expects an array", key)))?;
    if items.is_empty() {
        return Err(filter_error(format!("{} expects at least one clause", key)));
    }
    items.iter().map(Predicate::from_value).collect()
}

/// Parses the clauses for one dimension key. Several operators on one key
/// are returned separately so that they join the enclosing conjunction.
fn parse_dim(dim: &str, value: &Value) -> CloudResult<Vec<Predicate>> {
    match value {
        Value::Object(ops) if ops.is_empty() => {
            Err(filter_error(format!("no operators given for {}", dim)))
        }
        Value::Object(ops) => {
            let mut clauses = Vec::with_capacity(ops.len());
            for (op, operand) in ops {
                let clause = match op.as_str() {
                    "$in" | "$nin" => Predicate::In {
                        dim: dim.to_string(),
                        values: parse_numbers(dim, op, operand)?,
                        negate: op == "$nin",
                    },
                    other => {
                        let op = CompareOp::from_key(other).ok_or_else(|| {
                            filter_error(format!("unknown operator {} on {}", other, dim))
                        })?;
                        Predicate::Compare {
                            dim: dim.to_string(),
                            op,
                            value: parse_number(dim, operand)?,
                        }
                    }
                };
                clauses.push(clause);
            }
            Ok(clauses)
        }
        other => Ok(vec![Predicate::Compare {
            dim: dim.to_string(),
            op: CompareOp::Eq,
            value: parse_number(dim, other)?,
        }]),
    }
}

fn parse_number(dim: &str, value: &Value) -> CloudResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| filter_error(format!("{} expects a number, found {}", dim, value)))
}

fn parse_numbers(dim: &str, op: &str, value: &Value) -> CloudResult<Vec<f64>> {
    value
        .as_array()
        .ok_or_else(|| filter_error(format!("{} on {} expects an array", op, dim)))?
        .iter()
        .map(|v| parse_number(dim, v))
        .collect()
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { dim, op, value } => write!(f, "{} {} {}", dim, op, value),
            Predicate::In {
                dim,
                values,
                negate,
            } => {
                let list: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                let keyword = if *negate { "not in" } else { "in" };
                write!(f, "{} {} [{}]", dim, keyword, list.join(", "))
            }
            Predicate::And(children) | Predicate::Or(children) => {
                let sep = if matches!(self, Predicate::And(_)) {
                    " && "
                } else {
                    " || "
                };
                let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
            Predicate::Not(inner) => write!(f, "!({})", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_shorthand() {
        let p = Predicate::from_json(r#"{"Classification": 2}"#).unwrap();
        assert_eq!(
            p,
            Predicate::Compare {
                dim: "Classification".into(),
                op: CompareOp::Eq,
                value: 2.0
            }
        );
    }

    #[test]
    fn test_operators_and_implicit_and() {
        let p = Predicate::from_json(r#"{"Intensity": {"$gt": 1, "$lte": 9}}"#).unwrap();
        match p {
            Predicate::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(children.iter().all(|c| matches!(c, Predicate::Compare { .. })));
            }
            other => panic!("expected a conjunction, got {}", other),
        }
    }

    #[test]
    fn test_logical_operators() {
        let p = Predicate::from_json(
            r#"{"$or": [{"Classification": {"$in": [2, 6]}}, {"$not": {"Intensity": {"$lt": 5}}}]}"#,
        )
        .unwrap();
        assert_eq!(
            p.to_string(),
            "(Classification in [2, 6] || !(Intensity < 5))"
        );
        assert_eq!(p.dims(), vec!["Classification", "Intensity"]);
    }

    #[test]
    fn test_nin() {
        let p = Predicate::from_json(r#"{"OriginId": {"$nin": [0]}}"#).unwrap();
        assert_eq!(p.to_string(), "OriginId not in [0]");
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "[1, 2]",
            "{",
            r#"{"Intensity": "high"}"#,
            r#"{"Intensity": {"$between": [1, 2]}}"#,
            r#"{"$xor": []}"#,
            r#"{"$and": {}}"#,
            r#"{"$or": []}"#,
            r#"{"Intensity": {"$in": 4}}"#,
            "{}",
        ] {
            let err = Predicate::from_json(bad).unwrap_err();
            assert!(matches!(err, CloudError::Filter(_)), "{} gave {:?}", bad, err);
        }
    }

    #[test]
    fn test_possible_ranges() {
        assert!(CompareOp::Eq.possible(0.0, 10.0, 10.0));
        assert!(!CompareOp::Eq.possible(0.0, 10.0, 11.0));
        assert!(!CompareOp::Gt.possible(0.0, 10.0, 10.0));
        assert!(CompareOp::Gte.possible(0.0, 10.0, 10.0));
        assert!(!CompareOp::Lt.possible(5.0, 10.0, 5.0));
        assert!(CompareOp::Lte.possible(5.0, 10.0, 5.0));
        assert!(!CompareOp::Ne.possible(3.0, 3.0, 3.0));
        assert!(CompareOp::Ne.possible(3.0, 4.0, 3.0));
    }
}
