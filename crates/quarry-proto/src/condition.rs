//! Condition AST for declarative filters.
//!
//! Conditions arrive in two surface forms that both normalize to [`Condition`]:
//!
//! - map form: `{"status": "active", "kind": 3}`, an implicit AND of equalities
//! - tuple form: `["or", ["=", "status", "active"], ["in", "id", [1, 2]]]`
//!
//! Any tuple operator may be negated, either as `"not <op>"` or with a leading
//! `"not"` element (`["not", "and", a, b]`).

use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::value::Value;

/// Leaf comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `like`
    Like,
    /// `ilike`
    ILike,
    /// `in`
    In,
    /// `@>` (array contains)
    Contains,
    /// `<@` (array is contained by)
    ContainedBy,
    /// `overlap` (arrays share an element)
    Overlap,
}

impl CompareOp {
    /// Surface spelling of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Like => "like",
            CompareOp::ILike => "ilike",
            CompareOp::In => "in",
            CompareOp::Contains => "@>",
            CompareOp::ContainedBy => "<@",
            CompareOp::Overlap => "overlap",
        }
    }

    /// Whether the operator takes a list operand.
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            CompareOp::In | CompareOp::Contains | CompareOp::ContainedBy | CompareOp::Overlap
        )
    }
}

/// Quantifier of an existential sub-filter over a related collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// At least one related entity matches.
    Some,
    /// Every related entity matches.
    Every,
    /// No related entity matches.
    None,
}

impl Quantifier {
    /// Surface spelling of the quantifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantifier::Some => "some",
            Quantifier::Every => "every",
            Quantifier::None => "none",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A single value.
    Value(Value),
    /// A list of values (`in`, `@>`, `<@`, `overlap`).
    List(Vec<Value>),
}

impl Operand {
    /// Whether the operand is an empty scalar (null or empty string).
    pub fn is_empty_value(&self) -> bool {
        matches!(self, Operand::Value(v) if v.is_empty())
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

/// Canonical filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field compared against an operand.
    Compare {
        field: String,
        op: CompareOp,
        operand: Operand,
    },
    /// Field within an inclusive range.
    Between {
        field: String,
        low: Value,
        high: Value,
    },
    /// All operands hold.
    And(Vec<Condition>),
    /// At least one operand holds.
    Or(Vec<Condition>),
    /// Negation of the inner condition.
    Not(Box<Condition>),
    /// Existential sub-filter over the related entities reached by `path`.
    Exists {
        quantifier: Quantifier,
        path: String,
        condition: Box<Condition>,
    },
    /// Inner condition compiled with empty operands dropped.
    Filter(Box<Condition>),
}

/// Parsed tuple-form operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Compare(CompareOp),
    Between,
    And,
    Or,
    Exists(Quantifier),
    Filter,
}

impl Operator {
    fn parse(op: &str) -> Result<Self, Error> {
        let op = match op.to_ascii_lowercase().as_str() {
            "=" => Operator::Compare(CompareOp::Eq),
            ">" => Operator::Compare(CompareOp::Gt),
            ">=" => Operator::Compare(CompareOp::Ge),
            "<" => Operator::Compare(CompareOp::Lt),
            "<=" => Operator::Compare(CompareOp::Le),
            "like" => Operator::Compare(CompareOp::Like),
            "ilike" => Operator::Compare(CompareOp::ILike),
            "in" => Operator::Compare(CompareOp::In),
            "@>" => Operator::Compare(CompareOp::Contains),
            "<@" => Operator::Compare(CompareOp::ContainedBy),
            "overlap" => Operator::Compare(CompareOp::Overlap),
            "between" => Operator::Between,
            "and" => Operator::And,
            "or" => Operator::Or,
            "some" => Operator::Exists(Quantifier::Some),
            "every" => Operator::Exists(Quantifier::Every),
            "none" => Operator::Exists(Quantifier::None),
            "filter" => Operator::Filter,
            _ => return Err(Error::UnknownOperator(op.to_string())),
        };
        Ok(op)
    }
}

impl Condition {
    /// Parse either surface form from JSON.
    pub fn from_json(json: &JsonValue) -> Result<Self, Error> {
        match json {
            JsonValue::Object(map) => Self::from_json_map(map),
            JsonValue::Array(items) => Self::from_json_tuple(items),
            other => Err(Error::InvalidCondition(format!(
                "expected an object or an array, got {other}"
            ))),
        }
    }

    /// Normalize map form into `and` of equalities, in key order.
    fn from_json_map(map: &Map<String, JsonValue>) -> Result<Self, Error> {
        let operands = map
            .iter()
            .map(|(field, value)| {
                Ok(Condition::Compare {
                    field: field.clone(),
                    op: CompareOp::Eq,
                    operand: Operand::Value(Value::from_json(value)?),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Condition::And(operands))
    }

    fn from_json_tuple(items: &[JsonValue]) -> Result<Self, Error> {
        let head = items
            .first()
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::InvalidCondition("tuple must start with an operator".into()))?
            .trim();

        let (negated, op, operands) = if head.eq_ignore_ascii_case("not") {
            let op = items.get(1).and_then(JsonValue::as_str).ok_or_else(|| {
                Error::InvalidCondition("'not' must be followed by an operator".into())
            })?;
            (true, op.trim(), &items[2..])
        } else if let Some(op) = strip_not_prefix(head) {
            (true, op, &items[1..])
        } else {
            (false, head, &items[1..])
        };

        let condition = Self::build_tuple(Operator::parse(op)?, op, operands)?;
        Ok(if negated {
            Condition::Not(Box::new(condition))
        } else {
            condition
        })
    }

    fn build_tuple(operator: Operator, op: &str, operands: &[JsonValue]) -> Result<Self, Error> {
        let arity = |expected: usize| {
            if operands.len() == expected {
                Ok(())
            } else {
                Err(Error::InvalidCondition(format!(
                    "'{op}' expects {expected} operands, got {}",
                    operands.len()
                )))
            }
        };

        match operator {
            Operator::Compare(cmp) => {
                arity(2)?;
                let field = field_name(op, &operands[0])?;
                let operand = match &operands[1] {
                    JsonValue::Array(items) => Operand::List(
                        items.iter().map(Value::from_json).collect::<Result<_, _>>()?,
                    ),
                    scalar => Operand::Value(Value::from_json(scalar)?),
                };
                Ok(Condition::Compare {
                    field,
                    op: cmp,
                    operand,
                })
            }
            Operator::Between => {
                arity(3)?;
                Ok(Condition::Between {
                    field: field_name(op, &operands[0])?,
                    low: Value::from_json(&operands[1])?,
                    high: Value::from_json(&operands[2])?,
                })
            }
            Operator::And | Operator::Or => {
                let conditions = operands
                    .iter()
                    .map(Condition::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if operator == Operator::And {
                    Condition::And(conditions)
                } else {
                    Condition::Or(conditions)
                })
            }
            Operator::Exists(quantifier) => {
                arity(2)?;
                Ok(Condition::Exists {
                    quantifier,
                    path: field_name(op, &operands[0])?,
                    condition: Box::new(Condition::from_json(&operands[1])?),
                })
            }
            Operator::Filter => {
                arity(1)?;
                Ok(Condition::Filter(Box::new(Condition::from_json(&operands[0])?)))
            }
        }
    }

    /// Render the canonical tuple form as JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Condition::Compare { field, op, operand } => {
                let rhs = match operand {
                    Operand::Value(v) => v.to_json(),
                    Operand::List(values) => {
                        JsonValue::Array(values.iter().map(Value::to_json).collect())
                    }
                };
                JsonValue::Array(vec![op.as_str().into(), field.as_str().into(), rhs])
            }
            Condition::Between { field, low, high } => JsonValue::Array(vec![
                "between".into(),
                field.as_str().into(),
                low.to_json(),
                high.to_json(),
            ]),
            Condition::And(operands) | Condition::Or(operands) => {
                let op = if matches!(self, Condition::And(_)) { "and" } else { "or" };
                let mut items = vec![JsonValue::from(op)];
                items.extend(operands.iter().map(Condition::to_json));
                JsonValue::Array(items)
            }
            Condition::Not(inner) => match inner.to_json() {
                JsonValue::Array(mut items) => {
                    items.insert(0, "not".into());
                    JsonValue::Array(items)
                }
                other => other,
            },
            Condition::Exists {
                quantifier,
                path,
                condition,
            } => JsonValue::Array(vec![
                quantifier.as_str().into(),
                path.as_str().into(),
                condition.to_json(),
            ]),
            Condition::Filter(inner) => JsonValue::Array(vec!["filter".into(), inner.to_json()]),
        }
    }

    /// Map-form builder: an AND of equalities in iteration order.
    pub fn from_map<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::And(
            pairs
                .into_iter()
                .map(|(field, value)| Condition::eq(field, value))
                .collect(),
        )
    }

    fn compare(field: impl Into<String>, op: CompareOp, operand: Operand) -> Self {
        Condition::Compare {
            field: field.into(),
            op,
            operand,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, Operand::Value(value.into()))
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, Operand::Value(value.into()))
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, Operand::Value(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, Operand::Value(value.into()))
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, Operand::Value(value.into()))
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Like, Operand::Value(pattern.into()))
    }

    pub fn ilike(field: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::ILike, Operand::Value(pattern.into()))
    }

    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Condition::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn in_list<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::compare(
            field,
            CompareOp::In,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn contains<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::compare(
            field,
            CompareOp::Contains,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn contained_by<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::compare(
            field,
            CompareOp::ContainedBy,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn overlap<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::compare(
            field,
            CompareOp::Overlap,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn and(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    pub fn or(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    pub fn not(condition: Condition) -> Self {
        Condition::Not(Box::new(condition))
    }

    pub fn some(path: impl Into<String>, condition: Condition) -> Self {
        Self::exists(Quantifier::Some, path, condition)
    }

    pub fn every(path: impl Into<String>, condition: Condition) -> Self {
        Self::exists(Quantifier::Every, path, condition)
    }

    pub fn none(path: impl Into<String>, condition: Condition) -> Self {
        Self::exists(Quantifier::None, path, condition)
    }

    fn exists(quantifier: Quantifier, path: impl Into<String>, condition: Condition) -> Self {
        Condition::Exists {
            quantifier,
            path: path.into(),
            condition: Box::new(condition),
        }
    }

    pub fn filter(condition: Condition) -> Self {
        Condition::Filter(Box::new(condition))
    }
}

fn strip_not_prefix(head: &str) -> Option<&str> {
    let prefix = head.get(..4)?;
    if prefix.eq_ignore_ascii_case("not ") {
        head.get(4..).map(str::trim).filter(|op| !op.is_empty())
    } else {
        None
    }
}

fn field_name(op: &str, json: &JsonValue) -> Result<String, Error> {
    json.as_str().map(String::from).ok_or_else(|| {
        Error::InvalidCondition(format!("'{op}' expects a field name, got {json}"))
    })
}
