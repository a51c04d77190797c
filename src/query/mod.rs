//! # Query Evaluation
//!
//! The engine consumes criteria as a **postfix queue of symbols** produced
//! by an external parser: expressions (`key operator value…`), AND/OR
//! conjunctions, and an optional timestamp bounding the whole query.
//!
//! Evaluation maintains a stack of record-id sets.  Expressions evaluate
//! through the index-record read path — canonical-byte equality for EQ/NE,
//! total-order comparisons for the range operators, anchored regular
//! expressions for the pattern operators — and conjunctions combine the top
//! two sets.
//!
//! ## Operators
//!
//! | Operator | Operands | Semantics |
//! |---|---|---|
//! | `Eq` / `Ne` | 1 | canonical equality / its complement over present values |
//! | `Lt` `Le` `Gt` `Ge` | 1 | total-order comparison |
//! | `Between` | 2 | `low <= value < high` |
//! | `Regex` / `NotRegex` | 1 | anchored match over text values |
//! | `Like` / `NotLike` | 1 | `%` wildcards, translated to anchored regex |
//! | `LinksTo` | 1 | equality against a LINK to the given record |

#[cfg(test)]
mod tests;

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use crate::engine::{Engine, EngineError};
use crate::model::{Identifier, Value};
use crate::record::IndexRecord;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors raised while evaluating a (structurally invalid) query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// An expression carried the wrong number of operand values.
    #[error("{operator:?} expects {expected} value(s), found {found}")]
    Arity {
        operator: Operator,
        expected: usize,
        found: usize,
    },

    /// A pattern operand was not a valid regular expression.
    #[error("bad pattern: {0}")]
    BadPattern(String),

    /// A pattern operand was not text, or a LINKS_TO operand was not a
    /// record reference.
    #[error("bad operand: {0}")]
    BadOperand(String),

    /// A conjunction had fewer than two operand sets.
    #[error("conjunction with insufficient operands")]
    StackUnderflow,

    /// The queue did not reduce to exactly one result set.
    #[error("malformed postfix queue")]
    Malformed,
}

// ------------------------------------------------------------------------------------------------
// Symbols
// ------------------------------------------------------------------------------------------------

/// Comparison operators understood by [`Engine::find`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    Regex,
    NotRegex,
    Like,
    NotLike,
    LinksTo,
}

/// AND / OR combination of two result sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

/// One element of the postfix queue.
#[derive(Clone, Debug)]
pub enum Symbol {
    /// A leaf criterion: `key operator values…`.
    Expression {
        key: String,
        operator: Operator,
        values: Vec<Value>,
    },
    /// Combine the top two result sets.
    Conjunction(Conjunction),
    /// Bound the whole query at a version.
    Timestamp(u64),
}

// ------------------------------------------------------------------------------------------------
// Evaluation
// ------------------------------------------------------------------------------------------------

/// Evaluate a postfix queue against the engine.
pub fn evaluate(
    engine: &Engine,
    symbols: &[Symbol],
) -> Result<HashSet<Identifier>, EngineError> {
    // A trailing timestamp bounds every leaf; scan for it first.
    let mut at = crate::record::PRESENT;
    for symbol in symbols {
        if let Symbol::Timestamp(bound) = symbol {
            at = *bound;
        }
    }

    let mut stack: Vec<HashSet<Identifier>> = Vec::new();
    for symbol in symbols {
        match symbol {
            Symbol::Timestamp(_) => {}
            Symbol::Expression {
                key,
                operator,
                values,
            } => {
                let result = engine.find_at(key, *operator, values, at)?;
                stack.push(result);
            }
            Symbol::Conjunction(conjunction) => {
                let right = stack.pop().ok_or(QueryError::StackUnderflow)?;
                let left = stack.pop().ok_or(QueryError::StackUnderflow)?;
                let combined = match conjunction {
                    Conjunction::And => left.intersection(&right).copied().collect(),
                    Conjunction::Or => left.union(&right).copied().collect(),
                };
                stack.push(combined);
            }
        }
    }

    if stack.len() != 1 {
        return Err(QueryError::Malformed.into());
    }
    Ok(stack.pop().unwrap_or_default())
}

/// Evaluate one leaf criterion against a materialized index record.
pub fn evaluate_leaf(
    index: &IndexRecord,
    operator: Operator,
    values: &[Value],
    at: u64,
) -> Result<HashSet<Identifier>, QueryError> {
    let arity = |expected: usize| -> Result<(), QueryError> {
        if values.len() != expected {
            Err(QueryError::Arity {
                operator,
                expected,
                found: values.len(),
            })
        } else {
            Ok(())
        }
    };

    match operator {
        Operator::Eq => {
            arity(1)?;
            Ok(index.find_eq(&values[0], at))
        }
        Operator::Ne => {
            arity(1)?;
            let bound = values[0].clone();
            Ok(index.find_matching(at, move |v| *v != bound))
        }
        Operator::Lt => {
            arity(1)?;
            let bound = values[0].clone();
            Ok(index.find_matching(at, move |v| *v < bound))
        }
        Operator::Le => {
            arity(1)?;
            let bound = values[0].clone();
            Ok(index.find_matching(at, move |v| *v <= bound))
        }
        Operator::Gt => {
            arity(1)?;
            let bound = values[0].clone();
            Ok(index.find_matching(at, move |v| *v > bound))
        }
        Operator::Ge => {
            arity(1)?;
            let bound = values[0].clone();
            Ok(index.find_matching(at, move |v| *v >= bound))
        }
        Operator::Between => {
            arity(2)?;
            let low = values[0].clone();
            let high = values[1].clone();
            Ok(index.find_matching(at, move |v| *v >= low && *v < high))
        }
        Operator::Regex | Operator::NotRegex => {
            arity(1)?;
            let pattern = pattern_text(&values[0])?;
            let regex = anchored(&pattern)?;
            let negate = operator == Operator::NotRegex;
            Ok(index.find_matching(at, move |v| {
                v.as_text()
                    .map(|text| regex.is_match(text) != negate)
                    .unwrap_or(false)
            }))
        }
        Operator::Like | Operator::NotLike => {
            arity(1)?;
            let pattern = pattern_text(&values[0])?;
            let regex = anchored(&like_to_regex(&pattern))?;
            let negate = operator == Operator::NotLike;
            Ok(index.find_matching(at, move |v| {
                v.as_text()
                    .map(|text| regex.is_match(text) != negate)
                    .unwrap_or(false)
            }))
        }
        Operator::LinksTo => {
            arity(1)?;
            let target = link_target(&values[0])?;
            Ok(index.find_eq(&Value::Link(target), at))
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn pattern_text(value: &Value) -> Result<String, QueryError> {
    value
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| QueryError::BadOperand(format!("{} is not a text pattern", value.kind())))
}

/// Compile a whole-string match: `^(?:pattern)$`.
fn anchored(pattern: &str) -> Result<Regex, QueryError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| QueryError::BadPattern(e.to_string()))
}

/// Translate a LIKE pattern (`%` = any run, `_` = any char) to regex text.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

/// Resolve a LINKS_TO operand to the referenced record id.
fn link_target(value: &Value) -> Result<Identifier, QueryError> {
    match value {
        Value::Link(id) => Ok(*id),
        Value::Int32(i) if *i >= 0 => Ok(*i as u64),
        Value::Int64(i) if *i >= 0 => Ok(*i as u64),
        other => Err(QueryError::BadOperand(format!(
            "{} is not a record reference",
            other.kind()
        ))),
    }
}
