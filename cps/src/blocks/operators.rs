// Unary and binary operators

use super::{then, BinaryOp, BlockId};
use crate::continuation::{Captured, Continuation, Step};
use crate::dispatch::{mismatch, ContinuationGroup, DispatchTag, Entry, Resume};
use crate::environment::Env;
use crate::error::EngineResult;
use crate::values::{kinds, Failure, Signal, Value};
use std::cmp::Ordering;

pub const NOT: DispatchTag = DispatchTag::new(OperatorGroup::NAME, "not");
pub const LHS: DispatchTag = DispatchTag::new(OperatorGroup::NAME, "lhs");
pub const RHS: DispatchTag = DispatchTag::new(OperatorGroup::NAME, "rhs");

pub fn eval_not(operand: BlockId, env: Env, k: Continuation) -> Step {
    then(operand, env, NOT, Captured::Not, k)
}

pub fn eval_binary(op: BinaryOp, lhs: BlockId, rhs: BlockId, env: Env, k: Continuation) -> Step {
    then(lhs, env, LHS, Captured::BinaryLhs { op, rhs }, k)
}

fn not(r: Resume, signal: Signal) -> EngineResult<Step> {
    match (r.captured, signal) {
        (Captured::Not, Signal::Value(v)) => Ok(Step::value(r.next, !v.truthy())),
        (Captured::Not, thrown) => Ok(Step::resume(r.next, thrown)),
        (other, _) => Err(mismatch(NOT, &other)),
    }
}

fn lhs(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (op, rhs) = match r.captured {
        Captured::BinaryLhs { op, rhs } => (op, rhs),
        other => return Err(mismatch(LHS, &other)),
    };
    let Signal::Value(lhs) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    Ok(then(rhs, r.env, RHS, Captured::BinaryRhs { op, lhs }, r.next))
}

fn rhs(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (op, lhs) = match r.captured {
        Captured::BinaryRhs { op, lhs } => (op, lhs),
        other => return Err(mismatch(RHS, &other)),
    };
    let Signal::Value(rhs) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    Ok(match apply(op, &lhs, &rhs) {
        Ok(v) => Step::value(r.next, v),
        Err(failure) => Step::thrown(r.next, failure),
    })
}

/// Applies a binary operator to two evaluated operands.
pub fn apply(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Failure> {
    use BinaryOp::*;
    match op {
        Eq => Ok(Value::Bool(loosely_equal(lhs, rhs))),
        Ne => Ok(Value::Bool(!loosely_equal(lhs, rhs))),
        Lt | Le | Gt | Ge => {
            let ordering = compare(lhs, rhs).ok_or_else(|| Failure::type_mismatch(symbol(op), lhs, rhs))?;
            Ok(Value::Bool(match op {
                Lt => ordering == Ordering::Less,
                Le => ordering != Ordering::Greater,
                Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        Add => match (lhs, rhs) {
            (Value::Str(a), b) => Ok(Value::Str(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                Ok(Value::List(items))
            }
            (Value::List(a), b) => {
                let mut items = a.clone();
                items.push(b.clone());
                Ok(Value::List(items))
            }
            _ => arithmetic(op, lhs, rhs),
        },
        Sub | Mul | Div | Mod => arithmetic(op, lhs, rhs),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Failure> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                    return Err(Failure::new(kinds::DIVISION_BY_ZERO, "Division by zero"))
                }
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod => a.checked_rem(b),
                _ => None,
            };
            result
                .map(Value::Int)
                .ok_or_else(|| Failure::new(kinds::TYPE_MISMATCH, format!("Integer overflow in {} {} {}", a, symbol(op), b)))
        }
        _ => {
            let (Some(a), Some(b)) = (as_float(lhs), as_float(rhs)) else {
                return Err(Failure::type_mismatch(symbol(op), lhs, rhs));
            };
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => return Err(Failure::type_mismatch(symbol(op), lhs, rhs)),
            }))
        }
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn loosely_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => as_float(lhs)?.partial_cmp(&as_float(rhs)?),
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
    }
}

pub struct OperatorGroup;

impl ContinuationGroup for OperatorGroup {
    const NAME: &'static str = "Operator";

    fn entries() -> Vec<(DispatchTag, Entry)> {
        vec![
            (NOT, Entry::values(not)),
            (LHS, Entry::values(lhs)),
            (RHS, Entry::values(rhs)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_by_zero_fails() {
        let err = apply(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, kinds::DIVISION_BY_ZERO);
    }

    #[test]
    fn mixed_numbers_widen_to_float() {
        assert_eq!(
            apply(BinaryOp::Mul, &Value::Int(2), &Value::Float(1.5)),
            Ok(Value::Float(3.0))
        );
        assert_eq!(
            apply(BinaryOp::Eq, &Value::Int(2), &Value::Float(2.0)),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn string_concatenation_renders_rhs() {
        assert_eq!(
            apply(BinaryOp::Add, &Value::from("n="), &Value::Int(4)),
            Ok(Value::from("n=4"))
        );
    }

    #[test]
    fn comparing_unrelated_types_is_a_mismatch() {
        let err = apply(BinaryOp::Lt, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, kinds::TYPE_MISMATCH);
    }
}
