//! Translates clock-guard, invariant, and clock-reset ASTs into DBM
//! operations (§4.7 Stage 3/4/5). Guards are already classified as
//! clock-vs-variable at load time (C5); this module only has to read the
//! shape of a clock expression, not re-classify it.

use crate::ast::{AssignOp, BinOp, Expr};
use crate::dbm::Rel;
use crate::engine::ops::DbmOp;
use crate::error::SimulationError;

const REF_CLOCK: &str = "t0_ref";

fn rel_of(op: BinOp) -> Option<Rel> {
    match op {
        BinOp::LessThan => Some(Rel::Lt),
        BinOp::LessEqual => Some(Rel::Le),
        BinOp::Equal => Some(Rel::Eq),
        BinOp::GreaterEqual => Some(Rel::Ge),
        BinOp::GreaterThan => Some(Rel::Gt),
        _ => None,
    }
}

fn flip(rel: Rel) -> Rel {
    match rel {
        Rel::Lt => Rel::Gt,
        Rel::Le => Rel::Ge,
        Rel::Eq => Rel::Eq,
        Rel::Ge => Rel::Le,
        Rel::Gt => Rel::Lt,
    }
}

fn as_name(e: &Expr) -> Option<&str> {
    match e {
        Expr::Variable(n) => Some(n.as_str()),
        _ => None,
    }
}

fn as_diff(e: &Expr) -> Option<(&str, &str)> {
    match e {
        Expr::Binary { op: BinOp::Sub, left, right } => match (as_name(left), as_name(right)) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        },
        _ => None,
    }
}

fn as_int(e: &Expr) -> Option<i64> {
    match e {
        Expr::Integer(v) => Some(*v as i64),
        _ => None,
    }
}

/// Splits a top-level `&&`-conjunction into its conjuncts (invariants and
/// guards may conjoin several single constraints into one expression).
pub fn flatten_conjunction(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary { op: BinOp::LogAnd, left, right } => {
            let mut out = flatten_conjunction(left);
            out.extend(flatten_conjunction(right));
            out
        }
        other => vec![other],
    }
}

/// Translates one clock-guard/invariant conjunct of shape `c1 - c2 <rel> k`,
/// `c1 <rel> k`, or `k <rel> c1` into a `(c1, c2, rel, k)` DBM constraint.
pub fn translate_constraint(expr: &Expr) -> Result<(String, String, Rel, i64), SimulationError> {
    if let Expr::Binary { op, left, right } = expr {
        if let Some(rel) = rel_of(*op) {
            if let (Some((c1, c2)), Some(v)) = (as_diff(left), as_int(right)) {
                return Ok((c1.to_string(), c2.to_string(), rel, v));
            }
            if let (Some(c1), Some(v)) = (as_name(left), as_int(right)) {
                return Ok((c1.to_string(), REF_CLOCK.to_string(), rel, v));
            }
            if let (Some(v), Some(c1)) = (as_int(left), as_name(right)) {
                return Ok((c1.to_string(), REF_CLOCK.to_string(), flip(rel), v));
            }
        }
    }
    Err(SimulationError::MalformedClockExpr(format!("{:?}", expr)))
}

/// Translates every conjunct of a (possibly conjoined) clock guard or
/// invariant expression into `Constraint` ops, flattening `==` into two.
pub fn translate_guard(expr: &Expr) -> Result<Vec<DbmOp>, SimulationError> {
    let mut ops = Vec::new();
    for conjunct in flatten_conjunction(expr) {
        let (c1, c2, rel, v) = translate_constraint(conjunct)?;
        if rel == Rel::Eq {
            ops.push(DbmOp::Constraint(c1.clone(), c2.clone(), Rel::Le, v));
            ops.push(DbmOp::Constraint(c2, c1, Rel::Le, -v));
        } else {
            ops.push(DbmOp::Constraint(c1, c2, rel, v));
        }
    }
    Ok(ops)
}

/// Translates a clock reset assignment (`clock := expr`) into a `Reset` op.
/// Only a literal integer RHS is supported; a non-constant reset value is a
/// malformed-clock-expression error (the source language does not permit
/// resetting a clock to another clock's value).
pub fn translate_reset(expr: &Expr) -> Result<DbmOp, SimulationError> {
    if let Expr::Assign { op: AssignOp::Assign, left, right } = expr {
        if let (Some(clock), Some(v)) = (as_name(left), as_int(right)) {
            return Ok(DbmOp::Reset(clock.to_string(), v));
        }
    }
    Err(SimulationError::MalformedClockExpr(format!("{:?}", expr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_clock_against_reference() {
        let e = Expr::Binary {
            op: BinOp::LessEqual,
            left: Box::new(Expr::Variable("x".into())),
            right: Box::new(Expr::Integer(3)),
        };
        let (c1, c2, rel, v) = translate_constraint(&e).unwrap();
        assert_eq!((c1.as_str(), c2.as_str(), rel, v), ("x", "t0_ref", Rel::Le, 3));
    }

    #[test]
    fn reversed_literal_flips_relation() {
        let e = Expr::Binary {
            op: BinOp::LessEqual,
            left: Box::new(Expr::Integer(3)),
            right: Box::new(Expr::Variable("x".into())),
        };
        let (c1, c2, rel, v) = translate_constraint(&e).unwrap();
        assert_eq!((c1.as_str(), c2.as_str(), rel, v), ("x", "t0_ref", Rel::Ge, 3));
    }

    #[test]
    fn clock_difference_guard() {
        let e = Expr::Binary {
            op: BinOp::GreaterEqual,
            left: Box::new(Expr::Binary {
                op: BinOp::Sub,
                left: Box::new(Expr::Variable("x".into())),
                right: Box::new(Expr::Variable("y".into())),
            }),
            right: Box::new(Expr::Integer(2)),
        };
        let (c1, c2, rel, v) = translate_constraint(&e).unwrap();
        assert_eq!((c1.as_str(), c2.as_str(), rel, v), ("x", "y", Rel::Ge, 2));
    }

    #[test]
    fn equality_expands_to_two_constraints() {
        let e = Expr::Binary {
            op: BinOp::Equal,
            left: Box::new(Expr::Variable("x".into())),
            right: Box::new(Expr::Integer(4)),
        };
        let ops = translate_guard(&e).unwrap();
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn conjunction_flattens() {
        let e = Expr::Binary {
            op: BinOp::LogAnd,
            left: Box::new(Expr::Binary {
                op: BinOp::LessEqual,
                left: Box::new(Expr::Variable("x".into())),
                right: Box::new(Expr::Integer(3)),
            }),
            right: Box::new(Expr::Binary {
                op: BinOp::GreaterEqual,
                left: Box::new(Expr::Variable("x".into())),
                right: Box::new(Expr::Integer(1)),
            }),
        };
        assert_eq!(translate_guard(&e).unwrap().len(), 2);
    }

    #[test]
    fn reset_requires_clock_lhs_and_literal_rhs() {
        let e = Expr::Assign {
            op: AssignOp::Assign,
            left: Box::new(Expr::Variable("x".into())),
            right: Box::new(Expr::Integer(0)),
        };
        assert_eq!(translate_reset(&e).unwrap(), DbmOp::Reset("x".into(), 0));
    }
}
