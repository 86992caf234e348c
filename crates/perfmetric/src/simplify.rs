//! Algebraic simplification
//!
//! Bottom-up rewriting: children are simplified before their parent, and
//! whole passes repeat until one leaves the tree unchanged. Rules:
//! - `x + 0`, `0 + x`, `x - 0` → `x`
//! - `(a * E) - (b * E)` → `(a - b) * E` for literal coefficients and equal events
//! - `(v if P else 0) if P else 0` → `v if P else 0`
//! - `x & 1`, `1 & x` → `x`
//!
//! `v if has_event(E) else 0` is the optional-event idiom and is kept as is.

use crate::ast::{BinOp, Expr};

/// Simplify to a fixpoint. Total and idempotent.
pub fn simplify(expr: &Expr) -> Expr {
    let mut current = pass(expr);
    let mut passes = 1;
    loop {
        let next = pass(&current);
        if next == current {
            log::trace!("simplified `{current}` in {passes} pass(es)");
            return current;
        }
        current = next;
        passes += 1;
    }
}

/// One bottom-up pass
fn pass(expr: &Expr) -> Expr {
    match expr {
        Expr::Literal(_) | Expr::Event(_) => expr.clone(),
        Expr::Binary(lhs, op, rhs) => simplify_binary(pass(lhs), *op, pass(rhs)),
        Expr::Call(function, args) => Expr::Call(*function, args.iter().map(pass).collect()),
        Expr::Conditional {
            then,
            predicate,
            otherwise,
        } => simplify_conditional(pass(then), pass(predicate), pass(otherwise)),
    }
}

fn simplify_binary(lhs: Expr, op: BinOp, rhs: Expr) -> Expr {
    match op {
        BinOp::Add if rhs.is_literal(0.0) => lhs,
        BinOp::Add if lhs.is_literal(0.0) => rhs,
        BinOp::Sub if rhs.is_literal(0.0) => lhs,
        BinOp::Sub => merge_coefficients(lhs, rhs),
        BinOp::And if rhs.is_literal(1.0) => lhs,
        BinOp::And if lhs.is_literal(1.0) => rhs,
        _ => lhs.binary(op, rhs),
    }
}

/// `(a * E) - (b * E)` → `(a - b) * E`
fn merge_coefficients(lhs: Expr, rhs: Expr) -> Expr {
    if let (Some((a, e1)), Some((b, e2))) = (scaled_event(&lhs), scaled_event(&rhs))
        && e1 == e2
    {
        let coefficient = a - b;
        if coefficient.is_finite() {
            return Expr::lit(coefficient).binary(BinOp::Mul, e1.clone());
        }
    }
    lhs.binary(BinOp::Sub, rhs)
}

fn scaled_event(expr: &Expr) -> Option<(f64, &Expr)> {
    let Expr::Binary(coefficient, BinOp::Mul, event) = expr else {
        return None;
    };
    match (coefficient.as_ref(), event.as_ref()) {
        (Expr::Literal(a), Expr::Event(_)) => Some((*a, event.as_ref())),
        _ => None,
    }
}

fn simplify_conditional(then: Expr, predicate: Expr, otherwise: Expr) -> Expr {
    if otherwise.is_literal(0.0)
        && let Expr::Conditional {
            predicate: inner_predicate,
            otherwise: inner_otherwise,
            ..
        } = &then
        && inner_otherwise.is_literal(0.0)
        && **inner_predicate == predicate
    {
        return then;
    }
    Expr::conditional(then, predicate, otherwise)
}
