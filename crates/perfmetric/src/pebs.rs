//! Expand the `PEBS` retire-latency placeholder
//!
//! Metric files write `EVENT * PEBS` (or `EVENT * min(PEBS, k)`) where the
//! event's sampled retirement latency should be used when the tool supports
//! it. This pass replaces the placeholder with the retire-latency form of the
//! event on the left of the `*`.

use crate::ast::{BinOp, EventRef, Expr, Function, Qualifier};

/// Name of the placeholder event
pub const PEBS: &str = "PEBS";

/// Replace `E * PEBS` with `E * E:R` and `E * min(PEBS, k)` with
/// `E * min(E:R, k)` (likewise `max`), anywhere in the tree
pub fn expand_pebs(expr: Expr) -> Expr {
    match expr {
        Expr::Binary(lhs, BinOp::Mul, rhs) => match *lhs {
            Expr::Event(event) => {
                let rhs = expand_against(&event, *rhs);
                Expr::Event(event).binary(BinOp::Mul, rhs)
            }
            lhs => expand_pebs(lhs).binary(BinOp::Mul, expand_pebs(*rhs)),
        },
        Expr::Binary(lhs, op, rhs) => expand_pebs(*lhs).binary(op, expand_pebs(*rhs)),
        Expr::Call(function, args) => {
            Expr::Call(function, args.into_iter().map(expand_pebs).collect())
        }
        Expr::Conditional {
            then,
            predicate,
            otherwise,
        } => Expr::conditional(
            expand_pebs(*then),
            expand_pebs(*predicate),
            expand_pebs(*otherwise),
        ),
        leaf @ (Expr::Literal(_) | Expr::Event(_)) => leaf,
    }
}

/// Right operand of `event * rhs`
fn expand_against(event: &EventRef, rhs: Expr) -> Expr {
    match rhs {
        Expr::Event(placeholder) if is_placeholder(&placeholder) => {
            log::trace!("expanding PEBS against `{event}`");
            Expr::Event(retire_latency(event))
        }
        Expr::Call(function @ (Function::Min | Function::Max), mut args)
            if args.first().is_some_and(|arg| {
                matches!(arg, Expr::Event(placeholder) if is_placeholder(placeholder))
            }) =>
        {
            log::trace!("expanding PEBS in `{function}` against `{event}`");
            args[0] = Expr::Event(retire_latency(event));
            let args = args
                .into_iter()
                .enumerate()
                .map(|(i, arg)| if i == 0 { arg } else { expand_pebs(arg) })
                .collect();
            Expr::Call(function, args)
        }
        other => expand_pebs(other),
    }
}

fn is_placeholder(event: &EventRef) -> bool {
    event.is_bare() && event.name == PEBS
}

fn retire_latency(event: &EventRef) -> EventRef {
    event.clone().with_qualifier(Qualifier::RetireLatency)
}
