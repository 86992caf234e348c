//! Canonical serialization of metric formulas
//!
//! The output is the escaped wire text handed to the monitoring tool, and
//! `parse` reads it back to the same tree. Parentheses are emitted only where
//! dropping them would change how the text parses.

use std::fmt::{self, Display, Write};

use crate::ast::{BinOp, CONDITIONAL_PRECEDENCE, EventRef, Expr, Function, Modifier, Qualifier};
use crate::lex::{is_word_char, is_word_start};

/// Canonical wire text of a formula
pub fn to_canonical_text(expr: &Expr) -> String {
    expr.to_string()
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::RetireLatency => f.write_str("R"),
        }
    }
}

impl Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_bare_name(f, &self.name)?;
        if !self.modifiers.is_empty() {
            f.write_char('@')?;
            for (i, Modifier { key, value }) in self.modifiers.iter().enumerate() {
                if i > 0 {
                    f.write_str("\\,")?;
                }
                write_term(f, key)?;
                if let Some(value) = value {
                    f.write_str("\\=")?;
                    write_term(f, value)?;
                }
            }
            f.write_char('@')?;
        }
        match self.qualifier {
            // `NAME@...@R` once a block is present, `NAME:R` otherwise
            Some(qualifier) if self.modifiers.is_empty() => write!(f, ":{qualifier}"),
            Some(qualifier) => write!(f, "{qualifier}"),
            None => Ok(()),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Event(event) => write!(f, "{event}"),
            Expr::Binary(lhs, op, rhs) => {
                let prec = op.precedence();
                let lhs_parens = if op.is_comparison() {
                    precedence(lhs) <= prec
                } else {
                    precedence(lhs) < prec
                };
                write_operand(f, lhs, lhs_parens)?;
                write!(f, " {op} ")?;
                write_operand(f, rhs, precedence(rhs) <= prec)
            }
            Expr::Call(function, args) => {
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_char(')')
            }
            Expr::Conditional {
                then,
                predicate,
                otherwise,
            } => {
                write_operand(f, then, is_conditional(then))?;
                f.write_str(" if ")?;
                write_operand(f, predicate, is_conditional(predicate))?;
                write!(f, " else {otherwise}")
            }
        }
    }
}

/// Atoms bind tightest; a conditional binds loosest
fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary(_, op, _) => op.precedence(),
        Expr::Conditional { .. } => CONDITIONAL_PRECEDENCE,
        Expr::Literal(_) | Expr::Event(_) | Expr::Call(..) => u8::MAX,
    }
}

fn is_conditional(expr: &Expr) -> bool {
    matches!(expr, Expr::Conditional { .. })
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, "if" | "else") || Function::from_name(name).is_some()
}

/// Bare event name, escaping anything the word lexer would stop at
fn write_bare_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let reserved = is_reserved(name);
    for (i, c) in name.chars().enumerate() {
        let plain = if i == 0 {
            is_word_start(c) && !reserved
        } else {
            is_word_char(c)
        };
        if !plain {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}

/// One term of an `@...@` block. Terms cannot carry `,` or `=`, which
/// always print as separators.
fn write_term(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    for c in text.chars() {
        if !is_word_char(c) {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}
