//! perfmetric - metric expression engine
//!
//! Parses performance-metric formulas, simplifies them, rewrites sets of
//! formulas in terms of one another and prints the canonical escaped text
//! consumed by the monitoring tool.
//!
//! Pipeline: parse() -> Expr -> expand_pebs() -> simplify() -> rewrite_in_terms_of_others() -> to_canonical_text()
//!
//! ## Quick Start
//!
//! ```
//! use perfmetric::{FormulaSet, canonicalize, rewrite_in_terms_of_others};
//!
//! assert_eq!(canonicalize("(2 * CYCLES) - (0.5 * CYCLES) + 0").unwrap(), "1.5 * CYCLES");
//!
//! let mut set = FormulaSet::new();
//! set.push_text("ipc", "INST_RETIRED.ANY / CPU_CLK_UNHALTED.THREAD").unwrap();
//! set.push_text("ipc_pct", "(INST_RETIRED.ANY / CPU_CLK_UNHALTED.THREAD) * 100").unwrap();
//! let updates = rewrite_in_terms_of_others(&set);
//! assert_eq!(updates["ipc_pct"].to_string(), "ipc * 100");
//! ```
//!
//! ## Formula syntax
//!
//! - `EVENT.NAME`, `cpu\-cycles` → event references (`\` escapes one character)
//! - `EVENT@cmask\=1\,edge@`, `cstate_core@c3\-residency@` → event with a term block
//! - `EVENT:c1:e1:u`, `EVENT:R`, `EVENT@ldlat\=3@R` → modifier shorthand, retire latency
//! - `EVENT * PEBS`, `EVENT * min(PEBS, k)` → retire-latency placeholder, see [`expand_pebs`]
//! - `+ - * /`, `< > <= >=`, `& |` → operators
//! - `a if cond else b` → conditional
//! - `min`, `max`, `d_ratio`, `source_count`, `has_event` → built-in functions
//!
//! Every operation is a pure function over owned trees; nothing here does I/O
//! or holds state between calls.

mod ast;
mod lex;
mod parse;
mod pebs;
mod pretty;
mod rewrite;
mod simplify;

use thiserror::Error;

// ============ Primary Public API ============

pub use ast::{BinOp, EventRef, Expr, Formula, FormulaSet, Function, Modifier, Qualifier};
pub use parse::{MAX_NESTING, MAX_TREE_DEPTH, SyntaxError, SyntaxErrorKind, parse};
pub use pebs::{PEBS, expand_pebs};
pub use pretty::to_canonical_text;
pub use rewrite::rewrite_in_terms_of_others;
pub use simplify::simplify;

/// Parse, simplify and print a formula in canonical form
pub fn canonicalize(text: &str) -> Result<String, ExprError> {
    let expr = parse(text)?;
    Ok(to_canonical_text(&simplify(&expr)))
}

// ============ Errors ============

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("duplicate formula name `{0}`")]
    DuplicateFormula(String),
}

// ============ Advanced: token access ============

/// Low-level lexer access (for tooling that highlights or inspects formulas)
pub mod advanced {
    pub use crate::lex::{Spanned, Token, tokenize};
}
