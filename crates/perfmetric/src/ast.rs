//! AST types for metric formulas
//!
//! Trees are plain owned values. Passes never mutate a tree in place; they
//! build and return new ones.

use indexmap::IndexMap;

use crate::ExprError;
use crate::parse::{SyntaxError, parse};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric constant, always finite
    Literal(f64),

    /// Event (or metric) reference: `INST_RETIRED.ANY`, `@EVENT,cmask\=1@`
    Event(EventRef),

    /// Binary operation: `a + b`, `a < b`, `a & b`
    Binary(Box<Expr>, BinOp, Box<Expr>),

    /// Built-in function call: `min(a, b)`, `has_event(EVENT)`
    Call(Function, Vec<Expr>),

    /// `then if predicate else otherwise`
    Conditional {
        then: Box<Expr>,
        predicate: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub name: String,
    /// Unique keys, kept in first-seen order
    pub modifiers: Vec<Modifier>,
    pub qualifier: Option<Qualifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    pub key: String,
    /// `None` for flags such as `u` or `k`
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    /// `:R`, the retirement-latency sample of the event rather than its count
    RetireLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // Comparison
    Lt,
    Gt,
    Le,
    Ge,

    // Logical
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    DRatio,
    SourceCount,
    HasEvent,
}

/// Binding strength, higher binds tighter. Conditionals sit below every
/// binary operator.
pub(crate) const CONDITIONAL_PRECEDENCE: u8 = 0;

impl BinOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 3,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Mul | BinOp::Div => 5,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
        }
    }
}

impl Function {
    pub const ALL: [Function; 5] = [
        Function::Min,
        Function::Max,
        Function::DRatio,
        Function::SourceCount,
        Function::HasEvent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Function::Min => "min",
            Function::Max => "max",
            Function::DRatio => "d_ratio",
            Function::SourceCount => "source_count",
            Function::HasEvent => "has_event",
        }
    }

    pub fn from_name(name: &str) -> Option<Function> {
        Function::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn arity(self) -> usize {
        match self {
            Function::Min | Function::Max | Function::DRatio => 2,
            Function::SourceCount | Function::HasEvent => 1,
        }
    }

    /// Functions that inspect an event's presence rather than its value
    pub fn takes_event(self) -> bool {
        matches!(self, Function::SourceCount | Function::HasEvent)
    }
}

impl EventRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifiers: Vec::new(),
            qualifier: None,
        }
    }

    pub fn with_modifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.modifiers.push(Modifier {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>) -> Self {
        self.modifiers.push(Modifier {
            key: key.into(),
            value: None,
        });
        self
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn modifier(&self, key: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|m| m.key == key)
    }

    /// A bare name with nothing attached, the shape used to refer to other metrics
    pub fn is_bare(&self) -> bool {
        self.modifiers.is_empty() && self.qualifier.is_none()
    }
}

impl Expr {
    pub fn lit(value: f64) -> Self {
        Expr::Literal(value)
    }

    pub fn event(name: impl Into<String>) -> Self {
        Expr::Event(EventRef::new(name))
    }

    pub fn binary(self, op: BinOp, rhs: Expr) -> Self {
        Expr::Binary(Box::new(self), op, Box::new(rhs))
    }

    pub fn conditional(then: Expr, predicate: Expr, otherwise: Expr) -> Self {
        Expr::Conditional {
            then: Box::new(then),
            predicate: Box::new(predicate),
            otherwise: Box::new(otherwise),
        }
    }

    /// `has_event(event)`
    pub fn has_event(event: EventRef) -> Self {
        Expr::Call(Function::HasEvent, vec![Expr::Event(event)])
    }

    pub fn is_literal(&self, value: f64) -> bool {
        matches!(self, Expr::Literal(v) if *v == value)
    }

    pub fn node_count(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Event(_) => 1,
            Expr::Binary(lhs, _, rhs) => 1 + lhs.node_count() + rhs.node_count(),
            Expr::Call(_, args) => 1 + args.iter().map(Expr::node_count).sum::<usize>(),
            Expr::Conditional {
                then,
                predicate,
                otherwise,
            } => 1 + then.node_count() + predicate.node_count() + otherwise.node_count(),
        }
    }

    /// Height of the tree; a leaf is 1
    pub fn depth(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Event(_) => 1,
            Expr::Binary(lhs, _, rhs) => 1 + lhs.depth().max(rhs.depth()),
            Expr::Call(_, args) => 1 + args.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Conditional {
                then,
                predicate,
                otherwise,
            } => 1 + then.depth().max(predicate.depth()).max(otherwise.depth()),
        }
    }

    /// Structural subtree test, including the tree itself
    pub fn contains(&self, needle: &Expr) -> bool {
        if self == needle {
            return true;
        }
        match self {
            Expr::Literal(_) | Expr::Event(_) => false,
            Expr::Binary(lhs, _, rhs) => lhs.contains(needle) || rhs.contains(needle),
            Expr::Call(_, args) => args.iter().any(|a| a.contains(needle)),
            Expr::Conditional {
                then,
                predicate,
                otherwise,
            } => then.contains(needle) || predicate.contains(needle) || otherwise.contains(needle),
        }
    }

    /// New tree with every outermost occurrence of `needle` swapped for `replacement`
    pub fn replace(&self, needle: &Expr, replacement: &Expr) -> Expr {
        if self == needle {
            return replacement.clone();
        }
        match self {
            Expr::Literal(_) | Expr::Event(_) => self.clone(),
            Expr::Binary(lhs, op, rhs) => Expr::Binary(
                Box::new(lhs.replace(needle, replacement)),
                *op,
                Box::new(rhs.replace(needle, replacement)),
            ),
            Expr::Call(f, args) => Expr::Call(
                *f,
                args.iter().map(|a| a.replace(needle, replacement)).collect(),
            ),
            Expr::Conditional {
                then,
                predicate,
                otherwise,
            } => Expr::conditional(
                then.replace(needle, replacement),
                predicate.replace(needle, replacement),
                otherwise.replace(needle, replacement),
            ),
        }
    }

    /// Every event reference in the tree, in first-seen order
    pub fn events(&self) -> Vec<&EventRef> {
        let mut out = Vec::new();
        collect_events(self, &mut out);
        out
    }

    /// Distinct referenced names, in first-seen order
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for event in self.events() {
            if !names.contains(&event.name.as_str()) {
                names.push(&event.name);
            }
        }
        names
    }
}

fn collect_events<'a>(expr: &'a Expr, out: &mut Vec<&'a EventRef>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Event(event) => out.push(event),
        Expr::Binary(lhs, _, rhs) => {
            collect_events(lhs, out);
            collect_events(rhs, out);
        }
        Expr::Call(_, args) => {
            for arg in args {
                collect_events(arg, out);
            }
        }
        Expr::Conditional {
            then,
            predicate,
            otherwise,
        } => {
            collect_events(then, out);
            collect_events(predicate, out);
            collect_events(otherwise, out);
        }
    }
}

// ============ Named formulas ============

/// A metric name paired with its formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub name: String,
    pub expr: Expr,
}

impl Formula {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, SyntaxError> {
        Ok(Self::new(name, parse(text)?))
    }
}

/// Insertion-ordered set of uniquely named formulas
///
/// Iteration order is insertion order, which keeps rewriter output
/// reproducible across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaSet {
    formulas: IndexMap<String, Expr>,
}

impl FormulaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a formula, rejecting a name that is already present
    pub fn push(&mut self, formula: Formula) -> Result<(), ExprError> {
        if self.formulas.contains_key(&formula.name) {
            return Err(ExprError::DuplicateFormula(formula.name));
        }
        self.formulas.insert(formula.name, formula.expr);
        Ok(())
    }

    /// Add or replace a formula, returning the previous definition
    pub fn insert(&mut self, name: impl Into<String>, expr: Expr) -> Option<Expr> {
        self.formulas.insert(name.into(), expr)
    }

    /// Parse and add a formula
    pub fn push_text(&mut self, name: impl Into<String>, text: &str) -> Result<(), ExprError> {
        self.push(Formula::parse(name, text)?)
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.formulas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formulas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.formulas.iter().map(|(name, expr)| (name.as_str(), expr))
    }
}

impl FromIterator<(String, Expr)> for FormulaSet {
    /// Later duplicates replace earlier ones, as with `insert`
    fn from_iter<I: IntoIterator<Item = (String, Expr)>>(iter: I) -> Self {
        Self {
            formulas: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FormulaSet {
    type Item = (String, Expr);
    type IntoIter = indexmap::map::IntoIter<String, Expr>;

    fn into_iter(self) -> Self::IntoIter {
        self.formulas.into_iter()
    }
}
