//! Rewrite metrics in terms of other metrics
//!
//! When one formula's whole (simplified) tree appears inside another, the
//! occurrence is replaced by a bare reference to the first formula's name.
//!
//! Tie-break: larger matched trees go first, then the lexicographically
//! smaller source name. Each candidate is tried once per call against the
//! target's working tree, and substitutions that would close a reference
//! cycle are skipped.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::ast::{Expr, FormulaSet};
use crate::simplify::simplify;

/// Rewrite each formula in terms of the others
///
/// Returns only the formulas whose definition changed, in set order.
pub fn rewrite_in_terms_of_others(formulas: &FormulaSet) -> IndexMap<String, Expr> {
    let simplified: IndexMap<&str, Expr> = formulas
        .iter()
        .map(|(name, expr)| (name, simplify(expr)))
        .collect();
    let mut graph = ReferenceGraph::from_formulas(&simplified);
    let mut updates = IndexMap::new();

    for (target_index, (&target, original)) in simplified.iter().enumerate() {
        let mut candidates: Vec<(&str, &Expr, usize)> = simplified
            .iter()
            .enumerate()
            .filter(|&(source_index, (&source, tree))| {
                source != target
                    && !matches!(tree, Expr::Literal(_))
                    // An exact duplicate is expressed in terms of the earlier definition
                    && (tree != original || source_index < target_index)
                    && original.contains(tree)
            })
            .map(|(_, (&source, tree))| (source, tree, tree.node_count()))
            .collect();
        candidates.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));

        let mut working = original.clone();
        for (source, tree, _) in candidates {
            if !working.contains(tree) {
                continue;
            }
            if graph.reaches(source, target) {
                log::debug!("not rewriting `{target}` with `{source}`: would form a cycle");
                continue;
            }
            working = working.replace(tree, &Expr::event(source));
            graph.add_edge(target, source);
            log::debug!("rewrote `{target}` in terms of `{source}`");
        }

        if working != *original {
            updates.insert(target.to_string(), working);
        }
    }

    updates
}

/// `name -> names it references`, restricted to names of formulas in the set
struct ReferenceGraph<'a> {
    edges: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> ReferenceGraph<'a> {
    fn from_formulas(formulas: &'a IndexMap<&'a str, Expr>) -> Self {
        let mut graph = Self {
            edges: HashMap::new(),
        };
        for (&name, expr) in formulas {
            for event in expr.events() {
                if event.is_bare()
                    && let Some((&referenced, _)) = formulas.get_key_value(event.name.as_str())
                {
                    graph.add_edge(name, referenced);
                }
            }
        }
        graph
    }

    fn add_edge(&mut self, from: &'a str, to: &'a str) {
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    /// Whether `to` is reachable from `from` along one or more edges
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(next) = self.edges.get(node) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }
}
