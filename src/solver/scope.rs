//! Scope-stacked storage for held-back high-level constraints.
//!
//! Each frame owns the high-level constraints added within that scope and a
//! free-variable map cloned from the enclosing scope on push, so variables
//! stay visible while inner frames add new ones. A sentinel base frame is
//! always kept alive; draining pops clamp there.

use std::collections::BTreeMap;

use tracing::warn;

use crate::expr::{Expr, Variable};

#[derive(Debug, Default, Clone)]
pub struct ScopeFrame {
    pub constraints: Vec<Expr>,
    pub free_vars: BTreeMap<String, Variable>,
}

#[derive(Debug, Clone)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { frames: vec![ScopeFrame::default()] }
    }

    /// Number of live scopes above the sentinel: pushes minus pops.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn push(&mut self) {
        let inherited = self
            .frames
            .last()
            .map(|f| f.free_vars.clone())
            .unwrap_or_default();
        self.frames.push(ScopeFrame { constraints: Vec::new(), free_vars: inherited });
    }

    /// Pops `n` frames, constraint list and free-variable map pairwise.
    /// Returns the number actually popped; over-pop clamps at the sentinel.
    pub fn pop(&mut self, n: usize) -> usize {
        let available = self.frames.len() - 1;
        let popped = n.min(available);
        if popped < n {
            warn!(requested = n, available, "scope over-pop clamped at sentinel frame");
        }
        self.frames.truncate(self.frames.len() - popped);
        popped
    }

    /// Appends a high-level constraint to the top frame and unions its free
    /// variables into the top frame's map.
    pub fn add_high_level(&mut self, expr: Expr) {
        let top = self
            .frames
            .last_mut()
            .expect("sentinel frame is always present");
        expr.collect_free_variables(&mut top.free_vars);
        top.constraints.push(expr);
    }

    pub fn has_high_level(&self) -> bool {
        self.frames.iter().any(|f| !f.constraints.is_empty())
    }

    /// All held-back constraints, flattened over frames, oldest scope first.
    pub fn all_high_level(&self) -> Vec<Expr> {
        self.frames
            .iter()
            .flat_map(|f| f.constraints.iter().cloned())
            .collect()
    }

    /// Free variables visible in the current scope.
    pub fn current_free_vars(&self) -> &BTreeMap<String, Variable> {
        &self
            .frames
            .last()
            .expect("sentinel frame is always present")
            .free_vars
    }

    pub fn top_constraint_count(&self) -> usize {
        self.frames.last().map(|f| f.constraints.len()).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.frames.push(ScopeFrame::default());
    }
}
