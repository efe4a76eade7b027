//! The concolic-explorer contract consumed by the solving layer, plus a
//! concrete `MethodExplorer` able to drive it.
//!
//! The explorer owns everything scoped to one analysis: the recorded
//! decision tree, the symbolic-objects registry, and the reachability side
//! table for exact-type predicates.

pub mod symbolic;

use std::collections::BTreeMap;

use crate::expr::reach::ReachabilityTable;
use crate::expr::Expr;
use crate::vm::{InstructionRef, ThreadInfo};

pub use symbolic::SymbolicObjects;

/// The method a concolic analysis replays.
#[derive(Debug, Clone)]
pub struct MethodUnderAnalysis {
    pub class_name: String,
    pub method_name: String,
    pub signature: String,
    pub is_static: bool,
    /// Parameter name to declared static type name, in declaration order.
    pub parameters: Vec<(String, String)>,
}

impl MethodUnderAnalysis {
    pub fn full_name(&self) -> String {
        format!("{}.{}{}", self.class_name, self.method_name, self.signature)
    }
}

/// One recorded branch decision.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub instruction: InstructionRef,
    pub branch_idx: usize,
    /// All branch alternatives, present only when the decision was fresh
    /// (on replay the tree already holds them).
    pub constraints: Option<Vec<Expr>>,
}

/// The explorer's internal constraints tree, reduced to what this layer
/// consumes: the flat set of recorded decisions.
#[derive(Debug, Default, Clone)]
pub struct ConstraintsTree {
    decisions: Vec<DecisionRecord>,
}

impl ConstraintsTree {
    pub fn record(&mut self, record: DecisionRecord) {
        self.decisions.push(record);
    }

    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    /// Every high-level constraint recorded anywhere in the tree, across all
    /// branch alternatives. Duplicates are tolerated by the consumers.
    pub fn all_decision_constraints(&self) -> Vec<Expr> {
        self.decisions
            .iter()
            .filter_map(|d| d.constraints.as_ref())
            .flatten()
            .filter(|e| e.contains_high_level())
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.decisions.clear();
    }
}

/// The explorer contract consumed by the hybrid solver and the dispatch
/// instrumentation.
pub trait Explorer {
    /// True while collecting fresh decisions; false during path replay.
    fn needs_decisions(&self) -> bool;

    /// Records a branch decision. On replay `constraints` is `None`.
    fn decision(
        &mut self,
        thread: &ThreadInfo,
        instruction: &InstructionRef,
        branch_idx: usize,
        constraints: Option<Vec<Expr>>,
    );

    fn constraints_tree(&self) -> &ConstraintsTree;

    /// Parameter name to declared static type, including `this` for
    /// non-static methods.
    fn parameter_type_constraints(&self) -> BTreeMap<String, String>;

    /// Explicit getter for the method under analysis.
    fn method_under_analysis(&self) -> Option<&MethodUnderAnalysis>;

    fn symbolic_objects(&self) -> &SymbolicObjects;
    fn symbolic_objects_mut(&mut self) -> &mut SymbolicObjects;

    fn reachability(&self) -> &ReachabilityTable;
    fn reachability_mut(&mut self) -> &mut ReachabilityTable;
}

/// A working explorer implementation sufficient to drive the instrumentation
/// and the hybrid solver.
#[derive(Debug, Default)]
pub struct MethodExplorer {
    method: Option<MethodUnderAnalysis>,
    needs_decisions: bool,
    tree: ConstraintsTree,
    /// Journal of every `decision()` call, fresh and replayed alike. Replay
    /// matching relies on the branch indices being reproducible.
    decision_log: Vec<(InstructionRef, usize)>,
    symbolic: SymbolicObjects,
    reach: ReachabilityTable,
}

impl MethodExplorer {
    pub fn new(method: MethodUnderAnalysis) -> Self {
        Self {
            method: Some(method),
            needs_decisions: true,
            ..Self::default()
        }
    }

    pub fn without_method() -> Self {
        Self { needs_decisions: true, ..Self::default() }
    }

    pub fn set_needs_decisions(&mut self, fresh: bool) {
        self.needs_decisions = fresh;
    }

    pub fn decision_log(&self) -> &[(InstructionRef, usize)] {
        &self.decision_log
    }

    /// Begins a replay of a previously discovered path: decision recording
    /// switches off, the journal restarts, recorded constraints stay.
    pub fn begin_replay(&mut self) {
        self.needs_decisions = false;
        self.decision_log.clear();
    }

    /// Resets per-analysis state at the start of a new analysis.
    pub fn reset(&mut self) {
        self.tree.clear();
        self.decision_log.clear();
        self.symbolic = SymbolicObjects::default();
        self.reach.clear();
        self.needs_decisions = true;
    }
}

impl Explorer for MethodExplorer {
    fn needs_decisions(&self) -> bool {
        self.needs_decisions
    }

    fn decision(
        &mut self,
        _thread: &ThreadInfo,
        instruction: &InstructionRef,
        branch_idx: usize,
        constraints: Option<Vec<Expr>>,
    ) {
        self.decision_log.push((instruction.clone(), branch_idx));
        if constraints.is_some() {
            self.tree.record(DecisionRecord {
                instruction: instruction.clone(),
                branch_idx,
                constraints,
            });
        }
    }

    fn constraints_tree(&self) -> &ConstraintsTree {
        &self.tree
    }

    fn parameter_type_constraints(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(method) = &self.method {
            if !method.is_static {
                out.insert("this".to_string(), method.class_name.clone());
            }
            for (name, ty) in &method.parameters {
                out.insert(name.clone(), ty.clone());
            }
        }
        out
    }

    fn method_under_analysis(&self) -> Option<&MethodUnderAnalysis> {
        self.method.as_ref()
    }

    fn symbolic_objects(&self) -> &SymbolicObjects {
        &self.symbolic
    }

    fn symbolic_objects_mut(&mut self) -> &mut SymbolicObjects {
        &mut self.symbolic
    }

    fn reachability(&self) -> &ReachabilityTable {
        &self.reach
    }

    fn reachability_mut(&mut self) -> &mut ReachabilityTable {
        &mut self.reach
    }
}
