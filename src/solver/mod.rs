//! Solver-facing types: verdicts, valuations, the base-solver contract, and
//! the layered scope stack for held-back high-level constraints.

pub mod hybrid;
pub mod scope;
pub mod simplify;
pub mod z3_base;

use std::collections::BTreeMap;
use std::fmt;

use crate::expr::{Expr, Value, VarType, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverVerdict {
    Sat,
    Unsat,
    DontKnow,
}

impl fmt::Display for SolverVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SolverVerdict::Sat => "SAT",
            SolverVerdict::Unsat => "UNSAT",
            SolverVerdict::DontKnow => "DONT_KNOW",
        })
    }
}

/// Variable-to-value bindings produced by a solve.
#[derive(Debug, Default, Clone)]
pub struct Valuation {
    entries: BTreeMap<String, (Variable, Value)>,
}

impl Valuation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(|(_, v)| *v)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name).map(|(var, _)| var)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn set(&mut self, var: &Variable, value: Value) {
        self.entries.insert(var.name.clone(), (var.clone(), value));
    }

    /// Type-aware write: the value is coerced to the variable's declared
    /// type. Unconvertible writes are dropped.
    pub fn set_casted(&mut self, var: &Variable, value: Value) {
        let casted = match (var.ty, value) {
            (VarType::Int, v) => v.as_i64().map(Value::Int),
            (VarType::Bool, Value::Bool(b)) => Some(Value::Bool(b)),
            (VarType::Bool, Value::Int(i)) => Some(Value::Bool(i != 0)),
            (VarType::Bool, Value::Ref(_)) => None,
            (VarType::Reference, Value::Ref(r)) => Some(Value::Ref(r)),
            (VarType::Reference, Value::Int(i)) => {
                u32::try_from(i).ok().map(Value::Ref)
            }
            (VarType::Reference, Value::Bool(_)) => None,
        };
        if let Some(v) = casted {
            self.entries.insert(var.name.clone(), (var.clone(), v));
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Variable, Value)> {
        self.entries.values().map(|(var, v)| (var, *v))
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.entries.values().map(|(var, _)| var)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The underlying numeric solver, consumed through a small scoped interface.
pub trait BaseSolver {
    fn push(&mut self);
    fn pop(&mut self, n: usize);
    fn add(&mut self, constraints: &[Expr]);
    fn solve(&mut self, val: &mut Valuation) -> SolverVerdict;
    fn dispose(&mut self);
}
