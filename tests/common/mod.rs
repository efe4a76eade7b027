//! Shared fixtures: scripted base solver and oracle, plus small class
//! worlds used across the integration suites.

#![allow(dead_code)]

use std::cell::RefCell;

use lucid_solver::error::OracleError;
use lucid_solver::explorer::{MethodExplorer, MethodUnderAnalysis};
use lucid_solver::expr::{Expr, Value, Variable};
use lucid_solver::oracle::{Oracle, OracleReply, SolveRequest};
use lucid_solver::solver::{BaseSolver, SolverVerdict, Valuation};
use lucid_solver::vm::class::{ClassDef, FieldType};
use lucid_solver::vm::{ClassLoader, ClassRegistry, Heap, ThreadInfo};

#[derive(Default)]
pub struct BaseState {
    pub verdict: Option<SolverVerdict>,
    pub forwarded: Vec<Expr>,
    pub pushes: usize,
    pub pops: usize,
    pub solves: usize,
    pub assignments: Vec<(Variable, Value)>,
}

/// A base solver with a scripted verdict that journals every call.
#[derive(Default)]
pub struct ScriptedBase(pub RefCell<BaseState>);

impl ScriptedBase {
    pub fn unsat() -> Self {
        let base = Self::default();
        base.0.borrow_mut().verdict = Some(SolverVerdict::Unsat);
        base
    }

    pub fn with_assignment(var: Variable, value: Value) -> Self {
        let base = Self::default();
        base.0.borrow_mut().assignments.push((var, value));
        base
    }
}

impl BaseSolver for &ScriptedBase {
    fn push(&mut self) {
        self.0.borrow_mut().pushes += 1;
    }

    fn pop(&mut self, n: usize) {
        self.0.borrow_mut().pops += n;
    }

    fn add(&mut self, constraints: &[Expr]) {
        self.0.borrow_mut().forwarded.extend(constraints.iter().cloned());
    }

    fn solve(&mut self, val: &mut Valuation) -> SolverVerdict {
        let mut state = self.0.borrow_mut();
        state.solves += 1;
        for (var, value) in &state.assignments {
            val.set_casted(var, *value);
        }
        state.verdict.unwrap_or(SolverVerdict::Sat)
    }

    fn dispose(&mut self) {}
}

pub enum OracleScript {
    Reply(OracleReply),
    Refuse,
}

#[derive(Default)]
pub struct OracleState {
    pub calls: usize,
    pub last_request: Option<serde_json::Value>,
}

/// An oracle with a scripted reply that captures the serialised requests.
pub struct ScriptedOracle {
    script: OracleScript,
    pub state: RefCell<OracleState>,
}

impl ScriptedOracle {
    pub fn sat() -> Self {
        Self::replying(OracleReply { verdict: SolverVerdict::Sat, valuation: None })
    }

    pub fn replying(reply: OracleReply) -> Self {
        Self { script: OracleScript::Reply(reply), state: RefCell::new(OracleState::default()) }
    }

    pub fn from_json(body: &str) -> Self {
        Self::replying(lucid_solver::oracle::parse_reply(body))
    }

    pub fn refusing() -> Self {
        Self { script: OracleScript::Refuse, state: RefCell::new(OracleState::default()) }
    }

    pub fn calls(&self) -> usize {
        self.state.borrow().calls
    }

    pub fn last_request(&self) -> Option<serde_json::Value> {
        self.state.borrow().last_request.clone()
    }
}

impl Oracle for &ScriptedOracle {
    fn solve(&self, request: &SolveRequest) -> Result<OracleReply, OracleError> {
        let mut state = self.state.borrow_mut();
        state.calls += 1;
        state.last_request = serde_json::to_value(request).ok();
        match &self.script {
            OracleScript::Reply(reply) => Ok(reply.clone()),
            OracleScript::Refuse => {
                Err(OracleError::Transport("connection refused".to_string()))
            }
        }
    }
}

/// `IAnimal` with concrete `Dog` and `Cat` implementors.
pub fn animal_registry() -> ClassRegistry {
    let mut reg = ClassRegistry::new();
    reg.add(ClassDef::interface("IAnimal").abstract_method("makeSound", "()V"));
    reg.add(ClassDef::class("Dog").implements("IAnimal").method("makeSound", "()V"));
    reg.add(ClassDef::class("Cat").implements("IAnimal").method("makeSound", "()V"));
    reg
}

/// A singly-linked `Node` with an int payload.
pub fn node_registry() -> ClassRegistry {
    let mut reg = ClassRegistry::new();
    reg.add(
        ClassDef::class("Node")
            .field("value", FieldType::Int)
            .field("next", FieldType::reference("Node")),
    );
    reg
}

pub fn list_explorer() -> MethodExplorer {
    MethodExplorer::new(MethodUnderAnalysis {
        class_name: "demo.List".to_string(),
        method_name: "insert".to_string(),
        signature: "(LNode;)V".to_string(),
        is_static: false,
        parameters: vec![("head".to_string(), "Node".to_string())],
    })
}

pub fn zoo_explorer() -> MethodExplorer {
    MethodExplorer::new(MethodUnderAnalysis {
        class_name: "demo.Zoo".to_string(),
        method_name: "f".to_string(),
        signature: "(LIAnimal;)V".to_string(),
        is_static: false,
        parameters: vec![("a".to_string(), "IAnimal".to_string())],
    })
}

pub fn fresh_world(registry: &ClassRegistry) -> (Heap, ClassLoader, ThreadInfo) {
    let _ = registry;
    (Heap::new(), ClassLoader::new(), ThreadInfo::new("main"))
}
