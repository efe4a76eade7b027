//! z3-backed base solver for the numeric fragment.
//!
//! Reference values are modeled as integers (object ids, 0 for null), so the
//! numeric solver can discharge everything that is not a high-level
//! predicate. High-level nodes never arrive here in normal operation; if one
//! does, it is skipped with a warning rather than mistranslated.

use std::collections::HashMap;

use tracing::warn;
use z3::ast::{Ast, Bool, Int};
use z3::{SatResult, Solver};

use crate::error::SolveError;
use crate::expr::{BinOp, CmpOp, Expr, LogicalOp, Value, VarType, Variable};

use super::{BaseSolver, SolverVerdict, Valuation};

enum Decl {
    Int(Int),
    Bool(Bool),
}

pub struct Z3BaseSolver {
    solver: Solver,
    scope_depth: u32,
    decls: HashMap<String, (Variable, Decl)>,
}

impl Z3BaseSolver {
    pub fn new() -> Self {
        Self {
            solver: Solver::new(),
            scope_depth: 0,
            decls: HashMap::new(),
        }
    }

    fn int_decl(&mut self, var: &Variable) -> Int {
        if let Some((_, Decl::Int(ast))) = self.decls.get(&var.name) {
            return ast.clone();
        }
        let ast = Int::new_const(var.name.as_str());
        self.decls
            .insert(var.name.clone(), (var.clone(), Decl::Int(ast.clone())));
        ast
    }

    fn bool_decl(&mut self, var: &Variable) -> Bool {
        if let Some((_, Decl::Bool(ast))) = self.decls.get(&var.name) {
            return ast.clone();
        }
        let ast = Bool::new_const(var.name.as_str());
        self.decls
            .insert(var.name.clone(), (var.clone(), Decl::Bool(ast.clone())));
        ast
    }

    fn encode_int(&mut self, expr: &Expr) -> Result<Int, SolveError> {
        match expr {
            Expr::IntConst(n) => Ok(Int::from_i64(*n)),
            Expr::Null => Ok(Int::from_i64(0)),
            Expr::RefConst(r) => Ok(Int::from_i64(i64::from(*r))),
            Expr::Var(v) if v.ty != VarType::Bool => Ok(self.int_decl(v)),
            Expr::Binary { op, left, right } => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(match op {
                    BinOp::Add => Int::add(&[&l, &r]),
                    BinOp::Sub => Int::sub(&[&l, &r]),
                    BinOp::Mul => Int::mul(&[&l, &r]),
                    BinOp::Div => l.div(&r),
                    BinOp::Rem => l.rem(&r),
                })
            }
            other => Err(SolveError::Unencodable(other.to_string())),
        }
    }

    fn encode_bool(&mut self, expr: &Expr) -> Result<Bool, SolveError> {
        match expr {
            Expr::True => Ok(Bool::from_bool(true)),
            Expr::False => Ok(Bool::from_bool(false)),
            Expr::Var(v) if v.ty == VarType::Bool => Ok(self.bool_decl(v)),
            Expr::Negation(inner) => Ok(self.encode_bool(inner)?.not()),
            Expr::Compound { op, left, right } => {
                let l = self.encode_bool(left)?;
                let r = self.encode_bool(right)?;
                Ok(match op {
                    LogicalOp::And => Bool::and(&[&l, &r]),
                    LogicalOp::Or => Bool::or(&[&l, &r]),
                })
            }
            Expr::Compare { op, left, right } => {
                let l = self.encode_int(left)?;
                let r = self.encode_int(right)?;
                Ok(match op {
                    CmpOp::Eq => l._eq(&r),
                    CmpOp::Ne => l._eq(&r).not(),
                    CmpOp::Lt => l.lt(&r),
                    CmpOp::Le => l.le(&r),
                    CmpOp::Gt => l.gt(&r),
                    CmpOp::Ge => l.ge(&r),
                })
            }
            other => Err(SolveError::Unencodable(other.to_string())),
        }
    }
}

impl BaseSolver for Z3BaseSolver {
    fn push(&mut self) {
        self.solver.push();
        self.scope_depth += 1;
    }

    fn pop(&mut self, n: usize) {
        let n = (n as u32).min(self.scope_depth);
        if n > 0 {
            self.solver.pop(n);
            self.scope_depth -= n;
        }
    }

    fn add(&mut self, constraints: &[Expr]) {
        for expr in constraints {
            match self.encode_bool(expr) {
                Ok(encoded) => self.solver.assert(&encoded),
                Err(err) => {
                    warn!(%err, "base solver skipped constraint");
                }
            }
        }
    }

    fn solve(&mut self, val: &mut Valuation) -> SolverVerdict {
        match self.solver.check() {
            SatResult::Sat => {
                if let Some(model) = self.solver.get_model() {
                    for (var, decl) in self.decls.values() {
                        match decl {
                            Decl::Int(ast) => {
                                if let Some(v) = model.eval(ast, true).and_then(|x| x.as_i64()) {
                                    val.set_casted(var, Value::Int(v));
                                }
                            }
                            Decl::Bool(ast) => {
                                if let Some(b) = model.eval(ast, true).and_then(|x| x.as_bool()) {
                                    val.set_casted(var, Value::Bool(b));
                                }
                            }
                        }
                    }
                }
                SolverVerdict::Sat
            }
            SatResult::Unsat => SolverVerdict::Unsat,
            SatResult::Unknown => SolverVerdict::DontKnow,
        }
    }

    fn dispose(&mut self) {
        self.solver.reset();
        self.decls.clear();
        self.scope_depth = 0;
    }
}
