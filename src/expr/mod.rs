//! Expression algebra for the hybrid solving layer.
//!
//! Only a few node kinds matter to this layer: the propositional combinators,
//! the type predicates (`InstanceOf`, `IsExactType`), and reference
//! comparisons. Arithmetic and numeric comparisons are opaque leaves for
//! classification purposes and are discharged by the base solver.
//!
//! The rendered `Display` form is shared with the oracle: reference variables
//! keep their `(ref)`-suffixed names and type signatures keep their JVM
//! descriptor form (`LDog;`), so the oracle can refer back to both verbatim.

pub mod reach;

use std::collections::BTreeMap;
use std::fmt;

use self::reach::PredId;

/// Null object reference. Heap ids start at 1.
pub const NULL_REF: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Int,
    Bool,
    Reference,
}

/// A named, typed symbolic placeholder. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub ty: VarType,
}

impl Variable {
    pub fn int(name: impl Into<String>) -> Self {
        Self { name: name.into(), ty: VarType::Int }
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self { name: name.into(), ty: VarType::Bool }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self { name: name.into(), ty: VarType::Reference }
    }

    /// Reference variables are distinguished by the conventional `(ref)`
    /// suffix on the name, possibly behind a dotted field path.
    pub fn is_reference_name(name: &str) -> bool {
        name.ends_with("(ref)")
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A concrete value: primitive, reference id, or null (reference 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Ref(u32),
}

impl Value {
    pub fn null() -> Self {
        Value::Ref(NULL_REF)
    }

    pub fn as_ref_id(&self) -> Option<u32> {
        match self {
            Value::Ref(r) => Some(*r),
            // Integer-valued entries may hold reference ids; callers that
            // accept this reading must validate against the heap.
            Value::Int(i) if *i >= 0 => u32::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Ref(r) => Some(i64::from(*r)),
            Value::Bool(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Tagged expression tree.
///
/// `IsExactType` carries a `PredId` instead of a mutable unreachable flag;
/// reachability is tracked in a [`reach::ReachabilityTable`] side table owned
/// by the analysis session.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    True,
    False,
    IntConst(i64),
    /// The null reference constant. Renders as `null`.
    Null,
    /// A concrete, non-null object reference.
    RefConst(u32),
    Var(Variable),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negation(Box<Expr>),
    Compound {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// "subject is an instance of (a subtype of) the named type."
    InstanceOf {
        subject: Box<Expr>,
        type_name: String,
    },
    /// "the runtime type of subject is exactly the signed type."
    IsExactType {
        pred: PredId,
        subject: Box<Expr>,
        type_sig: String,
    },
    /// Reference comparison (aliasing). `equal == false` encodes `!=`.
    RefCompare {
        left: Box<Expr>,
        right: Box<Expr>,
        equal: bool,
    },
}

impl Expr {
    pub fn int_var(name: impl Into<String>) -> Self {
        Expr::Var(Variable::int(name))
    }

    pub fn ref_var(name: impl Into<String>) -> Self {
        Expr::Var(Variable::reference(name))
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::Compound { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) }
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Compound { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right) }
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Negation(Box::new(inner))
    }

    pub fn compare(op: CmpOp, left: Expr, right: Expr) -> Self {
        Expr::Compare { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn instance_of(subject: Expr, type_name: impl Into<String>) -> Self {
        Expr::InstanceOf { subject: Box::new(subject), type_name: type_name.into() }
    }

    /// Allocates a fresh predicate id for the new node.
    pub fn is_exact_type(subject: Expr, type_sig: impl Into<String>) -> Self {
        Expr::IsExactType {
            pred: reach::next_pred_id(),
            subject: Box::new(subject),
            type_sig: type_sig.into(),
        }
    }

    pub fn ref_eq(left: Expr, right: Expr) -> Self {
        Expr::RefCompare { left: Box::new(left), right: Box::new(right), equal: true }
    }

    pub fn ref_ne(left: Expr, right: Expr) -> Self {
        Expr::RefCompare { left: Box::new(left), right: Box::new(right), equal: false }
    }

    /// Whether this node itself is a high-level constraint the base solver
    /// cannot handle.
    pub fn is_high_level(&self) -> bool {
        matches!(
            self,
            Expr::InstanceOf { .. } | Expr::IsExactType { .. } | Expr::RefCompare { .. }
        )
    }

    /// True iff this node or any transitive child is high-level.
    pub fn contains_high_level(&self) -> bool {
        if self.is_high_level() {
            return true;
        }
        self.children().iter().any(|c| c.contains_high_level())
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::True
            | Expr::False
            | Expr::IntConst(_)
            | Expr::Null
            | Expr::RefConst(_)
            | Expr::Var(_) => Vec::new(),
            Expr::Binary { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::Compound { left, right, .. }
            | Expr::RefCompare { left, right, .. } => vec![left, right],
            Expr::Negation(inner) => vec![inner],
            Expr::InstanceOf { subject, .. } | Expr::IsExactType { subject, .. } => vec![subject],
        }
    }

    /// Pre-order traversal over the whole tree.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Union the free variables of this expression into `out`, keyed by name.
    pub fn collect_free_variables(&self, out: &mut BTreeMap<String, Variable>) {
        self.walk(&mut |node| {
            if let Expr::Var(v) = node {
                out.entry(v.name.clone()).or_insert_with(|| v.clone());
            }
        });
    }

    pub fn free_variables(&self) -> BTreeMap<String, Variable> {
        let mut out = BTreeMap::new();
        self.collect_free_variables(&mut out);
        out
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::True => f.write_str("true"),
            Expr::False => f.write_str("false"),
            Expr::IntConst(n) => write!(f, "{n}"),
            Expr::Null => f.write_str("null"),
            Expr::RefConst(r) => write!(f, "obj@{r}"),
            Expr::Var(v) => f.write_str(&v.name),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Compare { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Negation(inner) => write!(f, "!({inner})"),
            Expr::Compound { op, left, right } => {
                let sym = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                write!(f, "({left} {sym} {right})")
            }
            Expr::InstanceOf { subject, type_name } => {
                write!(f, "({subject} instanceof {type_name})")
            }
            Expr::IsExactType { subject, type_sig, .. } => {
                write!(f, "IsExactType({subject}, {type_sig})")
            }
            Expr::RefCompare { left, right, equal } => {
                write!(f, "({left} {} {right})", if *equal { "==" } else { "!=" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_level_classification() {
        let numeric = Expr::compare(CmpOp::Lt, Expr::int_var("x"), Expr::IntConst(3));
        assert!(!numeric.contains_high_level());

        let inst = Expr::instance_of(Expr::ref_var("a(ref)"), "Dog");
        assert!(inst.is_high_level());
        assert!(inst.contains_high_level());

        // High-level status propagates up through compounds and negations.
        let buried = Expr::not(Expr::and(numeric, inst));
        assert!(!buried.is_high_level());
        assert!(buried.contains_high_level());
    }

    #[test]
    fn test_ref_compare_is_high_level() {
        let aliasing = Expr::ref_eq(Expr::ref_var("a(ref)"), Expr::ref_var("b(ref)"));
        assert!(aliasing.is_high_level());
    }

    #[test]
    fn test_display_matches_oracle_conventions() {
        let c = Expr::ref_ne(Expr::ref_var("head(ref)"), Expr::Null);
        assert_eq!(c.to_string(), "(head(ref) != null)");

        let t = Expr::is_exact_type(Expr::ref_var("x(ref)"), "LDog;");
        assert_eq!(t.to_string(), "IsExactType(x(ref), LDog;)");

        let i = Expr::instance_of(Expr::ref_var("a(ref)"), "Cat");
        assert_eq!(i.to_string(), "(a(ref) instanceof Cat)");
    }

    #[test]
    fn test_free_variables_are_unioned_by_name() {
        let e = Expr::and(
            Expr::ref_ne(Expr::ref_var("head(ref)"), Expr::Null),
            Expr::ref_eq(Expr::ref_var("head(ref).next(ref)"), Expr::Null),
        );
        let fv = e.free_variables();
        assert_eq!(fv.len(), 2);
        assert!(fv.contains_key("head(ref)"));
        assert!(fv.contains_key("head(ref).next(ref)"));
        assert_eq!(fv["head(ref)"].ty, VarType::Reference);
    }

    #[test]
    fn test_exact_type_preds_get_distinct_ids() {
        let a = Expr::is_exact_type(Expr::ref_var("x(ref)"), "LDog;");
        let b = Expr::is_exact_type(Expr::ref_var("x(ref)"), "LDog;");
        let (pa, pb) = match (&a, &b) {
            (Expr::IsExactType { pred: pa, .. }, Expr::IsExactType { pred: pb, .. }) => (*pa, *pb),
            _ => unreachable!(),
        };
        assert_ne!(pa, pb);
        // Clones keep the identity of the original predicate.
        let c = a.clone();
        assert_eq!(a, c);
    }
}
