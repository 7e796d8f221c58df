// Backend-neutral mixed-integer model and the solving seam.
//
// The optimizer only ever builds a `MipModel` and hands it to a `MipBackend`.
// Swapping the backend never touches demand, envy or search code.

mod good_lp_backend;

pub use good_lp_backend::GoodLpBackend;

use std::fmt;

// === VARIABLES ===

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Binary,
    Continuous,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDef {
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
    pub name: String,
}

// === EXPRESSIONS & CONSTRAINTS ===

/// Sum of `coefficient * variable` terms.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(VarId, f64)>,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            terms: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, var: VarId, coefficient: f64) -> &mut Self {
        self.terms.push((var, coefficient));
        self
    }

    pub fn term(mut self, var: VarId, coefficient: f64) -> Self {
        self.terms.push((var, coefficient));
        self
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms.iter().map(|(v, c)| c * values[v.0]).sum()
    }
}

impl FromIterator<(VarId, f64)> for LinearExpr {
    fn from_iter<T: IntoIterator<Item = (VarId, f64)>>(iter: T) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sense {
    Le,
    Eq,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinearConstraint {
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

// === MODEL ===

/// Minimize `objective` subject to `constraints` over `vars`.
#[derive(Clone, Debug, Default)]
pub struct MipModel {
    vars: Vec<VarDef>,
    constraints: Vec<LinearConstraint>,
    objective: LinearExpr,
}

impl MipModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.push_var(VarKind::Binary, 0.0, 1.0, name.into())
    }

    pub fn add_continuous(&mut self, lower: f64, upper: f64, name: impl Into<String>) -> VarId {
        self.push_var(VarKind::Continuous, lower, upper, name.into())
    }

    fn push_var(&mut self, kind: VarKind, lower: f64, upper: f64, name: String) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(VarDef {
            kind,
            lower,
            upper,
            name,
        });
        id
    }

    pub fn constrain(&mut self, expr: LinearExpr, sense: Sense, rhs: f64) {
        self.constraints.push(LinearConstraint { expr, sense, rhs });
    }

    pub fn minimize(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn vars(&self) -> &[VarDef] {
        &self.vars
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }
}

// === SOLUTIONS ===

#[derive(Clone, Debug, PartialEq)]
pub struct MipSolution {
    values: Vec<f64>,
    objective: f64,
}

impl MipSolution {
    pub fn new(values: Vec<f64>, objective: f64) -> Self {
        Self { values, objective }
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.0]
    }

    /// Binary variables come back as floats; anything above one half is "on".
    pub fn is_set(&self, var: VarId) -> bool {
        self.value(var) > 0.5
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }
}

/// Why a solve produced no solution. Reported to the caller, never raised.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveStatus {
    Infeasible,
    Unbounded,
    Failed(String),
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::Unbounded => write!(f, "unbounded"),
            SolveStatus::Failed(msg) => write!(f, "solver failed: {msg}"),
        }
    }
}

/// Anything that can solve a `MipModel`. Must not write to stdout/stderr.
pub trait MipBackend {
    fn name(&self) -> &'static str;

    fn solve(&self, model: &MipModel) -> Result<MipSolution, SolveStatus>;
}

impl<B: MipBackend + ?Sized> MipBackend for &B {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn solve(&self, model: &MipModel) -> Result<MipSolution, SolveStatus> {
        (**self).solve(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expressions_evaluate_against_values() {
        let mut model = MipModel::new();
        let a = model.add_binary("a");
        let b = model.add_continuous(-1.0, 4.0, "b");
        let expr = LinearExpr::new().term(a, 2.0).term(b, -1.0);
        assert_eq!(expr.evaluate(&[1.0, 3.0]), -1.0);
        assert_eq!(model.num_vars(), 2);
        assert_eq!(model.vars()[b.index()].lower, -1.0);
    }

    #[test]
    fn status_renders_for_reports() {
        assert_eq!(SolveStatus::Infeasible.to_string(), "infeasible");
        assert_eq!(
            SolveStatus::Failed("boom".into()).to_string(),
            "solver failed: boom"
        );
    }
}
