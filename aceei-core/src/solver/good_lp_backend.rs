// good_lp backend over the pure-Rust microlp solver

use std::panic::{AssertUnwindSafe, catch_unwind};

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    default_solver, variable,
};

use super::{LinearExpr, MipBackend, MipModel, MipSolution, Sense, SolveStatus, VarKind};

/// Solves models with good_lp's default solver (microlp in this build).
///
/// microlp never prints, so nothing leaks into program output.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoodLpBackend;

fn to_expression(expr: &LinearExpr, vars: &[Variable]) -> Expression {
    let mut out = Expression::with_capacity(expr.terms().len());
    for &(var, coefficient) in expr.terms() {
        out.add_mul(coefficient, vars[var.index()]);
    }
    out
}

fn run(model: &MipModel) -> Result<MipSolution, SolveStatus> {
    let mut problem_vars = ProblemVariables::new();
    let vars: Vec<Variable> = model
        .vars()
        .iter()
        .map(|def| match def.kind {
            VarKind::Binary => problem_vars.add(variable().binary().name(def.name.clone())),
            VarKind::Continuous => problem_vars.add(
                variable()
                    .min(def.lower)
                    .max(def.upper)
                    .name(def.name.clone()),
            ),
        })
        .collect();

    let objective = to_expression(model.objective(), &vars);
    let mut problem = problem_vars.minimise(objective).using(default_solver);

    for constraint in model.constraints() {
        let lhs = to_expression(&constraint.expr, &vars);
        let built = match constraint.sense {
            Sense::Le => lhs.leq(constraint.rhs),
            Sense::Eq => lhs.eq(constraint.rhs),
            Sense::Ge => lhs.geq(constraint.rhs),
        };
        problem.add_constraint(built);
    }

    let solution = match problem.solve() {
        Ok(solution) => solution,
        Err(ResolutionError::Infeasible) => return Err(SolveStatus::Infeasible),
        Err(ResolutionError::Unbounded) => return Err(SolveStatus::Unbounded),
        Err(other) => return Err(SolveStatus::Failed(other.to_string())),
    };

    let values: Vec<f64> = vars.iter().map(|&v| solution.value(v)).collect();
    let objective = model.objective().evaluate(&values);
    Ok(MipSolution::new(values, objective))
}

impl MipBackend for GoodLpBackend {
    fn name(&self) -> &'static str {
        "good_lp/microlp"
    }

    fn solve(&self, model: &MipModel) -> Result<MipSolution, SolveStatus> {
        if model.num_vars() == 0 {
            return Ok(MipSolution::new(Vec::new(), 0.0));
        }
        catch_unwind(AssertUnwindSafe(|| run(model)))
            .unwrap_or_else(|_| Err(SolveStatus::Failed("solver panicked".to_string())))
    }
}
