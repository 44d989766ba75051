use derive_more::Display;
use good_lp::{solvers::microlp::microlp, ResolutionError, Solution, SolverModel};
use log::{debug, trace};

pub use crate::models::formulation::{Formulation, Values};

/// The solver's verdict on a model
#[derive(Debug, Display, Clone, PartialEq)]
pub enum SolveStatus {
    #[display(fmt = "optimal")]
    Optimal,
    #[display(fmt = "infeasible")]
    Infeasible,
    /// Any other terminal status, with the raw status text
    #[display(fmt = "{}", _0)]
    Other(String),
}

impl SolveStatus {
    pub fn is_optimal(&self) -> bool {
        *self == SolveStatus::Optimal
    }
}

/// What comes back across the solver boundary
#[derive(Debug, Clone)]
pub struct RawSolution {
    pub status: SolveStatus,
    /// The value of every column. Empty unless optimal.
    pub values: Values,
    pub objective: Option<f64>,
}

impl RawSolution {
    pub fn without_values(status: SolveStatus) -> RawSolution {
        RawSolution {
            status,
            values: Values::new(),
            objective: None,
        }
    }
}

#[derive(Debug, Display, Clone, PartialEq)]
pub enum SolverError {
    /// The backend failed in a way that says nothing about the model's feasibility
    #[display(fmt = "solver backend failed: {}", _0)]
    Backend(String),
}

impl std::error::Error for SolverError {}

/// An external mixed-integer solver, consumed as a black box
pub trait Solver {
    fn solve(&self, problem: &Formulation) -> Result<RawSolution, SolverError>;
}

/// The pure-Rust `microlp` branch-and-bound solver, driven through `good_lp`
#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLp;

impl Solver for MicroLp {
    fn solve(&self, problem: &Formulation) -> Result<RawSolution, SolverError> {
        debug!("Solving {problem}");
        // microlp only rejects crossed bounds on integer columns
        if let Some((_, def)) = problem
            .variables
            .iter_variables_with_def()
            .find(|(_, def)| def.get_min() > def.get_max())
        {
            debug!("{} has crossed bounds", def.get_name());
            return Ok(RawSolution::without_values(SolveStatus::Infeasible));
        }

        let mut model = problem
            .variables
            .clone()
            .minimise(problem.objective.clone())
            .using(microlp);
        for c in &problem.constraints {
            model.add_constraint(c.clone());
        }

        match model.solve() {
            Ok(solution) => {
                let values: Values = problem
                    .variables
                    .iter_variables_with_def()
                    .map(|(v, _)| (v, solution.value(v)))
                    .collect();
                let objective = problem.objective.eval_with(&values);
                trace!("Optimal objective {objective}");
                Ok(RawSolution {
                    status: SolveStatus::Optimal,
                    values,
                    objective: Some(objective),
                })
            }
            Err(ResolutionError::Infeasible) => {
                Ok(RawSolution::without_values(SolveStatus::Infeasible))
            }
            Err(ResolutionError::Unbounded) => Ok(RawSolution::without_values(SolveStatus::Other(
                "unbounded".to_string(),
            ))),
            Err(e) => Err(SolverError::Backend(e.to_string())),
        }
    }
}
