use std::{collections::HashMap, fmt::Display};

use good_lp::{Constraint, Expression, ProblemVariables, Variable};

/// Value of every column of a solved model
pub type Values = HashMap<Variable, f64>;

/// The good_lp pieces of one minimization model, kept apart so that they can be cloned and
/// extended before being handed to a solver.
#[derive(Clone, Default)]
pub struct Formulation {
    pub name: String,
    pub variables: ProblemVariables,
    pub constraints: Vec<Constraint>,
    pub objective: Expression,
}

impl Formulation {
    pub fn new(name: &str) -> Formulation {
        Formulation {
            name: name.to_string(),
            ..Formulation::default()
        }
    }

    pub fn add_constr(&mut self, name: &str, constraint: Constraint) {
        self.constraints.push(constraint.set_name(name.to_string()));
    }

    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constrs(&self) -> usize {
        self.constraints.len()
    }

    /// Lower and upper bound of a variable
    pub fn bounds(&self, var: Variable) -> Option<(f64, f64)> {
        self.variables
            .iter_variables_with_def()
            .find(|(v, _)| *v == var)
            .map(|(_, def)| (def.get_min(), def.get_max()))
    }

    /// Narrows variable bounds. The variables are re-declared in their original order, so
    /// every `Variable` handed out so far keeps referring to the same column.
    pub fn tighten(&mut self, bounds: &HashMap<Variable, (f64, f64)>) {
        if bounds.is_empty() {
            return;
        }
        let mut variables = ProblemVariables::new();
        for (var, def) in self.variables.iter_variables_with_def() {
            let def = match bounds.get(&var) {
                Some(&(lb, ub)) => {
                    let (min, max) = (def.get_min().max(lb), def.get_max().min(ub));
                    def.clone().min(min).max(max)
                }
                None => def.clone(),
            };
            variables.add(def);
        }
        self.variables = variables;
    }

    /// Names of the bounds and constraints violated by the assignment. Columns missing from
    /// `values` count as zero.
    pub fn violations(&self, values: &Values, tol: f64) -> Vec<String> {
        let values: Values = self
            .variables
            .iter_variables_with_def()
            .map(|(var, _)| (var, values.get(&var).copied().unwrap_or(0.0)))
            .collect();
        let bounds = self
            .variables
            .iter_variables_with_def()
            .filter(|(var, def)| {
                let x = values[var];
                x < def.get_min() - tol || x > def.get_max() + tol
            })
            .map(|(var, def)| format!("bound {} = {}", def.get_name(), values[&var]));
        let rows = self
            .constraints
            .iter()
            .filter(|c| {
                // Normalized to `expression <= 0` or `expression == 0`
                let lhs = c.expression().eval_with(&values);
                if c.is_equality() {
                    lhs.abs() > tol
                } else {
                    lhs > tol
                }
            })
            .map(|c| c.name().unwrap_or("unnamed").to_string());
        bounds.chain(rows).collect()
    }
}

impl Display for Formulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let integers = self
            .variables
            .iter_variables_with_def()
            .filter(|(_, def)| def.is_integer())
            .count();
        write!(
            f,
            "{}: {} variables ({} integer), {} constraints",
            self.name,
            self.variables.len(),
            integers,
            self.constraints.len()
        )
    }
}
