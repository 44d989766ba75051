use std::{collections::HashMap, fmt::Debug, hash::Hash};

use good_lp::{variable, ProblemVariables, Solution, Variable, VariableDefinition};

/// Creates one variable per index, named `{base_name}_{index:?}`
pub fn keyed_vars<K: Hash + Eq + Debug>(
    indices: Vec<K>,
    model: &mut ProblemVariables,
    base_name: &str,
    def: impl Fn(&K) -> VariableDefinition,
) -> HashMap<K, Variable> {
    let mut map = HashMap::with_capacity(indices.len());
    for index in indices {
        let var = model.add(def(&index).name(format!("{}_{:?}", base_name, index)));
        map.insert(index, var);
    }
    map
}

pub trait AddVars {
    type Key;
    type Out;

    /// Create a variable for every index, with a definition that may depend on the index
    fn vars_with(
        self,
        model: &mut ProblemVariables,
        base_name: &str,
        def: impl Fn(&Self::Key) -> VariableDefinition,
    ) -> Self::Out;

    /// Create a variable for every index
    fn vars(self, model: &mut ProblemVariables, base_name: &str, def: &VariableDefinition) -> Self::Out
    where
        Self: Sized,
    {
        self.vars_with(model, base_name, |_| def.clone())
    }

    /// Binary variables
    fn binary(self, model: &mut ProblemVariables, base_name: &str) -> Self::Out
    where
        Self: Sized,
    {
        self.vars(model, base_name, &variable().binary())
    }

    /// A continuous non-negative variable
    fn cont(self, model: &mut ProblemVariables, base_name: &str) -> Self::Out
    where
        Self: Sized,
    {
        self.vars(model, base_name, &variable().min(0.0))
    }
}

impl<K: Hash + Eq + Debug> AddVars for Vec<K> {
    type Key = K;
    type Out = HashMap<K, Variable>;

    fn vars_with(
        self,
        model: &mut ProblemVariables,
        base_name: &str,
        def: impl Fn(&K) -> VariableDefinition,
    ) -> Self::Out {
        keyed_vars(self, model, base_name, def)
    }
}

/// Converts variables into their values in a solution
pub trait ConvertVars {
    type Out;
    fn convert<S: Solution>(&self, solution: &S) -> Self::Out;
}

impl ConvertVars for Variable {
    type Out = f64;

    fn convert<S: Solution>(&self, solution: &S) -> Self::Out {
        solution.value(*self)
    }
}

impl<K: Hash + Eq + Clone, T: ConvertVars> ConvertVars for HashMap<K, T> {
    type Out = HashMap<K, T::Out>;

    fn convert<S: Solution>(&self, solution: &S) -> Self::Out {
        self.iter()
            .map(|(k, v)| (k.clone(), v.convert(solution)))
            .collect()
    }
}

impl<T: ConvertVars> ConvertVars for Vec<T> {
    type Out = Vec<T::Out>;

    fn convert<S: Solution>(&self, solution: &S) -> Self::Out {
        self.iter().map(|v| v.convert(solution)).collect()
    }
}
