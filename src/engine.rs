use derive_more::Display;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::{ConfigError, EngineConfig},
    export::{BasketTable, FlowTable},
    kpi::{BenchmarkTable, Kpi, Statistic, StatsTable},
    models::{
        core::{CoreKey, CoreModel},
        formulation::Values,
    },
    period::PeriodError,
    problem::{Topology, TopologyError},
    scenario::{compile, DirectiveError, ScenarioContext},
    solver::{MicroLp, SolveStatus, Solver},
};

/// Tolerance used when checking a returned assignment against the model
const FEASIBILITY_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Display, Clone, PartialEq)]
pub enum EngineError {
    #[display(fmt = "{}", _0)]
    Topology(TopologyError),
    #[display(fmt = "{}", _0)]
    Period(PeriodError),
    #[display(fmt = "invalid configuration: {}", _0)]
    Config(ConfigError),
}

impl std::error::Error for EngineError {}

impl From<TopologyError> for EngineError {
    fn from(e: TopologyError) -> Self {
        EngineError::Topology(e)
    }
}

impl From<PeriodError> for EngineError {
    fn from(e: PeriodError) -> Self {
        EngineError::Period(e)
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

/// How a scenario solve ended
#[derive(Debug, Display, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[display(fmt = "optimal")]
    Optimal,
    #[display(fmt = "infeasible")]
    Infeasible,
    /// Any other solver status, with the raw status text
    #[display(fmt = "{}", _0)]
    Other(String),
    /// The solver itself failed. Treated like infeasibility by sweeps, but reported apart.
    #[display(fmt = "failed: {}", _0)]
    Failed(String),
}

impl Outcome {
    pub fn is_optimal(&self) -> bool {
        *self == Outcome::Optimal
    }
}

impl From<SolveStatus> for Outcome {
    fn from(status: SolveStatus) -> Self {
        match status {
            SolveStatus::Optimal => Outcome::Optimal,
            SolveStatus::Infeasible => Outcome::Infeasible,
            SolveStatus::Other(s) => Outcome::Other(s),
        }
    }
}

/// The assignment and derived tables of an optimal solve
#[derive(Debug, Clone)]
pub struct ScenarioSolution {
    /// Value of every model column
    pub values: Values,
    pub stats: StatsTable,
    pub flows: FlowTable,
    pub basket: BasketTable,
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub name: String,
    pub outcome: Outcome,
    pub objective: Option<f64>,
    /// Directives skipped while compiling the scenario
    pub directive_errors: Vec<DirectiveError>,
    pub solution: Option<ScenarioSolution>,
}

impl ScenarioOutcome {
    pub fn is_optimal(&self) -> bool {
        self.outcome.is_optimal()
    }

    pub fn error_count(&self) -> usize {
        self.directive_errors.len()
    }

    pub fn stats(&self) -> Option<&StatsTable> {
        self.solution.as_ref().map(|s| &s.stats)
    }
}

/// Headline statistics of a batch of solves, side by side
pub fn benchmark(outcomes: &[ScenarioOutcome]) -> BenchmarkTable {
    BenchmarkTable::build(outcomes.iter().map(|o| (o.name.clone(), o.stats())))
}

/// Owns the topology, the configuration and the cached core model, and runs scenarios
/// against them one at a time.
pub struct Engine<S: Solver = MicroLp> {
    topology: Topology,
    config: EngineConfig,
    solver: S,
    cache: Option<CoreModel>,
}

impl Engine<MicroLp> {
    pub fn with_default_solver(topology: Topology, config: EngineConfig) -> Self {
        Engine::new(topology, config, MicroLp)
    }
}

impl<S: Solver> Engine<S> {
    pub fn new(topology: Topology, config: EngineConfig, solver: S) -> Self {
        Engine {
            topology,
            config,
            solver,
            cache: None,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The cached core model, if one has been built
    pub fn core(&self) -> Option<&CoreModel> {
        self.cache.as_ref()
    }

    /// Compiles and solves one scenario. The core model is rebuilt first if the scenario's
    /// horizon or forecast toggle differs from the cached one, or if its demand scale exceeds
    /// the one the cached flow big-M was derived for.
    ///
    /// Infeasibility and solver failure are outcomes, not errors. Only a scenario that cannot
    /// be compiled at all (an unknown beneficiary type, a horizon outside the calendar) is an
    /// error.
    pub fn solve(&mut self, context: &ScenarioContext) -> Result<ScenarioOutcome, EngineError> {
        let (horizon, forecast) = (context.horizon, context.forecast);
        let core = match self.cache.take() {
            Some(core) if core.matches(horizon, forecast, context.demand_scale) => {
                debug!("Reusing core model over {horizon}");
                core
            }
            _ => {
                let key = CoreKey::new(horizon, forecast).with_demand_scale(context.demand_scale);
                CoreModel::build(&self.topology, &self.config, key)?
            }
        };
        let core = &*self.cache.insert(core);

        let compiled = compile(core, &self.topology, context)?;
        let result = self.solver.solve(&compiled.problem);

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Scenario `{}`: {e}", context.name);
                return Ok(ScenarioOutcome {
                    name: context.name.clone(),
                    outcome: Outcome::Failed(e.to_string()),
                    objective: None,
                    directive_errors: compiled.errors,
                    solution: None,
                });
            }
        };

        let outcome = Outcome::from(raw.status);
        info!(
            "Scenario `{}`: {outcome} (objective {:?}, {} directive errors)",
            context.name,
            raw.objective,
            compiled.errors.len()
        );
        if !outcome.is_optimal() {
            return Ok(ScenarioOutcome {
                name: context.name.clone(),
                outcome,
                objective: None,
                directive_errors: compiled.errors,
                solution: None,
            });
        }

        let violations = compiled.problem.violations(&raw.values, FEASIBILITY_TOLERANCE);
        if !violations.is_empty() {
            warn!(
                "Scenario `{}`: solution violates {} rows, first {}",
                context.name,
                violations.len(),
                violations[0]
            );
        }

        let kpi = Kpi::new(core, &self.topology)
            .with_price_multiplier(context.price_multiplier)
            .with_empty_periods(compiled.empty.clone());
        let stats = StatsTable::build(&kpi, &Statistic::report(&self.topology), &raw.values);
        let flows = FlowTable::build(core, &self.topology, &raw.values);
        let basket = BasketTable::build(core, &self.topology, &compiled.empty, &raw.values);

        Ok(ScenarioOutcome {
            name: context.name.clone(),
            outcome,
            objective: raw.objective,
            directive_errors: compiled.errors,
            solution: Some(ScenarioSolution {
                values: raw.values,
                stats,
                flows,
                basket,
            }),
        })
    }

    /// Solves a batch of scenarios in order
    pub fn solve_all(
        &mut self,
        contexts: &[ScenarioContext],
    ) -> Result<Vec<ScenarioOutcome>, EngineError> {
        contexts.iter().map(|context| self.solve(context)).collect()
    }
}
