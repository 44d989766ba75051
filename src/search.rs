use std::collections::BTreeSet;

use derive_more::Display;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    engine::{Engine, EngineError, Outcome, ScenarioOutcome},
    kpi::{Statistic, StatsTable},
    problem::{Channel, CommodityIndex},
    scenario::{Directive, Pattern, ScenarioContext},
    solver::Solver,
};

/// Guards the last step of a sweep against floating point drift
const STEP_EPSILON: f64 = 1e-9;

/// A scenario control that a sweep varies
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    /// Lower bound on the average nutritional value score over non-empty periods
    MinNutritionalValueScore,
    /// Lower bound on the share of the first nutrient supplied through cash transfers
    MinCashShare,
    /// Upper bound on the realized maximum lead time, in days
    MaxLeadTime,
    PriceMultiplier,
    DemandScale,
    /// Upper bound on total cost over the horizon
    MaxTotalCost,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Decreasing,
}

impl SweepParameter {
    /// Whether moving in the tightening direction can never turn an infeasible scenario
    /// feasible. A new parameter must not claim this before it has been verified.
    pub fn is_monotonic(&self) -> bool {
        true
    }

    /// The direction in which the parameter becomes more restrictive
    pub fn tightening(&self) -> Direction {
        use SweepParameter::*;
        match self {
            MaxLeadTime | MaxTotalCost => Direction::Decreasing,
            MinNutritionalValueScore | MinCashShare | PriceMultiplier | DemandScale => {
                Direction::Increasing
            }
        }
    }

    /// The scenario with the parameter set to `value`
    pub fn apply(&self, context: &ScenarioContext, value: f64) -> ScenarioContext {
        use SweepParameter::*;
        let mut context = context.clone();
        match self {
            MinNutritionalValueScore => context.directives.push(Directive::StatisticBound {
                statistic: Statistic::NutritionalValueScore,
                period: None,
                min: Some(value),
                max: None,
            }),
            MinCashShare => context.directives.push(Directive::TransferModality {
                nutrient: None,
                min_cash_share: Some(value),
                max_cash_share: None,
            }),
            MaxLeadTime => context.directives.push(Directive::StatisticBound {
                statistic: Statistic::LeadTimeMax,
                period: None,
                min: None,
                max: Some(value),
            }),
            PriceMultiplier => context.price_multiplier = value,
            DemandScale => context.demand_scale = value,
            MaxTotalCost => context.directives.push(Directive::StatisticBound {
                statistic: Statistic::TotalCost,
                period: None,
                min: None,
                max: Some(value),
            }),
        }
        context
    }
}

#[derive(Debug, Display, Clone, PartialEq)]
pub enum SweepError {
    #[display(fmt = "sweep step must be positive, got {}", _0)]
    InvalidStep(f64),
    /// The end lies behind the start in the sweep's direction
    #[display(fmt = "sweep from {} to {} never moves {}", _0, _1, _2)]
    EmptyRange(f64, f64, Direction),
    #[display(fmt = "{}", _0)]
    Engine(EngineError),
}

impl std::error::Error for SweepError {}

impl From<EngineError> for SweepError {
    fn from(e: EngineError) -> Self {
        SweepError::Engine(e)
    }
}

/// A one-dimensional parameter sweep. Values are visited from `start` towards `end` in
/// `step` increments, in `direction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub parameter: SweepParameter,
    pub start: f64,
    pub step: f64,
    pub end: f64,
    pub direction: Direction,
}

impl Sweep {
    pub fn values(&self) -> Result<Vec<f64>, SweepError> {
        if !(self.step > 0.0) {
            return Err(SweepError::InvalidStep(self.step));
        }
        let sign = match self.direction {
            Direction::Increasing => 1.0,
            Direction::Decreasing => -1.0,
        };
        if (self.end - self.start) * sign < -STEP_EPSILON {
            return Err(SweepError::EmptyRange(self.start, self.end, self.direction));
        }
        let count = ((self.end - self.start) * sign / self.step + STEP_EPSILON).floor() as usize;
        Ok((0..=count)
            .map(|i| self.start + sign * self.step * i as f64)
            .collect())
    }

    /// Whether a failure after a success ends the sweep
    pub fn stops_early(&self) -> bool {
        self.parameter.is_monotonic() && self.direction == self.parameter.tightening()
    }
}

/// What one step of a sweep produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepStep {
    pub label: String,
    /// The swept value, for parameter sweeps
    pub value: Option<f64>,
    pub outcome: Outcome,
    pub objective: Option<f64>,
    pub directive_errors: usize,
    pub stats: Option<StatsTable>,
}

impl SweepStep {
    fn new(label: String, value: Option<f64>, outcome: ScenarioOutcome) -> SweepStep {
        SweepStep {
            label,
            value,
            directive_errors: outcome.error_count(),
            objective: outcome.objective,
            stats: outcome.solution.map(|s| s.stats),
            outcome: outcome.outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub name: String,
    pub steps: Vec<SweepStep>,
    /// The last feasible value before the sweep first turned infeasible
    pub frontier: Option<f64>,
    pub stopped_early: bool,
}

impl SweepReport {
    fn new(name: String) -> SweepReport {
        SweepReport {
            name,
            steps: Vec::new(),
            frontier: None,
            stopped_early: false,
        }
    }
}

/// Solves the base scenario once per swept value, in order. A monotonic sweep moving in its
/// tightening direction stops at the first failure that follows a success; a sweep that starts
/// out infeasible runs to completion.
pub fn run_sweep<S: Solver>(
    engine: &mut Engine<S>,
    base: &ScenarioContext,
    sweep: &Sweep,
) -> Result<SweepReport, SweepError> {
    let values = sweep.values()?;
    let early = sweep.stops_early();
    info!(
        "Sweeping {} over {} values (early stop: {early})",
        sweep.parameter,
        values.len()
    );

    let mut report = SweepReport::new(format!("{}_{}", base.name, sweep.parameter));
    let mut broken = false;
    // Monotonicity only says something once the first value is known to be feasible
    let mut started_optimal = false;
    for (i, value) in values.into_iter().enumerate() {
        let label = format!("{}_{i}", report.name);
        let context = sweep.parameter.apply(base, value).renamed(label.clone());
        let outcome = engine.solve(&context)?;
        let optimal = outcome.is_optimal();
        debug!("Step {i}: {} = {value} -> {}", sweep.parameter, outcome.outcome);
        report.steps.push(SweepStep::new(label, Some(value), outcome));

        if i == 0 {
            started_optimal = optimal;
        }
        if optimal {
            if !broken {
                report.frontier = Some(value);
            }
        } else if report.frontier.is_some() {
            broken = true;
            if early && started_optimal {
                info!("{} = {value} is infeasible, stopping", sweep.parameter);
                report.stopped_early = true;
                break;
            }
        }
    }
    Ok(report)
}

/// What a sourcing breakdown varies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcingTarget {
    Commodity,
    FoodGroup,
}

/// Restricts each commodity (or food group) to one sourcing channel at a time, by excluding
/// its procurement options in every other channel.
pub fn sourcing_breakdown<S: Solver>(
    engine: &mut Engine<S>,
    base: &ScenarioContext,
    target: SourcingTarget,
) -> Result<SweepReport, SweepError> {
    let topology = engine.topology();
    let commodities = topology.commodities();
    let items: Vec<(String, Vec<CommodityIndex>)> = match target {
        SourcingTarget::Commodity => commodities
            .iter_enumerated()
            .map(|(c, commodity)| (commodity.name().to_string(), vec![c]))
            .collect(),
        SourcingTarget::FoodGroup => topology
            .food_groups()
            .iter_enumerated()
            .map(|(g, name)| {
                let members = commodities
                    .iter_enumerated()
                    .filter(|(_, commodity)| commodity.food_group() == g)
                    .map(|(c, _)| c)
                    .collect();
                (name.clone(), members)
            })
            .collect(),
    };

    let mut contexts = Vec::new();
    for ((item, members), channel) in itertools::iproduct!(&items, Channel::ALL) {
        let locations = topology.locations();
        // (source, commodity) pairs outside the channel, deduplicated and ordered
        let excluded: BTreeSet<(String, String)> = topology
            .procurement()
            .iter()
            .filter(|o| members.contains(&o.commodity()))
            .filter(|o| locations[o.source()].kind().channel() != Some(channel))
            .map(|o| {
                (
                    locations[o.source()].name().to_string(),
                    commodities[o.commodity()].name().to_string(),
                )
            })
            .collect();
        let mut context = base.renamed(format!("{}_{item}_{channel}", base.name));
        context
            .directives
            .extend(excluded.into_iter().map(|(source, commodity)| Directive::Procurement {
                source: Pattern::Exact(source),
                country: Pattern::Any,
                incoterm: Pattern::Any,
                delivery_place: Pattern::Any,
                commodity: Pattern::Exact(commodity),
                include: false,
                quantity: None,
            }));
        contexts.push(context);
    }

    solve_each(engine, format!("{}_sourcing", base.name), contexts)
}

/// Solves the base scenario once with each commodity removed from the basket, after a first
/// step without any removal.
pub fn commodity_removal<S: Solver>(
    engine: &mut Engine<S>,
    base: &ScenarioContext,
) -> Result<SweepReport, SweepError> {
    let mut contexts = vec![base.renamed(format!("{}_baseline", base.name))];
    for commodity in engine.topology().commodities().iter() {
        let mut context = base.renamed(format!("{}_without_{}", base.name, commodity.name()));
        context.directives.push(Directive::RationSize {
            commodity: Pattern::exact(commodity.name()),
            min: None,
            max: Some(0.0),
        });
        contexts.push(context);
    }
    solve_each(engine, format!("{}_removal", base.name), contexts)
}

/// Fixes the cash share of the first nutrient at each of the given values
pub fn funding_ratio<S: Solver>(
    engine: &mut Engine<S>,
    base: &ScenarioContext,
    shares: &[f64],
) -> Result<SweepReport, SweepError> {
    let contexts = shares
        .iter()
        .map(|&share| {
            let mut context = base.renamed(format!("{}_cash_{share}", base.name));
            context.directives.push(Directive::TransferModality {
                nutrient: None,
                min_cash_share: Some(share),
                max_cash_share: Some(share),
            });
            context
        })
        .collect();
    solve_each(engine, format!("{}_funding", base.name), contexts)
}

/// Solves every scenario and records it, with no early stop
fn solve_each<S: Solver>(
    engine: &mut Engine<S>,
    name: String,
    contexts: Vec<ScenarioContext>,
) -> Result<SweepReport, SweepError> {
    info!("Running {name} over {} scenarios", contexts.len());
    let mut report = SweepReport::new(name);
    for context in contexts {
        let outcome = engine.solve(&context)?;
        report.steps.push(SweepStep::new(context.name, None, outcome));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque};

    use super::*;
    use crate::{
        config::EngineConfig,
        period::Horizon,
        problem::{fixtures::*, Topology},
        solver::{Formulation, RawSolution, SolveStatus, SolverError},
    };

    /// Answers each solve with the next status of a fixed script
    struct Scripted(RefCell<VecDeque<SolveStatus>>);

    impl Solver for Scripted {
        fn solve(&self, problem: &Formulation) -> Result<RawSolution, SolverError> {
            let status = self
                .0
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| SolverError::Backend("script exhausted".into()))?;
            if !status.is_optimal() {
                return Ok(RawSolution::without_values(status));
            }
            let values = problem
                .variables
                .iter_variables_with_def()
                .map(|(v, _)| (v, 0.0))
                .collect();
            Ok(RawSolution {
                status,
                values,
                objective: Some(0.0),
            })
        }
    }

    fn sweep(start: f64, step: f64, end: f64, direction: Direction) -> Sweep {
        Sweep {
            parameter: SweepParameter::MaxLeadTime,
            start,
            step,
            end,
            direction,
        }
    }

    #[test]
    fn enumerates_values_in_direction() {
        assert_eq!(
            sweep(0.0, 0.5, 2.0, Direction::Increasing).values().unwrap(),
            vec![0.0, 0.5, 1.0, 1.5, 2.0]
        );
        assert_eq!(
            sweep(30.0, 10.0, 5.0, Direction::Decreasing).values().unwrap(),
            vec![30.0, 20.0, 10.0]
        );
        assert_eq!(
            sweep(0.0, 0.1, 0.3, Direction::Increasing).values().unwrap().len(),
            4
        );
        assert!(matches!(
            sweep(0.0, 0.0, 1.0, Direction::Increasing).values(),
            Err(SweepError::InvalidStep(_))
        ));
        assert!(matches!(
            sweep(0.0, 1.0, 5.0, Direction::Decreasing).values(),
            Err(SweepError::EmptyRange(..))
        ));
    }

    #[test]
    fn early_stop_needs_the_tightening_direction() {
        assert!(sweep(30.0, 5.0, 0.0, Direction::Decreasing).stops_early());
        assert!(!sweep(0.0, 5.0, 30.0, Direction::Increasing).stops_early());
        let nvs = Sweep {
            parameter: SweepParameter::MinNutritionalValueScore,
            ..sweep(0.0, 1.0, 3.0, Direction::Increasing)
        };
        assert!(nvs.stops_early());
    }

    #[test]
    fn parameters_become_directives_or_context_fields() {
        use crate::{period::Horizon, problem::fixtures::period};
        let horizon = Horizon::new(period("2024-01"), period("2024-02")).unwrap();
        let base = ScenarioContext::new("base", "GFD", horizon);

        let scaled = SweepParameter::DemandScale.apply(&base, 1.5);
        assert_eq!(scaled.demand_scale, 1.5);
        assert!(scaled.directives.is_empty());

        let capped = SweepParameter::MaxTotalCost.apply(&base, 100.0);
        assert_eq!(
            capped.directives,
            vec![Directive::StatisticBound {
                statistic: Statistic::TotalCost,
                period: None,
                min: None,
                max: Some(100.0)
            }]
        );
        assert!(base.directives.is_empty());
    }

    #[test]
    fn infeasible_start_never_stops_early() {
        use SolveStatus::{Infeasible, Optimal};
        let script = [Infeasible, Optimal, Infeasible, Optimal, Optimal];
        let topology = Topology::new(wheat()).unwrap();
        let solver = Scripted(RefCell::new(script.into_iter().collect()));
        let mut engine = Engine::new(topology, EngineConfig::default(), solver);
        let horizon = Horizon::new(period("2024-01"), period("2024-02")).unwrap();
        let base = ScenarioContext::new("base", "GFD", horizon);

        let tightening = sweep(40.0, 5.0, 20.0, Direction::Decreasing);
        assert!(tightening.stops_early());
        let report = run_sweep(&mut engine, &base, &tightening).unwrap();
        let outcomes: Vec<bool> = report.steps.iter().map(|s| s.outcome.is_optimal()).collect();
        assert_eq!(outcomes, vec![false, true, false, true, true]);
        assert!(!report.stopped_early);
        assert_eq!(report.frontier, Some(35.0));
    }

    #[test]
    fn feasible_start_stops_at_the_first_failure() {
        use SolveStatus::{Infeasible, Optimal};
        let script = [Optimal, Optimal, Infeasible, Optimal, Optimal];
        let topology = Topology::new(wheat()).unwrap();
        let solver = Scripted(RefCell::new(script.into_iter().collect()));
        let mut engine = Engine::new(topology, EngineConfig::default(), solver);
        let horizon = Horizon::new(period("2024-01"), period("2024-02")).unwrap();
        let base = ScenarioContext::new("base", "GFD", horizon);

        let report =
            run_sweep(&mut engine, &base, &sweep(40.0, 5.0, 20.0, Direction::Decreasing)).unwrap();
        assert_eq!(report.steps.len(), 3);
        assert!(report.stopped_early);
        assert_eq!(report.frontier, Some(35.0));
    }
}
