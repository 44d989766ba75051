use derive_more::Display;
use float_ord::FloatOrd;
use good_lp::Expression;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    models::{core::CoreModel, formulation::Values, utils::ConvertVars},
    network::TimeIndex,
    period::Period,
    problem::{Channel, LegIndex, LegMode, Topology},
};

/// Flows below this are treated as zero when reporting
const FLOW_TOLERANCE: f64 = 1e-6;

/// A queryable statistic of a solved scenario. Linear statistics double as objective terms
/// and can be bounded by directives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// Procurement cost of one sourcing channel, or of all of them
    ProcurementCost(Option<Channel>),
    /// Transport cost of one leg mode, or of all of them
    TransportCost(Option<LegMode>),
    HandlingCost,
    StorageCost,
    OverheadCost,
    SupportCost,
    TotalCost,
    NutritionalValueScore,
    ConsumptionScore,
    /// Daily supply per person of the named nutrient
    NutrientSupply(String),
    /// Tonnes procured through one channel, or through all of them
    Tonnage(Option<Channel>),
    /// Flow-weighted mean of the fastest lead time of the pairs used
    LeadTimeAverage,
    LeadTimeMax,
}

/// How per-period values roll up into the Total column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    /// Averaged over non-empty periods
    Mean,
    Max,
    FlowWeighted,
}

impl Statistic {
    pub fn aggregation(&self) -> Aggregation {
        use Statistic::*;
        match self {
            NutritionalValueScore | ConsumptionScore | NutrientSupply(_) => Aggregation::Mean,
            LeadTimeMax => Aggregation::Max,
            LeadTimeAverage => Aggregation::FlowWeighted,
            _ => Aggregation::Sum,
        }
    }

    /// Whether the statistic can be written as a linear expression
    pub fn is_linear(&self) -> bool {
        *self != Statistic::LeadTimeAverage
    }

    pub fn name(&self) -> String {
        use Statistic::*;
        match self {
            ProcurementCost(None) => "Procurement cost".to_string(),
            ProcurementCost(Some(c)) => format!("Procurement cost ({c})"),
            TransportCost(None) => "Transport cost".to_string(),
            TransportCost(Some(m)) => format!("Transport cost ({m})"),
            HandlingCost => "Handling cost".to_string(),
            StorageCost => "Storage cost".to_string(),
            OverheadCost => "Overhead cost".to_string(),
            SupportCost => "Support cost".to_string(),
            TotalCost => "Total cost".to_string(),
            NutritionalValueScore => "Nutritional value score".to_string(),
            ConsumptionScore => "Consumption score".to_string(),
            NutrientSupply(n) => n.clone(),
            Tonnage(None) => "Tonnage".to_string(),
            Tonnage(Some(c)) => format!("Tonnage ({c})"),
            LeadTimeAverage => "Lead time (average)".to_string(),
            LeadTimeMax => "Lead time (max)".to_string(),
        }
    }

    /// Every statistic of the standard report, in display order
    pub fn report(topology: &Topology) -> Vec<Statistic> {
        use Statistic::*;
        let mut stats = vec![ProcurementCost(None)];
        stats.extend(Channel::ALL.iter().map(|c| ProcurementCost(Some(*c))));
        stats.push(TransportCost(None));
        stats.extend(LegMode::ALL.iter().map(|m| TransportCost(Some(*m))));
        stats.extend([
            HandlingCost,
            StorageCost,
            OverheadCost,
            SupportCost,
            TotalCost,
            NutritionalValueScore,
            ConsumptionScore,
        ]);
        stats.extend(
            topology
                .nutrients()
                .iter()
                .map(|n| NutrientSupply(n.name().to_string())),
        );
        stats.push(Tonnage(None));
        stats.extend(Channel::ALL.iter().map(|c| Tonnage(Some(*c))));
        stats.extend([LeadTimeAverage, LeadTimeMax]);
        stats
    }
}

#[derive(Debug, Display, Clone, PartialEq)]
pub enum StatisticError {
    #[display(fmt = "{} has no linear form", _0)]
    NonLinear(String),
    #[display(fmt = "unknown nutrient `{}`", _0)]
    UnknownNutrient(String),
}

impl std::error::Error for StatisticError {}

/// Builds statistic expressions over a core model and evaluates them on solutions
pub struct Kpi<'a> {
    core: &'a CoreModel,
    topology: &'a Topology,
    price_multiplier: f64,
    /// Whether each horizon period is empty for the tracked beneficiary type
    empty: Vec<bool>,
}

#[allow(non_snake_case)]
impl<'a> Kpi<'a> {
    pub fn new(core: &'a CoreModel, topology: &'a Topology) -> Kpi<'a> {
        Kpi {
            core,
            topology,
            price_multiplier: 1.0,
            empty: vec![false; core.horizon_len()],
        }
    }

    pub fn with_price_multiplier(mut self, multiplier: f64) -> Self {
        self.price_multiplier = multiplier;
        self
    }

    pub fn with_empty_periods(mut self, empty: Vec<bool>) -> Self {
        self.empty = empty;
        self
    }

    fn channel_of(&self, l: LegIndex) -> Option<Channel> {
        let origin = self.topology.legs()[l].origin();
        self.topology.locations()[origin].kind().channel()
    }

    fn supply_legs(&self, channel: Option<Channel>) -> impl Iterator<Item = LegIndex> + '_ {
        self.core
            .sets
            .L_S
            .iter()
            .copied()
            .filter(move |l| channel.is_none() || self.channel_of(*l) == channel)
    }

    pub fn procurement_cost(&self, channel: Option<Channel>, t: TimeIndex) -> Expression {
        let p = &self.core.parameters;
        self.supply_legs(channel)
            .map(|l| (p.C_price[&(l, t)] * self.price_multiplier) * self.core.vars.f[&(l, t)])
            .sum()
    }

    pub fn transport_cost(&self, mode: Option<LegMode>, t: TimeIndex) -> Expression {
        let legs = self.topology.legs();
        self.core
            .sets
            .L
            .iter()
            .filter(|l| mode.map_or(true, |m| legs[**l].mode() == m))
            .map(|l| self.core.parameters.C_transport[*l] * self.core.vars.f[&(*l, t)])
            .sum()
    }

    pub fn handling_cost(&self, t: TimeIndex) -> Expression {
        self.core
            .sets
            .L
            .iter()
            .map(|l| self.core.parameters.C_handling[*l] * self.core.vars.f[&(*l, t)])
            .sum()
    }

    pub fn storage_cost(&self, t: TimeIndex) -> Expression {
        let locations = self.topology.locations();
        self.core
            .sets
            .H
            .iter()
            .map(|(n, c)| locations[*n].storage_cost() * self.core.vars.i[&(*n, *c, t)])
            .sum()
    }

    /// Procurement, transport, handling and storage before any markup
    pub fn base_cost(&self, t: TimeIndex) -> Expression {
        self.procurement_cost(None, t)
            + self.transport_cost(None, t)
            + self.handling_cost(t)
            + self.storage_cost(t)
    }

    pub fn overhead_cost(&self, t: TimeIndex) -> Expression {
        self.base_cost(t) * self.core.parameters.config.overhead_rate
    }

    /// Support markup, compounding on the subtotal including overhead
    pub fn support_cost(&self, t: TimeIndex) -> Expression {
        let config = &self.core.parameters.config;
        self.base_cost(t) * ((1.0 + config.overhead_rate) * config.support_rate)
    }

    pub fn total_cost(&self, t: TimeIndex) -> Expression {
        self.base_cost(t) * self.core.parameters.config.markup()
    }

    pub fn nutrient_supply(&self, name: &str, t: TimeIndex) -> Result<Expression, StatisticError> {
        let n = self
            .topology
            .find_nutrient(name)
            .ok_or_else(|| StatisticError::UnknownNutrient(name.to_string()))?;
        let commodities = self.topology.commodities();
        Ok(self
            .core
            .sets
            .C
            .iter()
            .map(|c| (commodities[*c].content(n) / 100.0) * self.core.vars.r[&(*c, t)])
            .sum())
    }

    /// Number of nutrients without a shortfall indicator
    pub fn nutritional_value_score(&self, t: TimeIndex) -> Expression {
        let unmet = self
            .core
            .sets
            .U
            .iter()
            .map(|n| self.core.vars.has_shortfall[&(*n, t)])
            .sum::<Expression>();
        self.core.sets.U.len() as f64 - unmet
    }

    pub fn consumption_score(&self, t: TimeIndex) -> Expression {
        let groups = self.topology.consumption_groups();
        self.core
            .sets
            .Q
            .iter()
            .map(|q| groups[*q].weight * self.core.vars.k[&(*q, t)])
            .sum()
    }

    pub fn tonnage(&self, channel: Option<Channel>, t: TimeIndex) -> Expression {
        self.supply_legs(channel)
            .map(|l| self.core.vars.f[&(l, t)])
            .sum()
    }

    /// The linear form of a statistic in one period
    pub fn expr(&self, stat: &Statistic, t: TimeIndex) -> Result<Expression, StatisticError> {
        use Statistic::*;
        Ok(match stat {
            ProcurementCost(channel) => self.procurement_cost(*channel, t),
            TransportCost(mode) => self.transport_cost(*mode, t),
            HandlingCost => self.handling_cost(t),
            StorageCost => self.storage_cost(t),
            OverheadCost => self.overhead_cost(t),
            SupportCost => self.support_cost(t),
            TotalCost => self.total_cost(t),
            NutritionalValueScore => self.nutritional_value_score(t),
            ConsumptionScore => self.consumption_score(t),
            NutrientSupply(name) => self.nutrient_supply(name, t)?,
            Tonnage(channel) => self.tonnage(*channel, t),
            LeadTimeMax => Expression::from(self.core.vars.lead[t]),
            LeadTimeAverage => return Err(StatisticError::NonLinear(stat.name())),
        })
    }

    /// The linear form of a statistic's horizon roll-up
    pub fn horizon_expr(&self, stat: &Statistic) -> Result<Expression, StatisticError> {
        let T = &self.core.sets.T;
        match stat.aggregation() {
            Aggregation::Sum => T.iter().map(|t| self.expr(stat, *t)).sum_exprs(),
            Aggregation::Mean => {
                let filled: Vec<TimeIndex> = T.iter().copied().filter(|t| !self.empty[*t]).collect();
                let sum = filled.iter().map(|t| self.expr(stat, *t)).sum_exprs()?;
                Ok(sum * (1.0 / filled.len().max(1) as f64))
            }
            Aggregation::Max => Ok(Expression::from(self.core.vars.lead_max)),
            Aggregation::FlowWeighted => Err(StatisticError::NonLinear(stat.name())),
        }
    }

    /// Supply flow and fastest lead time of every reachable pair used in the period
    fn pair_flows(&self, t: TimeIndex, values: &Values) -> Vec<(f64, f64)> {
        let sets = &self.core.sets;
        sets.P
            .iter()
            .map(|pair| {
                let flow: f64 = sets.L_p[pair]
                    .iter()
                    .map(|l| self.core.vars.f[&(*l, t)].convert(values))
                    .sum();
                (flow, self.core.parameters.D_quick[pair])
            })
            .filter(|(flow, _)| *flow > FLOW_TOLERANCE)
            .collect()
    }

    /// The realized value of a statistic in one period
    pub fn value(&self, stat: &Statistic, t: TimeIndex, values: &Values) -> Result<f64, StatisticError> {
        match stat {
            Statistic::NutritionalValueScore => {
                if self.empty[t] {
                    return Ok(0.0);
                }
                let met = self
                    .core
                    .sets
                    .U
                    .iter()
                    .filter(|n| self.core.vars.shortfall[&(**n, t)].convert(values) <= FLOW_TOLERANCE)
                    .count();
                Ok(met as f64)
            }
            Statistic::LeadTimeMax => Ok(self
                .pair_flows(t, values)
                .into_iter()
                .map(|(_, quick)| FloatOrd(quick))
                .max()
                .map_or(0.0, |q| q.0)),
            Statistic::LeadTimeAverage => {
                let (flow, weighted) = weighted_lead(&self.pair_flows(t, values));
                Ok(if flow > 0.0 { weighted / flow } else { 0.0 })
            }
            _ => Ok(self.expr(stat, t)?.eval_with(values)),
        }
    }

    /// One row of the statistics table
    pub fn row(&self, stat: &Statistic, values: &Values) -> Result<StatsRow, StatisticError> {
        let T = &self.core.sets.T;
        let periods: Vec<f64> = T
            .iter()
            .map(|t| self.value(stat, *t, values))
            .collect::<Result<_, _>>()?;

        let filled: Vec<f64> = T
            .iter()
            .filter(|t| !self.empty[**t])
            .map(|t| periods[*t])
            .collect();
        let average = if filled.is_empty() {
            0.0
        } else {
            filled.iter().sum::<f64>() / filled.len() as f64
        };

        let total = match stat.aggregation() {
            Aggregation::Sum => periods.iter().sum(),
            Aggregation::Mean => average,
            Aggregation::Max => periods.iter().copied().map(FloatOrd).max().map_or(0.0, |m| m.0),
            Aggregation::FlowWeighted => {
                let all = T.iter().flat_map(|t| self.pair_flows(*t, values)).collect_vec();
                let (flow, weighted) = weighted_lead(&all);
                if flow > 0.0 {
                    weighted / flow
                } else {
                    0.0
                }
            }
        };

        Ok(StatsRow {
            statistic: stat.clone(),
            name: stat.name(),
            periods,
            total,
            average,
        })
    }
}

fn weighted_lead(flows: &[(f64, f64)]) -> (f64, f64) {
    flows
        .iter()
        .fold((0.0, 0.0), |(f, w), (flow, quick)| (f + flow, w + flow * quick))
}

trait SumExprs {
    fn sum_exprs(self) -> Result<Expression, StatisticError>;
}

impl<I: Iterator<Item = Result<Expression, StatisticError>>> SumExprs for I {
    fn sum_exprs(self) -> Result<Expression, StatisticError> {
        let exprs: Vec<Expression> = self.collect::<Result<_, _>>()?;
        Ok(exprs.into_iter().sum())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRow {
    pub statistic: Statistic,
    pub name: String,
    /// One value per horizon period
    pub periods: Vec<f64>,
    pub total: f64,
    /// Mean over non-empty periods
    pub average: f64,
}

impl StatsRow {
    /// The figure a benchmark compares scenarios by
    pub fn headline(&self) -> f64 {
        match self.statistic.aggregation() {
            Aggregation::Mean => self.average,
            _ => self.total,
        }
    }
}

/// Statistic by period, plus Total and Average
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsTable {
    pub periods: Vec<Period>,
    pub rows: Vec<StatsRow>,
}

impl StatsTable {
    pub fn build(kpi: &Kpi, stats: &[Statistic], values: &Values) -> StatsTable {
        let calendar = kpi.topology.periods();
        let periods = kpi.core.periods.iter().map(|p| calendar[*p]).collect();
        let rows = stats
            .iter()
            .filter_map(|stat| kpi.row(stat, values).ok())
            .collect();
        StatsTable { periods, rows }
    }

    pub fn get(&self, stat: &Statistic) -> Option<&StatsRow> {
        self.rows.iter().find(|row| row.statistic == *stat)
    }
}

/// Headline statistics side by side across a batch of scenarios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTable {
    pub scenarios: Vec<String>,
    /// Statistic name and one value per scenario; `None` where the scenario has no solution
    pub rows: Vec<(String, Vec<Option<f64>>)>,
}

impl BenchmarkTable {
    pub fn build<'t>(
        scenarios: impl IntoIterator<Item = (String, Option<&'t StatsTable>)>,
    ) -> BenchmarkTable {
        let scenarios: Vec<(String, Option<&StatsTable>)> = scenarios.into_iter().collect();
        let mut names: Vec<&StatsRow> = Vec::new();
        for (_, table) in &scenarios {
            for row in table.iter().flat_map(|t| t.rows.iter()) {
                if !names.iter().any(|r| r.statistic == row.statistic) {
                    names.push(row);
                }
            }
        }

        let rows = names
            .iter()
            .map(|reference| {
                let values = scenarios
                    .iter()
                    .map(|(_, table)| {
                        table
                            .and_then(|t| t.get(&reference.statistic))
                            .map(StatsRow::headline)
                    })
                    .collect();
                (reference.name.clone(), values)
            })
            .collect();

        BenchmarkTable {
            scenarios: scenarios.into_iter().map(|(name, _)| name).collect(),
            rows,
        }
    }
}
