use derive_more::Display;
use log::debug;
use serde::{Deserialize, Serialize};
use typed_index_collections::TiVec;

use crate::problem::{Days, NutrientIndex, Quantity, Topology};

/// Tunable constants of the engine. Every field has a default, so a config file only needs
/// to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of a period in days
    pub days_per_period: Days,
    /// A transit remainder of at most this many days still arrives within the period it
    /// would otherwise spill over from
    pub rounding_threshold_days: Days,
    /// Nominal duration of the inventory-carry self loop
    pub storage_days: Days,
    /// Smallest non-zero ration of a commodity, in grams per person per day
    pub min_ration_grams: f64,
    /// Smallest non-zero ration of the cash pseudo-commodity
    pub min_cash_ration: f64,
    /// Upper bound on any ration, in grams (or currency) per person per day
    pub max_ration: f64,
    /// Overhead markup, applied on the transport, procurement, handling and storage subtotal
    pub overhead_rate: f64,
    /// Support cost markup, compounding on the subtotal including overhead
    pub support_rate: f64,
    /// Lower bound enforced by an inclusion directive that gives no quantity
    pub include_min_quantity: Quantity,
    /// Replaces the data-derived flow big-M when set
    pub flow_big_m_override: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            days_per_period: 30.0,
            rounding_threshold_days: 20.0,
            storage_days: 30.0,
            min_ration_grams: 1.0,
            min_cash_ration: 0.01,
            max_ration: 2000.0,
            overhead_rate: 0.0,
            support_rate: 0.0,
            include_min_quantity: 1.0,
            flow_big_m_override: None,
        }
    }
}

#[derive(Debug, Display, Clone, PartialEq)]
pub enum ConfigError {
    #[display(fmt = "days_per_period must be positive, got {}", _0)]
    PeriodLength(Days),
    /// The threshold must leave part of a period to round up on
    #[display(fmt = "rounding threshold of {} days does not fit in a {} day period", _0, _1)]
    RoundingThreshold(Days, Days),
    #[display(fmt = "`{}` must be a non-negative number, got {}", _0, _1)]
    Negative(&'static str, f64),
    #[display(fmt = "max_ration must be positive, got {}", _0)]
    MaxRation(f64),
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// Rejects configurations the discretization and the big-M derivation cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.days_per_period.is_finite() && self.days_per_period > 0.0) {
            return Err(ConfigError::PeriodLength(self.days_per_period));
        }
        let threshold = self.rounding_threshold_days;
        if !(threshold >= 0.0 && threshold < self.days_per_period) {
            return Err(ConfigError::RoundingThreshold(threshold, self.days_per_period));
        }
        if !(self.max_ration.is_finite() && self.max_ration > 0.0) {
            return Err(ConfigError::MaxRation(self.max_ration));
        }
        let non_negative = [
            ("storage_days", self.storage_days),
            ("min_ration_grams", self.min_ration_grams),
            ("min_cash_ration", self.min_cash_ration),
            ("overhead_rate", self.overhead_rate),
            ("support_rate", self.support_rate),
            ("include_min_quantity", self.include_min_quantity),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(ConfigError::Negative(name, value));
            }
        }
        match self.flow_big_m_override {
            Some(m) if !(m >= 0.0) => Err(ConfigError::Negative("flow_big_m_override", m)),
            _ => Ok(()),
        }
    }

    /// Converts a duration to a whole number of periods. The remainder rounds down if it is at
    /// most `rounding_threshold_days`, and up otherwise.
    pub fn discretize(&self, days: Days) -> usize {
        let whole = (days / self.days_per_period).floor();
        let remainder = days - whole * self.days_per_period;
        if remainder > self.rounding_threshold_days {
            whole as usize + 1
        } else {
            whole as usize
        }
    }

    /// Compounded markup factor applied to the base cost
    pub fn markup(&self) -> f64 {
        (1.0 + self.overhead_rate) * (1.0 + self.support_rate)
    }
}

/// The big-M constants used to link indicators to continuous quantities, derived from the
/// largest values the data admits.
#[derive(Debug, Clone, PartialEq)]
pub struct BigM {
    /// Upper bound on the flow of any leg in any period
    pub flow: f64,
    /// Upper bound on any ration
    pub ration: f64,
    /// Upper bound on the overshoot of each nutrient
    pub overshoot: TiVec<NutrientIndex, f64>,
}

impl BigM {
    /// `demand_scale` multiplies every demand figure, so the flow bound grows with it. Scales
    /// below one keep the unscaled bound.
    pub fn derive(
        topology: &Topology,
        config: &EngineConfig,
        periods: &[usize],
        demand_scale: f64,
    ) -> BigM {
        let max_days = topology
            .beneficiaries()
            .iter()
            .map(|b| b.feeding_days())
            .chain(topology.baskets().iter().map(|b| b.feeding_days))
            .fold(0.0, f64::max);

        let people: f64 = periods
            .iter()
            .flat_map(|&t| {
                topology.beneficiaries().keys().flat_map(move |b| {
                    topology
                        .final_delivery_points()
                        .map(move |fdp| topology.demand(b, fdp, t))
                })
            })
            .sum();

        let stock: f64 = topology.stock().map(|(_, q)| *q).sum();
        // Tonnes needed if every beneficiary received the largest possible ration of every
        // commodity on every feeding day of the horizon.
        let commodities = topology.commodities().len().max(1) as f64;
        let grams = topology
            .baskets()
            .iter()
            .map(|b| b.grams)
            .fold(config.max_ration, f64::max);
        let derived =
            people * max_days * grams * commodities * demand_scale.max(1.0) / 1e6 + stock;
        let flow = config.flow_big_m_override.unwrap_or(derived.max(1.0));

        let overshoot = topology
            .nutrients()
            .keys()
            .map(|n| {
                let total: f64 = topology
                    .commodities()
                    .iter()
                    .map(|c| c.content(n).max(0.0) * config.max_ration / 100.0)
                    .sum();
                total.max(1.0)
            })
            .collect();

        debug!("Derived big-M: flow = {flow}, ration = {}", config.max_ration);

        BigM {
            flow,
            ration: config.max_ration,
            overshoot,
        }
    }
}
