use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{
    kpi::{Statistic, StatisticError},
    period::Period,
    problem::Quantity,
};

use super::Pattern;

/// A scenario constraint, stated in terms of names. The compiler resolves the patterns
/// against the topology and turns each directive into bounds and linear constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Fixed (`min == max`) or banded ration of the matching commodities in every non-empty
    /// period, in grams per person per day
    RationSize {
        commodity: Pattern,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Bounds on the tonnes of the matching commodities procured over the horizon
    CommodityTonnage {
        commodity: Pattern,
        #[serde(default)]
        min: Option<Quantity>,
        #[serde(default)]
        max: Option<Quantity>,
    },
    /// Forces food groups into, or out of, the basket
    FoodGroup { group: Pattern, include: bool },
    /// Includes or excludes procurement options
    Procurement {
        #[serde(default)]
        source: Pattern,
        #[serde(default)]
        country: Pattern,
        #[serde(default)]
        incoterm: Pattern,
        #[serde(default)]
        delivery_place: Pattern,
        #[serde(default)]
        commodity: Pattern,
        include: bool,
        /// Tonnes an inclusion must procure over the horizon
        #[serde(default)]
        quantity: Option<Quantity>,
    },
    /// Includes or excludes legs
    Routing {
        #[serde(default)]
        origin: Pattern,
        #[serde(default)]
        destination: Pattern,
        #[serde(default)]
        commodity: Pattern,
        include: bool,
        #[serde(default)]
        quantity: Option<Quantity>,
    },
    /// Share of a nutrient's requirement provided through cash-based transfers. The first
    /// nutrient is used when none is named.
    TransferModality {
        #[serde(default)]
        nutrient: Option<String>,
        #[serde(default)]
        min_cash_share: Option<f64>,
        #[serde(default)]
        max_cash_share: Option<f64>,
    },
    /// Utilization band and tonnage allocation of capacitated hubs, per period
    CapacityTarget {
        location: Pattern,
        #[serde(default)]
        min_utilization: Option<f64>,
        #[serde(default)]
        max_utilization: Option<f64>,
        #[serde(default)]
        max_tonnage: Option<Quantity>,
    },
    /// Largest tolerated shortfall fraction of the matching nutrients
    NutrientShortfallCap { nutrient: Pattern, max_shortfall: f64 },
    /// Bounds on a linear statistic, in one period or over the horizon
    StatisticBound {
        statistic: Statistic,
        #[serde(default)]
        period: Option<Period>,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Excludes every GMO procurement option unless allowed
    Gmo { allow: bool },
    /// Minimum in-kind donation procured, in tonnes or as a share of all procurement
    InKindFloor {
        #[serde(default)]
        min_tonnage: Option<Quantity>,
        #[serde(default)]
        min_share: Option<f64>,
    },
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::RationSize { .. } => "ration size",
            Directive::CommodityTonnage { .. } => "commodity tonnage",
            Directive::FoodGroup { .. } => "food group",
            Directive::Procurement { .. } => "procurement",
            Directive::Routing { .. } => "routing",
            Directive::TransferModality { .. } => "transfer modality",
            Directive::CapacityTarget { .. } => "capacity target",
            Directive::NutrientShortfallCap { .. } => "nutrient shortfall cap",
            Directive::StatisticBound { .. } => "statistic bound",
            Directive::Gmo { .. } => "gmo",
            Directive::InKindFloor { .. } => "in-kind floor",
        }
    }
}

/// Why a directive was skipped. Never fatal to the solve.
#[derive(Debug, Display, Clone, PartialEq)]
pub enum DirectiveError {
    #[display(fmt = "unknown {} `{}`", kind, name)]
    Unknown { kind: &'static str, name: String },
    #[display(fmt = "no {} matches", _0)]
    NoMatch(&'static str),
    #[display(fmt = "invalid bound: {}", _0)]
    InvalidBound(String),
    #[display(fmt = "period {} is outside the horizon", _0)]
    UnknownPeriod(Period),
    #[display(fmt = "{}", _0)]
    Statistic(StatisticError),
}

impl std::error::Error for DirectiveError {}

impl From<StatisticError> for DirectiveError {
    fn from(e: StatisticError) -> Self {
        DirectiveError::Statistic(e)
    }
}

/// Checks an optional (min, max) band
pub(super) fn check_band(min: Option<f64>, max: Option<f64>) -> Result<(), DirectiveError> {
    match (min, max) {
        (None, None) => Err(DirectiveError::InvalidBound("no bound given".into())),
        (Some(lo), Some(hi)) if lo > hi => Err(DirectiveError::InvalidBound(format!(
            "min {lo} exceeds max {hi}"
        ))),
        (Some(x), _) | (_, Some(x)) if x.is_nan() => {
            Err(DirectiveError::InvalidBound("bound is not a number".into()))
        }
        _ => Ok(()),
    }
}

pub(super) fn check_non_negative(value: Option<f64>, what: &str) -> Result<(), DirectiveError> {
    match value {
        Some(x) if !(x >= 0.0) => Err(DirectiveError::InvalidBound(format!("negative {what} {x}"))),
        _ => Ok(()),
    }
}

/// Checks that every given share lies in [0, 1]
pub(super) fn check_shares(shares: &[Option<f64>]) -> Result<(), DirectiveError> {
    for share in shares.iter().flatten() {
        if !(0.0..=1.0).contains(share) {
            return Err(DirectiveError::InvalidBound(format!(
                "share {share} is outside [0, 1]"
            )));
        }
    }
    Ok(())
}
