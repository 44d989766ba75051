use serde::{Deserialize, Serialize};

use crate::period::Horizon;

use super::Directive;

fn one() -> f64 {
    1.0
}

/// Everything a scenario solve reads, owned by the caller. The engine never mutates it, so
/// a context can be solved again or adjusted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContext {
    pub name: String,
    /// The beneficiary type whose ration is optimized
    pub beneficiary: String,
    /// Activities whose fixed baskets are supplied on top of the optimized ration
    #[serde(default)]
    pub supplementary: Vec<String>,
    pub horizon: Horizon,
    /// Rescale procurement prices by the seasonal price index
    #[serde(default)]
    pub forecast: bool,
    /// Scales every procurement price
    #[serde(default = "one")]
    pub price_multiplier: f64,
    /// Scales every beneficiary count
    #[serde(default = "one")]
    pub demand_scale: f64,
    #[serde(default)]
    pub directives: Vec<Directive>,
}

impl ScenarioContext {
    pub fn new(name: &str, beneficiary: &str, horizon: Horizon) -> ScenarioContext {
        ScenarioContext {
            name: name.to_string(),
            beneficiary: beneficiary.to_string(),
            supplementary: Vec::new(),
            horizon,
            forecast: false,
            price_multiplier: 1.0,
            demand_scale: 1.0,
            directives: Vec::new(),
        }
    }

    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// A copy under another name
    pub fn renamed(&self, name: String) -> ScenarioContext {
        ScenarioContext {
            name,
            ..self.clone()
        }
    }
}
