//! Optimization engine for humanitarian food-assistance supply chains: chooses rations,
//! sourcing and routing over a multi-period network at minimum cost, subject to scenario
//! directives.
pub mod config;
pub mod engine;
pub mod export;
pub mod kpi;
pub mod models;
pub mod network;
pub mod period;
pub mod problem;
pub mod reachability;
pub mod scenario;
pub mod search;
pub mod solver;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, Outcome, ScenarioOutcome};
pub use problem::{Topology, TopologyData};
pub use scenario::{Directive, Pattern, ScenarioContext};
