use std::path::{Path, PathBuf};

use aidflow::{
    engine::{benchmark, Engine},
    export::{read_json, ExportError},
    search::{run_sweep, Sweep},
    EngineConfig, ScenarioContext, Topology, TopologyData,
};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

#[derive(Parser)]
#[clap(name = "aidflow", version, about = "Food-assistance supply chain optimizer")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve one or more scenarios and print their statistics
    Solve {
        #[clap(long)]
        topology: PathBuf,
        /// A scenario, or a list of scenarios to benchmark against each other
        #[clap(long)]
        scenario: PathBuf,
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Sweep a parameter over a base scenario and print the sweep report
    Sweep {
        #[clap(long)]
        topology: PathBuf,
        #[clap(long)]
        scenario: PathBuf,
        #[clap(long)]
        sweep: PathBuf,
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct SolveReport<'a> {
    name: &'a str,
    outcome: String,
    objective: Option<f64>,
    directive_errors: Vec<String>,
    stats: Option<&'a aidflow::kpi::StatsTable>,
    flows: Option<&'a aidflow::export::FlowTable>,
    basket: Option<&'a aidflow::export::BasketTable>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Scenarios {
    One(ScenarioContext),
    Many(Vec<ScenarioContext>),
}

fn engine(topology: &Path, config: Option<&Path>) -> Result<Engine, Box<dyn std::error::Error>> {
    let data: TopologyData = read_json(topology)?;
    let topology = Topology::new(data)?;
    let config: EngineConfig = match config {
        Some(path) => read_json(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    info!(
        "Loaded {} locations, {} legs and {} procurement options",
        topology.locations().len(),
        topology.legs().len(),
        topology.procurement().len()
    );
    Ok(Engine::with_default_solver(topology, config))
}

fn print<T: Serialize>(value: &T) -> Result<(), ExportError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Solve {
            topology,
            scenario,
            config,
        } => {
            let mut engine = engine(&topology, config.as_deref())?;
            let scenarios = match read_json(&scenario)? {
                Scenarios::One(context) => vec![context],
                Scenarios::Many(contexts) => contexts,
            };
            let outcomes = engine.solve_all(&scenarios)?;
            let reports: Vec<SolveReport> = outcomes
                .iter()
                .map(|o| SolveReport {
                    name: &o.name,
                    outcome: o.outcome.to_string(),
                    objective: o.objective,
                    directive_errors: o.directive_errors.iter().map(|e| e.to_string()).collect(),
                    stats: o.stats(),
                    flows: o.solution.as_ref().map(|s| &s.flows),
                    basket: o.solution.as_ref().map(|s| &s.basket),
                })
                .collect();
            print(&reports)?;
            if outcomes.len() > 1 {
                print(&benchmark(&outcomes))?;
            }
        }
        Command::Sweep {
            topology,
            scenario,
            sweep,
            config,
        } => {
            let mut engine = engine(&topology, config.as_deref())?;
            let base: ScenarioContext = read_json(&scenario)?;
            let sweep: Sweep = read_json(&sweep)?;
            let report = run_sweep(&mut engine, &base, &sweep)?;
            print(&report)?;
        }
    }
    Ok(())
}

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
