use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use derive_more::Display;
use itertools::iproduct;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    models::{core::CoreModel, formulation::Values, utils::ConvertVars},
    period::Period,
    problem::{LegMode, Quantity, Topology},
    scenario::Directive,
};

/// Values below this are reported as zero and left out of the tables
const REPORT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Display)]
pub enum ExportError {
    #[display(fmt = "i/o error: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "json error: {}", _0)]
    Json(serde_json::Error),
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Json(e)
    }
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ExportError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), ExportError> {
    let writer = BufWriter::new(File::create(path)?);
    Ok(serde_json::to_writer_pretty(writer, value)?)
}

/// Serializes a directive set so that it can be stored and later re-ingested
pub fn export_directives(directives: &[Directive]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(directives)?)
}

pub fn import_directives(json: &str) -> Result<Vec<Directive>, ExportError> {
    Ok(serde_json::from_str(json)?)
}

/// One shipment, or one carried inventory position when `mode` is `None`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRow {
    /// Departure period
    pub period: Period,
    pub origin: String,
    pub destination: String,
    pub commodity: String,
    pub mode: Option<LegMode>,
    pub tonnes: Quantity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowTable {
    pub rows: Vec<FlowRow>,
}

impl FlowTable {
    pub fn build(core: &CoreModel, topology: &Topology, values: &Values) -> FlowTable {
        let calendar = topology.periods();
        let locations = topology.locations();
        let commodities = topology.commodities();
        let legs = topology.legs();
        let (f, i) = (core.vars.f.convert(values), core.vars.i.convert(values));
        let mut rows = Vec::new();

        for &t in &core.sets.T {
            let period = calendar[core.periods[t]];
            for &l in &core.sets.L {
                let tonnes = f[&(l, t)];
                if tonnes > REPORT_TOLERANCE {
                    let leg = &legs[l];
                    rows.push(FlowRow {
                        period,
                        origin: locations[leg.origin()].name().to_string(),
                        destination: locations[leg.destination()].name().to_string(),
                        commodity: commodities[leg.commodity()].name().to_string(),
                        mode: Some(leg.mode()),
                        tonnes,
                    });
                }
            }
            for &(n, c) in &core.sets.H {
                let tonnes = i[&(n, c, t)];
                if tonnes > REPORT_TOLERANCE {
                    let hub = locations[n].name().to_string();
                    rows.push(FlowRow {
                        period,
                        origin: hub.clone(),
                        destination: hub,
                        commodity: commodities[c].name().to_string(),
                        mode: None,
                        tonnes,
                    });
                }
            }
        }
        FlowTable { rows }
    }

    /// Total tonnes shipped on legs in the period, inventory excluded
    pub fn shipped_in(&self, period: Period) -> Quantity {
        self.rows
            .iter()
            .filter(|row| row.period == period && row.mode.is_some())
            .map(|row| row.tonnes)
            .sum()
    }
}

/// The ration of one commodity in one non-empty period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketRow {
    pub period: Period,
    pub commodity: String,
    pub super_commodity: String,
    pub food_group: String,
    /// Grams (or currency for cash) per person per day
    pub ration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasketTable {
    pub rows: Vec<BasketRow>,
}

impl BasketTable {
    pub fn build(core: &CoreModel, topology: &Topology, empty: &[bool], values: &Values) -> BasketTable {
        let calendar = topology.periods();
        let commodities = topology.commodities();
        let groups = topology.food_groups();
        let r = core.vars.r.convert(values);
        let rows = iproduct!(&core.sets.T, &core.sets.C)
            .filter(|(t, _)| !empty[**t])
            .filter_map(|(&t, &c)| {
                let ration = r[&(c, t)];
                (ration > REPORT_TOLERANCE).then(|| {
                    let commodity = &commodities[c];
                    BasketRow {
                        period: calendar[core.periods[t]],
                        commodity: commodity.name().to_string(),
                        super_commodity: commodity.super_commodity().to_string(),
                        food_group: groups[commodity.food_group()].clone(),
                        ration,
                    }
                })
            })
            .collect();
        BasketTable { rows }
    }

    pub fn ration(&self, period: Period, commodity: &str) -> f64 {
        self.rows
            .iter()
            .find(|row| row.period == period && row.commodity == commodity)
            .map_or(0.0, |row| row.ration)
    }
}
