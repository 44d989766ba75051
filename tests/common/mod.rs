#![allow(dead_code)]
use std::collections::BTreeMap;

use aidflow::{
    period::{Horizon, Period},
    problem::{
        BeneficiaryData, CommodityData, DemandData, LegData, LocationData, LocationKind,
        NutrientData, ProcurementData,
    },
    Engine, EngineConfig, ScenarioContext, Topology, TopologyData,
};

/// Absolute tolerance on solver output
pub const TOL: f64 = 1e-3;

pub fn period(s: &str) -> Period {
    s.parse().unwrap()
}

pub fn horizon(start: &str, end: &str) -> Horizon {
    Horizon::new(period(start), period(end)).unwrap()
}

pub fn location(name: &str, kind: LocationKind) -> LocationData {
    LocationData {
        name: name.into(),
        kind,
        country: "Somewhere".into(),
        processing_days: 0.0,
        handling_cost: 0.0,
        storage_cost: 0.0,
        capacity: BTreeMap::new(),
    }
}

pub fn leg(origin: &str, destination: &str, commodity: &str, cost: f64, days: f64) -> LegData {
    LegData {
        origin: origin.into(),
        destination: destination.into(),
        commodity: commodity.into(),
        cost,
        duration_days: days,
        capacity: None,
    }
}

pub fn option(source: &str, place: &str, commodity: &str, price: f64) -> ProcurementData {
    ProcurementData {
        source: source.into(),
        delivery_place: place.into(),
        commodity: commodity.into(),
        price,
        capacity: None,
        seasonal_capacity: None,
        gmo: false,
        in_kind: false,
        incoterm: "CIF".into(),
        as_of: None,
    }
}

pub fn commodity(name: &str, nutrients: Vec<f64>, group: &str) -> CommodityData {
    CommodityData {
        name: name.into(),
        nutrients,
        super_commodity: group.into(),
        food_group: group.into(),
        consumption_group: None,
        cash: false,
    }
}

fn demand(period_name: &str, count: f64) -> DemandData {
    DemandData {
        beneficiary: "GFD".into(),
        location: "Camp".into(),
        period: period(period_name),
        count,
    }
}

/// One supplier, one port, one final delivery point and one commodity. 1,000 beneficiaries
/// in January only, so February is empty.
pub fn wheat() -> TopologyData {
    TopologyData {
        periods: vec![period("2024-01"), period("2024-02")],
        nutrients: vec![NutrientData {
            name: "Energy".into(),
            hard: true,
        }],
        commodities: vec![commodity("Wheat", vec![350.0], "Cereals")],
        locations: vec![
            location("Supplier", LocationKind::InternationalSupplier),
            location("Port", LocationKind::DischargePort),
            location("Camp", LocationKind::FinalDeliveryPoint),
        ],
        legs: vec![
            leg("Supplier", "Port", "Wheat", 500.0, 10.0),
            leg("Port", "Camp", "Wheat", 100.0, 5.0),
        ],
        procurement: vec![option("Supplier", "Port", "Wheat", 0.0)],
        beneficiaries: vec![BeneficiaryData {
            name: "GFD".into(),
            requirements: vec![2100.0],
            feeding_days: 30.0,
        }],
        demand: vec![demand("2024-01", 1000.0)],
        ..TopologyData::default()
    }
}

/// An international supplier shipping wheat and beans through a port, and a small local
/// market selling wheat straight to the camp. 1,000 beneficiaries in both periods.
///
/// Landed cost per tonne: wheat 700 through the port (15 days), 750 from the market (2 days,
/// at most 5 t per period), beans 1,200 through the port.
pub fn two_sources() -> TopologyData {
    TopologyData {
        periods: vec![period("2024-01"), period("2024-02")],
        nutrients: vec![
            NutrientData {
                name: "Energy".into(),
                hard: true,
            },
            NutrientData {
                name: "Protein".into(),
                hard: false,
            },
        ],
        commodities: vec![
            commodity("Wheat", vec![350.0, 11.0], "Cereals"),
            commodity("Beans", vec![340.0, 22.0], "Pulses"),
        ],
        locations: vec![
            location("Abroad", LocationKind::InternationalSupplier),
            location("Market", LocationKind::LocalSupplier),
            location("Port", LocationKind::DischargePort),
            location("Camp", LocationKind::FinalDeliveryPoint),
        ],
        legs: vec![
            leg("Abroad", "Port", "Wheat", 400.0, 10.0),
            leg("Abroad", "Port", "Beans", 600.0, 10.0),
            leg("Market", "Camp", "Wheat", 50.0, 2.0),
            leg("Port", "Camp", "Wheat", 100.0, 5.0),
            leg("Port", "Camp", "Beans", 100.0, 5.0),
        ],
        procurement: vec![
            option("Abroad", "Port", "Wheat", 200.0),
            option("Abroad", "Port", "Beans", 500.0),
            ProcurementData {
                capacity: Some(5.0),
                ..option("Market", "Camp", "Wheat", 700.0)
            },
        ],
        beneficiaries: vec![BeneficiaryData {
            name: "GFD".into(),
            requirements: vec![2100.0, 50.0],
            feeding_days: 30.0,
        }],
        demand: vec![demand("2024-01", 1000.0), demand("2024-02", 1000.0)],
        ..TopologyData::default()
    }
}

pub fn engine(data: TopologyData) -> Engine {
    let topology = Topology::new(data).unwrap();
    Engine::with_default_solver(topology, EngineConfig::default())
}

pub fn scenario(name: &str) -> ScenarioContext {
    ScenarioContext::new(name, "GFD", horizon("2024-01", "2024-02"))
}
