use std::collections::{BTreeSet, HashMap};

use itertools::iproduct;
use log::{debug, trace};
use typed_index_collections::TiVec;

use crate::{
    config::EngineConfig,
    problem::{CommodityIndex, Cost, LegIndex, LocationIndex, LocationKind, Topology},
};

/// Horizon-relative period offset
pub type TimeIndex = usize;

/// The static topology expanded over the horizon: per-period leg costs, discretized delays
/// and the arrival map used by flow conservation.
#[derive(Debug, Clone)]
pub struct TemporalNetwork {
    /// Calendar position of each horizon offset
    periods: Vec<usize>,
    /// Delay of each leg, in periods
    delay: TiVec<LegIndex, usize>,
    /// Procurement price per tonne of each supply leg in each horizon period
    price: HashMap<(LegIndex, TimeIndex), Cost>,
    /// Delay of the inventory-carry self loop, at least one period
    carry_delay: usize,
    /// (hub, commodity) pairs that may hold inventory
    carry: Vec<(LocationIndex, CommodityIndex)>,
    /// Shipments landing at (node, commodity, period), as (leg, departure period)
    arrivals: HashMap<(LocationIndex, CommodityIndex, TimeIndex), Vec<(LegIndex, TimeIndex)>>,
    /// Legs into each final delivery point, per commodity
    deliveries: HashMap<(LocationIndex, CommodityIndex), Vec<LegIndex>>,
}

impl TemporalNetwork {
    pub fn build(
        topology: &Topology,
        config: &EngineConfig,
        periods: &[usize],
        forecast: bool,
    ) -> TemporalNetwork {
        let horizon = periods.len();
        let legs = topology.legs();
        let locations = topology.locations();
        let calendar = topology.periods();

        let delay: TiVec<LegIndex, usize> = legs
            .iter()
            .map(|leg| config.discretize(leg.duration()))
            .collect();

        let mut price = HashMap::new();
        for (option, t) in iproduct!(topology.procurement().iter(), 0..horizon) {
            let base = option.price();
            let adjusted = match option.as_of() {
                Some(as_of) if forecast => {
                    let country = locations[option.source()].country();
                    let now = topology.seasonality_index(
                        option.commodity(),
                        country,
                        calendar[periods[t]].month(),
                    );
                    let then = topology.seasonality_index(option.commodity(), country, as_of.month());
                    match (now, then) {
                        (Some(now), Some(then)) if then > 0.0 => base * now / then,
                        _ => base,
                    }
                }
                _ => base,
            };
            price.insert((option.leg(), t), adjusted);
        }

        let mut carry = BTreeSet::new();
        for n in topology.hubs() {
            for &l in topology.legs_in(n).iter().chain(topology.legs_out(n)) {
                carry.insert((n, legs[l].commodity()));
            }
        }
        for (&(n, c), _) in topology.stock() {
            if locations[n].kind().is_hub() {
                carry.insert((n, c));
            }
        }

        let mut arrivals: HashMap<_, Vec<_>> = HashMap::new();
        let mut deliveries: HashMap<_, Vec<_>> = HashMap::new();
        for (l, leg) in legs.iter_enumerated() {
            let destination = leg.destination();
            if locations[destination].kind() == LocationKind::FinalDeliveryPoint {
                deliveries
                    .entry((destination, leg.commodity()))
                    .or_default()
                    .push(l);
                continue;
            }
            for departure in 0..horizon {
                let arrival = departure + delay[l];
                if arrival < horizon {
                    arrivals
                        .entry((destination, leg.commodity(), arrival))
                        .or_default()
                        .push((l, departure));
                }
            }
        }

        let carry_delay = config.discretize(config.storage_days).max(1);
        trace!("Leg delays: {:?}", delay);
        debug!(
            "Temporal network over {} periods: {} leg instances, {} carry arcs, {} arrival entries",
            horizon,
            legs.len() * horizon,
            carry.len() * horizon,
            arrivals.len()
        );

        TemporalNetwork {
            periods: periods.to_vec(),
            delay,
            price,
            carry_delay,
            carry: carry.into_iter().collect(),
            arrivals,
            deliveries,
        }
    }

    /// Number of horizon periods
    pub fn horizon(&self) -> usize {
        self.periods.len()
    }

    pub fn periods(&self) -> &[usize] {
        &self.periods
    }

    pub fn delay(&self, leg: LegIndex) -> usize {
        self.delay[leg]
    }

    /// The (possibly forecast-adjusted) procurement price of a supply leg
    pub fn price(&self, leg: LegIndex, t: TimeIndex) -> Option<Cost> {
        self.price.get(&(leg, t)).copied()
    }

    pub fn carry_delay(&self) -> usize {
        self.carry_delay
    }

    pub fn carry(&self) -> &[(LocationIndex, CommodityIndex)] {
        &self.carry
    }

    /// Shipments landing at the node in the period, as (leg, departure period)
    pub fn arrivals(
        &self,
        node: LocationIndex,
        commodity: CommodityIndex,
        t: TimeIndex,
    ) -> &[(LegIndex, TimeIndex)] {
        self.arrivals
            .get(&(node, commodity, t))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Legs delivering the commodity to a final delivery point
    pub fn deliveries(&self, fdp: LocationIndex, commodity: CommodityIndex) -> &[LegIndex] {
        self.deliveries
            .get(&(fdp, commodity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
