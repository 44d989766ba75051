use std::collections::HashMap;

use itertools::iproduct;
use log::trace;
use slice_group_by::GroupBy;
use typed_index_collections::TiVec;

use crate::{
    config::{BigM, EngineConfig},
    network::{TemporalNetwork, TimeIndex},
    problem::{
        CommodityIndex, Cost, Days, FoodGroupIndex, GroupIndex, LegIndex, LocationIndex,
        NutrientIndex, Quantity, Topology,
    },
    reachability::ReachabilityIndex,
};

/// A (source, delivery place) pair
pub type Pair = (LocationIndex, LocationIndex);

#[allow(non_snake_case)]
#[derive(Debug, Clone)]
pub struct Sets {
    /// Horizon periods
    pub T: Vec<TimeIndex>,
    /// Commodities
    pub C: Vec<CommodityIndex>,
    /// Nutrients
    pub U: Vec<NutrientIndex>,
    /// Legs
    pub L: Vec<LegIndex>,
    /// Supply legs, i.e. legs priced by a procurement option
    pub L_S: Vec<LegIndex>,
    /// Hubs: discharge ports and extended delivery points
    pub N_H: Vec<LocationIndex>,
    /// Final delivery points
    pub N_F: Vec<LocationIndex>,
    /// (hub, commodity) pairs that conserve flow and may carry inventory
    pub H: Vec<(LocationIndex, CommodityIndex)>,
    /// Reachable (source, delivery place) pairs
    pub P: Vec<Pair>,
    /// Supply legs of each pair, reachable or not
    pub L_p: HashMap<Pair, Vec<LegIndex>>,
    /// Food groups
    pub G: Vec<FoodGroupIndex>,
    /// Commodities in each food group
    pub C_g: TiVec<FoodGroupIndex, Vec<CommodityIndex>>,
    /// Consumption-score groups
    pub Q: Vec<GroupIndex>,
    /// Commodities in each consumption-score group
    pub C_q: TiVec<GroupIndex, Vec<CommodityIndex>>,
    /// Legs sharing each (origin, destination) route
    pub L_r: HashMap<Pair, Vec<LegIndex>>,
}

#[allow(non_snake_case)]
impl Sets {
    pub fn new(topology: &Topology, reach: &ReachabilityIndex, horizon: usize) -> Sets {
        let legs = topology.legs();

        let L_S: Vec<LegIndex> = topology.procurement().iter().map(|o| o.leg()).collect();
        let mut L_p: HashMap<Pair, Vec<LegIndex>> = HashMap::new();
        for option in topology.procurement() {
            L_p.entry((option.source(), option.delivery_place()))
                .or_default()
                .push(option.leg());
        }

        let mut P: Vec<Pair> = reach.pairs().collect();
        P.sort();

        let mut C_g: TiVec<FoodGroupIndex, Vec<CommodityIndex>> =
            vec![Vec::new(); topology.food_groups().len()].into();
        let mut C_q: TiVec<GroupIndex, Vec<CommodityIndex>> =
            vec![Vec::new(); topology.consumption_groups().len()].into();
        for (c, commodity) in topology.commodities().iter_enumerated() {
            C_g[commodity.food_group()].push(c);
            if let Some(q) = commodity.consumption_group() {
                C_q[q].push(c);
            }
        }

        // Group the legs by route
        let mut by_route: Vec<LegIndex> = legs.keys().collect();
        by_route.sort_by_key(|l| (legs[*l].origin(), legs[*l].destination()));
        let L_r = by_route
            .linear_group_by_key(|l| (legs[*l].origin(), legs[*l].destination()))
            .map(|group| {
                let first = &legs[group[0]];
                ((first.origin(), first.destination()), group.to_vec())
            })
            .collect();

        Sets {
            T: (0..horizon).collect(),
            C: topology.commodities().keys().collect(),
            U: topology.nutrients().keys().collect(),
            L: legs.keys().collect(),
            L_S,
            N_H: topology.hubs().collect(),
            N_F: topology.final_delivery_points().collect(),
            H: Vec::new(),
            P,
            L_p,
            G: topology.food_groups().keys().collect(),
            C_g,
            Q: topology.consumption_groups().keys().collect(),
            C_q,
            L_r,
        }
    }
}

#[allow(non_snake_case)]
#[derive(Debug, Clone)]
pub struct Parameters {
    /// The engine configuration the parameters were derived with
    pub config: EngineConfig,
    /// The expanded network
    pub network: TemporalNetwork,
    /// Lead times through the network
    pub reach: ReachabilityIndex,
    /// Big-M constants
    pub M: BigM,
    /// Smallest non-zero ration of each commodity
    pub R_min: TiVec<CommodityIndex, f64>,
    /// Binding fastest lead time of each reachable pair
    pub D_quick: HashMap<Pair, Days>,
    /// Transport cost per tonne of each leg
    pub C_transport: TiVec<LegIndex, Cost>,
    /// Handling cost per tonne at the destination of each leg
    pub C_handling: TiVec<LegIndex, Cost>,
    /// Procurement price of each supply leg in each period
    pub C_price: HashMap<(LegIndex, TimeIndex), Cost>,
    /// Capacity of each supply leg in each period, including seasonal limits
    pub Q_procurement: HashMap<(LegIndex, TimeIndex), Quantity>,
    /// Throughput capacity of each hub in each period
    pub Q_node: HashMap<(LocationIndex, TimeIndex), Quantity>,
    /// Capacity shared by all legs of a route in each period
    pub Q_route: HashMap<(Pair, TimeIndex), Quantity>,
    /// Upper bound on the lead time variables
    pub D_max: Days,
}

#[allow(non_snake_case)]
impl Parameters {
    pub fn new(
        topology: &Topology,
        config: &EngineConfig,
        sets: &mut Sets,
        reach: ReachabilityIndex,
        periods: &[usize],
        forecast: bool,
        demand_scale: f64,
    ) -> Parameters {
        let network = TemporalNetwork::build(topology, config, periods, forecast);
        let M = BigM::derive(topology, config, periods, demand_scale);
        sets.H = network.carry().to_vec();

        let R_min = topology
            .commodities()
            .iter()
            .map(|c| {
                if c.cash() {
                    config.min_cash_ration
                } else {
                    config.min_ration_grams
                }
            })
            .collect();

        let D_quick = sets
            .P
            .iter()
            .filter_map(|&(s, d)| reach.pair(s, d).map(|lt| ((s, d), lt.quick)))
            .collect();

        let legs = topology.legs();
        let C_transport = legs.iter().map(|l| l.cost()).collect();
        let C_handling = legs
            .iter()
            .map(|l| topology.locations()[l.destination()].handling_cost())
            .collect();

        let mut C_price = HashMap::new();
        let mut Q_procurement = HashMap::new();
        for option in topology.procurement() {
            let l = option.leg();
            for &t in &sets.T {
                C_price.insert((l, t), network.price(l, t).unwrap_or(option.price()));
                let period = topology.periods()[periods[t]];
                if let Some(cap) = option.capacity_in(period) {
                    Q_procurement.insert((l, t), cap);
                }
            }
        }

        let mut Q_node = HashMap::new();
        for (&n, &t) in iproduct!(&sets.N_H, &sets.T) {
            if let Some(cap) = topology.locations()[n].capacity(periods[t]) {
                Q_node.insert((n, t), cap);
            }
        }

        let mut Q_route = HashMap::new();
        for route in topology.route_capacities() {
            for &t in &sets.T {
                if let Some(cap) = route.capacity.get(&periods[t]) {
                    Q_route.insert(((route.origin, route.destination), t), *cap);
                }
            }
        }

        let D_max = reach.max_quick();
        trace!("Lead time bound: {D_max} days, flow big-M: {}", M.flow);

        Parameters {
            config: config.clone(),
            network,
            reach,
            M,
            R_min,
            D_quick,
            C_transport,
            C_handling,
            C_price,
            Q_procurement,
            Q_node,
            Q_route,
            D_max,
        }
    }
}
