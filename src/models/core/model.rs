use std::collections::HashMap;

use good_lp::{constraint, variable, Expression, ProblemVariables, Variable};
use itertools::iproduct;
use log::{debug, info, trace};

use crate::{
    config::EngineConfig,
    engine::EngineError,
    kpi::Kpi,
    models::{formulation::Formulation, utils::AddVars},
    network::TimeIndex,
    period::Horizon,
    problem::{
        CommodityIndex, FoodGroupIndex, GroupIndex, LegIndex, LocationIndex, NutrientIndex,
        Topology,
    },
    reachability::ReachabilityIndex,
};

use super::sets_and_parameters::{Pair, Parameters, Sets};

/// What a core model is built for. The horizon and forecast toggle must match exactly, while a
/// model built for a larger demand scale also serves smaller ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreKey {
    pub horizon: Horizon,
    pub forecast: bool,
    /// Largest demand scale the flow big-M accommodates, at least one
    pub demand_scale: f64,
}

impl CoreKey {
    pub fn new(horizon: Horizon, forecast: bool) -> CoreKey {
        CoreKey {
            horizon,
            forecast,
            demand_scale: 1.0,
        }
    }

    pub fn with_demand_scale(self, demand_scale: f64) -> CoreKey {
        CoreKey {
            demand_scale: demand_scale.max(1.0),
            ..self
        }
    }

    /// Whether a model built for `self` can serve a request for `other`
    pub fn covers(&self, other: &CoreKey) -> bool {
        self.horizon == other.horizon
            && self.forecast == other.forecast
            && self.demand_scale >= other.demand_scale
    }
}

pub struct Variables {
    /// Flow on each leg departing in each period, in tonnes
    pub f: HashMap<(LegIndex, TimeIndex), Variable>,
    /// Inventory carried at a hub, leaving the hub's stock in the period
    pub i: HashMap<(LocationIndex, CommodityIndex, TimeIndex), Variable>,
    /// Ration per person per day
    pub r: HashMap<(CommodityIndex, TimeIndex), Variable>,
    /// Whether the commodity is in the basket
    pub b: HashMap<(CommodityIndex, TimeIndex), Variable>,
    /// Whether the food group is represented in the basket
    pub g: HashMap<(FoodGroupIndex, TimeIndex), Variable>,
    /// Whether the consumption-score group is represented in the basket
    pub k: HashMap<(GroupIndex, TimeIndex), Variable>,
    /// Fraction of the requirement that is not met
    pub shortfall: HashMap<(NutrientIndex, TimeIndex), Variable>,
    /// Amount supplied beyond the requirement
    pub overshoot: HashMap<(NutrientIndex, TimeIndex), Variable>,
    pub has_shortfall: HashMap<(NutrientIndex, TimeIndex), Variable>,
    /// Whether the (source, delivery place) pair is used in the period
    pub u: HashMap<(LocationIndex, LocationIndex, TimeIndex), Variable>,
    /// Lead time realized in each period
    pub lead: Vec<Variable>,
    /// Maximum lead time over the horizon
    pub lead_max: Variable,
}

/// The variables and scenario-independent constraints of the planning model over one
/// horizon. Built once per `CoreKey` and cloned into every scenario solve.
pub struct CoreModel {
    pub key: CoreKey,
    /// Calendar position of each horizon period
    pub periods: Vec<usize>,
    pub problem: Formulation,
    pub vars: Variables,
    pub sets: Sets,
    pub parameters: Parameters,
}

#[allow(non_snake_case)]
impl CoreModel {
    pub fn build(
        topology: &Topology,
        config: &EngineConfig,
        key: CoreKey,
    ) -> Result<CoreModel, EngineError> {
        let CoreKey {
            horizon,
            forecast,
            demand_scale,
        } = key;
        info!("Building core model over {horizon} (forecast: {forecast}, demand scale: {demand_scale})");
        config.validate()?;
        let periods = horizon.resolve(topology.periods())?;
        let reach = ReachabilityIndex::build(topology);
        let mut sets = Sets::new(topology, &reach, periods.len());
        let parameters = Parameters::new(
            topology,
            config,
            &mut sets,
            reach,
            &periods,
            forecast,
            demand_scale,
        );

        let mut model = Formulation::new(&format!("core_{horizon}"));
        let vars = Self::variables(&mut model.variables, topology, &sets, &parameters);

        Self::pair_linkage(&mut model, &sets, &parameters, &vars);
        Self::lead_time(&mut model, &sets, &vars);
        Self::shortfall_exclusivity(&mut model, &sets, &parameters, &vars);
        Self::commodity_linkage(&mut model, &sets, &parameters, &vars);
        Self::group_linkage(&mut model, &sets, &vars);
        Self::procurement_capacity(&mut model, &sets, &parameters, &vars);
        Self::conservation(&mut model, topology, &sets, &parameters, &vars);
        Self::capacities(&mut model, topology, &sets, &parameters, &vars);

        let mut core = CoreModel {
            key,
            periods,
            problem: model,
            vars,
            sets,
            parameters,
        };
        let objective = {
            let kpi = Kpi::new(&core, topology);
            core.sets.T.iter().map(|&t| kpi.total_cost(t)).sum::<Expression>()
        };
        core.problem.objective = objective;

        info!("Core model built: {}", core.problem);
        Ok(core)
    }

    fn variables(
        model: &mut ProblemVariables,
        topology: &Topology,
        sets: &Sets,
        parameters: &Parameters,
    ) -> Variables {
        let T = &sets.T;
        // Supply legs of pairs that reach no delivery point can never carry flow
        let mut closed = Vec::new();
        for (pair, legs) in &sets.L_p {
            if !parameters.D_quick.contains_key(pair) {
                trace!("Pair {:?} is unreachable, closing {} legs", pair, legs.len());
                closed.extend(legs.iter().copied());
            }
        }
        let f = iproduct!(sets.L.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .vars_with(model, "f", |(l, _)| {
                let open = variable().min(0.0);
                if closed.contains(l) {
                    open.max(0.0)
                } else {
                    open
                }
            });
        let i = iproduct!(sets.H.iter().copied(), T.iter().copied())
            .map(|((n, c), t)| (n, c, t))
            .collect::<Vec<_>>()
            .cont(model, "i");
        let r = iproduct!(sets.C.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .vars(model, "r", &variable().min(0.0).max(parameters.M.ration));
        let b = iproduct!(sets.C.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .binary(model, "b");
        let g = iproduct!(sets.G.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .binary(model, "g");
        let k = iproduct!(sets.Q.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .binary(model, "k");
        let shortfall = iproduct!(sets.U.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .vars(model, "shortfall", &variable().min(0.0).max(1.0));
        let overshoot = iproduct!(sets.U.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .vars_with(model, "overshoot", |(n, _)| {
                variable().min(0.0).max(parameters.M.overshoot[*n])
            });
        let has_shortfall = iproduct!(sets.U.iter().copied(), T.iter().copied())
            .collect::<Vec<_>>()
            .binary(model, "has_shortfall");
        let u = iproduct!(sets.P.iter().copied(), T.iter().copied())
            .map(|((s, d), t)| (s, d, t))
            .collect::<Vec<_>>()
            .binary(model, "u");

        let lead_def = variable().min(0.0).max(parameters.D_max);
        let lead = T
            .iter()
            .map(|t| model.add(lead_def.clone().name(format!("lead_{t}"))))
            .collect();
        let lead_max = model.add(lead_def.name("lead_max"));

        debug!(
            "Declared {} flow, {} inventory and {} pair variables over {} locations",
            f.len(),
            i.len(),
            u.len(),
            topology.locations().len()
        );

        Variables {
            f,
            i,
            r,
            b,
            g,
            k,
            shortfall,
            overshoot,
            has_shortfall,
            u,
            lead,
            lead_max,
        }
    }

    /// A pair may only carry flow in periods where its indicator is set, and a set indicator
    /// pushes the period's lead time up to the pair's fastest delivery duration.
    fn pair_linkage(model: &mut Formulation, sets: &Sets, parameters: &Parameters, vars: &Variables) {
        for (&(s, d), &t) in iproduct!(&sets.P, &sets.T) {
            let pair: Pair = (s, d);
            let used = vars.u[&(s, d, t)];
            let flow: Expression = sets.L_p[&pair].iter().map(|l| vars.f[&(*l, t)]).sum();
            model.add_constr(
                &format!("pair_flow_{:?}", (s, d, t)),
                constraint!(flow <= parameters.M.flow * used),
            );
            let quick = parameters.D_quick[&pair];
            model.add_constr(
                &format!("pair_lead_{:?}", (s, d, t)),
                constraint!(vars.lead[t] >= quick * used),
            );
        }
    }

    fn lead_time(model: &mut Formulation, sets: &Sets, vars: &Variables) {
        for &t in &sets.T {
            model.add_constr(
                &format!("lead_max_{t}"),
                constraint!(vars.lead[t] <= vars.lead_max),
            );
        }
    }

    /// A nutrient cannot be both short and in excess in the same period
    fn shortfall_exclusivity(
        model: &mut Formulation,
        sets: &Sets,
        parameters: &Parameters,
        vars: &Variables,
    ) {
        for (&n, &t) in iproduct!(&sets.U, &sets.T) {
            let has = vars.has_shortfall[&(n, t)];
            model.add_constr(
                &format!("shortfall_ind_{:?}", (n, t)),
                constraint!(vars.shortfall[&(n, t)] <= has),
            );
            let m = parameters.M.overshoot[n];
            model.add_constr(
                &format!("overshoot_ind_{:?}", (n, t)),
                constraint!(vars.overshoot[&(n, t)] <= m - m * has),
            );
        }
    }

    /// The commodity indicator is one exactly when the ration is at least the minimum unit
    fn commodity_linkage(
        model: &mut Formulation,
        sets: &Sets,
        parameters: &Parameters,
        vars: &Variables,
    ) {
        for (&c, &t) in iproduct!(&sets.C, &sets.T) {
            let (r, b) = (vars.r[&(c, t)], vars.b[&(c, t)]);
            model.add_constr(
                &format!("ration_lb_{:?}", (c, t)),
                constraint!(r >= parameters.R_min[c] * b),
            );
            model.add_constr(
                &format!("ration_ub_{:?}", (c, t)),
                constraint!(r <= parameters.M.ration * b),
            );
        }
    }

    /// A group indicator is one exactly when one of its commodities is in the basket
    fn group_linkage(model: &mut Formulation, sets: &Sets, vars: &Variables) {
        for (&fg, &t) in iproduct!(&sets.G, &sets.T) {
            let g = vars.g[&(fg, t)];
            let name = format!("food_group_{:?}", (fg, t));
            Self::link_group(model, &name, g, &sets.C_g[fg], t, vars);
        }
        for (&q, &t) in iproduct!(&sets.Q, &sets.T) {
            let k = vars.k[&(q, t)];
            let name = format!("consumption_group_{:?}", (q, t));
            Self::link_group(model, &name, k, &sets.C_q[q], t, vars);
        }
    }

    fn link_group(
        model: &mut Formulation,
        name: &str,
        indicator: Variable,
        members: &[CommodityIndex],
        t: TimeIndex,
        vars: &Variables,
    ) {
        for &c in members {
            model.add_constr(
                &format!("{name}_lb_{c:?}"),
                constraint!(indicator >= vars.b[&(c, t)]),
            );
        }
        let any: Expression = members.iter().map(|c| vars.b[&(*c, t)]).sum();
        model.add_constr(&format!("{name}_ub"), constraint!(indicator <= any));
    }

    fn procurement_capacity(
        model: &mut Formulation,
        sets: &Sets,
        parameters: &Parameters,
        vars: &Variables,
    ) {
        for (&l, &t) in iproduct!(&sets.L_S, &sets.T) {
            if let Some(&cap) = parameters.Q_procurement.get(&(l, t)) {
                model.add_constr(
                    &format!("procurement_cap_{:?}", (l, t)),
                    constraint!(vars.f[&(l, t)] <= cap),
                );
            }
        }
    }

    /// Arrivals, carried inventory and opening stock leave a hub on its outbound legs or stay
    /// in its stock.
    fn conservation(
        model: &mut Formulation,
        topology: &Topology,
        sets: &Sets,
        parameters: &Parameters,
        vars: &Variables,
    ) {
        let network = &parameters.network;
        let delay = network.carry_delay();
        let legs = topology.legs();
        for (&(n, c), &t) in iproduct!(&sets.H, &sets.T) {
            let mut inflow: Expression = network
                .arrivals(n, c, t)
                .iter()
                .map(|(l, departure)| vars.f[&(*l, *departure)])
                .sum();
            if t >= delay {
                inflow += vars.i[&(n, c, t - delay)];
            }
            if t == 0 {
                inflow += topology.opening_stock(n, c);
            }

            let outflow = topology
                .legs_out(n)
                .iter()
                .filter(|l| legs[**l].commodity() == c)
                .map(|l| vars.f[&(*l, t)])
                .sum::<Expression>()
                + vars.i[&(n, c, t)];

            model.add_constr(
                &format!("conservation_{:?}", (n, c, t)),
                constraint!(inflow == outflow),
            );
        }
    }

    /// Per-leg, per-route and per-hub period ceilings
    fn capacities(
        model: &mut Formulation,
        topology: &Topology,
        sets: &Sets,
        parameters: &Parameters,
        vars: &Variables,
    ) {
        for (&l, &t) in iproduct!(&sets.L, &sets.T) {
            if let Some(cap) = topology.legs()[l].capacity() {
                model.add_constr(
                    &format!("leg_cap_{:?}", (l, t)),
                    constraint!(vars.f[&(l, t)] <= cap),
                );
            }
        }

        let mut routes: Vec<_> = parameters.Q_route.iter().collect();
        routes.sort_by_key(|(key, _)| **key);
        for ((pair, t), &cap) in routes {
            if let Some(legs) = sets.L_r.get(pair) {
                let flow: Expression = legs.iter().map(|l| vars.f[&(*l, *t)]).sum();
                model.add_constr(&format!("route_cap_{:?}", (pair, t)), constraint!(flow <= cap));
            }
        }

        let mut nodes: Vec<_> = parameters.Q_node.iter().collect();
        nodes.sort_by_key(|(key, _)| **key);
        for ((n, t), &cap) in nodes {
            let throughput = Self::throughput_of(topology, parameters, vars, *n, *t);
            model.add_constr(
                &format!("node_cap_{:?}", (n, t)),
                constraint!(throughput <= cap),
            );
        }
    }

    fn throughput_of(
        topology: &Topology,
        parameters: &Parameters,
        vars: &Variables,
        n: LocationIndex,
        t: TimeIndex,
    ) -> Expression {
        let network = &parameters.network;
        topology
            .commodities()
            .keys()
            .flat_map(|c| network.arrivals(n, c, t).iter())
            .map(|(l, departure)| vars.f[&(*l, *departure)])
            .sum()
    }

    /// Tonnes landing at a hub in the period, over every commodity
    pub fn throughput(&self, topology: &Topology, n: LocationIndex, t: TimeIndex) -> Expression {
        Self::throughput_of(topology, &self.parameters, &self.vars, n, t)
    }

    /// Tonnes delivered to a final delivery point in the period
    pub fn delivered(
        &self,
        fdp: LocationIndex,
        c: CommodityIndex,
        t: TimeIndex,
    ) -> Expression {
        self.parameters
            .network
            .deliveries(fdp, c)
            .iter()
            .map(|l| self.vars.f[&(*l, t)])
            .sum()
    }

    /// Number of horizon periods
    pub fn horizon_len(&self) -> usize {
        self.sets.T.len()
    }

    /// Whether the model can serve a scenario over the horizon with the given forecast toggle
    /// and demand scale
    pub fn matches(&self, horizon: Horizon, forecast: bool, demand_scale: f64) -> bool {
        let requested = CoreKey::new(horizon, forecast).with_demand_scale(demand_scale);
        self.key.covers(&requested)
    }

    /// A fresh copy of the core constraints and objective to add scenario constraints to
    pub fn instantiate(&self, name: &str) -> Formulation {
        Formulation {
            name: name.to_string(),
            ..self.problem.clone()
        }
    }
}
