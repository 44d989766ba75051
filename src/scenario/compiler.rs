use std::collections::HashMap;

use good_lp::{constraint, Constraint, Expression, Variable};
use itertools::iproduct;
use log::{debug, info, warn};

use crate::{
    kpi::Kpi,
    models::{core::CoreModel, formulation::Formulation},
    network::TimeIndex,
    period::Period,
    problem::{
        BeneficiaryIndex, CommodityIndex, LegIndex, LocationIndex, NutrientIndex, OptionIndex,
        Quantity, Topology, TopologyError,
    },
};

use super::{
    directive::{check_band, check_non_negative, check_shares},
    Directive, DirectiveError, Pattern, ScenarioContext,
};

/// Grams per tonne
const GRAMS_PER_TONNE: f64 = 1e6;

/// The full model of one scenario, ready for the solver
pub struct CompiledScenario {
    pub problem: Formulation,
    pub beneficiary: BeneficiaryIndex,
    /// Whether each horizon period is empty for the tracked beneficiary type
    pub empty: Vec<bool>,
    /// Directives that were skipped, with the reason
    pub errors: Vec<DirectiveError>,
}

/// A change to the model, staged until the whole directive has been resolved
enum Edit {
    Constr(String, Constraint),
    Ub(Variable, f64),
    Lb(Variable, f64),
}

struct Compiler<'a> {
    core: &'a CoreModel,
    topology: &'a Topology,
    kpi: Kpi<'a>,
    problem: Formulation,
    /// Bounds narrowed by the scenario, applied to the variables once compilation is done
    bounds: HashMap<Variable, (f64, f64)>,
    beneficiary: BeneficiaryIndex,
    empty: Vec<bool>,
}

/// Layers the scenario on a copy of the core model. Only an unknown tracked beneficiary type
/// is fatal; a directive that cannot be resolved is logged, recorded and skipped.
pub fn compile(
    core: &CoreModel,
    topology: &Topology,
    context: &ScenarioContext,
) -> Result<CompiledScenario, TopologyError> {
    let beneficiary = topology
        .find_beneficiary(&context.beneficiary)
        .ok_or_else(|| TopologyError::UnknownBeneficiary(context.beneficiary.clone()))?;
    let empty: Vec<bool> = core
        .periods
        .iter()
        .map(|p| topology.is_empty_period(beneficiary, *p))
        .collect();
    debug!("Empty periods of `{}`: {:?}", context.beneficiary, empty);

    let kpi = Kpi::new(core, topology)
        .with_price_multiplier(context.price_multiplier)
        .with_empty_periods(empty.clone());
    let mut compiler = Compiler {
        core,
        topology,
        kpi,
        problem: core.instantiate(&context.name),
        bounds: HashMap::new(),
        beneficiary,
        empty,
    };

    let mut errors = Vec::new();
    compiler.empty_periods();
    compiler.nutrition();
    if let Err(e) = compiler.demand(&context.supplementary, context.demand_scale) {
        warn!("Scenario `{}`: {e}", context.name);
        errors.push(e);
    }
    compiler.price_multiplier(context.price_multiplier);

    for (i, directive) in context.directives.iter().enumerate() {
        match compiler.resolve(directive) {
            Ok(edits) => compiler.commit(edits),
            Err(e) => {
                warn!(
                    "Scenario `{}`: skipping {} directive #{i}: {e}",
                    context.name,
                    directive.kind()
                );
                errors.push(e);
            }
        }
    }

    compiler.problem.tighten(&compiler.bounds);
    info!(
        "Compiled scenario `{}`: {} ({} directive errors, {} bounds narrowed)",
        context.name,
        compiler.problem,
        errors.len(),
        compiler.bounds.len()
    );
    Ok(CompiledScenario {
        problem: compiler.problem,
        beneficiary,
        empty: compiler.empty,
        errors,
    })
}

/// Resolves a pattern against a list of names. An exact pattern must name something that
/// exists; any pattern must match at least once.
fn resolve_names<K: Copy>(
    pattern: &Pattern,
    names: impl Iterator<Item = (K, String)>,
    kind: &'static str,
) -> Result<Vec<K>, DirectiveError> {
    let matched: Vec<K> = names
        .filter(|(_, name)| pattern.matches(name))
        .map(|(k, _)| k)
        .collect();
    match (matched.is_empty(), pattern.exact_name()) {
        (true, Some(name)) => Err(DirectiveError::Unknown {
            kind,
            name: name.to_string(),
        }),
        (true, None) => Err(DirectiveError::NoMatch(kind)),
        (false, _) => Ok(matched),
    }
}

impl<'a> Compiler<'a> {
    /// Horizon periods with tracked beneficiaries
    fn filled(&self) -> Vec<TimeIndex> {
        self.core
            .sets
            .T
            .iter()
            .copied()
            .filter(|t| !self.empty[*t])
            .collect()
    }

    fn commit(&mut self, edits: Vec<Edit>) {
        for edit in edits {
            match edit {
                Edit::Constr(name, c) => self.problem.add_constr(&name, c),
                Edit::Ub(var, ub) => self.set_ub(var, ub),
                Edit::Lb(var, lb) => self.set_lb(var, lb),
            }
        }
    }

    /// Bounds only ever narrow: the smallest upper and the largest lower bound win
    fn set_ub(&mut self, var: Variable, ub: f64) {
        let bounds = self.bounds.entry(var).or_insert((f64::NEG_INFINITY, f64::INFINITY));
        bounds.1 = bounds.1.min(ub);
    }

    fn set_lb(&mut self, var: Variable, lb: f64) {
        let bounds = self.bounds.entry(var).or_insert((f64::NEG_INFINITY, f64::INFINITY));
        bounds.0 = bounds.0.max(lb);
    }

    /// No ration, and so no tracked demand, in periods without tracked beneficiaries
    fn empty_periods(&mut self) {
        let core = self.core;
        let vars = &core.vars;
        let empty: Vec<TimeIndex> = core.sets.T.iter().copied().filter(|t| self.empty[*t]).collect();
        for t in empty {
            for c in &core.sets.C {
                self.set_ub(vars.r[&(*c, t)], 0.0);
            }
            for n in &core.sets.U {
                self.set_ub(vars.shortfall[&(*n, t)], 0.0);
                self.set_ub(vars.overshoot[&(*n, t)], 0.0);
                self.set_ub(vars.has_shortfall[&(*n, t)], 0.0);
            }
        }
    }

    /// `supplied + shortfall * requirement - overshoot = requirement` in every non-empty
    /// period. Hard nutrients may not fall short.
    fn nutrition(&mut self) {
        let vars = &self.core.vars;
        let core = self.core;
        let requirements = &self.topology.beneficiaries()[self.beneficiary];
        let filled = self.filled();
        for (&n, &t) in iproduct!(&core.sets.U, &filled) {
            let nutrient = &self.topology.nutrients()[n];
            let requirement = requirements.requirement(n);
            let supplied = self.supplied(n, t);
            let balance = supplied + requirement * vars.shortfall[&(n, t)] - vars.overshoot[&(n, t)];
            self.problem.add_constr(
                &format!("nutrition_{:?}", (n, t)),
                constraint!(balance == requirement),
            );
            if nutrient.hard() {
                self.set_ub(vars.shortfall[&(n, t)], 0.0);
            }
        }
    }

    /// Per-person daily supply of a nutrient
    fn supplied(&self, n: NutrientIndex, t: TimeIndex) -> Expression {
        let commodities = self.topology.commodities();
        self.core
            .sets
            .C
            .iter()
            .map(|c| (commodities[*c].content(n) / 100.0) * self.core.vars.r[&(*c, t)])
            .sum()
    }

    /// Deliveries to each final delivery point cover the tracked ration and the baskets of
    /// the supplementary activities. Nothing is delivered in an empty period.
    fn demand(&mut self, supplementary: &[String], scale: f64) -> Result<(), DirectiveError> {
        let topology = self.topology;
        let mut activities = Vec::new();
        let mut unknown = None;
        for name in supplementary {
            match topology.find_beneficiary(name) {
                Some(b) if b == self.beneficiary => {}
                Some(b) => activities.push(b),
                None => {
                    unknown = Some(DirectiveError::Unknown {
                        kind: "beneficiary type",
                        name: name.clone(),
                    })
                }
            }
        }

        let tracked = &topology.beneficiaries()[self.beneficiary];
        for (&fdp, &c, &t) in iproduct!(&self.core.sets.N_F, &self.core.sets.C, &self.core.sets.T) {
            let name = format!("demand_{:?}", (fdp, c, t));
            let delivered = self.core.delivered(fdp, c, t);
            if self.empty[t] {
                self.problem.add_constr(&name, constraint!(delivered == 0.0));
                continue;
            }

            let period = self.core.periods[t];
            let people = topology.demand(self.beneficiary, fdp, period) * scale;
            let per_gram = people * tracked.feeding_days() / GRAMS_PER_TONNE;
            let fixed: Quantity = topology
                .baskets()
                .iter()
                .filter(|basket| basket.commodity == c && activities.contains(&basket.beneficiary))
                .map(|basket| {
                    topology.demand(basket.beneficiary, fdp, period) * scale * basket.feeding_days
                        * basket.grams
                        / GRAMS_PER_TONNE
                })
                .sum();

            let required = per_gram * self.core.vars.r[&(c, t)] + fixed;
            self.problem.add_constr(&name, constraint!(delivered == required));
        }

        match unknown {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Moves the objective from base prices to scaled prices
    fn price_multiplier(&mut self, multiplier: f64) {
        if multiplier == 1.0 {
            return;
        }
        let markup = self.core.parameters.config.markup();
        let base = Kpi::new(self.core, self.topology);
        let extra = self
            .core
            .sets
            .T
            .iter()
            .map(|t| base.procurement_cost(None, *t))
            .sum::<Expression>()
            * ((multiplier - 1.0) * markup);
        self.problem.objective += extra;
    }

    fn resolve(&self, directive: &Directive) -> Result<Vec<Edit>, DirectiveError> {
        match directive {
            Directive::RationSize { commodity, min, max } => {
                self.ration_size(commodity, *min, *max)
            }
            Directive::CommodityTonnage { commodity, min, max } => {
                self.commodity_tonnage(commodity, *min, *max)
            }
            Directive::FoodGroup { group, include } => self.food_group(group, *include),
            Directive::Procurement {
                source,
                country,
                incoterm,
                delivery_place,
                commodity,
                include,
                quantity,
            } => {
                let options = self.match_options(source, country, incoterm, delivery_place, commodity)?;
                let legs = options
                    .iter()
                    .map(|o| self.topology.procurement()[*o].leg())
                    .collect();
                Ok(self.include_or_exclude("procurement", legs, *include, *quantity))
            }
            Directive::Routing {
                origin,
                destination,
                commodity,
                include,
                quantity,
            } => {
                let legs = self.match_legs(origin, destination, commodity)?;
                Ok(self.include_or_exclude("routing", legs, *include, *quantity))
            }
            Directive::TransferModality {
                nutrient,
                min_cash_share,
                max_cash_share,
            } => self.transfer_modality(nutrient.as_deref(), *min_cash_share, *max_cash_share),
            Directive::CapacityTarget {
                location,
                min_utilization,
                max_utilization,
                max_tonnage,
            } => self.capacity_target(location, *min_utilization, *max_utilization, *max_tonnage),
            Directive::NutrientShortfallCap {
                nutrient,
                max_shortfall,
            } => self.shortfall_cap(nutrient, *max_shortfall),
            Directive::StatisticBound {
                statistic,
                period,
                min,
                max,
            } => {
                check_band(*min, *max)?;
                let (expr, label) = match period {
                    Some(p) => (self.kpi.expr(statistic, self.horizon_offset(*p)?)?, p.to_string()),
                    None => (self.kpi.horizon_expr(statistic)?, "horizon".to_string()),
                };
                Ok(self.band(&format!("stat_{}_{label}", statistic.name()), expr, *min, *max))
            }
            Directive::Gmo { allow } => Ok(self.gmo(*allow)),
            Directive::InKindFloor {
                min_tonnage,
                min_share,
            } => self.in_kind_floor(*min_tonnage, *min_share),
        }
    }

    fn horizon_offset(&self, period: Period) -> Result<TimeIndex, DirectiveError> {
        let calendar = self.topology.periods();
        self.core
            .periods
            .iter()
            .position(|p| calendar[*p] == period)
            .ok_or(DirectiveError::UnknownPeriod(period))
    }

    /// `min <= expr <= max` for whichever sides are given
    fn band(&self, name: &str, expr: Expression, min: Option<f64>, max: Option<f64>) -> Vec<Edit> {
        let mut edits = Vec::new();
        if let Some(min) = min {
            edits.push(Edit::Constr(format!("{name}_min"), constraint!(expr.clone() >= min)));
        }
        if let Some(max) = max {
            edits.push(Edit::Constr(format!("{name}_max"), constraint!(expr <= max)));
        }
        edits
    }

    fn commodities(&self, pattern: &Pattern) -> Result<Vec<CommodityIndex>, DirectiveError> {
        resolve_names(
            pattern,
            self.topology
                .commodities()
                .iter_enumerated()
                .map(|(c, commodity)| (c, commodity.name().to_string())),
            "commodity",
        )
    }

    fn ration_size(
        &self,
        pattern: &Pattern,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Vec<Edit>, DirectiveError> {
        check_band(min, max)?;
        check_non_negative(min, "ration")?;
        let commodities = self.commodities(pattern)?;
        let mut edits = Vec::new();
        for (c, t) in iproduct!(commodities, self.filled()) {
            let r = self.core.vars.r[&(c, t)];
            edits.extend(min.map(|m| Edit::Lb(r, m)));
            edits.extend(max.map(|m| Edit::Ub(r, m)));
        }
        Ok(edits)
    }

    fn commodity_tonnage(
        &self,
        pattern: &Pattern,
        min: Option<Quantity>,
        max: Option<Quantity>,
    ) -> Result<Vec<Edit>, DirectiveError> {
        check_band(min, max)?;
        let commodities = self.commodities(pattern)?;
        let legs = self.topology.legs();
        let procured: Expression = iproduct!(&self.core.sets.L_S, &self.core.sets.T)
            .filter(|(l, _)| commodities.contains(&legs[**l].commodity()))
            .map(|(l, t)| self.core.vars.f[&(*l, *t)])
            .sum();
        Ok(self.band(&format!("tonnage_{pattern:?}"), procured, min, max))
    }

    fn food_group(&self, pattern: &Pattern, include: bool) -> Result<Vec<Edit>, DirectiveError> {
        let groups = resolve_names(
            pattern,
            self.topology
                .food_groups()
                .iter_enumerated()
                .map(|(g, name)| (g, name.clone())),
            "food group",
        )?;
        let vars = &self.core.vars;
        Ok(if include {
            iproduct!(groups, self.filled())
                .map(|key| Edit::Lb(vars.g[&key], 1.0))
                .collect()
        } else {
            iproduct!(groups, self.core.sets.T.iter().copied())
                .map(|key| Edit::Ub(vars.g[&key], 0.0))
                .collect()
        })
    }

    fn match_options(
        &self,
        source: &Pattern,
        country: &Pattern,
        incoterm: &Pattern,
        delivery_place: &Pattern,
        commodity: &Pattern,
    ) -> Result<Vec<OptionIndex>, DirectiveError> {
        let locations = self.topology.locations();
        let commodities = self.topology.commodities();
        for (pattern, kind) in [(source, "source"), (delivery_place, "delivery place")] {
            if let Some(name) = pattern.exact_name() {
                if self.topology.find_location(name).is_none() {
                    return Err(DirectiveError::Unknown {
                        kind,
                        name: name.to_string(),
                    });
                }
            }
        }
        if let Some(name) = commodity.exact_name() {
            if self.topology.find_commodity(name).is_none() {
                return Err(DirectiveError::Unknown {
                    kind: "commodity",
                    name: name.to_string(),
                });
            }
        }

        let matched: Vec<OptionIndex> = self
            .topology
            .procurement()
            .iter_enumerated()
            .filter(|(_, o)| {
                let src = &locations[o.source()];
                source.matches(src.name())
                    && country.matches(src.country())
                    && incoterm.matches(o.incoterm())
                    && delivery_place.matches(locations[o.delivery_place()].name())
                    && commodity.matches(commodities[o.commodity()].name())
            })
            .map(|(o, _)| o)
            .collect();
        if matched.is_empty() {
            return Err(DirectiveError::NoMatch("procurement option"));
        }
        Ok(matched)
    }

    fn match_legs(
        &self,
        origin: &Pattern,
        destination: &Pattern,
        commodity: &Pattern,
    ) -> Result<Vec<LegIndex>, DirectiveError> {
        let locations = self.topology.locations();
        let commodities = self.topology.commodities();
        for (pattern, kind) in [(origin, "origin"), (destination, "destination")] {
            if let Some(name) = pattern.exact_name() {
                if self.topology.find_location(name).is_none() {
                    return Err(DirectiveError::Unknown {
                        kind,
                        name: name.to_string(),
                    });
                }
            }
        }
        let matched: Vec<LegIndex> = self
            .topology
            .legs()
            .iter_enumerated()
            .filter(|(_, leg)| {
                origin.matches(locations[leg.origin()].name())
                    && destination.matches(locations[leg.destination()].name())
                    && commodity.matches(commodities[leg.commodity()].name())
            })
            .map(|(l, _)| l)
            .collect();
        if matched.is_empty() {
            return Err(DirectiveError::NoMatch("leg"));
        }
        Ok(matched)
    }

    /// Exclusion closes the legs in every period; inclusion requires a minimum tonnage on them
    /// over the horizon.
    fn include_or_exclude(
        &self,
        name: &str,
        legs: Vec<LegIndex>,
        include: bool,
        quantity: Option<Quantity>,
    ) -> Vec<Edit> {
        let flows = iproduct!(legs, self.core.sets.T.iter().copied()).map(|key| self.core.vars.f[&key]);
        if include {
            let minimum = quantity.unwrap_or(self.core.parameters.config.include_min_quantity);
            let total: Expression = flows.sum();
            vec![Edit::Constr(
                format!("include_{name}_{}", self.problem.num_constrs()),
                constraint!(total >= minimum),
            )]
        } else {
            flows.map(|f| Edit::Ub(f, 0.0)).collect()
        }
    }

    fn nutrient(&self, name: Option<&str>) -> Result<NutrientIndex, DirectiveError> {
        match name {
            Some(name) => self.topology.find_nutrient(name).ok_or_else(|| DirectiveError::Unknown {
                kind: "nutrient",
                name: name.to_string(),
            }),
            None => self
                .topology
                .nutrients()
                .keys()
                .next()
                .ok_or(DirectiveError::NoMatch("nutrient")),
        }
    }

    /// The cash share of a nutrient's requirement, in every non-empty period
    fn transfer_modality(
        &self,
        nutrient: Option<&str>,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Vec<Edit>, DirectiveError> {
        check_band(min, max)?;
        check_shares(&[min, max])?;
        let n = self.nutrient(nutrient)?;
        let commodities = self.topology.commodities();
        let cash: Vec<CommodityIndex> = self
            .core
            .sets
            .C
            .iter()
            .copied()
            .filter(|c| commodities[*c].cash())
            .collect();
        if cash.is_empty() {
            return Err(DirectiveError::NoMatch("cash commodity"));
        }

        let requirement = self.topology.beneficiaries()[self.beneficiary].requirement(n);
        let mut edits = Vec::new();
        for t in self.filled() {
            let supplied: Expression = cash
                .iter()
                .map(|c| (commodities[*c].content(n) / 100.0) * self.core.vars.r[&(*c, t)])
                .sum();
            edits.extend(self.band(
                &format!("cash_share_{t}"),
                supplied,
                min.map(|s| s * requirement),
                max.map(|s| s * requirement),
            ));
        }
        Ok(edits)
    }

    fn capacity_target(
        &self,
        pattern: &Pattern,
        min: Option<f64>,
        max: Option<f64>,
        max_tonnage: Option<Quantity>,
    ) -> Result<Vec<Edit>, DirectiveError> {
        if min.is_none() && max.is_none() && max_tonnage.is_none() {
            return Err(DirectiveError::InvalidBound("no bound given".into()));
        }
        if min.is_some() || max.is_some() {
            check_band(min, max)?;
        }
        check_shares(&[min, max])?;
        let locations = self.topology.locations();
        let hubs: Vec<LocationIndex> = resolve_names(
            pattern,
            self.core
                .sets
                .N_H
                .iter()
                .map(|n| (*n, locations[*n].name().to_string())),
            "hub",
        )?;

        let mut edits = Vec::new();
        for (n, t) in iproduct!(hubs, self.core.sets.T.iter().copied()) {
            let throughput = self.core.throughput(self.topology, n, t);
            let name = format!("capacity_target_{:?}", (n, t));
            if let Some(&cap) = self.core.parameters.Q_node.get(&(n, t)) {
                edits.extend(self.band(
                    &name,
                    throughput.clone(),
                    min.map(|s| s * cap),
                    max.map(|s| s * cap),
                ));
            }
            if let Some(tonnes) = max_tonnage {
                edits.push(Edit::Constr(
                    format!("{name}_tonnage"),
                    constraint!(throughput <= tonnes),
                ));
            }
        }
        Ok(edits)
    }

    fn shortfall_cap(&self, pattern: &Pattern, cap: f64) -> Result<Vec<Edit>, DirectiveError> {
        check_shares(&[Some(cap)])?;
        let nutrients = resolve_names(
            pattern,
            self.topology
                .nutrients()
                .iter_enumerated()
                .map(|(n, nutrient)| (n, nutrient.name().to_string())),
            "nutrient",
        )?;
        // Bounds only narrow, so hard nutrients stay at zero
        Ok(iproduct!(nutrients, self.filled())
            .map(|key| Edit::Ub(self.core.vars.shortfall[&key], cap))
            .collect())
    }

    fn gmo(&self, allow: bool) -> Vec<Edit> {
        if allow {
            return Vec::new();
        }
        let gmo = self.topology.procurement().iter().filter(|o| o.gmo());
        iproduct!(gmo, self.core.sets.T.iter().copied())
            .map(|(o, t)| Edit::Ub(self.core.vars.f[&(o.leg(), t)], 0.0))
            .collect()
    }

    fn in_kind_floor(
        &self,
        min_tonnage: Option<Quantity>,
        min_share: Option<f64>,
    ) -> Result<Vec<Edit>, DirectiveError> {
        if min_tonnage.is_none() && min_share.is_none() {
            return Err(DirectiveError::InvalidBound("no bound given".into()));
        }
        check_non_negative(min_tonnage, "in-kind tonnage")?;
        check_shares(&[min_share])?;
        let options = self.topology.procurement();
        if !options.iter().any(|o| o.in_kind()) {
            return Err(DirectiveError::NoMatch("in-kind procurement option"));
        }

        let flows = |in_kind_only: bool| {
            iproduct!(options.iter(), self.core.sets.T.iter().copied())
                .filter(move |(o, _)| !in_kind_only || o.in_kind())
                .map(|(o, t)| self.core.vars.f[&(o.leg(), t)])
                .sum::<Expression>()
        };

        let mut edits = Vec::new();
        if let Some(tonnes) = min_tonnage {
            edits.push(Edit::Constr("in_kind_tonnage".into(), constraint!(flows(true) >= tonnes)));
        }
        if let Some(share) = min_share {
            let floor = flows(true) - flows(false) * share;
            edits.push(Edit::Constr("in_kind_share".into(), constraint!(floor >= 0.0)));
        }
        Ok(edits)
    }
}
