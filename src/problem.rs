use std::collections::{BTreeMap, HashMap};

use derive_more::{Deref, Display, From, Into};
use log::debug;
use serde::{Deserialize, Serialize};
use typed_index_collections::TiVec;

use crate::period::Period;

/// The type used for quantities, in metric tonnes
pub type Quantity = f64;
/// The type used for cost, in currency units
pub type Cost = f64;
/// The type used for durations, in days
pub type Days = f64;

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct LocationIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct CommodityIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct NutrientIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct LegIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct OptionIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct FoodGroupIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct GroupIndex(usize);

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash)]
pub struct BeneficiaryIndex(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    InternationalSupplier,
    RegionalSupplier,
    LocalSupplier,
    CashVoucherMarket,
    DischargePort,
    ExtendedDeliveryPoint,
    FinalDeliveryPoint,
}

impl LocationKind {
    /// Suppliers and markets are pure sources of the network
    pub fn is_source(&self) -> bool {
        self.channel().is_some()
    }

    /// Ports and extended delivery points hold inventory and conserve flow
    pub fn is_hub(&self) -> bool {
        matches!(
            self,
            LocationKind::DischargePort | LocationKind::ExtendedDeliveryPoint
        )
    }

    pub fn channel(&self) -> Option<Channel> {
        match self {
            LocationKind::InternationalSupplier => Some(Channel::International),
            LocationKind::RegionalSupplier => Some(Channel::Regional),
            LocationKind::LocalSupplier => Some(Channel::Local),
            LocationKind::CashVoucherMarket => Some(Channel::CashVoucher),
            _ => None,
        }
    }
}

/// The sourcing channel of a procurement
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    International,
    Regional,
    Local,
    CashVoucher,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::International,
        Channel::Regional,
        Channel::Local,
        Channel::CashVoucher,
    ];
}

/// The transport mode of a leg, determined by the kind of its destination
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegMode {
    Ocean,
    Overland,
    Inland,
}

impl LegMode {
    pub const ALL: [LegMode; 3] = [LegMode::Ocean, LegMode::Overland, LegMode::Inland];

    fn of(destination: LocationKind) -> LegMode {
        match destination {
            LocationKind::DischargePort => LegMode::Ocean,
            LocationKind::FinalDeliveryPoint => LegMode::Inland,
            _ => LegMode::Overland,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Nutrient {
    name: String,
    hard: bool,
}

impl Nutrient {
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Whether a shortfall of this nutrient is never tolerated in a non-empty period
    pub fn hard(&self) -> bool {
        self.hard
    }
}

#[derive(Debug, Clone)]
pub struct Commodity {
    name: String,
    /// Nutrient content per 100g, indexed by nutrient
    nutrients: TiVec<NutrientIndex, f64>,
    super_commodity: String,
    food_group: FoodGroupIndex,
    consumption_group: Option<GroupIndex>,
    cash: bool,
}

impl Commodity {
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Nutrient content per 100g
    pub fn content(&self, nutrient: NutrientIndex) -> f64 {
        self.nutrients[nutrient]
    }
    pub fn super_commodity(&self) -> &str {
        &self.super_commodity
    }
    pub fn food_group(&self) -> FoodGroupIndex {
        self.food_group
    }
    pub fn consumption_group(&self) -> Option<GroupIndex> {
        self.consumption_group
    }
    /// The cash pseudo-commodity distributed through cash-and-voucher markets
    pub fn cash(&self) -> bool {
        self.cash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionGroup {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct Location {
    name: String,
    kind: LocationKind,
    country: String,
    processing_days: Days,
    handling_cost: Cost,
    storage_cost: Cost,
    /// Throughput capacity per period position. Missing entries are uncapacitated.
    capacity: HashMap<usize, Quantity>,
}

impl Location {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> LocationKind {
        self.kind
    }
    pub fn country(&self) -> &str {
        &self.country
    }
    /// Processing time spent at the location before goods can move on
    pub fn processing_days(&self) -> Days {
        self.processing_days
    }
    /// Cost per tonne handled at the location
    pub fn handling_cost(&self) -> Cost {
        self.handling_cost
    }
    /// Cost per tonne stored for one period
    pub fn storage_cost(&self) -> Cost {
        self.storage_cost
    }
    /// Throughput capacity in the period at the given calendar position
    pub fn capacity(&self, period: usize) -> Option<Quantity> {
        self.capacity.get(&period).copied()
    }
}

/// A static (origin, destination, commodity) arc
#[derive(Debug, Clone)]
pub struct Leg {
    origin: LocationIndex,
    destination: LocationIndex,
    commodity: CommodityIndex,
    cost: Cost,
    duration: Days,
    capacity: Option<Quantity>,
    mode: LegMode,
}

impl Leg {
    pub fn origin(&self) -> LocationIndex {
        self.origin
    }
    pub fn destination(&self) -> LocationIndex {
        self.destination
    }
    pub fn commodity(&self) -> CommodityIndex {
        self.commodity
    }
    /// Transport cost per tonne
    pub fn cost(&self) -> Cost {
        self.cost
    }
    /// Nominal duration, transit and processing included
    pub fn duration(&self) -> Days {
        self.duration
    }
    /// Per-period capacity of this leg
    pub fn capacity(&self) -> Option<Quantity> {
        self.capacity
    }
    pub fn mode(&self) -> LegMode {
        self.mode
    }
}

/// A capacity shared by every commodity travelling between two locations
#[derive(Debug, Clone)]
pub struct RouteCapacity {
    pub origin: LocationIndex,
    pub destination: LocationIndex,
    pub capacity: HashMap<usize, Quantity>,
}

#[derive(Debug, Clone)]
pub struct ProcurementOption {
    source: LocationIndex,
    delivery_place: LocationIndex,
    commodity: CommodityIndex,
    leg: LegIndex,
    price: Cost,
    capacity: Option<Quantity>,
    seasonal_capacity: Option<Vec<Quantity>>,
    gmo: bool,
    in_kind: bool,
    incoterm: String,
    as_of: Option<Period>,
}

impl ProcurementOption {
    pub fn source(&self) -> LocationIndex {
        self.source
    }
    pub fn delivery_place(&self) -> LocationIndex {
        self.delivery_place
    }
    pub fn commodity(&self) -> CommodityIndex {
        self.commodity
    }
    /// The leg carrying procured goods from the source to the delivery place
    pub fn leg(&self) -> LegIndex {
        self.leg
    }
    /// Price per tonne, as recorded at `as_of`
    pub fn price(&self) -> Cost {
        self.price
    }
    pub fn gmo(&self) -> bool {
        self.gmo
    }
    /// In-kind donations count towards donation floors
    pub fn in_kind(&self) -> bool {
        self.in_kind
    }
    pub fn incoterm(&self) -> &str {
        &self.incoterm
    }
    pub fn as_of(&self) -> Option<Period> {
        self.as_of
    }

    /// The capacity in the given period: the tighter of the flat capacity and the seasonal profile.
    pub fn capacity_in(&self, period: Period) -> Option<Quantity> {
        let seasonal = self
            .seasonal_capacity
            .as_ref()
            .map(|profile| profile[(period.month() - 1) as usize]);
        match (self.capacity, seasonal) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BeneficiaryType {
    name: String,
    requirements: TiVec<NutrientIndex, f64>,
    feeding_days: Days,
}

impl BeneficiaryType {
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Requirement per person per day
    pub fn requirement(&self, nutrient: NutrientIndex) -> f64 {
        self.requirements[nutrient]
    }
    /// Number of feeding days per period
    pub fn feeding_days(&self) -> Days {
        self.feeding_days
    }
}

/// The ration a supplementary activity distributes on top of the optimized one
#[derive(Debug, Clone)]
pub struct Basket {
    pub beneficiary: BeneficiaryIndex,
    pub commodity: CommodityIndex,
    pub grams: f64,
    pub feeding_days: Days,
}

#[derive(Debug, Display, Clone, PartialEq)]
pub enum TopologyError {
    /// There must be at least one period
    #[display(fmt = "the planning calendar is empty")]
    NoPeriods,
    #[display(fmt = "duplicate name `{}`", _0)]
    DuplicateName(String),
    #[display(fmt = "unknown location `{}`", _0)]
    UnknownLocation(String),
    #[display(fmt = "unknown commodity `{}`", _0)]
    UnknownCommodity(String),
    #[display(fmt = "unknown beneficiary type `{}`", _0)]
    UnknownBeneficiary(String),
    #[display(fmt = "unknown consumption group `{}`", _0)]
    UnknownConsumptionGroup(String),
    #[display(fmt = "period {} is not part of the planning calendar", _0)]
    UnknownPeriod(Period),
    /// A nutrient vector does not have one entry per nutrient
    #[display(fmt = "`{}` has {} nutrient values, expected {}", name, actual, expected)]
    NutrientLengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    /// A seasonal capacity profile must have one entry per calendar month
    #[display(fmt = "seasonal capacity of `{}` must have 12 entries", _0)]
    BadSeasonalProfile(String),
    /// Legs never end at a supplier or market
    #[display(fmt = "leg {} -> {} ends at a source", _0, _1)]
    SourceAsDestination(String, String),
    /// A procurement option without a leg from its source to its delivery place
    #[display(fmt = "procurement of `{}` from {} to {} has no leg", _2, _0, _1)]
    OrphanedProcurement(String, String, String),
    /// A leg leaving a source without a procurement option pricing it
    #[display(fmt = "leg {} -> {} for `{}` has no procurement option", _0, _1, _2)]
    UnpricedSupplyLeg(String, String, String),
    #[display(fmt = "negative capacity or cost on `{}`", _0)]
    Negative(String),
    /// Beneficiaries are only counted where food is distributed
    #[display(fmt = "demand at `{}`, which is not a final delivery point", _0)]
    DemandOutsideDeliveryPoint(String),
}

impl std::error::Error for TopologyError {}

/// The ingestion schema. Entities reference each other by name; `Topology::new` resolves
/// the names into indices and cross-checks them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyData {
    pub periods: Vec<Period>,
    pub nutrients: Vec<NutrientData>,
    pub commodities: Vec<CommodityData>,
    #[serde(default)]
    pub consumption_groups: Vec<ConsumptionGroup>,
    pub locations: Vec<LocationData>,
    pub legs: Vec<LegData>,
    #[serde(default)]
    pub route_capacities: Vec<RouteCapacityData>,
    pub procurement: Vec<ProcurementData>,
    pub beneficiaries: Vec<BeneficiaryData>,
    pub demand: Vec<DemandData>,
    #[serde(default)]
    pub baskets: Vec<BasketData>,
    #[serde(default)]
    pub seasonality: Vec<SeasonalityData>,
    #[serde(default)]
    pub stock: Vec<StockData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutrientData {
    pub name: String,
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommodityData {
    pub name: String,
    pub nutrients: Vec<f64>,
    #[serde(default)]
    pub super_commodity: String,
    pub food_group: String,
    #[serde(default)]
    pub consumption_group: Option<String>,
    #[serde(default)]
    pub cash: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationData {
    pub name: String,
    pub kind: LocationKind,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub processing_days: Days,
    #[serde(default)]
    pub handling_cost: Cost,
    #[serde(default)]
    pub storage_cost: Cost,
    #[serde(default)]
    pub capacity: BTreeMap<Period, Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegData {
    pub origin: String,
    pub destination: String,
    pub commodity: String,
    pub cost: Cost,
    pub duration_days: Days,
    #[serde(default)]
    pub capacity: Option<Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCapacityData {
    pub origin: String,
    pub destination: String,
    pub capacity: BTreeMap<Period, Quantity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcurementData {
    pub source: String,
    pub delivery_place: String,
    pub commodity: String,
    pub price: Cost,
    #[serde(default)]
    pub capacity: Option<Quantity>,
    #[serde(default)]
    pub seasonal_capacity: Option<Vec<Quantity>>,
    #[serde(default)]
    pub gmo: bool,
    #[serde(default)]
    pub in_kind: bool,
    #[serde(default)]
    pub incoterm: String,
    #[serde(default)]
    pub as_of: Option<Period>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeneficiaryData {
    pub name: String,
    pub requirements: Vec<f64>,
    pub feeding_days: Days,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandData {
    pub beneficiary: String,
    pub location: String,
    pub period: Period,
    pub count: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasketData {
    pub beneficiary: String,
    pub commodity: String,
    pub grams: f64,
    pub feeding_days: Days,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalityData {
    pub commodity: String,
    pub country: String,
    /// Month of the year, 1-based
    pub month: u32,
    pub index: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockData {
    pub location: String,
    pub commodity: String,
    pub quantity: Quantity,
}

/// The validated, cross-referenced supply network. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Topology {
    periods: Vec<Period>,
    nutrients: TiVec<NutrientIndex, Nutrient>,
    commodities: TiVec<CommodityIndex, Commodity>,
    food_groups: TiVec<FoodGroupIndex, String>,
    consumption_groups: TiVec<GroupIndex, ConsumptionGroup>,
    locations: TiVec<LocationIndex, Location>,
    legs: TiVec<LegIndex, Leg>,
    route_capacities: Vec<RouteCapacity>,
    procurement: TiVec<OptionIndex, ProcurementOption>,
    beneficiaries: TiVec<BeneficiaryIndex, BeneficiaryType>,
    /// Beneficiary count per (type, final delivery point, period position)
    demand: HashMap<(BeneficiaryIndex, LocationIndex, usize), f64>,
    baskets: Vec<Basket>,
    /// Seasonal price index per (commodity, country, month of year)
    seasonality: HashMap<(CommodityIndex, String, u32), f64>,
    stock: HashMap<(LocationIndex, CommodityIndex), Quantity>,
    legs_out: TiVec<LocationIndex, Vec<LegIndex>>,
    legs_in: TiVec<LocationIndex, Vec<LegIndex>>,
    option_of_leg: HashMap<LegIndex, OptionIndex>,
}

fn index_names<'a, K: From<usize> + Copy>(
    names: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, K>, TopologyError> {
    let mut map = HashMap::new();
    for (i, name) in names.enumerate() {
        if map.insert(name.to_string(), K::from(i)).is_some() {
            return Err(TopologyError::DuplicateName(name.to_string()));
        }
    }
    Ok(map)
}

impl Topology {
    pub fn new(data: TopologyData) -> Result<Topology, TopologyError> {
        use TopologyError::*;

        if data.periods.is_empty() {
            return Err(NoPeriods);
        }
        let mut periods = data.periods;
        periods.sort();
        periods.dedup();
        let period_pos: HashMap<Period, usize> =
            periods.iter().enumerate().map(|(i, p)| (*p, i)).collect();
        let period_of = |p: &Period| period_pos.get(p).copied().ok_or(UnknownPeriod(*p));
        let capacity_map = |name: &str, caps: &BTreeMap<Period, Quantity>| {
            caps.iter()
                .map(|(p, c)| {
                    if *c < 0.0 {
                        return Err(Negative(name.to_string()));
                    }
                    Ok((period_of(p)?, *c))
                })
                .collect::<Result<HashMap<usize, Quantity>, TopologyError>>()
        };

        let n = data.nutrients.len();
        let nutrients: TiVec<NutrientIndex, Nutrient> = data
            .nutrients
            .iter()
            .map(|d| Nutrient {
                name: d.name.clone(),
                hard: d.hard,
            })
            .collect();

        let group_ids: HashMap<String, GroupIndex> =
            index_names(data.consumption_groups.iter().map(|g| g.name.as_str()))?;

        let mut food_groups: TiVec<FoodGroupIndex, String> = TiVec::new();
        let mut commodities: TiVec<CommodityIndex, Commodity> = TiVec::new();
        for d in &data.commodities {
            if d.nutrients.len() != n {
                return Err(NutrientLengthMismatch {
                    name: d.name.clone(),
                    expected: n,
                    actual: d.nutrients.len(),
                });
            }
            let food_group = match food_groups.iter().position(|g| *g == d.food_group) {
                Some(i) => FoodGroupIndex::from(i),
                None => food_groups.push_and_get_key(d.food_group.clone()),
            };
            let consumption_group = match &d.consumption_group {
                Some(name) => Some(
                    *group_ids
                        .get(name)
                        .ok_or_else(|| UnknownConsumptionGroup(name.clone()))?,
                ),
                None => None,
            };
            commodities.push(Commodity {
                name: d.name.clone(),
                nutrients: d.nutrients.clone().into(),
                super_commodity: d.super_commodity.clone(),
                food_group,
                consumption_group,
                cash: d.cash,
            });
        }
        let commodity_ids: HashMap<String, CommodityIndex> =
            index_names(commodities.iter().map(|c| c.name()))?;
        let commodity_of = |name: &str| {
            commodity_ids
                .get(name)
                .copied()
                .ok_or_else(|| UnknownCommodity(name.to_string()))
        };

        let mut locations: TiVec<LocationIndex, Location> = TiVec::new();
        for d in &data.locations {
            if d.handling_cost < 0.0 || d.storage_cost < 0.0 || d.processing_days < 0.0 {
                return Err(Negative(d.name.clone()));
            }
            locations.push(Location {
                name: d.name.clone(),
                kind: d.kind,
                country: d.country.clone(),
                processing_days: d.processing_days,
                handling_cost: d.handling_cost,
                storage_cost: d.storage_cost,
                capacity: capacity_map(&d.name, &d.capacity)?,
            });
        }
        let location_ids: HashMap<String, LocationIndex> =
            index_names(locations.iter().map(|l| l.name()))?;
        let location_of = |name: &str| {
            location_ids
                .get(name)
                .copied()
                .ok_or_else(|| UnknownLocation(name.to_string()))
        };

        let mut legs: TiVec<LegIndex, Leg> = TiVec::new();
        let mut leg_lookup = HashMap::new();
        for d in &data.legs {
            let origin = location_of(&d.origin)?;
            let destination = location_of(&d.destination)?;
            let commodity = commodity_of(&d.commodity)?;
            let kind = locations[destination].kind();
            if kind.is_source() {
                return Err(SourceAsDestination(d.origin.clone(), d.destination.clone()));
            }
            if d.cost < 0.0 || d.duration_days < 0.0 || d.capacity.map_or(false, |c| c < 0.0) {
                return Err(Negative(format!("{} -> {}", d.origin, d.destination)));
            }
            let leg = legs.push_and_get_key(Leg {
                origin,
                destination,
                commodity,
                cost: d.cost,
                duration: d.duration_days,
                capacity: d.capacity,
                mode: LegMode::of(kind),
            });
            if leg_lookup
                .insert((origin, destination, commodity), leg)
                .is_some()
            {
                return Err(DuplicateName(format!(
                    "{} -> {} ({})",
                    d.origin, d.destination, d.commodity
                )));
            }
        }

        let mut procurement: TiVec<OptionIndex, ProcurementOption> = TiVec::new();
        let mut option_of_leg = HashMap::new();
        for d in &data.procurement {
            let source = location_of(&d.source)?;
            let delivery_place = location_of(&d.delivery_place)?;
            let commodity = commodity_of(&d.commodity)?;
            let leg = *leg_lookup
                .get(&(source, delivery_place, commodity))
                .ok_or_else(|| {
                    OrphanedProcurement(
                        d.source.clone(),
                        d.delivery_place.clone(),
                        d.commodity.clone(),
                    )
                })?;
            if let Some(profile) = &d.seasonal_capacity {
                if profile.len() != 12 {
                    return Err(BadSeasonalProfile(d.source.clone()));
                }
            }
            if d.price < 0.0 || d.capacity.map_or(false, |c| c < 0.0) {
                return Err(Negative(d.source.clone()));
            }
            let option = procurement.push_and_get_key(ProcurementOption {
                source,
                delivery_place,
                commodity,
                leg,
                price: d.price,
                capacity: d.capacity,
                seasonal_capacity: d.seasonal_capacity.clone(),
                gmo: d.gmo,
                in_kind: d.in_kind,
                incoterm: d.incoterm.clone(),
                as_of: d.as_of,
            });
            if option_of_leg.insert(leg, option).is_some() {
                return Err(DuplicateName(format!(
                    "procurement {} -> {} ({})",
                    d.source, d.delivery_place, d.commodity
                )));
            }
        }

        // Every leg leaving a source must be priced by exactly one procurement option
        for (l, leg) in legs.iter_enumerated() {
            if locations[leg.origin].kind().is_source() && !option_of_leg.contains_key(&l) {
                return Err(UnpricedSupplyLeg(
                    locations[leg.origin].name.clone(),
                    locations[leg.destination].name.clone(),
                    commodities[leg.commodity].name.clone(),
                ));
            }
        }

        let route_capacities = data
            .route_capacities
            .iter()
            .map(|d| {
                Ok(RouteCapacity {
                    origin: location_of(&d.origin)?,
                    destination: location_of(&d.destination)?,
                    capacity: capacity_map(&d.origin, &d.capacity)?,
                })
            })
            .collect::<Result<Vec<_>, TopologyError>>()?;

        let mut beneficiaries: TiVec<BeneficiaryIndex, BeneficiaryType> = TiVec::new();
        for d in &data.beneficiaries {
            if d.requirements.len() != n {
                return Err(NutrientLengthMismatch {
                    name: d.name.clone(),
                    expected: n,
                    actual: d.requirements.len(),
                });
            }
            beneficiaries.push(BeneficiaryType {
                name: d.name.clone(),
                requirements: d.requirements.clone().into(),
                feeding_days: d.feeding_days,
            });
        }
        let beneficiary_ids: HashMap<String, BeneficiaryIndex> =
            index_names(beneficiaries.iter().map(|b| b.name()))?;
        let beneficiary_of = |name: &str| {
            beneficiary_ids
                .get(name)
                .copied()
                .ok_or_else(|| UnknownBeneficiary(name.to_string()))
        };

        let mut demand = HashMap::new();
        for d in &data.demand {
            let location = location_of(&d.location)?;
            if locations[location].kind() != LocationKind::FinalDeliveryPoint {
                return Err(DemandOutsideDeliveryPoint(d.location.clone()));
            }
            let key = (
                beneficiary_of(&d.beneficiary)?,
                location,
                period_of(&d.period)?,
            );
            *demand.entry(key).or_insert(0.0) += d.count;
        }

        let baskets = data
            .baskets
            .iter()
            .map(|d| {
                Ok(Basket {
                    beneficiary: beneficiary_of(&d.beneficiary)?,
                    commodity: commodity_of(&d.commodity)?,
                    grams: d.grams,
                    feeding_days: d.feeding_days,
                })
            })
            .collect::<Result<Vec<_>, TopologyError>>()?;

        let seasonality = data
            .seasonality
            .iter()
            .map(|d| Ok(((commodity_of(&d.commodity)?, d.country.clone(), d.month), d.index)))
            .collect::<Result<HashMap<_, _>, TopologyError>>()?;

        let mut stock = HashMap::new();
        for d in &data.stock {
            let key = (location_of(&d.location)?, commodity_of(&d.commodity)?);
            *stock.entry(key).or_insert(0.0) += d.quantity;
        }

        let mut legs_out: TiVec<LocationIndex, Vec<LegIndex>> = vec![Vec::new(); locations.len()].into();
        let mut legs_in: TiVec<LocationIndex, Vec<LegIndex>> = vec![Vec::new(); locations.len()].into();
        for (l, leg) in legs.iter_enumerated() {
            legs_out[leg.origin].push(l);
            legs_in[leg.destination].push(l);
        }

        debug!(
            "Topology: {} locations, {} legs, {} procurement options, {} commodities, {} periods",
            locations.len(),
            legs.len(),
            procurement.len(),
            commodities.len(),
            periods.len()
        );

        Ok(Topology {
            periods,
            nutrients,
            commodities,
            food_groups,
            consumption_groups: data.consumption_groups.into(),
            locations,
            legs,
            route_capacities,
            procurement,
            beneficiaries,
            demand,
            baskets,
            seasonality,
            stock,
            legs_out,
            legs_in,
            option_of_leg,
        })
    }

    /// The planning calendar, sorted
    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn nutrients(&self) -> &TiVec<NutrientIndex, Nutrient> {
        &self.nutrients
    }

    pub fn commodities(&self) -> &TiVec<CommodityIndex, Commodity> {
        &self.commodities
    }

    pub fn food_groups(&self) -> &TiVec<FoodGroupIndex, String> {
        &self.food_groups
    }

    pub fn consumption_groups(&self) -> &TiVec<GroupIndex, ConsumptionGroup> {
        &self.consumption_groups
    }

    pub fn locations(&self) -> &TiVec<LocationIndex, Location> {
        &self.locations
    }

    pub fn legs(&self) -> &TiVec<LegIndex, Leg> {
        &self.legs
    }

    pub fn route_capacities(&self) -> &[RouteCapacity] {
        &self.route_capacities
    }

    pub fn procurement(&self) -> &TiVec<OptionIndex, ProcurementOption> {
        &self.procurement
    }

    pub fn beneficiaries(&self) -> &TiVec<BeneficiaryIndex, BeneficiaryType> {
        &self.beneficiaries
    }

    /// Baskets of supplementary activities
    pub fn baskets(&self) -> &[Basket] {
        &self.baskets
    }

    /// Legs leaving the location
    pub fn legs_out(&self, n: LocationIndex) -> &[LegIndex] {
        &self.legs_out[n]
    }

    /// Legs entering the location
    pub fn legs_in(&self, n: LocationIndex) -> &[LegIndex] {
        &self.legs_in[n]
    }

    /// The procurement option pricing the leg, if the leg leaves a source
    pub fn option_of_leg(&self, leg: LegIndex) -> Option<OptionIndex> {
        self.option_of_leg.get(&leg).copied()
    }

    pub fn final_delivery_points(&self) -> impl Iterator<Item = LocationIndex> + '_ {
        self.locations
            .iter_enumerated()
            .filter(|(_, l)| l.kind() == LocationKind::FinalDeliveryPoint)
            .map(|(i, _)| i)
    }

    pub fn hubs(&self) -> impl Iterator<Item = LocationIndex> + '_ {
        self.locations
            .iter_enumerated()
            .filter(|(_, l)| l.kind().is_hub())
            .map(|(i, _)| i)
    }

    /// Beneficiaries of the type at the final delivery point in the period at the given calendar position
    pub fn demand(&self, b: BeneficiaryIndex, fdp: LocationIndex, period: usize) -> f64 {
        self.demand.get(&(b, fdp, period)).copied().unwrap_or(0.0)
    }

    /// A period is empty for a beneficiary type if no final delivery point has any of its beneficiaries.
    pub fn is_empty_period(&self, b: BeneficiaryIndex, period: usize) -> bool {
        self.final_delivery_points()
            .all(|fdp| self.demand(b, fdp, period) <= 0.0)
    }

    /// Opening inventory held at the location
    pub fn opening_stock(&self, n: LocationIndex, c: CommodityIndex) -> Quantity {
        self.stock.get(&(n, c)).copied().unwrap_or(0.0)
    }

    pub fn stock(&self) -> impl Iterator<Item = (&(LocationIndex, CommodityIndex), &Quantity)> {
        self.stock.iter()
    }

    /// The seasonal price index of a commodity in a country and month of the year
    pub fn seasonality_index(&self, c: CommodityIndex, country: &str, month: u32) -> Option<f64> {
        self.seasonality
            .get(&(c, country.to_string(), month))
            .copied()
    }

    pub fn find_commodity(&self, name: &str) -> Option<CommodityIndex> {
        self.commodities
            .iter_enumerated()
            .find(|(_, c)| c.name() == name)
            .map(|(i, _)| i)
    }

    pub fn find_location(&self, name: &str) -> Option<LocationIndex> {
        self.locations
            .iter_enumerated()
            .find(|(_, l)| l.name() == name)
            .map(|(i, _)| i)
    }

    pub fn find_beneficiary(&self, name: &str) -> Option<BeneficiaryIndex> {
        self.beneficiaries
            .iter_enumerated()
            .find(|(_, b)| b.name() == name)
            .map(|(i, _)| i)
    }

    pub fn find_nutrient(&self, name: &str) -> Option<NutrientIndex> {
        self.nutrients
            .iter_enumerated()
            .find(|(_, n)| n.name() == name)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn period(s: &str) -> Period {
        s.parse().unwrap()
    }

    /// One supplier, one port, one final delivery point and one commodity, two periods with
    /// demand in the first period only.
    pub fn wheat() -> TopologyData {
        TopologyData {
            periods: vec![period("2024-01"), period("2024-02")],
            nutrients: vec![NutrientData {
                name: "Energy".into(),
                hard: true,
            }],
            commodities: vec![CommodityData {
                name: "Wheat".into(),
                nutrients: vec![350.0],
                super_commodity: "Cereals".into(),
                food_group: "Cereals".into(),
                consumption_group: None,
                cash: false,
            }],
            consumption_groups: vec![],
            locations: vec![
                location("Supplier", LocationKind::InternationalSupplier),
                location("Port", LocationKind::DischargePort),
                location("Camp", LocationKind::FinalDeliveryPoint),
            ],
            legs: vec![
                leg("Supplier", "Port", "Wheat", 500.0, 10.0),
                leg("Port", "Camp", "Wheat", 100.0, 5.0),
            ],
            route_capacities: vec![],
            procurement: vec![ProcurementData {
                source: "Supplier".into(),
                delivery_place: "Port".into(),
                commodity: "Wheat".into(),
                price: 0.0,
                capacity: None,
                seasonal_capacity: None,
                gmo: false,
                in_kind: false,
                incoterm: "CIF".into(),
                as_of: None,
            }],
            beneficiaries: vec![BeneficiaryData {
                name: "GFD".into(),
                requirements: vec![2100.0],
                feeding_days: 30.0,
            }],
            demand: vec![DemandData {
                beneficiary: "GFD".into(),
                location: "Camp".into(),
                period: period("2024-01"),
                count: 1000.0,
            }],
            baskets: vec![],
            seasonality: vec![],
            stock: vec![],
        }
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
}
