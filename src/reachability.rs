use std::collections::{BTreeMap, HashMap};

use float_ord::FloatOrd;
use log::{debug, trace};

use crate::problem::{Days, LocationIndex, LocationKind, Topology};

/// The fastest and slowest achievable delivery duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadTime {
    pub quick: Days,
    pub slow: Days,
}

impl LeadTime {
    fn point(days: Days) -> LeadTime {
        LeadTime {
            quick: days,
            slow: days,
        }
    }

    fn merge(&mut self, other: LeadTime) {
        self.quick = self.quick.min(other.quick);
        self.slow = self.slow.max(other.slow);
    }

    fn shift(self, days: Days) -> LeadTime {
        LeadTime {
            quick: self.quick + days,
            slow: self.slow + days,
        }
    }
}

/// Duration of a hub route and the hubs it visits, starting with its own
type Route = (Days, Vec<LocationIndex>);

/// The fastest and slowest simple routes found so far from a hub to a delivery point
#[derive(Debug, Clone)]
struct HubRoutes {
    time: LeadTime,
    quick_via: Vec<LocationIndex>,
    slow_via: Vec<LocationIndex>,
}

fn keep(best: &mut Option<Route>, candidate: Route, better: fn(Days, Days) -> bool) {
    if best.as_ref().map_or(true, |(days, _)| better(candidate.0, *days)) {
        *best = Some(candidate);
    }
}

/// Best and worst delivery lead times from every (source, delivery place) pair and every
/// transshipment hub to every final delivery point it can reach.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityIndex {
    /// Lead time from a hub, processing at the hub excluded, to a final delivery point
    hubs: HashMap<(LocationIndex, LocationIndex), LeadTime>,
    /// Lead time from a source through its delivery place to each final delivery point
    pairs: HashMap<(LocationIndex, LocationIndex), BTreeMap<LocationIndex, LeadTime>>,
}

impl ReachabilityIndex {
    pub fn build(topology: &Topology) -> ReachabilityIndex {
        let locations = topology.locations();
        let legs = topology.legs();
        let fdps: Vec<LocationIndex> = topology.final_delivery_points().collect();

        // Hubs are relaxed downstream tier first, so in a layered network one sweep suffices.
        // Further sweeps pick up hub-to-hub links within a tier, and stop once no figure improves.
        let mut tiers: Vec<LocationIndex> = topology.hubs().collect();
        tiers.sort_by_key(|n| match locations[*n].kind() {
            LocationKind::ExtendedDeliveryPoint => 0,
            _ => 1,
        });

        // Hub routes are kept simple: a route from `n` never passes through `n` again, so
        // hub cycles cannot stretch the slow figure.
        let mut routes: HashMap<(LocationIndex, LocationIndex), HubRoutes> = HashMap::new();
        for round in 0..tiers.len().max(1) {
            let mut changed = false;
            for &n in &tiers {
                for &f in &fdps {
                    let known = routes.get(&(n, f));
                    let mut quick = known.map(|r| (r.time.quick, r.quick_via.clone()));
                    let mut slow = known.map(|r| (r.time.slow, r.slow_via.clone()));
                    let before = (quick.as_ref().map(|r| r.0), slow.as_ref().map(|r| r.0));

                    for &l in topology.legs_out(n) {
                        let leg = &legs[l];
                        let m = leg.destination();
                        let mut offered: Vec<Route> = Vec::new();
                        if m == f {
                            offered.push((leg.duration(), vec![n]));
                        } else if m != n && locations[m].kind().is_hub() {
                            if let Some(down) = routes.get(&(m, f)) {
                                let hop = leg.duration() + locations[m].processing_days();
                                for (days, via) in [
                                    (down.time.quick, &down.quick_via),
                                    (down.time.slow, &down.slow_via),
                                ] {
                                    if !via.contains(&n) {
                                        offered.push((days + hop, [&[n][..], via.as_slice()].concat()));
                                    }
                                }
                            }
                        }
                        for route in offered {
                            keep(&mut quick, route.clone(), |a, b| a < b);
                            keep(&mut slow, route, |a, b| a > b);
                        }
                    }

                    if let (Some(quick), Some(slow)) = (quick, slow) {
                        if (Some(quick.0), Some(slow.0)) != before {
                            routes.insert(
                                (n, f),
                                HubRoutes {
                                    time: LeadTime {
                                        quick: quick.0,
                                        slow: slow.0,
                                    },
                                    quick_via: quick.1,
                                    slow_via: slow.1,
                                },
                            );
                            changed = true;
                        }
                    }
                }
            }
            trace!("Reachability round {round}: changed = {changed}");
            if !changed {
                break;
            }
        }
        let hubs: HashMap<(LocationIndex, LocationIndex), LeadTime> =
            routes.into_iter().map(|(key, r)| (key, r.time)).collect();

        let mut pairs: HashMap<(LocationIndex, LocationIndex), BTreeMap<LocationIndex, LeadTime>> =
            HashMap::new();
        for option in topology.procurement() {
            let (s, d) = (option.source(), option.delivery_place());
            let leg = &legs[option.leg()];
            for &f in &fdps {
                let reach = if d == f {
                    Some(LeadTime::point(leg.duration()))
                } else if locations[d].kind().is_hub() {
                    hubs.get(&(d, f))
                        .map(|down| down.shift(leg.duration() + locations[d].processing_days()))
                } else {
                    None
                };

                if let Some(reach) = reach {
                    pairs
                        .entry((s, d))
                        .or_default()
                        .entry(f)
                        .and_modify(|lt| lt.merge(reach))
                        .or_insert(reach);
                }
            }
        }

        debug!(
            "Reachability index: {} hub entries, {} reachable procurement pairs",
            hubs.len(),
            pairs.len()
        );

        ReachabilityIndex { hubs, pairs }
    }

    /// Lead time from a hub to a final delivery point
    pub fn hub(&self, hub: LocationIndex, fdp: LocationIndex) -> Option<LeadTime> {
        self.hubs.get(&(hub, fdp)).copied()
    }

    /// Lead time from a (source, delivery place) pair to one final delivery point
    pub fn to_fdp(
        &self,
        source: LocationIndex,
        place: LocationIndex,
        fdp: LocationIndex,
    ) -> Option<LeadTime> {
        self.pairs
            .get(&(source, place))
            .and_then(|m| m.get(&fdp))
            .copied()
    }

    /// The binding lead time of a pair: the fastest and slowest figures towards its
    /// hardest-to-serve final delivery point. `None` if the pair reaches no delivery point.
    pub fn pair(&self, source: LocationIndex, place: LocationIndex) -> Option<LeadTime> {
        let reach = self.pairs.get(&(source, place))?;
        let quick = reach.values().map(|lt| FloatOrd(lt.quick)).max()?;
        let slow = reach.values().map(|lt| FloatOrd(lt.slow)).max()?;
        Some(LeadTime {
            quick: quick.0,
            slow: slow.0,
        })
    }

    /// Every reachable (source, delivery place) pair
    pub fn pairs(&self) -> impl Iterator<Item = (LocationIndex, LocationIndex)> + '_ {
        self.pairs.keys().copied()
    }

    /// The largest binding quick lead time over all pairs
    pub fn max_quick(&self) -> Days {
        self.pairs()
            .filter_map(|(s, d)| self.pair(s, d))
            .map(|lt| FloatOrd(lt.quick))
            .max()
            .map_or(0.0, |x| x.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{fixtures::*, ProcurementData, TopologyData};

    fn procure(source: &str, place: &str) -> ProcurementData {
        ProcurementData {
            source: source.into(),
            delivery_place: place.into(),
            commodity: "Wheat".into(),
            price: 100.0,
            capacity: None,
            seasonal_capacity: None,
            gmo: false,
            in_kind: false,
            incoterm: "DAP".into(),
            as_of: None,
        }
    }

    /// Supplier -> Port -> EDP -> {Camp A, Camp B}, plus Port -> Camp B directly and a
    /// local supplier delivering straight to Camp A.
    fn tiered() -> TopologyData {
        let mut data = wheat();
        let mut port = location("Port", LocationKind::DischargePort);
        port.processing_days = 5.0;
        data.locations = vec![
            location("Supplier", LocationKind::InternationalSupplier),
            location("Local", LocationKind::LocalSupplier),
            port,
            location("EDP", LocationKind::ExtendedDeliveryPoint),
            location("Camp A", LocationKind::FinalDeliveryPoint),
            location("Camp B", LocationKind::FinalDeliveryPoint),
        ];
        data.legs = vec![
            leg("Supplier", "Port", "Wheat", 50.0, 20.0),
            leg("Local", "Camp A", "Wheat", 10.0, 4.0),
            leg("Port", "EDP", "Wheat", 10.0, 7.0),
            leg("EDP", "Camp A", "Wheat", 10.0, 3.0),
            leg("EDP", "Camp B", "Wheat", 10.0, 2.0),
            leg("Port", "Camp B", "Wheat", 10.0, 15.0),
        ];
        data.procurement = vec![procure("Supplier", "Port"), procure("Local", "Camp A")];
        data.demand.clear();
        data
    }

    #[test]
    fn propagates_through_tiers() {
        let topology = Topology::new(tiered()).unwrap();
        let index = ReachabilityIndex::build(&topology);
        let id = |name: &str| topology.find_location(name).unwrap();

        assert_eq!(index.hub(id("EDP"), id("Camp A")), Some(LeadTime::point(3.0)));
        // Port -> EDP -> Camp B = 7 + 2 versus Port -> Camp B = 15
        assert_eq!(
            index.hub(id("Port"), id("Camp B")),
            Some(LeadTime {
                quick: 9.0,
                slow: 15.0
            })
        );
        // 20 days at sea + 5 days port processing + 9..15
        assert_eq!(
            index.to_fdp(id("Supplier"), id("Port"), id("Camp B")),
            Some(LeadTime {
                quick: 34.0,
                slow: 40.0
            })
        );
        // Camp A: 25 + 7 + 3 = 35; binding figure is the worst-case destination
        assert_eq!(
            index.pair(id("Supplier"), id("Port")),
            Some(LeadTime {
                quick: 35.0,
                slow: 40.0
            })
        );
        assert_eq!(index.max_quick(), 35.0);
    }

    #[test]
    fn direct_delivery_reaches_only_its_own_point() {
        let topology = Topology::new(tiered()).unwrap();
        let index = ReachabilityIndex::build(&topology);
        let id = |name: &str| topology.find_location(name).unwrap();

        assert_eq!(
            index.pair(id("Local"), id("Camp A")),
            Some(LeadTime::point(4.0))
        );
        assert_eq!(index.to_fdp(id("Local"), id("Camp A"), id("Camp B")), None);
    }

    #[test]
    fn unreachable_pairs_are_dropped() {
        let mut data = tiered();
        // Cut every route out of the port
        data.legs.retain(|l| l.origin != "Port");
        let topology = Topology::new(data).unwrap();
        let index = ReachabilityIndex::build(&topology);
        let id = |name: &str| topology.find_location(name).unwrap();
        assert_eq!(index.pair(id("Supplier"), id("Port")), None);
        assert_eq!(index.pairs().count(), 1);
    }

    #[test]
    fn hub_cycles_do_not_stretch_lead_times() {
        let mut data = wheat();
        data.locations = vec![
            location("Supplier", LocationKind::InternationalSupplier),
            location("Port", LocationKind::DischargePort),
            location("EDP 1", LocationKind::ExtendedDeliveryPoint),
            location("EDP 2", LocationKind::ExtendedDeliveryPoint),
            location("Camp", LocationKind::FinalDeliveryPoint),
        ];
        data.legs = vec![
            leg("Supplier", "Port", "Wheat", 50.0, 20.0),
            leg("Port", "EDP 1", "Wheat", 10.0, 5.0),
            leg("EDP 1", "Camp", "Wheat", 10.0, 3.0),
            leg("EDP 1", "EDP 2", "Wheat", 10.0, 2.0),
            leg("EDP 2", "EDP 1", "Wheat", 10.0, 2.0),
            leg("EDP 2", "Camp", "Wheat", 10.0, 4.0),
        ];
        data.procurement = vec![procure("Supplier", "Port")];
        let topology = Topology::new(data).unwrap();
        let index = ReachabilityIndex::build(&topology);
        let id = |name: &str| topology.find_location(name).unwrap();

        // EDP 1 -> EDP 2 -> Camp is the slowest simple route, 2 + 4
        assert_eq!(
            index.hub(id("EDP 1"), id("Camp")),
            Some(LeadTime {
                quick: 3.0,
                slow: 6.0
            })
        );
        assert_eq!(
            index.hub(id("EDP 2"), id("Camp")),
            Some(LeadTime {
                quick: 4.0,
                slow: 5.0
            })
        );
        assert_eq!(
            index.hub(id("Port"), id("Camp")),
            Some(LeadTime {
                quick: 8.0,
                slow: 11.0
            })
        );
        assert_eq!(
            index.pair(id("Supplier"), id("Port")),
            Some(LeadTime {
                quick: 28.0,
                slow: 31.0
            })
        );
    }
}
