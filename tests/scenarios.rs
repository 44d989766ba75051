mod common;

use aidflow::{
    export::{export_directives, import_directives},
    kpi::Statistic,
    models::{
        core::{CoreKey, CoreModel},
        Formulation,
    },
    problem::{
        BasketData, BeneficiaryData, CommodityData, ConsumptionGroup, DemandData, LegData,
        RouteCapacityData, SeasonalityData, StockData,
    },
    scenario::{compile, Directive, DirectiveError, Pattern},
    EngineConfig, Outcome, ScenarioOutcome, Topology, TopologyData,
};
use common::*;

#[test]
fn worked_example() {
    let mut engine = engine(wheat());
    let outcome = engine.solve(&scenario("worked")).unwrap();
    assert_eq!(outcome.outcome, Outcome::Optimal);
    assert_eq!(outcome.error_count(), 0);
    assert!((outcome.objective.unwrap() - 10_800.0).abs() < TOL);

    let solution = outcome.solution.as_ref().unwrap();
    let (jan, feb) = (period("2024-01"), period("2024-02"));
    assert!((solution.basket.ration(jan, "Wheat") - 600.0).abs() < TOL);
    assert_eq!(solution.basket.ration(feb, "Wheat"), 0.0);

    let shipped: Vec<(&str, &str, f64)> = solution
        .flows
        .rows
        .iter()
        .filter(|row| row.mode.is_some())
        .map(|row| (row.origin.as_str(), row.destination.as_str(), row.tonnes))
        .collect();
    assert_eq!(shipped.len(), 2);
    for (_, _, tonnes) in &shipped {
        assert!((tonnes - 18.0).abs() < TOL);
    }
    assert!(solution.flows.rows.iter().all(|row| row.period == jan));
    assert_eq!(solution.flows.shipped_in(feb), 0.0);

    // Averages only count the non-empty period
    let energy = solution
        .stats
        .get(&Statistic::NutrientSupply("Energy".into()))
        .unwrap();
    assert!((energy.periods[0] - 2100.0).abs() < TOL);
    assert!(energy.periods[1].abs() < TOL);
    assert!((energy.average - 2100.0).abs() < TOL);
    assert!((energy.headline() - 2100.0).abs() < TOL);

    let total = solution.stats.get(&Statistic::TotalCost).unwrap();
    assert!((total.total - 10_800.0).abs() < TOL);
    let nvs = solution.stats.get(&Statistic::NutritionalValueScore).unwrap();
    assert_eq!(nvs.periods, vec![1.0, 0.0]);
    let lead = solution.stats.get(&Statistic::LeadTimeMax).unwrap();
    assert_eq!(lead.total, 15.0);
}

#[test]
fn flow_is_conserved_at_hubs() {
    let mut data = two_sources();
    data.stock.push(StockData {
        location: "Port".into(),
        commodity: "Beans".into(),
        quantity: 4.0,
    });
    let mut engine = engine(data);
    let outcome = engine.solve(&scenario("conservation")).unwrap();
    assert!(outcome.is_optimal());
    let values = &outcome.solution.as_ref().unwrap().values;

    let topology = engine.topology();
    let core = engine.core().unwrap();
    let network = &core.parameters.network;
    let delay = network.carry_delay();
    for &(n, c) in &core.sets.H {
        for &t in &core.sets.T {
            let mut inflow: f64 = network
                .arrivals(n, c, t)
                .iter()
                .map(|(l, departure)| values[&core.vars.f[&(*l, *departure)]])
                .sum();
            if t >= delay {
                inflow += values[&core.vars.i[&(n, c, t - delay)]];
            }
            if t == 0 {
                inflow += topology.opening_stock(n, c);
            }
            let outflow: f64 = topology
                .legs_out(n)
                .iter()
                .filter(|l| topology.legs()[**l].commodity() == c)
                .map(|l| values[&core.vars.f[&(*l, t)]])
                .sum::<f64>()
                + values[&core.vars.i[&(n, c, t)]];
            assert!(
                (inflow - outflow).abs() < TOL,
                "{n:?} {c:?} {t}: {inflow} != {outflow}"
            );
        }
    }
}

#[test]
fn capacities_are_respected() {
    let mut data = two_sources();
    data.locations[2].capacity.insert(period("2024-01"), 15.0);
    data.legs[3] = LegData {
        capacity: Some(16.0),
        ..leg("Port", "Camp", "Wheat", 100.0, 5.0)
    };
    let mut engine = engine(data);
    let outcome = engine.solve(&scenario("capacity")).unwrap();
    assert!(outcome.is_optimal());

    let solution = outcome.solution.as_ref().unwrap();
    let jan = period("2024-01");
    let tonnes = |origin: &str, destination: &str| -> f64 {
        solution
            .flows
            .rows
            .iter()
            .filter(|row| row.period == jan && row.origin == origin && row.destination == destination)
            .map(|row| row.tonnes)
            .sum()
    };
    assert!(tonnes("Abroad", "Port") <= 15.0 + TOL);
    assert!(tonnes("Port", "Camp") <= 15.0 + TOL);
    assert!((tonnes("Market", "Camp") - 3.0).abs() < TOL);
    // 15 t at 700 and 3 t at 750 in January, 18 t at 700 in February
    assert!((outcome.objective.unwrap() - 25_350.0).abs() < TOL);
}

#[test]
fn indicators_agree_with_rations() {
    let mut engine = engine(two_sources());
    let context = scenario("indicators").with_directive(Directive::FoodGroup {
        group: Pattern::exact("Pulses"),
        include: true,
    });
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    let values = &outcome.solution.as_ref().unwrap().values;

    let topology = engine.topology();
    let core = engine.core().unwrap();
    let value = |var: good_lp::Variable| values[&var];
    for &t in &core.sets.T {
        for &c in &core.sets.C {
            let in_basket = value(core.vars.b[&(c, t)]) > 0.5;
            assert_eq!(in_basket, value(core.vars.r[&(c, t)]) > TOL);
        }
        for &g in &core.sets.G {
            let any = core.sets.C_g[g]
                .iter()
                .any(|c| value(core.vars.b[&(*c, t)]) > 0.5);
            assert_eq!(value(core.vars.g[&(g, t)]) > 0.5, any);
        }
    }

    let beans = &outcome.solution.as_ref().unwrap().basket;
    for p in topology.periods() {
        assert!(beans.ration(*p, "Beans") >= 1.0 - TOL);
    }
    // The cheapest way in: 1 g of beans a day, replacing 3.4 kcal worth of wheat
    assert!((outcome.objective.unwrap() - with_a_gram_of_beans()).abs() < TOL);
}

/// Objective of the two-source network when every basket must hold the minimum 1 g of beans
fn with_a_gram_of_beans() -> f64 {
    let beans = 0.03;
    let wheat = (63.0 - 3.4 * beans) / 3.5;
    2.0 * (wheat * 700.0 + beans * 1200.0)
}

#[test]
fn excluded_food_groups_leave_the_basket() {
    let mut engine = engine(two_sources());
    let context = scenario("no cereals").with_directive(Directive::FoodGroup {
        group: Pattern::exact("Cereals"),
        include: false,
    });
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    let basket = &outcome.solution.as_ref().unwrap().basket;
    assert_eq!(basket.ration(period("2024-01"), "Wheat"), 0.0);
    assert!((basket.ration(period("2024-01"), "Beans") - 2100.0 / 3.4).abs() < TOL);
    assert!((outcome.objective.unwrap() - 2.0 * 63.0 / 3.4 * 1200.0).abs() < TOL);
}

#[test]
fn consumption_score_bound_diversifies_the_basket() {
    let mut data = two_sources();
    data.consumption_groups = vec![
        ConsumptionGroup {
            name: "Staples".into(),
            weight: 2.0,
        },
        ConsumptionGroup {
            name: "Pulses".into(),
            weight: 3.0,
        },
    ];
    data.commodities[0].consumption_group = Some("Staples".into());
    data.commodities[1].consumption_group = Some("Pulses".into());
    let mut engine = engine(data);

    let outcome = engine.solve(&scenario("wheat only")).unwrap();
    let stats = &outcome.solution.as_ref().unwrap().stats;
    let score = stats.get(&Statistic::ConsumptionScore).unwrap();
    assert!(score.periods.iter().all(|s| (s - 2.0).abs() < TOL));

    let context = scenario("diverse").with_directive(Directive::StatisticBound {
        statistic: Statistic::ConsumptionScore,
        period: None,
        min: Some(5.0),
        max: None,
    });
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    let solution = outcome.solution.as_ref().unwrap();
    let score = solution.stats.get(&Statistic::ConsumptionScore).unwrap();
    assert!(score.periods.iter().all(|s| (s - 5.0).abs() < TOL));
    assert!((solution.basket.ration(period("2024-02"), "Beans") - 1.0).abs() < TOL);
    assert!((outcome.objective.unwrap() - with_a_gram_of_beans()).abs() < TOL);
}

#[test]
fn identical_scenarios_solve_identically() {
    let context = scenario("repeat").with_directive(Directive::RationSize {
        commodity: Pattern::exact("Beans"),
        min: Some(50.0),
        max: Some(50.0),
    });
    let mut engine = engine(two_sources());
    let first = engine.solve(&context).unwrap();
    let second = engine.solve(&context).unwrap();
    assert!(first.is_optimal());
    assert_eq!(first.objective, second.objective);

    let fresh = common::engine(two_sources()).solve(&context).unwrap();
    assert_eq!(first.objective, fresh.objective);
    assert_eq!(
        first.solution.unwrap().flows,
        fresh.solution.unwrap().flows
    );
}

#[test]
fn exported_directives_compile_to_the_same_model() {
    let topology = Topology::new(two_sources()).unwrap();
    let horizon = horizon("2024-01", "2024-02");
    let core =
        CoreModel::build(&topology, &EngineConfig::default(), CoreKey::new(horizon, false)).unwrap();

    let mut context = scenario("round trip");
    context.directives = vec![
        Directive::Routing {
            origin: Pattern::exact("Market"),
            destination: Pattern::Any,
            commodity: Pattern::Any,
            include: true,
            quantity: Some(2.0),
        },
        Directive::CommodityTonnage {
            commodity: Pattern::StartsWith("Be".into()),
            min: None,
            max: Some(0.25),
        },
        Directive::StatisticBound {
            statistic: Statistic::ProcurementCost(None),
            period: Some(period("2024-02")),
            min: None,
            max: Some(123_456.5),
        },
        Directive::NutrientShortfallCap {
            nutrient: Pattern::Any,
            max_shortfall: 0.1,
        },
        Directive::Gmo { allow: false },
    ];

    let json = export_directives(&context.directives).unwrap();
    let mut reloaded = context.clone();
    reloaded.directives = import_directives(&json).unwrap();

    let first = compile(&core, &topology, &context).unwrap();
    let again = compile(&core, &topology, &reloaded).unwrap();
    assert!(first.errors.is_empty());
    assert_same_model(&first.problem, &again.problem);
}

fn assert_same_model(a: &Formulation, b: &Formulation) {
    assert_eq!(a.num_constrs(), b.num_constrs());
    for (x, y) in a.constraints.iter().zip(&b.constraints) {
        assert_eq!(x.name(), y.name());
        assert_eq!(x.is_equality(), y.is_equality());
        assert!(x.expression() == y.expression(), "{:?} differs", x.name());
    }
    let defs = |f: &Formulation| {
        f.variables
            .iter_variables_with_def()
            .map(|(_, def)| def.clone())
            .collect::<Vec<_>>()
    };
    assert!(defs(a) == defs(b));
    assert!(a.objective == b.objective);
}

#[test]
fn stale_directives_are_counted_not_fatal() {
    let mut engine = engine(two_sources());
    let context = scenario("stale")
        .with_directive(Directive::RationSize {
            commodity: Pattern::exact("Rice"),
            min: Some(10.0),
            max: None,
        })
        .with_directive(Directive::Procurement {
            source: Pattern::exact("Nowhere"),
            country: Pattern::Any,
            incoterm: Pattern::Any,
            delivery_place: Pattern::Any,
            commodity: Pattern::Any,
            include: false,
            quantity: None,
        })
        .with_directive(Directive::RationSize {
            commodity: Pattern::exact("Wheat"),
            min: Some(500.0),
            max: Some(400.0),
        })
        .with_directive(Directive::Procurement {
            source: Pattern::exact("Market"),
            country: Pattern::Any,
            incoterm: Pattern::Any,
            delivery_place: Pattern::Any,
            commodity: Pattern::Any,
            include: true,
            quantity: Some(4.0),
        });
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    assert_eq!(outcome.error_count(), 3);
    assert!(matches!(
        outcome.directive_errors[2],
        DirectiveError::InvalidBound(_)
    ));

    // The valid inclusion still applies: 4 t from the market, 32 t through the port
    assert!((outcome.objective.unwrap() - (4.0 * 750.0 + 32.0 * 700.0)).abs() < TOL);
}

#[test]
fn unknown_beneficiary_fails_the_scenario() {
    let mut engine = engine(wheat());
    let mut context = scenario("nobody");
    context.beneficiary = "School feeding".into();
    assert!(engine.solve(&context).is_err());
}

fn nutrition_activity(data: &mut TopologyData, month: &str) {
    let nutrients = data.nutrients.len();
    data.beneficiaries.push(BeneficiaryData {
        name: "Nutrition".into(),
        requirements: vec![0.0; nutrients],
        feeding_days: 30.0,
    });
    data.baskets.push(BasketData {
        beneficiary: "Nutrition".into(),
        commodity: "Wheat".into(),
        grams: 100.0,
        feeding_days: 30.0,
    });
    data.demand.push(DemandData {
        beneficiary: "Nutrition".into(),
        location: "Camp".into(),
        period: period(month),
        count: 1000.0,
    });
}

fn delivered_to_camp(outcome: &ScenarioOutcome, month: &str) -> f64 {
    outcome
        .solution
        .as_ref()
        .unwrap()
        .flows
        .rows
        .iter()
        .filter(|row| row.period == period(month) && row.destination == "Camp")
        .map(|row| row.tonnes)
        .sum()
}

#[test]
fn supplementary_baskets_add_demand() {
    let mut data = two_sources();
    nutrition_activity(&mut data, "2024-01");
    let mut engine = engine(data);

    let mut context = scenario("supplementary");
    context.supplementary = vec!["Nutrition".into()];
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    // 3 t of port wheat for the supplementary activity in January, on top of 2 x 18 t
    assert!((outcome.objective.unwrap() - (25_200.0 + 3.0 * 700.0)).abs() < TOL);
    assert!((delivered_to_camp(&outcome, "2024-01") - 21.0).abs() < TOL);
    assert!((delivered_to_camp(&outcome, "2024-02") - 18.0).abs() < TOL);
}

#[test]
fn empty_periods_deliver_nothing() {
    let mut data = wheat();
    nutrition_activity(&mut data, "2024-02");
    let mut engine = engine(data);

    let mut context = scenario("supplementary");
    context.supplementary = vec!["Nutrition".into()];
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    // No general distribution in February, so the supplementary basket is not served either
    assert!((outcome.objective.unwrap() - 10_800.0).abs() < TOL);
    assert_eq!(delivered_to_camp(&outcome, "2024-02"), 0.0);
}

#[test]
fn cash_share_is_fixed_by_transfer_modality() {
    let mut data = two_sources();
    data.commodities.push(CommodityData {
        cash: true,
        ..commodity("Cash", vec![350.0, 11.0], "Cash")
    });
    data.locations
        .push(location("Shops", aidflow::problem::LocationKind::CashVoucherMarket));
    data.legs.push(leg("Shops", "Camp", "Cash", 0.0, 0.0));
    data.procurement.push(option("Shops", "Camp", "Cash", 1000.0));
    let mut engine = engine(data);

    let context = scenario("cash").with_directive(Directive::TransferModality {
        nutrient: Some("Energy".into()),
        min_cash_share: Some(0.5),
        max_cash_share: Some(0.5),
    });
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    let basket = &outcome.solution.as_ref().unwrap().basket;
    let jan = period("2024-01");
    assert!((basket.ration(jan, "Cash") - 300.0).abs() < TOL);
    assert!((basket.ration(jan, "Wheat") - 300.0).abs() < TOL);
}

/// Tonnes shipped from `origin` to `destination` in the month
fn shipped(outcome: &ScenarioOutcome, month: &str, origin: &str, destination: &str) -> f64 {
    outcome
        .solution
        .as_ref()
        .unwrap()
        .flows
        .rows
        .iter()
        .filter(|row| row.mode.is_some())
        .filter(|row| row.period == period(month) && row.origin == origin && row.destination == destination)
        .map(|row| row.tonnes)
        .sum()
}

#[test]
fn capacity_target_caps_hub_throughput() {
    let mut engine = engine(two_sources());
    let context = scenario("port cap").with_directive(Directive::CapacityTarget {
        location: Pattern::exact("Port"),
        min_utilization: None,
        max_utilization: None,
        max_tonnage: Some(15.0),
    });
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    assert_eq!(outcome.error_count(), 0);
    let mut market = 0.0;
    for month in ["2024-01", "2024-02"] {
        assert!(shipped(&outcome, month, "Abroad", "Port") <= 15.0 + TOL);
        market += shipped(&outcome, month, "Market", "Camp");
    }
    assert!((market - 6.0).abs() < TOL);
    assert!((outcome.objective.unwrap() - 2.0 * (15.0 * 700.0 + 3.0 * 750.0)).abs() < TOL);
}

#[test]
fn in_kind_floor_forces_donations() {
    let mut data = two_sources();
    data.procurement[2].in_kind = true;
    let mut engine = engine(data);
    let market = |outcome: &ScenarioOutcome| {
        shipped(outcome, "2024-01", "Market", "Camp") + shipped(outcome, "2024-02", "Market", "Camp")
    };

    let by_tonnage = scenario("tonnage").with_directive(Directive::InKindFloor {
        min_tonnage: Some(8.0),
        min_share: None,
    });
    let outcome = engine.solve(&by_tonnage).unwrap();
    assert!(outcome.is_optimal());
    assert!((market(&outcome) - 8.0).abs() < TOL);
    assert!((outcome.objective.unwrap() - (25_200.0 + 8.0 * 50.0)).abs() < TOL);

    // A quarter of the 36 t procured
    let by_share = scenario("share").with_directive(Directive::InKindFloor {
        min_tonnage: None,
        min_share: Some(0.25),
    });
    let outcome = engine.solve(&by_share).unwrap();
    assert!(outcome.is_optimal());
    assert!((market(&outcome) - 9.0).abs() < TOL);
    assert!((outcome.objective.unwrap() - (25_200.0 + 9.0 * 50.0)).abs() < TOL);
}

#[test]
fn route_capacity_spans_every_commodity_on_the_route() {
    let mut data = two_sources();
    data.route_capacities.push(RouteCapacityData {
        origin: "Port".into(),
        destination: "Camp".into(),
        capacity: [(period("2024-01"), 14.0)].into_iter().collect(),
    });
    let mut engine = engine(data);
    let outcome = engine.solve(&scenario("route")).unwrap();
    assert!(outcome.is_optimal());
    assert!(shipped(&outcome, "2024-01", "Port", "Camp") <= 14.0 + TOL);
    assert!((shipped(&outcome, "2024-01", "Market", "Camp") - 4.0).abs() < TOL);
    assert!((shipped(&outcome, "2024-02", "Port", "Camp") - 18.0).abs() < TOL);
    assert!((outcome.objective.unwrap() - 25_400.0).abs() < TOL);
}

#[test]
fn seasonal_node_capacity_is_met_from_stock() {
    let mut data = two_sources();
    data.locations[2].capacity.insert(period("2024-02"), 14.0);
    data.locations[2].storage_cost = 10.0;
    let mut engine = engine(data);
    let outcome = engine.solve(&scenario("lean season")).unwrap();
    assert!(outcome.is_optimal());

    // Storing 4 t over January at 10 a tonne beats buying them at the market
    assert!(shipped(&outcome, "2024-02", "Abroad", "Port") <= 14.0 + TOL);
    assert!((shipped(&outcome, "2024-01", "Abroad", "Port") - 22.0).abs() < TOL);
    let stored: f64 = outcome
        .solution
        .as_ref()
        .unwrap()
        .flows
        .rows
        .iter()
        .filter(|row| row.mode.is_none() && row.period == period("2024-01"))
        .map(|row| row.tonnes)
        .sum();
    assert!((stored - 4.0).abs() < TOL);
    assert!((outcome.objective.unwrap() - 25_240.0).abs() < TOL);
}

#[test]
fn forecast_prices_follow_the_seasonal_index() {
    let mut data = two_sources();
    data.procurement[0].as_of = Some(period("2024-01"));
    // Too dear to buy ahead in January and hold at the port
    data.locations[2].storage_cost = 150.0;
    data.seasonality = [(1, 1.0), (2, 1.5)]
        .into_iter()
        .map(|(month, index)| SeasonalityData {
            commodity: "Wheat".into(),
            country: "Somewhere".into(),
            month,
            index,
        })
        .collect();
    let mut engine = engine(data);

    let outcome = engine.solve(&scenario("spot")).unwrap();
    assert!((outcome.objective.unwrap() - 25_200.0).abs() < TOL);

    // February wheat abroad costs 200 x 1.5, so the market is used up first
    let mut context = scenario("forecast");
    context.forecast = true;
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());
    assert!(shipped(&outcome, "2024-01", "Market", "Camp").abs() < TOL);
    assert!((shipped(&outcome, "2024-02", "Market", "Camp") - 5.0).abs() < TOL);
    let expected = 18.0 * 700.0 + 13.0 * 800.0 + 5.0 * 750.0;
    assert!((outcome.objective.unwrap() - expected).abs() < TOL);
}

#[test]
fn gmo_exclusion_closes_flagged_options() {
    let mut data = two_sources();
    data.procurement[0].gmo = true;
    let mut engine = engine(data);
    let context = scenario("no gmo").with_directive(Directive::Gmo { allow: false });
    let outcome = engine.solve(&context).unwrap();
    assert!(outcome.is_optimal());

    // Only the market sells wheat now; beans make up the remaining energy
    let beans = (63.0 - 17.5) / 3.4;
    let rows = &outcome.solution.as_ref().unwrap().flows.rows;
    assert!(!rows.iter().any(|row| row.origin == "Abroad" && row.commodity == "Wheat"));
    for month in ["2024-01", "2024-02"] {
        assert!((shipped(&outcome, month, "Market", "Camp") - 5.0).abs() < TOL);
        assert!((shipped(&outcome, month, "Abroad", "Port") - beans).abs() < TOL);
    }
    let expected = 2.0 * (5.0 * 750.0 + beans * 1200.0);
    assert!((outcome.objective.unwrap() - expected).abs() < TOL);
}

#[test]
fn scaled_demand_stays_within_the_flow_bound() {
    let mut engine = engine(wheat());
    let mut context = scenario("scaled");
    context.demand_scale = 3.4;
    let outcome = engine.solve(&context).unwrap();
    assert_eq!(outcome.outcome, Outcome::Optimal);
    assert!((outcome.objective.unwrap() - 18.0 * 3.4 * 600.0).abs() < TOL);
}
